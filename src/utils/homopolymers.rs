// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use bio::alphabets::dna;

/// Minimal number of identical bases for a stretch to be considered a homopolymer.
/// Single bases carry no measurable indel signal.
pub(crate) const MIN_HOMOPOLYMER_LEN: usize = 2;

/// Count how many items of the given iterator continue a stretch of the given base.
pub(crate) fn extend_homopolymer_stretch(base: u8, seq: &mut dyn Iterator<Item = &u8>) -> usize {
    let base = base.to_ascii_uppercase();
    seq.take_while(|c| c.to_ascii_uppercase() == base).count()
}

/// Whether the given base is an unambiguous nucleotide.
pub(crate) fn is_nucleotide(base: u8) -> bool {
    matches!(base.to_ascii_uppercase(), b'A' | b'C' | b'G' | b'T')
}

/// The base as read by the sequencer, given the strand the read was aligned to.
pub(crate) fn sequenced_base(base: u8, reverse: bool) -> u8 {
    if reverse {
        dna::complement(base.to_ascii_uppercase())
    } else {
        base.to_ascii_uppercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_homopolymer_stretch() {
        let seq = b"AAAGT";
        assert_eq!(extend_homopolymer_stretch(b'a', &mut seq.iter()), 3);
        assert_eq!(extend_homopolymer_stretch(b'T', &mut seq.iter().rev()), 1);
        assert_eq!(extend_homopolymer_stretch(b'C', &mut seq.iter()), 0);
    }

    #[test]
    fn test_sequenced_base() {
        assert_eq!(sequenced_base(b'A', false), b'A');
        assert_eq!(sequenced_base(b'a', true), b'T');
        assert_eq!(sequenced_base(b'G', true), b'C');
    }
}
