// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Per-run tallies of observed homopolymer lengths.
//!
//! A `RunTally` is mutable while the reads covering its run are processed. Once the
//! run is closed, it is consumed into a `FrozenRunTally`, which offers read access only.

use std::collections::{BTreeMap, HashSet};

use bio_types::strand::ReqStrand;

use crate::counting::evidence::ReadEvidence;
use crate::counting::policy::{CountingPolicy, CountingUnit};
use crate::counting::runs::HomopolymerRun;

/// Mapping from observed homopolymer length to count.
pub type Histogram = BTreeMap<u32, u64>;

/// What happened to a piece of evidence when folding it into a tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inclusion {
    Included,
    /// Excluded because spanning is required.
    Nonspanning,
    /// Excluded because the read was already counted for this run.
    Duplicate,
    /// Excluded because the alignment skips reference bases at the run.
    Spliced,
}

#[derive(Debug, Clone)]
pub struct RunTally {
    run: HomopolymerRun,
    histogram: Histogram,
    base_histogram: Histogram,
    forward: Histogram,
    reverse: Histogram,
    forward_bases: Histogram,
    reverse_bases: Histogram,
    spanning: u64,
    nonspanning: u64,
    duplicates: u64,
    spliced: u64,
    seen: HashSet<Vec<u8>>,
}

impl RunTally {
    pub fn new(run: HomopolymerRun) -> Self {
        RunTally {
            run,
            histogram: Histogram::new(),
            base_histogram: Histogram::new(),
            forward: Histogram::new(),
            reverse: Histogram::new(),
            forward_bases: Histogram::new(),
            reverse_bases: Histogram::new(),
            spanning: 0,
            nonspanning: 0,
            duplicates: 0,
            spliced: 0,
            seen: HashSet::new(),
        }
    }

    pub fn run(&self) -> &HomopolymerRun {
        &self.run
    }

    /// Fold the given evidence into the tally, according to the policy.
    ///
    /// Evidence crossing a skipped reference region is never used. Nonspanning
    /// evidence only enters the histograms if spanning is not required. When counting
    /// reads, each read name is included at most once, such that an excluded mate
    /// does not shadow the other mate of its fragment.
    pub fn fold(&mut self, evidence: &ReadEvidence, policy: &CountingPolicy) -> Inclusion {
        if evidence.spliced() {
            self.spliced += 1;
            return Inclusion::Spliced;
        }
        if !evidence.spanning() && policy.requires_spanning() {
            self.nonspanning += 1;
            return Inclusion::Nonspanning;
        }
        if policy.unit == CountingUnit::Reads && !self.seen.insert(evidence.qname().to_owned()) {
            self.duplicates += 1;
            return Inclusion::Duplicate;
        }

        if evidence.spanning() {
            self.spanning += 1;
        } else {
            self.nonspanning += 1;
        }

        let len = evidence.observed_len();
        let bases = evidence.covered_bases() as u64;
        *self.histogram.entry(len).or_insert(0) += 1;
        *self.base_histogram.entry(len).or_insert(0) += bases;
        let (reads, covered) = match evidence.strand() {
            ReqStrand::Forward => (&mut self.forward, &mut self.forward_bases),
            ReqStrand::Reverse => (&mut self.reverse, &mut self.reverse_bases),
        };
        *reads.entry(len).or_insert(0) += 1;
        *covered.entry(len).or_insert(0) += bases;

        Inclusion::Included
    }

    /// Close the tally. No evidence can be added afterwards.
    pub fn freeze(self) -> FrozenRunTally {
        FrozenRunTally {
            run: self.run,
            histogram: self.histogram,
            base_histogram: self.base_histogram,
            forward: self.forward,
            reverse: self.reverse,
            forward_bases: self.forward_bases,
            reverse_bases: self.reverse_bases,
            spanning: self.spanning,
            nonspanning: self.nonspanning,
            duplicates: self.duplicates,
            spliced: self.spliced,
        }
    }
}

/// A closed tally, handed to the error model fitter.
#[derive(Debug, Clone, PartialEq, Getters, CopyGetters)]
pub struct FrozenRunTally {
    #[getset(get = "pub")]
    run: HomopolymerRun,
    /// Number of included evidence records per observed length.
    #[getset(get = "pub")]
    histogram: Histogram,
    /// Number of covered run bases of included evidence per observed length.
    #[getset(get = "pub")]
    base_histogram: Histogram,
    forward: Histogram,
    reverse: Histogram,
    forward_bases: Histogram,
    reverse_bases: Histogram,
    #[getset(get_copy = "pub")]
    spanning: u64,
    #[getset(get_copy = "pub")]
    nonspanning: u64,
    #[getset(get_copy = "pub")]
    duplicates: u64,
    #[getset(get_copy = "pub")]
    spliced: u64,
}

impl FrozenRunTally {
    /// Number of included evidence records.
    pub fn total(&self) -> u64 {
        self.histogram.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    /// Number of included evidence records of the given strand per observed length.
    pub fn strand(&self, strand: ReqStrand) -> &Histogram {
        match strand {
            ReqStrand::Forward => &self.forward,
            ReqStrand::Reverse => &self.reverse,
        }
    }

    /// Histogram of the given strand used for fitting, depending on the counting unit.
    pub fn strand_counts(&self, strand: ReqStrand, unit: CountingUnit) -> &Histogram {
        match (strand, unit) {
            (ReqStrand::Forward, CountingUnit::Reads) => &self.forward,
            (ReqStrand::Reverse, CountingUnit::Reads) => &self.reverse,
            (ReqStrand::Forward, CountingUnit::Bases) => &self.forward_bases,
            (ReqStrand::Reverse, CountingUnit::Bases) => &self.reverse_bases,
        }
    }

    /// Histogram used for fitting, depending on the counting unit.
    pub fn counts(&self, unit: CountingUnit) -> &Histogram {
        match unit {
            CountingUnit::Reads => &self.histogram,
            CountingUnit::Bases => &self.base_histogram,
        }
    }

    /// Most frequently observed length. Ties are resolved in favor of the reference
    /// length, then the shortest length.
    pub fn modal_len(&self) -> Option<u32> {
        let ref_len = self.run.len();
        self.histogram
            .iter()
            .max_by(|(len_a, count_a), (len_b, count_b)| {
                count_a
                    .cmp(count_b)
                    .then_with(|| (**len_a == ref_len).cmp(&(**len_b == ref_len)))
                    .then_with(|| len_b.cmp(len_a))
            })
            .map(|(len, _)| *len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::AlignedRead;
    use crate::counting::evidence::extract;
    use crate::counting::policy::{FootprintPolicy, SpanningPolicy, StrandPolicy};

    fn run() -> HomopolymerRun {
        HomopolymerRun::new("chr1", 10, 4, b'A')
    }

    fn policy(spanning: SpanningPolicy, unit: CountingUnit) -> CountingPolicy {
        CountingPolicy {
            strand: StrandPolicy::Stratified,
            footprint: FootprintPolicy::Cigar,
            spanning,
            unit,
        }
    }

    fn read(name: &str, pos: u64, cigar: &str, seq: &str, strand: ReqStrand) -> AlignedRead {
        AlignedRead::from_cigar_str(name, pos, cigar, seq.as_bytes(), strand).unwrap()
    }

    fn reads() -> Vec<AlignedRead> {
        vec![
            read("a", 8, "8M", "CCAAAAGG", ReqStrand::Forward),
            read("b", 8, "4M1D3M", "CCAAAGG", ReqStrand::Reverse),
            read("c", 8, "6M", "CCAAAA", ReqStrand::Forward),
            read("a", 9, "6M", "CAAAAG", ReqStrand::Reverse),
        ]
    }

    fn tally(policy: &CountingPolicy) -> (FrozenRunTally, Vec<Inclusion>) {
        let mut tally = RunTally::new(run());
        let reads = reads();
        let inclusions = reads
            .iter()
            .map(|read| {
                let evidence = extract(read, &run(), policy).unwrap().unwrap();
                tally.fold(&evidence, policy)
            })
            .collect();
        (tally.freeze(), inclusions)
    }

    #[test]
    fn test_fold_reads_spanning_required() {
        let (tally, inclusions) = tally(&policy(SpanningPolicy::Required, CountingUnit::Reads));
        assert_eq!(
            inclusions,
            vec![
                Inclusion::Included,
                Inclusion::Included,
                Inclusion::Nonspanning,
                Inclusion::Duplicate
            ]
        );
        let included = inclusions
            .iter()
            .filter(|inclusion| **inclusion == Inclusion::Included)
            .count() as u64;
        assert_eq!(tally.total(), included);
        assert_eq!(tally.histogram().get(&4), Some(&1));
        assert_eq!(tally.histogram().get(&3), Some(&1));
        assert_eq!(tally.spanning(), 2);
        assert_eq!(tally.nonspanning(), 1);
        assert_eq!(tally.duplicates(), 1);
        assert_eq!(tally.strand(ReqStrand::Forward).get(&4), Some(&1));
        assert_eq!(tally.strand(ReqStrand::Reverse).get(&3), Some(&1));
    }

    #[test]
    fn test_fold_bases_spanning_not_required() {
        let (tally, inclusions) =
            tally(&policy(SpanningPolicy::NotRequired, CountingUnit::Bases));
        assert!(inclusions
            .iter()
            .all(|inclusion| *inclusion == Inclusion::Included));
        assert_eq!(tally.total(), 4);
        assert_eq!(tally.histogram().get(&4), Some(&3));
        // every read covers all four run bases
        assert_eq!(tally.base_histogram().get(&4), Some(&12));
        assert_eq!(tally.base_histogram().get(&3), Some(&4));
        assert_eq!(tally.counts(CountingUnit::Bases), tally.base_histogram());
        assert_eq!(
            tally
                .strand_counts(ReqStrand::Reverse, CountingUnit::Bases)
                .get(&4),
            Some(&4)
        );
        assert_eq!(tally.nonspanning(), 1);
        assert_eq!(tally.duplicates(), 0);
    }

    #[test]
    fn test_excluded_mate_does_not_shadow_spanning_mate() {
        let p = policy(SpanningPolicy::Required, CountingUnit::Reads);
        let mut t = RunTally::new(run());
        // mate 1 starts within the run, mate 2 spans it
        let mate1 = read("frag", 11, "5M", "AAAGG", ReqStrand::Forward);
        let mate2 = read("frag", 8, "8M", "CCAAAAGG", ReqStrand::Reverse);
        let inclusions = [&mate1, &mate2, &mate2]
            .iter()
            .map(|r| t.fold(&extract(r, &run(), &p).unwrap().unwrap(), &p))
            .collect::<Vec<_>>();
        assert_eq!(
            inclusions,
            vec![
                Inclusion::Nonspanning,
                Inclusion::Included,
                Inclusion::Duplicate
            ]
        );
        let t = t.freeze();
        assert_eq!(t.total(), 1);
        assert_eq!(t.histogram().get(&4), Some(&1));
        assert_eq!((t.nonspanning(), t.duplicates()), (1, 1));
    }

    #[test]
    fn test_spliced_evidence_is_excluded() {
        let p = policy(SpanningPolicy::NotRequired, CountingUnit::Bases);
        let mut t = RunTally::new(run());
        let r = read("s", 8, "2M4N2M", "CCGG", ReqStrand::Forward);
        let evidence = extract(&r, &run(), &p).unwrap().unwrap();
        assert_eq!(t.fold(&evidence, &p), Inclusion::Spliced);
        let t = t.freeze();
        assert!(t.is_empty());
        assert_eq!(t.spliced(), 1);
    }

    #[test]
    fn test_empty_tally() {
        let tally = RunTally::new(HomopolymerRun::new("chr1", 0, 2, b'C')).freeze();
        assert!(tally.is_empty());
        assert_eq!(tally.total(), 0);
        assert_eq!(tally.modal_len(), None);
    }

    #[test]
    fn test_modal_len() {
        let (tally, _) = tally(&policy(SpanningPolicy::NotRequired, CountingUnit::Bases));
        assert_eq!(tally.modal_len(), Some(4));

        // tie between 3 and 5, none is the reference length
        let mut t = RunTally::new(run());
        let p = policy(SpanningPolicy::Required, CountingUnit::Bases);
        for (cigar, seq) in &[("4M1D3M", "CCAAAGG"), ("6M1I3M", "CCAAAAAGGG")] {
            let r = read("r", 8, cigar, seq, ReqStrand::Forward);
            t.fold(&extract(&r, &run(), &p).unwrap().unwrap(), &p);
        }
        assert_eq!(t.freeze().modal_len(), Some(3));
    }
}
