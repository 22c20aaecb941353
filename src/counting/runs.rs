// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Location of homopolymer runs in the reference.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::errors::Error;
use crate::reference::ReferenceSource;
use crate::utils::homopolymers::{extend_homopolymer_stretch, is_nucleotide, MIN_HOMOPOLYMER_LEN};
use crate::utils::Region;

/// A maximal stretch of a single repeated reference base.
#[derive(Debug, Clone, PartialEq, Eq, Hash, CopyGetters, Getters)]
pub struct HomopolymerRun {
    #[getset(get = "pub")]
    chrom: Arc<str>,
    /// 0-based start.
    #[getset(get_copy = "pub")]
    start: u64,
    #[getset(get_copy = "pub")]
    len: u32,
    /// Upper case reference base.
    #[getset(get_copy = "pub")]
    base: u8,
}

impl HomopolymerRun {
    pub fn new(chrom: &str, start: u64, len: u32, base: u8) -> Self {
        HomopolymerRun {
            chrom: Arc::from(chrom),
            start,
            len,
            base: base.to_ascii_uppercase(),
        }
    }

    /// Exclusive end.
    pub fn end(&self) -> u64 {
        self.start + self.len as u64
    }
}

impl fmt::Display for HomopolymerRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}({}{})",
            self.chrom,
            self.start + 1,
            self.end(),
            self.len,
            self.base as char
        )
    }
}

/// Lazy iterator over the homopolymer runs within a region, in ascending order.
///
/// Runs that are not fully contained in the region are skipped, even if they
/// overlap it, since their length is unknown. For this to work, the given
/// sequence has to include one flanking base on each side of the region (unless the
/// region touches the end of its contig).
pub struct RunLocator<'a> {
    chrom: Arc<str>,
    seq: &'a [u8],
    offset: u64,
    region_start: u64,
    region_end: u64,
    i: usize,
}

impl<'a> Iterator for RunLocator<'a> {
    type Item = HomopolymerRun;

    fn next(&mut self) -> Option<HomopolymerRun> {
        while self.i < self.seq.len() {
            let base = self.seq[self.i].to_ascii_uppercase();
            let len = 1 + extend_homopolymer_stretch(base, &mut self.seq[self.i + 1..].iter());
            let start = self.offset + self.i as u64;
            self.i += len;

            if start >= self.region_end {
                self.i = self.seq.len();
                return None;
            }
            if len >= MIN_HOMOPOLYMER_LEN
                && is_nucleotide(base)
                && start >= self.region_start
                && start + len as u64 <= self.region_end
            {
                return Some(HomopolymerRun {
                    chrom: Arc::clone(&self.chrom),
                    start,
                    len: len as u32,
                    base,
                });
            }
        }
        None
    }
}

/// Locate homopolymer runs in `seq`, which starts at reference position `offset`.
pub fn locate_runs<'a>(seq: &'a [u8], offset: u64, region: &Region) -> RunLocator<'a> {
    RunLocator {
        chrom: Arc::from(region.chrom.as_str()),
        seq,
        offset,
        region_start: region.start,
        region_end: region.end,
        i: 0,
    }
}

/// Fetch the reference sequence of the given region together with one flanking base
/// on each side and collect all homopolymer runs within the region.
pub fn fetch_runs(reference: &dyn ReferenceSource, region: &Region) -> Result<Vec<HomopolymerRun>> {
    let contig_len = reference
        .contig_len(&region.chrom)
        .ok_or_else(|| Error::UnknownContig {
            contig: region.chrom.clone(),
        })?;
    let region = region.clip(contig_len);
    let flanked = region.expand(1, contig_len);
    let seq = reference.fetch(&flanked)?;

    Ok(locate_runs(&seq, flanked.start, &region).collect())
}
