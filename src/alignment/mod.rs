// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Aligned reads and the sources they are fetched from.

pub mod bam;

use std::collections::HashMap;
use std::convert::TryFrom;

use anyhow::{anyhow, Result};
use bio_types::strand::ReqStrand;
use rust_htslib::bam::record::{Cigar, CigarString};
use rust_htslib::htslib;

use crate::counting::policy::FootprintPolicy;
use crate::errors::{malformed_alignment, Error};
use crate::utils::Region;

pub use self::bam::BamSource;

/// Reasons for not using an alignment record at all.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, IntoStaticStr, Display, EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
pub enum FilterReason {
    Unmapped,
    Secondary,
    Supplementary,
    Duplicate,
    QualityCheckFailed,
    MapqZero,
}

/// A read aligned against the reference, reduced to what is needed for
/// measuring homopolymer lengths.
#[derive(Debug, Clone, PartialEq, Getters, CopyGetters)]
pub struct AlignedRead {
    #[getset(get = "pub")]
    qname: Vec<u8>,
    /// 0-based leftmost reference position of the first aligned base.
    #[getset(get_copy = "pub")]
    pos: u64,
    #[getset(get = "pub")]
    cigar: CigarString,
    #[getset(get = "pub")]
    seq: Vec<u8>,
    #[getset(get_copy = "pub")]
    mapq: u8,
    #[getset(get_copy = "pub")]
    flags: u16,
}

impl AlignedRead {
    pub fn new(
        qname: &[u8],
        pos: u64,
        cigar: CigarString,
        seq: &[u8],
        strand: ReqStrand,
    ) -> Self {
        let flags = match strand {
            ReqStrand::Forward => 0,
            ReqStrand::Reverse => htslib::BAM_FREVERSE as u16,
        };
        AlignedRead {
            qname: qname.to_owned(),
            pos,
            cigar,
            seq: seq.to_ascii_uppercase(),
            mapq: 60,
            flags,
        }
    }

    /// Convenience constructor taking a CIGAR string like `5M1I4M`.
    pub fn from_cigar_str(
        qname: &str,
        pos: u64,
        cigar: &str,
        seq: &[u8],
        strand: ReqStrand,
    ) -> Result<Self> {
        let cigar = CigarString::try_from(cigar)
            .map_err(|e| anyhow!("invalid CIGAR string {}: {}", cigar, e))?;
        Ok(Self::new(qname.as_bytes(), pos, cigar, seq, strand))
    }

    pub fn with_mapq(mut self, mapq: u8) -> Self {
        self.mapq = mapq;
        self
    }

    /// Replace the SAM flags. The strand is taken from the `BAM_FREVERSE` bit.
    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    pub fn strand(&self) -> ReqStrand {
        if self.is_reverse() {
            ReqStrand::Reverse
        } else {
            ReqStrand::Forward
        }
    }

    fn has_flag(&self, flag: u32) -> bool {
        u32::from(self.flags) & flag != 0
    }

    pub fn is_reverse(&self) -> bool {
        self.has_flag(htslib::BAM_FREVERSE)
    }

    /// Reason why this record should not be used, if any.
    pub fn filter_reason(&self) -> Option<FilterReason> {
        if self.has_flag(htslib::BAM_FUNMAP) {
            Some(FilterReason::Unmapped)
        } else if self.has_flag(htslib::BAM_FSECONDARY) {
            Some(FilterReason::Secondary)
        } else if self.has_flag(htslib::BAM_FSUPPLEMENTARY) {
            Some(FilterReason::Supplementary)
        } else if self.has_flag(htslib::BAM_FDUP) {
            Some(FilterReason::Duplicate)
        } else if self.has_flag(htslib::BAM_FQCFAIL) {
            Some(FilterReason::QualityCheckFailed)
        } else if self.mapq == 0 {
            Some(FilterReason::MapqZero)
        } else {
            None
        }
    }

    /// Number of reference bases consumed by the alignment.
    pub fn reference_len(&self) -> u64 {
        self.cigar
            .iter()
            .map(|c| match c {
                Cigar::Match(l) | Cigar::Equal(l) | Cigar::Diff(l) => *l as u64,
                Cigar::Del(l) | Cigar::RefSkip(l) => *l as u64,
                _ => 0,
            })
            .sum()
    }

    /// Number of read bases described by the alignment.
    pub fn query_len(&self) -> u64 {
        self.cigar
            .iter()
            .map(|c| match c {
                Cigar::Match(l) | Cigar::Equal(l) | Cigar::Diff(l) => *l as u64,
                Cigar::Ins(l) | Cigar::SoftClip(l) => *l as u64,
                _ => 0,
            })
            .sum()
    }

    /// Exclusive end of the reference interval covered by the alignment.
    pub fn reference_end(&self) -> u64 {
        self.pos + self.reference_len()
    }

    /// Reference interval considered to be covered by this read.
    ///
    /// With `FootprintPolicy::Cigar`, the interval includes skipped (N) reference
    /// bases, such that runs within a skip are still visited and reported as spliced
    /// evidence. With `FootprintPolicy::ReadLength`, the read is naively projected onto
    /// the reference by its length, ignoring indels and clips.
    pub fn footprint(&self, policy: FootprintPolicy) -> (u64, u64) {
        match policy {
            FootprintPolicy::Cigar => (self.pos, self.reference_end()),
            FootprintPolicy::ReadLength => (self.pos, self.pos + self.seq.len() as u64),
        }
    }

    /// Check that the alignment operations can be reconciled with the read sequence.
    pub fn validate(&self) -> Result<(), Error> {
        if self.cigar.is_empty() {
            return Err(malformed_alignment(&self.qname, "empty CIGAR string"));
        }
        if self.seq.is_empty() {
            return Err(malformed_alignment(&self.qname, "read sequence missing"));
        }
        let query_len = self.query_len();
        if query_len != self.seq.len() as u64 {
            return Err(malformed_alignment(
                &self.qname,
                &format!(
                    "CIGAR operations describe {} bases, but read has length {}",
                    query_len,
                    self.seq.len()
                ),
            ));
        }
        Ok(())
    }
}

/// Reads, ordered by ascending start position.
pub type Reads<'a> = Box<dyn Iterator<Item = Result<AlignedRead>> + 'a>;

/// A collaborator providing aligned reads, e.g. an indexed BAM file.
pub trait AlignmentSource {
    /// Name of the source, used for diagnostics.
    fn name(&self) -> &str;

    /// Fetch all reads overlapping the given region, in ascending order of their start.
    fn fetch<'a>(&'a mut self, region: &Region) -> Result<Reads<'a>>;
}

/// Merge reads of multiple sources into a single stream that is ordered by start.
pub fn merge_sorted<'a>(reads: Vec<Reads<'a>>) -> Reads<'a> {
    // Errors are sorted first such that they surface as early as possible.
    let key = |item: &Result<AlignedRead>| item.as_ref().map_or(0, |read| read.pos);
    Box::new(itertools::kmerge_by(reads, move |a: &Result<AlignedRead>, b: &Result<AlignedRead>| {
        key(a) < key(b)
    }))
}

/// Alignments held in memory, grouped by contig.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    name: String,
    reads: HashMap<String, Vec<AlignedRead>>,
}

impl MemorySource {
    pub fn new(name: &str) -> Self {
        MemorySource {
            name: name.to_owned(),
            reads: HashMap::new(),
        }
    }

    /// Add reads aligned to the given contig.
    pub fn with_reads(mut self, chrom: &str, reads: Vec<AlignedRead>) -> Self {
        let contig_reads = self.reads.entry(chrom.to_owned()).or_insert_with(Vec::new);
        contig_reads.extend(reads);
        contig_reads.sort_by_key(|read| read.pos());
        self
    }
}

impl AlignmentSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch<'a>(&'a mut self, region: &Region) -> Result<Reads<'a>> {
        let (start, end) = (region.start, region.end);
        let reads = self
            .reads
            .get(&region.chrom)
            .map(|reads| reads.as_slice())
            .unwrap_or(&[]);
        Ok(Box::new(
            reads
                .iter()
                .filter(move |read| {
                    let read_end = read
                        .reference_end()
                        .max(read.pos() + read.seq().len() as u64);
                    read.pos() < end && read_end > start
                })
                .cloned()
                .map(Ok),
        ))
    }
}
