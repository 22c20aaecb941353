// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Counting policies. Every policy is an enum named by its effect, and
//! `CountingPolicy::from_flags` is the only place where command line flags are
//! interpreted.

/// Whether evidence is stratified by the strand of the alignment.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum StrandPolicy {
    /// Keep forward and reverse strand evidence apart. Reverse strand evidence
    /// is attributed to the complementary (sequenced) base.
    Stratified,
    /// Normalize all evidence to the forward strand.
    Ignore,
}

/// How the reference interval covered by a read is determined.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum FootprintPolicy {
    /// Use the alignment operations to determine the overlapped reference bases.
    Cigar,
    /// Project the read naively onto the reference by its length.
    ReadLength,
}

/// Whether a read has to align beyond both ends of a homopolymer to be counted.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum SpanningPolicy {
    Required,
    NotRequired,
}

/// Granularity of counting.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum CountingUnit {
    /// Each read counts once per homopolymer, even if its fragment is observed
    /// multiple times (e.g. overlapping mates).
    Reads,
    /// Each covered homopolymer base counts.
    Bases,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CountingPolicy {
    pub strand: StrandPolicy,
    pub footprint: FootprintPolicy,
    pub spanning: SpanningPolicy,
    pub unit: CountingUnit,
}

impl Default for CountingPolicy {
    fn default() -> Self {
        CountingPolicy {
            strand: StrandPolicy::Ignore,
            footprint: FootprintPolicy::Cigar,
            spanning: SpanningPolicy::Required,
            unit: CountingUnit::Bases,
        }
    }
}

impl CountingPolicy {
    /// Build the policy from command line flags, each named by the behavior it enables.
    pub fn from_flags(
        use_strand: bool,
        naive_footprint: bool,
        not_require_spanning: bool,
        count_reads: bool,
    ) -> Self {
        CountingPolicy {
            strand: if use_strand {
                StrandPolicy::Stratified
            } else {
                StrandPolicy::Ignore
            },
            footprint: if naive_footprint {
                FootprintPolicy::ReadLength
            } else {
                FootprintPolicy::Cigar
            },
            spanning: if not_require_spanning {
                SpanningPolicy::NotRequired
            } else {
                SpanningPolicy::Required
            },
            unit: if count_reads {
                CountingUnit::Reads
            } else {
                CountingUnit::Bases
            },
        }
    }

    pub fn requires_spanning(&self) -> bool {
        self.spanning == SpanningPolicy::Required
    }

    pub fn ignores_strand(&self) -> bool {
        self.strand == StrandPolicy::Ignore
    }
}
