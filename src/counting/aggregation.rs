// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Aggregation of read evidence into per-run tallies.
//!
//! Reads of a region are swept in coordinate order. A run becomes active once a read
//! footprint reaches it and is frozen once reads start beyond its end, such that only
//! a small window of tallies is mutable at any time.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::ops::AddAssign;

use anyhow::Result;
use counter::Counter;

use crate::alignment::{FilterReason, Reads};
use crate::counting::evidence::extract;
use crate::counting::policy::CountingPolicy;
use crate::counting::runs::HomopolymerRun;
use crate::counting::tally::{FrozenRunTally, Inclusion, RunTally};
use crate::errors::Error;
use crate::utils::{CancellationToken, Region};

/// Number of bases a read has to start beyond the end of a run before the run is closed.
pub const CLOSE_MARGIN: u64 = 1;

/// Diagnostic counts of an aggregation. Every read and every piece of evidence ends up
/// in exactly one of the categories.
#[derive(Debug, Clone, Default)]
pub struct AggregationStats {
    /// All records delivered by the alignment sources.
    pub reads: u64,
    pub filtered: Counter<FilterReason>,
    pub malformed: u64,
    /// (read, run) pairs with overlap.
    pub evidence: u64,
    pub included: u64,
    pub nonspanning: u64,
    pub duplicates: u64,
    /// Evidence of alignments skipping reference bases at the run.
    pub spliced: u64,
}

impl AggregationStats {
    pub fn filtered_total(&self) -> u64 {
        self.filtered.values().map(|count| *count as u64).sum()
    }

    /// Filter counts keyed by reason name, in a stable order.
    pub fn filtered_by_reason(&self) -> BTreeMap<&'static str, u64> {
        self.filtered
            .iter()
            .map(|(reason, count)| (reason.into(), *count as u64))
            .collect()
    }

    fn record(&mut self, inclusion: Inclusion) {
        match inclusion {
            Inclusion::Included => self.included += 1,
            Inclusion::Nonspanning => self.nonspanning += 1,
            Inclusion::Duplicate => self.duplicates += 1,
            Inclusion::Spliced => self.spliced += 1,
        }
    }
}

impl AddAssign for AggregationStats {
    fn add_assign(&mut self, rhs: Self) {
        self.reads += rhs.reads;
        self.filtered += rhs.filtered;
        self.malformed += rhs.malformed;
        self.evidence += rhs.evidence;
        self.included += rhs.included;
        self.nonspanning += rhs.nonspanning;
        self.duplicates += rhs.duplicates;
        self.spliced += rhs.spliced;
    }
}

/// Frozen tallies of all runs of a single region.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub")]
pub struct RegionTallies {
    region: Region,
    tallies: Vec<FrozenRunTally>,
    stats: AggregationStats,
}

/// Sweep the given coordinate sorted reads over the runs of a region.
///
/// Every run ends up with a frozen tally, runs without any covering read with an
/// empty one. Filtered and malformed reads are skipped and counted.
pub fn aggregate_region(
    region: &Region,
    runs: Vec<HomopolymerRun>,
    reads: Reads<'_>,
    policy: &CountingPolicy,
    cancellation: &CancellationToken,
) -> Result<RegionTallies> {
    let mut stats = AggregationStats::default();
    let mut pending = runs.into_iter().peekable();
    let mut active: VecDeque<RunTally> = VecDeque::new();
    let mut frozen = Vec::new();
    let mut last_pos = None;

    for read in reads {
        cancellation.check()?;
        let read = read?;
        stats.reads += 1;

        if let Some(last_pos) = last_pos {
            if read.pos() < last_pos {
                return Err(Error::UnsortedAlignments {
                    previous: format!("{}:{}", region.chrom, last_pos + 1),
                    current: format!("{}:{}", region.chrom, read.pos() + 1),
                }
                .into());
            }
        }
        last_pos = Some(read.pos());

        if let Some(reason) = read.filter_reason() {
            stats.filtered[&reason] += 1;
            continue;
        }
        if let Err(e) = read.validate() {
            debug!("Skipping read: {}", e);
            stats.malformed += 1;
            continue;
        }

        let (_, footprint_end) = read.footprint(policy.footprint);
        while pending
            .peek()
            .map_or(false, |run| run.start() < footprint_end)
        {
            if let Some(run) = pending.next() {
                active.push_back(RunTally::new(run));
            }
        }
        while active
            .front()
            .map_or(false, |tally| tally.run().end() + CLOSE_MARGIN <= read.pos())
        {
            if let Some(tally) = active.pop_front() {
                frozen.push(tally.freeze());
            }
        }

        for tally in active.iter_mut() {
            if tally.run().start() >= footprint_end {
                break;
            }
            match extract(&read, tally.run(), policy) {
                Ok(Some(evidence)) => {
                    stats.evidence += 1;
                    let inclusion = tally.fold(&evidence, policy);
                    stats.record(inclusion);
                }
                Ok(None) => (),
                Err(e) => {
                    debug!("Skipping read: {}", e);
                    stats.malformed += 1;
                    break;
                }
            }
        }
    }

    frozen.extend(active.into_iter().map(RunTally::freeze));
    frozen.extend(pending.map(|run| RunTally::new(run).freeze()));

    if stats.malformed > 0 {
        warn!(
            "Skipped {} malformed alignments in region {}.",
            stats.malformed, region
        );
    }

    Ok(RegionTallies {
        region: region.clone(),
        tallies: frozen,
        stats,
    })
}

/// The complete set of frozen tallies of a job.
///
/// This can only be constructed by joining the results of all regions, and it is
/// the only input the error model fitter accepts.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub")]
pub struct TallyPool {
    tallies: Vec<FrozenRunTally>,
    stats: AggregationStats,
    regions: Vec<Region>,
}

impl TallyPool {
    /// Join the per-region results. Runs reported by more than one (overlapping)
    /// region are kept only once.
    pub fn join(results: impl IntoIterator<Item = RegionTallies>) -> Self {
        let mut seen = HashSet::new();
        let mut tallies = Vec::new();
        let mut stats = AggregationStats::default();
        let mut regions = Vec::new();
        let mut repeated = 0;

        for result in results {
            for tally in result.tallies {
                let key = (tally.run().chrom().clone(), tally.run().start());
                if seen.insert(key) {
                    tallies.push(tally);
                } else {
                    repeated += 1;
                }
            }
            stats += result.stats;
            regions.push(result.region);
        }
        if repeated > 0 {
            warn!(
                "{} homopolymers were contained in multiple overlapping regions and are used only once.",
                repeated
            );
        }

        TallyPool {
            tallies,
            stats,
            regions,
        }
    }

    /// Number of runs.
    pub fn len(&self) -> usize {
        self.tallies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tallies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::{AlignedRead, AlignmentSource, MemorySource};
    use crate::counting::policy::{CountingUnit, SpanningPolicy, StrandPolicy};
    use crate::counting::runs::locate_runs;
    use bio_types::strand::ReqStrand;

    // two runs, AAAA at [4, 8) and GGG at [12, 15)
    const REF: &[u8] = b"CTCTAAAACTCTGGGCTCTC";

    fn region() -> Region {
        Region::new("chr1", 0, REF.len() as u64)
    }

    fn runs() -> Vec<HomopolymerRun> {
        locate_runs(REF, 0, &region()).collect()
    }

    fn policy() -> CountingPolicy {
        CountingPolicy {
            strand: StrandPolicy::Stratified,
            footprint: crate::counting::policy::FootprintPolicy::Cigar,
            spanning: SpanningPolicy::Required,
            unit: CountingUnit::Reads,
        }
    }

    fn read(name: &str, pos: u64, cigar: &str, seq: &[u8]) -> AlignedRead {
        AlignedRead::from_cigar_str(name, pos, cigar, seq, ReqStrand::Forward).unwrap()
    }

    fn aggregate(reads: Vec<AlignedRead>, policy: &CountingPolicy) -> Result<RegionTallies> {
        let mut source = MemorySource::new("memory").with_reads("chr1", reads);
        let reads = source.fetch(&region())?;
        aggregate_region(&region(), runs(), reads, policy, &CancellationToken::new())
    }

    #[test]
    fn test_aggregate_region() {
        let reads = vec![
            read("r1", 2, "8M", &REF[2..10]),
            read("r2", 3, "3M1D4M", b"CTAAACT"),
            // covers both runs
            read("r3", 3, "14M", &REF[3..17]),
            // filtered
            read("r4", 3, "8M", &REF[3..11]).with_mapq(0),
            // malformed
            read("r5", 4, "8M", &REF[4..10]),
            // nonspanning, starts within GGG
            read("r6", 13, "5M", &REF[13..18]),
        ];
        let result = aggregate(reads, &policy()).unwrap();
        let tallies = result.tallies();
        assert_eq!(tallies.len(), 2);

        let aaaa = &tallies[0];
        assert_eq!(aaaa.run().start(), 4);
        assert_eq!(aaaa.histogram().get(&4), Some(&2));
        assert_eq!(aaaa.histogram().get(&3), Some(&1));

        let ggg = &tallies[1];
        assert_eq!(ggg.run().start(), 12);
        assert_eq!(ggg.histogram().get(&3), Some(&1));
        assert_eq!(ggg.nonspanning(), 1);

        let stats = result.stats();
        assert_eq!(stats.reads, 6);
        assert_eq!(stats.filtered_total(), 1);
        assert_eq!(stats.filtered_by_reason().get("mapq-zero"), Some(&1));
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.evidence, 5);
        assert_eq!(stats.included, 4);
        assert_eq!(stats.nonspanning, 1);
        assert_eq!(
            stats.included,
            tallies.iter().map(|tally| tally.total()).sum::<u64>()
        );
    }

    #[test]
    fn test_uncovered_runs_yield_empty_tallies() {
        let result = aggregate(vec![read("r1", 2, "8M", &REF[2..10])], &policy()).unwrap();
        assert_eq!(result.tallies().len(), 2);
        assert!(result.tallies()[1].is_empty());

        let result = aggregate(vec![], &policy()).unwrap();
        assert_eq!(result.tallies().len(), 2);
        assert!(result.tallies().iter().all(|tally| tally.is_empty()));
    }

    #[test]
    fn test_unsorted_reads() {
        let reads: Reads = Box::new(
            vec![
                Ok::<_, anyhow::Error>(read("r1", 5, "4M", &REF[5..9])),
                Ok(read("r2", 2, "4M", &REF[2..6])),
            ]
            .into_iter(),
        );
        let err = aggregate_region(
            &region(),
            runs(),
            reads,
            &policy(),
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::UnsortedAlignments { .. })
        ));
    }

    #[test]
    fn test_cancellation() {
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let mut source = MemorySource::new("memory")
            .with_reads("chr1", vec![read("r1", 2, "8M", &REF[2..10])]);
        let err = aggregate_region(
            &region(),
            runs(),
            source.fetch(&region()).unwrap(),
            &policy(),
            &cancellation,
        )
        .unwrap_err();
        assert_eq!(err.downcast_ref::<Error>(), Some(&Error::Cancelled));
    }

    #[test]
    fn test_join() {
        let first = aggregate(vec![read("r1", 2, "8M", &REF[2..10])], &policy()).unwrap();
        let second = aggregate(vec![read("r2", 2, "8M", &REF[2..10])], &policy()).unwrap();
        let pool = TallyPool::join(vec![first, second]);
        // the same region twice, runs are kept once
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.regions().len(), 2);
        assert_eq!(pool.stats().reads, 2);
        assert_eq!(pool.stats().included, 2);
    }
}
