// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Extraction of the homopolymer length observed by a single read.

use bio_types::strand::ReqStrand;
use rust_htslib::bam::record::Cigar;

use crate::alignment::AlignedRead;
use crate::counting::policy::{CountingPolicy, FootprintPolicy};
use crate::counting::runs::HomopolymerRun;
use crate::errors::Error;

/// What a single read tells about a single homopolymer run.
#[derive(Debug, Clone, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct ReadEvidence<'a> {
    qname: &'a [u8],
    /// Homopolymer length as seen by the read.
    observed_len: u32,
    /// Whether the read aligns beyond both ends of the run.
    spanning: bool,
    /// Strand of the alignment, normalized to forward if strand is ignored.
    strand: ReqStrand,
    /// Number of run reference bases within the footprint of the read, i.e. the
    /// contribution of the read when counting bases instead of reads.
    covered_bases: u32,
    /// Whether the alignment skips (N) reference bases of the run or its flanks.
    /// The read carries no length information then.
    spliced: bool,
}

/// Per-position state while walking the alignment across the run.
#[derive(Default)]
struct Walk {
    covers_left_flank: bool,
    covers_right_flank: bool,
    aligned_in_run: u32,
    inserted_run_bases: u32,
    skips_run: bool,
}

/// Determine whether and how the given read covers the given run.
///
/// Returns `Ok(None)` if the reference footprint of the read does not overlap the
/// run at all. Nonspanning reads yield evidence as well, tagged accordingly; it
/// is up to the aggregation to decide whether to use them.
///
/// The observed length is the number of read bases aligned to the run plus the
/// inserted bases of the run's base that are located within or directly adjacent
/// to the run. Deleted run bases therefore shorten the observed length, while
/// substitutions within the run do not change it.
pub fn extract<'a>(
    read: &'a AlignedRead,
    run: &HomopolymerRun,
    policy: &CountingPolicy,
) -> Result<Option<ReadEvidence<'a>>, Error> {
    read.validate()?;

    let (footprint_start, footprint_end) = read.footprint(policy.footprint);
    if footprint_end <= run.start() || footprint_start >= run.end() {
        return Ok(None);
    }

    let walk = walk_alignment(read, run);

    let spanning = !walk.skips_run
        && match policy.footprint {
            FootprintPolicy::Cigar => walk.covers_left_flank && walk.covers_right_flank,
            FootprintPolicy::ReadLength => {
                footprint_start < run.start() && footprint_end > run.end()
            }
        };

    let strand = if policy.ignores_strand() {
        ReqStrand::Forward
    } else {
        read.strand()
    };

    Ok(Some(ReadEvidence {
        qname: read.qname(),
        observed_len: walk.aligned_in_run + walk.inserted_run_bases,
        spanning,
        strand,
        covered_bases: (footprint_end.min(run.end()) - footprint_start.max(run.start())) as u32,
        spliced: walk.skips_run,
    }))
}

fn walk_alignment(read: &AlignedRead, run: &HomopolymerRun) -> Walk {
    let (run_start, run_end) = (run.start(), run.end());
    let seq = read.seq();
    let mut walk = Walk::default();
    let mut rpos = read.pos();
    let mut qpos = 0usize;

    for c in read.cigar().iter() {
        if rpos > run_end {
            break;
        }
        match *c {
            Cigar::Match(l) | Cigar::Equal(l) | Cigar::Diff(l) => {
                let (start, end) = (rpos, rpos + l as u64);
                if run_start > 0 && start < run_start && end >= run_start {
                    walk.covers_left_flank = true;
                }
                if start <= run_end && end > run_end {
                    walk.covers_right_flank = true;
                }
                let overlap_start = start.max(run_start);
                let overlap_end = end.min(run_end);
                if overlap_end > overlap_start {
                    walk.aligned_in_run += (overlap_end - overlap_start) as u32;
                }
                rpos = end;
                qpos += l as usize;
            }
            Cigar::Ins(l) => {
                // An insertion is located between rpos - 1 and rpos.
                if rpos >= run_start && rpos <= run_end {
                    walk.inserted_run_bases += seq[qpos..qpos + l as usize]
                        .iter()
                        .filter(|b| b.to_ascii_uppercase() == run.base())
                        .count() as u32;
                }
                qpos += l as usize;
            }
            Cigar::Del(l) => {
                rpos += l as u64;
            }
            Cigar::RefSkip(l) => {
                let end = rpos + l as u64;
                if rpos <= run_end && end >= run_start {
                    walk.skips_run = true;
                }
                rpos = end;
            }
            Cigar::SoftClip(l) => {
                qpos += l as usize;
            }
            Cigar::HardClip(_) | Cigar::Pad(_) => continue,
        }
    }

    walk
}
