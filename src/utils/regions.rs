// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Genomic regions to sample homopolymers from.
//!
//! Regions can be given on the command line in samtools syntax
//! (`CHROM` or `CHROM:START-END`, 1-based and inclusive) or as a BED file
//! (0-based, half-open). Internally, all regions are 0-based and half-open.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use bio::io::bed;

use crate::errors::Error;

/// End coordinate of a region that covers its contig until the end.
const CONTIG_END: u64 = u64::MAX;

/// A 0-based, half-open genomic interval.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Region {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
}

impl Region {
    pub fn new(chrom: &str, start: u64, end: u64) -> Self {
        Region {
            chrom: chrom.to_owned(),
            start,
            end,
        }
    }

    /// Region spanning the entire given contig.
    pub fn contig(chrom: &str) -> Self {
        Region::new(chrom, 0, CONTIG_END)
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Restrict region to a contig of the given length.
    pub fn clip(&self, contig_len: u64) -> Self {
        Region {
            chrom: self.chrom.clone(),
            start: self.start.min(contig_len),
            end: self.end.min(contig_len),
        }
    }

    /// Extend the region by the given number of bases on both sides, bounded by the contig.
    pub fn expand(&self, flank: u64, contig_len: u64) -> Self {
        Region {
            chrom: self.chrom.clone(),
            start: self.start.saturating_sub(flank),
            end: self.end.saturating_add(flank).min(contig_len),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == 0 && self.end == CONTIG_END {
            write!(f, "{}", self.chrom)
        } else {
            // samtools style, 1-based inclusive
            write!(f, "{}:{}-{}", self.chrom, self.start + 1, self.end)
        }
    }
}

impl FromStr for Region {
    type Err = Error;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidRegion {
            spec: spec.to_owned(),
        };

        match spec.rsplit_once(':') {
            None if !spec.is_empty() => Ok(Region::contig(spec)),
            None => Err(invalid()),
            Some((chrom, range)) => {
                let (start, end) = range.split_once('-').ok_or_else(invalid)?;
                let parse = |value: &str| value.replace(',', "").parse::<u64>();
                let start = parse(start).map_err(|_| invalid())?;
                let end = parse(end).map_err(|_| invalid())?;
                if chrom.is_empty() || start == 0 || start > end {
                    return Err(invalid());
                }
                Ok(Region::new(chrom, start - 1, end))
            }
        }
    }
}

/// Sort the given regions and merge overlapping ones, such that every reference
/// position is scanned at most once.
pub fn merge_regions(mut regions: Vec<Region>) -> Vec<Region> {
    regions.sort();
    let mut merged: Vec<Region> = Vec::with_capacity(regions.len());
    for region in regions {
        match merged.last_mut() {
            Some(last) if last.chrom == region.chrom && region.start <= last.end => {
                last.end = last.end.max(region.end);
            }
            _ => merged.push(region),
        }
    }
    merged
}

/// Read regions from a BED file.
pub fn regions_from_bed(path: impl AsRef<Path>) -> Result<Vec<Region>> {
    let mut reader = bed::Reader::from_file(path.as_ref()).with_context(|| {
        format!("Failed to open BED file {}", path.as_ref().display())
    })?;

    reader
        .records()
        .map(|record| {
            let record = record.context("Failed to read BED record")?;
            if record.start() >= record.end() {
                return Err(Error::InvalidRegion {
                    spec: format!("{}:{}-{}", record.chrom(), record.start(), record.end()),
                }
                .into());
            }
            Ok(Region::new(record.chrom(), record.start(), record.end()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_region() {
        let region: Region = "chr1:1001-1010".parse().unwrap();
        assert_eq!(region, Region::new("chr1", 1000, 1010));
        assert_eq!(region.len(), 10);
        assert_eq!(region.to_string(), "chr1:1001-1010");

        let region: Region = "chr2:1,000-2,000".parse().unwrap();
        assert_eq!(region, Region::new("chr2", 999, 2000));
    }

    #[test]
    fn test_parse_contig() {
        let region: Region = "chrM".parse().unwrap();
        assert_eq!(region, Region::contig("chrM"));
        assert_eq!(region.to_string(), "chrM");
        assert_eq!(region.clip(16569), Region::new("chrM", 0, 16569));
    }

    #[test]
    fn test_parse_region_with_colon_in_contig() {
        let region: Region = "HLA-A*01:01:01:01:1-100".parse().unwrap();
        assert_eq!(region.chrom, "HLA-A*01:01:01:01");
        assert_eq!(region.start, 0);
    }

    #[test]
    fn test_parse_invalid_region() {
        assert!("".parse::<Region>().is_err());
        assert!("chr1:0-10".parse::<Region>().is_err());
        assert!("chr1:20-10".parse::<Region>().is_err());
        assert!("chr1:a-10".parse::<Region>().is_err());
        assert!("chr1:10".parse::<Region>().is_err());
    }

    #[test]
    fn test_expand() {
        let region = Region::new("chr1", 0, 10);
        assert_eq!(region.expand(1, 11), Region::new("chr1", 0, 11));
        assert_eq!(region.expand(1, 10), Region::new("chr1", 0, 10));
        let region = Region::new("chr1", 5, 10);
        assert_eq!(region.expand(2, 100), Region::new("chr1", 3, 12));
    }

    #[test]
    fn test_merge_regions() {
        let merged = merge_regions(vec![
            Region::new("chr2", 0, 10),
            Region::new("chr1", 50, 60),
            Region::new("chr1", 0, 20),
            Region::new("chr1", 10, 30),
            Region::new("chr2", 10, 15),
        ]);
        assert_eq!(
            merged,
            vec![
                Region::new("chr1", 0, 30),
                Region::new("chr1", 50, 60),
                Region::new("chr2", 0, 15),
            ]
        );
    }

    #[test]
    fn test_merge_adjacent_regions() {
        // half-open regions touching each other are merged, a gap of one base is kept
        let merged = merge_regions(vec![
            Region::new("chr1", 20, 30),
            Region::new("chr1", 0, 10),
            Region::new("chr1", 10, 19),
        ]);
        assert_eq!(
            merged,
            vec![Region::new("chr1", 0, 19), Region::new("chr1", 20, 30)]
        );
    }

    #[test]
    fn test_regions_from_bed() {
        let tmp = NamedTempFile::new().unwrap();
        writeln!(tmp.as_file(), "chr1\t100\t200").unwrap();
        writeln!(tmp.as_file(), "chr2\t0\t50\tname").unwrap();
        let regions = regions_from_bed(tmp.path()).unwrap();
        assert_eq!(
            regions,
            vec![Region::new("chr1", 100, 200), Region::new("chr2", 0, 50)]
        );
    }

    #[test]
    fn test_regions_from_bed_invalid_coords() {
        let tmp = NamedTempFile::new().unwrap();
        writeln!(tmp.as_file(), "chr1\t200\t100").unwrap();
        assert!(regions_from_bed(tmp.path()).is_err());
    }
}
