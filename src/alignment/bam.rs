// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::path::Path;

use anyhow::Result;
use rust_htslib::bam::{self, Read};

use crate::alignment::{AlignedRead, AlignmentSource, Reads};
use crate::errors::source_unavailable;
use crate::utils::Region;

/// An indexed BAM/CRAM file.
pub struct BamSource {
    name: String,
    reader: bam::IndexedReader,
}

impl BamSource {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let name = path.as_ref().display().to_string();
        let reader = bam::IndexedReader::from_path(path.as_ref())
            .map_err(|e| source_unavailable(&name, e))?;
        Ok(BamSource { name, reader })
    }

    /// Use the given reference for decoding CRAM files.
    pub fn set_reference(&mut self, reference: impl AsRef<Path>) -> Result<()> {
        self.reader
            .set_reference(reference)
            .map_err(|e| source_unavailable(&self.name, e))?;
        Ok(())
    }
}

impl AlignedRead {
    pub fn from_record(record: &bam::Record) -> Self {
        AlignedRead {
            qname: record.qname().to_owned(),
            pos: record.pos().max(0) as u64,
            cigar: record.cigar().take(),
            seq: record.seq().as_bytes().to_ascii_uppercase(),
            mapq: record.mapq(),
            flags: record.flags(),
        }
    }
}

impl AlignmentSource for BamSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch<'a>(&'a mut self, region: &Region) -> Result<Reads<'a>> {
        let tid = match self.reader.header().tid(region.chrom.as_bytes()) {
            Some(tid) => tid,
            None => {
                debug!(
                    "Contig {} not present in header of {}, no reads to fetch.",
                    region.chrom, self.name
                );
                return Ok(Box::new(std::iter::empty()));
            }
        };
        // whole contig regions carry an unbounded end
        let end = region.end.min(i64::MAX as u64) as i64;
        self.reader
            .fetch((tid as i32, region.start as i64, end))
            .map_err(|e| source_unavailable(&self.name, e))?;

        let name = &self.name;
        Ok(Box::new(self.reader.records().map(move |record| {
            record
                .map(|record| AlignedRead::from_record(&record))
                .map_err(|e| source_unavailable(name, e).into())
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bio_types::strand::ReqStrand;
    use rust_htslib::bam::header::HeaderRecord;
    use rust_htslib::bam::record::{Cigar, CigarString};
    use tempfile::tempdir;

    fn record(qname: &[u8], pos: i64, cigar: Vec<Cigar>, seq: &[u8], flags: u16) -> bam::Record {
        let mut record = bam::Record::new();
        let qual = vec![30; seq.len()];
        record.set(qname, Some(&CigarString(cigar)), seq, &qual);
        record.set_tid(0);
        record.set_pos(pos);
        record.set_mapq(60);
        record.set_flags(flags);
        record.set_mtid(-1);
        record.set_mpos(-1);
        record
    }

    #[test]
    fn test_from_record() {
        let record = record(
            b"read1",
            100,
            vec![Cigar::Match(3), Cigar::Ins(1), Cigar::Match(2)],
            b"ACGTA",
            0x10,
        );
        let read = AlignedRead::from_record(&record);
        assert_eq!(read.qname(), b"read1");
        assert_eq!(read.pos(), 100);
        assert_eq!(read.cigar().to_string(), "3M1I2M");
        assert_eq!(read.seq(), b"ACGTA");
        assert_eq!(read.mapq(), 60);
        assert_eq!(read.strand(), ReqStrand::Reverse);
        assert_eq!(read.filter_reason(), None);
    }

    #[test]
    fn test_fetch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reads.bam");
        {
            let mut header = bam::Header::new();
            let mut contig = HeaderRecord::new(b"SQ");
            contig.push_tag(b"SN", "chr1");
            contig.push_tag(b"LN", 1000);
            header.push_record(&contig);
            let mut writer = bam::Writer::from_path(&path, &header, bam::Format::Bam).unwrap();
            for (qname, pos) in &[(b"a", 10), (b"b", 50), (b"c", 500)] {
                writer
                    .write(&record(*qname, *pos, vec![Cigar::Match(4)], b"ACGT", 0))
                    .unwrap();
            }
        }
        bam::index::build(&path, None, bam::index::Type::Bai, 1).unwrap();

        let mut source = BamSource::from_path(&path).unwrap();
        assert_eq!(source.name(), path.display().to_string());
        let positions = |source: &mut BamSource, region: &Region| {
            source
                .fetch(region)
                .unwrap()
                .map(|read| read.unwrap().pos())
                .collect::<Vec<_>>()
        };
        assert_eq!(positions(&mut source, &Region::new("chr1", 0, 60)), vec![10, 50]);
        assert_eq!(
            positions(&mut source, &Region::contig("chr1")),
            vec![10, 50, 500]
        );
        // contigs missing from the header yield no reads
        assert!(positions(&mut source, &Region::contig("chr2")).is_empty());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        assert!(BamSource::from_path(dir.path().join("missing.bam")).is_err());
    }
}
