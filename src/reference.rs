// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::{Mutex, RwLock};

use anyhow::{anyhow, Result};
use bio::io::fasta;
use lru_time_cache::LruCache;

use crate::errors::{source_unavailable, Error};
use crate::utils::Region;

/// A collaborator providing reference sequence.
pub trait ReferenceSource: Send + Sync {
    /// Length of the given contig, `None` if the contig is unknown.
    fn contig_len(&self, chrom: &str) -> Option<u64>;

    /// Upper case sequence of the given region.
    fn fetch(&self, region: &Region) -> Result<Vec<u8>>;
}

fn slice_region(seq: &[u8], region: &Region) -> Result<Vec<u8>> {
    let start = region.start as usize;
    let end = region.end as usize;
    if start > end || end > seq.len() {
        return Err(Error::InvalidRegion {
            spec: region.to_string(),
        }
        .into());
    }
    Ok(seq[start..end].to_vec())
}

/// A lazy buffer for reference sequences, caching the most recently used contigs.
pub struct Buffer {
    reader: RwLock<fasta::IndexedReader<fs::File>>,
    sequences: Mutex<LruCache<String, Arc<Vec<u8>>>>,
    contig_lens: HashMap<String, u64>,
    reference_path: PathBuf,
}

impl Buffer {
    pub fn from_path<P: AsRef<Path> + std::fmt::Debug>(path: P, capacity: usize) -> Result<Self> {
        let fasta: fasta::IndexedReader<fs::File> = fasta::IndexedReader::from_file(&path)
            .map_err(|e| source_unavailable(&path.as_ref().display().to_string(), e))?;
        let contig_lens = fasta
            .index
            .sequences()
            .into_iter()
            .map(|seq| (seq.name, seq.len))
            .collect();
        Ok(Buffer {
            reader: RwLock::new(fasta),
            sequences: Mutex::new(LruCache::with_capacity(capacity)),
            contig_lens,
            reference_path: path.as_ref().to_path_buf(),
        })
    }

    pub fn reference_path(&self) -> &Path {
        &self.reference_path
    }

    /// Load given chromosome and return it as a slice. This is O(1) if chromosome was loaded before.
    pub fn seq(&self, chrom: &str) -> Result<Arc<Vec<u8>>> {
        let mut sequences = self
            .sequences
            .lock()
            .map_err(|_| anyhow!("reference cache lock poisoned"))?;

        if let Some(sequence) = sequences.get(chrom) {
            return Ok(Arc::clone(sequence));
        }

        let mut sequence = Vec::new();
        {
            let mut reader = self
                .reader
                .write()
                .map_err(|_| anyhow!("reference reader lock poisoned"))?;
            let unavailable = |e: std::io::Error| {
                source_unavailable(&self.reference_path.display().to_string(), e)
            };
            reader.fetch_all(chrom).map_err(unavailable)?;
            reader.read(&mut sequence).map_err(unavailable)?;
        }
        sequence.make_ascii_uppercase();

        let sequence = Arc::new(sequence);
        sequences.insert(chrom.to_owned(), Arc::clone(&sequence));
        Ok(sequence)
    }
}

impl ReferenceSource for Buffer {
    fn contig_len(&self, chrom: &str) -> Option<u64> {
        self.contig_lens.get(chrom).copied()
    }

    fn fetch(&self, region: &Region) -> Result<Vec<u8>> {
        slice_region(&self.seq(&region.chrom)?, region)
    }
}

/// Reference sequences held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryReference {
    contigs: HashMap<String, Vec<u8>>,
}

impl MemoryReference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contig(mut self, chrom: &str, seq: &[u8]) -> Self {
        self.contigs
            .insert(chrom.to_owned(), seq.to_ascii_uppercase());
        self
    }
}

impl ReferenceSource for MemoryReference {
    fn contig_len(&self, chrom: &str) -> Option<u64> {
        self.contigs.get(chrom).map(|seq| seq.len() as u64)
    }

    fn fetch(&self, region: &Region) -> Result<Vec<u8>> {
        let seq = self.contigs.get(&region.chrom).ok_or_else(|| Error::UnknownContig {
            contig: region.chrom.clone(),
        })?;
        slice_region(seq, region)
    }
}
