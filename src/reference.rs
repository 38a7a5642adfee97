use needletail::{parse_fastx_file, Sequence};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::Strand;

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("failed to read reference {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("reference {0} contains no sequences")]
    Empty(PathBuf),
    #[error("reference contains chromosome '{0}' more than once")]
    DuplicateChromosome(String),
    #[error("chromosome '{0}' not found in reference")]
    UnknownChromosome(String),
    #[error("region {chrom}:{start}-{end} exceeds chromosome length {len}")]
    RegionOutOfBounds {
        chrom: String,
        start: u64,
        end: u64,
        len: u64,
    },
}

/// In-memory chromosome -> sequence lookup, loaded once before extraction.
///
/// Sequences are stored uppercased on the forward strand; reverse-strand views
/// are derived on demand.
#[derive(Debug, Default)]
pub struct ReferenceIndex {
    chroms: HashMap<String, Vec<u8>>,
}

impl ReferenceIndex {
    /// Load a FASTA (optionally gzipped) reference. Chromosome names are the
    /// first whitespace-separated token of each header.
    pub fn load(path: &Path) -> Result<Self, ReferenceError> {
        let parse_err = |e: needletail::errors::ParseError| ReferenceError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        };
        let mut reader = parse_fastx_file(path).map_err(parse_err)?;

        let mut index = ReferenceIndex::default();
        while let Some(record) = reader.next() {
            let r = record.map_err(parse_err)?;
            let name = String::from_utf8_lossy(r.id())
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string();
            index.insert(name, r.seq().to_vec())?;
        }

        if index.chroms.is_empty() {
            return Err(ReferenceError::Empty(path.to_path_buf()));
        }
        Ok(index)
    }

    /// Build an index from in-memory `(name, sequence)` pairs.
    pub fn from_sequences<I, S>(seqs: I) -> Result<Self, ReferenceError>
    where
        I: IntoIterator<Item = (S, Vec<u8>)>,
        S: Into<String>,
    {
        let mut index = ReferenceIndex::default();
        for (name, seq) in seqs {
            index.insert(name.into(), seq)?;
        }
        Ok(index)
    }

    fn insert(&mut self, name: String, mut seq: Vec<u8>) -> Result<(), ReferenceError> {
        if self.chroms.contains_key(&name) {
            return Err(ReferenceError::DuplicateChromosome(name));
        }
        seq.make_ascii_uppercase();
        self.chroms.insert(name, seq);
        Ok(())
    }

    pub fn num_chromosomes(&self) -> usize {
        self.chroms.len()
    }

    pub fn get(&self, chrom: &str) -> Option<&[u8]> {
        self.chroms.get(chrom).map(|s| s.as_slice())
    }

    pub fn chrom_len(&self, chrom: &str) -> Option<u64> {
        self.chroms.get(chrom).map(|s| s.len() as u64)
    }

    /// Forward-strand sequence of the half-open region `[start, end)`.
    pub fn region(&self, chrom: &str, start: u64, end: u64) -> Result<&[u8], ReferenceError> {
        let seq = self
            .get(chrom)
            .ok_or_else(|| ReferenceError::UnknownChromosome(chrom.to_string()))?;
        let len = seq.len() as u64;
        if start > end || end > len {
            return Err(ReferenceError::RegionOutOfBounds {
                chrom: chrom.to_string(),
                start,
                end,
                len,
            });
        }
        Ok(&seq[start as usize..end as usize])
    }

    /// The `2 * half + 1` bases centered on forward position `center`, read on
    /// `strand` (reverse-complemented for `-`). Returns `None` when the window
    /// runs past either chromosome end; windows are never padded.
    pub fn window(&self, chrom: &str, center: u64, half: u64, strand: Strand) -> Option<Vec<u8>> {
        let start = center.checked_sub(half)?;
        let end = center + half + 1;
        let fwd = self.region(chrom, start, end).ok()?;
        Some(match strand {
            Strand::Forward => fwd.to_vec(),
            Strand::Reverse => fwd.reverse_complement(),
        })
    }
}
