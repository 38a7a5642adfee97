use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::Strand;

#[derive(Debug, Error)]
pub enum PositionFileFormatError {
    #[error("failed to read position file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// Whitelist of `(chromosome, forward-strand position, strand)` sites.
///
/// Loaded once at startup; a motif hit absent from the set is dropped.
#[derive(Debug, Default)]
pub struct PositionFilter {
    sites: HashSet<(String, u64, Strand)>,
}

impl PositionFilter {
    /// Load a headerless, tab-separated `chrom\tpos\tstrand` file. Blank lines
    /// are ignored; any other line that does not parse aborts the load.
    pub fn load(path: &Path) -> Result<Self, PositionFileFormatError> {
        let io_err = |source| PositionFileFormatError::Io {
            path: path.to_path_buf(),
            source,
        };
        let reader = BufReader::new(File::open(path).map_err(io_err)?);

        let mut filter = PositionFilter::default();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(io_err)?;
            if line.trim().is_empty() {
                continue;
            }
            let site = parse_line(&line).map_err(|reason| PositionFileFormatError::Malformed {
                path: path.to_path_buf(),
                line: idx + 1,
                reason,
            })?;
            filter.sites.insert(site);
        }
        Ok(filter)
    }

    pub fn from_sites<I, S>(sites: I) -> Self
    where
        I: IntoIterator<Item = (S, u64, Strand)>,
        S: Into<String>,
    {
        Self {
            sites: sites
                .into_iter()
                .map(|(c, p, s)| (c.into(), p, s))
                .collect(),
        }
    }

    pub fn contains(&self, chrom: &str, pos: u64, strand: Strand) -> bool {
        // Tuple keys with an owned String need an owned lookup key.
        self.sites.contains(&(chrom.to_string(), pos, strand))
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

fn parse_line(line: &str) -> Result<(String, u64, Strand), String> {
    let fields: Vec<&str> = line.trim_end_matches('\r').split('\t').collect();
    if fields.len() != 3 {
        return Err(format!("expected 3 tab-separated columns, found {}", fields.len()));
    }
    let chrom = fields[0].trim();
    if chrom.is_empty() {
        return Err("empty chromosome".to_string());
    }
    let pos = fields[1]
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("invalid position '{}'", fields[1]))?;
    let strand = fields[2].parse::<Strand>()?;
    Ok((chrom.to_string(), pos, strand))
}
