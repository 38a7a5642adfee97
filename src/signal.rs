use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::{SampleType, Strand};

/// Samples attributed to one corrected base, relative to the first aligned
/// sample of the read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseSpan {
    pub base: u8,
    pub start: usize,
    pub count: usize,
}

/// One re-squiggled read: raw samples plus the per-base event table and the
/// reference mapping produced by the corrected alignment.
#[derive(Debug, Clone)]
pub struct RawSignalRead {
    pub read_id: String,
    pub raw_signal: Vec<i16>,
    /// Offset of the first aligned sample within `raw_signal`.
    pub signal_start: usize,
    /// Spans in read (5'->3' base) order.
    pub spans: Vec<BaseSpan>,
    pub chrom: String,
    /// Mapped region on the forward strand, 0-based half-open.
    pub mapped_start: u64,
    pub mapped_end: u64,
    pub strand: Strand,
    pub sample_type: SampleType,
}

impl RawSignalRead {
    pub fn mapped_len(&self) -> u64 {
        self.mapped_end.saturating_sub(self.mapped_start)
    }

    /// Raw samples in event order: RNA signal is reversed so that sample
    /// indices line up with the 5'->3' span table.
    pub fn oriented_signal(&self) -> Vec<i16> {
        match self.sample_type {
            SampleType::Dna => self.raw_signal.clone(),
            SampleType::Rna => self.raw_signal.iter().rev().copied().collect(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path}: missing corrected group '{group}/{subgroup}'")]
    MissingGroup {
        path: PathBuf,
        group: String,
        subgroup: String,
    },
    #[error("{path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

/// The raw-signal container collaborator: turns one input file into one read.
pub trait SignalSource: Send + Sync {
    fn load(&self, path: &Path) -> Result<RawSignalRead, SourceError>;
}

#[derive(Debug, Deserialize)]
struct JsonRead {
    read_id: String,
    raw_signal: Vec<i16>,
    analyses: HashMap<String, HashMap<String, JsonCorrected>>,
}

#[derive(Debug, Deserialize)]
struct JsonCorrected {
    alignment: JsonAlignment,
    events: JsonEvents,
}

#[derive(Debug, Deserialize)]
struct JsonAlignment {
    mapped_chrom: String,
    mapped_start: u64,
    mapped_end: u64,
    mapped_strand: String,
}

#[derive(Debug, Deserialize)]
struct JsonEvents {
    #[serde(default)]
    read_start_rel_to_raw: usize,
    base: String,
    start: Vec<usize>,
    length: Vec<usize>,
}

/// Reads re-squiggled reads stored as JSON documents laid out like the
/// corrected-analysis tree of the signal container:
/// `analyses/<corrected_group>/<basecall_subgroup>/{alignment,events}`.
#[derive(Debug, Clone)]
pub struct ResquiggledJsonSource {
    pub corrected_group: String,
    pub basecall_subgroup: String,
    pub sample_type: SampleType,
}

impl ResquiggledJsonSource {
    pub fn new(
        corrected_group: impl Into<String>,
        basecall_subgroup: impl Into<String>,
        sample_type: SampleType,
    ) -> Self {
        Self {
            corrected_group: corrected_group.into(),
            basecall_subgroup: basecall_subgroup.into(),
            sample_type,
        }
    }
}

impl SignalSource for ResquiggledJsonSource {
    fn load(&self, path: &Path) -> Result<RawSignalRead, SourceError> {
        let file = File::open(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut doc: JsonRead =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| SourceError::Json {
                path: path.to_path_buf(),
                source,
            })?;

        let corrected = doc
            .analyses
            .get_mut(&self.corrected_group)
            .and_then(|g| g.remove(&self.basecall_subgroup))
            .ok_or_else(|| SourceError::MissingGroup {
                path: path.to_path_buf(),
                group: self.corrected_group.clone(),
                subgroup: self.basecall_subgroup.clone(),
            })?;

        let invalid = |reason: String| SourceError::Invalid {
            path: path.to_path_buf(),
            reason,
        };
        let events = corrected.events;
        let bases = events.base.as_bytes();
        if bases.len() != events.start.len() || bases.len() != events.length.len() {
            return Err(invalid(format!(
                "event table columns differ in length (base {}, start {}, length {})",
                bases.len(),
                events.start.len(),
                events.length.len()
            )));
        }
        let strand = corrected
            .alignment
            .mapped_strand
            .parse::<Strand>()
            .map_err(invalid)?;

        let spans = bases
            .iter()
            .zip(events.start.iter().zip(&events.length))
            .map(|(b, (s, l))| BaseSpan {
                base: b.to_ascii_uppercase(),
                start: *s,
                count: *l,
            })
            .collect();

        Ok(RawSignalRead {
            read_id: doc.read_id,
            raw_signal: doc.raw_signal,
            signal_start: events.read_start_rel_to_raw,
            spans,
            chrom: corrected.alignment.mapped_chrom,
            mapped_start: corrected.alignment.mapped_start,
            mapped_end: corrected.alignment.mapped_end,
            strand,
            sample_type: self.sample_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_json(body: &str) -> NamedTempFile {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(body.as_bytes()).unwrap();
        tmp.flush().unwrap();
        tmp
    }

    const DOC: &str = r#"{
        "read_id": "r1",
        "raw_signal": [1, 2, 3, 4, 5],
        "analyses": {"RawGenomeCorrected_000": {"BaseCalled_template": {
            "alignment": {"mapped_chrom": "chr1", "mapped_start": 10, "mapped_end": 12, "mapped_strand": "-"},
            "events": {"read_start_rel_to_raw": 1, "base": "ac", "start": [0, 2], "length": [2, 2]}
        }}}
    }"#;

    #[test]
    fn test_load_json_read() {
        let tmp = write_json(DOC);
        let src = ResquiggledJsonSource::new("RawGenomeCorrected_000", "BaseCalled_template", SampleType::Dna);
        let read = src.load(tmp.path()).unwrap();
        assert_eq!(read.read_id, "r1");
        assert_eq!(read.strand, Strand::Reverse);
        assert_eq!(read.signal_start, 1);
        assert_eq!(read.mapped_len(), 2);
        assert_eq!(
            read.spans[1],
            BaseSpan {
                base: b'C',
                start: 2,
                count: 2
            }
        );
    }

    #[test]
    fn test_missing_group() {
        let tmp = write_json(DOC);
        let src = ResquiggledJsonSource::new("RawGenomeCorrected_001", "BaseCalled_template", SampleType::Dna);
        assert!(matches!(
            src.load(tmp.path()),
            Err(SourceError::MissingGroup { .. })
        ));
    }

    #[test]
    fn test_corrupt_json() {
        let tmp = write_json("{\"read_id\": ");
        let src = ResquiggledJsonSource::new("a", "b", SampleType::Dna);
        assert!(matches!(src.load(tmp.path()), Err(SourceError::Json { .. })));
    }

    #[test]
    fn test_rna_signal_is_reversed() {
        let tmp = write_json(DOC);
        let src = ResquiggledJsonSource::new("RawGenomeCorrected_000", "BaseCalled_template", SampleType::Rna);
        let read = src.load(tmp.path()).unwrap();
        assert_eq!(read.oriented_signal(), vec![5, 4, 3, 2, 1]);
    }
}
