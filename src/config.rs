use std::path::PathBuf;
use thiserror::Error;

use crate::io::OutputTarget;
use crate::normalize::NormalizeMethod;
use crate::SampleType;

pub const DEFAULT_CORRECTED_GROUP: &str = "RawGenomeCorrected_000";
pub const DEFAULT_BASECALL_SUBGROUP: &str = "BaseCalled_template";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("k-mer length must be a positive odd number, got {0}")]
    KmerLength(usize),
    #[error("{0} must be at least 1")]
    Zero(&'static str),
    #[error("methylation label must be 0 or 1, got {0}")]
    Label(u8),
}

/// Validated, immutable settings of one extraction run.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub input: PathBuf,
    pub recursive: bool,
    pub corrected_group: String,
    pub basecall_subgroup: String,
    pub reference: PathBuf,
    pub sample_type: SampleType,
    pub normalize: NormalizeMethod,
    pub methy_label: u8,
    pub seq_len: usize,
    pub signal_len: usize,
    pub motifs: String,
    pub mod_loc: usize,
    pub positions: Option<PathBuf>,
    pub output: OutputTarget,
    /// Number of extraction workers.
    pub nproc: usize,
    /// Files handed to a worker at a time.
    pub batch_size: usize,
    /// Bound of the worker -> writer channel, in batches.
    pub channel_capacity: usize,
    pub progress: bool,
}

impl ExtractionConfig {
    /// A configuration with the stock defaults (CpG, 17-mers, 16 samples per
    /// base, MAD normalization, label 1, one worker).
    pub fn new(input: impl Into<PathBuf>, reference: impl Into<PathBuf>, output: OutputTarget) -> Self {
        Self {
            input: input.into(),
            recursive: true,
            corrected_group: DEFAULT_CORRECTED_GROUP.to_string(),
            basecall_subgroup: DEFAULT_BASECALL_SUBGROUP.to_string(),
            reference: reference.into(),
            sample_type: SampleType::Dna,
            normalize: NormalizeMethod::Mad,
            methy_label: 1,
            seq_len: 17,
            signal_len: 16,
            motifs: "CG".to_string(),
            mod_loc: 0,
            positions: None,
            output,
            nproc: 1,
            batch_size: 100,
            channel_capacity: 2,
            progress: false,
        }
    }

    /// Reject combinations no worker could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.seq_len == 0 || self.seq_len % 2 == 0 {
            return Err(ConfigError::KmerLength(self.seq_len));
        }
        if self.signal_len == 0 {
            return Err(ConfigError::Zero("signal length"));
        }
        if self.methy_label > 1 {
            return Err(ConfigError::Label(self.methy_label));
        }
        if self.nproc == 0 {
            return Err(ConfigError::Zero("worker count"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Zero("file batch size"));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Zero("channel capacity"));
        }
        if let OutputTarget::Sharded { shard_size: 0, .. } = self.output {
            return Err(ConfigError::Zero("shard size"));
        }
        Ok(())
    }
}
