use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use signal_features::config::{ExtractionConfig, DEFAULT_BASECALL_SUBGROUP, DEFAULT_CORRECTED_GROUP};
use signal_features::io::OutputTarget;
use signal_features::normalize::NormalizeMethod;
use signal_features::processing::{run_extraction, StopFlag};
use signal_features::SampleType;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Extract per-base signal features at motif sites from re-squiggled nanopore reads"
)]
struct Args {
    /// Directory (or single file) of re-squiggled reads
    #[arg(short, long)]
    input: PathBuf,

    /// Search the input directory recursively
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    recursive: bool,

    /// Corrected analysis group written by the re-squiggler
    #[arg(long, default_value = DEFAULT_CORRECTED_GROUP)]
    corrected_group: String,

    /// Corrected subgroup inside the analysis group
    #[arg(long, default_value = DEFAULT_BASECALL_SUBGROUP)]
    basecall_subgroup: String,

    /// Reference FASTA (optionally gzipped)
    #[arg(short, long)]
    reference: PathBuf,

    /// Reads come from an RNA sample (signal runs 3'->5')
    #[arg(long, default_value_t = false)]
    rna: bool,

    /// Read-level signal normalization
    #[arg(long, value_enum, default_value_t = NormalizeMethod::Mad)]
    normalize_method: NormalizeMethod,

    /// Label assigned to every extracted site (for training)
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=1))]
    methy_label: u8,

    /// K-mer length, odd
    #[arg(long, default_value_t = 17)]
    seq_len: usize,

    /// Number of signal samples kept per base
    #[arg(long, default_value_t = 16)]
    signal_len: usize,

    /// Comma-separated IUPAC motifs; all must share the modification offset
    #[arg(long, default_value = "CG")]
    motifs: String,

    /// 0-based offset of the modified base within each motif
    #[arg(long, default_value_t = 0)]
    mod_loc: usize,

    /// Whitelist of sites (tab-separated chromosome, forward position, strand)
    #[arg(long)]
    positions: Option<PathBuf>,

    /// Output file, or output directory with --sharded
    #[arg(short, long)]
    output: PathBuf,

    /// Split output into numbered shard files inside the output directory
    #[arg(long, default_value_t = false)]
    sharded: bool,

    /// Records per shard file when --sharded is set
    #[arg(long, default_value_t = 200)]
    shard_size: usize,

    /// Number of extraction workers
    #[arg(short = 'p', long, default_value_t = 1)]
    nproc: usize,

    /// Number of files handed to a worker at a time
    #[arg(long, default_value_t = 100)]
    batch_size: usize,

    /// Finished batches buffered between workers and the writer
    /// (defaults to twice the worker count)
    #[arg(long)]
    channel_capacity: Option<usize>,

    /// Verbose output (debug logging, progress bar, elapsed time)
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> ExtractionConfig {
        let output = if self.sharded {
            OutputTarget::Sharded {
                dir: self.output,
                shard_size: self.shard_size,
            }
        } else {
            OutputTarget::Single(self.output)
        };
        let mut config = ExtractionConfig::new(self.input, self.reference, output);
        config.recursive = self.recursive;
        config.corrected_group = self.corrected_group;
        config.basecall_subgroup = self.basecall_subgroup;
        config.sample_type = if self.rna { SampleType::Rna } else { SampleType::Dna };
        config.normalize = self.normalize_method;
        config.methy_label = self.methy_label;
        config.seq_len = self.seq_len;
        config.signal_len = self.signal_len;
        config.motifs = self.motifs;
        config.mod_loc = self.mod_loc;
        config.positions = self.positions;
        config.nproc = self.nproc;
        config.batch_size = self.batch_size;
        config.channel_capacity = self
            .channel_capacity
            .unwrap_or_else(|| self.nproc.saturating_mul(2).max(1));
        config.progress = self.verbose;
        config
    }
}

/// CLI entry point: parse args, set up logging, and run the extraction.
/// Prints a tab-separated summary: input, files, extracted, skipped, records.
fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if args.verbose {
        "debug"
    } else {
        "info"
    }))
    .format_timestamp_secs()
    .format_target(false)
    .init();

    let verbose = args.verbose;
    let input_name = args.input.display().to_string();
    let config = args.into_config();

    let start = std::time::Instant::now();
    let summary = run_extraction(&config, &StopFlag::new())?;
    let elapsed = start.elapsed();

    println!(
        "{}\t{}\t{}\t{}\t{}",
        input_name, summary.files, summary.extracted, summary.skipped, summary.records
    );

    if verbose {
        println!("Elapsed: {:.3}s", elapsed.as_secs_f64());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["prog", "-i", "reads", "-r", "ref.fa", "-o", "out.tsv"]).unwrap();
        assert!(args.recursive);
        assert_eq!(args.seq_len, 17);
        assert_eq!(args.signal_len, 16);
        assert_eq!(args.motifs, "CG");
        assert_eq!(args.normalize_method, NormalizeMethod::Mad);

        let config = args.into_config();
        assert_eq!(config.output, OutputTarget::Single(PathBuf::from("out.tsv")));
        assert_eq!(config.channel_capacity, 2);
        assert_eq!(config.corrected_group, "RawGenomeCorrected_000");
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_args_sharded_and_rna() {
        let args = Args::try_parse_from([
            "prog", "-i", "reads", "-r", "ref.fa", "-o", "outdir", "--sharded", "--shard-size", "50",
            "--rna", "--normalize-method", "zscore", "--recursive", "false", "-p", "4",
        ])
        .unwrap();
        let config = args.into_config();
        assert_eq!(
            config.output,
            OutputTarget::Sharded {
                dir: PathBuf::from("outdir"),
                shard_size: 50
            }
        );
        assert_eq!(config.sample_type, SampleType::Rna);
        assert_eq!(config.normalize, NormalizeMethod::Zscore);
        assert!(!config.recursive);
        assert_eq!(config.channel_capacity, 8);
    }

    #[test]
    fn test_invalid_label_rejected() {
        let bad = Args::try_parse_from(["prog", "-i", "x", "-r", "y", "-o", "z", "--methy-label", "2"]);
        assert!(bad.is_err());
    }
}
