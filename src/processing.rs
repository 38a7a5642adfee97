use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use thiserror::Error;

use crate::align::{align_read, AlignmentError};
use crate::config::ExtractionConfig;
use crate::features::{FeatureBuilder, FeatureRecord};
use crate::files::{batch_files, list_input_files};
use crate::io::BatchWriter;
use crate::matcher::MotifMatcher;
use crate::normalize::{DegenerateSignalError, NormalizeMethod};
use crate::positions::PositionFilter;
use crate::reference::{ReferenceError, ReferenceIndex};
use crate::signal::{ResquiggledJsonSource, SignalSource, SourceError};

/// Why a file produced no records. Every variant is recoverable: the file is
/// logged and skipped, the run goes on.
#[derive(Debug, Error)]
pub enum SkipReason {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("read {read_id}: incomplete alignment")]
    Alignment {
        read_id: String,
        #[source]
        source: AlignmentError,
    },
    #[error("read {read_id}: degenerate signal")]
    DegenerateSignal {
        read_id: String,
        #[source]
        source: DegenerateSignalError,
    },
    #[error("read {read_id}: outside reference")]
    Reference {
        read_id: String,
        #[source]
        source: ReferenceError,
    },
    #[error("pipeline panicked: {0}")]
    Panicked(String),
}

impl SkipReason {
    /// Short label used to tally skips in the run summary.
    pub fn kind(&self) -> &'static str {
        match self {
            SkipReason::Source(_) => "unreadable",
            SkipReason::Alignment { .. } => "incomplete_alignment",
            SkipReason::DegenerateSignal { .. } => "degenerate_signal",
            SkipReason::Reference { .. } => "outside_reference",
            SkipReason::Panicked(_) => "panicked",
        }
    }
}

/// Outcome of running the pipeline over one input file.
pub type FileOutcome = std::result::Result<Vec<FeatureRecord>, SkipReason>;

/// Cooperative stop signal shared by the caller and the workers. Workers
/// check it before pulling each file, so the file in flight always completes.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-file pipeline: load -> align -> normalize -> build features.
///
/// Only borrows read-only data, so a single extractor is shared by every
/// worker.
pub struct Extractor<'a> {
    source: &'a dyn SignalSource,
    normalize: NormalizeMethod,
    builder: FeatureBuilder<'a>,
}

impl<'a> Extractor<'a> {
    pub fn new(source: &'a dyn SignalSource, normalize: NormalizeMethod, builder: FeatureBuilder<'a>) -> Self {
        Self {
            source,
            normalize,
            builder,
        }
    }

    pub fn process_file(&self, path: &Path) -> FileOutcome {
        let read = self.source.load(path)?;
        let aligned = align_read(&read).map_err(|source| SkipReason::Alignment {
            read_id: read.read_id.clone(),
            source,
        })?;
        let signal = self
            .normalize
            .normalize(&read.oriented_signal())
            .map_err(|source| SkipReason::DegenerateSignal {
                read_id: read.read_id.clone(),
                source,
            })?;
        self.builder
            .build(&aligned, &signal)
            .map_err(|source| SkipReason::Reference {
                read_id: read.read_id.clone(),
                source,
            })
    }

    /// Run every file of one batch in order, stopping early (between files)
    /// when `stop` is raised.
    fn process_batch(&self, index: usize, files: &[PathBuf], stop: &StopFlag) -> BatchResult {
        let mut result = BatchResult {
            index,
            ..BatchResult::default()
        };
        for path in files {
            if stop.is_stopped() {
                break;
            }
            result.files += 1;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.process_file(path)))
                .unwrap_or_else(|payload| Err(SkipReason::Panicked(panic_message(payload.as_ref()))));
            match outcome {
                Ok(records) => {
                    debug!("{}: {} records", path.display(), records.len());
                    result.extracted += 1;
                    result.records.extend(records);
                }
                Err(reason) => {
                    *result.skipped.entry(reason.kind()).or_default() += 1;
                    warn!("skipping {}: {:#}", path.display(), anyhow::Error::from(reason));
                }
            }
        }
        result
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// What one worker hands the writer for one file batch.
#[derive(Debug, Default)]
struct BatchResult {
    index: usize,
    files: usize,
    extracted: usize,
    skipped: BTreeMap<&'static str, usize>,
    records: Vec<FeatureRecord>,
}

/// Totals of a finished run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractionSummary {
    /// Files that went through the pipeline.
    pub files: usize,
    pub extracted: usize,
    pub skipped: usize,
    pub skip_reasons: BTreeMap<&'static str, usize>,
    pub records: usize,
    pub output_files: usize,
    /// Set when the run ended on a stop request.
    pub stopped: bool,
}

fn run_worker(
    worker: usize,
    extractor: &Extractor<'_>,
    work: Receiver<(usize, Vec<PathBuf>)>,
    results: Sender<BatchResult>,
    stop: &StopFlag,
) {
    while !stop.is_stopped() {
        let (index, files) = match work.recv() {
            Ok(batch) => batch,
            Err(_) => break,
        };
        debug!("worker {}: batch {} ({} files)", worker, index, files.len());
        let result = extractor.process_batch(index, &files, stop);
        if results.send(result).is_err() {
            // Writer is gone; nothing more can be accepted.
            stop.stop();
            break;
        }
    }
}

fn drain_results(
    results: Receiver<BatchResult>,
    mut writer: BatchWriter,
    progress: ProgressBar,
    stop: &StopFlag,
) -> Result<ExtractionSummary> {
    let mut summary = ExtractionSummary::default();
    for batch in results.iter() {
        if let Err(e) = writer.write_batch(&batch.records) {
            stop.stop();
            return Err(e).context(format!("failed to write features of batch {}", batch.index));
        }
        summary.files += batch.files;
        summary.extracted += batch.extracted;
        for (kind, n) in batch.skipped {
            summary.skipped += n;
            *summary.skip_reasons.entry(kind).or_default() += n;
        }
        progress.inc(batch.files as u64);
    }
    progress.finish_and_clear();

    let (records, output_files) = writer.finish().context("failed to finalize output")?;
    summary.records = records;
    summary.output_files = output_files;
    summary.stopped = stop.is_stopped();
    Ok(summary)
}

/// Run `batches` through `nproc` workers and stream their records into
/// `writer`.
///
/// Workers pull batches from a shared queue and push results into a channel
/// bounded to `channel_capacity` batches, so extraction blocks while the
/// writer lags behind. Per-file failures are skipped; a writer failure stops
/// the workers and fails the run.
pub fn extract_batches(
    batches: Vec<Vec<PathBuf>>,
    extractor: &Extractor<'_>,
    writer: BatchWriter,
    nproc: usize,
    channel_capacity: usize,
    stop: &StopFlag,
    progress: ProgressBar,
) -> Result<ExtractionSummary> {
    let (work_tx, work_rx) = unbounded();
    for item in batches.into_iter().enumerate() {
        work_tx.send(item).context("failed to queue file batches")?;
    }
    drop(work_tx);

    let (result_tx, result_rx) = bounded::<BatchResult>(channel_capacity);
    // One sender per worker and none kept here, so the writer sees the
    // channel close as soon as the last worker exits, even on a panic.
    let senders: Vec<Sender<BatchResult>> = (0..nproc).map(|_| result_tx.clone()).collect();
    drop(result_tx);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(nproc)
        .thread_name(|i| format!("extract-{}", i))
        .build()
        .context("failed to build worker pool")?;

    thread::scope(|s| {
        let writer_handle = s.spawn(move || drain_results(result_rx, writer, progress, stop));

        pool.scope(|ps| {
            for (worker, results) in senders.into_iter().enumerate() {
                let work = work_rx.clone();
                ps.spawn(move |_| run_worker(worker, extractor, work, results, stop));
            }
        });

        writer_handle
            .join()
            .map_err(|_| anyhow!("writer thread panicked"))?
    })
}

/// Run a full extraction over `config` using the JSON signal source.
pub fn run_extraction(config: &ExtractionConfig, stop: &StopFlag) -> Result<ExtractionSummary> {
    let source = ResquiggledJsonSource::new(
        config.corrected_group.clone(),
        config.basecall_subgroup.clone(),
        config.sample_type,
    );
    run_extraction_with(config, &source, stop)
}

/// Run a full extraction with an explicit signal source.
///
/// Everything that can fail at startup (configuration, motifs, reference,
/// position whitelist, input listing, output creation) fails here before any
/// worker starts.
pub fn run_extraction_with(
    config: &ExtractionConfig,
    source: &dyn SignalSource,
    stop: &StopFlag,
) -> Result<ExtractionSummary> {
    config.validate().context("invalid configuration")?;

    let matcher = MotifMatcher::parse(&config.motifs, config.mod_loc)
        .context("invalid motif configuration")?;
    info!(
        "motifs: {} (modified base at offset {})",
        matcher.patterns().collect::<Vec<_>>().join(","),
        matcher.offset()
    );

    let reference = ReferenceIndex::load(&config.reference).context("failed to load reference")?;
    info!(
        "loaded {} reference sequences from {}",
        reference.num_chromosomes(),
        config.reference.display()
    );

    let filter = match &config.positions {
        Some(path) => {
            let f = PositionFilter::load(path).context("failed to load position whitelist")?;
            info!("restricting extraction to {} whitelisted sites", f.len());
            Some(f)
        }
        None => None,
    };

    let files = list_input_files(&config.input, config.recursive)
        .context("failed to enumerate input files")?;
    let total_files = files.len();
    let batches = batch_files(files, config.batch_size);
    info!(
        "found {} input files in {} batches of up to {}",
        total_files,
        batches.len(),
        config.batch_size
    );

    let writer = BatchWriter::create(config.output.clone()).context("failed to create output")?;

    let progress = if config.progress {
        let pb = ProgressBar::new(total_files as u64);
        if let Ok(style) = ProgressStyle::with_template("{elapsed_precise} [{bar:40}] {pos}/{len} files") {
            pb.set_style(style);
        }
        pb
    } else {
        ProgressBar::hidden()
    };

    let builder = FeatureBuilder::new(
        &reference,
        &matcher,
        filter.as_ref(),
        config.seq_len,
        config.signal_len,
        config.methy_label,
    );
    let extractor = Extractor::new(source, config.normalize, builder);

    let summary = extract_batches(
        batches,
        &extractor,
        writer,
        config.nproc,
        config.channel_capacity,
        stop,
        progress,
    )?;
    info!(
        "extracted {} records from {}/{} files ({} skipped) into {} output file(s)",
        summary.records, summary.extracted, summary.files, summary.skipped, summary.output_files
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::OutputTarget;
    use crate::signal::{BaseSpan, RawSignalRead};
    use crate::{SampleType, Strand};
    use std::collections::HashMap;
    use std::fs;
    use tempfile::tempdir;

    /// In-memory signal source keyed by file name.
    struct MapSource(HashMap<String, RawSignalRead>);

    impl SignalSource for MapSource {
        fn load(&self, path: &Path) -> std::result::Result<RawSignalRead, SourceError> {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            self.0.get(name).cloned().ok_or_else(|| SourceError::Invalid {
                path: path.to_path_buf(),
                reason: "corrupted event table".to_string(),
            })
        }
    }

    // CG at forward 5 and 14
    const REF: &[u8] = b"AAAAACGAAAAAAACGAAAA";

    fn read(id: &str, constant: bool) -> RawSignalRead {
        let n = 16;
        RawSignalRead {
            read_id: id.to_string(),
            raw_signal: (0..n * 3)
                .map(|i| if constant { 100 } else { (i * 7 % 23) as i16 })
                .collect(),
            signal_start: 0,
            spans: (0..n)
                .map(|i| BaseSpan {
                    base: REF[2 + i],
                    start: i * 3,
                    count: 3,
                })
                .collect(),
            chrom: "chr1".to_string(),
            mapped_start: 2,
            mapped_end: 18,
            strand: Strand::Forward,
            sample_type: SampleType::Dna,
        }
    }

    fn run_pool(source: &MapSource, files: &[&str], nproc: usize, target: OutputTarget) -> ExtractionSummary {
        let reference = ReferenceIndex::from_sequences([("chr1", REF.to_vec())]).unwrap();
        let matcher = MotifMatcher::parse("CG", 0).unwrap();
        let builder = FeatureBuilder::new(&reference, &matcher, None, 5, 4, 1);
        let extractor = Extractor::new(source, NormalizeMethod::Mad, builder);
        let batches = batch_files(files.iter().map(PathBuf::from).collect(), 1);
        let writer = BatchWriter::create(target).unwrap();
        extract_batches(batches, &extractor, writer, nproc, 1, &StopFlag::new(), ProgressBar::hidden()).unwrap()
    }

    #[test]
    fn test_corrupted_file_is_skipped() {
        let mut reads = HashMap::new();
        reads.insert("f1".to_string(), read("r1", false));
        reads.insert("f3".to_string(), read("r3", false));
        let source = MapSource(reads);

        let dir = tempdir().unwrap();
        let out = dir.path().join("out.tsv");
        let summary = run_pool(&source, &["f1", "f2", "f3"], 2, OutputTarget::Single(out.clone()));

        assert_eq!(summary.files, 3);
        assert_eq!(summary.extracted, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.skip_reasons.get("unreadable"), Some(&1));
        assert_eq!(summary.records, 4);

        let text = fs::read_to_string(&out).unwrap();
        let mut ids: Vec<&str> = text.lines().map(|l| l.split('\t').nth(4).unwrap()).collect();
        ids.sort();
        assert_eq!(ids, vec!["r1", "r1", "r3", "r3"]);
    }

    #[test]
    fn test_overflowing_signal_offset_is_skipped() {
        let mut bad = read("r2", false);
        bad.signal_start = usize::MAX;
        let mut reads = HashMap::new();
        reads.insert("f1".to_string(), read("r1", false));
        reads.insert("f2".to_string(), bad);
        reads.insert("f3".to_string(), read("r3", false));
        let source = MapSource(reads);

        let dir = tempdir().unwrap();
        let out = dir.path().join("out.tsv");
        let summary = run_pool(&source, &["f1", "f2", "f3"], 1, OutputTarget::Single(out.clone()));

        assert_eq!(summary.extracted, 2);
        assert_eq!(summary.skip_reasons.get("incomplete_alignment"), Some(&1));
        let text = fs::read_to_string(&out).unwrap();
        assert!(text.lines().all(|l| l.split('\t').nth(4) != Some("r2")));
    }

    /// Panics on every file whose name starts with `boom`.
    struct PanickingSource(MapSource);

    impl SignalSource for PanickingSource {
        fn load(&self, path: &Path) -> std::result::Result<RawSignalRead, SourceError> {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if name.starts_with("boom") {
                panic!("corrupt container in {}", name);
            }
            self.0.load(path)
        }
    }

    #[test]
    fn test_panicking_file_is_skipped() {
        let mut reads = HashMap::new();
        reads.insert("f1".to_string(), read("r1", false));
        reads.insert("f3".to_string(), read("r3", false));
        let source = PanickingSource(MapSource(reads));

        let reference = ReferenceIndex::from_sequences([("chr1", REF.to_vec())]).unwrap();
        let matcher = MotifMatcher::parse("CG", 0).unwrap();
        let builder = FeatureBuilder::new(&reference, &matcher, None, 5, 4, 1);
        let extractor = Extractor::new(&source, NormalizeMethod::Mad, builder);

        let dir = tempdir().unwrap();
        let writer = BatchWriter::create(OutputTarget::Single(dir.path().join("o.tsv"))).unwrap();
        let files = vec![PathBuf::from("f1"), PathBuf::from("boom2"), PathBuf::from("f3")];
        let summary = extract_batches(
            vec![files],
            &extractor,
            writer,
            2,
            1,
            &StopFlag::new(),
            ProgressBar::hidden(),
        )
        .unwrap();

        assert_eq!(summary.files, 3);
        assert_eq!(summary.extracted, 2);
        assert_eq!(summary.skip_reasons.get("panicked"), Some(&1));
        assert_eq!(summary.records, 4);
    }

    #[test]
    fn test_constant_signal_yields_nothing() {
        let mut reads = HashMap::new();
        reads.insert("flat".to_string(), read("flat", true));
        let source = MapSource(reads);

        let dir = tempdir().unwrap();
        let summary = run_pool(&source, &["flat"], 1, OutputTarget::Single(dir.path().join("o.tsv")));
        assert_eq!(summary.records, 0);
        assert_eq!(summary.skip_reasons.get("degenerate_signal"), Some(&1));
    }

    #[test]
    fn test_per_file_order_preserved_across_workers() {
        let mut reads = HashMap::new();
        for i in 0..8 {
            reads.insert(format!("f{}", i), read(&format!("r{}", i), false));
        }
        let source = MapSource(reads);
        let names: Vec<String> = (0..8).map(|i| format!("f{}", i)).collect();
        let names: Vec<&str> = names.iter().map(|s| s.as_str()).collect();

        let dir = tempdir().unwrap();
        let out = dir.path().join("out.tsv");
        let summary = run_pool(&source, &names, 4, OutputTarget::Single(out.clone()));
        assert_eq!(summary.records, 16);

        // Each read's two sites stay adjacent and in read order.
        let text = fs::read_to_string(&out).unwrap();
        let lines: Vec<Vec<&str>> = text.lines().map(|l| l.split('\t').collect()).collect();
        for pair in lines.chunks(2) {
            assert_eq!(pair[0][4], pair[1][4]);
            assert_eq!(pair[0][1], "5");
            assert_eq!(pair[1][1], "14");
        }
    }

    #[test]
    fn test_sharded_totals_match_single() {
        let mut reads = HashMap::new();
        for i in 0..5 {
            reads.insert(format!("f{}", i), read(&format!("r{}", i), false));
        }
        let source = MapSource(reads);
        let names = ["f0", "f1", "f2", "f3", "f4"];

        let dir = tempdir().unwrap();
        let single = run_pool(&source, &names, 2, OutputTarget::Single(dir.path().join("all.tsv")));
        let sharded = run_pool(
            &source,
            &names,
            2,
            OutputTarget::Sharded {
                dir: dir.path().join("shards"),
                shard_size: 3,
            },
        );
        assert_eq!(single.records, 10);
        assert_eq!(sharded.records, single.records);
        assert_eq!(sharded.output_files, 4);
    }

    #[test]
    fn test_stop_flag_prevents_new_work() {
        let mut reads = HashMap::new();
        reads.insert("f1".to_string(), read("r1", false));
        let source = MapSource(reads);
        let reference = ReferenceIndex::from_sequences([("chr1", REF.to_vec())]).unwrap();
        let matcher = MotifMatcher::parse("CG", 0).unwrap();
        let builder = FeatureBuilder::new(&reference, &matcher, None, 5, 4, 1);
        let extractor = Extractor::new(&source, NormalizeMethod::Zscore, builder);

        let dir = tempdir().unwrap();
        let writer = BatchWriter::create(OutputTarget::Single(dir.path().join("o.tsv"))).unwrap();
        let stop = StopFlag::new();
        stop.stop();
        let summary = extract_batches(
            vec![vec![PathBuf::from("f1")]],
            &extractor,
            writer,
            1,
            1,
            &stop,
            ProgressBar::hidden(),
        )
        .unwrap();
        assert_eq!(summary.files, 0);
        assert!(summary.stopped);
    }
}
