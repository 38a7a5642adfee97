use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::features::FeatureRecord;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to create output {path}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("output {0} exists and is not a directory")]
    NotADirectory(PathBuf),
    #[error("failed to write {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where extracted features go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// One growing file; gzip-compressed when the path ends in `.gz`.
    Single(PathBuf),
    /// Numbered shard files `<dir>/<n>.tsv`, each holding `shard_size`
    /// records except possibly the last.
    Sharded { dir: PathBuf, shard_size: usize },
}

/// Output sink that is either plain buffered or gzip-wrapped. Kept as an enum
/// so gzip streams can be finished explicitly and their errors surfaced.
enum Sink {
    Plain(BufWriter<File>),
    Gz(GzEncoder<BufWriter<File>>),
}

impl Sink {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Sink::Plain(w) => w as &mut dyn Write,
            Sink::Gz(w) => w as &mut dyn Write,
        }
    }

    fn finish(self) -> std::io::Result<()> {
        match self {
            Sink::Plain(mut w) => w.flush(),
            Sink::Gz(w) => w.finish()?.flush(),
        }
    }
}

/// Create an output sink. If `path` ends with `.gz`, the sink is
/// gzip-compressed.
fn create_sink(path: &Path) -> Result<Sink, WriteError> {
    let file = File::create(path).map_err(|source| WriteError::Create {
        path: path.to_path_buf(),
        source,
    })?;
    let writer = BufWriter::new(file);
    if path.extension().map_or(false, |e| e == "gz") {
        Ok(Sink::Gz(GzEncoder::new(writer, Compression::default())))
    } else {
        Ok(Sink::Plain(writer))
    }
}

/// Path of shard `index` inside `dir`.
pub fn shard_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("{}.tsv", index))
}

/// The single consumer of extracted records and sole owner of the output
/// files.
pub struct BatchWriter {
    target: OutputTarget,
    current: Option<(PathBuf, Sink)>,
    in_current: usize,
    shards_done: usize,
    records: usize,
}

impl BatchWriter {
    /// Prepare the output. Single mode creates (truncates) the file now;
    /// sharded mode creates the directory and opens shards on demand.
    pub fn create(target: OutputTarget) -> Result<Self, WriteError> {
        let current = match &target {
            OutputTarget::Single(path) => Some((path.clone(), create_sink(path)?)),
            OutputTarget::Sharded { dir, .. } => {
                if dir.exists() && !dir.is_dir() {
                    return Err(WriteError::NotADirectory(dir.clone()));
                }
                fs::create_dir_all(dir).map_err(|source| WriteError::Create {
                    path: dir.clone(),
                    source,
                })?;
                None
            }
        };
        Ok(Self {
            target,
            current,
            in_current: 0,
            shards_done: 0,
            records: 0,
        })
    }

    /// Append `records` in order.
    pub fn write_batch(&mut self, records: &[FeatureRecord]) -> Result<(), WriteError> {
        for rec in records {
            self.write_record(rec)?;
        }
        Ok(())
    }

    fn write_record(&mut self, rec: &FeatureRecord) -> Result<(), WriteError> {
        if let OutputTarget::Sharded { shard_size, .. } = self.target {
            if self.in_current >= shard_size {
                self.close_current()?;
            }
            if self.current.is_none() {
                self.open_shard()?;
            }
        }

        let (path, sink) = match self.current.as_mut() {
            Some(c) => c,
            None => unreachable!("output sink is opened before writing"),
        };
        let line = rec.to_tsv_line();
        let w = sink.writer();
        w.write_all(line.as_bytes())
            .and_then(|_| w.write_all(b"\n"))
            .map_err(|source| WriteError::Io {
                path: path.clone(),
                source,
            })?;
        self.in_current += 1;
        self.records += 1;
        Ok(())
    }

    fn open_shard(&mut self) -> Result<(), WriteError> {
        if let OutputTarget::Sharded { dir, .. } = &self.target {
            let path = shard_path(dir, self.shards_done);
            debug!("opening shard {}", path.display());
            let sink = create_sink(&path)?;
            self.current = Some((path, sink));
        }
        Ok(())
    }

    fn close_current(&mut self) -> Result<(), WriteError> {
        if let Some((path, sink)) = self.current.take() {
            sink.finish()
                .map_err(|source| WriteError::Io { path, source })?;
            self.shards_done += 1;
            self.in_current = 0;
        }
        Ok(())
    }

    /// Records accepted so far.
    pub fn records_written(&self) -> usize {
        self.records
    }

    /// Flush and close the output. Returns `(records, files)` written.
    pub fn finish(mut self) -> Result<(usize, usize), WriteError> {
        self.close_current()?;
        Ok((self.records, self.shards_done))
    }
}
