use log::debug;
use std::fmt::Write as _;

use crate::align::AlignedRead;
use crate::matcher::MotifMatcher;
use crate::positions::PositionFilter;
use crate::reference::{ReferenceError, ReferenceIndex};
use crate::Strand;

/// One motif site of one read, ready for the classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    pub chrom: String,
    /// 0-based forward-strand position of the modified base.
    pub pos: u64,
    pub strand: Strand,
    /// Position counted along `strand` (from the chromosome end for `-`).
    pub pos_in_strand: u64,
    pub read_id: String,
    /// `seq_len` bases in read orientation, centered on the site.
    pub kmer: String,
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
    pub counts: Vec<usize>,
    /// One window of exactly `signal_len` normalized samples per k-mer base.
    pub windows: Vec<Vec<f64>>,
    pub label: u8,
}

fn join_floats(values: &[f64]) -> String {
    let mut out = String::with_capacity(values.len() * 10);
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{:.6}", v);
    }
    out
}

impl FeatureRecord {
    /// Render the record as one tab-separated line (no trailing newline):
    /// `chrom pos strand pos_in_strand read_id kmer means stds counts windows label`.
    pub fn to_tsv_line(&self) -> String {
        let counts = self
            .counts
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let windows = self
            .windows
            .iter()
            .map(|w| join_floats(w))
            .collect::<Vec<_>>()
            .join(";");
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.chrom,
            self.pos,
            self.strand,
            self.pos_in_strand,
            self.read_id,
            self.kmer,
            join_floats(&self.means),
            join_floats(&self.stds),
            counts,
            windows,
            self.label
        )
    }
}

/// Mean and population standard deviation of a non-empty slice.
fn mean_std(samples: &[f64]) -> (f64, f64) {
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let var = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Fit a base's samples into exactly `width` values.
///
/// Longer spans keep the centered slice starting at `(n - width) / 2`; shorter
/// spans are centered and padded with copies of their first sample on the left
/// (`(width - n) / 2` of them) and of their last sample on the right.
pub fn signal_window(samples: &[f64], width: usize) -> Vec<f64> {
    let n = samples.len();
    if n >= width {
        let start = (n - width) / 2;
        return samples[start..start + width].to_vec();
    }
    let (first, last) = match (samples.first(), samples.last()) {
        (Some(f), Some(l)) => (*f, *l),
        _ => return vec![0.0; width],
    };
    let left = (width - n) / 2;
    let right = width - n - left;
    let mut out = Vec::with_capacity(width);
    out.extend(std::iter::repeat(first).take(left));
    out.extend_from_slice(samples);
    out.extend(std::iter::repeat(last).take(right));
    out
}

/// Turns aligned, normalized reads into feature records. Holds only shared
/// read-only data, so one builder serves every worker.
pub struct FeatureBuilder<'a> {
    reference: &'a ReferenceIndex,
    matcher: &'a MotifMatcher,
    filter: Option<&'a PositionFilter>,
    seq_len: usize,
    signal_len: usize,
    label: u8,
}

impl<'a> FeatureBuilder<'a> {
    pub fn new(
        reference: &'a ReferenceIndex,
        matcher: &'a MotifMatcher,
        filter: Option<&'a PositionFilter>,
        seq_len: usize,
        signal_len: usize,
        label: u8,
    ) -> Self {
        debug_assert!(seq_len % 2 == 1, "k-mer length must be odd");
        Self {
            reference,
            matcher,
            filter,
            seq_len,
            signal_len,
            label,
        }
    }

    /// Build the records of every usable motif site on `read`, in read order.
    ///
    /// `signal` is the normalized, oriented raw signal the read's base ranges
    /// index into. Sites whose k-mer would cross a chromosome end or the
    /// aligned region are dropped; a read mapped outside the reference is an
    /// error.
    pub fn build(&self, read: &AlignedRead, signal: &[f64]) -> Result<Vec<FeatureRecord>, ReferenceError> {
        let region = self.reference.region(&read.chrom, read.start, read.end)?;
        let chrom_len = region_chrom_len(self.reference, &read.chrom)?;
        let half = self.seq_len / 2;
        let n = read.len();

        let mut offsets: Vec<usize> = self.matcher.scan(region, read.strand).collect();
        if read.strand == Strand::Reverse {
            offsets.reverse();
        }

        let mut records = Vec::new();
        for off in offsets {
            let pos = read.start + off as u64;
            if let Some(filter) = self.filter {
                if !filter.contains(&read.chrom, pos, read.strand) {
                    continue;
                }
            }

            let kmer = match self.reference.window(&read.chrom, pos, half as u64, read.strand) {
                Some(k) => k,
                None => {
                    debug!(
                        "read {}: site {}:{} too close to chromosome end",
                        read.read_id, read.chrom, pos
                    );
                    continue;
                }
            };

            let i = read.read_index(off);
            if i < half || i + half >= n {
                debug!(
                    "read {}: site {}:{} k-mer exceeds aligned region",
                    read.read_id, read.chrom, pos
                );
                continue;
            }

            let ranges = &read.base_ranges[i - half..=i + half];
            let mut means = Vec::with_capacity(self.seq_len);
            let mut stds = Vec::with_capacity(self.seq_len);
            let mut counts = Vec::with_capacity(self.seq_len);
            let mut windows = Vec::with_capacity(self.seq_len);
            for range in ranges {
                let samples = &signal[range.clone()];
                let (mean, std) = mean_std(samples);
                means.push(mean);
                stds.push(std);
                counts.push(samples.len());
                windows.push(signal_window(samples, self.signal_len));
            }

            records.push(FeatureRecord {
                chrom: read.chrom.clone(),
                pos,
                strand: read.strand,
                pos_in_strand: match read.strand {
                    Strand::Forward => pos,
                    Strand::Reverse => chrom_len - 1 - pos,
                },
                read_id: read.read_id.clone(),
                kmer: String::from_utf8_lossy(&kmer).into_owned(),
                means,
                stds,
                counts,
                windows,
                label: self.label,
            });
        }
        Ok(records)
    }
}

fn region_chrom_len(reference: &ReferenceIndex, chrom: &str) -> Result<u64, ReferenceError> {
    reference
        .chrom_len(chrom)
        .ok_or_else(|| ReferenceError::UnknownChromosome(chrom.to_string()))
}
