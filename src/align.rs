use std::ops::Range;
use thiserror::Error;

use crate::signal::RawSignalRead;
use crate::Strand;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AlignmentError {
    #[error("mapped region is empty")]
    EmptyRegion,
    #[error("{spans} base spans for a mapped region of {region} bases")]
    SpanCountMismatch { spans: usize, region: u64 },
    #[error("gap before base {index}: expected sample {expected}, span starts at {found}")]
    Gap {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("overlap at base {index}: expected sample {expected}, span starts at {found}")]
    Overlap {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("base {index} has no samples")]
    EmptySpan { index: usize },
    #[error("spans end at sample {end} but the raw signal has {len} samples")]
    SignalOutOfRange { end: usize, len: usize },
    #[error("sample offset of base {index} overflows")]
    SampleOverflow { index: usize },
}

/// A read whose event table has been checked against its mapped region.
#[derive(Debug, Clone)]
pub struct AlignedRead {
    pub read_id: String,
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub strand: Strand,
    /// Sample range of each base, in read order, indexing the oriented raw
    /// signal.
    pub base_ranges: Vec<Range<usize>>,
}

impl AlignedRead {
    pub fn len(&self) -> usize {
        self.base_ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base_ranges.is_empty()
    }

    /// Forward-strand reference position of the base at read index `i`.
    pub fn ref_pos(&self, i: usize) -> u64 {
        match self.strand {
            Strand::Forward => self.start + i as u64,
            Strand::Reverse => self.end - 1 - i as u64,
        }
    }

    /// Read index of forward-strand offset `off` within the mapped region.
    pub fn read_index(&self, off: usize) -> usize {
        match self.strand {
            Strand::Forward => off,
            Strand::Reverse => self.len() - 1 - off,
        }
    }

    /// Total number of samples attributed to bases.
    pub fn aligned_samples(&self) -> usize {
        self.base_ranges.iter().map(|r| r.len()).sum()
    }
}

/// Check that the span table of `read` exactly tiles its mapped region and
/// resolve the absolute sample range of every base.
///
/// Spans must be non-empty, contiguous (each starting where the previous one
/// ended, the first at relative sample 0) and lie within the raw signal.
pub fn align_read(read: &RawSignalRead) -> Result<AlignedRead, AlignmentError> {
    let region = read.mapped_len();
    if region == 0 {
        return Err(AlignmentError::EmptyRegion);
    }
    if read.spans.len() as u64 != region {
        return Err(AlignmentError::SpanCountMismatch {
            spans: read.spans.len(),
            region,
        });
    }

    let mut base_ranges = Vec::with_capacity(read.spans.len());
    let mut expected = 0usize;
    for (index, span) in read.spans.iter().enumerate() {
        if span.count == 0 {
            return Err(AlignmentError::EmptySpan { index });
        }
        if span.start > expected {
            return Err(AlignmentError::Gap {
                index,
                expected,
                found: span.start,
            });
        }
        if span.start < expected {
            return Err(AlignmentError::Overlap {
                index,
                expected,
                found: span.start,
            });
        }
        let abs_end = read
            .signal_start
            .checked_add(span.start)
            .and_then(|abs| abs.checked_add(span.count))
            .ok_or(AlignmentError::SampleOverflow { index })?;
        if abs_end > read.raw_signal.len() {
            return Err(AlignmentError::SignalOutOfRange {
                end: abs_end,
                len: read.raw_signal.len(),
            });
        }
        // abs_end bounds both sums below.
        base_ranges.push(read.signal_start + span.start..abs_end);
        expected = span.start + span.count;
    }

    Ok(AlignedRead {
        read_id: read.read_id.clone(),
        chrom: read.chrom.clone(),
        start: read.mapped_start,
        end: read.mapped_end,
        strand: read.strand,
        base_ranges,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::BaseSpan;
    use crate::SampleType;

    fn read_with(spans: &[(usize, usize)], signal_len: usize, start: u64, end: u64) -> RawSignalRead {
        RawSignalRead {
            read_id: "r".to_string(),
            raw_signal: vec![0; signal_len],
            signal_start: 2,
            spans: spans
                .iter()
                .map(|&(start, count)| BaseSpan {
                    base: b'A',
                    start,
                    count,
                })
                .collect(),
            chrom: "chr1".to_string(),
            mapped_start: start,
            mapped_end: end,
            strand: Strand::Forward,
            sample_type: SampleType::Dna,
        }
    }

    #[test]
    fn test_contiguous_spans_cover_signal() {
        let read = read_with(&[(0, 3), (3, 1), (4, 5)], 11, 100, 103);
        let aligned = align_read(&read).unwrap();
        assert_eq!(aligned.base_ranges, vec![2..5, 5..6, 6..11]);
        assert_eq!(aligned.aligned_samples(), 9);
    }

    #[test]
    fn test_rejects_incomplete_alignments() {
        assert_eq!(
            align_read(&read_with(&[(0, 3), (3, 1)], 20, 100, 103)).unwrap_err(),
            AlignmentError::SpanCountMismatch { spans: 2, region: 3 }
        );
        assert!(matches!(
            align_read(&read_with(&[(0, 3), (4, 1)], 20, 100, 102)),
            Err(AlignmentError::Gap { index: 1, .. })
        ));
        assert!(matches!(
            align_read(&read_with(&[(0, 3), (2, 1)], 20, 100, 102)),
            Err(AlignmentError::Overlap { index: 1, .. })
        ));
        assert!(matches!(
            align_read(&read_with(&[(0, 3), (3, 0)], 20, 100, 102)),
            Err(AlignmentError::EmptySpan { index: 1 })
        ));
        assert!(matches!(
            align_read(&read_with(&[(0, 3), (3, 8)], 12, 100, 102)),
            Err(AlignmentError::SignalOutOfRange { end: 13, len: 12 })
        ));
        assert_eq!(
            align_read(&read_with(&[], 5, 100, 100)).unwrap_err(),
            AlignmentError::EmptyRegion
        );
    }

    #[test]
    fn test_offset_overflow_is_rejected() {
        let mut read = read_with(&[(0, 3), (3, 1)], 20, 100, 102);
        read.signal_start = usize::MAX;
        assert_eq!(
            align_read(&read).unwrap_err(),
            AlignmentError::SampleOverflow { index: 0 }
        );

        let read = read_with(&[(0, usize::MAX), (usize::MAX, 1)], 20, 100, 102);
        assert_eq!(
            align_read(&read).unwrap_err(),
            AlignmentError::SampleOverflow { index: 0 }
        );
    }

    #[test]
    fn test_reverse_strand_coordinates() {
        let mut read = read_with(&[(0, 1), (1, 1), (2, 1)], 10, 50, 53);
        read.strand = Strand::Reverse;
        let aligned = align_read(&read).unwrap();
        assert_eq!(aligned.ref_pos(0), 52);
        assert_eq!(aligned.ref_pos(2), 50);
        assert_eq!(aligned.read_index(0), 2);
    }
}
