use thiserror::Error;

use crate::Strand;

const BASE_A: u8 = 0b0001;
const BASE_C: u8 = 0b0010;
const BASE_G: u8 = 0b0100;
const BASE_T: u8 = 0b1000;

/// Build the IUPAC symbol table: each byte maps to the set of concrete bases it
/// stands for, packed as a 4-bit mask. Bytes outside the alphabet map to 0.
const fn build_iupac_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let symbols: [(u8, u8); 16] = [
        (b'A', BASE_A),
        (b'C', BASE_C),
        (b'G', BASE_G),
        (b'T', BASE_T),
        (b'U', BASE_T),
        (b'M', BASE_A | BASE_C),
        (b'R', BASE_A | BASE_G),
        (b'W', BASE_A | BASE_T),
        (b'S', BASE_C | BASE_G),
        (b'Y', BASE_C | BASE_T),
        (b'K', BASE_G | BASE_T),
        (b'V', BASE_A | BASE_C | BASE_G),
        (b'H', BASE_A | BASE_C | BASE_T),
        (b'D', BASE_A | BASE_G | BASE_T),
        (b'B', BASE_C | BASE_G | BASE_T),
        (b'N', BASE_A | BASE_C | BASE_G | BASE_T),
    ];
    let mut i = 0;
    while i < symbols.len() {
        let (sym, mask) = symbols[i];
        table[sym as usize] = mask;
        table[sym.to_ascii_lowercase() as usize] = mask;
        i += 1;
    }
    table
}

/// Sequence-side table: only concrete bases carry a mask, so an `N` in the
/// scanned sequence never satisfies any motif symbol.
const fn build_base_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let bases: [(u8, u8); 5] = [
        (b'A', BASE_A),
        (b'C', BASE_C),
        (b'G', BASE_G),
        (b'T', BASE_T),
        (b'U', BASE_T),
    ];
    let mut i = 0;
    while i < bases.len() {
        let (sym, mask) = bases[i];
        table[sym as usize] = mask;
        table[sym.to_ascii_lowercase() as usize] = mask;
        i += 1;
    }
    table
}

static IUPAC_MASKS: [u8; 256] = build_iupac_table();
static BASE_MASKS: [u8; 256] = build_base_table();

/// Swap A<->T and C<->G inside a base-set mask.
#[inline(always)]
fn complement_mask(m: u8) -> u8 {
    ((m & BASE_A) << 3) | ((m & BASE_T) >> 3) | ((m & BASE_C) << 1) | ((m & BASE_G) >> 1)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MotifConfigError {
    #[error("no motifs given")]
    Empty,
    #[error("motif '{motif}' contains non-IUPAC symbol '{symbol}'")]
    InvalidSymbol { motif: String, symbol: char },
    #[error("modification offset {offset} is outside motif '{motif}' (length {len})")]
    OffsetOutOfRange {
        motif: String,
        offset: usize,
        len: usize,
    },
    #[error("motif '{motif}' has unparsable offset '{raw}'")]
    InvalidOffset { motif: String, raw: String },
    #[error(
        "motifs must share one modification offset: '{first}' uses {first_offset}, '{other}' uses {other_offset}"
    )]
    InconsistentOffsets {
        first: String,
        first_offset: usize,
        other: String,
        other_offset: usize,
    },
}

#[derive(Debug, Clone)]
struct CompiledMotif {
    pattern: String,
    /// Per-position base sets for the forward motif.
    fwd: Vec<u8>,
    /// Per-position base sets for the reverse complement, in forward order.
    rev: Vec<u8>,
}

impl CompiledMotif {
    fn len(&self) -> usize {
        self.fwd.len()
    }

    #[inline]
    fn matches_at(masks: &[u8], seq: &[u8], start: usize) -> bool {
        masks
            .iter()
            .zip(&seq[start..start + masks.len()])
            .all(|(m, b)| m & BASE_MASKS[*b as usize] != 0)
    }
}

/// Precompiled set of IUPAC motifs sharing one modification offset.
///
/// The matcher is immutable after construction and can be shared across
/// worker threads by reference.
#[derive(Debug, Clone)]
pub struct MotifMatcher {
    motifs: Vec<CompiledMotif>,
    offset: usize,
}

impl MotifMatcher {
    /// Parse a comma-separated motif list (e.g. `CG,CHG`) using `mod_loc` as the
    /// modification offset. Individual entries may carry their own offset as
    /// `PATTERN:OFFSET`; all offsets must agree.
    pub fn parse(list: &str, mod_loc: usize) -> Result<Self, MotifConfigError> {
        let mut specs = Vec::new();
        for entry in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match entry.split_once(':') {
                Some((motif, raw)) => {
                    let offset = raw.trim().parse::<usize>().map_err(|_| {
                        MotifConfigError::InvalidOffset {
                            motif: motif.to_string(),
                            raw: raw.to_string(),
                        }
                    })?;
                    specs.push((motif.trim().to_string(), offset));
                }
                None => specs.push((entry.to_string(), mod_loc)),
            }
        }
        Self::compile(&specs)
    }

    /// Compile explicit `(pattern, offset)` pairs.
    pub fn compile<S: AsRef<str>>(specs: &[(S, usize)]) -> Result<Self, MotifConfigError> {
        let (first, first_offset) = match specs.first() {
            Some((m, o)) => (m.as_ref(), *o),
            None => return Err(MotifConfigError::Empty),
        };

        let mut motifs: Vec<CompiledMotif> = Vec::with_capacity(specs.len());
        for (motif, offset) in specs {
            let motif = motif.as_ref();
            if *offset != first_offset {
                return Err(MotifConfigError::InconsistentOffsets {
                    first: first.to_string(),
                    first_offset,
                    other: motif.to_string(),
                    other_offset: *offset,
                });
            }
            if motif.is_empty() {
                return Err(MotifConfigError::Empty);
            }

            let pattern = motif.to_ascii_uppercase();
            let fwd = pattern
                .chars()
                .map(|c| {
                    let mask = if c.is_ascii() { IUPAC_MASKS[c as usize] } else { 0 };
                    if mask == 0 {
                        Err(MotifConfigError::InvalidSymbol {
                            motif: motif.to_string(),
                            symbol: c,
                        })
                    } else {
                        Ok(mask)
                    }
                })
                .collect::<Result<Vec<u8>, _>>()?;

            if *offset >= fwd.len() {
                return Err(MotifConfigError::OffsetOutOfRange {
                    motif: motif.to_string(),
                    offset: *offset,
                    len: fwd.len(),
                });
            }

            if motifs.iter().any(|m| m.pattern == pattern) {
                continue;
            }
            let rev = fwd.iter().rev().map(|m| complement_mask(*m)).collect();
            motifs.push(CompiledMotif { pattern, fwd, rev });
        }

        Ok(Self {
            motifs,
            offset: first_offset,
        })
    }

    /// The shared 0-based modification offset within each motif.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The (uppercased, deduplicated) motif patterns in input order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.motifs.iter().map(|m| m.pattern.as_str())
    }

    /// Whether any motif places its modified base at `site` of `seq` on `strand`.
    ///
    /// `seq` is always the forward-strand sequence. On the reverse strand the
    /// motif is read as its reverse complement, so the modified base sits
    /// `len - 1 - offset` bases into the forward window.
    pub fn matches_site(&self, seq: &[u8], site: usize, strand: Strand) -> bool {
        self.motifs.iter().any(|m| {
            let lead = match strand {
                Strand::Forward => self.offset,
                Strand::Reverse => m.len() - 1 - self.offset,
            };
            if site < lead {
                return false;
            }
            let start = site - lead;
            if start + m.len() > seq.len() {
                return false;
            }
            let masks = match strand {
                Strand::Forward => &m.fwd,
                Strand::Reverse => &m.rev,
            };
            CompiledMotif::matches_at(masks, seq, start)
        })
    }

    /// Lazily yield every 0-based forward-strand offset in `seq` whose base is
    /// the modified base of a motif match on `strand`. Offsets are ascending
    /// and unique even when several motifs hit the same site.
    pub fn scan<'a>(&'a self, seq: &'a [u8], strand: Strand) -> Scan<'a> {
        Scan {
            matcher: self,
            seq,
            strand,
            site: 0,
        }
    }
}

/// Iterator returned by [`MotifMatcher::scan`].
pub struct Scan<'a> {
    matcher: &'a MotifMatcher,
    seq: &'a [u8],
    strand: Strand,
    site: usize,
}

impl Iterator for Scan<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.site < self.seq.len() {
            let site = self.site;
            self.site += 1;
            if self.matcher.matches_site(self.seq, site, self.strand) {
                return Some(site);
            }
        }
        None
    }
}
