pub mod align;
pub mod config;
pub mod features;
pub mod files;
pub mod io;
pub mod matcher;
pub mod normalize;
pub mod positions;
pub mod processing;
pub mod reference;
pub mod signal;

use std::fmt;
use std::str::FromStr;

/// Strand of a mapped read or a genomic position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strand {
    Forward,
    Reverse,
}

impl Strand {
    pub fn as_char(self) -> char {
        match self {
            Strand::Forward => '+',
            Strand::Reverse => '-',
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl FromStr for Strand {
    type Err = String;

    /// Accepts `+`/`-` as well as the tombo-style `1`/`-1`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "+" | "1" => Ok(Strand::Forward),
            "-" | "-1" => Ok(Strand::Reverse),
            other => Err(format!("invalid strand '{}'", other)),
        }
    }
}

/// Molecule type of the sequenced sample. RNA reads are sequenced 3'->5', so
/// their raw signal runs opposite to the base order of the corrected events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleType {
    #[default]
    Dna,
    Rna,
}
