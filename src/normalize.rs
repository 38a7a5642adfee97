use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Consistency constant turning a MAD into a standard-deviation estimate for
/// normally distributed data.
pub const MAD_SCALE: f64 = 1.4826;

/// Scales at or below this value mark a read as degenerate.
pub const MIN_SCALE: f64 = 1e-6;

#[derive(Debug, Error, PartialEq)]
#[error("degenerate signal: {method} scale {scale} over {samples} samples")]
pub struct DegenerateSignalError {
    pub method: NormalizeMethod,
    pub scale: f64,
    pub samples: usize,
}

/// Read-level signal rescaling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum NormalizeMethod {
    /// Median / median absolute deviation
    #[default]
    Mad,
    /// Mean / standard deviation
    Zscore,
}

impl fmt::Display for NormalizeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizeMethod::Mad => write!(f, "mad"),
            NormalizeMethod::Zscore => write!(f, "zscore"),
        }
    }
}

impl FromStr for NormalizeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mad" => Ok(NormalizeMethod::Mad),
            "zscore" => Ok(NormalizeMethod::Zscore),
            other => Err(format!("unknown normalization method '{}'", other)),
        }
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

impl NormalizeMethod {
    /// Return `(shift, scale)` for `signal`.
    fn shift_scale(self, signal: &[i16]) -> (f64, f64) {
        let mut values: Vec<f64> = signal.iter().map(|&s| f64::from(s)).collect();
        match self {
            NormalizeMethod::Mad => {
                let shift = median(&mut values);
                for v in values.iter_mut() {
                    *v = (*v - shift).abs();
                }
                (shift, MAD_SCALE * median(&mut values))
            }
            NormalizeMethod::Zscore => {
                let n = values.len() as f64;
                let mean = values.iter().sum::<f64>() / n;
                let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                (mean, var.sqrt())
            }
        }
    }

    /// Rescale a whole read's signal. The input is left untouched.
    pub fn normalize(self, signal: &[i16]) -> Result<Vec<f64>, DegenerateSignalError> {
        if signal.is_empty() {
            return Err(DegenerateSignalError {
                method: self,
                scale: 0.0,
                samples: 0,
            });
        }
        let (shift, scale) = self.shift_scale(signal);
        if !scale.is_finite() || scale <= MIN_SCALE {
            return Err(DegenerateSignalError {
                method: self,
                scale,
                samples: signal.len(),
            });
        }
        Ok(signal
            .iter()
            .map(|&s| (f64::from(s) - shift) / scale)
            .collect())
    }
}
