//! Equity Series Analytics
//!
//! Trend and drawdown derived directly from the raw equity trajectory. These
//! are the "ground truth" shapes every reported number is compared against.
//!
//! # Trend Classification
//!
//! ```text
//! head = mean(first k rows), tail = mean(last k rows), k = max(1, ceil(n * fraction))
//! change = (tail - head) / |head|
//! change >  flat_threshold  => Rising
//! change < -flat_threshold  => Falling
//! otherwise                 => Flat
//! ```

use serde::{Deserialize, Serialize};

/// Qualitative direction of an equity curve or a return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Rising,
    Flat,
    Falling,
}

impl TrendDirection {
    /// Direction of a return, treating `|x| <= deadband` as flat.
    pub fn of_return(value: f64, deadband: f64) -> Self {
        if value > deadband {
            Self::Rising
        } else if value < -deadband {
            Self::Falling
        } else {
            Self::Flat
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rising => "rising",
            Self::Flat => "flat",
            Self::Falling => "falling",
        }
    }

    /// Parse a chart classification label ("up"/"down" are accepted aliases).
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "rising" | "up" | "upward" | "positive" => Some(Self::Rising),
            "flat" | "sideways" | "neutral" => Some(Self::Flat),
            "falling" | "down" | "downward" | "negative" => Some(Self::Falling),
            _ => None,
        }
    }
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify the direction of `values` by comparing head and tail means.
///
/// Empty input is Flat.
pub fn classify_trend(values: &[f64], window_fraction: f64, flat_threshold: f64) -> TrendDirection {
    if values.is_empty() {
        return TrendDirection::Flat;
    }
    let n = values.len();
    let k = ((n as f64 * window_fraction).ceil() as usize).clamp(1, n);

    let head = mean(&values[..k]);
    let tail = mean(&values[n - k..]);

    let change = if head.abs() > f64::EPSILON {
        (tail - head) / head.abs()
    } else {
        tail - head
    };

    TrendDirection::of_return(change, flat_threshold)
}

/// Maximum peak-to-trough drawdown as a positive fraction of the peak.
pub fn max_drawdown(values: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;
    for &v in values {
        if v > peak {
            peak = v;
        }
        if peak > 0.0 {
            let dd = (peak - v) / peak;
            if dd > worst {
                worst = dd;
            }
        }
    }
    worst
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Summary statistics of an equity trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquitySeriesSummary {
    pub rows: usize,
    pub first_equity: f64,
    pub final_equity: f64,
    pub peak_equity: f64,
    pub trough_equity: f64,
    /// Positive fraction, e.g. 0.12 = 12% drawdown.
    pub max_drawdown: f64,
    pub trend: TrendDirection,
}

impl EquitySeriesSummary {
    /// Summarize a non-empty trajectory; `None` when `values` is empty.
    pub fn from_values(values: &[f64], window_fraction: f64, flat_threshold: f64) -> Option<Self> {
        let first = *values.first()?;
        let last = *values.last()?;
        let peak = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let trough = values.iter().copied().fold(f64::INFINITY, f64::min);
        Some(Self {
            rows: values.len(),
            first_equity: first,
            final_equity: last,
            peak_equity: peak,
            trough_equity: trough,
            max_drawdown: max_drawdown(values),
            trend: classify_trend(values, window_fraction, flat_threshold),
        })
    }
}
