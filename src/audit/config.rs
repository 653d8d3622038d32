//! Audit configuration
//!
//! Tolerances, severity thresholds, and the on-disk artifact layout.
//! Every threshold is a documented default, never a hard constant; a run
//! can be re-audited under a stricter or looser policy by loading a TOML
//! file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading or validating an [`AuditConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level audit configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Whether the equity series already marks open positions to market.
    #[serde(default)]
    pub unrealized_convention: UnrealizedConvention,

    /// Numeric tolerances used by every check.
    #[serde(default)]
    pub tolerances: Tolerances,

    /// File names of the run artifacts inside a run directory.
    #[serde(default)]
    pub layout: ArtifactLayout,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            unrealized_convention: UnrealizedConvention::default(),
            tolerances: Tolerances::default(),
            layout: ArtifactLayout::default(),
        }
    }
}

impl AuditConfig {
    /// Load from a TOML file and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `AUDIT_CONFIG_PATH` (default `audit.toml`), falling back to defaults.
    pub fn from_env() -> Self {
        let path =
            std::env::var("AUDIT_CONFIG_PATH").unwrap_or_else(|_| "audit.toml".to_string());

        Self::load(&path).unwrap_or_else(|e| {
            tracing::debug!("Using default audit config ({}): {}", path, e);
            Self::default()
        })
    }

    /// Save to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Render as pretty TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject tolerances that would make the gate meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.tolerances;
        let non_negative = [
            ("tolerances.equity_abs", t.equity_abs),
            ("tolerances.equity_rel", t.equity_rel),
            ("tolerances.return_rel", t.return_rel),
            ("tolerances.return_abs", t.return_abs),
            ("tolerances.sign_deadband", t.sign_deadband),
            ("tolerances.flat_threshold", t.flat_threshold),
            ("tolerances.drawdown_abs", t.drawdown_abs),
        ];
        for (field, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be a finite non-negative number, got {}", value),
                });
            }
        }
        if !(t.trend_window_fraction > 0.0 && t.trend_window_fraction <= 0.5) {
            return Err(ConfigError::Invalid {
                field: "tolerances.trend_window_fraction",
                reason: format!("must be in (0, 0.5], got {}", t.trend_window_fraction),
            });
        }
        Ok(())
    }
}

/// Numeric tolerances.
///
/// Equity comparisons use `max(equity_abs, equity_rel * |value|)`.
/// Return-magnitude comparisons use `max(return_rel * |actual|, return_abs)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tolerances {
    /// Absolute equity tolerance in currency units.
    #[serde(default = "default_equity_abs")]
    pub equity_abs: f64,

    /// Relative equity tolerance.
    #[serde(default = "default_equity_rel")]
    pub equity_rel: f64,

    /// Relative tolerance on total return magnitude (fraction of actual).
    #[serde(default = "default_return_rel")]
    pub return_rel: f64,

    /// Absolute tolerance on total return magnitude (0.005 = 0.5pp).
    #[serde(default = "default_return_abs")]
    pub return_abs: f64,

    /// Returns within +/- this band count as flat for direction checks.
    #[serde(default = "default_sign_deadband")]
    pub sign_deadband: f64,

    /// Relative change between head and tail means below which a series is flat.
    #[serde(default = "default_flat_threshold")]
    pub flat_threshold: f64,

    /// Fraction of series rows averaged at each end for trend classification.
    #[serde(default = "default_trend_window_fraction")]
    pub trend_window_fraction: f64,

    /// Absolute tolerance on max drawdown (fraction, 0.01 = 1pp).
    #[serde(default = "default_drawdown_abs")]
    pub drawdown_abs: f64,

    /// Allowed difference between ledger and reported trade counts.
    #[serde(default)]
    pub trade_count_slack: u64,
}

fn default_equity_abs() -> f64 {
    0.01
}
fn default_equity_rel() -> f64 {
    1e-6
}
fn default_return_rel() -> f64 {
    0.10
}
fn default_return_abs() -> f64 {
    0.005
}
fn default_sign_deadband() -> f64 {
    0.001
}
fn default_flat_threshold() -> f64 {
    0.001
}
fn default_trend_window_fraction() -> f64 {
    0.10
}
fn default_drawdown_abs() -> f64 {
    0.01
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            equity_abs: default_equity_abs(),
            equity_rel: default_equity_rel(),
            return_rel: default_return_rel(),
            return_abs: default_return_abs(),
            sign_deadband: default_sign_deadband(),
            flat_threshold: default_flat_threshold(),
            trend_window_fraction: default_trend_window_fraction(),
            drawdown_abs: default_drawdown_abs(),
            trade_count_slack: 0,
        }
    }
}

/// Slack added to inclusive threshold comparisons so that a difference of
/// exactly the tolerance is not a finding.
pub const FLOAT_SLACK: f64 = 1e-9;

impl Tolerances {
    /// Tolerance for comparing two equity values around `reference`.
    pub fn equity_tolerance(&self, reference: f64) -> f64 {
        self.equity_abs.max(self.equity_rel * reference.abs())
    }

    /// Tolerance for comparing a reported return against `actual`.
    pub fn return_tolerance(&self, actual: f64) -> f64 {
        (self.return_rel * actual.abs()).max(self.return_abs)
    }

    /// `true` when `|a - b|` is within the equity tolerance around `b`.
    pub fn equity_agrees(&self, a: f64, b: f64) -> bool {
        (a - b).abs() <= self.equity_tolerance(b) + FLOAT_SLACK
    }
}

/// Sign convention for `unrealized_pnl` when adjusting the raw series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnrealizedConvention {
    /// The last equity row already includes open-position marks.
    #[default]
    IncludedInSeries,
    /// The series is cash-only; unrealized P&L must be added on top.
    ExcludedFromSeries,
}

impl UnrealizedConvention {
    /// Amount to add to the raw final series equity.
    pub fn series_adjustment(&self, unrealized_pnl: f64) -> f64 {
        match self {
            Self::IncludedInSeries => 0.0,
            Self::ExcludedFromSeries => unrealized_pnl,
        }
    }
}

/// File names inside `<base_dir>/<run_id>/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactLayout {
    #[serde(default = "default_manifest")]
    pub manifest: String,
    #[serde(default = "default_metrics")]
    pub metrics: String,
    #[serde(default = "default_trades")]
    pub trades: String,
    #[serde(default = "default_equity")]
    pub equity: String,
    #[serde(default = "default_events")]
    pub events: String,
    #[serde(default = "default_visualization")]
    pub visualization: String,
    #[serde(default = "default_portfolio")]
    pub portfolio: String,
    /// Name of the verdict document written next to the artifacts.
    #[serde(default = "default_verdict")]
    pub verdict: String,
}

fn default_manifest() -> String {
    "manifest.json".to_string()
}
fn default_metrics() -> String {
    "metrics.json".to_string()
}
fn default_trades() -> String {
    "trades.csv".to_string()
}
fn default_equity() -> String {
    "equity.csv".to_string()
}
fn default_events() -> String {
    "events.csv".to_string()
}
fn default_visualization() -> String {
    "visualization.json".to_string()
}
fn default_portfolio() -> String {
    "portfolio_state.json".to_string()
}
fn default_verdict() -> String {
    "quality_gate_verdict.json".to_string()
}

impl Default for ArtifactLayout {
    fn default() -> Self {
        Self {
            manifest: default_manifest(),
            metrics: default_metrics(),
            trades: default_trades(),
            equity: default_equity(),
            events: default_events(),
            visualization: default_visualization(),
            portfolio: default_portfolio(),
            verdict: default_verdict(),
        }
    }
}
