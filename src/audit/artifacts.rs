//! Run Artifact Data Model
//!
//! Normalized, typed records for every artifact a simulation run produces.
//! A [`RunArtifacts`] bundle is immutable once constructed and can only be
//! built through [`RunArtifacts::new`], which enforces the equity-series and
//! initial-capital invariants.
//!
//! # Invariants
//!
//! 1. The equity series is non-empty.
//! 2. Equity timestamps are strictly increasing.
//! 3. Every numeric field is finite.
//! 4. Initial capital resolves to a positive value from the manifest, the
//!    manifest parameters, or the metrics accounting section (in that order).

use crate::audit::config::UnrealizedConvention;
use crate::audit::series::{classify_trend, TrendDirection};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// =============================================================================
// ARTIFACT KIND
// =============================================================================

/// Identifies one artifact of a run; used to attribute discrepancies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Manifest,
    Metrics,
    TradeLedger,
    EquitySeries,
    EventLog,
    Visualization,
    PortfolioState,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manifest => "manifest",
            Self::Metrics => "metrics",
            Self::TradeLedger => "trade_ledger",
            Self::EquitySeries => "equity_series",
            Self::EventLog => "event_log",
            Self::Visualization => "visualization",
            Self::PortfolioState => "portfolio_state",
        }
    }

    /// Required artifacts abort validation when missing.
    pub fn is_required(&self) -> bool {
        matches!(
            self,
            Self::Manifest | Self::Metrics | Self::TradeLedger | Self::EquitySeries
        )
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// TIMESTAMPS
// =============================================================================

/// Parse an artifact timestamp into UTC.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.f]`, `YYYY-MM-DDTHH:MM:SS[.f]`
/// and bare dates (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    Err(format!("unrecognized timestamp '{}'", raw))
}

// =============================================================================
// MANIFEST
// =============================================================================

/// Run parameter manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub strategy: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub universe: Vec<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub initial_capital: Option<f64>,
}

impl RunManifest {
    /// Initial capital declared in the manifest or its parameters.
    pub fn declared_initial_capital(&self) -> Option<f64> {
        self.initial_capital.or_else(|| {
            self.parameters
                .get("initial_capital")
                .and_then(|v| v.as_f64())
        })
    }
}

// =============================================================================
// METRICS DOCUMENT
// =============================================================================

/// Reported metrics document. Absent numbers stay `None`, never zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsDoc {
    #[serde(default)]
    pub performance: PerformanceMetrics,
    #[serde(default)]
    pub risk: RiskMetrics,
    #[serde(default)]
    pub execution: ExecutionMetrics,
    #[serde(default)]
    pub accounting: AccountingMetrics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return: Option<f64>,
    pub cagr: Option<f64>,
    pub sharpe_ratio: Option<f64>,
    pub sortino_ratio: Option<f64>,
    pub max_drawdown: Option<f64>,
    pub win_rate: Option<f64>,
    pub profit_factor: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub volatility: Option<f64>,
    pub var_95: Option<f64>,
    pub cvar_95: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub total_trades: Option<u64>,
    pub winning_trades: Option<u64>,
    pub losing_trades: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountingMetrics {
    pub initial_capital: Option<f64>,
    pub final_equity: Option<f64>,
    /// Gross realized P&L (before fees).
    pub total_pnl: Option<f64>,
    pub total_fees: Option<f64>,
    pub unrealized_pnl: Option<f64>,
    pub open_positions: Option<u64>,
}

// =============================================================================
// TRADE LEDGER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "buy" | "b" | "long" => Some(Self::Buy),
            "sell" | "s" | "short" => Some(Self::Sell),
            _ => None,
        }
    }

    /// +1 for buys, -1 for sells.
    pub fn sign(&self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }
}

/// One executed trade. `pnl` is realized P&L before fees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
    pub fee: f64,
    pub pnl: f64,
}

// =============================================================================
// EQUITY SERIES
// =============================================================================

/// One period of the equity time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityRow {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub drawdown: Option<f64>,
    pub returns: Option<f64>,
    /// Open-position count at the end of the period.
    pub positions: u32,
    pub exposure: Option<f64>,
}

// =============================================================================
// EVENT LOG
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub description: String,
}

// =============================================================================
// VISUALIZATION SUMMARY
// =============================================================================

/// Summary of the rendered equity chart.
///
/// Either carries the qualitative classification the chart pipeline assigned,
/// or the raw plotted points from which one is derived.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualizationSummary {
    #[serde(default)]
    pub trend: Option<TrendDirection>,
    #[serde(default)]
    pub figures: Vec<String>,
    #[serde(default)]
    pub equity_points: Vec<f64>,
}

impl VisualizationSummary {
    /// The trend the chart claims: explicit label first, else derived from points.
    pub fn claimed_trend(&self, window_fraction: f64, flat_threshold: f64) -> Option<TrendDirection> {
        if let Some(trend) = self.trend {
            return Some(trend);
        }
        if self.equity_points.is_empty() {
            return None;
        }
        Some(classify_trend(&self.equity_points, window_fraction, flat_threshold))
    }
}

// =============================================================================
// PORTFOLIO STATE
// =============================================================================

/// Final portfolio snapshot written by the simulator's portfolio component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    #[serde(default)]
    pub final_equity: Option<f64>,
    #[serde(default)]
    pub cash: Option<f64>,
    #[serde(default)]
    pub positions: Vec<PortfolioPosition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioPosition {
    pub symbol: String,
    /// Signed quantity (negative = short).
    pub quantity: f64,
    #[serde(default)]
    pub average_price: Option<f64>,
    #[serde(default)]
    pub last_price: Option<f64>,
    #[serde(default)]
    pub unrealized_pnl: Option<f64>,
}

// =============================================================================
// FINGERPRINT
// =============================================================================

/// SHA-256 digests of the raw artifact bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFingerprint {
    /// Artifact name -> hex digest.
    pub artifacts: BTreeMap<String, String>,
    /// Digest over the sorted `(name, digest)` pairs.
    pub combined: String,
}

impl ArtifactFingerprint {
    pub fn from_digests(artifacts: BTreeMap<String, String>) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        for (name, digest) in &artifacts {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(digest.as_bytes());
            hasher.update(b"\n");
        }
        Self {
            artifacts,
            combined: hex::encode(hasher.finalize()),
        }
    }
}

// =============================================================================
// RUN ARTIFACTS BUNDLE
// =============================================================================

/// Violation of a bundle invariant.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArtifactInvariantError {
    #[error("equity series is empty")]
    EmptyEquitySeries,

    #[error("equity timestamps not strictly increasing at row {row}: {current} <= {previous}")]
    NonMonotonicEquity {
        row: usize,
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    #[error("non-finite {field} in {artifact} at row {row}")]
    NonFinite {
        artifact: ArtifactKind,
        field: &'static str,
        row: usize,
    },

    #[error("negative quantity {quantity} in trade ledger at row {row}")]
    NegativeQuantity { row: usize, quantity: f64 },

    #[error("initial capital is missing from manifest, parameters and metrics accounting")]
    MissingInitialCapital,

    #[error("initial capital must be positive, got {0}")]
    NonPositiveInitialCapital(f64),
}

impl ArtifactInvariantError {
    /// The artifact the violation belongs to.
    pub fn artifact(&self) -> ArtifactKind {
        match self {
            Self::EmptyEquitySeries | Self::NonMonotonicEquity { .. } => ArtifactKind::EquitySeries,
            Self::NonFinite { artifact, .. } => *artifact,
            Self::NegativeQuantity { .. } => ArtifactKind::TradeLedger,
            Self::MissingInitialCapital | Self::NonPositiveInitialCapital(_) => {
                ArtifactKind::Manifest
            }
        }
    }
}

/// Immutable bundle of everything one run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunArtifacts {
    manifest: RunManifest,
    metrics: MetricsDoc,
    trades: Vec<TradeRecord>,
    equity: Vec<EquityRow>,
    events: Option<Vec<EventRecord>>,
    visualization: Option<VisualizationSummary>,
    portfolio: Option<PortfolioState>,
    initial_capital: f64,
    fingerprint: ArtifactFingerprint,
}

impl RunArtifacts {
    /// Build a bundle from the required artifacts, enforcing invariants.
    pub fn new(
        manifest: RunManifest,
        metrics: MetricsDoc,
        trades: Vec<TradeRecord>,
        equity: Vec<EquityRow>,
    ) -> Result<Self, ArtifactInvariantError> {
        if equity.is_empty() {
            return Err(ArtifactInvariantError::EmptyEquitySeries);
        }
        for (i, row) in equity.iter().enumerate() {
            if !row.equity.is_finite() {
                return Err(ArtifactInvariantError::NonFinite {
                    artifact: ArtifactKind::EquitySeries,
                    field: "equity",
                    row: i,
                });
            }
            if i > 0 && row.timestamp <= equity[i - 1].timestamp {
                return Err(ArtifactInvariantError::NonMonotonicEquity {
                    row: i,
                    previous: equity[i - 1].timestamp,
                    current: row.timestamp,
                });
            }
        }
        for (i, trade) in trades.iter().enumerate() {
            for (field, value) in [
                ("quantity", trade.quantity),
                ("price", trade.price),
                ("fee", trade.fee),
                ("pnl", trade.pnl),
            ] {
                if !value.is_finite() {
                    return Err(ArtifactInvariantError::NonFinite {
                        artifact: ArtifactKind::TradeLedger,
                        field,
                        row: i,
                    });
                }
            }
            if trade.quantity < 0.0 {
                return Err(ArtifactInvariantError::NegativeQuantity {
                    row: i,
                    quantity: trade.quantity,
                });
            }
        }

        let initial_capital = manifest
            .declared_initial_capital()
            .or(metrics.accounting.initial_capital)
            .ok_or(ArtifactInvariantError::MissingInitialCapital)?;
        if !(initial_capital.is_finite() && initial_capital > 0.0) {
            return Err(ArtifactInvariantError::NonPositiveInitialCapital(initial_capital));
        }

        Ok(Self {
            manifest,
            metrics,
            trades,
            equity,
            events: None,
            visualization: None,
            portfolio: None,
            initial_capital,
            fingerprint: ArtifactFingerprint::default(),
        })
    }

    pub fn with_events(mut self, events: Vec<EventRecord>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_visualization(mut self, visualization: VisualizationSummary) -> Self {
        self.visualization = Some(visualization);
        self
    }

    pub fn with_portfolio(mut self, portfolio: PortfolioState) -> Self {
        self.portfolio = Some(portfolio);
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: ArtifactFingerprint) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.manifest.run_id
    }

    pub fn manifest(&self) -> &RunManifest {
        &self.manifest
    }

    pub fn metrics(&self) -> &MetricsDoc {
        &self.metrics
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn equity(&self) -> &[EquityRow] {
        &self.equity
    }

    pub fn events(&self) -> Option<&[EventRecord]> {
        self.events.as_deref()
    }

    pub fn visualization(&self) -> Option<&VisualizationSummary> {
        self.visualization.as_ref()
    }

    pub fn portfolio(&self) -> Option<&PortfolioState> {
        self.portfolio.as_ref()
    }

    pub fn fingerprint(&self) -> &ArtifactFingerprint {
        &self.fingerprint
    }

    /// Resolved initial capital (always positive).
    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    /// Last equity row: the authoritative raw final state.
    pub fn final_row(&self) -> &EquityRow {
        // Non-empty by construction.
        &self.equity[self.equity.len() - 1]
    }

    /// Equity values in chronological order.
    pub fn equity_values(&self) -> Vec<f64> {
        self.equity.iter().map(|r| r.equity).collect()
    }

    /// Sum of realized P&L over the ledger.
    pub fn realized_pnl(&self) -> f64 {
        self.trades.iter().map(|t| t.pnl).sum()
    }

    /// Sum of fees over the ledger.
    pub fn total_fees(&self) -> f64 {
        self.trades.iter().map(|t| t.fee).sum()
    }

    /// Top-down final equity: last series row, plus reported unrealized P&L
    /// when the series is cash-only.
    pub fn adjusted_final_equity(&self, convention: UnrealizedConvention) -> f64 {
        let unrealized = self.metrics.accounting.unrealized_pnl.unwrap_or(0.0);
        self.final_row().equity + convention.series_adjustment(unrealized)
    }
}
