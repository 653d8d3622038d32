//! Cross-Validation Matrix Builder
//!
//! Triangulates final-state quantities across independently produced
//! artifacts. Every comparison is recorded whether or not it agrees, so the
//! verdict document shows what was checked as well as what failed.
//!
//! # Severity Policy
//!
//! | Key                                  | Disagreement                         |
//! |--------------------------------------|--------------------------------------|
//! | `series_vs_portfolio_final_equity`   | critical `AccountingMismatch`        |
//! | `series_trend_vs_return_direction`   | critical `ReturnDirectionMismatch`   |
//! | `visualization_vs_series_trend`      | critical `ReturnDirectionMismatch`   |
//! | `ledger_vs_metrics_*`, drawdown, IC  | warning `ToleranceWarning`           |
//! | `event_log_within_run_window`        | warning `EventLogAnomaly`            |
//! | `series_vs_metrics_final_equity`     | recorded only                        |
//! | `return_direction_match`             | recorded only                        |

use crate::audit::accounting::reported_return;
use crate::audit::artifacts::{ArtifactKind, EventRecord, RunArtifacts, RunManifest};
use crate::audit::config::{AuditConfig, Tolerances, UnrealizedConvention, FLOAT_SLACK};
use crate::audit::discrepancy::{CheckOutcome, Discrepancy, DiscrepancyCategory};
use crate::audit::series::{classify_trend, max_drawdown, TrendDirection};
use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Comparison keys, in the order the builder evaluates them.
pub mod keys {
    pub const SERIES_VS_PORTFOLIO_FINAL_EQUITY: &str = "series_vs_portfolio_final_equity";
    pub const SERIES_VS_METRICS_FINAL_EQUITY: &str = "series_vs_metrics_final_equity";
    pub const RETURN_DIRECTION_MATCH: &str = "return_direction_match";
    pub const SERIES_TREND_VS_RETURN_DIRECTION: &str = "series_trend_vs_return_direction";
    pub const VISUALIZATION_VS_SERIES_TREND: &str = "visualization_vs_series_trend";
    pub const LEDGER_VS_METRICS_TRADE_COUNT: &str = "ledger_vs_metrics_trade_count";
    pub const LEDGER_VS_METRICS_TOTAL_FEES: &str = "ledger_vs_metrics_total_fees";
    pub const LEDGER_VS_METRICS_REALIZED_PNL: &str = "ledger_vs_metrics_realized_pnl";
    pub const SERIES_VS_METRICS_MAX_DRAWDOWN: &str = "series_vs_metrics_max_drawdown";
    pub const MANIFEST_VS_METRICS_INITIAL_CAPITAL: &str = "manifest_vs_metrics_initial_capital";
    pub const EVENT_LOG_WITHIN_RUN_WINDOW: &str = "event_log_within_run_window";
}

/// A value as observed in one artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Observed {
    Count(u64),
    Amount(f64),
    Label(String),
}

impl std::fmt::Display for Observed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Count(n) => write!(f, "{}", n),
            Self::Amount(v) => write!(f, "{:.4}", v),
            Self::Label(s) => f.write_str(s),
        }
    }
}

impl From<TrendDirection> for Observed {
    fn from(direction: TrendDirection) -> Self {
        Self::Label(direction.as_str().to_string())
    }
}

/// One pairwise comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    /// `[left source, right source]`.
    pub sources: Vec<ArtifactKind>,
    pub left: Observed,
    pub right: Observed,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
    pub agrees: bool,
}

impl Comparison {
    fn numeric(left: (ArtifactKind, f64), right: (ArtifactKind, f64), tolerance: f64) -> Self {
        let delta = left.1 - right.1;
        Self {
            sources: vec![left.0, right.0],
            left: Observed::Amount(left.1),
            right: Observed::Amount(right.1),
            delta: Some(delta),
            tolerance: Some(tolerance),
            agrees: delta.abs() <= tolerance + FLOAT_SLACK,
        }
    }

    fn labels(
        left: (ArtifactKind, TrendDirection),
        right: (ArtifactKind, TrendDirection),
    ) -> Self {
        Self {
            sources: vec![left.0, right.0],
            left: left.1.into(),
            right: right.1.into(),
            delta: None,
            tolerance: None,
            agrees: left.1 == right.1,
        }
    }
}

/// Ordered map of comparison key to comparison record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CrossValidationMatrix {
    comparisons: BTreeMap<String, Comparison>,
}

impl CrossValidationMatrix {
    pub fn get(&self, key: &str) -> Option<&Comparison> {
        self.comparisons.get(key)
    }

    pub fn len(&self) -> usize {
        self.comparisons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comparisons.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Comparison)> {
        self.comparisons.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Keys whose sources disagree.
    pub fn disagreements(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, c)| !c.agrees)
            .map(|(k, _)| k)
            .collect()
    }

    fn record(&mut self, key: &str, comparison: Comparison) -> &Comparison {
        self.comparisons.insert(key.to_string(), comparison);
        &self.comparisons[key]
    }
}

/// Builds the matrix and raises the findings each key owns.
pub struct CrossValidationBuilder<'a> {
    tolerances: &'a Tolerances,
    convention: UnrealizedConvention,
}

impl<'a> CrossValidationBuilder<'a> {
    pub fn new(config: &'a AuditConfig) -> Self {
        Self {
            tolerances: &config.tolerances,
            convention: config.unrealized_convention,
        }
    }

    pub fn build(&self, artifacts: &RunArtifacts) -> CheckOutcome<CrossValidationMatrix> {
        let t = self.tolerances;
        let mut matrix = CrossValidationMatrix::default();
        let mut out = Vec::new();

        let metrics = artifacts.metrics();
        let final_equity = artifacts.adjusted_final_equity(self.convention);
        let equity_values = artifacts.equity_values();
        let actual_return = final_equity / artifacts.initial_capital() - 1.0;
        let actual_direction = TrendDirection::of_return(actual_return, t.sign_deadband);
        let series_trend = classify_trend(&equity_values, t.trend_window_fraction, t.flat_threshold);

        // Final equity triangulation
        if let Some(portfolio_equity) = artifacts.portfolio().and_then(|p| p.final_equity) {
            let c = matrix.record(
                keys::SERIES_VS_PORTFOLIO_FINAL_EQUITY,
                Comparison::numeric(
                    (ArtifactKind::EquitySeries, final_equity),
                    (ArtifactKind::PortfolioState, portfolio_equity),
                    t.equity_tolerance(final_equity),
                ),
            );
            if !c.agrees {
                out.push(
                    Discrepancy::critical(
                        DiscrepancyCategory::AccountingMismatch,
                        format!(
                            "equity series final equity {:.2} disagrees with portfolio state final equity {:.2}",
                            final_equity, portfolio_equity
                        ),
                        &[ArtifactKind::EquitySeries, ArtifactKind::PortfolioState],
                    )
                    .with_delta(final_equity - portfolio_equity),
                );
            }
        }

        if let Some(claimed) = metrics.accounting.final_equity {
            matrix.record(
                keys::SERIES_VS_METRICS_FINAL_EQUITY,
                Comparison::numeric(
                    (ArtifactKind::EquitySeries, final_equity),
                    (ArtifactKind::Metrics, claimed),
                    t.equity_tolerance(final_equity),
                ),
            );
        }

        if let Some((reported, _)) = reported_return(artifacts) {
            let reported_direction = TrendDirection::of_return(reported, t.sign_deadband);
            let mut c = Comparison::labels(
                (ArtifactKind::EquitySeries, actual_direction),
                (ArtifactKind::Metrics, reported_direction),
            );
            // Same deadband rule as the reconciler: tiny sign flips agree.
            let diff = reported - actual_return;
            c.delta = Some(diff);
            c.tolerance = Some(t.sign_deadband);
            c.agrees = c.agrees || diff.abs() <= t.sign_deadband + FLOAT_SLACK;
            matrix.record(keys::RETURN_DIRECTION_MATCH, c);
        }

        // Shape of the curve
        let c = matrix.record(
            keys::SERIES_TREND_VS_RETURN_DIRECTION,
            Comparison::labels(
                (ArtifactKind::EquitySeries, series_trend),
                (ArtifactKind::EquitySeries, actual_direction),
            ),
        );
        if !c.agrees {
            out.push(trend_mismatch(
                format!(
                    "equity series trend is {} but its computed return {:+.4}% is {}",
                    series_trend,
                    actual_return * 100.0,
                    actual_direction
                ),
                &[ArtifactKind::EquitySeries],
            ));
        }

        if let Some(claimed) = artifacts
            .visualization()
            .and_then(|v| v.claimed_trend(t.trend_window_fraction, t.flat_threshold))
        {
            let c = matrix.record(
                keys::VISUALIZATION_VS_SERIES_TREND,
                Comparison::labels(
                    (ArtifactKind::Visualization, claimed),
                    (ArtifactKind::EquitySeries, series_trend),
                ),
            );
            if !c.agrees {
                out.push(trend_mismatch(
                    format!(
                        "visualization shows a {} equity curve but the equity series is {}",
                        claimed, series_trend
                    ),
                    &[ArtifactKind::Visualization, ArtifactKind::EquitySeries],
                ));
            }
        }

        // Ledger vs metrics
        if let Some(reported) = metrics.execution.total_trades {
            let ledger = artifacts.trades().len() as u64;
            let delta = ledger.abs_diff(reported);
            let c = matrix.record(
                keys::LEDGER_VS_METRICS_TRADE_COUNT,
                Comparison {
                    sources: vec![ArtifactKind::TradeLedger, ArtifactKind::Metrics],
                    left: Observed::Count(ledger),
                    right: Observed::Count(reported),
                    delta: Some(ledger as f64 - reported as f64),
                    tolerance: Some(t.trade_count_slack as f64),
                    agrees: delta <= t.trade_count_slack,
                },
            );
            if !c.agrees {
                out.push(
                    Discrepancy::warning(
                        DiscrepancyCategory::ToleranceWarning,
                        format!(
                            "trade ledger has {} trades but metrics report total_trades {}",
                            ledger, reported
                        ),
                        &[ArtifactKind::TradeLedger, ArtifactKind::Metrics],
                    )
                    .with_delta(ledger as f64 - reported as f64),
                );
            }
        }

        self.ledger_amount(
            &mut matrix,
            &mut out,
            keys::LEDGER_VS_METRICS_TOTAL_FEES,
            "total_fees",
            artifacts.total_fees(),
            metrics.accounting.total_fees,
        );
        self.ledger_amount(
            &mut matrix,
            &mut out,
            keys::LEDGER_VS_METRICS_REALIZED_PNL,
            "total_pnl",
            artifacts.realized_pnl(),
            metrics.accounting.total_pnl,
        );

        if let Some(reported) = metrics.performance.max_drawdown {
            let computed = max_drawdown(&equity_values);
            // Reported drawdowns come signed either way.
            let c = matrix.record(
                keys::SERIES_VS_METRICS_MAX_DRAWDOWN,
                Comparison::numeric(
                    (ArtifactKind::EquitySeries, computed),
                    (ArtifactKind::Metrics, reported.abs()),
                    t.drawdown_abs,
                ),
            );
            if !c.agrees {
                out.push(
                    Discrepancy::warning(
                        DiscrepancyCategory::ToleranceWarning,
                        format!(
                            "metrics max_drawdown {:.2}% differs from equity series max drawdown {:.2}%",
                            reported.abs() * 100.0,
                            computed * 100.0
                        ),
                        &[ArtifactKind::EquitySeries, ArtifactKind::Metrics],
                    )
                    .with_delta(computed - reported.abs()),
                );
            }
        }

        if let (Some(declared), Some(reported)) = (
            artifacts.manifest().declared_initial_capital(),
            metrics.accounting.initial_capital,
        ) {
            let c = matrix.record(
                keys::MANIFEST_VS_METRICS_INITIAL_CAPITAL,
                Comparison::numeric(
                    (ArtifactKind::Manifest, declared),
                    (ArtifactKind::Metrics, reported),
                    t.equity_tolerance(declared),
                ),
            );
            if !c.agrees {
                out.push(
                    Discrepancy::warning(
                        DiscrepancyCategory::ToleranceWarning,
                        format!(
                            "manifest initial capital {:.2} differs from metrics initial_capital {:.2}",
                            declared, reported
                        ),
                        &[ArtifactKind::Manifest, ArtifactKind::Metrics],
                    )
                    .with_delta(declared - reported),
                );
            }
        }

        if let Some(events) = artifacts.events().filter(|e| !e.is_empty()) {
            check_event_log(artifacts.manifest(), events, &mut matrix, &mut out);
        }

        debug!(
            run_id = %artifacts.run_id(),
            comparisons = matrix.len(),
            disagreements = matrix.disagreements().len(),
            "Cross-validation matrix built"
        );

        CheckOutcome::new(matrix, out)
    }

    fn ledger_amount(
        &self,
        matrix: &mut CrossValidationMatrix,
        out: &mut Vec<Discrepancy>,
        key: &str,
        field: &str,
        ledger: f64,
        reported: Option<f64>,
    ) {
        let Some(reported) = reported else {
            return;
        };
        let c = matrix.record(
            key,
            Comparison::numeric(
                (ArtifactKind::TradeLedger, ledger),
                (ArtifactKind::Metrics, reported),
                self.tolerances.equity_tolerance(ledger),
            ),
        );
        if !c.agrees {
            out.push(
                Discrepancy::warning(
                    DiscrepancyCategory::ToleranceWarning,
                    format!(
                        "trade ledger sums to {} {:.2} but metrics report {:.2}",
                        field, ledger, reported
                    ),
                    &[ArtifactKind::TradeLedger, ArtifactKind::Metrics],
                )
                .with_delta(ledger - reported),
            );
        }
    }
}

/// Any trend disagreement, flat against directional included, is critical.
fn trend_mismatch(message: String, sources: &[ArtifactKind]) -> Discrepancy {
    Discrepancy::critical(DiscrepancyCategory::ReturnDirectionMismatch, message, sources)
}

/// A date-only end bound covers the whole day.
fn window_end(end: DateTime<Utc>) -> DateTime<Utc> {
    if end.num_seconds_from_midnight() == 0 && end.nanosecond() == 0 {
        end + Duration::days(1) - Duration::nanoseconds(1)
    } else {
        end
    }
}

fn check_event_log(
    manifest: &RunManifest,
    events: &[EventRecord],
    matrix: &mut CrossValidationMatrix,
    out: &mut Vec<Discrepancy>,
) {
    let out_of_order: Vec<usize> = events
        .windows(2)
        .enumerate()
        .filter(|(_, w)| w[1].timestamp < w[0].timestamp)
        .map(|(i, _)| i + 1)
        .collect();

    let start = manifest.start;
    let end = manifest.end.map(window_end);
    let outside = events
        .iter()
        .filter(|e| start.is_some_and(|s| e.timestamp < s) || end.is_some_and(|x| e.timestamp > x))
        .count();

    let first = events.iter().map(|e| e.timestamp).min();
    let last = events.iter().map(|e| e.timestamp).max();
    let span = match (first, last) {
        (Some(a), Some(b)) => format!("{}..{}", a.to_rfc3339(), b.to_rfc3339()),
        _ => "empty".to_string(),
    };
    let bound = |b: Option<DateTime<Utc>>| b.map(|d| d.to_rfc3339()).unwrap_or_else(|| "*".to_string());
    let window = format!("{}..{}", bound(start), bound(end));

    matrix.record(
        keys::EVENT_LOG_WITHIN_RUN_WINDOW,
        Comparison {
            sources: vec![ArtifactKind::EventLog, ArtifactKind::Manifest],
            left: Observed::Label(span),
            right: Observed::Label(window.clone()),
            delta: None,
            tolerance: None,
            agrees: out_of_order.is_empty() && outside == 0,
        },
    );

    if let Some(&row) = out_of_order.first() {
        out.push(Discrepancy::warning(
            DiscrepancyCategory::EventLogAnomaly,
            format!(
                "event log has {} event(s) out of chronological order (first at row {})",
                out_of_order.len(),
                row
            ),
            &[ArtifactKind::EventLog],
        ));
    }
    if outside > 0 {
        out.push(Discrepancy::warning(
            DiscrepancyCategory::EventLogAnomaly,
            format!(
                "event log has {} event(s) outside the run window {}",
                outside, window
            ),
            &[ArtifactKind::EventLog, ArtifactKind::Manifest],
        ));
    }
}
