//! Accounting Reconciler
//!
//! Produces ground truth independently of the reported metrics document.
//!
//! # Two Derivations of Final Equity
//!
//! ```text
//! bottom_up = initial_capital + Σ trade.pnl − Σ trade.fee + unrealized_pnl
//! top_down  = last equity row (+ unrealized_pnl if the series excludes marks)
//! ```
//!
//! The two must agree within `max(equity_abs, equity_rel * |top_down|)`.
//! `actual_return` is always computed from the top-down value: the series is
//! the closest thing to ground truth, the metrics document is what is being
//! audited. The metrics `final_equity` is only ever compared against.

use crate::audit::artifacts::{ArtifactKind, RunArtifacts};
use crate::audit::config::{AuditConfig, Tolerances, UnrealizedConvention, FLOAT_SLACK};
use crate::audit::discrepancy::{CheckOutcome, Discrepancy, DiscrepancyCategory};
use crate::audit::series::TrendDirection;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Where the audited return figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedReturnSource {
    /// `performance.total_return`
    TotalReturn,
    /// Derived from `accounting.final_equity / initial_capital - 1`.
    ClaimedFinalEquity,
}

/// The return the metrics document claims: `performance.total_return`, else
/// derived from `accounting.final_equity`.
pub fn reported_return(artifacts: &RunArtifacts) -> Option<(f64, ReportedReturnSource)> {
    let metrics = artifacts.metrics();
    match (metrics.performance.total_return, metrics.accounting.final_equity) {
        (Some(r), _) => Some((r, ReportedReturnSource::TotalReturn)),
        (None, Some(fe)) => Some((
            fe / artifacts.initial_capital() - 1.0,
            ReportedReturnSource::ClaimedFinalEquity,
        )),
        (None, None) => None,
    }
}

/// Independently recomputed accounting state of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub initial_capital: f64,
    /// Raw final equity: last row of the equity series.
    pub reported_final_equity: f64,
    /// `accounting.final_equity` from the metrics document (comparison only).
    pub claimed_final_equity: Option<f64>,
    pub unrealized_pnl: f64,
    pub unrealized_convention: UnrealizedConvention,
    pub realized_pnl: f64,
    pub total_fees: f64,
    pub bottom_up_final_equity: f64,
    /// Top-down final equity after the unrealized adjustment.
    pub adjusted_final_equity: f64,
    pub equity_tolerance: f64,
    pub accounting_consistent: bool,
    pub actual_return: f64,
    pub actual_return_pct: f64,
    pub actual_direction: TrendDirection,
    pub reported_return: Option<f64>,
    pub reported_return_source: Option<ReportedReturnSource>,
    pub reported_direction: Option<TrendDirection>,
}

/// Recomputes final equity and return from raw inputs.
pub struct AccountingReconciler<'a> {
    tolerances: &'a Tolerances,
    convention: UnrealizedConvention,
}

impl<'a> AccountingReconciler<'a> {
    pub fn new(config: &'a AuditConfig) -> Self {
        Self {
            tolerances: &config.tolerances,
            convention: config.unrealized_convention,
        }
    }

    pub fn reconcile(&self, artifacts: &RunArtifacts) -> CheckOutcome<ReconciliationResult> {
        let t = self.tolerances;
        let accounting = &artifacts.metrics().accounting;
        let mut discrepancies = Vec::new();

        let initial_capital = artifacts.initial_capital();
        let unrealized_pnl = accounting.unrealized_pnl.unwrap_or(0.0);
        let realized_pnl = artifacts.realized_pnl();
        let total_fees = artifacts.total_fees();

        let bottom_up = initial_capital + realized_pnl - total_fees + unrealized_pnl;
        let raw_final = artifacts.final_row().equity;
        let adjusted = artifacts.adjusted_final_equity(self.convention);

        let equity_tolerance = t.equity_tolerance(adjusted);
        let accounting_consistent = (bottom_up - adjusted).abs() <= equity_tolerance + FLOAT_SLACK;
        if !accounting_consistent {
            discrepancies.push(
                Discrepancy::critical(
                    DiscrepancyCategory::AccountingMismatch,
                    format!(
                        "bottom-up final equity {:.2} (initial {:.2} + realized {:.2} - fees {:.2} + unrealized {:.2}) \
                         disagrees with equity series final equity {:.2} by {:+.2} (tolerance {:.2})",
                        bottom_up,
                        initial_capital,
                        realized_pnl,
                        total_fees,
                        unrealized_pnl,
                        adjusted,
                        bottom_up - adjusted,
                        equity_tolerance
                    ),
                    &[ArtifactKind::TradeLedger, ArtifactKind::EquitySeries],
                )
                .with_delta(bottom_up - adjusted),
            );
        }

        let actual_return = adjusted / initial_capital - 1.0;
        let actual_direction = TrendDirection::of_return(actual_return, t.sign_deadband);

        let claimed_final_equity = accounting.final_equity;
        let (reported_return, reported_return_source) = match reported_return(artifacts) {
            Some((r, source)) => (Some(r), Some(source)),
            None => (None, None),
        };
        let reported_direction =
            reported_return.map(|r| TrendDirection::of_return(r, t.sign_deadband));

        match reported_return {
            Some(reported) => self.check_return(
                reported,
                actual_return,
                claimed_final_equity,
                adjusted,
                &mut discrepancies,
            ),
            None => discrepancies.push(Discrepancy::warning(
                DiscrepancyCategory::ToleranceWarning,
                "metrics document reports neither performance.total_return nor accounting.final_equity; \
                 reported return cannot be audited",
                &[ArtifactKind::Metrics],
            )),
        }

        if let Some(claimed) = claimed_final_equity {
            self.check_claimed_equity(
                claimed,
                adjusted,
                initial_capital,
                actual_return,
                &mut discrepancies,
            );
        }

        let result = ReconciliationResult {
            initial_capital,
            reported_final_equity: raw_final,
            claimed_final_equity,
            unrealized_pnl,
            unrealized_convention: self.convention,
            realized_pnl,
            total_fees,
            bottom_up_final_equity: bottom_up,
            adjusted_final_equity: adjusted,
            equity_tolerance,
            accounting_consistent,
            actual_return,
            actual_return_pct: actual_return * 100.0,
            actual_direction,
            reported_return,
            reported_return_source,
            reported_direction,
        };

        debug!(
            run_id = %artifacts.run_id(),
            bottom_up = result.bottom_up_final_equity,
            top_down = result.adjusted_final_equity,
            actual_return = result.actual_return,
            findings = discrepancies.len(),
            "Accounting reconciliation complete"
        );

        CheckOutcome::new(result, discrepancies)
    }

    /// Direction first (critical), then magnitude (warning).
    fn check_return(
        &self,
        reported: f64,
        actual: f64,
        claimed_final_equity: Option<f64>,
        actual_final_equity: f64,
        out: &mut Vec<Discrepancy>,
    ) {
        let t = self.tolerances;
        let reported_dir = TrendDirection::of_return(reported, t.sign_deadband);
        let actual_dir = TrendDirection::of_return(actual, t.sign_deadband);
        let diff = reported - actual;

        if reported_dir != actual_dir && diff.abs() > t.sign_deadband + FLOAT_SLACK {
            let claimed = claimed_final_equity
                .map(|v| format!("{:.2}", v))
                .unwrap_or_else(|| "n/a".to_string());
            out.push(
                Discrepancy::critical(
                    DiscrepancyCategory::ReturnDirectionMismatch,
                    format!(
                        "metrics report total_return {:+.4}% ({}) but equity series implies {:+.4}% ({}); \
                         claimed final_equity {} vs actual final_equity {:.2}",
                        reported * 100.0,
                        reported_dir,
                        actual * 100.0,
                        actual_dir,
                        claimed,
                        actual_final_equity
                    ),
                    &[ArtifactKind::Metrics, ArtifactKind::EquitySeries],
                )
                .with_delta(diff),
            );
            return;
        }

        let tolerance = t.return_tolerance(actual);
        if diff.abs() > tolerance + FLOAT_SLACK {
            out.push(
                Discrepancy::warning(
                    DiscrepancyCategory::ToleranceWarning,
                    format!(
                        "metrics total_return {:+.4}% differs from computed {:+.4}% by {:.4}pp (tolerance {:.4}pp)",
                        reported * 100.0,
                        actual * 100.0,
                        diff.abs() * 100.0,
                        tolerance * 100.0
                    ),
                    &[ArtifactKind::Metrics, ArtifactKind::EquitySeries],
                )
                .with_delta(diff),
            );
        }
    }

    /// Claimed final equity: critical when it implies a different direction.
    fn check_claimed_equity(
        &self,
        claimed: f64,
        actual_final_equity: f64,
        initial_capital: f64,
        actual_return: f64,
        out: &mut Vec<Discrepancy>,
    ) {
        let t = self.tolerances;
        if t.equity_agrees(claimed, actual_final_equity) {
            return;
        }

        let delta = claimed - actual_final_equity;
        let claimed_return = claimed / initial_capital - 1.0;
        let claimed_dir = TrendDirection::of_return(claimed_return, t.sign_deadband);
        let actual_dir = TrendDirection::of_return(actual_return, t.sign_deadband);

        if claimed_dir != actual_dir && (claimed_return - actual_return).abs() > t.sign_deadband + FLOAT_SLACK {
            out.push(
                Discrepancy::critical(
                    DiscrepancyCategory::AccountingMismatch,
                    format!(
                        "metrics claim final_equity {:.2} ({}) but reconciled final equity is {:.2} ({}), delta {:+.2}",
                        claimed, claimed_dir, actual_final_equity, actual_dir, delta
                    ),
                    &[ArtifactKind::Metrics, ArtifactKind::EquitySeries],
                )
                .with_delta(delta),
            );
        } else {
            out.push(
                Discrepancy::warning(
                    DiscrepancyCategory::ToleranceWarning,
                    format!(
                        "metrics final_equity {:.2} differs from reconciled final equity {:.2} by {:+.2} (tolerance {:.2})",
                        claimed,
                        actual_final_equity,
                        delta,
                        t.equity_tolerance(actual_final_equity)
                    ),
                    &[ArtifactKind::Metrics, ArtifactKind::EquitySeries],
                )
                .with_delta(delta),
            );
        }
    }
}
