//! Position / Mark-to-Market Validator
//!
//! Validates open-position handling at the run boundary. Open positions are
//! reconstructed either from the portfolio snapshot (when the run wrote one)
//! or from the trade ledger using average-cost accounting, then marked to the
//! last known price for each symbol.

use crate::audit::artifacts::{ArtifactKind, PortfolioState, RunArtifacts, TradeRecord};
use crate::audit::config::{AuditConfig, Tolerances};
use crate::audit::discrepancy::{CheckOutcome, Discrepancy, DiscrepancyCategory};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

const QTY_EPSILON: f64 = 1e-9;

/// Where the reconstructed positions came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSource {
    PortfolioSnapshot,
    TradeLedger,
}

/// Where a position's mark price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkSource {
    PortfolioSnapshot,
    LastLedgerTrade,
    Unavailable,
}

/// One position still open at the end of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub symbol: String,
    /// Signed quantity (negative = short).
    pub quantity: f64,
    pub average_price: Option<f64>,
    pub mark_price: Option<f64>,
    pub mark_source: MarkSource,
    pub unrealized_pnl: Option<f64>,
}

/// End-of-run position report, produced regardless of pass/fail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionAnalysis {
    /// Open positions on the last equity row.
    pub open_positions_count: u32,
    /// `accounting.open_positions` from the metrics document.
    pub reported_open_positions: Option<u64>,
    /// `accounting.unrealized_pnl` as used by the reconciler (absent = 0).
    pub unrealized_pnl_total: f64,
    pub reported_unrealized_pnl: Option<f64>,
    /// Sum of per-position marks, when every open position could be marked.
    pub computed_mark_to_market: Option<f64>,
    pub mark_to_market_applied: bool,
    pub position_source: PositionSource,
    pub positions: Vec<OpenPosition>,
}

// =============================================================================
// LEDGER RECONSTRUCTION
// =============================================================================

#[derive(Debug, Clone, Default)]
struct LedgerPosition {
    shares: f64,
    cost_basis: f64,
    avg_entry_price: f64,
    last_price: f64,
}

impl LedgerPosition {
    fn apply(&mut self, trade: &TradeRecord) {
        let signed_qty = trade.side.sign() * trade.quantity;
        let old_shares = self.shares;
        let new_shares = old_shares + signed_qty;
        self.last_price = trade.price;

        if old_shares.abs() < QTY_EPSILON || old_shares.signum() == signed_qty.signum() {
            // Opening or adding
            self.cost_basis += trade.quantity * trade.price;
            self.shares = new_shares;
            if self.shares.abs() > QTY_EPSILON {
                self.avg_entry_price = self.cost_basis / self.shares.abs();
            }
            return;
        }

        // Closing, partially or fully, or flipping
        let closing_qty = trade.quantity.min(old_shares.abs());
        let opening_qty = trade.quantity - closing_qty;
        if closing_qty > 0.0 {
            let ratio = closing_qty / old_shares.abs();
            self.cost_basis *= 1.0 - ratio;
        }
        if opening_qty > QTY_EPSILON {
            self.cost_basis = opening_qty * trade.price;
            self.avg_entry_price = trade.price;
        }
        self.shares = new_shares;

        if self.shares.abs() < QTY_EPSILON {
            self.shares = 0.0;
            self.cost_basis = 0.0;
            self.avg_entry_price = 0.0;
        } else if self.cost_basis > QTY_EPSILON {
            self.avg_entry_price = self.cost_basis / self.shares.abs();
        }
    }
}

/// Replay the ledger into per-symbol net positions (sorted by symbol).
fn replay_ledger(trades: &[TradeRecord]) -> BTreeMap<String, LedgerPosition> {
    let mut book: BTreeMap<String, LedgerPosition> = BTreeMap::new();
    for trade in trades {
        book.entry(trade.symbol.clone()).or_default().apply(trade);
    }
    book
}

fn positions_from_ledger(book: &BTreeMap<String, LedgerPosition>) -> Vec<OpenPosition> {
    book.iter()
        .filter(|(_, p)| p.shares.abs() > QTY_EPSILON)
        .map(|(symbol, p)| OpenPosition {
            symbol: symbol.clone(),
            quantity: p.shares,
            average_price: Some(p.avg_entry_price),
            mark_price: Some(p.last_price),
            mark_source: MarkSource::LastLedgerTrade,
            unrealized_pnl: Some(p.shares * (p.last_price - p.avg_entry_price)),
        })
        .collect()
}

fn positions_from_snapshot(
    snapshot: &PortfolioState,
    book: &BTreeMap<String, LedgerPosition>,
) -> Vec<OpenPosition> {
    snapshot
        .positions
        .iter()
        .filter(|p| p.quantity.abs() > QTY_EPSILON)
        .map(|p| {
            let (mark_price, mark_source) = match p.last_price {
                Some(price) => (Some(price), MarkSource::PortfolioSnapshot),
                None => match book.get(&p.symbol) {
                    Some(lp) => (Some(lp.last_price), MarkSource::LastLedgerTrade),
                    None => (None, MarkSource::Unavailable),
                },
            };
            let computed = match (mark_price, p.average_price) {
                (Some(mark), Some(avg)) => Some(p.quantity * (mark - avg)),
                _ => None,
            };
            OpenPosition {
                symbol: p.symbol.clone(),
                quantity: p.quantity,
                average_price: p.average_price,
                mark_price,
                mark_source,
                unrealized_pnl: computed.or(p.unrealized_pnl),
            }
        })
        .collect()
}

// =============================================================================
// VALIDATOR
// =============================================================================

/// Checks that open positions at the end of the run are marked to market.
pub struct PositionValidator<'a> {
    tolerances: &'a Tolerances,
}

impl<'a> PositionValidator<'a> {
    pub fn new(config: &'a AuditConfig) -> Self {
        Self {
            tolerances: &config.tolerances,
        }
    }

    pub fn validate(&self, artifacts: &RunArtifacts) -> CheckOutcome<PositionAnalysis> {
        let t = self.tolerances;
        let accounting = &artifacts.metrics().accounting;
        let series_open = artifacts.final_row().positions;
        let reported_unrealized = accounting.unrealized_pnl;
        let mut discrepancies = Vec::new();

        let book = replay_ledger(artifacts.trades());
        let (position_source, positions) = match artifacts.portfolio() {
            Some(snapshot) => (
                PositionSource::PortfolioSnapshot,
                positions_from_snapshot(snapshot, &book),
            ),
            None => (PositionSource::TradeLedger, positions_from_ledger(&book)),
        };

        let computed_mark_to_market = positions
            .iter()
            .map(|p| p.unrealized_pnl)
            .sum::<Option<f64>>();

        let unrealized_is_zero = |v: f64| v.abs() <= t.equity_abs;

        if series_open == 0 {
            if let Some(u) = reported_unrealized.filter(|u| !unrealized_is_zero(*u)) {
                discrepancies.push(
                    Discrepancy::warning(
                        DiscrepancyCategory::CloseOfBookInconsistency,
                        format!(
                            "equity series reports no open positions at close but metrics report unrealized_pnl {:.2}",
                            u
                        ),
                        &[ArtifactKind::EquitySeries, ArtifactKind::Metrics],
                    )
                    .with_delta(u),
                );
            }
        } else {
            match reported_unrealized {
                None => discrepancies.push(Discrepancy::critical(
                    DiscrepancyCategory::MarkToMarketOmission,
                    format!(
                        "equity series reports {} open position(s) at close but metrics document has no accounting.unrealized_pnl",
                        series_open
                    ),
                    &[ArtifactKind::EquitySeries, ArtifactKind::Metrics],
                )),
                Some(u) if unrealized_is_zero(u) => discrepancies.push(Discrepancy::critical(
                    DiscrepancyCategory::MarkToMarketOmission,
                    format!(
                        "equity series reports {} open position(s) at close but metrics report unrealized_pnl {:.2}; \
                         open positions were not marked to market",
                        series_open, u
                    ),
                    &[ArtifactKind::EquitySeries, ArtifactKind::Metrics],
                )),
                Some(u) => {
                    if let Some(computed) = computed_mark_to_market.filter(|_| !positions.is_empty()) {
                        if !t.equity_agrees(u, computed) {
                            discrepancies.push(
                                Discrepancy::warning(
                                    DiscrepancyCategory::ToleranceWarning,
                                    format!(
                                        "reported unrealized_pnl {:.2} differs from mark-to-market {:.2} at last known prices",
                                        u, computed
                                    ),
                                    &[position_source_kind(position_source), ArtifactKind::Metrics],
                                )
                                .with_delta(u - computed),
                            );
                        }
                    }
                }
            }
        }

        if let Some(reported) = accounting.open_positions {
            if reported != u64::from(series_open) {
                discrepancies.push(Discrepancy::warning(
                    DiscrepancyCategory::CloseOfBookInconsistency,
                    format!(
                        "metrics report {} open position(s) but equity series reports {} at close",
                        reported, series_open
                    ),
                    &[ArtifactKind::Metrics, ArtifactKind::EquitySeries],
                ));
            }
        }

        if series_open == 0 && !positions.is_empty() {
            let symbols: Vec<&str> = positions.iter().map(|p| p.symbol.as_str()).collect();
            discrepancies.push(Discrepancy::warning(
                DiscrepancyCategory::CloseOfBookInconsistency,
                format!(
                    "{} leaves {} position(s) open ({}) but equity series reports none at close",
                    position_source_kind(position_source),
                    positions.len(),
                    symbols.join(", ")
                ),
                &[position_source_kind(position_source), ArtifactKind::EquitySeries],
            ));
        }

        let mark_to_market_applied = series_open == 0
            || reported_unrealized.map(|u| !unrealized_is_zero(u)).unwrap_or(false);

        let analysis = PositionAnalysis {
            open_positions_count: series_open,
            reported_open_positions: accounting.open_positions,
            unrealized_pnl_total: reported_unrealized.unwrap_or(0.0),
            reported_unrealized_pnl: reported_unrealized,
            computed_mark_to_market,
            mark_to_market_applied,
            position_source,
            positions,
        };

        debug!(
            run_id = %artifacts.run_id(),
            open_positions = analysis.open_positions_count,
            reconstructed = analysis.positions.len(),
            mark_to_market_applied = analysis.mark_to_market_applied,
            "Position validation complete"
        );

        CheckOutcome::new(analysis, discrepancies)
    }
}

fn position_source_kind(source: PositionSource) -> ArtifactKind {
    match source {
        PositionSource::PortfolioSnapshot => ArtifactKind::PortfolioState,
        PositionSource::TradeLedger => ArtifactKind::TradeLedger,
    }
}
