//! Test fixtures shared by the audit unit tests.

use crate::audit::artifacts::{
    parse_timestamp, EquityRow, EventRecord, MetricsDoc, PortfolioState, RunArtifacts,
    RunManifest, TradeRecord, TradeSide, VisualizationSummary,
};
use crate::audit::series::TrendDirection;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// Day `i` of the fixture window (2024-01-01 + i days).
pub fn day(i: i64) -> DateTime<Utc> {
    parse_timestamp("2024-01-01").unwrap() + Duration::days(i)
}

/// Builder for in-memory run bundles.
pub struct RunFixture {
    pub initial_capital: f64,
    pub equity: Vec<f64>,
    pub final_positions: u32,
    pub trades: Vec<TradeRecord>,
    pub metrics: MetricsDoc,
    pub events: Option<Vec<EventRecord>>,
    pub visualization: Option<VisualizationSummary>,
    pub portfolio: Option<PortfolioState>,
}

impl RunFixture {
    pub fn new(initial_capital: f64) -> Self {
        let mut metrics = MetricsDoc::default();
        metrics.accounting.initial_capital = Some(initial_capital);
        Self {
            initial_capital,
            equity: vec![initial_capital],
            final_positions: 0,
            trades: Vec::new(),
            metrics,
            events: None,
            visualization: None,
            portfolio: None,
        }
    }

    pub fn equity(mut self, values: &[f64]) -> Self {
        self.equity = values.to_vec();
        self
    }

    /// Linear path from the initial capital to `final_equity` over `rows` rows.
    pub fn linear_equity(mut self, final_equity: f64, rows: usize) -> Self {
        let start = self.initial_capital;
        let steps = (rows.max(2) - 1) as f64;
        self.equity = (0..rows.max(2))
            .map(|i| start + (final_equity - start) * i as f64 / steps)
            .collect();
        self
    }

    pub fn flat_equity(mut self, value: f64, rows: usize) -> Self {
        self.equity = vec![value; rows];
        self
    }

    pub fn final_positions(mut self, count: u32) -> Self {
        self.final_positions = count;
        self
    }

    pub fn trade(
        mut self,
        symbol: &str,
        side: TradeSide,
        quantity: f64,
        price: f64,
        fee: f64,
        pnl: f64,
    ) -> Self {
        let i = self.trades.len() as i64;
        self.trades.push(TradeRecord {
            timestamp: day(i) + Duration::hours(12),
            symbol: symbol.to_string(),
            side,
            quantity,
            price,
            fee,
            pnl,
        });
        self
    }

    pub fn metrics(mut self, edit: impl FnOnce(&mut MetricsDoc)) -> Self {
        edit(&mut self.metrics);
        self
    }

    pub fn visualization_trend(mut self, trend: TrendDirection) -> Self {
        self.visualization = Some(VisualizationSummary {
            trend: Some(trend),
            figures: vec!["equity_curve.png".to_string()],
            equity_points: Vec::new(),
        });
        self
    }

    pub fn portfolio(mut self, portfolio: PortfolioState) -> Self {
        self.portfolio = Some(portfolio);
        self
    }

    pub fn events(mut self, events: Vec<EventRecord>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn manifest(&self) -> RunManifest {
        let last = self.equity.len().max(1) as i64 - 1;
        RunManifest {
            run_id: "run-fixture".to_string(),
            strategy: "fixture_strategy".to_string(),
            parameters: BTreeMap::new(),
            universe: vec!["AAPL".to_string(), "MSFT".to_string()],
            start: Some(day(0)),
            end: Some(day(last) + Duration::hours(23)),
            status: Some("completed".to_string()),
            initial_capital: Some(self.initial_capital),
        }
    }

    pub fn build(self) -> RunArtifacts {
        let manifest = self.manifest();
        let n = self.equity.len();
        let rows = self
            .equity
            .iter()
            .enumerate()
            .map(|(i, &equity)| EquityRow {
                timestamp: day(i as i64),
                equity,
                drawdown: None,
                returns: None,
                positions: if i + 1 == n { self.final_positions } else { 0 },
                exposure: None,
            })
            .collect();

        let mut bundle = RunArtifacts::new(manifest, self.metrics, self.trades, rows).unwrap();
        if let Some(events) = self.events {
            bundle = bundle.with_events(events);
        }
        if let Some(visualization) = self.visualization {
            bundle = bundle.with_visualization(visualization);
        }
        if let Some(portfolio) = self.portfolio {
            bundle = bundle.with_portfolio(portfolio);
        }
        bundle
    }
}

/// Equity ends at 100850 from 100000; ledger realized 885.20, fees 35.20,
/// no open positions, metrics agree everywhere.
pub fn clean_pass_fixture() -> RunFixture {
    RunFixture::new(100_000.0)
        .linear_equity(100_850.0, 20)
        .trade("AAPL", TradeSide::Buy, 100.0, 150.0, 8.80, 0.0)
        .trade("AAPL", TradeSide::Sell, 100.0, 155.0, 8.80, 500.0)
        .trade("MSFT", TradeSide::Buy, 50.0, 300.0, 8.80, 0.0)
        .trade("MSFT", TradeSide::Sell, 50.0, 307.704, 8.80, 385.20)
        .metrics(|m| {
            m.performance.total_return = Some(0.0085);
            m.performance.max_drawdown = Some(0.0);
            m.execution.total_trades = Some(4);
            m.accounting.final_equity = Some(100_850.0);
            m.accounting.total_pnl = Some(885.20);
            m.accounting.total_fees = Some(35.20);
            m.accounting.unrealized_pnl = Some(0.0);
            m.accounting.open_positions = Some(0);
        })
        .visualization_trend(TrendDirection::Rising)
}

/// Equity flat at 100000 while metrics claim +10% / 110000.
pub fn flat_equity_claims_profit_fixture() -> RunFixture {
    RunFixture::new(100_000.0)
        .flat_equity(100_000.0, 20)
        .metrics(|m| {
            m.performance.total_return = Some(0.10);
            m.accounting.final_equity = Some(110_000.0);
            m.accounting.unrealized_pnl = Some(0.0);
        })
}
