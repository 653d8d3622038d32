//! Run Reconciliation & Quality Gate
//!
//! Validates that the artifacts of a completed simulation run tell the same
//! story before the run may be recorded as a trusted result.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   ArtifactLoader (trait)                        │
//! │  FsArtifactLoader: manifest, metrics, trades, equity, events,   │
//! │  visualization, portfolio state -> RunArtifacts + notes         │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//!        ┌───────────────────────┼───────────────────────┐
//!        ▼                       ▼                       ▼
//! ┌─────────────┐        ┌─────────────┐        ┌─────────────┐
//! │ Accounting  │        │ CrossValid. │        │ Position    │
//! │ Reconciler  │        │ Matrix      │        │ Validator   │
//! └──────┬──────┘        └──────┬──────┘        └──────┬──────┘
//!        └───────────────────────┼───────────────────────┘
//!                                ▼
//!                    ┌───────────────────────┐
//!                    │ DiscrepancyAggregator │
//!                    └───────────┬───────────┘
//!                                ▼
//!                    ┌───────────────────────┐
//!                    │ QualityGate::decide   │──▶ VerdictDocument
//!                    └───────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - **Ground truth**: final equity and return are recomputed from the raw
//!   series and ledger; the metrics document is only compared against
//! - **Severity**: any critical finding fails the run; nothing downgrades it
//! - **Determinism**: no clock reads inside the engine; `evaluated_at` is input

pub mod accounting;
pub mod aggregator;
pub mod artifacts;
pub mod config;
pub mod cross_validation;
pub mod discrepancy;
pub mod engine;
pub mod loader;
pub mod positions;
pub mod quality_gate;
pub mod report;
pub mod series;
pub mod verdict_store;

#[cfg(test)]
mod testkit;

#[cfg(test)]
mod quality_gate_tests;

pub use accounting::{AccountingReconciler, ReconciliationResult, ReportedReturnSource};
pub use aggregator::{AggregatedFindings, DiscrepancyAggregator};
pub use artifacts::{
    ArtifactFingerprint, ArtifactInvariantError, ArtifactKind, EquityRow, EventRecord, MetricsDoc,
    PortfolioPosition, PortfolioState, RunArtifacts, RunManifest, TradeRecord, TradeSide,
    VisualizationSummary,
};
pub use config::{ArtifactLayout, AuditConfig, ConfigError, Tolerances, UnrealizedConvention};
pub use cross_validation::{Comparison, CrossValidationBuilder, CrossValidationMatrix, Observed};
pub use discrepancy::{CheckOutcome, Discrepancy, DiscrepancyCategory, Severity};
pub use engine::{
    validate_run, QualityGateEngine, RunEvaluation, VerdictDocument, VERDICT_SCHEMA_VERSION,
};
pub use loader::{ArtifactLoader, FsArtifactLoader, LoadError, LoadedRun};
pub use positions::{MarkSource, OpenPosition, PositionAnalysis, PositionSource, PositionValidator};
pub use quality_gate::{
    GateStatus, QualityGate, QualityGateError, QualityGateVerdict, RegistryAppendPermit,
};
pub use report::{render_report, summary_line, ReportMode};
pub use series::{classify_trend, max_drawdown, EquitySeriesSummary, TrendDirection};
pub use verdict_store::{read_verdict, write_verdict, VerdictStoreError};
