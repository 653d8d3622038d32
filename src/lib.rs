//! Backtest Audit Library
//!
//! Reconciliation and quality gating for completed simulation runs.
//! The binary in `main.rs` is a thin operator surface over [`audit`].

pub mod audit;

pub use audit::{
    validate_run, AuditConfig, FsArtifactLoader, GateStatus, LoadError, QualityGate,
    QualityGateEngine, QualityGateVerdict, ReportMode, RunEvaluation, VerdictDocument,
};
