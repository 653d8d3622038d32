//! Reconciliation pipeline
//!
//! ```text
//! Loader -> { Reconciler, Matrix Builder, Position Validator } -> Aggregator -> Quality Gate
//! ```
//!
//! The engine is pure: it never touches the filesystem or the clock. The
//! verdict timestamp is an explicit input, so evaluating the same bundle at
//! the same `evaluated_at` yields byte-identical documents.

use crate::audit::accounting::{AccountingReconciler, ReconciliationResult};
use crate::audit::aggregator::{AggregatedFindings, DiscrepancyAggregator};
use crate::audit::artifacts::{ArtifactFingerprint, RunArtifacts};
use crate::audit::config::AuditConfig;
use crate::audit::cross_validation::{CrossValidationBuilder, CrossValidationMatrix};
use crate::audit::loader::{ArtifactLoader, LoadError, LoadedRun};
use crate::audit::positions::{PositionAnalysis, PositionValidator};
use crate::audit::quality_gate::{GateStatus, QualityGate, QualityGateVerdict};
use crate::audit::series::EquitySeriesSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Version of the [`VerdictDocument`] layout.
pub const VERDICT_SCHEMA_VERSION: u32 = 1;

/// Persisted output of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictDocument {
    pub schema_version: u32,
    pub run_id: String,
    pub status: GateStatus,
    pub warnings: Vec<String>,
    pub critical_issues: Vec<String>,
    pub findings: AggregatedFindings,
    pub reconciliation: ReconciliationResult,
    pub cross_validation_matrix: CrossValidationMatrix,
    pub position_analysis: PositionAnalysis,
    /// Shape of the raw equity series the checks were run against.
    pub equity_summary: Option<EquitySeriesSummary>,
    pub evaluated_at: DateTime<Utc>,
    pub artifact_fingerprint: ArtifactFingerprint,
}

impl VerdictDocument {
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn is_failed(&self) -> bool {
        self.status.is_failed()
    }

    /// Critical findings recorded in the document, whatever `status` says.
    pub fn has_critical_issues(&self) -> bool {
        !self.critical_issues.is_empty() || !self.findings.critical_issues.is_empty()
    }

    /// A stored verdict only admits the run when its status and its findings
    /// both say so. Hand-edited or inconsistent documents are refused.
    pub fn permits_registry_append(&self) -> bool {
        !self.is_failed() && !self.has_critical_issues()
    }
}

/// The verdict plus the document describing how it was reached.
#[derive(Debug, Clone)]
pub struct RunEvaluation {
    pub verdict: QualityGateVerdict,
    pub document: VerdictDocument,
}

/// Runs every check over a loaded bundle.
pub struct QualityGateEngine {
    config: AuditConfig,
}

impl QualityGateEngine {
    pub fn new(config: AuditConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Evaluate a loaded run, folding the loader's notes in first.
    pub fn evaluate(&self, run: &LoadedRun, evaluated_at: DateTime<Utc>) -> RunEvaluation {
        let artifacts = &run.artifacts;
        let run_id = artifacts.run_id();

        let reconciliation = AccountingReconciler::new(&self.config).reconcile(artifacts);
        let matrix = CrossValidationBuilder::new(&self.config).build(artifacts);
        let positions = PositionValidator::new(&self.config).validate(artifacts);
        let t = &self.config.tolerances;
        let equity_summary = EquitySeriesSummary::from_values(
            &artifacts.equity_values(),
            t.trend_window_fraction,
            t.flat_threshold,
        );

        let mut aggregator = DiscrepancyAggregator::new();
        aggregator.extend(run.notes.iter().cloned());
        aggregator.extend(reconciliation.discrepancies);
        aggregator.extend(matrix.discrepancies);
        aggregator.extend(positions.discrepancies);
        if aggregator.duplicates() > 0 {
            debug!(run_id = %run_id, duplicates = aggregator.duplicates(), "Dropped repeated findings");
        }
        let findings = aggregator.finish();

        let verdict = QualityGate::decide(run_id, &findings, evaluated_at);

        let document = VerdictDocument {
            schema_version: VERDICT_SCHEMA_VERSION,
            run_id: run_id.to_string(),
            status: verdict.status(),
            warnings: verdict.warnings().to_vec(),
            critical_issues: verdict.critical_issues().to_vec(),
            findings,
            reconciliation: reconciliation.report,
            cross_validation_matrix: matrix.report,
            position_analysis: positions.report,
            equity_summary,
            evaluated_at,
            artifact_fingerprint: artifacts.fingerprint().clone(),
        };

        RunEvaluation { verdict, document }
    }

    /// Evaluate a bundle that was built in memory (no loader notes).
    pub fn evaluate_artifacts(
        &self,
        artifacts: RunArtifacts,
        evaluated_at: DateTime<Utc>,
    ) -> RunEvaluation {
        self.evaluate(&LoadedRun::new(artifacts), evaluated_at)
    }
}

/// Load and evaluate one run. Load failures abort with no verdict.
pub fn validate_run(
    loader: &dyn ArtifactLoader,
    run_id: &str,
    config: &AuditConfig,
    evaluated_at: DateTime<Utc>,
) -> Result<RunEvaluation, LoadError> {
    info!(run_id = %run_id, "Validating run");
    let run = loader.load(run_id)?;
    let engine = QualityGateEngine::new(config.clone());
    Ok(engine.evaluate(&run, evaluated_at))
}
