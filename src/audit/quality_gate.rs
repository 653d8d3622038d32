//! Quality-Gate Decision Engine
//!
//! The SINGLE authority on whether a run may be recorded as a trusted result.
//!
//! # Invariants
//!
//! ```text
//! status == Failed              <=> critical_issues non-empty
//! status == PassedWithWarnings  <=> critical_issues empty && warnings non-empty
//! status == Passed              <=> both empty
//! ```
//!
//! A [`QualityGateVerdict`] can only be produced by [`QualityGate::decide`] and
//! is never mutated afterwards. Registry appends require a
//! [`RegistryAppendPermit`], which only a non-failed verdict hands out.

use crate::audit::aggregator::AggregatedFindings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Ternary gate outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Passed,
    PassedWithWarnings,
    /// HALT: must not be recorded as trusted.
    Failed,
}

impl GateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::PassedWithWarnings => "passed_with_warnings",
            Self::Failed => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl std::fmt::Display for GateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// VERDICT
// =============================================================================

/// Terminal verdict for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityGateVerdict {
    run_id: String,
    status: GateStatus,
    /// Rendered warnings, in creation order.
    warnings: Vec<String>,
    /// Rendered critical issues, verbatim.
    critical_issues: Vec<String>,
    evaluated_at: DateTime<Utc>,
}

impl QualityGateVerdict {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn status(&self) -> GateStatus {
        self.status
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn critical_issues(&self) -> &[String] {
        &self.critical_issues
    }

    pub fn evaluated_at(&self) -> DateTime<Utc> {
        self.evaluated_at
    }

    pub fn is_failed(&self) -> bool {
        self.status.is_failed()
    }

    /// Permission to append this run to the registry; `None` when failed.
    pub fn authorize_registry_append(&self) -> Option<RegistryAppendPermit> {
        if self.is_failed() {
            return None;
        }
        Some(RegistryAppendPermit {
            run_id: self.run_id.clone(),
            status: self.status,
            evaluated_at: self.evaluated_at,
        })
    }

    /// Format as a compact one-line summary.
    pub fn format_compact(&self) -> String {
        match self.status {
            GateStatus::Passed => "PASSED".to_string(),
            GateStatus::PassedWithWarnings => {
                format!("PASSED WITH WARNINGS ({} warnings)", self.warnings.len())
            }
            GateStatus::Failed => format!(
                "FAILED ({} critical, {} warnings)",
                self.critical_issues.len(),
                self.warnings.len()
            ),
        }
    }

    /// Format as a boxed report. Warnings are listed only when `include_warnings`.
    pub fn format_report(&self, include_warnings: bool) -> String {
        let mut out = String::new();

        out.push_str(&format!("╔{}╗\n", "═".repeat(BOX_WIDTH)));
        boxed(&mut out, &center("QUALITY GATE VERDICT"));
        out.push_str(&format!("╠{}╣\n", "═".repeat(BOX_WIDTH)));
        boxed(&mut out, &format!("RUN:      {}", self.run_id));
        boxed(&mut out, &format!("DECISION: {}", self.decision_label()));
        boxed(&mut out, &format!("AT:       {}", self.evaluated_at.to_rfc3339()));

        if !self.critical_issues.is_empty() {
            out.push_str(&format!("╠{}╣\n", "═".repeat(BOX_WIDTH)));
            boxed(
                &mut out,
                &format!("{} critical issue(s):", self.critical_issues.len()),
            );
            for (i, issue) in self.critical_issues.iter().enumerate() {
                wrapped(&mut out, &format!("{}. {}", i + 1, issue));
            }
        }

        if !self.warnings.is_empty() {
            out.push_str(&format!("╠{}╣\n", "═".repeat(BOX_WIDTH)));
            if include_warnings {
                boxed(&mut out, &format!("{} warning(s):", self.warnings.len()));
                for (i, w) in self.warnings.iter().enumerate() {
                    wrapped(&mut out, &format!("{}. {}", i + 1, w));
                }
            } else {
                boxed(
                    &mut out,
                    &format!("{} warning(s) persisted with the verdict", self.warnings.len()),
                );
            }
        }

        out.push_str(&format!("╚{}╝\n", "═".repeat(BOX_WIDTH)));
        out
    }

    fn decision_label(&self) -> &'static str {
        match self.status {
            GateStatus::Passed => "✓ PASSED",
            GateStatus::PassedWithWarnings => "⚠ PASSED WITH WARNINGS",
            GateStatus::Failed => "✗ FAILED (HALT)",
        }
    }
}

impl std::fmt::Display for QualityGateVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.format_compact())
    }
}

const BOX_WIDTH: usize = 78;

fn boxed(out: &mut String, text: &str) {
    let inner = BOX_WIDTH - 2;
    let len = text.chars().count();
    out.push_str("║  ");
    out.push_str(text);
    out.push_str(&" ".repeat(inner.saturating_sub(len)));
    out.push_str("║\n");
}

/// Word-wrap inside the box; messages are never truncated.
fn wrapped(out: &mut String, text: &str) {
    let width = BOX_WIDTH - 5;
    let mut line = String::new();
    for word in text.split_whitespace() {
        if !line.is_empty() && line.chars().count() + 1 + word.chars().count() > width {
            boxed(out, &format!("  {}", line));
            line.clear();
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }
    if !line.is_empty() {
        boxed(out, &format!("  {}", line));
    }
}

fn center(text: &str) -> String {
    let pad = (BOX_WIDTH - 2).saturating_sub(text.chars().count()) / 2;
    format!("{}{}", " ".repeat(pad), text)
}

// =============================================================================
// REGISTRY PERMIT
// =============================================================================

/// Proof that a run passed the gate. Only obtainable from a non-failed verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAppendPermit {
    run_id: String,
    status: GateStatus,
    evaluated_at: DateTime<Utc>,
}

impl RegistryAppendPermit {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn status(&self) -> GateStatus {
        self.status
    }

    pub fn evaluated_at(&self) -> DateTime<Utc> {
        self.evaluated_at
    }
}

// =============================================================================
// QUALITY GATE
// =============================================================================

/// The sole pathway from findings to a verdict.
pub struct QualityGate;

impl QualityGate {
    /// Compute the verdict once from aggregated findings.
    pub fn decide(
        run_id: &str,
        findings: &AggregatedFindings,
        evaluated_at: DateTime<Utc>,
    ) -> QualityGateVerdict {
        let status = if !findings.critical_issues.is_empty() {
            GateStatus::Failed
        } else if !findings.warnings.is_empty() {
            GateStatus::PassedWithWarnings
        } else {
            GateStatus::Passed
        };

        let verdict = QualityGateVerdict {
            run_id: run_id.to_string(),
            status,
            warnings: findings.warnings.iter().map(|d| d.render()).collect(),
            critical_issues: findings.critical_issues.iter().map(|d| d.render()).collect(),
            evaluated_at,
        };

        if verdict.is_failed() {
            warn!(
                run_id = %run_id,
                critical = verdict.critical_issues.len(),
                warnings = verdict.warnings.len(),
                "Quality gate HALT"
            );
            for issue in &verdict.critical_issues {
                warn!(run_id = %run_id, "{}", issue);
            }
        } else {
            info!(
                run_id = %run_id,
                status = %verdict.status,
                warnings = verdict.warnings.len(),
                "Quality gate passed"
            );
        }

        verdict
    }

    /// Require a non-failed verdict, returning the registry permit.
    pub fn require_passed(
        verdict: &QualityGateVerdict,
    ) -> Result<RegistryAppendPermit, QualityGateError> {
        verdict
            .authorize_registry_append()
            .ok_or_else(|| QualityGateError {
                verdict: verdict.clone(),
            })
    }
}

// =============================================================================
// QUALITY GATE ERROR
// =============================================================================

/// Returned when a passed verdict is required but the run failed.
#[derive(Debug, Clone)]
pub struct QualityGateError {
    pub verdict: QualityGateVerdict,
}

impl std::fmt::Display for QualityGateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Quality gate failed for run {} with {} critical issue(s):",
            self.verdict.run_id,
            self.verdict.critical_issues.len()
        )?;
        for (i, issue) in self.verdict.critical_issues.iter().enumerate() {
            writeln!(f, "  {}. {}", i + 1, issue)?;
        }
        Ok(())
    }
}

impl std::error::Error for QualityGateError {}
