//! Discrepancy Records
//!
//! A [`Discrepancy`] is one detected inconsistency between two independent
//! representations of the same fact. Discrepancies are immutable once created
//! and are consumed only by the aggregator.

use crate::audit::artifacts::ArtifactKind;
use serde::{Deserialize, Serialize};

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Non-blocking; persisted alongside the result.
    Warning,
    /// Blocking; forces a failed verdict.
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// Closed set of discrepancy categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyCategory {
    /// Bottom-up vs top-down (or cross-artifact) equity disagreement.
    AccountingMismatch,
    /// Sign disagreement between computed and reported/visual direction.
    ReturnDirectionMismatch,
    /// Magnitude-only disagreement.
    ToleranceWarning,
    /// Open positions without unrealized P&L accounting.
    MarkToMarketOmission,
    /// Optional artifact absent; dependent checks degrade.
    OptionalArtifactMissing,
    /// End-of-run position state disagrees between artifacts.
    CloseOfBookInconsistency,
    /// Event log ordering or window problems.
    EventLogAnomaly,
}

impl DiscrepancyCategory {
    /// Short code used in reports and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AccountingMismatch => "ACCOUNTING_MISMATCH",
            Self::ReturnDirectionMismatch => "RETURN_DIRECTION_MISMATCH",
            Self::ToleranceWarning => "TOLERANCE_WARNING",
            Self::MarkToMarketOmission => "MARK_TO_MARKET_OMISSION",
            Self::OptionalArtifactMissing => "OPTIONAL_ARTIFACT_MISSING",
            Self::CloseOfBookInconsistency => "CLOSE_OF_BOOK_INCONSISTENCY",
            Self::EventLogAnomaly => "EVENT_LOG_ANOMALY",
        }
    }
}

impl std::fmt::Display for DiscrepancyCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// A single detected inconsistency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub severity: Severity,
    pub category: DiscrepancyCategory,
    pub message: String,
    /// Artifacts whose values disagree.
    pub sources: Vec<ArtifactKind>,
    /// Numeric difference, when the comparison was numeric.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
}

impl Discrepancy {
    pub fn critical(
        category: DiscrepancyCategory,
        message: impl Into<String>,
        sources: &[ArtifactKind],
    ) -> Self {
        Self {
            severity: Severity::Critical,
            category,
            message: message.into(),
            sources: sources.to_vec(),
            delta: None,
        }
    }

    pub fn warning(
        category: DiscrepancyCategory,
        message: impl Into<String>,
        sources: &[ArtifactKind],
    ) -> Self {
        Self {
            severity: Severity::Warning,
            category,
            message: message.into(),
            sources: sources.to_vec(),
            delta: None,
        }
    }

    pub fn with_delta(mut self, delta: f64) -> Self {
        self.delta = Some(delta);
        self
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }

    /// Verbatim one-line form surfaced to operators.
    pub fn render(&self) -> String {
        format!("[{}] {}", self.category.code(), self.message)
    }
}

impl std::fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Result of one checker: its report section plus the findings it raised.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome<T> {
    pub report: T,
    pub discrepancies: Vec<Discrepancy>,
}

impl<T> CheckOutcome<T> {
    pub fn new(report: T, discrepancies: Vec<Discrepancy>) -> Self {
        Self {
            report,
            discrepancies,
        }
    }

    pub fn critical_count(&self) -> usize {
        self.discrepancies.iter().filter(|d| d.is_critical()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_category_codes_unique() {
        let all = [
            DiscrepancyCategory::AccountingMismatch,
            DiscrepancyCategory::ReturnDirectionMismatch,
            DiscrepancyCategory::ToleranceWarning,
            DiscrepancyCategory::MarkToMarketOmission,
            DiscrepancyCategory::OptionalArtifactMissing,
            DiscrepancyCategory::CloseOfBookInconsistency,
            DiscrepancyCategory::EventLogAnomaly,
        ];
        let codes: HashSet<_> = all.iter().map(|c| c.code()).collect();
        assert_eq!(codes.len(), all.len());
    }

    #[test]
    fn test_render_includes_code_and_message() {
        let d = Discrepancy::critical(
            DiscrepancyCategory::AccountingMismatch,
            "bottom-up 100000.00 vs top-down 110000.00",
            &[ArtifactKind::TradeLedger, ArtifactKind::EquitySeries],
        )
        .with_delta(10_000.0);
        assert!(d.is_critical());
        assert_eq!(
            d.render(),
            "[ACCOUNTING_MISMATCH] bottom-up 100000.00 vs top-down 110000.00"
        );
        assert_eq!(d.delta, Some(10_000.0));
    }

    #[test]
    fn test_serialized_shape() {
        let d = Discrepancy::warning(
            DiscrepancyCategory::ToleranceWarning,
            "trade count differs",
            &[ArtifactKind::TradeLedger, ArtifactKind::Metrics],
        );
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["severity"], "warning");
        assert_eq!(json["category"], "tolerance_warning");
        assert_eq!(json["sources"][1], "metrics");
        assert!(json.get("delta").is_none());
    }
}
