//! Discrepancy & Warning Aggregator
//!
//! Collects findings from the loader and every checker, drops exact repeats
//! (same category and message, first occurrence wins) and partitions the rest
//! by severity. Creation order is preserved within each partition.

use crate::audit::discrepancy::{Discrepancy, DiscrepancyCategory, Severity};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Findings partitioned by severity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedFindings {
    pub warnings: Vec<Discrepancy>,
    pub critical_issues: Vec<Discrepancy>,
}

impl AggregatedFindings {
    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty() && self.critical_issues.is_empty()
    }

    pub fn total(&self) -> usize {
        self.warnings.len() + self.critical_issues.len()
    }
}

#[derive(Debug, Default)]
pub struct DiscrepancyAggregator {
    seen: HashSet<(DiscrepancyCategory, String)>,
    findings: AggregatedFindings,
    duplicates: usize,
}

impl DiscrepancyAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, discrepancy: Discrepancy) {
        if !self
            .seen
            .insert((discrepancy.category, discrepancy.message.clone()))
        {
            self.duplicates += 1;
            return;
        }
        match discrepancy.severity {
            Severity::Warning => self.findings.warnings.push(discrepancy),
            Severity::Critical => self.findings.critical_issues.push(discrepancy),
        }
    }

    pub fn extend(&mut self, discrepancies: impl IntoIterator<Item = Discrepancy>) {
        for d in discrepancies {
            self.push(d);
        }
    }

    /// Number of exact repeats dropped so far.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn finish(self) -> AggregatedFindings {
        self.findings
    }
}
