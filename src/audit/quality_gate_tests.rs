//! Quality Gate Tests

use crate::audit::aggregator::DiscrepancyAggregator;
use crate::audit::artifacts::ArtifactKind;
use crate::audit::discrepancy::{Discrepancy, DiscrepancyCategory};
use crate::audit::quality_gate::{GateStatus, QualityGate};
use crate::audit::testkit::day;

fn warning(msg: &str) -> Discrepancy {
    Discrepancy::warning(
        DiscrepancyCategory::ToleranceWarning,
        msg,
        &[ArtifactKind::TradeLedger, ArtifactKind::Metrics],
    )
}

fn critical(msg: &str) -> Discrepancy {
    Discrepancy::critical(
        DiscrepancyCategory::ReturnDirectionMismatch,
        msg,
        &[ArtifactKind::Metrics, ArtifactKind::EquitySeries],
    )
}

fn decide(findings: Vec<Discrepancy>) -> crate::audit::quality_gate::QualityGateVerdict {
    let mut agg = DiscrepancyAggregator::new();
    agg.extend(findings);
    QualityGate::decide("run-001", &agg.finish(), day(10))
}

#[test]
fn test_no_findings_passes() {
    let verdict = decide(vec![]);
    assert_eq!(verdict.status(), GateStatus::Passed);
    assert_eq!(verdict.format_compact(), "PASSED");
    assert_eq!(verdict.evaluated_at(), day(10));
}

#[test]
fn test_warnings_pass_with_warnings() {
    let verdict = decide(vec![warning("trade count differs"), warning("fees differ")]);
    assert_eq!(verdict.status(), GateStatus::PassedWithWarnings);
    assert_eq!(
        verdict.warnings(),
        &[
            "[TOLERANCE_WARNING] trade count differs".to_string(),
            "[TOLERANCE_WARNING] fees differ".to_string()
        ]
    );
    assert!(verdict.critical_issues().is_empty());
}

#[test]
fn test_any_critical_fails() {
    let verdict = decide(vec![warning("fees differ"), critical("claimed +10.0000% vs flat")]);
    assert_eq!(verdict.status(), GateStatus::Failed);
    assert_eq!(
        verdict.critical_issues(),
        &["[RETURN_DIRECTION_MISMATCH] claimed +10.0000% vs flat".to_string()]
    );
    // Warnings are still carried on a failed verdict.
    assert_eq!(verdict.warnings().len(), 1);
    assert_eq!(verdict.format_compact(), "FAILED (1 critical, 1 warnings)");
}

#[test]
fn test_permit_only_for_non_failed() {
    assert!(decide(vec![]).authorize_registry_append().is_some());
    assert!(decide(vec![warning("w")]).authorize_registry_append().is_some());
    assert!(decide(vec![critical("c")]).authorize_registry_append().is_none());
}

#[test]
fn test_require_passed_carries_verdict() {
    let verdict = decide(vec![critical("metrics claim 110000.00, series ends at 100000.00")]);
    let err = QualityGate::require_passed(&verdict).unwrap_err();

    assert_eq!(err.verdict, verdict);
    let msg = err.to_string();
    assert!(msg.contains("run-001"));
    assert!(msg.contains("1 critical issue(s)"));
    assert!(msg.contains("110000.00"));

    let ok = QualityGate::require_passed(&decide(vec![])).unwrap();
    assert_eq!(ok.run_id(), "run-001");
    assert_eq!(ok.status(), GateStatus::Passed);
}

#[test]
fn test_status_serialization() {
    assert_eq!(
        serde_json::to_string(&GateStatus::PassedWithWarnings).unwrap(),
        "\"passed_with_warnings\""
    );
    let parsed: GateStatus = serde_json::from_str("\"failed\"").unwrap();
    assert!(parsed.is_failed());
}

#[test]
fn test_report_lists_critical_issues_verbatim() {
    let long = "metrics report total_return +10.0000% (rising) but equity series implies +0.0000% (flat); \
                claimed final_equity 110000.00 vs actual final_equity 100000.00";
    let verdict = decide(vec![critical(long), warning("fees differ")]);

    let quiet = verdict.format_report(false);
    assert!(quiet.contains("FAILED"));
    assert!(quiet.contains("110000.00"));
    assert!(quiet.contains("1 warning(s) persisted"));
    assert!(!quiet.contains("fees differ"));

    let verbose = verdict.format_report(true);
    assert!(verbose.contains("fees differ"));
    // Every line of the box has the same width.
    let widths: Vec<usize> = verbose.lines().map(|l| l.chars().count()).collect();
    assert!(widths.iter().all(|w| *w == widths[0]), "{:?}", widths);
}
