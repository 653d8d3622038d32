//! Operator-facing rendering of a [`VerdictDocument`].
//!
//! Verbosity is a property of the presentation only. Every mode surfaces
//! critical issues verbatim; warnings are hidden in quiet mode but are always
//! persisted in the document itself.

use crate::audit::engine::VerdictDocument;
use crate::audit::quality_gate::GateStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportMode {
    /// Status line and critical issues only.
    Quiet,
    /// Adds warnings and the reconciliation summary.
    #[default]
    Normal,
    /// Adds the cross-validation matrix and open positions.
    Verbose,
}

/// One-line summary, as printed by `batch`.
pub fn summary_line(doc: &VerdictDocument) -> String {
    format!(
        "{:<24} {:<22} critical={} warnings={} return={:+.4}%",
        doc.run_id,
        doc.status.as_str(),
        doc.critical_issues.len(),
        doc.warnings.len(),
        doc.reconciliation.actual_return_pct
    )
}

pub fn render_report(doc: &VerdictDocument, mode: ReportMode) -> String {
    let mut out = String::new();
    let rule = "─".repeat(72);

    out.push_str(&format!("{}\n", rule));
    out.push_str(&format!(
        "QUALITY GATE: {}  run={}  at={}\n",
        status_label(doc.status),
        doc.run_id,
        doc.evaluated_at.to_rfc3339()
    ));
    out.push_str(&format!("{}\n", rule));

    if !doc.critical_issues.is_empty() {
        out.push_str(&format!("Critical issues ({}):\n", doc.critical_issues.len()));
        for issue in &doc.critical_issues {
            out.push_str(&format!("  ✗ {}\n", issue));
        }
    }

    if mode == ReportMode::Quiet {
        if !doc.warnings.is_empty() {
            out.push_str(&format!("({} warning(s) suppressed)\n", doc.warnings.len()));
        }
        return out;
    }

    if !doc.warnings.is_empty() {
        out.push_str(&format!("Warnings ({}):\n", doc.warnings.len()));
        for w in &doc.warnings {
            out.push_str(&format!("  ⚠ {}\n", w));
        }
    }

    let r = &doc.reconciliation;
    out.push('\n');
    out.push_str("Reconciliation:\n");
    out.push_str(&format!("  initial capital        {:>16.2}\n", r.initial_capital));
    out.push_str(&format!("  realized P&L           {:>16.2}\n", r.realized_pnl));
    out.push_str(&format!("  fees                   {:>16.2}\n", r.total_fees));
    out.push_str(&format!("  unrealized P&L         {:>16.2}\n", r.unrealized_pnl));
    out.push_str(&format!("  bottom-up final equity {:>16.2}\n", r.bottom_up_final_equity));
    out.push_str(&format!("  series final equity    {:>16.2}\n", r.adjusted_final_equity));
    if let Some(claimed) = r.claimed_final_equity {
        out.push_str(&format!("  claimed final equity   {:>16.2}\n", claimed));
    }
    out.push_str(&format!(
        "  actual return          {:>15.4}% ({})\n",
        r.actual_return_pct, r.actual_direction
    ));
    if let Some(reported) = r.reported_return {
        out.push_str(&format!("  reported return        {:>15.4}%\n", reported * 100.0));
    }

    if mode == ReportMode::Verbose {
        out.push('\n');
        out.push_str("Cross-validation matrix:\n");
        for (key, c) in doc.cross_validation_matrix.iter() {
            let mark = if c.agrees { "✓" } else { "✗" };
            out.push_str(&format!("  {} {:<38} {} vs {}\n", mark, key, c.left, c.right));
        }

        let p = &doc.position_analysis;
        out.push('\n');
        out.push_str(&format!(
            "Positions at close: {} (mark-to-market applied: {})\n",
            p.open_positions_count,
            if p.mark_to_market_applied { "yes" } else { "no" }
        ));
        for pos in &p.positions {
            let mark = pos
                .mark_price
                .map(|m| format!("{:.4}", m))
                .unwrap_or_else(|| "n/a".to_string());
            let upnl = pos
                .unrealized_pnl
                .map(|u| format!("{:+.2}", u))
                .unwrap_or_else(|| "n/a".to_string());
            out.push_str(&format!(
                "  {:<12} qty={:<12} mark={:<12} upnl={}\n",
                pos.symbol, pos.quantity, mark, upnl
            ));
        }

        if let Some(e) = &doc.equity_summary {
            out.push('\n');
            out.push_str(&format!(
                "Equity series: {} rows, peak {:.2}, trough {:.2}, max drawdown {:.2}%, trend {}\n",
                e.rows,
                e.peak_equity,
                e.trough_equity,
                e.max_drawdown * 100.0,
                e.trend
            ));
        }

        out.push('\n');
        out.push_str(&format!("Fingerprint: {}\n", doc.artifact_fingerprint.combined));
    }

    out
}

fn status_label(status: GateStatus) -> &'static str {
    match status {
        GateStatus::Passed => "✓ PASSED",
        GateStatus::PassedWithWarnings => "⚠ PASSED WITH WARNINGS",
        GateStatus::Failed => "✗ FAILED (HALT)",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::config::AuditConfig;
    use crate::audit::engine::QualityGateEngine;
    use crate::audit::testkit::{clean_pass_fixture, day, flat_equity_claims_profit_fixture};

    fn doc(fixture: crate::audit::testkit::RunFixture) -> VerdictDocument {
        QualityGateEngine::new(AuditConfig::default())
            .evaluate_artifacts(fixture.build(), day(30))
            .document
    }

    #[test]
    fn test_quiet_mode_hides_warnings_not_criticals() {
        let d = doc(flat_equity_claims_profit_fixture().visualization_trend(
            crate::audit::series::TrendDirection::Flat,
        ));
        let text = render_report(&d, ReportMode::Quiet);
        assert!(text.contains("FAILED"));
        for issue in &d.critical_issues {
            assert!(text.contains(issue.as_str()));
        }
        assert!(!text.contains("Reconciliation"));
    }

    #[test]
    fn test_normal_mode_shows_warnings() {
        let d = doc(clean_pass_fixture().metrics(|m| m.execution.total_trades = Some(9)));
        let quiet = render_report(&d, ReportMode::Quiet);
        let normal = render_report(&d, ReportMode::Normal);
        assert!(quiet.contains("1 warning(s) suppressed"));
        assert!(!quiet.contains(&d.warnings[0]));
        assert!(normal.contains(&d.warnings[0]));
        assert!(normal.contains("Reconciliation"));
        assert!(!normal.contains("Cross-validation matrix"));
    }

    #[test]
    fn test_verbose_mode_shows_matrix() {
        let d = doc(clean_pass_fixture());
        let text = render_report(&d, ReportMode::Verbose);
        assert!(text.contains("Cross-validation matrix"));
        assert!(text.contains("ledger_vs_metrics_trade_count"));
        assert!(text.contains("Positions at close: 0"));
        assert!(text.contains("trend rising"));
    }

    #[test]
    fn test_summary_line() {
        let d = doc(clean_pass_fixture());
        let line = summary_line(&d);
        assert!(line.starts_with("run-fixture"));
        assert!(line.contains("passed"));
        assert!(line.contains("critical=0"));
    }
}
