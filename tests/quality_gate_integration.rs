//! Integration tests for the quality gate
//!
//! Each test writes fixture run directories into a temp dir and exercises
//! either the library pipeline or the compiled `backtest_audit` binary.

use backtest_audit::audit::{
    validate_run, ArtifactKind, AuditConfig, DiscrepancyCategory, FsArtifactLoader, GateStatus,
    LoadError, VerdictDocument,
};
use chrono::{DateTime, TimeZone, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_backtest_audit"))
}

fn as_of() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
}

fn run_cli(args: &[&str]) -> Output {
    Command::new(binary())
        .args(args)
        .env("RUST_LOG", "off")
        .env_remove("AUDIT_CONFIG_PATH")
        .env_remove("AUDIT_BASE_DIR")
        .output()
        .expect("failed to spawn backtest_audit")
}

// =============================================================================
// FIXTURES
// =============================================================================

struct RunContents {
    equity: Vec<f64>,
    final_positions: u32,
    trades: Vec<(&'static str, &'static str, f64, f64, f64, f64)>,
    metrics: serde_json::Value,
    with_events: bool,
    visualization: Option<&'static str>,
}

fn clean_run() -> RunContents {
    RunContents {
        equity: (0..20).map(|i| 100_000.0 + 850.0 * i as f64 / 19.0).collect(),
        final_positions: 0,
        trades: vec![
            ("AAPL", "buy", 100.0, 150.0, 8.80, 0.0),
            ("AAPL", "sell", 100.0, 155.0, 8.80, 500.0),
            ("MSFT", "buy", 50.0, 300.0, 8.80, 0.0),
            ("MSFT", "sell", 50.0, 307.704, 8.80, 385.20),
        ],
        metrics: serde_json::json!({
            "performance": {"total_return": 0.0085, "max_drawdown": 0.0, "sharpe_ratio": 1.4},
            "execution": {"total_trades": 4, "winning_trades": 2, "losing_trades": 0},
            "accounting": {
                "initial_capital": 100000.0,
                "final_equity": 100850.0,
                "total_pnl": 885.20,
                "total_fees": 35.20,
                "unrealized_pnl": 0.0,
                "open_positions": 0
            }
        }),
        with_events: true,
        visualization: Some(r#"{"trend": "rising", "figures": ["equity_curve.png"]}"#),
    }
}

fn flat_run_claiming_profit() -> RunContents {
    RunContents {
        equity: vec![100_000.0; 20],
        final_positions: 0,
        trades: Vec::new(),
        metrics: serde_json::json!({
            "performance": {"total_return": 0.10},
            "accounting": {"final_equity": 110000.0, "unrealized_pnl": 0.0}
        }),
        with_events: true,
        visualization: Some(r#"{"trend": "flat", "figures": []}"#),
    }
}

fn unmarked_open_positions_run() -> RunContents {
    RunContents {
        equity: vec![100_000.0; 10],
        final_positions: 2,
        trades: vec![
            ("AAPL", "buy", 10.0, 190.0, 1.0, 0.0),
            ("MSFT", "buy", 5.0, 410.0, 1.0, 0.0),
        ],
        metrics: serde_json::json!({
            "performance": {"total_return": 0.0},
            "accounting": {"final_equity": 100000.0, "unrealized_pnl": 0.0, "open_positions": 2}
        }),
        with_events: false,
        visualization: None,
    }
}

fn write_run(base: &Path, run_id: &str, contents: &RunContents) -> PathBuf {
    let dir = base.join(run_id);
    fs::create_dir_all(&dir).unwrap();

    let last_day = contents.equity.len();
    let manifest = serde_json::json!({
        "run_id": run_id,
        "strategy": "momentum",
        "parameters": {"lookback": 20},
        "universe": ["AAPL", "MSFT"],
        "start_date": "2024-01-01",
        "end_date": format!("2024-01-{:02}", last_day),
        "status": "completed",
        "initial_capital": 100000.0
    });
    fs::write(dir.join("manifest.json"), manifest.to_string()).unwrap();
    fs::write(dir.join("metrics.json"), contents.metrics.to_string()).unwrap();

    let mut trades = String::from("timestamp,symbol,side,quantity,price,fee,pnl\n");
    for (i, (symbol, side, qty, price, fee, pnl)) in contents.trades.iter().enumerate() {
        trades.push_str(&format!(
            "2024-01-{:02} 14:30:00,{},{},{},{},{},{}\n",
            i + 2,
            symbol,
            side,
            qty,
            price,
            fee,
            pnl
        ));
    }
    fs::write(dir.join("trades.csv"), trades).unwrap();

    let mut equity = String::from("timestamp,equity,drawdown,returns,positions,exposure\n");
    for (i, value) in contents.equity.iter().enumerate() {
        let positions = if i + 1 == contents.equity.len() {
            contents.final_positions
        } else {
            0
        };
        equity.push_str(&format!(
            "2024-01-{:02},{},0,,{},\n",
            i + 1,
            value,
            positions
        ));
    }
    fs::write(dir.join("equity.csv"), equity).unwrap();

    if contents.with_events {
        fs::write(
            dir.join("events.csv"),
            "timestamp,event_type,description\n\
             2024-01-01T09:00:00Z,start,run started\n\
             2024-01-05T12:00:00Z,rebalance,monthly rebalance\n",
        )
        .unwrap();
    }
    if let Some(vis) = contents.visualization {
        fs::write(dir.join("visualization.json"), vis).unwrap();
    }
    dir
}

// =============================================================================
// LIBRARY PIPELINE
// =============================================================================

#[test]
fn test_clean_run_passes() {
    let base = tempfile::tempdir().unwrap();
    write_run(base.path(), "clean", &clean_run());

    let config = AuditConfig::default();
    let loader = FsArtifactLoader::new(base.path(), config.layout.clone());
    let eval = validate_run(&loader, "clean", &config, as_of()).unwrap();

    assert_eq!(eval.document.status, GateStatus::Passed, "{:#?}", eval.document.findings);
    assert!(eval.document.warnings.is_empty());
    assert!(eval.document.critical_issues.is_empty());
    assert_eq!(eval.document.artifact_fingerprint.artifacts.len(), 6);
    assert!(eval.verdict.authorize_registry_append().is_some());
}

#[test]
fn test_flat_run_claiming_profit_fails() {
    let base = tempfile::tempdir().unwrap();
    write_run(base.path(), "flat", &flat_run_claiming_profit());

    let config = AuditConfig::default();
    let loader = FsArtifactLoader::new(base.path(), config.layout.clone());
    let eval = validate_run(&loader, "flat", &config, as_of()).unwrap();

    assert_eq!(eval.document.status, GateStatus::Failed);
    assert!(eval
        .document
        .findings
        .critical_issues
        .iter()
        .any(|d| d.category == DiscrepancyCategory::ReturnDirectionMismatch));
    assert!(eval
        .document
        .critical_issues
        .iter()
        .any(|s| s.contains("110000.00") && s.contains("100000.00")));
}

#[test]
fn test_unmarked_open_positions_fail() {
    let base = tempfile::tempdir().unwrap();
    write_run(base.path(), "open", &unmarked_open_positions_run());

    let config = AuditConfig::default();
    let loader = FsArtifactLoader::new(base.path(), config.layout.clone());
    let eval = validate_run(&loader, "open", &config, as_of()).unwrap();

    assert_eq!(eval.document.status, GateStatus::Failed);
    assert!(eval
        .document
        .findings
        .critical_issues
        .iter()
        .any(|d| d.category == DiscrepancyCategory::MarkToMarketOmission));
    assert_eq!(eval.document.position_analysis.positions.len(), 2);
    // Missing event log and visualization are carried as warnings.
    assert!(eval
        .document
        .findings
        .warnings
        .iter()
        .any(|d| d.category == DiscrepancyCategory::OptionalArtifactMissing));
}

#[test]
fn test_missing_trade_ledger_yields_no_verdict() {
    let base = tempfile::tempdir().unwrap();
    let dir = write_run(base.path(), "broken", &clean_run());
    fs::remove_file(dir.join("trades.csv")).unwrap();

    let config = AuditConfig::default();
    let loader = FsArtifactLoader::new(base.path(), config.layout.clone());
    let err = validate_run(&loader, "broken", &config, as_of()).unwrap_err();
    assert!(matches!(
        err,
        LoadError::MissingArtifact {
            artifact: ArtifactKind::TradeLedger,
            ..
        }
    ));

    let out = run_cli(&[
        "validate",
        "--base-dir",
        base.path().to_str().unwrap(),
        "--run-id",
        "broken",
        "--write-verdict",
    ]);
    assert_eq!(out.status.code(), Some(3));
    assert!(!dir.join("quality_gate_verdict.json").exists());
}

// =============================================================================
// BINARY
// =============================================================================

#[test]
fn test_cli_exit_codes_and_json() {
    let base = tempfile::tempdir().unwrap();
    write_run(base.path(), "clean", &clean_run());
    write_run(base.path(), "flat", &flat_run_claiming_profit());
    let base_dir = base.path().to_str().unwrap();

    let out = run_cli(&["validate", "--base-dir", base_dir, "--run-id", "clean"]);
    assert_eq!(out.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&out.stdout).contains("PASSED"));

    let out = run_cli(&[
        "validate",
        "--base-dir",
        base_dir,
        "--run-id",
        "flat",
        "--json",
        "--as-of",
        "2024-02-01T00:00:00Z",
    ]);
    assert_eq!(out.status.code(), Some(1));
    let doc: VerdictDocument = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(doc.status, GateStatus::Failed);
    assert_eq!(doc.evaluated_at, as_of());

    let out = run_cli(&["validate", "--base-dir", base_dir, "--run-id", "flat", "--boxed"]);
    assert_eq!(out.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("QUALITY GATE VERDICT"));
    assert!(stdout.contains("FAILED (HALT)"));
}

#[test]
fn test_cli_json_is_idempotent_with_as_of() {
    let base = tempfile::tempdir().unwrap();
    write_run(base.path(), "flat", &flat_run_claiming_profit());
    let args = [
        "validate",
        "--base-dir",
        base.path().to_str().unwrap(),
        "--run-id",
        "flat",
        "--json",
        "--as-of",
        "2024-02-01T00:00:00Z",
    ];

    let a = run_cli(&args);
    let b = run_cli(&args);
    assert_eq!(a.stdout, b.stdout);
    assert!(!a.stdout.is_empty());
}

#[test]
fn test_cli_write_verdict_is_write_once() {
    let base = tempfile::tempdir().unwrap();
    let dir = write_run(base.path(), "clean", &clean_run());
    let args = [
        "validate",
        "--base-dir",
        base.path().to_str().unwrap(),
        "--run-id",
        "clean",
        "--quiet",
        "--write-verdict",
    ];

    assert_eq!(run_cli(&args).status.code(), Some(0));
    let verdict = dir.join("quality_gate_verdict.json");
    assert!(verdict.exists());

    // A second write must not overwrite the first verdict.
    assert_eq!(run_cli(&args).status.code(), Some(3));

    let out = run_cli(&["check-verdict", verdict.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&out.stdout).contains("clean passed"));
}

#[test]
fn test_cli_check_verdict_rejects_failed_run() {
    let base = tempfile::tempdir().unwrap();
    let dir = write_run(base.path(), "flat", &flat_run_claiming_profit());

    let out = run_cli(&[
        "validate",
        "--base-dir",
        base.path().to_str().unwrap(),
        "--run-id",
        "flat",
        "--write-verdict",
    ]);
    assert_eq!(out.status.code(), Some(1));

    let verdict = dir.join("quality_gate_verdict.json");
    let out = run_cli(&["check-verdict", verdict.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));

    let out = run_cli(&["check-verdict", dir.join("absent.json").to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(3));
}

#[test]
fn test_cli_check_verdict_rejects_status_edited_to_passed() {
    let base = tempfile::tempdir().unwrap();
    let dir = write_run(base.path(), "flat", &flat_run_claiming_profit());
    let out = run_cli(&[
        "validate",
        "--base-dir",
        base.path().to_str().unwrap(),
        "--run-id",
        "flat",
        "--write-verdict",
    ]);
    assert_eq!(out.status.code(), Some(1));

    let verdict = dir.join("quality_gate_verdict.json");
    let mut value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&verdict).unwrap()).unwrap();
    assert!(!value["critical_issues"].as_array().unwrap().is_empty());
    value["status"] = serde_json::Value::from("passed");
    fs::write(&verdict, serde_json::to_string_pretty(&value).unwrap()).unwrap();

    let out = run_cli(&["check-verdict", verdict.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stdout).contains("flat passed"));
}

#[test]
fn test_cli_batch() {
    let base = tempfile::tempdir().unwrap();
    write_run(base.path(), "a-clean", &clean_run());
    write_run(base.path(), "b-flat", &flat_run_claiming_profit());

    let base_dir = base.path().to_str().unwrap();
    let out = run_cli(&["batch", "--base-dir", base_dir]);
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert_eq!(out.status.code(), Some(1), "{}", stdout);
    assert!(stdout.contains("a-clean"));
    assert!(stdout.contains("b-flat"));
    assert!(stdout.contains("RETURN_DIRECTION_MISMATCH"));

    let dir = write_run(base.path(), "c-broken", &clean_run());
    fs::remove_file(dir.join("equity.csv")).unwrap();
    let out = run_cli(&["batch", "--base-dir", base_dir]);
    assert_eq!(out.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&out.stdout).contains("load_error"));

    let out = run_cli(&["batch", "--base-dir", base_dir, "--run-id", "a-clean"]);
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn test_cli_config_handling() {
    let out = run_cli(&["default-config"]);
    assert_eq!(out.status.code(), Some(0));
    let config: AuditConfig = toml::from_str(&String::from_utf8_lossy(&out.stdout)).unwrap();
    assert_eq!(config, AuditConfig::default());

    let base = tempfile::tempdir().unwrap();
    write_run(base.path(), "clean", &clean_run());
    let bad = base.path().join("bad.toml");
    fs::write(&bad, "[tolerances]\nequity_abs = -5.0\n").unwrap();

    let out = run_cli(&[
        "validate",
        "--base-dir",
        base.path().to_str().unwrap(),
        "--run-id",
        "clean",
        "--config",
        bad.to_str().unwrap(),
    ]);
    assert_eq!(out.status.code(), Some(2));
}
