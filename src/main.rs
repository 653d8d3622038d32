//! Backtest Audit CLI
//!
//! Operator entrypoint for validating completed simulation runs.
//!
//! # Usage
//!
//! ```bash
//! backtest_audit validate --base-dir ./runs --run-id run-2024-06-01 --write-verdict
//! backtest_audit batch --base-dir ./runs
//! backtest_audit check-verdict ./runs/run-2024-06-01/quality_gate_verdict.json
//! backtest_audit default-config > audit.toml
//! ```
//!
//! # Exit Codes
//!
//! - 0: passed or passed_with_warnings
//! - 1: failed (at least one critical issue)
//! - 2: configuration or argument error
//! - 3: fatal load or I/O error, no verdict

use anyhow::{anyhow, Context, Result};
use backtest_audit::audit::artifacts::parse_timestamp;
use backtest_audit::audit::{
    read_verdict, render_report, summary_line, validate_run, write_verdict, AuditConfig,
    FsArtifactLoader, GateStatus, LoadError, QualityGate, ReportMode, RunEvaluation,
};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EXIT_OK: i32 = 0;
const EXIT_FAILED: i32 = 1;
const EXIT_CONFIG: i32 = 2;
const EXIT_FATAL: i32 = 3;

/// Reconciliation and quality gate for completed backtest runs
#[derive(Parser, Debug)]
#[command(name = "backtest_audit", version)]
#[command(about = "Cross-check run artifacts and decide whether a run may be trusted")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate one run and print its verdict
    Validate {
        #[command(flatten)]
        common: CommonArgs,

        /// Run identifier (subdirectory of the base directory)
        #[arg(short, long)]
        run_id: String,

        /// Print the verdict document as JSON instead of a report
        #[arg(long)]
        json: bool,

        /// Only the status line and critical issues
        #[arg(short, long, conflicts_with = "verbose")]
        quiet: bool,

        /// Include the cross-validation matrix and open positions
        #[arg(short, long)]
        verbose: bool,

        /// Print only the boxed gate decision
        #[arg(long, conflicts_with_all = ["json", "verbose"])]
        boxed: bool,
    },

    /// Validate many runs in parallel
    Batch {
        #[command(flatten)]
        common: CommonArgs,

        /// Run identifiers (every subdirectory when omitted)
        #[arg(short, long = "run-id")]
        run_ids: Vec<String>,
    },

    /// Exit 0 iff a persisted verdict allows registry recording
    CheckVerdict {
        /// Path to a verdict document
        path: PathBuf,
    },

    /// Print the default configuration as TOML
    DefaultConfig,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Directory containing one subdirectory per run
    #[arg(short, long, env = "AUDIT_BASE_DIR")]
    base_dir: PathBuf,

    /// Audit configuration (TOML); defaults to $AUDIT_CONFIG_PATH or audit.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verdict timestamp (RFC 3339); defaults to now
    #[arg(long)]
    as_of: Option<String>,

    /// Write the verdict document into the run directory (never overwrites)
    #[arg(long)]
    write_verdict: bool,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "backtest_audit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Validate {
            common,
            run_id,
            json,
            quiet,
            verbose,
            boxed,
        } => {
            let mode = if quiet {
                ReportMode::Quiet
            } else if verbose {
                ReportMode::Verbose
            } else {
                ReportMode::Normal
            };
            let output = if json {
                Output::Json
            } else if boxed {
                Output::Boxed {
                    include_warnings: !quiet,
                }
            } else {
                Output::Report(mode)
            };
            cmd_validate(&common, &run_id, output)
        }
        Commands::Batch { common, run_ids } => cmd_batch(&common, run_ids),
        Commands::CheckVerdict { path } => cmd_check_verdict(&path),
        Commands::DefaultConfig => match AuditConfig::default().to_toml() {
            Ok(toml) => {
                print!("{}", toml);
                EXIT_OK
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                EXIT_FATAL
            }
        },
    };

    std::process::exit(code);
}

// =============================================================================
// SETUP
// =============================================================================

struct Setup {
    config: AuditConfig,
    loader: FsArtifactLoader,
    as_of: DateTime<Utc>,
}

fn setup(common: &CommonArgs) -> Result<Setup> {
    let config = match &common.config {
        Some(path) => AuditConfig::load(path)
            .with_context(|| format!("Failed to load audit config {}", path.display()))?,
        None => AuditConfig::from_env(),
    };
    let as_of = match &common.as_of {
        Some(raw) => parse_timestamp(raw).map_err(|e| anyhow!("--as-of: {}", e))?,
        None => Utc::now(),
    };
    let loader = FsArtifactLoader::new(&common.base_dir, config.layout.clone());
    Ok(Setup {
        config,
        loader,
        as_of,
    })
}

fn exit_code(status: GateStatus) -> i32 {
    match status {
        GateStatus::Passed | GateStatus::PassedWithWarnings => EXIT_OK,
        GateStatus::Failed => EXIT_FAILED,
    }
}

fn persist(setup: &Setup, eval: &RunEvaluation) -> Result<PathBuf> {
    let path = setup
        .loader
        .run_dir(&eval.document.run_id)
        .join(&setup.config.layout.verdict);
    write_verdict(&path, &eval.document)
        .with_context(|| format!("Failed to persist verdict for {}", eval.document.run_id))?;
    Ok(path)
}

// =============================================================================
// COMMANDS
// =============================================================================

enum Output {
    Json,
    Boxed { include_warnings: bool },
    Report(ReportMode),
}

fn cmd_validate(common: &CommonArgs, run_id: &str, output: Output) -> i32 {
    let setup = match setup(common) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return EXIT_CONFIG;
        }
    };

    let eval = match validate_run(&setup.loader, run_id, &setup.config, setup.as_of) {
        Ok(eval) => eval,
        Err(e) => {
            error!(run_id = %run_id, artifact = %e.artifact(), "Validation aborted: {}", e);
            eprintln!("Error: {}", e);
            eprintln!("No verdict produced for run {}", run_id);
            return EXIT_FATAL;
        }
    };

    if common.write_verdict {
        if let Err(e) = persist(&setup, &eval) {
            eprintln!("Error: {:#}", e);
            return EXIT_FATAL;
        }
    }

    match output {
        Output::Json => match eval.document.to_json_pretty() {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: failed to serialize verdict: {}", e);
                return EXIT_FATAL;
            }
        },
        Output::Boxed { include_warnings } => {
            print!("{}", eval.verdict.format_report(include_warnings))
        }
        Output::Report(mode) => print!("{}", render_report(&eval.document, mode)),
    }

    match QualityGate::require_passed(&eval.verdict) {
        Ok(permit) => {
            info!(
                run_id = %permit.run_id(),
                status = %permit.status(),
                "Run may be recorded in the registry"
            );
            EXIT_OK
        }
        Err(refusal) => {
            error!("{}", refusal.verdict.format_compact());
            EXIT_FAILED
        }
    }
}

fn list_runs(base_dir: &Path) -> Result<Vec<String>> {
    let mut runs = Vec::new();
    for entry in std::fs::read_dir(base_dir)
        .with_context(|| format!("Failed to list runs in {}", base_dir.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            runs.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    runs.sort();
    Ok(runs)
}

fn cmd_batch(common: &CommonArgs, run_ids: Vec<String>) -> i32 {
    let setup = match setup(common) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return EXIT_CONFIG;
        }
    };

    let run_ids = if run_ids.is_empty() {
        match list_runs(&common.base_dir) {
            Ok(ids) => ids,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                return EXIT_FATAL;
            }
        }
    } else {
        run_ids
    };
    info!(runs = run_ids.len(), "Validating batch");

    let results: Vec<(String, Result<RunEvaluation, LoadError>)> = run_ids
        .par_iter()
        .map(|id| {
            (
                id.clone(),
                validate_run(&setup.loader, id, &setup.config, setup.as_of),
            )
        })
        .collect();

    let mut code = EXIT_OK;
    for (run_id, result) in &results {
        match result {
            Ok(eval) => {
                println!("{}", summary_line(&eval.document));
                for issue in &eval.document.critical_issues {
                    println!("    {}", issue);
                }
                if common.write_verdict {
                    if let Err(e) = persist(&setup, eval) {
                        eprintln!("Error: {:#}", e);
                        code = code.max(EXIT_FATAL);
                    }
                }
                code = code.max(exit_code(eval.verdict.status()));
            }
            Err(e) => {
                println!("{:<24} {:<22} {}", run_id, "load_error", e);
                code = code.max(EXIT_FATAL);
            }
        }
    }
    code
}

fn cmd_check_verdict(path: &Path) -> i32 {
    match read_verdict(path) {
        Ok(doc) => {
            println!("{} {}", doc.run_id, doc.status);
            if !doc.is_failed() && doc.has_critical_issues() {
                error!(
                    run_id = %doc.run_id,
                    "Verdict status {} contradicts its recorded critical issues",
                    doc.status
                );
            }
            if doc.permits_registry_append() {
                exit_code(doc.status)
            } else {
                EXIT_FAILED
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_FATAL
        }
    }
}
