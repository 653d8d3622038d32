//! Artifact Loader
//!
//! The only component that performs I/O. Reads every artifact of a run into
//! normalized typed records and fails fast when a required artifact is absent
//! or malformed. Missing optional artifacts become warnings attached to the
//! loaded run, never errors.

use crate::audit::artifacts::{
    parse_timestamp, ArtifactFingerprint, ArtifactKind, EquityRow, EventRecord, MetricsDoc,
    PortfolioState, RunArtifacts, RunManifest, TradeRecord, TradeSide, VisualizationSummary,
};
use crate::audit::config::ArtifactLayout;
use crate::audit::discrepancy::{Discrepancy, DiscrepancyCategory};
use crate::audit::series::TrendDirection;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Fatal load failure. No verdict is produced.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("missing required artifact {artifact} at {}", .path.display())]
    MissingArtifact { artifact: ArtifactKind, path: PathBuf },

    #[error("malformed artifact {artifact} at {}: {reason}", .path.display())]
    MalformedArtifact {
        artifact: ArtifactKind,
        path: PathBuf,
        reason: String,
    },
}

impl LoadError {
    pub fn artifact(&self) -> ArtifactKind {
        match self {
            Self::MissingArtifact { artifact, .. } | Self::MalformedArtifact { artifact, .. } => {
                *artifact
            }
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::MissingArtifact { path, .. } | Self::MalformedArtifact { path, .. } => path,
        }
    }
}

/// A loaded bundle plus the findings raised while loading it.
#[derive(Debug, Clone)]
pub struct LoadedRun {
    pub artifacts: RunArtifacts,
    /// Warnings about optional artifacts that were absent.
    pub notes: Vec<Discrepancy>,
}

impl LoadedRun {
    pub fn new(artifacts: RunArtifacts) -> Self {
        Self {
            artifacts,
            notes: Vec::new(),
        }
    }
}

/// Source of run artifacts.
pub trait ArtifactLoader: Send + Sync {
    fn load(&self, run_id: &str) -> Result<LoadedRun, LoadError>;
}

// =============================================================================
// FILESYSTEM LOADER
// =============================================================================

/// Loads `<base_dir>/<run_id>/` using the configured file layout.
#[derive(Debug, Clone)]
pub struct FsArtifactLoader {
    base_dir: PathBuf,
    layout: ArtifactLayout,
}

impl FsArtifactLoader {
    pub fn new(base_dir: impl Into<PathBuf>, layout: ArtifactLayout) -> Self {
        Self {
            base_dir: base_dir.into(),
            layout,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.base_dir.join(run_id)
    }

    pub fn artifact_path(&self, run_id: &str, kind: ArtifactKind) -> PathBuf {
        let file = match kind {
            ArtifactKind::Manifest => &self.layout.manifest,
            ArtifactKind::Metrics => &self.layout.metrics,
            ArtifactKind::TradeLedger => &self.layout.trades,
            ArtifactKind::EquitySeries => &self.layout.equity,
            ArtifactKind::EventLog => &self.layout.events,
            ArtifactKind::Visualization => &self.layout.visualization,
            ArtifactKind::PortfolioState => &self.layout.portfolio,
        };
        self.run_dir(run_id).join(file)
    }
}

impl ArtifactLoader for FsArtifactLoader {
    fn load(&self, run_id: &str) -> Result<LoadedRun, LoadError> {
        let mut reader = RunReader {
            loader: self,
            run_id,
            digests: BTreeMap::new(),
        };
        let mut notes = Vec::new();

        let manifest = reader.required(ArtifactKind::Manifest, parse_manifest)?;
        let metrics = reader.required(ArtifactKind::Metrics, parse_json::<MetricsDoc>)?;
        let trades = reader.required(ArtifactKind::TradeLedger, parse_trades)?;
        let equity = reader.required(ArtifactKind::EquitySeries, parse_equity)?;

        let events = reader.optional(ArtifactKind::EventLog, parse_events)?;
        let visualization = reader.optional(ArtifactKind::Visualization, parse_visualization)?;
        let portfolio = reader.optional(ArtifactKind::PortfolioState, parse_json::<PortfolioState>)?;

        let mut manifest = manifest;
        if manifest.run_id.is_empty() {
            manifest.run_id = run_id.to_string();
        } else if manifest.run_id != run_id {
            warn!(
                run_id = %run_id,
                manifest_run_id = %manifest.run_id,
                "Manifest run_id differs from run directory; using directory name"
            );
            manifest.run_id = run_id.to_string();
        }

        let mut artifacts = RunArtifacts::new(manifest, metrics, trades, equity).map_err(|e| {
            LoadError::MalformedArtifact {
                artifact: e.artifact(),
                path: self.artifact_path(run_id, e.artifact()),
                reason: e.to_string(),
            }
        })?;

        match events {
            Some(events) => artifacts = artifacts.with_events(events),
            None => notes.push(Discrepancy::warning(
                DiscrepancyCategory::OptionalArtifactMissing,
                format!(
                    "event log not found at {}; event log checks skipped",
                    self.artifact_path(run_id, ArtifactKind::EventLog).display()
                ),
                &[ArtifactKind::EventLog],
            )),
        }
        match visualization {
            Some(v) => artifacts = artifacts.with_visualization(v),
            None => notes.push(Discrepancy::warning(
                DiscrepancyCategory::OptionalArtifactMissing,
                format!(
                    "visualization summary not found at {}; chart trend check skipped",
                    self.artifact_path(run_id, ArtifactKind::Visualization).display()
                ),
                &[ArtifactKind::Visualization],
            )),
        }
        if let Some(p) = portfolio {
            artifacts = artifacts.with_portfolio(p);
        }

        let fingerprint = ArtifactFingerprint::from_digests(reader.digests);
        let artifacts = artifacts.with_fingerprint(fingerprint);

        info!(
            run_id = %run_id,
            trades = artifacts.trades().len(),
            equity_rows = artifacts.equity().len(),
            missing_optional = notes.len(),
            fingerprint = %artifacts.fingerprint().combined,
            "Loaded run artifacts"
        );

        Ok(LoadedRun { artifacts, notes })
    }
}

/// Per-load state: which run, and the digests collected so far.
struct RunReader<'a> {
    loader: &'a FsArtifactLoader,
    run_id: &'a str,
    digests: BTreeMap<String, String>,
}

type Parser<T> = fn(&[u8]) -> Result<T, String>;

impl RunReader<'_> {
    fn required<T>(&mut self, kind: ArtifactKind, parse: Parser<T>) -> Result<T, LoadError> {
        let path = self.loader.artifact_path(self.run_id, kind);
        match self.read(kind, &path, parse)? {
            Some(value) => Ok(value),
            None => Err(LoadError::MissingArtifact {
                artifact: kind,
                path,
            }),
        }
    }

    fn optional<T>(&mut self, kind: ArtifactKind, parse: Parser<T>) -> Result<Option<T>, LoadError> {
        let path = self.loader.artifact_path(self.run_id, kind);
        let value = self.read(kind, &path, parse)?;
        if value.is_none() {
            debug!(run_id = %self.run_id, artifact = %kind, "Optional artifact absent");
        }
        Ok(value)
    }

    fn read<T>(
        &mut self,
        kind: ArtifactKind,
        path: &Path,
        parse: Parser<T>,
    ) -> Result<Option<T>, LoadError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LoadError::MalformedArtifact {
                    artifact: kind,
                    path: path.to_path_buf(),
                    reason: format!("unreadable: {}", e),
                })
            }
        };

        let value = parse(&bytes).map_err(|reason| LoadError::MalformedArtifact {
            artifact: kind,
            path: path.to_path_buf(),
            reason,
        })?;

        self.digests
            .insert(kind.as_str().to_string(), hex::encode(Sha256::digest(&bytes)));
        debug!(
            run_id = %self.run_id,
            artifact = %kind,
            path = %path.display(),
            bytes = bytes.len(),
            "Loaded artifact"
        );
        Ok(Some(value))
    }
}

// =============================================================================
// JSON ARTIFACTS
// =============================================================================

fn parse_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, String> {
    serde_json::from_slice(bytes).map_err(|e| e.to_string())
}

/// Manifest as written by the backtest engine.
#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    run_id: String,
    #[serde(default)]
    strategy: String,
    #[serde(default)]
    parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    universe: Vec<String>,
    #[serde(default, alias = "start")]
    start_date: Option<String>,
    #[serde(default, alias = "end")]
    end_date: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    initial_capital: Option<f64>,
}

fn parse_manifest(bytes: &[u8]) -> Result<RunManifest, String> {
    let raw: RawManifest = parse_json(bytes)?;
    let ts = |field: &str, value: Option<String>| -> Result<Option<DateTime<Utc>>, String> {
        value
            .map(|s| parse_timestamp(&s).map_err(|e| format!("{}: {}", field, e)))
            .transpose()
    };
    Ok(RunManifest {
        run_id: raw.run_id,
        strategy: raw.strategy,
        parameters: raw.parameters,
        universe: raw.universe,
        start: ts("start_date", raw.start_date)?,
        end: ts("end_date", raw.end_date)?,
        status: raw.status,
        initial_capital: raw.initial_capital,
    })
}

#[derive(Debug, Deserialize)]
struct RawVisualization {
    #[serde(default)]
    trend: Option<String>,
    #[serde(default)]
    figures: Vec<String>,
    #[serde(default)]
    equity_points: Vec<f64>,
}

fn parse_visualization(bytes: &[u8]) -> Result<VisualizationSummary, String> {
    let raw: RawVisualization = parse_json(bytes)?;
    let trend = raw
        .trend
        .map(|label| {
            TrendDirection::parse(&label).ok_or_else(|| format!("unknown trend label '{}'", label))
        })
        .transpose()?;
    Ok(VisualizationSummary {
        trend,
        figures: raw.figures,
        equity_points: raw.equity_points,
    })
}

// =============================================================================
// CSV ARTIFACTS
// =============================================================================

struct CsvTable {
    columns: HashMap<String, usize>,
    rows: Vec<(u64, csv::StringRecord)>,
}

fn read_csv(bytes: &[u8], required: &[&str]) -> Result<CsvTable, String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let columns: HashMap<String, usize> = reader
        .headers()
        .map_err(|e| e.to_string())?
        .iter()
        .enumerate()
        .map(|(i, h)| (h.to_ascii_lowercase(), i))
        .collect();
    for col in required {
        if !columns.contains_key(*col) {
            return Err(format!("missing column '{}'", col));
        }
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| e.to_string())?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        rows.push((line, record));
    }
    Ok(CsvTable { columns, rows })
}

/// Accessor for one CSV row that formats errors with the line number.
struct Row<'a> {
    line: u64,
    record: &'a csv::StringRecord,
    columns: &'a HashMap<String, usize>,
}

impl<'a> Row<'a> {
    fn cell(&self, col: &str) -> Option<&'a str> {
        self.columns
            .get(col)
            .and_then(|&i| self.record.get(i))
            .filter(|s| !s.is_empty())
    }

    fn err(&self, col: &str, msg: impl std::fmt::Display) -> String {
        format!("row {} column '{}': {}", self.line, col, msg)
    }

    fn text(&self, col: &str) -> Result<&'a str, String> {
        self.cell(col).ok_or_else(|| self.err(col, "empty value"))
    }

    fn number(&self, col: &str) -> Result<f64, String> {
        let raw = self.text(col)?;
        self.parse_number(col, raw)
    }

    fn number_or(&self, col: &str, default: f64) -> Result<f64, String> {
        Ok(self.optional_number(col)?.unwrap_or(default))
    }

    fn optional_number(&self, col: &str) -> Result<Option<f64>, String> {
        self.cell(col).map(|raw| self.parse_number(col, raw)).transpose()
    }

    fn parse_number(&self, col: &str, raw: &str) -> Result<f64, String> {
        let v: f64 = raw
            .parse()
            .map_err(|_| self.err(col, format!("not a number '{}'", raw)))?;
        if !v.is_finite() {
            return Err(self.err(col, format!("non-finite value '{}'", raw)));
        }
        Ok(v)
    }

    fn timestamp(&self, col: &str) -> Result<DateTime<Utc>, String> {
        parse_timestamp(self.text(col)?).map_err(|e| self.err(col, e))
    }
}

fn rows(table: &CsvTable) -> impl Iterator<Item = Row<'_>> {
    table.rows.iter().map(|(line, record)| Row {
        line: *line,
        record,
        columns: &table.columns,
    })
}

fn parse_trades(bytes: &[u8]) -> Result<Vec<TradeRecord>, String> {
    let table = read_csv(
        bytes,
        &["timestamp", "symbol", "side", "quantity", "price", "fee", "pnl"],
    )?;
    rows(&table)
        .map(|row| {
            let side_raw = row.text("side")?;
            let side = TradeSide::parse(side_raw)
                .ok_or_else(|| row.err("side", format!("unknown side '{}'", side_raw)))?;
            let quantity = row.number("quantity")?;
            if quantity < 0.0 {
                return Err(row.err("quantity", format!("negative quantity {}", quantity)));
            }
            Ok(TradeRecord {
                timestamp: row.timestamp("timestamp")?,
                symbol: row.text("symbol")?.to_string(),
                side,
                quantity,
                price: row.number("price")?,
                // Blank cells are zero; the columns themselves are required.
                fee: row.number_or("fee", 0.0)?,
                pnl: row.number_or("pnl", 0.0)?,
            })
        })
        .collect()
}

fn parse_equity(bytes: &[u8]) -> Result<Vec<EquityRow>, String> {
    let table = read_csv(bytes, &["timestamp", "equity"])?;
    rows(&table)
        .map(|row| {
            let positions = row.number_or("positions", 0.0)?;
            if positions < 0.0 || positions.fract() != 0.0 || positions > u32::MAX as f64 {
                return Err(row.err("positions", format!("invalid position count {}", positions)));
            }
            Ok(EquityRow {
                timestamp: row.timestamp("timestamp")?,
                equity: row.number("equity")?,
                drawdown: row.optional_number("drawdown")?,
                returns: row.optional_number("returns")?,
                positions: positions as u32,
                exposure: row.optional_number("exposure")?,
            })
        })
        .collect()
}

fn parse_events(bytes: &[u8]) -> Result<Vec<EventRecord>, String> {
    let table = read_csv(bytes, &["timestamp", "event_type"])?;
    rows(&table)
        .map(|row| {
            Ok(EventRecord {
                timestamp: row.timestamp("timestamp")?,
                event_type: row.text("event_type")?.to_string(),
                description: row.cell("description").unwrap_or_default().to_string(),
            })
        })
        .collect()
}
