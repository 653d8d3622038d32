//! Write-once verdict persistence.
//!
//! A verdict document is written next to the run's artifacts with create-new
//! semantics: an existing verdict is never overwritten.

use crate::audit::engine::VerdictDocument;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum VerdictStoreError {
    #[error("verdict already exists at {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("verdict I/O failed at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("verdict at {} is not valid JSON: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Persist `doc` at `path`. Fails if a verdict is already there.
pub fn write_verdict(path: &Path, doc: &VerdictDocument) -> Result<(), VerdictStoreError> {
    let json = doc.to_json_pretty().map_err(|source| VerdictStoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|source| {
            if source.kind() == std::io::ErrorKind::AlreadyExists {
                VerdictStoreError::AlreadyExists(path.to_path_buf())
            } else {
                VerdictStoreError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

    file.write_all(json.as_bytes())
        .and_then(|_| file.write_all(b"\n"))
        .and_then(|_| file.sync_all())
        .map_err(|source| VerdictStoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    info!(
        run_id = %doc.run_id,
        status = %doc.status,
        path = %path.display(),
        "Verdict written"
    );
    Ok(())
}

pub fn read_verdict(path: &Path) -> Result<VerdictDocument, VerdictStoreError> {
    let contents = std::fs::read_to_string(path).map_err(|source| VerdictStoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| VerdictStoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}
