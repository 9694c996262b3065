//! Destinations for serialized audit lines.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Tracing target the audit trail is written to.
pub const AUDIT_TARGET: &str = "SERVICE_AUDIT";

#[derive(Debug, Error)]
pub enum AuditSinkError {
    #[error("failed to serialize audit entry: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to write audit entry: {0}")]
    Io(#[from] std::io::Error),
}

/// Appends one JSON line per call.
pub trait AuditSink: Send + Sync {
    fn append(&self, line: &str) -> Result<(), AuditSinkError>;
}

/// Writes audit lines to the `SERVICE_AUDIT` tracing target.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn append(&self, line: &str) -> Result<(), AuditSinkError> {
        tracing::info!(target: AUDIT_TARGET, "{}", line);
        Ok(())
    }
}

/// Appends audit lines to a file.
pub struct FileAuditSink {
    file: Mutex<File>,
}

impl FileAuditSink {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open audit file: {:?}", path))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn append(&self, line: &str) -> Result<(), AuditSinkError> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(file, "{}", line)?;
        file.flush()?;
        Ok(())
    }
}

/// Keeps audit lines in memory.
#[derive(Clone, Default)]
pub struct MemoryAuditSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Lines parsed back into JSON values. Unparseable lines are skipped.
    pub fn entries(&self) -> Vec<serde_json::Value> {
        self.lines()
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, line: &str) -> Result<(), AuditSinkError> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
        Ok(())
    }
}
