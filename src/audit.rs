//! Audit trail for admission decisions
//!
//! Every rule hit or miss that matters for diagnostics becomes an
//! [`AuditRecord`]. Records are handed to an [`AuditSink`]:
//! - [`TracingSink`] emits structured `tracing` events (the default)
//! - [`FileSink`] appends JSON lines to an audit log file
//! - [`MemorySink`] keeps records in memory for inspection

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::policy::types::Mode;

/// Severity of an audit record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Error,
}

/// What an audit record reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    BlacklistMatch,
    WhitelistMatch,
    WhitelistMiss,
    ReloadFailed,
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditKind::BlacklistMatch => write!(f, "blacklist_match"),
            AuditKind::WhitelistMatch => write!(f, "whitelist_match"),
            AuditKind::WhitelistMiss => write!(f, "whitelist_miss"),
            AuditKind::ReloadFailed => write!(f, "reload_failed"),
        }
    }
}

/// A single audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub level: AuditLevel,
    pub kind: AuditKind,
    pub mode: Mode,
    /// Type name under evaluation, or the policy source for reload failures
    pub type_name: String,
    pub matched_rule: Option<String>,
    /// Free-form detail (reload error text)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditRecord {
    pub fn new(level: AuditLevel, kind: AuditKind, mode: Mode, type_name: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            kind,
            mode,
            type_name: type_name.to_string(),
            matched_rule: None,
            detail: None,
        }
    }

    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.matched_rule = Some(rule.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Destination for audit records
///
/// Implementations must be callable from many threads at once.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord);

    /// Push buffered records to durable storage
    fn flush(&self) {}
}

/// Emits records as `tracing` events under the `serialgate::audit` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, record: &AuditRecord) {
        let rule = record.matched_rule.as_deref().unwrap_or("-");
        let detail = record.detail.as_deref().unwrap_or("");
        match record.level {
            AuditLevel::Info => tracing::info!(
                target: "serialgate::audit",
                kind = %record.kind,
                mode = %record.mode,
                type_name = %record.type_name,
                rule = %rule,
                detail = %detail,
                "{}",
                record.kind
            ),
            AuditLevel::Error => tracing::error!(
                target: "serialgate::audit",
                kind = %record.kind,
                mode = %record.mode,
                type_name = %record.type_name,
                rule = %rule,
                detail = %detail,
                "{}",
                record.kind
            ),
        }
    }
}

/// Appends records to a file as JSON lines
pub struct FileSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileSink {
    /// Open (or create) the audit log for appending
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create audit log directory")?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open audit log {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileSink {
    fn record(&self, record: &AuditRecord) {
        let json = match serde_json::to_string(record) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!("Failed to serialize audit record: {}", e);
                return;
            }
        };

        let mut writer = self.writer.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Audit log lock was poisoned, recovering");
            poisoned.into_inner()
        });
        if let Err(e) = writeln!(writer, "{}", json) {
            tracing::warn!("Failed to write audit log {}: {}", self.path.display(), e);
        }
    }

    fn flush(&self) {
        let mut writer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = writer.flush() {
            tracing::warn!("Failed to flush audit log {}: {}", self.path.display(), e);
        }
    }
}

/// Keeps every record in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<AuditRecord>>,
    flushes: std::sync::atomic::AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all records received so far
    pub fn records(&self) -> Vec<AuditRecord> {
        self.lock().clone()
    }

    /// Drain all records received so far
    pub fn take(&self) -> Vec<AuditRecord> {
        std::mem::take(&mut *self.lock())
    }

    pub fn count(&self, kind: AuditKind) -> usize {
        self.lock().iter().filter(|r| r.kind == kind).count()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<AuditRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AuditSink for MemorySink {
    fn record(&self, record: &AuditRecord) {
        self.lock().push(record.clone());
    }

    fn flush(&self) {
        self.flushes
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
}
