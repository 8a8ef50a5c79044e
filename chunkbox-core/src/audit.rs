//! Best-effort audit trail. A sink that fails is logged and ignored; it never
//! fails the operation being audited.

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

pub const SHELL_OPEN: &str = "SHELL_OPEN";
pub const SHELL_COMMAND: &str = "SHELL_COMMAND";
pub const SHELL_CLOSE: &str = "SHELL_CLOSE";
pub const FILE_CHUNKED: &str = "FILE_CHUNKED";
pub const CHUNKS_VERIFIED: &str = "CHUNKS_VERIFIED";
pub const FILE_REASSEMBLED: &str = "FILE_REASSEMBLED";
pub const FILE_SHARED: &str = "FILE_SHARED";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AuditEvent {
    pub timestamp: String,
    pub username: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    pub details: String,
}

impl AuditEvent {
    pub fn new(username: &str, action: &str, details: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            username: username.to_string(),
            action: action.to_string(),
            target_file: None,
            container_id: None,
            details: details.into(),
        }
    }

    pub fn target(mut self, file: impl Into<String>) -> Self {
        self.target_file = Some(file.into());
        self
    }

    pub fn container(mut self, id: impl Into<String>) -> Self {
        self.container_id = Some(id.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent) -> anyhow::Result<()>;
}

/// Deliver `event`, logging (not propagating) a sink failure.
pub fn emit(sink: &dyn AuditSink, event: AuditEvent) {
    if let Err(e) = sink.record(&event) {
        tracing::warn!(action = %event.action, error = %format!("{e:#}"), "audit event dropped");
    }
}

/// Emits each event as a `tracing` record on the `audit` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn record(&self, event: &AuditEvent) -> anyhow::Result<()> {
        tracing::info!(
            target: "audit",
            user = %event.username,
            action = %event.action,
            target_file = ?event.target_file,
            container_id = ?event.container_id,
            details = %event.details,
            "audit event"
        );
        Ok(())
    }
}

/// Appends one JSON object per line.
#[derive(Debug)]
pub struct JsonlAudit {
    path: PathBuf,
    write: Mutex<()>,
}

impl JsonlAudit {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write: Mutex::new(()) }
    }
}

impl AuditSink for JsonlAudit {
    fn record(&self, event: &AuditEvent) -> anyhow::Result<()> {
        let _guard = self.write.lock().map_err(|_| anyhow!("audit writer poisoned"))?;
        let mut line = serde_json::to_vec(event).context("serialize audit event")?;
        line.push(b'\n');
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open audit log {}", self.path.display()))?;
        f.write_all(&line).with_context(|| format!("append audit log {}", self.path.display()))?;
        Ok(())
    }
}

/// Keeps events in memory; handy for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryAudit {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAudit {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl AuditSink for MemoryAudit {
    fn record(&self, event: &AuditEvent) -> anyhow::Result<()> {
        self.events.lock().map_err(|_| anyhow!("audit buffer poisoned"))?.push(event.clone());
        Ok(())
    }
}
