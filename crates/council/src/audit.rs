//! Append-only audit trail for deliberations.
//!
//! Every completed deliberation writes one immutable record containing
//! the full decision context: raw responses (including timeouts and
//! failures), clusters, weights, and the final result. Audit failure is
//! fatal to the deliberation, so sinks must report errors rather than
//! swallow them.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::error::{CouncilResult, DeliberationError};
use crate::types::AuditRecord;

/// Error appending to an audit sink.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit append failed: {0}")]
    AppendFailed(String),
    #[error("audit record serialization failed: {0}")]
    SerializeFailed(String),
}

/// Durable destination for audit records. Records are append-only; sinks
/// never mutate or delete what they have accepted.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append a record. Returning an error fails the deliberation.
    async fn append(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

/// In-memory sink for tests and embedded use.
#[derive(Default)]
pub struct MemoryAuditSink {
    records: std::sync::RwLock<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all accepted records, in append order.
    pub fn records(&self) -> Vec<AuditRecord> {
        match self.records.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self.records.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut guard = self
            .records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.push(record.clone());
        Ok(())
    }
}

/// JSON-lines file sink: one serialized record per line, opened in
/// append mode and flushed per record.
pub struct JsonlAuditSink {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl JsonlAuditSink {
    /// Open (or create) the audit log at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| AuditError::AppendFailed(format!("open {}: {e}", path.display())))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(record)
            .map_err(|e| AuditError::SerializeFailed(e.to_string()))?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .map_err(|e| AuditError::AppendFailed(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| AuditError::AppendFailed(e.to_string()))?;
        Ok(())
    }
}

/// Writes deliberation records through a sink and maps sink failures to
/// the fatal deliberation error.
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
}

impl AuditRecorder {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Persist one record. Returns the record id on success.
    pub async fn record(&self, record: &AuditRecord) -> CouncilResult<Uuid> {
        self.sink
            .append(record)
            .await
            .map_err(|e| DeliberationError::AuditWrite {
                reason: e.to_string(),
            })?;
        info!(
            record_id = %record.id,
            deliberation_id = %record.deliberation_id,
            responses = record.responses.len(),
            "audit record written"
        );
        Ok(record.id)
    }
}
