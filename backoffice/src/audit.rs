//! Audit trail for committed transitions
//!
//! Features:
//! - Records are shaped synchronously and never fail the caller
//! - SHA-256 hash chain in emission order
//! - Background worker persists in submission order
//! - Persistence failures are logged and counted, not returned

use crate::repository::RepositoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};
use uuid::Uuid;

/// Mutation being recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Payment status changed
    PaymentStatusUpdated,
    /// Receipt attached, payment moved to receipt_sent
    PaymentReceiptUploaded,
    /// Withdrawal batched from approved payments
    WithdrawalCreated,
    /// Withdrawal status changed
    WithdrawalStatusUpdated,
}

impl AuditAction {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::PaymentStatusUpdated => "payment_status_updated",
            AuditAction::PaymentReceiptUploaded => "payment_receipt_uploaded",
            AuditAction::WithdrawalCreated => "withdrawal_created",
            AuditAction::WithdrawalStatusUpdated => "withdrawal_status_updated",
        }
    }
}

/// Immutable description of one committed mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Unique record id
    pub record_id: Uuid,

    /// Who caused the mutation
    pub actor_id: String,

    /// What happened
    pub action: AuditAction,

    /// Affected record ids
    pub target_ids: Vec<String>,

    /// State before (`null` on creation)
    pub before: Value,

    /// State after
    pub after: Value,

    /// When the record was shaped
    pub recorded_at: DateTime<Utc>,

    /// Hash of the preceding record, empty for the first
    pub previous_hash: String,

    /// Hash over every field above
    pub hash: String,
}

impl AuditRecord {
    fn new(
        actor_id: &str,
        action: AuditAction,
        before: Value,
        after: Value,
        target_ids: Vec<String>,
        previous_hash: String,
    ) -> Self {
        let mut record = Self {
            record_id: Uuid::now_v7(),
            actor_id: actor_id.to_string(),
            action,
            target_ids,
            before,
            after,
            recorded_at: Utc::now(),
            previous_hash,
            hash: String::new(),
        };
        record.hash = record.compute_hash();
        record
    }

    fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();

        hasher.update(self.record_id.as_bytes());
        hasher.update(self.actor_id.as_bytes());
        hasher.update(self.action.as_str().as_bytes());
        for id in &self.target_ids {
            hasher.update(id.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(self.before.to_string().as_bytes());
        hasher.update(self.after.to_string().as_bytes());
        hasher.update(self.recorded_at.to_rfc3339().as_bytes());
        hasher.update(self.previous_hash.as_bytes());

        hex::encode(hasher.finalize())
    }

    /// Whether the stored hash matches the contents
    pub fn verify_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }
}

/// Check hashes and links of consecutive records
///
/// Returns the index of the first broken record.
pub fn verify_chain(records: &[AuditRecord]) -> std::result::Result<(), usize> {
    let mut previous: Option<&str> = None;
    for (i, record) in records.iter().enumerate() {
        if !record.verify_hash() {
            return Err(i);
        }
        if let Some(prev) = previous {
            if record.previous_hash != prev {
                return Err(i);
            }
        }
        previous = Some(&record.hash);
    }
    Ok(())
}

/// Destination for audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Store one record
    async fn persist(&self, record: &AuditRecord) -> Result<(), RepositoryError>;

    /// Hash of the last stored record, to continue an existing chain
    fn chain_head(&self) -> Option<String> {
        None
    }
}

#[async_trait]
impl<T: AuditSink + ?Sized> AuditSink for Arc<T> {
    async fn persist(&self, record: &AuditRecord) -> Result<(), RepositoryError> {
        (**self).persist(record).await
    }

    fn chain_head(&self) -> Option<String> {
        (**self).chain_head()
    }
}

/// Worker totals, returned when the emitter is dropped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditStats {
    /// Records stored
    pub persisted: u64,
    /// Records the sink refused
    pub failed: u64,
}

/// Shapes records and hands them to a background worker
#[derive(Debug, Clone)]
pub struct AuditEmitter {
    sender: mpsc::UnboundedSender<AuditRecord>,
    last_hash: Arc<Mutex<String>>,
}

impl AuditEmitter {
    /// Start the persistence worker
    ///
    /// The worker exits once every emitter clone is dropped.
    pub fn spawn<S>(sink: S) -> (Self, JoinHandle<AuditStats>)
    where
        S: AuditSink + 'static,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel::<AuditRecord>();
        let head = sink.chain_head().unwrap_or_default();

        let worker = tokio::spawn(async move {
            let mut stats = AuditStats::default();
            while let Some(record) = receiver.recv().await {
                match sink.persist(&record).await {
                    Ok(()) => {
                        stats.persisted += 1;
                        debug!(record_id = %record.record_id, action = record.action.as_str(), "Audit record persisted");
                    }
                    Err(e) => {
                        stats.failed += 1;
                        error!(
                            record_id = %record.record_id,
                            action = record.action.as_str(),
                            targets = ?record.target_ids,
                            error = %e,
                            "Failed to persist audit record"
                        );
                    }
                }
            }
            stats
        });

        (
            Self {
                sender,
                last_hash: Arc::new(Mutex::new(head)),
            },
            worker,
        )
    }

    /// Shape a record and queue it for persistence
    pub fn emit(
        &self,
        actor_id: &str,
        action: AuditAction,
        before: Value,
        after: Value,
        target_ids: Vec<String>,
    ) -> AuditRecord {
        let record = {
            let mut last_hash = self.last_hash.lock();
            let record = AuditRecord::new(actor_id, action, before, after, target_ids, last_hash.clone());
            *last_hash = record.hash.clone();
            record
        };

        if self.sender.send(record.clone()).is_err() {
            error!(record_id = %record.record_id, "Audit worker stopped, record not persisted");
        }
        record
    }
}

/// Records held in memory
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
    failing: AtomicBool,
}

impl InMemoryAuditSink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `persist` fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Stored records, in order
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn persist(&self, record: &AuditRecord) -> Result<(), RepositoryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepositoryError::Backend("audit store unavailable".to_string()));
        }
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Append-only JSON-lines file
#[derive(Debug)]
pub struct FileAuditSink {
    path: PathBuf,
    file: Mutex<File>,
    head: Option<String>,
}

impl FileAuditSink {
    /// Open (or create) the log, resuming its chain
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let head = read_log(&path)?.last().map(|r| r.hash.clone());
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
            head,
        })
    }

    /// Log location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every record
    pub fn read_all(&self) -> std::io::Result<Vec<AuditRecord>> {
        read_log(&self.path)
    }
}

/// Read every record from a JSON-lines log; a missing file holds none
pub fn read_log(path: &Path) -> std::io::Result<Vec<AuditRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        records.push(record);
    }
    Ok(records)
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn persist(&self, record: &AuditRecord) -> Result<(), RepositoryError> {
        let mut line =
            serde_json::to_string(record).map_err(|e| RepositoryError::Backend(e.to_string()))?;
        line.push('\n');

        let mut file = self.file.lock();
        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| RepositoryError::Backend(e.to_string()))
    }

    fn chain_head(&self) -> Option<String> {
        self.head.clone()
    }
}
