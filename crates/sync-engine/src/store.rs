/// Durable record of operations and conflicts
///
/// The coordinator only needs the `OperationStore` seam; `MemoryStore` keeps
/// everything in process and is what tests and the bundled server use.
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;

use crate::{OperationId, SyncOperation};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("record not found: {0:?}")]
    NotFound(RecordId),
}

/// Identifier assigned by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

/// A stored conflict and the operations it links
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: RecordId,
    pub path: String,
    pub operation_ids: Vec<OperationId>,
    pub resolved: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub resolved_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[async_trait::async_trait]
pub trait OperationStore: Send + Sync {
    /// Persist an accepted operation
    async fn record_operation(&self, operation: &SyncOperation) -> Result<RecordId, StoreError>;

    /// Persist an unresolved conflict between the given operations
    async fn record_conflict(
        &self,
        path: &str,
        operation_ids: &[OperationId],
    ) -> Result<RecordId, StoreError>;

    async fn unresolved_conflicts(&self) -> Result<Vec<ConflictRecord>, StoreError>;

    /// Mark a conflict as handled, e.g. after a user resolved it manually
    async fn mark_resolved(&self, id: RecordId) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct StoredOperation {
    pub id: RecordId,
    pub operation: SyncOperation,
}

/// In-process store
#[derive(Default)]
pub struct MemoryStore {
    next_id: AtomicU64,
    operations: RwLock<Vec<StoredOperation>>,
    conflicts: RwLock<Vec<ConflictRecord>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, simulating an unreachable database
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn operations(&self) -> Vec<StoredOperation> {
        self.operations.read().clone()
    }

    pub fn operations_for_path(&self, path: &str) -> Vec<SyncOperation> {
        self.operations
            .read()
            .iter()
            .filter(|stored| stored.operation.path == path)
            .map(|stored| stored.operation.clone())
            .collect()
    }

    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        self.conflicts.read().clone()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }

    fn allocate_id(&self) -> RecordId {
        RecordId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait::async_trait]
impl OperationStore for MemoryStore {
    async fn record_operation(&self, operation: &SyncOperation) -> Result<RecordId, StoreError> {
        self.check_writable()?;

        let id = self.allocate_id();
        self.operations.write().push(StoredOperation {
            id,
            operation: operation.clone(),
        });
        Ok(id)
    }

    async fn record_conflict(
        &self,
        path: &str,
        operation_ids: &[OperationId],
    ) -> Result<RecordId, StoreError> {
        self.check_writable()?;

        let id = self.allocate_id();
        self.conflicts.write().push(ConflictRecord {
            id,
            path: path.to_string(),
            operation_ids: operation_ids.to_vec(),
            resolved: false,
            created_at: chrono::Utc::now(),
            resolved_at: None,
        });
        Ok(id)
    }

    async fn unresolved_conflicts(&self) -> Result<Vec<ConflictRecord>, StoreError> {
        Ok(self
            .conflicts
            .read()
            .iter()
            .filter(|c| !c.resolved)
            .cloned()
            .collect())
    }

    async fn mark_resolved(&self, id: RecordId) -> Result<(), StoreError> {
        self.check_writable()?;

        let mut conflicts = self.conflicts.write();
        let record = conflicts
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(StoreError::NotFound(id))?;
        record.resolved = true;
        record.resolved_at = Some(chrono::Utc::now());
        Ok(())
    }
}
