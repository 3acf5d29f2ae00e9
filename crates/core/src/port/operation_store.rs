// Operation Store Port (durable delivery queue storage)

use crate::domain::{OperationId, OperationStatus, QueuedOperation};
use crate::error::Result;
use async_trait::async_trait;

/// Persistence interface for queued operations
#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Insert a new operation
    async fn insert(&self, op: &QueuedOperation) -> Result<()>;

    /// Find operation by ID
    async fn find_by_id(&self, id: &OperationId) -> Result<Option<QueuedOperation>>;

    /// Update operation
    async fn update(&self, op: &QueuedOperation) -> Result<()>;

    /// Atomically claim the next due Pending operation and mark it Processing.
    ///
    /// Order: priority desc, enqueued_at asc, insertion order asc. Operations whose
    /// `next_attempt_at` lies after `now_millis` are skipped.
    async fn claim_next(&self, now_millis: i64) -> Result<Option<QueuedOperation>>;

    /// Count operations by status
    async fn count_by_status(&self, status: OperationStatus) -> Result<i64>;

    /// Find all operations by status, in drain order
    async fn find_by_status(&self, status: OperationStatus) -> Result<Vec<QueuedOperation>>;

    /// Delete an operation unless it is Processing, in one atomic step.
    /// Returns false if it did not exist or is being delivered.
    async fn delete(&self, id: &OperationId) -> Result<bool>;

    /// Return every Processing operation to Pending (crash recovery)
    async fn requeue_processing(&self, now_millis: i64) -> Result<u64>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    struct Entry {
        seq: u64,
        op: QueuedOperation,
    }

    /// In-memory store; the mutex makes `claim_next` atomic
    #[derive(Default)]
    pub struct InMemoryOperationStore {
        entries: Mutex<Vec<Entry>>,
        next_seq: Mutex<u64>,
    }

    impl InMemoryOperationStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn len(&self) -> usize {
            self.entries.lock().unwrap().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    fn drain_order(a: &Entry, b: &Entry) -> std::cmp::Ordering {
        b.op.priority
            .rank()
            .cmp(&a.op.priority.rank())
            .then(a.op.enqueued_at.cmp(&b.op.enqueued_at))
            .then(a.seq.cmp(&b.seq))
    }

    #[async_trait]
    impl OperationStore for InMemoryOperationStore {
        async fn insert(&self, op: &QueuedOperation) -> Result<()> {
            let mut entries = self.entries.lock().unwrap();
            if entries.iter().any(|e| e.op.id == op.id) {
                return Err(crate::AppError::Database(format!(
                    "duplicate operation id: {}",
                    op.id
                )));
            }
            let mut seq = self.next_seq.lock().unwrap();
            *seq += 1;
            entries.push(Entry {
                seq: *seq,
                op: op.clone(),
            });
            Ok(())
        }

        async fn find_by_id(&self, id: &OperationId) -> Result<Option<QueuedOperation>> {
            let entries = self.entries.lock().unwrap();
            Ok(entries.iter().find(|e| &e.op.id == id).map(|e| e.op.clone()))
        }

        async fn update(&self, op: &QueuedOperation) -> Result<()> {
            let mut entries = self.entries.lock().unwrap();
            match entries.iter_mut().find(|e| e.op.id == op.id) {
                Some(entry) => {
                    entry.op = op.clone();
                    Ok(())
                }
                None => Err(crate::AppError::NotFound(op.id.clone())),
            }
        }

        async fn claim_next(&self, now_millis: i64) -> Result<Option<QueuedOperation>> {
            let mut entries = self.entries.lock().unwrap();
            entries.sort_by(drain_order);

            let Some(entry) = entries.iter_mut().find(|e| e.op.is_due(now_millis)) else {
                return Ok(None);
            };
            entry.op.start(now_millis)?;
            Ok(Some(entry.op.clone()))
        }

        async fn count_by_status(&self, status: OperationStatus) -> Result<i64> {
            let entries = self.entries.lock().unwrap();
            Ok(entries.iter().filter(|e| e.op.status == status).count() as i64)
        }

        async fn find_by_status(&self, status: OperationStatus) -> Result<Vec<QueuedOperation>> {
            let mut entries = self.entries.lock().unwrap();
            entries.sort_by(drain_order);
            Ok(entries
                .iter()
                .filter(|e| e.op.status == status)
                .map(|e| e.op.clone())
                .collect())
        }

        async fn delete(&self, id: &OperationId) -> Result<bool> {
            let mut entries = self.entries.lock().unwrap();
            let before = entries.len();
            entries.retain(|e| &e.op.id != id || e.op.status == OperationStatus::Processing);
            Ok(entries.len() < before)
        }

        async fn requeue_processing(&self, now_millis: i64) -> Result<u64> {
            let mut entries = self.entries.lock().unwrap();
            let mut count = 0;
            for entry in entries
                .iter_mut()
                .filter(|e| e.op.status == OperationStatus::Processing)
            {
                entry.op.status = OperationStatus::Pending;
                entry.op.next_attempt_at = None;
                entry.op.updated_at = now_millis;
                count += 1;
            }
            Ok(count)
        }
    }
}
