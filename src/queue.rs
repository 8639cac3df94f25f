use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{ConveyorError, Result};
use crate::job::{JobId, JobRecord};
use crate::store::{JobStore, MemoryStore, StatusUpdate, StoreOp};

/// Stateless facade over a job collection.
///
/// Cloning is cheap; every handler gets its own copy so it can settle the
/// record it was given. All operations are single conditional writes
/// against the store; there is no client-side transaction.
#[derive(Clone)]
pub struct Queue {
    store: Arc<dyn JobStore>,
}

impl Queue {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Queue backed by an in-process store. Nothing survives the process;
    /// meant for tests and embedded setups.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Queue backed by a MongoDB collection.
    #[cfg(feature = "mongodb")]
    pub fn mongo(db: &mongodb::Database, collection: &str) -> Self {
        Self::new(Arc::new(crate::store::MongoStore::new(db, collection)))
    }

    /// Insert a job. With a non-zero delay the job stays unclaimable until
    /// the delay has passed. The returned id is generated client-side and
    /// is valid as soon as this returns.
    pub async fn enqueue(&self, name: &str, params: Value, delay: Duration) -> Result<JobId> {
        let record = JobRecord::new(name, params, delay);
        let id = record.id;
        self.store.insert(&record).await?;
        tracing::debug!(job_id = %id, name, "Job enqueued");
        Ok(id)
    }

    /// Start a batch of operations to be submitted in one unordered run.
    pub fn bulk(&self) -> Bulk {
        Bulk {
            store: self.store.clone(),
            ops: Vec::new(),
        }
    }

    /// Atomically claim the oldest eligible job for one of `names`.
    ///
    /// Eligible records are enqueued or failed ones whose `delayed` gate
    /// has passed, plus dequeued ones whose claim is older than
    /// `lease_timeout` (abandoned leases being recovered; this also
    /// increments `attempts`). Returns `Ok(None)` when nothing is due.
    ///
    /// Panics on an empty `names` slice: dequeuing for no names is a bug
    /// at the call site, not an empty queue.
    pub async fn dequeue(
        &self,
        names: &[impl AsRef<str> + Sync],
        lease_timeout: Duration,
    ) -> Result<Option<JobRecord>> {
        assert!(!names.is_empty(), "at least one job name is required");

        let names: Vec<String> = names.iter().map(|name| name.as_ref().to_string()).collect();
        let job = self.store.claim(&names, lease_timeout).await?;
        if let Some(job) = &job {
            tracing::debug!(job_id = %job.id, name = %job.name, attempts = job.attempts, "Job dequeued");
        }
        Ok(job)
    }

    /// Load the job with the given id.
    pub async fn fetch(&self, id: JobId) -> Result<JobRecord> {
        self.store
            .find(id)
            .await?
            .ok_or(ConveyorError::JobNotFound(id))
    }

    /// Mark the job completed and store its result.
    ///
    /// Unconditional: the write goes through even if the caller's lease was
    /// reclaimed in the meantime (last-writer-wins).
    pub async fn complete(&self, id: JobId, result: Value) -> Result<()> {
        self.store.update(id, StatusUpdate::complete(result)).await?;
        tracing::debug!(job_id = %id, "Job completed");
        Ok(())
    }

    /// Mark the job failed. It becomes claimable again once `delay` has
    /// passed.
    pub async fn fail(&self, id: JobId, error: &str, delay: Duration) -> Result<()> {
        self.store.update(id, StatusUpdate::fail(error, delay)).await?;
        tracing::debug!(job_id = %id, error, "Job failed");
        Ok(())
    }

    /// Cancel the job. Terminal; the record is never claimed again.
    pub async fn cancel(&self, id: JobId, reason: &str) -> Result<()> {
        self.store.update(id, StatusUpdate::cancel(reason)).await?;
        tracing::debug!(job_id = %id, reason, "Job cancelled");
        Ok(())
    }

    /// Create the supporting indexes, plus a TTL purge on `ended` when a
    /// retention window is given. Safe to call repeatedly.
    pub async fn ensure_indexes(&self, retention: Option<Duration>) -> Result<()> {
        self.store.ensure_indexes(retention).await
    }
}

/// Accumulates queue operations for a single unordered submission.
///
/// Ids handed out by [`Bulk::enqueue`] are tentative until [`Bulk::run`]
/// succeeds. The batch has no cross-dependence between entries: each one
/// applies or fails on its own, and `run` reports the first failure.
pub struct Bulk {
    store: Arc<dyn JobStore>,
    ops: Vec<StoreOp>,
}

impl Bulk {
    pub fn enqueue(&mut self, name: &str, params: Value, delay: Duration) -> JobId {
        let record = JobRecord::new(name, params, delay);
        let id = record.id;
        self.ops.push(StoreOp::Insert(record));
        id
    }

    pub fn complete(&mut self, id: JobId, result: Value) {
        self.ops.push(StoreOp::Update {
            id,
            update: StatusUpdate::complete(result),
        });
    }

    pub fn fail(&mut self, id: JobId, error: &str, delay: Duration) {
        self.ops.push(StoreOp::Update {
            id,
            update: StatusUpdate::fail(error, delay),
        });
    }

    pub fn cancel(&mut self, id: JobId, reason: &str) {
        self.ops.push(StoreOp::Update {
            id,
            update: StatusUpdate::cancel(reason),
        });
    }

    /// Submit everything accumulated so far.
    pub async fn run(self) -> Result<()> {
        self.store.apply(self.ops).await
    }
}
