//! Store primitives the queue is built on.
//!
//! The queue needs very little from its backing store: insert with a
//! client-chosen id, read by id, an unordered batch write, and one
//! non-trivial primitive: an atomic find-one-and-modify that claims the
//! oldest eligible job. Everything else in the crate is layered on top of
//! [`JobStore`].

pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongo;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

use crate::error::Result;
use crate::job::{JobId, JobRecord, JobStatus};

pub use memory::MemoryStore;
#[cfg(feature = "mongodb")]
pub use mongo::MongoStore;

/// A status write applied by complete, fail, and cancel.
///
/// Only the fields relevant to the transition are set; stores must leave
/// absent fields untouched. The write is unconditional: a stale caller can
/// still force a terminal state after its lease was reclaimed
/// (last-writer-wins).
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: JobStatus,
    pub ended: DateTime<Utc>,
    pub delayed: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub reason: Option<String>,
}

impl StatusUpdate {
    pub fn complete(result: Value) -> Self {
        Self {
            status: JobStatus::Completed,
            ended: Utc::now(),
            delayed: None,
            result: Some(result),
            error: None,
            reason: None,
        }
    }

    /// `ended` is set even though a failed record is re-claimable: it marks
    /// the end of the attempt. The new `delayed` gate holds the record back
    /// until the retry delay has passed.
    pub fn fail(error: impl Into<String>, delay: Duration) -> Self {
        let now = Utc::now();
        Self {
            status: JobStatus::Failed,
            ended: now,
            delayed: Some(now + chrono::Duration::from_std(delay).unwrap_or_default()),
            result: None,
            error: Some(error.into()),
            reason: None,
        }
    }

    pub fn cancel(reason: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Cancelled,
            ended: Utc::now(),
            delayed: None,
            result: None,
            error: None,
            reason: Some(reason.into()),
        }
    }
}

/// One entry of an unordered batch.
#[derive(Debug, Clone)]
pub enum StoreOp {
    Insert(JobRecord),
    Update { id: JobId, update: StatusUpdate },
}

/// Collection-like persistence the queue runs against.
///
/// Implementations must guarantee that [`claim`](JobStore::claim) is atomic:
/// two concurrent claims never return the same record. That single guarantee
/// is what turns the store into a queue.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a record under its client-chosen id.
    async fn insert(&self, record: &JobRecord) -> Result<()>;

    /// Apply a batch of operations, unordered and best-effort: each op
    /// either applies or fails independently, and the first failure is
    /// surfaced after the whole batch was attempted.
    async fn apply(&self, ops: Vec<StoreOp>) -> Result<()>;

    /// Read a record by id.
    async fn find(&self, id: JobId) -> Result<Option<JobRecord>>;

    /// Atomically claim the oldest eligible record for one of `names`.
    ///
    /// Eligible means enqueued-or-failed with the `delayed` gate passed, or
    /// dequeued with a claim older than `lease_timeout` (an abandoned
    /// lease). The claim sets status to dequeued, stamps `started`, and
    /// increments `attempts`; the post-update record is returned. `None`
    /// means nothing was eligible, which is not an error.
    async fn claim(&self, names: &[String], lease_timeout: Duration) -> Result<Option<JobRecord>>;

    /// Apply a single status write; errors if the id does not exist.
    async fn update(&self, id: JobId, update: StatusUpdate) -> Result<()>;

    /// Prepare lookup indexes, and a purge of records whose `ended` is
    /// older than `retention`. Advisory; idempotent.
    async fn ensure_indexes(&self, retention: Option<Duration>) -> Result<()>;
}

/// Lower bound on `started` for an abandoned-lease claim.
pub(crate) fn lease_cutoff(now: DateTime<Utc>, lease_timeout: Duration) -> DateTime<Utc> {
    let lease = chrono::Duration::from_std(lease_timeout).unwrap_or(chrono::Duration::MAX);
    now.checked_sub_signed(lease).unwrap_or(DateTime::<Utc>::MIN_UTC)
}
