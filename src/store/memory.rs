use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{ConveyorError, Result};
use crate::job::{JobId, JobRecord, JobStatus};

use super::{lease_cutoff, JobStore, StatusUpdate, StoreOp};

/// In-process store for tests and embedded use.
///
/// The whole collection sits behind one mutex, which makes the claim
/// trivially atomic. The `BTreeMap` keeps records in id order, so scanning
/// from the front yields the oldest eligible job first.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    jobs: BTreeMap<JobId, JobRecord>,
    retention: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl State {
    fn insert(&mut self, record: &JobRecord) -> Result<()> {
        if self.jobs.contains_key(&record.id) {
            return Err(ConveyorError::Store(format!(
                "duplicate job id: {}",
                record.id
            )));
        }
        self.jobs.insert(record.id, record.clone());
        Ok(())
    }

    fn update(&mut self, id: JobId, update: StatusUpdate) -> Result<()> {
        let Some(job) = self.jobs.get_mut(&id) else {
            return Err(ConveyorError::JobNotFound(id));
        };

        job.status = update.status;
        job.ended = Some(update.ended);
        if let Some(delayed) = update.delayed {
            job.delayed = delayed;
        }
        if update.result.is_some() {
            job.result = update.result;
        }
        if update.error.is_some() {
            job.error = update.error;
        }
        if update.reason.is_some() {
            job.reason = update.reason;
        }
        Ok(())
    }

    /// Drop records whose `ended` fell behind the retention window. Stands
    /// in for the TTL index a real document store would run server-side.
    fn purge_expired(&mut self, now: DateTime<Utc>) {
        let Some(retention) = self.retention else {
            return;
        };
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        self.jobs.retain(|_, job| match job.ended {
            Some(ended) => ended
                .checked_add_signed(retention)
                .map_or(true, |deadline| now < deadline),
            None => true,
        });
    }
}

fn eligible(
    job: &JobRecord,
    names: &[String],
    now: DateTime<Utc>,
    cutoff: DateTime<Utc>,
) -> bool {
    if !names.contains(&job.name) {
        return false;
    }
    match job.status {
        JobStatus::Enqueued | JobStatus::Failed => job.delayed <= now,
        JobStatus::Dequeued => job.started.is_some_and(|started| started <= cutoff),
        JobStatus::Completed | JobStatus::Cancelled => false,
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert(&self, record: &JobRecord) -> Result<()> {
        self.state.lock().unwrap().insert(record)
    }

    async fn apply(&self, ops: Vec<StoreOp>) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        let mut first_err = None;
        for op in ops {
            let res = match op {
                StoreOp::Insert(record) => state.insert(&record),
                StoreOp::Update { id, update } => state.update(id, update),
            };
            if let Err(err) = res {
                first_err.get_or_insert(err);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn find(&self, id: JobId) -> Result<Option<JobRecord>> {
        let mut state = self.state.lock().unwrap();
        state.purge_expired(Utc::now());
        Ok(state.jobs.get(&id).cloned())
    }

    async fn claim(&self, names: &[String], lease_timeout: Duration) -> Result<Option<JobRecord>> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        state.purge_expired(now);

        let cutoff = lease_cutoff(now, lease_timeout);
        let id = state
            .jobs
            .values()
            .find(|job| eligible(job, names, now, cutoff))
            .map(|job| job.id);

        let Some(id) = id else {
            return Ok(None);
        };

        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.status = JobStatus::Dequeued;
        job.started = Some(now);
        job.attempts += 1;
        Ok(Some(job.clone()))
    }

    async fn update(&self, id: JobId, update: StatusUpdate) -> Result<()> {
        self.state.lock().unwrap().update(id, update)
    }

    async fn ensure_indexes(&self, retention: Option<Duration>) -> Result<()> {
        // No indexes to build; only the retention window matters here.
        self.state.lock().unwrap().retention = retention;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn record(name: &str) -> JobRecord {
        JobRecord::new(name, json!({}), Duration::ZERO)
    }

    #[tokio::test]
    async fn claim_takes_oldest_id_first() {
        let store = MemoryStore::new();
        let first = record("foo");
        let second = record("foo");
        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        let names = vec!["foo".to_string()];
        let claimed = store.claim(&names, Duration::from_secs(3600)).await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);

        let claimed = store.claim(&names, Duration::from_secs(3600)).await.unwrap().unwrap();
        assert_eq!(claimed.id, second.id);

        assert!(store.claim(&names, Duration::from_secs(3600)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_ignores_other_names() {
        let store = MemoryStore::new();
        store.insert(&record("foo")).await.unwrap();

        let names = vec!["bar".to_string()];
        assert!(store.claim(&names, Duration::ZERO).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_is_an_error() {
        let store = MemoryStore::new();
        let job = record("foo");
        store.insert(&job).await.unwrap();
        assert!(store.insert(&job).await.is_err());
    }

    #[tokio::test]
    async fn apply_surfaces_first_error_but_applies_the_rest() {
        let store = MemoryStore::new();
        let job = record("foo");
        let missing = JobId::new();

        let ops = vec![
            StoreOp::Update {
                id: missing,
                update: StatusUpdate::cancel("nope"),
            },
            StoreOp::Insert(job.clone()),
        ];
        let err = store.apply(ops).await.unwrap_err();
        assert!(matches!(err, ConveyorError::JobNotFound(id) if id == missing));

        // The insert after the failing update still went through.
        assert!(store.find(job.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_missing_id_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update(JobId::new(), StatusUpdate::complete(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ConveyorError::JobNotFound(_)));
    }
}
