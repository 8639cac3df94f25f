//! Shared helpers for queue and pool integration tests.

use std::time::Duration;

use async_trait::async_trait;

use conveyor::error::{ConveyorError, Result};
use conveyor::job::{JobId, JobRecord};
use conveyor::store::{JobStore, StatusUpdate, StoreOp};

/// Poll `check` until it returns true or the timeout elapses.
#[allow(dead_code)]
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

/// Store whose claim always fails, for driving the pool's error path.
#[allow(dead_code)]
pub struct FailingStore;

#[async_trait]
impl JobStore for FailingStore {
    async fn insert(&self, _record: &JobRecord) -> Result<()> {
        Ok(())
    }

    async fn apply(&self, _ops: Vec<StoreOp>) -> Result<()> {
        Ok(())
    }

    async fn find(&self, _id: JobId) -> Result<Option<JobRecord>> {
        Ok(None)
    }

    async fn claim(
        &self,
        _names: &[String],
        _lease_timeout: Duration,
    ) -> Result<Option<JobRecord>> {
        Err(ConveyorError::Store("injected claim failure".to_string()))
    }

    async fn update(&self, _id: JobId, _update: StatusUpdate) -> Result<()> {
        Ok(())
    }

    async fn ensure_indexes(&self, _retention: Option<Duration>) -> Result<()> {
        Ok(())
    }
}
