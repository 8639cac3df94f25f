use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::error::ConveyorError;
use crate::job::JobRecord;
use crate::queue::Queue;
use crate::shutdown::Shutdown;

use super::HandlerFn;

pub(crate) type SharedJobs = Arc<Mutex<mpsc::Receiver<JobRecord>>>;

/// One execution slot. All workers pull from the same receiver; the mutex
/// is only held while waiting for a job, never while running a handler.
pub(crate) async fn run(
    queue: Queue,
    handlers: Arc<HashMap<String, HandlerFn>>,
    jobs: SharedJobs,
    shutdown: Shutdown,
) {
    loop {
        // Drain the channel instead of racing the shutdown signal: the
        // dispatcher closes it when it stops, and anything still buffered
        // was already claimed, so it gets handled before this task exits.
        let job = { jobs.lock().await.recv().await };
        let Some(job) = job else {
            return;
        };

        let Some(handler) = handlers.get(&job.name) else {
            // Unreachable via the dispatcher, which only dequeues
            // registered names.
            shutdown.kill(ConveyorError::Internal(format!(
                "no handler registered for job {}",
                job.name
            )));
            return;
        };

        let job_id = job.id;
        tracing::debug!(job_id = %job_id, name = %job.name, "Job picked up");

        if let Err(err) = handler(queue.clone(), job, shutdown.token()).await {
            tracing::error!(job_id = %job_id, error = %err, "Handler failed, stopping pool");
            shutdown.kill(ConveyorError::Handler(err));
            return;
        }
    }
}
