use tokio::sync::mpsc;

use crate::config::PoolConfig;
use crate::job::JobRecord;
use crate::queue::Queue;
use crate::shutdown::Shutdown;

/// Claim loop. Runs as a single task so dequeues are serialized within the
/// pool; the store's atomic claim is what arbitrates between processes.
pub(crate) async fn run(
    queue: Queue,
    names: Vec<String>,
    config: PoolConfig,
    jobs: mpsc::Sender<JobRecord>,
    shutdown: Shutdown,
) {
    loop {
        if shutdown.is_cancelled() {
            return;
        }

        let claimed = match queue.dequeue(&names, config.lease_timeout).await {
            Ok(job) => job,
            Err(err) => {
                tracing::error!(error = %err, "Dequeue failed, stopping pool");
                shutdown.kill(err);
                return;
            }
        };

        match claimed {
            Some(job) => {
                // Hand off, then immediately poll again: while a backlog
                // exists there is no reason to sleep. A claim dropped here
                // because shutdown won the race stays leased and is
                // recovered through the lease timeout.
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return,
                    sent = jobs.send(job) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(config.poll_interval) => {}
                }
            }
        }
    }
}
