//! Worker pool that executes queued jobs in-process.
//!
//! One dispatcher task claims due jobs and fans them out over an internal
//! channel to a bounded set of worker tasks:
//!
//! - **Dispatcher**: claim loop; re-polls immediately after a successful
//!   claim, sleeps the poll interval when nothing was due
//! - **Workers**: receive jobs and invoke the handler registered for the
//!   job's name
//!
//! # Handler contract
//!
//! A handler gets `(Queue, JobRecord, CancellationToken)` and must settle
//! its record itself by calling complete, fail, or cancel, then return
//! `Ok(())`. Returning an error means "this worker is broken" and shuts the
//! whole pool down with that error as cause; per-job failures go through
//! [`Queue::fail`] instead. The token fires when shutdown begins; handlers
//! doing long work should watch it and settle their record promptly.
//!
//! # Shutdown
//!
//! [`Pool::close`] stops new claims; jobs already claimed are still handed
//! to handlers and finished (drain-on-close). [`Pool::wait`] blocks until
//! every task has returned and yields the first failure cause, if any.

mod dispatcher;
mod worker;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::error::{ConveyorError, HandlerError, Result};
use crate::job::JobRecord;
use crate::queue::Queue;
use crate::shutdown::Shutdown;

pub(crate) type HandlerFn = Arc<
    dyn Fn(
            Queue,
            JobRecord,
            CancellationToken,
        ) -> Pin<Box<dyn Future<Output = std::result::Result<(), HandlerError>> + Send>>
        + Send
        + Sync,
>;

/// A pool of workers bound to one queue.
///
/// Lifecycle is created → running → dying → dead: [`Pool::start`] spawns
/// the tasks, [`Pool::close`] begins the shutdown, and [`Pool::wait`]
/// observes the end of it.
pub struct Pool {
    config: PoolConfig,
    handlers: HashMap<String, HandlerFn>,
    running: Option<Running>,
}

struct Running {
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
}

impl Pool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            handlers: HashMap::new(),
            running: None,
        }
    }

    /// Register a handler for a job name. Re-registering a name replaces
    /// the previous handler. Must happen before [`Pool::start`]; the
    /// registry is read-only once the pool runs.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(Queue, JobRecord, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
    {
        assert!(
            self.running.is_none(),
            "handlers must be registered before the pool is started"
        );
        let handler: HandlerFn = Arc::new(move |queue, job, token| {
            Box::pin(handler(queue, job, token))
        });
        self.handlers.insert(name.into(), handler);
    }

    /// Spawn the dispatcher and workers against `queue`.
    ///
    /// Dequeues only the names registered so far. Must be called from
    /// within a tokio runtime. Panics when called twice, when no handler
    /// is registered, or on a zero-sized pool; all three are bugs at the
    /// call site.
    pub fn start(&mut self, queue: Queue) {
        if self.running.is_some() {
            panic!("pool can only be started once");
        }
        assert!(self.config.size >= 1, "pool size must be at least 1");
        assert!(
            !self.handlers.is_empty(),
            "at least one handler must be registered"
        );

        let names: Vec<String> = self.handlers.keys().cloned().collect();
        let handlers = Arc::new(self.handlers.clone());
        let shutdown = Shutdown::new();

        // Rendezvous-ish hand-off: the dispatcher claims at most one job
        // beyond what the workers have accepted.
        let (jobs_tx, jobs_rx) = mpsc::channel(1);
        let jobs_rx = Arc::new(Mutex::new(jobs_rx));

        let mut tasks = Vec::with_capacity(self.config.size + 1);
        for _ in 0..self.config.size {
            tasks.push(tokio::spawn(worker::run(
                queue.clone(),
                handlers.clone(),
                jobs_rx.clone(),
                shutdown.clone(),
            )));
        }
        tasks.push(tokio::spawn(dispatcher::run(
            queue,
            names,
            self.config.clone(),
            jobs_tx,
            shutdown.clone(),
        )));

        tracing::info!(size = self.config.size, "Worker pool started");
        self.running = Some(Running { shutdown, tasks });
    }

    /// Begin shutdown: stop claiming, signal handlers. Await [`Pool::wait`]
    /// for completion. No-op if the pool never started.
    pub fn close(&self) {
        if let Some(running) = &self.running {
            tracing::info!("Worker pool closing");
            running.shutdown.cancel();
        }
    }

    /// Block until the pool is fully stopped and return its cause: `Ok` on
    /// a clean close, otherwise the first store or handler error.
    pub async fn wait(&mut self) -> Result<()> {
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };

        for task in running.tasks.drain(..) {
            if let Err(err) = task.await {
                running
                    .shutdown
                    .kill(ConveyorError::Internal(format!("pool task panicked: {err}")));
            }
        }

        match running.shutdown.take_cause() {
            Some(cause) => {
                tracing::error!(error = %cause, "Worker pool stopped");
                Err(cause)
            }
            None => {
                tracing::info!("Worker pool stopped");
                Ok(())
            }
        }
    }
}
