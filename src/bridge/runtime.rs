//! Dispatch loops and the bounded worker pool.
//!
//! Each event runs on its own task. The dispatch loop only blocks when all
//! permits are taken, so a slow Slack or relay call never stalls receipt.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(workers: usize, cancel: CancellationToken) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            tasks: TaskTracker::new(),
            cancel,
        }
    }

    /// Tracker shared with work that must finish before exit.
    pub fn tracker(&self) -> TaskTracker {
        self.tasks.clone()
    }

    /// Spawn `job` once a permit is free. Returns `false` if cancelled first.
    pub async fn submit<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return false,
            permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return false,
            },
        };

        self.tasks.spawn(async move {
            job.await;
            drop(permit);
        });
        true
    }

    /// Wait for tracked tasks, at most `grace`. Returns whether all finished.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.tasks.close();
        match tokio::time::timeout(grace, self.tasks.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(pending = self.tasks.len(), "Shutdown grace period elapsed");
                false
            }
        }
    }
}

/// Feed `events` to `handler` through `pool` until cancelled or closed.
pub async fn dispatch<E, F, Fut>(
    name: &'static str,
    mut events: mpsc::Receiver<E>,
    pool: WorkerPool,
    cancel: CancellationToken,
    handler: F,
) where
    F: Fn(E) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        if !pool.submit(handler(event)).await {
            break;
        }
    }
    info!(side = name, "Dispatch loop stopped");
}
