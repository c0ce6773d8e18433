use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::debug;
use tracing::error;

use crate::traits::DurableLog;
use crate::traits::Entity;
use crate::worker::Worker;

/// The running workers of a cache, plus the switch that stops them.
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    tasks:    JoinSet<()>,
}

impl WorkerPool {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            tasks: JoinSet::new(),
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub(crate) fn spawn<L, E>(&mut self, worker: Worker<L, E>)
    where
        L: DurableLog,
        E: Entity,
    {
        self.tasks.spawn(worker.run());
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Stop every worker and wait for all of them. Workers finish the delivery they're working on before exiting.
    pub async fn shutdown(mut self) {
        debug!(workers = self.tasks.len(), "stopping worker pool");
        self.shutdown.send_replace(true);
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "worker task failed");
            }
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WorkerPool {{ workers: {} }}", self.tasks.len())
    }
}
