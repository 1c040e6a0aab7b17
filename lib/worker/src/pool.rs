//! A fixed set of worker tasks sharing one [`Worker`].

use crate::worker::Worker;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` tasks (at least one) running [`Worker::run`] until
    /// `shutdown` turns true.
    #[must_use]
    pub fn spawn(worker: Arc<Worker>, size: usize, shutdown: watch::Receiver<bool>) -> Self {
        let size = size.max(1);
        let handles = (0..size)
            .map(|_| tokio::spawn(Arc::clone(&worker).run(shutdown.clone())))
            .collect();
        info!(size, "worker pool started");
        Self { handles }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every task to finish its current message and exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task failed");
            }
        }
        info!("worker pool stopped");
    }
}
