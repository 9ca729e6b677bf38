//! Background tasks attached to a queue: the read-service worker and the
//! aging sweeper.

use log::{debug, info};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::queue::DiversionQueue;

/// Handles to the tasks serving one queue.
#[derive(Debug)]
pub struct QueueTasks {
    worker: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl QueueTasks {
    /// Spawn the worker and the sweeper on the current tokio runtime.
    pub fn spawn(queue: Arc<DiversionQueue>) -> Self {
        let worker = tokio::spawn(run_worker(Arc::clone(&queue)));
        let sweeper = tokio::spawn(run_sweeper(queue));
        Self { worker, sweeper }
    }

    /// Stop the sweeper immediately.
    pub fn stop_sweeper(&self) {
        self.sweeper.abort();
    }

    /// Stop both tasks and wait for the worker to notice the teardown.
    /// The queue must already be drained.
    pub async fn shutdown(self) {
        self.sweeper.abort();
        let _ = self.sweeper.await;
        if let Err(e) = self.worker.await {
            if !e.is_cancelled() {
                debug!("Read worker ended abnormally: {}", e);
            }
        }
    }
}

async fn run_worker(queue: Arc<DiversionQueue>) {
    debug!("Read worker started");
    loop {
        queue.notify.notified().await;
        if queue.is_shutting_down() {
            break;
        }
        queue.service_reads();
    }
    info!("Read worker stopped");
}

async fn run_sweeper(queue: Arc<DiversionQueue>) {
    debug!("Aging sweeper started, interval {:?}", queue.sweep_interval());
    loop {
        // Re-read every period so interval changes apply on the next tick.
        tokio::time::sleep(queue.sweep_interval()).await;
        if queue.is_shutting_down() {
            break;
        }
        queue.age_sweep();
    }
    debug!("Aging sweeper stopped");
}
