// src/fetch/pool.rs
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::fetch::{ConditionalFetch, FetchOutcome, FetchResult, FetchTask};

/// Fixed pool of fetch workers. Tasks go out over one shared channel
/// (single producer, workers compete for the receiver), results come back
/// over another (workers produce, the orchestrator is the only consumer).
/// At most `workers` fetches are in flight at any moment.
pub struct FetchPool {
    task_tx: mpsc::Sender<FetchTask>,
    result_rx: mpsc::Receiver<FetchResult>,
    workers: Vec<JoinHandle<()>>,
}

impl FetchPool {
    /// Spawn `workers` tasks sharing `fetcher`. `capacity` must cover one
    /// full scheduling wave so `submit` never blocks mid-cycle.
    pub fn spawn(fetcher: Arc<dyn ConditionalFetch>, workers: usize, capacity: usize) -> Self {
        let workers = workers.max(1);
        let capacity = capacity.max(workers);
        let (task_tx, task_rx) = mpsc::channel::<FetchTask>(capacity);
        let (result_tx, result_rx) = mpsc::channel::<FetchResult>(capacity);
        let task_rx = Arc::new(Mutex::new(task_rx));

        let handles = (0..workers)
            .map(|worker_id| {
                let task_rx = Arc::clone(&task_rx);
                let result_tx = result_tx.clone();
                let fetcher = Arc::clone(&fetcher);
                tokio::spawn(async move {
                    loop {
                        // Lock only to pull the next task; the fetch itself
                        // runs with the receiver released.
                        let task = { task_rx.lock().await.recv().await };
                        let Some(task) = task else {
                            break;
                        };

                        tracing::debug!(
                            worker = worker_id,
                            source = %task.source,
                            tier = %task.tier,
                            token = task.token.as_deref().unwrap_or("now"),
                            "checking for newer document"
                        );

                        let outcome = match fetcher
                            .conditional_get(&task.url, task.token.as_deref())
                            .await
                        {
                            Ok(outcome) => outcome,
                            Err(err) => FetchOutcome::Failed(err),
                        };

                        let result = FetchResult {
                            source: task.source,
                            tier: task.tier,
                            outcome,
                        };
                        if result_tx.send(result).await.is_err() {
                            break;
                        }
                    }
                    tracing::debug!(worker = worker_id, "fetch worker stopped");
                })
            })
            .collect();

        Self {
            task_tx,
            result_rx,
            workers: handles,
        }
    }

    /// Enqueue a task. Never drops; only fails if the pool is gone.
    pub async fn submit(&self, task: FetchTask) -> Result<()> {
        self.task_tx
            .send(task)
            .await
            .context("fetch pool is shut down")
    }

    /// Wait up to `timeout` for the next result; `None` on timeout.
    pub async fn take_result(&mut self, timeout: Duration) -> Option<FetchResult> {
        tokio::time::timeout(timeout, self.result_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Close the task channel and join the workers.
    pub async fn shutdown(self) {
        drop(self.task_tx);
        for (worker_id, handle) in self.workers.into_iter().enumerate() {
            if let Err(err) = handle.await {
                tracing::warn!(worker = worker_id, error = %err, "fetch worker join failed");
            }
        }
    }
}
