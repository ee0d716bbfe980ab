//! The post-decrypt serial task queue (spec §4.4, design note: "serial
//! task mailbox"). Envelope decryption itself runs off this queue so
//! `respond(200)` isn't held up by it; everything decrypt produces --
//! event emission, group roster writes -- still has to happen in arrival
//! order, which this queue guarantees by running one job at a time.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug, Error)]
#[error("envelope queue worker has shut down")]
pub struct EnqueueError;

pub struct EnvelopeQueue {
    tx: mpsc::UnboundedSender<Job>,
    worker: JoinHandle<()>,
}

impl EnvelopeQueue {
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
        });
        Self { tx, worker }
    }

    pub fn enqueue<F>(&self, job: F) -> Result<(), EnqueueError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tx.send(Box::pin(job)).map_err(|_| EnqueueError)
    }

    /// Stops accepting new jobs and waits for every already-queued job to
    /// finish draining.
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.worker.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test]
    async fn jobs_run_strictly_in_enqueue_order() {
        let queue = EnvelopeQueue::spawn();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = Arc::clone(&order);
            queue
                .enqueue(async move {
                    // First job sleeps longest; if jobs ran concurrently
                    // instead of serially, later jobs would finish first.
                    tokio::time::sleep(Duration::from_millis((5 - i) as u64)).await;
                    order.lock().unwrap().push(i);
                })
                .unwrap();
        }

        queue.shutdown().await;
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }
}
