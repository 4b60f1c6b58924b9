use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Duration, Instant};
use tracing::debug;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// More than `queue_max` tasks were already waiting at submission.
    #[error("search queue is saturated")]
    Overflow,
    #[error("search queue worker is gone")]
    Closed,
}

/// Single-consumer FIFO queue that paces dispatches to at most `rps` per
/// second. Exactly one task runs at a time; dispatch order is submission
/// order; overflow is reported synchronously at submission.
pub struct SearchQueue {
    tx: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
    queue_max: usize,
}

impl SearchQueue {
    pub fn new(rps: u32, queue_max: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        tokio::spawn(pump(rx, Arc::clone(&pending), rps.max(1)));
        Self {
            tx,
            pending,
            queue_max,
        }
    }

    /// Enqueue a task and wait for its result. Fails fast with
    /// [`QueueError::Overflow`] when the backlog is full; the task is not
    /// started in that case.
    pub async fn schedule<F, Fut, T>(&self, task: F) -> Result<T, QueueError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let prior = self.pending.fetch_add(1, Ordering::SeqCst);
        if prior >= self.queue_max {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Overflow);
        }

        let (done_tx, done_rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let out = task().await;
            // Caller may have gone away; the work still counts for pacing.
            let _ = done_tx.send(out);
        });

        self.tx.send(job).map_err(|_| QueueError::Closed)?;
        done_rx.await.map_err(|_| QueueError::Closed)
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

async fn pump(mut rx: mpsc::UnboundedReceiver<Job>, pending: Arc<AtomicUsize>, rps: u32) {
    let interval = Duration::from_millis((1000 / rps.max(1)) as u64);
    let mut next_available = Instant::now();

    while let Some(job) = rx.recv().await {
        pending.fetch_sub(1, Ordering::SeqCst);

        let now = Instant::now();
        if now < next_available {
            sleep_until(next_available).await;
        }
        next_available = next_available.max(now) + interval;

        job.await;
    }
    debug!("search queue pump stopped");
}
