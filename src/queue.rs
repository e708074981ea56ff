use std::{
    ops::Deref,
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use futures::FutureExt;
use tokio::task::JoinHandle;

use crate::{TallymanError, WorkerCount};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Processes values taken from a [`WorkQueue`].
#[async_trait]
pub trait QueueWorker<T>: Send + Sync + 'static
where
    T: Send + Sync + 'static,
{
    /// Handle one value. Errors are logged by the queue and otherwise ignored.
    async fn process(&self, value: &T) -> Result<(), TallymanError>;
}

/// A value received from a [`WorkQueue`].
///
/// The value counts as pending until the item is dropped, whichever way the
/// consumer exits.
pub struct QueueItem<T> {
    value: T,
    pending: Arc<AtomicUsize>,
}

impl<T> QueueItem<T> {
    async fn recv(receiver: &Receiver<T>, pending: &Arc<AtomicUsize>) -> Option<Self> {
        let value = receiver.recv().await.ok()?;

        Some(Self {
            value,
            pending: pending.clone(),
        })
    }
}

impl<T> Deref for QueueItem<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T> Drop for QueueItem<T> {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Unbounded in-memory queue drained by a fixed pool of tokio tasks.
///
/// ```ignore
/// let queue = WorkQueue::new(Arc::new(worker), WorkerCount::default());
/// queue.add(value);
/// queue.clean(true).await;
/// ```
pub struct WorkQueue<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    pending: Arc<AtomicUsize>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<T> WorkQueue<T>
where
    T: Send + Sync + 'static,
{
    /// Start `count` workers, each consuming values with `worker`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<W>(worker: Arc<W>, count: WorkerCount) -> Self
    where
        W: QueueWorker<T>,
    {
        let (sender, receiver) = async_channel::unbounded();
        let pending = Arc::new(AtomicUsize::new(0));

        let workers = (0..*count)
            .map(|index| {
                tokio::spawn(Self::run_worker(
                    index,
                    worker.clone(),
                    receiver.clone(),
                    pending.clone(),
                ))
            })
            .collect();

        Self {
            sender,
            receiver,
            pending,
            workers: Mutex::new(workers),
        }
    }

    async fn run_worker<W>(
        index: usize,
        worker: Arc<W>,
        receiver: Receiver<T>,
        pending: Arc<AtomicUsize>,
    ) where
        W: QueueWorker<T>,
    {
        while let Some(item) = QueueItem::recv(&receiver, &pending).await {
            match AssertUnwindSafe(worker.process(&item)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::debug!(worker = index, error = ?err, "queue.worker.error");
                }
                Err(_) => {
                    tracing::error!(worker = index, "queue.worker.panic");
                }
            }
        }
    } // end method run_worker

    /// Enqueue `value`. Never blocks.
    pub fn add(&self, value: T) {
        self.pending.fetch_add(1, Ordering::AcqRel);

        if self.sender.try_send(value).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            tracing::error!("queue.add.closed");
        }
    }

    /// Take the next value directly, bypassing the workers.
    ///
    /// Returns `None` only if the queue has been closed.
    pub async fn next(&self) -> Option<QueueItem<T>> {
        QueueItem::recv(&self.receiver, &self.pending).await
    }

    /// Values added and not yet acknowledged.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Number of worker tasks still owned by the queue.
    pub fn worker_count(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Stop every worker.
    ///
    /// With `wait`, first blocks until every added value has been
    /// acknowledged. Calling it again is a no-op.
    pub async fn clean(&self, wait: bool) {
        let workers = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        if workers.is_empty() {
            return;
        }

        if wait {
            while self.pending() > 0 {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        }

        for worker in &workers {
            worker.abort();
        }

        for result in futures::future::join_all(workers).await {
            if let Err(err) = result
                && !err.is_cancelled()
            {
                tracing::error!(error = ?err, "queue.worker.join.error");
            }
        }
    } // end method clean
}
