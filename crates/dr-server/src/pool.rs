//! Bounded worker pool.
//!
//! A fixed number of long-lived workers pull tasks from one FIFO queue, so
//! at most `size` tasks ever run at once and tasks start in submission
//! order. Each task runs in its own spawned tokio task which the worker
//! awaits: a panic inside a job surfaces as a `JoinError` and the worker
//! carries on with its slot released.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dr_core::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct QueuedTask {
    label: String,
    task: BoxFuture<'static, ()>,
}

#[derive(Debug, Default)]
struct PoolStats {
    busy: AtomicUsize,
    waiting: AtomicUsize,
    peak_busy: AtomicUsize,
    completed: AtomicU64,
    panicked: AtomicU64,
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    pub size: usize,
    pub busy: usize,
    pub waiting: usize,
    pub peak_busy: usize,
    pub completed: u64,
    pub panicked: u64,
}

/// Marks a slot busy for as long as it lives.
struct SlotGuard<'a> {
    stats: &'a PoolStats,
}

impl<'a> SlotGuard<'a> {
    fn acquire(stats: &'a PoolStats) -> Self {
        let now_busy = stats.busy.fetch_add(1, Ordering::SeqCst) + 1;
        stats.peak_busy.fetch_max(now_busy, Ordering::SeqCst);
        Self { stats }
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.stats.busy.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct WorkerPool {
    size: usize,
    tx: mpsc::UnboundedSender<QueuedTask>,
    stats: Arc<PoolStats>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start `size` workers. Must be called from within a tokio runtime.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let stats = Arc::new(PoolStats::default());
        let cancel = CancellationToken::new();

        let workers = (0..size)
            .map(|index| {
                tokio::spawn(worker_loop(
                    index,
                    rx.clone(),
                    stats.clone(),
                    cancel.clone(),
                ))
            })
            .collect();

        tracing::info!(workers = size, "Worker pool started");

        Self {
            size,
            tx,
            stats,
            cancel,
            workers: Mutex::new(workers),
        }
    }

    /// Enqueue a task. Never blocks; fails only after shutdown.
    pub fn submit<F>(&self, label: impl Into<String>, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::Internal("worker pool is shut down".into()));
        }
        let queued = QueuedTask {
            label: label.into(),
            task: task.boxed(),
        };
        self.stats.waiting.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(queued).is_err() {
            self.stats.waiting.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Internal("worker pool is shut down".into()));
        }
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            size: self.size,
            busy: self.stats.busy.load(Ordering::SeqCst),
            waiting: self.stats.waiting.load(Ordering::SeqCst),
            peak_busy: self.stats.peak_busy.load(Ordering::SeqCst),
            completed: self.stats.completed.load(Ordering::SeqCst),
            panicked: self.stats.panicked.load(Ordering::SeqCst),
        }
    }

    /// Stop accepting work, abort running tasks and wait for the workers to
    /// exit. Queued tasks that never started are dropped.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let workers: Vec<_> = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            let _ = handle.await;
        }
        tracing::info!("Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn worker_loop(
    index: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<QueuedTask>>>,
    stats: Arc<PoolStats>,
    cancel: CancellationToken,
) {
    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = rx.recv() => item,
            }
        };
        let Some(QueuedTask { label, task }) = next else {
            break;
        };
        stats.waiting.fetch_sub(1, Ordering::SeqCst);

        let _slot = SlotGuard::acquire(&stats);
        tracing::debug!(worker = index, task = %label, "Worker picked up task");

        let handle = tokio::spawn(task);
        let abort = handle.abort_handle();
        tokio::select! {
            result = handle => match result {
                Ok(()) => {
                    stats.completed.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) if e.is_panic() => {
                    stats.panicked.fetch_add(1, Ordering::SeqCst);
                    tracing::error!(worker = index, task = %label, "Task panicked; slot released");
                }
                Err(_) => {
                    tracing::debug!(worker = index, task = %label, "Task was cancelled");
                }
            },
            _ = cancel.cancelled() => {
                abort.abort();
                tracing::warn!(worker = index, task = %label, "Aborted in-flight task on shutdown");
                break;
            }
        }
    }

    tracing::debug!(worker = index, "Worker exiting");
}
