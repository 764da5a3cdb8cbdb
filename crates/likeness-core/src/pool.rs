//! Scoped worker pool for embarrassingly parallel batch work.
//!
//! Items are handed out over a channel to a fixed number of threads that
//! borrow the caller's read-only state. Results come back over a second
//! channel to the calling thread, the single writer, which restores input
//! order. Cancellation is cooperative and only checked between items.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag a caller can raise to stop a running batch early.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outputs of a pool run, in input order.
///
/// Items skipped because of cancellation are absent.
#[derive(Debug)]
pub struct PoolOutput<T> {
    pub results: Vec<T>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    /// Pool with `workers` threads; `0` means one per available core.
    pub fn new(workers: usize) -> Self {
        let workers = if workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            workers
        };
        Self { workers }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Apply `f` to every item, spreading the work across the pool.
    pub fn map<I, T, F>(&self, items: &[I], cancel: &CancelToken, f: F) -> PoolOutput<T>
    where
        I: Sync,
        T: Send,
        F: Fn(&I) -> T + Sync,
    {
        if items.is_empty() {
            return PoolOutput {
                results: Vec::new(),
                cancelled: false,
            };
        }

        let workers = self.workers.clamp(1, items.len());
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<usize>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<(usize, T)>();
        for idx in 0..items.len() {
            // Receiver is alive until the scope below ends.
            let _ = job_tx.send(idx);
        }
        drop(job_tx);

        let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(items.len()).collect();
        let f = &f;

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    for idx in job_rx.iter() {
                        if cancel.is_cancelled() {
                            break;
                        }
                        if result_tx.send((idx, f(&items[idx]))).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            for (idx, out) in result_rx.iter() {
                slots[idx] = Some(out);
            }
        });

        let results: Vec<T> = slots.into_iter().flatten().collect();
        let cancelled = results.len() < items.len();
        if cancelled {
            tracing::info!(
                completed = results.len(),
                total = items.len(),
                "batch cancelled"
            );
        }
        PoolOutput { results, cancelled }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(0)
    }
}
