//! Ordered, fire-and-forget writes on a dedicated worker thread.
//!
//! Writes are queued on an unbounded FIFO channel and applied by a single
//! worker, so a later write can never be overtaken by an earlier one. Reads
//! travel through the same queue and therefore observe every write accepted
//! before them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};

use stride_types::StepDate;
use tokio::sync::mpsc;

use crate::{StepStore, StoreError, StoreOp};

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

enum Command<S> {
    Apply(StoreOp),
    Run(Job<S>),
    Shutdown,
}

/// Wraps a backend so writes return immediately and land in order.
pub struct WriteBehind<S: StepStore + 'static> {
    tx: mpsc::UnboundedSender<Command<S>>,
    failed_writes: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl<S: StepStore + 'static> WriteBehind<S> {
    pub fn spawn(store: S) -> Result<Self, StoreError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command<S>>();
        let failed_writes = Arc::new(AtomicU64::new(0));
        let failures = Arc::clone(&failed_writes);

        let worker = thread::Builder::new()
            .name("stride-store-writer".to_string())
            .spawn(move || {
                let mut store = store;
                while let Some(command) = rx.blocking_recv() {
                    match command {
                        Command::Apply(op) => {
                            if let Err(e) = store.apply(op) {
                                failures.fetch_add(1, Ordering::Relaxed);
                                tracing::warn!(?op, "Deferred store write failed: {e}");
                            }
                        }
                        Command::Run(job) => job(&mut store),
                        Command::Shutdown => break,
                    }
                }
                if let Err(e) = store.flush() {
                    tracing::warn!("Final store flush failed: {e}");
                }
            })
            .map_err(StoreError::Spawn)?;

        Ok(Self {
            tx,
            failed_writes,
            worker: Some(worker),
        })
    }

    /// Number of queued writes that the backend rejected.
    #[must_use]
    pub fn failed_writes(&self) -> u64 {
        self.failed_writes.load(Ordering::Relaxed)
    }

    /// Run `f` on the worker after every previously queued write.
    fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut S) -> Result<T, StoreError> + Send + 'static,
    {
        let (reply_tx, reply_rx) = std_mpsc::sync_channel(1);
        let job: Job<S> = Box::new(move |store| {
            let _ = reply_tx.send(f(store));
        });
        self.tx
            .send(Command::Run(job))
            .map_err(|_| StoreError::WorkerClosed)?;
        reply_rx.recv().map_err(|_| StoreError::WorkerClosed)?
    }
}

impl<S: StepStore + 'static> StepStore for WriteBehind<S> {
    fn steps(&mut self, date: StepDate) -> Result<Option<u32>, StoreError> {
        self.call(move |store| store.steps(date))
    }

    fn last_reset_date(&mut self) -> Result<Option<StepDate>, StoreError> {
        self.call(S::last_reset_date)
    }

    fn sensor_baseline(&mut self) -> Result<Option<f64>, StoreError> {
        self.call(S::sensor_baseline)
    }

    fn apply(&mut self, op: StoreOp) -> Result<(), StoreError> {
        self.tx
            .send(Command::Apply(op))
            .map_err(|_| StoreError::WorkerClosed)
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        self.call(S::flush)
    }
}

impl<S: StepStore + 'static> Drop for WriteBehind<S> {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::warn!("Store writer thread panicked");
        }
        let failed = self.failed_writes();
        if failed > 0 {
            tracing::warn!(failed, "Store writer dropped writes during this session");
        }
    }
}
