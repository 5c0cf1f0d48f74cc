//! In-memory step store.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use stride_types::StepDate;

use crate::{StepStore, StoreError, StoreOp};

#[derive(Debug, Default)]
struct Inner {
    steps: BTreeMap<StepDate, u32>,
    last_reset_date: Option<StepDate>,
    sensor_baseline: Option<f64>,
    reject_writes: bool,
    applied: Vec<StoreOp>,
}

/// Shared in-memory store.
///
/// Clones share the same contents, so a test can hand one clone to the ledger
/// and inspect (or sabotage) the data through another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// When set, every write fails with [`StoreError::Rejected`].
    pub fn set_reject_writes(&self, reject: bool) {
        self.lock().reject_writes = reject;
    }

    /// Persisted step entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<(StepDate, u32)> {
        self.lock()
            .steps
            .iter()
            .map(|(date, steps)| (*date, *steps))
            .collect()
    }

    /// Every write accepted so far, in order.
    #[must_use]
    pub fn applied(&self) -> Vec<StoreOp> {
        self.lock().applied.clone()
    }
}

impl StepStore for MemoryStore {
    fn steps(&mut self, date: StepDate) -> Result<Option<u32>, StoreError> {
        Ok(self.lock().steps.get(&date).copied())
    }

    fn last_reset_date(&mut self) -> Result<Option<StepDate>, StoreError> {
        Ok(self.lock().last_reset_date)
    }

    fn sensor_baseline(&mut self) -> Result<Option<f64>, StoreError> {
        Ok(self.lock().sensor_baseline)
    }

    fn apply(&mut self, op: StoreOp) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.reject_writes {
            return Err(StoreError::Rejected(format!("{op:?}")));
        }
        match op {
            StoreOp::PutSteps { date, steps } => {
                inner.steps.insert(date, steps);
            }
            StoreOp::RemoveSteps(date) => {
                inner.steps.remove(&date);
            }
            StoreOp::SetLastResetDate(date) => inner.last_reset_date = Some(date),
            StoreOp::SetSensorBaseline(baseline) => inner.sensor_baseline = Some(baseline),
            StoreOp::ClearSensorBaseline => inner.sensor_baseline = None,
        }
        inner.applied.push(op);
        Ok(())
    }
}
