//! Step persistence for Stride.
//!
//! The ledger persists through the [`StepStore`] trait. The layout is a flat
//! key-value space:
//!
//! | Key | Value |
//! |-----|-------|
//! | `steps_YYYYMMDD` | integer step count for that day |
//! | `last_reset_date` | `YYYYMMDD` of the last rollover |
//! | `initial_steps` | float pedometer baseline |
//!
//! Backends:
//! - [`SqliteStore`] - durable, one `entries` table
//! - [`MemoryStore`] - shared in-memory map for tests and ephemeral runs
//! - [`WriteBehind`] - wraps any backend and drains writes on a worker thread

mod memory;
mod sqlite;
mod write_behind;

use std::path::PathBuf;

use stride_types::StepDate;
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use write_behind::WriteBehind;

pub const LAST_RESET_DATE_KEY: &str = "last_reset_date";
pub const SENSOR_BASELINE_KEY: &str = "initial_steps";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to prepare database at {}: {source}", path.display())]
    Prepare {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed value for {key}: {detail}")]
    Malformed { key: String, detail: String },
    #[error("store rejected write: {0}")]
    Rejected(String),
    #[error("store worker has shut down")]
    WorkerClosed,
    #[error("failed to start store worker: {0}")]
    Spawn(std::io::Error),
}

/// A single mutation of the persisted layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StoreOp {
    PutSteps { date: StepDate, steps: u32 },
    RemoveSteps(StepDate),
    SetLastResetDate(StepDate),
    SetSensorBaseline(f64),
    ClearSensorBaseline,
}

/// Persistence backend for the step ledger.
///
/// Reads take `&mut self` so buffered backends can drain pending writes first.
pub trait StepStore: Send {
    fn steps(&mut self, date: StepDate) -> Result<Option<u32>, StoreError>;

    fn last_reset_date(&mut self) -> Result<Option<StepDate>, StoreError>;

    fn sensor_baseline(&mut self) -> Result<Option<f64>, StoreError>;

    fn apply(&mut self, op: StoreOp) -> Result<(), StoreError>;

    /// Block until every accepted write is durable in the backend.
    fn flush(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    fn put_steps(&mut self, date: StepDate, steps: u32) -> Result<(), StoreError> {
        self.apply(StoreOp::PutSteps { date, steps })
    }

    fn remove_steps(&mut self, date: StepDate) -> Result<(), StoreError> {
        self.apply(StoreOp::RemoveSteps(date))
    }

    fn set_last_reset_date(&mut self, date: StepDate) -> Result<(), StoreError> {
        self.apply(StoreOp::SetLastResetDate(date))
    }

    fn set_sensor_baseline(&mut self, baseline: f64) -> Result<(), StoreError> {
        self.apply(StoreOp::SetSensorBaseline(baseline))
    }

    fn clear_sensor_baseline(&mut self) -> Result<(), StoreError> {
        self.apply(StoreOp::ClearSensorBaseline)
    }
}

impl<S: StepStore + ?Sized> StepStore for Box<S> {
    fn steps(&mut self, date: StepDate) -> Result<Option<u32>, StoreError> {
        (**self).steps(date)
    }

    fn last_reset_date(&mut self) -> Result<Option<StepDate>, StoreError> {
        (**self).last_reset_date()
    }

    fn sensor_baseline(&mut self) -> Result<Option<f64>, StoreError> {
        (**self).sensor_baseline()
    }

    fn apply(&mut self, op: StoreOp) -> Result<(), StoreError> {
        (**self).apply(op)
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        (**self).flush()
    }
}
