//! SQLite-backed step store.

use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params};
use stride_types::StepDate;
use stride_utils::{ensure_owner_only_file, ensure_secure_dir};

use crate::{LAST_RESET_DATE_KEY, SENSOR_BASELINE_KEY, StepStore, StoreError, StoreOp};

/// Durable key-value store in a single SQLite table.
pub struct SqliteStore {
    db: Connection,
}

impl SqliteStore {
    // `value` has no declared type so integers, text and reals keep their storage class.
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS entries (
            key TEXT PRIMARY KEY NOT NULL,
            value NOT NULL
        );
    ";

    /// Open or create the store at `path`, with owner-only permissions on Unix.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let prepare_err = |source| StoreError::Prepare {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            ensure_secure_dir(parent).map_err(prepare_err)?;
        }
        ensure_owner_only_file(path).map_err(prepare_err)?;

        let db = Connection::open(path)?;
        Self::initialize(db)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(db: Connection) -> Result<Self, StoreError> {
        db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
        db.execute_batch(Self::SCHEMA)?;
        Ok(Self { db })
    }

    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let value = self
            .db
            .query_row(
                "SELECT value FROM entries WHERE key = ?1",
                [key],
                |row| row.get::<_, Value>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.db.execute(
            "INSERT INTO entries (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.db
            .execute("DELETE FROM entries WHERE key = ?1", [key])?;
        Ok(())
    }
}

fn malformed(key: &str, value: &Value) -> StoreError {
    StoreError::Malformed {
        key: key.to_string(),
        detail: format!("unexpected {:?}", value.data_type()),
    }
}

impl StepStore for SqliteStore {
    fn steps(&mut self, date: StepDate) -> Result<Option<u32>, StoreError> {
        let key = date.storage_key();
        match self.get(&key)? {
            None => Ok(None),
            Some(Value::Integer(raw)) => {
                u32::try_from(raw)
                    .map(Some)
                    .map_err(|_| StoreError::Malformed {
                        key,
                        detail: format!("step count {raw} out of range"),
                    })
            }
            Some(other) => Err(malformed(&key, &other)),
        }
    }

    fn last_reset_date(&mut self) -> Result<Option<StepDate>, StoreError> {
        match self.get(LAST_RESET_DATE_KEY)? {
            None => Ok(None),
            Some(Value::Text(raw)) => {
                StepDate::parse_compact(&raw)
                    .map(Some)
                    .map_err(|e| StoreError::Malformed {
                        key: LAST_RESET_DATE_KEY.to_string(),
                        detail: e.to_string(),
                    })
            }
            Some(other) => Err(malformed(LAST_RESET_DATE_KEY, &other)),
        }
    }

    fn sensor_baseline(&mut self) -> Result<Option<f64>, StoreError> {
        match self.get(SENSOR_BASELINE_KEY)? {
            None => Ok(None),
            Some(Value::Real(raw)) => Ok(Some(raw)),
            Some(Value::Integer(raw)) => Ok(Some(raw as f64)),
            Some(other) => Err(malformed(SENSOR_BASELINE_KEY, &other)),
        }
    }

    fn apply(&mut self, op: StoreOp) -> Result<(), StoreError> {
        match op {
            StoreOp::PutSteps { date, steps } => {
                self.put(&date.storage_key(), Value::Integer(i64::from(steps)))
            }
            StoreOp::RemoveSteps(date) => self.remove(&date.storage_key()),
            StoreOp::SetLastResetDate(date) => {
                self.put(LAST_RESET_DATE_KEY, Value::Text(date.compact()))
            }
            StoreOp::SetSensorBaseline(baseline) => {
                self.put(SENSOR_BASELINE_KEY, Value::Real(baseline))
            }
            StoreOp::ClearSensorBaseline => self.remove(SENSOR_BASELINE_KEY),
        }
    }
}
