//! Core domain types for Stride.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod date;
mod goal;
mod snapshot;

pub use date::{StepDate, StepDateParseError, TimeRange};
pub use goal::{DEFAULT_GOAL_STEPS, Goal, GoalError};
pub use snapshot::{
    CALORIES_PER_STEP, DailyStepRecord, Derived, HISTORY_DAYS, LedgerSnapshot, WeeklySummary,
    calories_for,
};

/// Clamp a signed step reading into the step domain.
///
/// Negative readings become zero; readings above `u32::MAX` saturate.
#[must_use]
pub fn clamp_steps(raw: i64) -> u32 {
    u32::try_from(raw.max(0)).unwrap_or(u32::MAX)
}
