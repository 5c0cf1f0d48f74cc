//! Background tasks that keep the step ledger current.
//!
//! The ledger itself owns no timers. This crate supplies the periodic work a
//! host runs next to it:
//!
//! | Task | Default cadence | Effect |
//! |------|-----------------|--------|
//! | [`spawn_broker_poll`] | 3 s | rollover check, then fetch and report the broker total |
//! | [`spawn_rollover_check`] | 60 s | roll over when the calendar day changed |
//! | [`feed_pedometer`] | per line | report raw step counter values |
//!
//! Every spawned task is returned as a [`PollTask`]; dropping it cancels the
//! task.

mod pedometer;
mod poll;
mod task;

pub use pedometer::feed_pedometer;
pub use poll::{
    DEFAULT_BROKER_POLL_INTERVAL, DEFAULT_ROLLOVER_CHECK_INTERVAL, PollOutcome, poll_broker_once,
    spawn_broker_poll, spawn_rollover_check,
};
pub use task::PollTask;
