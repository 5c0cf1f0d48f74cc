//! Step reconciliation for Stride.
//!
//! The [`StepLedger`] is the single authoritative holder of today's step
//! count. It merges a relative pedometer feed and a cumulative broker feed by
//! maximum, persists every change through a [`stride_store::StepStore`], keeps
//! a seven-day history, and resets on day rollover.
//!
//! The ledger is synchronous and owns no timers. Periodic work (broker polls,
//! rollover checks) is scheduled by the host.

pub mod clock;
mod ledger;
pub mod sensor;

pub use clock::{Clock, FixedClock, SystemClock};
pub use ledger::StepLedger;
pub use sensor::{Pedometer, PedometerReading};
