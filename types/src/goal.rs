//! Daily step goal.

use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_GOAL_STEPS: u32 = 6000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GoalError {
    #[error("step goal must be greater than zero")]
    Zero,
}

/// Target step count for a day.
///
/// Invariant: non-zero, so progress is always well defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Goal(NonZeroU32);

impl Goal {
    const DEFAULT: Goal = match NonZeroU32::new(DEFAULT_GOAL_STEPS) {
        Some(steps) => Goal(steps),
        None => panic!("default goal must be non-zero"),
    };

    pub fn new(steps: u32) -> Result<Self, GoalError> {
        NonZeroU32::new(steps).map(Self).ok_or(GoalError::Zero)
    }

    #[must_use]
    pub const fn steps(self) -> u32 {
        self.0.get()
    }

    /// `today / goal * 100`, clamped to `[0, 100]`.
    #[must_use]
    pub fn progress_percent(self, today: u32) -> f64 {
        (f64::from(today) / f64::from(self.steps()) * 100.0).clamp(0.0, 100.0)
    }
}

impl Default for Goal {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u32> for Goal {
    type Error = GoalError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Goal> for u32 {
    fn from(goal: Goal) -> Self {
        goal.steps()
    }
}
