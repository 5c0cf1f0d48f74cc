//! Committed ledger values handed to collaborators.

use serde::Serialize;

use crate::{Goal, StepDate};

/// Number of calendar days kept in the rolling history.
pub const HISTORY_DAYS: usize = 7;

/// Rough energy estimate: 40 kcal per 1000 steps.
pub const CALORIES_PER_STEP: f64 = 0.04;

#[must_use]
pub fn calories_for(steps: u32) -> f64 {
    f64::from(steps) * CALORIES_PER_STEP
}

/// Steps recorded for one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyStepRecord {
    pub date: StepDate,
    pub steps: u32,
}

impl DailyStepRecord {
    #[must_use]
    pub const fn new(date: StepDate, steps: u32) -> Self {
        Self { date, steps }
    }
}

/// Display values computed from the reconciled count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Derived {
    pub calories: f64,
    pub average: f64,
    pub progress_percent: f64,
}

impl Derived {
    /// `history` is the zero-filled window; its mean is the average.
    #[must_use]
    pub fn compute(today: u32, goal: Goal, history: &[DailyStepRecord]) -> Self {
        Self {
            calories: calories_for(today),
            average: mean(history),
            progress_percent: goal.progress_percent(today),
        }
    }
}

fn mean(records: &[DailyStepRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    let total: u64 = records.iter().map(|r| u64::from(r.steps)).sum();
    total as f64 / records.len() as f64
}

/// Read-only view of the ledger after a committed change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerSnapshot {
    pub day: StepDate,
    pub today: u32,
    pub sensor_steps: u32,
    pub broker_steps: u32,
    pub goal: Goal,
    pub derived: Derived,
    /// The zero-filled history window ending at `day`, most recent first.
    pub history: Vec<DailyStepRecord>,
}

impl LedgerSnapshot {
    #[must_use]
    pub fn steps_on(&self, date: StepDate) -> Option<u32> {
        self.history
            .iter()
            .find(|record| record.date == date)
            .map(|record| record.steps)
    }
}

/// The weekly report: per-day records plus aggregate numbers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklySummary {
    /// Most recent first.
    pub days: Vec<DailyStepRecord>,
    pub total: u64,
    pub average: f64,
}

impl WeeklySummary {
    #[must_use]
    pub fn from_records(days: Vec<DailyStepRecord>) -> Self {
        let total = days.iter().map(|r| u64::from(r.steps)).sum();
        let average = mean(&days);
        Self {
            days,
            total,
            average,
        }
    }
}
