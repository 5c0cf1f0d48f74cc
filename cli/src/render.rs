//! Plain-text views of ledger state.

use std::fmt::Write;

use stride_types::{Goal, LedgerSnapshot, WeeklySummary};

pub fn status(snapshot: &LedgerSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Day        {}", snapshot.day);
    let _ = writeln!(
        out,
        "Steps      {} / {} ({:.0}%)",
        snapshot.today,
        snapshot.goal.steps(),
        snapshot.derived.progress_percent
    );
    let _ = writeln!(out, "Calories   {:.1} kcal", snapshot.derived.calories);
    let _ = writeln!(out, "7-day avg  {:.0}", snapshot.derived.average);
    let _ = writeln!(
        out,
        "Sources    sensor {} / broker {}",
        snapshot.sensor_steps, snapshot.broker_steps
    );
    out
}

/// One line per committed change while the service runs.
pub fn status_line(snapshot: &LedgerSnapshot) -> String {
    format!(
        "{} {:>6} steps  {:>5.1} kcal  {:>3.0}%",
        snapshot.day, snapshot.today, snapshot.derived.calories, snapshot.derived.progress_percent
    )
}

pub fn history(summary: &WeeklySummary, goal: Goal) -> String {
    let mut out = String::new();
    for record in &summary.days {
        let _ = writeln!(
            out,
            "{}  {:>6}  {:>3.0}%",
            record.date,
            record.steps,
            goal.progress_percent(record.steps)
        );
    }
    let _ = writeln!(out, "Total       {:>6}", summary.total);
    let _ = writeln!(out, "Average     {:>6.0}", summary.average);
    out
}
