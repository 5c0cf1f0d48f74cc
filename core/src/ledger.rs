//! The step ledger: reconciliation, persistence and daily rollover.
//!
//! # Reconciliation
//!
//! Two feeds report independently:
//!
//! - the pedometer, as relative steps since the baseline was captured
//! - the broker, as a cumulative total for the day
//!
//! `today` is the maximum of both feeds and of its own previous value, so it
//! never decreases within a day. Only [`StepLedger::reset_today`] and
//! [`StepLedger::check_and_rollover_if_new_day`] bring it back to zero.
//!
//! # Commit order
//!
//! Every mutation runs under one mutex: merge, submit the store write,
//! publish a [`LedgerSnapshot`]. Subscribers therefore only see merged values
//! whose writes were already handed to the store, in commit order. Readers of
//! [`StepLedger::snapshot`] never take the mutex.
//!
//! # Failure handling
//!
//! Store errors are logged and otherwise ignored; the in-memory state stays
//! authoritative until the next successful write.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use stride_store::{StepStore, StoreError, StoreOp};
use stride_types::{
    DailyStepRecord, Derived, Goal, HISTORY_DAYS, LedgerSnapshot, StepDate, WeeklySummary,
    clamp_steps,
};
use tokio::sync::watch;

use crate::sensor::Pedometer;

struct LedgerState {
    store: Box<dyn StepStore>,
    /// Current ledger day. Always equal to the last rollover date.
    day: StepDate,
    sensor_steps: u32,
    broker_steps: u32,
    today: u32,
    goal: Goal,
    /// Recorded days inside the window ending at `day`.
    history: BTreeMap<StepDate, u32>,
    pedometer: Pedometer,
}

impl LedgerState {
    fn persist(&mut self, op: StoreOp) {
        if let Err(e) = self.store.apply(op) {
            tracing::warn!(?op, "Failed to persist step ledger change: {e}");
        }
    }

    /// Merge both feeds into `today`. Returns true when `today` changed.
    fn reconcile(&mut self) -> bool {
        let merged = self.sensor_steps.max(self.broker_steps).max(self.today);
        if merged == self.today {
            return false;
        }
        self.today = merged;
        self.persist(StoreOp::PutSteps {
            date: self.day,
            steps: merged,
        });
        self.history.insert(self.day, merged);
        true
    }

    fn clear_today(&mut self) {
        self.sensor_steps = 0;
        self.broker_steps = 0;
        self.today = 0;
        self.pedometer.rearm();
        self.history.remove(&self.day);
        self.persist(StoreOp::RemoveSteps(self.day));
        self.persist(StoreOp::ClearSensorBaseline);
    }

    fn window(&self) -> Vec<DailyStepRecord> {
        self.day
            .window(HISTORY_DAYS)
            .map(|date| DailyStepRecord::new(date, self.history.get(&date).copied().unwrap_or(0)))
            .collect()
    }

    fn snapshot(&self) -> LedgerSnapshot {
        let history = self.window();
        LedgerSnapshot {
            day: self.day,
            today: self.today,
            sensor_steps: self.sensor_steps,
            broker_steps: self.broker_steps,
            goal: self.goal,
            derived: Derived::compute(self.today, self.goal, &history),
            history,
        }
    }
}

/// Single authoritative holder of today's step count.
///
/// Construct one per process and share it (typically behind an `Arc`) with
/// every collaborator that reports or displays steps.
pub struct StepLedger {
    state: Mutex<LedgerState>,
    published: watch::Sender<LedgerSnapshot>,
}

impl StepLedger {
    /// Load the ledger from `store`.
    ///
    /// If a rollover date is persisted, that day stays current until the next
    /// [`check_and_rollover_if_new_day`](Self::check_and_rollover_if_new_day);
    /// otherwise `today` becomes the current day. The day's persisted count is
    /// carried as the floor for `today`. Unreadable values are logged and
    /// treated as absent.
    pub fn open<S: StepStore + 'static>(store: S, goal: Goal, today: StepDate) -> Self {
        let mut store: Box<dyn StepStore> = Box::new(store);

        let day = match read_logged(store.last_reset_date(), "last reset date") {
            Some(day) => day,
            None => {
                if let Err(e) = store.set_last_reset_date(today) {
                    tracing::warn!("Failed to persist initial reset date: {e}");
                }
                today
            }
        };

        let mut history = BTreeMap::new();
        for date in day.window(HISTORY_DAYS) {
            if let Some(steps) = read_logged(store.steps(date), "daily steps") {
                history.insert(date, steps);
            }
        }
        let carried = history.get(&day).copied().unwrap_or(0);

        if let Some(baseline) = read_logged(store.sensor_baseline(), "pedometer baseline") {
            tracing::debug!(baseline, "Discarding persisted pedometer baseline");
            if let Err(e) = store.apply(StoreOp::ClearSensorBaseline) {
                tracing::warn!("Failed to clear stale pedometer baseline: {e}");
            }
        }

        let state = LedgerState {
            store,
            day,
            sensor_steps: 0,
            broker_steps: 0,
            today: carried,
            goal,
            history,
            pedometer: Pedometer::new(),
        };
        tracing::info!(%day, steps = carried, goal = goal.steps(), "Step ledger loaded");

        let (published, _) = watch::channel(state.snapshot());
        Self {
            state: Mutex::new(state),
            published,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish while still holding the lock so snapshots follow commit order.
    fn publish(&self, state: &LedgerState) -> LedgerSnapshot {
        let snapshot = state.snapshot();
        self.published.send_replace(snapshot.clone());
        snapshot
    }

    /// Record a relative pedometer reading. Negative values clamp to zero.
    pub fn report_sensor_reading(&self, relative_steps: i64) -> LedgerSnapshot {
        let mut state = self.lock();
        state.sensor_steps = clamp_steps(relative_steps);
        self.commit_feed(&mut state, "sensor")
    }

    /// Record the broker's cumulative total for today. Negative values clamp to zero.
    pub fn report_broker_reading(&self, cumulative_steps: i64) -> LedgerSnapshot {
        let mut state = self.lock();
        state.broker_steps = clamp_steps(cumulative_steps);
        self.commit_feed(&mut state, "broker")
    }

    /// Like [`report_broker_reading`](Self::report_broker_reading), but only
    /// if `day` is still the ledger day.
    ///
    /// A fetch that straddles midnight must not count toward the new day.
    /// Returns `None` when the reading was dropped.
    pub fn report_broker_reading_on(
        &self,
        day: StepDate,
        cumulative_steps: i64,
    ) -> Option<LedgerSnapshot> {
        let mut state = self.lock();
        if state.day != day {
            tracing::debug!(
                fetched_for = %day,
                current = %state.day,
                "Dropping broker reading for another day"
            );
            return None;
        }
        state.broker_steps = clamp_steps(cumulative_steps);
        Some(self.commit_feed(&mut state, "broker"))
    }

    /// Record a raw step counter value (cumulative since device boot).
    ///
    /// The first value after start or reset becomes the baseline and is
    /// persisted; the difference to it is reported as sensor steps.
    pub fn report_pedometer(&self, raw_counter: f64) -> LedgerSnapshot {
        let mut state = self.lock();
        let reading = state.pedometer.observe(raw_counter);
        if let Some(baseline) = reading.captured_baseline {
            tracing::debug!(baseline, "Pedometer baseline captured");
            state.persist(StoreOp::SetSensorBaseline(baseline));
        }
        state.sensor_steps = reading.relative_steps;
        self.commit_feed(&mut state, "pedometer")
    }

    /// Reconcile and publish unless the report left every value as it was.
    fn commit_feed(&self, state: &mut LedgerState, source: &'static str) -> LedgerSnapshot {
        let today_changed = state.reconcile();
        let feeds_changed = {
            let published = self.published.borrow();
            published.sensor_steps != state.sensor_steps
                || published.broker_steps != state.broker_steps
        };
        if !today_changed && !feeds_changed {
            return state.snapshot();
        }
        tracing::debug!(
            source,
            sensor = state.sensor_steps,
            broker = state.broker_steps,
            today = state.today,
            "Steps reconciled"
        );
        self.publish(state)
    }

    /// Zero both feeds and today's count, and drop today's persisted entry.
    ///
    /// Other days are untouched.
    pub fn reset_today(&self) -> LedgerSnapshot {
        let mut state = self.lock();
        state.clear_today();
        tracing::info!(day = %state.day, "Today's steps reset");
        self.publish(&state)
    }

    /// Roll over to `current` if it differs from the last rollover date.
    ///
    /// Returns true when a rollover happened. Calling it again with the same
    /// date is a no-op.
    pub fn check_and_rollover_if_new_day(&self, current: StepDate) -> bool {
        let mut state = self.lock();
        if state.day == current {
            return false;
        }

        let previous = state.day;
        let carried = state.today;
        state.day = current;
        state.persist(StoreOp::SetLastResetDate(current));
        state.clear_today();
        let window_start = current.days_back(HISTORY_DAYS as u32 - 1);
        state
            .history
            .retain(|date, _| *date >= window_start && *date <= current);

        tracing::info!(%previous, %current, previous_steps = carried, "Daily rollover");
        self.publish(&state);
        true
    }

    /// Replace the goal. Progress is recomputed and published.
    pub fn set_goal(&self, goal: Goal) -> LedgerSnapshot {
        let mut state = self.lock();
        state.goal = goal;
        self.publish(&state)
    }

    /// The last committed snapshot. Never blocks on writers.
    #[must_use]
    pub fn snapshot(&self) -> LedgerSnapshot {
        self.published.borrow().clone()
    }

    /// A receiver that observes every committed snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LedgerSnapshot> {
        self.published.subscribe()
    }

    #[must_use]
    pub fn today(&self) -> u32 {
        self.published.borrow().today
    }

    #[must_use]
    pub fn goal(&self) -> Goal {
        self.published.borrow().goal
    }

    /// The last rollover date, which is also the day `today` counts for.
    #[must_use]
    pub fn last_reset_date(&self) -> StepDate {
        self.published.borrow().day
    }

    /// The last seven calendar days, zero-filled, most recent first.
    #[must_use]
    pub fn history(&self) -> Vec<DailyStepRecord> {
        self.published.borrow().history.clone()
    }

    /// The same window keyed by date for lookup.
    #[must_use]
    pub fn history_by_date(&self) -> BTreeMap<StepDate, u32> {
        self.published
            .borrow()
            .history
            .iter()
            .map(|record| (record.date, record.steps))
            .collect()
    }

    #[must_use]
    pub fn derived(&self) -> Derived {
        self.published.borrow().derived
    }

    #[must_use]
    pub fn weekly_summary(&self) -> WeeklySummary {
        WeeklySummary::from_records(self.history())
    }

    /// Wait until every submitted write reached the store.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.lock().store.flush()
    }
}

fn read_logged<T>(result: Result<Option<T>, StoreError>, what: &str) -> Option<T> {
    result.unwrap_or_else(|e| {
        tracing::warn!("Failed to read {what} from store: {e}");
        None
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use stride_store::{MemoryStore, SqliteStore, WriteBehind};

    use super::*;

    fn day(d: u32) -> StepDate {
        StepDate::from_ymd(2024, 9, d).unwrap()
    }

    fn ledger_on(store: MemoryStore, date: StepDate) -> StepLedger {
        StepLedger::open(store, Goal::default(), date)
    }

    fn fresh() -> (StepLedger, MemoryStore) {
        let store = MemoryStore::new();
        (ledger_on(store.clone(), day(10)), store)
    }

    #[test]
    fn today_is_max_of_both_feeds() {
        for (a, b) in [(0, 0), (3000, 4500), (4500, 3000), (7, 7), (0, 12), (12, 0)] {
            let (ledger, _) = fresh();
            ledger.report_sensor_reading(a);
            let snapshot = ledger.report_broker_reading(b);
            assert_eq!(snapshot.today, a.max(b) as u32, "a={a} b={b}");
            assert_eq!(ledger.today(), a.max(b) as u32);
        }
    }

    #[test]
    fn negative_input_is_clamped() {
        let (ledger, store) = fresh();
        let snapshot = ledger.report_sensor_reading(-50);
        assert_eq!(snapshot.sensor_steps, 0);
        assert_eq!(snapshot.today, 0);
        assert!(store.entries().is_empty());
    }

    #[test]
    fn today_is_monotonic_within_a_day() {
        let (ledger, _) = fresh();
        let mut last = 0;
        for (sensor, broker) in [(10, 0), (10, 50), (80, 50), (80, 120), (200, 120)] {
            ledger.report_sensor_reading(sensor);
            ledger.report_broker_reading(broker);
            let today = ledger.today();
            assert!(today >= last);
            last = today;
        }
        assert_eq!(last, 200);
    }

    #[test]
    fn broker_resync_to_smaller_total_does_not_drop_today() {
        let (ledger, _) = fresh();
        ledger.report_broker_reading(4500);
        let snapshot = ledger.report_broker_reading(3000);
        assert_eq!(snapshot.broker_steps, 3000);
        assert_eq!(snapshot.today, 4500);
    }

    #[test]
    fn broker_reading_for_stale_day_is_dropped() {
        let (ledger, _) = fresh();
        assert!(ledger.report_broker_reading_on(day(9), 4000).is_none());
        assert_eq!(ledger.today(), 0);

        let snapshot = ledger.report_broker_reading_on(day(10), 4000).unwrap();
        assert_eq!(snapshot.today, 4000);
    }

    #[test]
    fn changes_are_persisted_under_day_key() {
        let (ledger, store) = fresh();
        ledger.report_broker_reading(4500);
        ledger.report_broker_reading(4500);
        ledger.report_sensor_reading(5000);

        assert_eq!(store.entries(), vec![(day(10), 5000)]);
        let puts = store
            .applied()
            .into_iter()
            .filter(|op| matches!(op, StoreOp::PutSteps { .. }))
            .count();
        assert_eq!(puts, 2, "unchanged values must not be rewritten");
    }

    #[test]
    fn reset_clears_feeds_and_keeps_other_days() {
        let store = MemoryStore::new();
        {
            let ledger = ledger_on(store.clone(), day(9));
            ledger.report_sensor_reading(3333);
            assert!(ledger.check_and_rollover_if_new_day(day(10)));
            ledger.report_broker_reading(800);
        }
        let ledger = ledger_on(store.clone(), day(10));
        assert_eq!(ledger.today(), 800);

        let snapshot = ledger.reset_today();
        assert_eq!(snapshot.today, 0);
        assert_eq!(snapshot.sensor_steps, 0);
        assert_eq!(snapshot.broker_steps, 0);
        assert_eq!(snapshot.steps_on(day(9)), Some(3333));
        assert_eq!(store.entries(), vec![(day(9), 3333)]);
    }

    #[test]
    fn rollover_is_idempotent() {
        let (ledger, store) = fresh();
        ledger.report_sensor_reading(5000);

        assert!(ledger.check_and_rollover_if_new_day(day(11)));
        let once = ledger.snapshot();
        let writes_after_once = store.applied().len();

        assert!(!ledger.check_and_rollover_if_new_day(day(11)));
        assert_eq!(ledger.snapshot(), once);
        assert_eq!(store.applied().len(), writes_after_once);
        assert_eq!(ledger.last_reset_date(), day(11));
    }

    #[test]
    fn same_day_rollover_check_is_noop() {
        let (ledger, _) = fresh();
        ledger.report_sensor_reading(10);
        assert!(!ledger.check_and_rollover_if_new_day(day(10)));
        assert_eq!(ledger.today(), 10);
    }

    #[test]
    fn scenario_broker_then_sensor_then_rollover() {
        let (ledger, _) = fresh();

        ledger.report_sensor_reading(0);
        let snapshot = ledger.report_broker_reading(4500);
        assert_eq!(snapshot.today, 4500);
        assert_eq!(snapshot.derived.calories, 180.0);

        assert_eq!(ledger.report_sensor_reading(5000).today, 5000);

        assert!(ledger.check_and_rollover_if_new_day(day(11)));
        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.today, 0);
        assert_eq!(snapshot.steps_on(day(10)), Some(5000));
        assert_eq!(ledger.history_by_date().get(&day(10)), Some(&5000));
    }

    #[test]
    fn history_has_seven_zero_filled_days_most_recent_first() {
        let (ledger, _) = fresh();
        ledger.report_sensor_reading(100);

        let history = ledger.history();
        assert_eq!(history.len(), HISTORY_DAYS);
        assert_eq!(history[0], DailyStepRecord::new(day(10), 100));
        assert_eq!(history[6], DailyStepRecord::new(day(4), 0));
        assert!(history.windows(2).all(|w| w[0].date > w[1].date));
    }

    #[test]
    fn history_never_exceeds_seven_entries_across_many_rollovers() {
        let (ledger, _) = fresh();
        for offset in 0..20 {
            let date = StepDate::from_ymd(2024, 10, offset + 1).unwrap();
            ledger.check_and_rollover_if_new_day(date);
            ledger.report_sensor_reading(i64::from(offset) * 100 + 1);
            assert!(ledger.history().len() <= HISTORY_DAYS);
            assert!(ledger.history_by_date().len() <= HISTORY_DAYS);
        }
        let history = ledger.history();
        assert_eq!(history[0].steps, 1901);
        assert_eq!(history[6].steps, 1301);
    }

    #[test]
    fn derived_values() {
        let (ledger, _) = fresh();
        ledger.report_broker_reading(9000);
        let derived = ledger.derived();
        assert_eq!(derived.calories, 9000.0 * 0.04);
        assert!((derived.progress_percent - 100.0).abs() < f64::EPSILON);
        assert!((derived.average - 9000.0 / 7.0).abs() < 1e-9);

        ledger.set_goal(Goal::new(18_000).unwrap());
        assert!((ledger.derived().progress_percent - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn pedometer_baseline_is_captured_and_persisted() {
        let (ledger, store) = fresh();
        assert_eq!(ledger.report_pedometer(52_000.0).today, 0);
        assert_eq!(ledger.report_pedometer(52_750.0).today, 750);
        assert!(
            store
                .applied()
                .contains(&StoreOp::SetSensorBaseline(52_000.0))
        );

        ledger.reset_today();
        assert!(store.applied().contains(&StoreOp::ClearSensorBaseline));
        assert_eq!(ledger.report_pedometer(53_000.0).today, 0);
        assert_eq!(ledger.report_pedometer(53_010.0).today, 10);
    }

    #[test]
    fn reopen_restores_day_and_carried_floor() {
        let store = MemoryStore::new();
        {
            let ledger = ledger_on(store.clone(), day(10));
            ledger.report_broker_reading(4200);
        }

        // Started on a later day: stays on the persisted day until rollover.
        let ledger = ledger_on(store.clone(), day(12));
        assert_eq!(ledger.last_reset_date(), day(10));
        assert_eq!(ledger.today(), 4200);

        assert_eq!(ledger.report_sensor_reading(100).today, 4200);

        assert!(ledger.check_and_rollover_if_new_day(day(12)));
        assert_eq!(ledger.today(), 0);
        assert_eq!(ledger.snapshot().steps_on(day(10)), Some(4200));
    }

    #[test]
    fn store_failures_do_not_affect_in_memory_state() {
        let store = MemoryStore::new();
        let ledger = ledger_on(store.clone(), day(10));
        store.set_reject_writes(true);

        assert_eq!(ledger.report_sensor_reading(1200).today, 1200);
        assert!(ledger.check_and_rollover_if_new_day(day(11)));
        assert_eq!(ledger.snapshot().steps_on(day(10)), Some(1200));
        assert!(store.entries().is_empty());
    }

    #[test]
    fn subscribers_see_committed_values_in_order() {
        let (ledger, _) = fresh();
        let mut rx = ledger.subscribe();

        ledger.report_sensor_reading(10);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().today, 10);

        ledger.report_sensor_reading(10);
        assert!(!rx.has_changed().unwrap(), "no-op reports are not published");

        ledger.report_broker_reading(30);
        assert_eq!(rx.borrow_and_update().today, 30);
    }

    #[test]
    fn feed_changes_are_published_even_when_today_holds() {
        let (ledger, _) = fresh();
        let mut rx = ledger.subscribe();

        ledger.report_sensor_reading(5000);
        let _ = rx.borrow_and_update();
        let returned = ledger.report_broker_reading(3000);

        assert!(rx.has_changed().unwrap());
        assert_eq!(ledger.snapshot(), returned);
        assert_eq!(ledger.snapshot().broker_steps, 3000);
        assert_eq!(ledger.today(), 5000);

        ledger.reset_today();
        ledger.report_broker_reading(4000);
        ledger.report_sensor_reading(1000);
        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.sensor_steps, 1000);
        assert_eq!(snapshot.broker_steps, 4000);
        assert_eq!(snapshot.today, 4000);
    }

    #[test]
    fn persisted_baseline_is_cleared_on_open() {
        let mut store = MemoryStore::new();
        store.set_sensor_baseline(52_000.0).unwrap();

        let ledger = ledger_on(store.clone(), day(10));
        assert!(store.applied().ends_with(&[StoreOp::ClearSensorBaseline]));
        assert_eq!(store.sensor_baseline().unwrap(), None);

        assert_eq!(ledger.report_pedometer(60_000.0).today, 0);
        assert_eq!(ledger.report_pedometer(60_025.0).today, 25);
    }

    #[test]
    fn backwards_rollover_starts_the_earlier_day_from_zero() {
        let (ledger, store) = fresh();
        ledger.check_and_rollover_if_new_day(day(9));
        ledger.report_sensor_reading(3000);
        ledger.check_and_rollover_if_new_day(day(10));
        ledger.report_sensor_reading(5000);

        assert!(ledger.check_and_rollover_if_new_day(day(9)));
        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.day, day(9));
        assert_eq!(snapshot.today, 0);
        assert_eq!(snapshot.steps_on(day(10)), None);
        assert_eq!(store.entries(), vec![(day(10), 5000)]);
    }

    #[test]
    fn concurrent_reports_do_not_lose_updates() {
        let (ledger, store) = fresh();
        let ledger = Arc::new(ledger);

        let sensor = {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                for steps in 0..=2000 {
                    ledger.report_sensor_reading(steps);
                }
            })
        };
        let broker = {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                for steps in (0..=3000).step_by(3) {
                    ledger.report_broker_reading(steps);
                }
            })
        };
        sensor.join().unwrap();
        broker.join().unwrap();

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.today, 3000);
        assert_eq!(snapshot.sensor_steps, 2000);
        assert_eq!(snapshot.broker_steps, 3000);
        assert_eq!(store.entries(), vec![(day(10), 3000)]);
    }

    #[test]
    fn sqlite_write_behind_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("steps.db");

        {
            let store = WriteBehind::spawn(SqliteStore::open(&path).unwrap()).unwrap();
            let ledger = StepLedger::open(store, Goal::default(), day(10));
            ledger.report_broker_reading(2500);
            ledger.check_and_rollover_if_new_day(day(11));
            ledger.report_sensor_reading(40);
            ledger.flush().unwrap();
        }

        let ledger = StepLedger::open(SqliteStore::open(&path).unwrap(), Goal::default(), day(11));
        assert_eq!(ledger.last_reset_date(), day(11));
        assert_eq!(ledger.today(), 40);
        assert_eq!(ledger.snapshot().steps_on(day(10)), Some(2500));
    }
}
