use std::sync::Arc;
use std::time::Duration;

use stride_broker::{BrokerError, StepBroker};
use stride_core::{Clock, StepLedger};
use stride_types::{LedgerSnapshot, TimeRange};
use tokio::time::MissedTickBehavior;

use crate::task::PollTask;

pub const DEFAULT_BROKER_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_ROLLOVER_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// What a single broker poll did.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The total was reported; carries the resulting snapshot.
    Reported(LedgerSnapshot),
    /// The fetch finished after the ledger moved to another day.
    Stale,
}

/// Roll over if needed, fetch today's total, and report it.
///
/// Errors leave the ledger untouched.
pub async fn poll_broker_once<B>(
    ledger: &StepLedger,
    broker: &B,
    clock: &dyn Clock,
) -> Result<PollOutcome, BrokerError>
where
    B: StepBroker,
{
    let now = clock.now();
    ledger.check_and_rollover_if_new_day(clock.today());

    let range = TimeRange::today_until(now);
    let total = broker.steps_between(range).await?;
    Ok(
        match ledger.report_broker_reading_on(range.day(), i64::from(total)) {
            Some(snapshot) => PollOutcome::Reported(snapshot),
            None => PollOutcome::Stale,
        },
    )
}

/// Poll `broker` every `interval`, starting immediately.
///
/// Failed polls are logged at warn level. Consecutive identical failures are
/// logged once until a poll succeeds again.
pub fn spawn_broker_poll<B>(
    ledger: Arc<StepLedger>,
    broker: Arc<B>,
    clock: Arc<dyn Clock>,
    interval: Duration,
) -> PollTask
where
    B: StepBroker + 'static,
{
    PollTask::spawn("broker-poll", async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_error: Option<String> = None;

        loop {
            ticker.tick().await;
            match poll_broker_once(&ledger, broker.as_ref(), clock.as_ref()).await {
                Ok(outcome) => {
                    if last_error.take().is_some() {
                        tracing::info!("Broker poll recovered");
                    }
                    if let PollOutcome::Reported(snapshot) = outcome {
                        tracing::trace!(
                            broker = snapshot.broker_steps,
                            today = snapshot.today,
                            "Broker poll"
                        );
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    if last_error.as_deref() != Some(message.as_str()) {
                        tracing::warn!("Broker poll failed: {message}");
                    }
                    last_error = Some(message);
                }
            }
        }
    })
}

/// Check for a new calendar day every `interval`, starting immediately.
pub fn spawn_rollover_check(
    ledger: Arc<StepLedger>,
    clock: Arc<dyn Clock>,
    interval: Duration,
) -> PollTask {
    PollTask::spawn("rollover-check", async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            ledger.check_and_rollover_if_new_day(clock.today());
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::future::Future;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::{Local, TimeDelta, TimeZone};
    use stride_core::FixedClock;
    use stride_store::MemoryStore;
    use stride_types::{Goal, StepDate};

    use super::*;

    /// Replays scripted totals; `None` answers with a 503. Repeats the last
    /// entry once the script runs out.
    struct ScriptedBroker {
        script: Mutex<VecDeque<Option<u32>>>,
        calls: AtomicU32,
        ranges: Mutex<Vec<TimeRange>>,
    }

    impl ScriptedBroker {
        fn new(script: impl IntoIterator<Item = Option<u32>>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
                calls: AtomicU32::new(0),
                ranges: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl StepBroker for ScriptedBroker {
        fn steps_between(
            &self,
            range: TimeRange,
        ) -> impl Future<Output = Result<u32, BrokerError>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.ranges.lock().unwrap().push(range);
            let mut script = self.script.lock().unwrap();
            let next = if script.len() > 1 {
                script.pop_front().flatten()
            } else {
                script.front().copied().flatten()
            };
            let result = next.ok_or_else(|| BrokerError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
            async move { result }
        }
    }

    fn at(d: u32, h: u32) -> chrono::DateTime<Local> {
        Local.with_ymd_and_hms(2024, 9, d, h, 0, 0).single().unwrap()
    }

    fn day(d: u32) -> StepDate {
        StepDate::from_ymd(2024, 9, d).unwrap()
    }

    fn setup(
        script: impl IntoIterator<Item = Option<u32>>,
    ) -> (Arc<StepLedger>, Arc<ScriptedBroker>, Arc<FixedClock>) {
        let ledger = StepLedger::open(MemoryStore::new(), Goal::default(), day(10));
        (
            Arc::new(ledger),
            Arc::new(ScriptedBroker::new(script)),
            Arc::new(FixedClock::new(at(10, 9))),
        )
    }

    #[tokio::test]
    async fn poll_reports_total_for_today_range() {
        let (ledger, broker, clock) = setup([Some(4500)]);

        let outcome = poll_broker_once(&ledger, broker.as_ref(), clock.as_ref())
            .await
            .unwrap();

        let snapshot = match outcome {
            PollOutcome::Reported(snapshot) => snapshot,
            other => panic!("expected Reported, got {other:?}"),
        };
        assert_eq!(snapshot.today, 4500);
        assert_eq!(snapshot.broker_steps, 4500);

        let range = broker.ranges.lock().unwrap()[0];
        assert_eq!(range.day(), day(10));
        assert_eq!(range.end(), at(10, 9));
        assert!(range.start() <= range.end());
    }

    #[tokio::test]
    async fn poll_rolls_over_before_fetching() {
        let (ledger, broker, clock) = setup([Some(4500), Some(120)]);
        poll_broker_once(&ledger, broker.as_ref(), clock.as_ref())
            .await
            .unwrap();

        clock.advance(TimeDelta::days(1));
        poll_broker_once(&ledger, broker.as_ref(), clock.as_ref())
            .await
            .unwrap();

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.day, day(11));
        assert_eq!(snapshot.today, 120);
        assert_eq!(snapshot.steps_on(day(10)), Some(4500));
    }

    #[tokio::test]
    async fn poll_error_leaves_ledger_untouched() {
        let (ledger, broker, clock) = setup([Some(800), None]);
        ledger.report_sensor_reading(300);
        poll_broker_once(&ledger, broker.as_ref(), clock.as_ref())
            .await
            .unwrap();
        let before = ledger.snapshot();

        let err = poll_broker_once(&ledger, broker.as_ref(), clock.as_ref())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Status { status: 503, .. }));
        assert_eq!(ledger.snapshot(), before);
    }

    /// Answers after the ledger has already rolled over to the next day.
    struct MidnightBroker {
        ledger: Arc<StepLedger>,
    }

    impl StepBroker for MidnightBroker {
        fn steps_between(
            &self,
            _range: TimeRange,
        ) -> impl Future<Output = Result<u32, BrokerError>> + Send {
            self.ledger.check_and_rollover_if_new_day(day(11));
            async { Ok(999) }
        }
    }

    #[tokio::test]
    async fn fetch_straddling_midnight_is_stale() {
        let (ledger, _, clock) = setup(Vec::<Option<u32>>::new());
        let broker = MidnightBroker {
            ledger: Arc::clone(&ledger),
        };

        let outcome = poll_broker_once(&ledger, &broker, clock.as_ref())
            .await
            .unwrap();

        assert_eq!(outcome, PollOutcome::Stale);
        assert_eq!(ledger.last_reset_date(), day(11));
        assert_eq!(ledger.today(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_poller_repeats_until_cancelled() {
        let (ledger, broker, clock) = setup([Some(10), Some(20), None, Some(40)]);
        let task = spawn_broker_poll(
            Arc::clone(&ledger),
            Arc::clone(&broker),
            clock,
            Duration::from_secs(3),
        );

        tokio::time::sleep(Duration::from_millis(9500)).await;
        assert_eq!(broker.calls(), 4);
        assert_eq!(ledger.today(), 40);

        task.cancel();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(broker.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn rollover_task_follows_the_clock() {
        let (ledger, _, clock) = setup(Vec::<Option<u32>>::new());
        ledger.report_sensor_reading(700);

        let task = spawn_rollover_check(
            Arc::clone(&ledger),
            Arc::clone(&clock) as Arc<dyn Clock>,
            Duration::from_secs(60),
        );
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ledger.last_reset_date(), day(10));

        clock.set(at(11, 0));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(ledger.last_reset_date(), day(11));
        assert_eq!(ledger.today(), 0);
        assert_eq!(ledger.snapshot().steps_on(day(10)), Some(700));

        drop(task);
    }
}
