//! Stride CLI - binary entry point.
//!
//! One-shot commands open the ledger, apply a single operation, flush the
//! store, and print the result. `run` hosts the background tasks until
//! Ctrl-C:
//!
//! ```text
//! main() -> load config -> open store -> StepLedger
//!                                          |
//!               +--------------------------+--------------------------+
//!               v                          v                          v
//!        rollover check            broker poll (optional)     pedometer feed (stdin)
//! ```
//!
//! Every command checks for a day rollover before it touches the ledger.

mod render;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use stride_broker::HttpBroker;
use stride_config::{StrideConfig, persist_goal};
use stride_core::{Clock, StepLedger, SystemClock};
use stride_engine::{PollTask, feed_pedometer, spawn_broker_poll, spawn_rollover_check};
use stride_store::{SqliteStore, StepStore, WriteBehind};
use stride_types::Goal;

#[derive(Parser)]
#[command(name = "stride")]
#[command(about = "Track daily steps from a pedometer and a health-data broker")]
struct Cli {
    /// Config file (defaults to $STRIDE_CONFIG or ~/.stride/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show today's steps, calories, and progress
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Show the last seven days, most recent first
    History {
        #[arg(long)]
        json: bool,
    },
    /// Report a reading from one feed
    Report {
        #[command(subcommand)]
        source: ReportSource,
    },
    /// Zero today's count
    Reset,
    /// Set the daily step goal
    Goal {
        steps: u32,
    },
    /// Run the rollover check and broker poll until interrupted
    Run {
        /// Read raw pedometer counter values from stdin, one per line
        #[arg(long)]
        pedometer_stdin: bool,
    },
}

#[derive(Subcommand)]
enum ReportSource {
    /// Steps since the pedometer baseline
    Sensor {
        #[arg(allow_negative_numbers = true)]
        steps: i64,
    },
    /// Cumulative steps reported by the broker for today
    Broker {
        #[arg(allow_negative_numbers = true)]
        steps: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config_path = cli.config.clone().or_else(StrideConfig::path);
    let config = match &config_path {
        Some(path) => StrideConfig::load_from(path)?,
        None => StrideConfig::default(),
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ledger = Arc::new(open_ledger(&config, clock.as_ref())?);

    match cli.command {
        Commands::Status { json } => {
            let snapshot = ledger.snapshot();
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print!("{}", render::status(&snapshot));
            }
        }
        Commands::History { json } => {
            let summary = ledger.weekly_summary();
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", render::history(&summary, ledger.goal()));
            }
        }
        Commands::Report { source } => {
            let snapshot = match source {
                ReportSource::Sensor { steps } => ledger.report_sensor_reading(steps),
                ReportSource::Broker { steps } => ledger.report_broker_reading(steps),
            };
            println!("{}", render::status_line(&snapshot));
        }
        Commands::Reset => {
            let snapshot = ledger.reset_today();
            println!("{}", render::status_line(&snapshot));
        }
        Commands::Goal { steps } => {
            let goal = Goal::new(steps).context("invalid goal")?;
            let Some(path) = &config_path else {
                bail!("could not determine config path; pass --config");
            };
            persist_goal(path, goal)
                .with_context(|| format!("failed to save goal to {}", path.display()))?;
            let snapshot = ledger.set_goal(goal);
            println!("Goal set to {} steps", goal.steps());
            println!("{}", render::status_line(&snapshot));
        }
        Commands::Run { pedometer_stdin } => {
            run_service(Arc::clone(&ledger), clock, &config, pedometer_stdin).await?;
        }
    }

    ledger.flush().context("failed to flush step store")?;
    Ok(())
}

fn open_store(config: &StrideConfig) -> Result<Box<dyn StepStore>> {
    let path = &config.storage.path;
    let store = SqliteStore::open(path)
        .with_context(|| format!("failed to open step store at {}", path.display()))?;
    if config.storage.write_behind {
        Ok(Box::new(WriteBehind::spawn(store)?))
    } else {
        Ok(Box::new(store))
    }
}

fn open_ledger(config: &StrideConfig, clock: &dyn Clock) -> Result<StepLedger> {
    let store = open_store(config)?;
    let today = clock.today();
    let ledger = StepLedger::open(store, config.goal, today);
    ledger.check_and_rollover_if_new_day(today);
    Ok(ledger)
}

async fn run_service(
    ledger: Arc<StepLedger>,
    clock: Arc<dyn Clock>,
    config: &StrideConfig,
    pedometer_stdin: bool,
) -> Result<()> {
    let mut tasks: Vec<PollTask> = Vec::new();

    tasks.push(spawn_rollover_check(
        Arc::clone(&ledger),
        Arc::clone(&clock),
        config.rollover_check,
    ));

    match &config.broker {
        Some(broker_config) => {
            let broker = HttpBroker::new(
                &broker_config.url,
                broker_config.token.clone(),
                broker_config.timeout,
            )
            .context("failed to configure broker client")?;
            tracing::info!(endpoint = %broker.endpoint(), "Broker polling enabled");
            tasks.push(spawn_broker_poll(
                Arc::clone(&ledger),
                Arc::new(broker),
                Arc::clone(&clock),
                broker_config.poll_interval,
            ));
        }
        None => tracing::info!("No broker configured; polling disabled"),
    }

    if pedometer_stdin {
        let feed_ledger = Arc::clone(&ledger);
        tasks.push(PollTask::spawn("pedometer-feed", async move {
            let stdin = BufReader::new(tokio::io::stdin());
            match feed_pedometer(&feed_ledger, stdin).await {
                Ok(count) => tracing::info!(readings = count, "Pedometer feed ended"),
                Err(e) => tracing::warn!("Pedometer feed failed: {e}"),
            }
        }));
    }

    println!("{}", render::status_line(&ledger.snapshot()));

    let mut updates = ledger.subscribe();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    tracing::warn!("Failed to listen for Ctrl-C: {e}");
                }
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                tracing::info!(
                    day = %snapshot.day,
                    today = snapshot.today,
                    sensor = snapshot.sensor_steps,
                    broker = snapshot.broker_steps,
                    "Steps committed"
                );
                println!("{}", render::status_line(&snapshot));
            }
        }
    }

    tracing::info!("Shutting down");
    for task in tasks {
        task.shutdown().await;
    }
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_stride_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Without a log file, keep stdout clean for command output.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::new("warn"))
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_stride_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in stride_log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn stride_log_file_candidates() -> Vec<PathBuf> {
    let fallback = Path::new(".stride").join("logs").join("stride.log");
    let primary = stride_config::data_dir().join("logs").join("stride.log");
    if primary == fallback {
        vec![primary]
    } else {
        vec![primary, fallback]
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Local, TimeZone};
    use clap::CommandFactory;
    use stride_core::FixedClock;
    use stride_types::StepDate;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_negative_report() {
        let cli = Cli::try_parse_from(["stride", "report", "sensor", "-12"]).unwrap();
        match cli.command {
            Commands::Report {
                source: ReportSource::Sensor { steps },
            } => assert_eq!(steps, -12),
            _ => panic!("expected report sensor"),
        }
    }

    #[test]
    fn parses_global_config_after_subcommand() {
        let cli = Cli::try_parse_from(["stride", "status", "--json", "--config", "/tmp/c.toml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        assert!(matches!(cli.command, Commands::Status { json: true }));
    }

    #[test]
    fn open_ledger_persists_across_invocations() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = StrideConfig::default();
        config.storage.path = tmp.path().join("steps.db");
        let clock = FixedClock::new(Local.with_ymd_and_hms(2024, 9, 10, 12, 0, 0).single().unwrap());

        {
            let ledger = open_ledger(&config, &clock).unwrap();
            ledger.report_broker_reading(3200);
            ledger.flush().unwrap();
        }

        let ledger = open_ledger(&config, &clock).unwrap();
        assert_eq!(ledger.today(), 3200);

        clock.set(Local.with_ymd_and_hms(2024, 9, 11, 8, 0, 0).single().unwrap());
        let ledger = {
            drop(ledger);
            open_ledger(&config, &clock).unwrap()
        };
        assert_eq!(ledger.today(), 0);
        assert_eq!(
            ledger.history_by_date().get(&StepDate::from_ymd(2024, 9, 10).unwrap()),
            Some(&3200)
        );
    }
}
