//! Configuration for Stride.
//!
//! Loaded from `~/.stride/config.toml`, or from the file named by
//! `STRIDE_CONFIG`. Every section is optional; a missing file yields the
//! defaults.
//!
//! ```toml
//! [ledger]
//! goal = 6000
//!
//! [storage]
//! path = "~/.stride/steps.db"
//! write_behind = true
//!
//! [broker]
//! url = "https://health.example.com"
//! token = "${STRIDE_BROKER_TOKEN}"
//! poll_interval_secs = 3
//! timeout_secs = 10
//!
//! [service]
//! rollover_check_secs = 60
//! ```
//!
//! String values support `${ENV_VAR}` expansion. Unset variables expand to
//! the empty string.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs, io};

use serde::Deserialize;
use stride_types::Goal;
use stride_utils::{
    AtomicWriteOptions, FileSyncPolicy, atomic_write_with_options, ensure_secure_dir,
};
use thiserror::Error;

pub const CONFIG_ENV: &str = "STRIDE_CONFIG";
pub const DATA_DIR_NAME: &str = ".stride";
pub const DATABASE_FILE: &str = "steps.db";

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 3;
pub const DEFAULT_ROLLOVER_CHECK_SECS: u64 = 60;
pub const DEFAULT_BROKER_TIMEOUT_SECS: u64 = 10;

const fn default_true() -> bool {
    true
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config at {}: {detail}", path.display())]
    Invalid { path: PathBuf, detail: String },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. }
            | ConfigError::Parse { path, .. }
            | ConfigError::Invalid { path, .. } => path,
        }
    }
}

/// The file as written, before defaults and validation.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    ledger: Option<RawLedger>,
    storage: Option<RawStorage>,
    broker: Option<RawBroker>,
    service: Option<RawService>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLedger {
    goal: Option<Goal>,
}

#[derive(Debug, Deserialize)]
struct RawStorage {
    path: Option<String>,
    #[serde(default = "default_true")]
    write_behind: bool,
}

#[derive(Deserialize)]
struct RawBroker {
    url: Option<String>,
    token: Option<String>,
    poll_interval_secs: Option<u64>,
    timeout_secs: Option<u64>,
}

// Manual Debug impl to keep the token out of logs.
impl std::fmt::Debug for RawBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawBroker")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "<set>"))
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawService {
    rollover_check_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub path: PathBuf,
    pub write_behind: bool,
}

#[derive(Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub url: String,
    pub token: Option<String>,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "<set>"))
            .field("poll_interval", &self.poll_interval)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Validated configuration with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrideConfig {
    pub goal: Goal,
    pub storage: StorageConfig,
    /// `None` when no broker URL is configured.
    pub broker: Option<BrokerConfig>,
    pub rollover_check: Duration,
}

impl Default for StrideConfig {
    fn default() -> Self {
        Self {
            goal: Goal::default(),
            storage: StorageConfig {
                path: data_dir().join(DATABASE_FILE),
                write_behind: true,
            },
            broker: None,
            rollover_check: Duration::from_secs(DEFAULT_ROLLOVER_CHECK_SECS),
        }
    }
}

impl StrideConfig {
    /// Load the file at `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {}: {source}", path.display());
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::parse(&content, path)
    }

    /// Parse and validate `content`. `path` is only used in errors.
    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content).map_err(|source| {
            tracing::warn!("Failed to parse config at {}: {source}", path.display());
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::resolve(raw, path)
    }

    fn resolve(raw: RawConfig, path: &Path) -> Result<Self, ConfigError> {
        let invalid = |detail: String| ConfigError::Invalid {
            path: path.to_path_buf(),
            detail,
        };
        let defaults = Self::default();

        let goal = raw
            .ledger
            .and_then(|ledger| ledger.goal)
            .unwrap_or(defaults.goal);

        let storage = match raw.storage {
            Some(storage) => StorageConfig {
                path: storage
                    .path
                    .map(|p| expand_home(&expand_env_vars(&p)))
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or(defaults.storage.path),
                write_behind: storage.write_behind,
            },
            None => defaults.storage,
        };

        let broker = match raw.broker {
            Some(broker) => {
                let url = broker
                    .url
                    .map(|u| expand_env_vars(&u).trim().to_string())
                    .unwrap_or_default();
                if url.is_empty() {
                    tracing::warn!(
                        path = %path.display(),
                        "[broker] section without url; broker polling disabled"
                    );
                    None
                } else {
                    let poll_interval = positive_secs(
                        broker.poll_interval_secs,
                        DEFAULT_POLL_INTERVAL_SECS,
                        "broker.poll_interval_secs",
                    )
                    .map_err(invalid)?;
                    let timeout = positive_secs(
                        broker.timeout_secs,
                        DEFAULT_BROKER_TIMEOUT_SECS,
                        "broker.timeout_secs",
                    )
                    .map_err(invalid)?;
                    let token = broker
                        .token
                        .map(|t| expand_env_vars(&t))
                        .filter(|t| !t.trim().is_empty());
                    Some(BrokerConfig {
                        url,
                        token,
                        poll_interval,
                        timeout,
                    })
                }
            }
            None => None,
        };

        let rollover_check = positive_secs(
            raw.service.and_then(|s| s.rollover_check_secs),
            DEFAULT_ROLLOVER_CHECK_SECS,
            "service.rollover_check_secs",
        )
        .map_err(invalid)?;

        Ok(Self {
            goal,
            storage,
            broker,
            rollover_check,
        })
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }
}

fn positive_secs(value: Option<u64>, default: u64, key: &str) -> Result<Duration, String> {
    match value {
        Some(0) => Err(format!("{key} must be greater than zero")),
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => Ok(Duration::from_secs(default)),
    }
}

pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let var = &rest[start + 2..start + 2 + len];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &rest[start + 2 + len + 1..];
    }

    out.push_str(rest);
    out
}

/// Expand a leading `~/` to the home directory.
fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// `~/.stride`, or `./.stride` when the home directory is unknown.
#[must_use]
pub fn data_dir() -> PathBuf {
    dirs::home_dir().map_or_else(|| PathBuf::from(DATA_DIR_NAME), |home| home.join(DATA_DIR_NAME))
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    resolve_config_path(env::var_os(CONFIG_ENV), dirs::home_dir())
}

fn resolve_config_path(override_path: Option<OsString>, home: Option<PathBuf>) -> Option<PathBuf> {
    match override_path.filter(|p| !p.is_empty()) {
        Some(path) => Some(PathBuf::from(path)),
        None => home.map(|home| home.join(DATA_DIR_NAME).join("config.toml")),
    }
}

/// Set `[ledger] goal` in the file at `path`.
///
/// Uses `toml_edit` so comments and other settings survive. Creates the file
/// and its parent directory when missing.
pub fn persist_goal(path: &Path, goal: Goal) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_secure_dir(parent)?;
    }

    let content = if path.exists() {
        fs::read_to_string(path)?
    } else {
        String::new()
    };

    let mut doc = content
        .parse::<toml_edit::DocumentMut>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let ledger = doc
        .entry("ledger")
        .or_insert(toml_edit::Item::Table(toml_edit::Table::new()))
        .as_table_like_mut()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("`ledger` in {} is not a table", path.display()),
            )
        })?;
    ledger.insert("goal", toml_edit::value(i64::from(goal.steps())));

    atomic_write_with_options(
        path,
        doc.to_string().as_bytes(),
        AtomicWriteOptions {
            file_sync: FileSyncPolicy::SyncAll,
            unix_mode: Some(0o600),
        },
    )?;
    tracing::info!(path = %path.display(), goal = goal.steps(), "Goal saved to config");
    Ok(())
}
