//! Health-data broker client.
//!
//! The broker aggregates step records from other apps and devices. Stride only
//! needs one number from it: the cumulative step count for a time range,
//! normally local midnight up to now ([`TimeRange::today_until`]).
//!
//! [`StepBroker`] is the seam the poller in `stride-engine` is generic over;
//! [`HttpBroker`] is the production implementation.
//!
//! # Wire format
//!
//! ```text
//! GET {base_url}/v1/steps?start=2024-09-10T00:00:00Z&end=2024-09-10T14:03:11Z
//! Authorization: Bearer <token>      (optional)
//!
//! 200 OK
//! {"records": [{"count": 1200}, {"count": 340, "source": "watch"}]}
//! ```
//!
//! Record counts are summed with saturation. Unknown fields are ignored.
//! Requests are not retried; the poll cadence decides when to ask again.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Local, SecondsFormat, Utc};
use reqwest::Url;
use serde::Deserialize;
use stride_types::TimeRange;
use thiserror::Error;

pub use stride_types;

pub const STEPS_PATH: &str = "/v1/steps";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
const CONNECT_TIMEOUT_SECS: u64 = 5;
const MAX_ERROR_BODY_BYTES: usize = 4 * 1024;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid broker url `{url}`: {detail}")]
    InvalidUrl { url: String, detail: String },
    #[error("broker request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("broker returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed broker response: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Source of cumulative step totals.
pub trait StepBroker: Send + Sync {
    /// Total steps recorded in `range`.
    fn steps_between(
        &self,
        range: TimeRange,
    ) -> impl Future<Output = Result<u32, BrokerError>> + Send;
}

#[derive(Debug, Deserialize)]
struct StepsResponse {
    #[serde(default)]
    records: Vec<StepRecord>,
}

#[derive(Debug, Deserialize)]
struct StepRecord {
    count: u64,
}

impl StepsResponse {
    fn total(&self) -> u32 {
        let total = self
            .records
            .iter()
            .fold(0u64, |acc, record| acc.saturating_add(record.count));
        u32::try_from(total).unwrap_or(u32::MAX)
    }
}

#[derive(Debug, Clone)]
pub struct HttpBroker {
    client: reqwest::Client,
    endpoint: Url,
    token: Option<String>,
}

impl HttpBroker {
    /// Build a client for `base_url`. An empty token is treated as none.
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BrokerError> {
        let invalid = |detail: String| BrokerError::InvalidUrl {
            url: base_url.to_string(),
            detail,
        };
        let endpoint = Url::parse(&format!("{}{STEPS_PATH}", base_url.trim_end_matches('/')))
            .map_err(|e| invalid(e.to_string()))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme `{}`", endpoint.scheme())));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            endpoint,
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn request_url(&self, range: TimeRange) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("start", &wire_instant(range.start()))
            .append_pair("end", &wire_instant(range.end()));
        url
    }

    async fn fetch(&self, range: TimeRange) -> Result<u32, BrokerError> {
        let mut request = self.client.get(self.request_url(range));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::Status {
                status: status.as_u16(),
                body: truncate_body(body),
            });
        }

        let bytes = response.bytes().await?;
        let parsed: StepsResponse = serde_json::from_slice(&bytes)?;
        let total = parsed.total();
        tracing::debug!(
            records = parsed.records.len(),
            total,
            day = %range.day(),
            "Broker steps fetched"
        );
        Ok(total)
    }
}

impl StepBroker for HttpBroker {
    fn steps_between(
        &self,
        range: TimeRange,
    ) -> impl Future<Output = Result<u32, BrokerError>> + Send {
        self.fetch(range)
    }
}

fn wire_instant(at: DateTime<Local>) -> String {
    at.with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY_BYTES {
        let mut cut = MAX_ERROR_BODY_BYTES;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...");
    }
    body
}
