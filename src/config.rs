use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::signing::SIGNATURE_HEADER;

/// Tunables for delivery, retry and the scheduler loop.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Upper bound on a single HTTP delivery attempt.
    pub request_timeout: Duration,

    /// Retry ceiling. A record with this many retries is exhausted.
    pub max_retries: u32,

    /// How often the retry scheduler scans for due records.
    pub retry_interval: Duration,

    /// Outbound attempts allowed at once across dispatch and retry.
    pub max_in_flight: usize,

    pub signature_header: String,
    pub user_agent: String,

    /// Response bodies longer than this are cut before being stored.
    pub max_response_body: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_retries: 5,
            retry_interval: Duration::from_secs(60),
            max_in_flight: 64,
            signature_header: SIGNATURE_HEADER.to_string(),
            user_agent: concat!("webhook-relay/", env!("CARGO_PKG_VERSION")).to_string(),
            max_response_body: 4096,
        }
    }
}

impl RelayConfig {
    /// Load overrides from the environment (and `.env`, if present).
    ///
    /// Unset or unparsable variables keep their default.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Self {
            request_timeout: env_parse("WEBHOOK_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            max_retries: env_parse("WEBHOOK_MAX_RETRIES").unwrap_or(defaults.max_retries),
            retry_interval: env_parse("WEBHOOK_RETRY_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_interval),
            max_in_flight: env_parse::<usize>("WEBHOOK_MAX_IN_FLIGHT")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_in_flight),
            signature_header: env::var("WEBHOOK_SIGNATURE_HEADER")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.signature_header),
            user_agent: env::var("WEBHOOK_USER_AGENT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.user_agent),
            max_response_body: env_parse("WEBHOOK_MAX_RESPONSE_BODY")
                .unwrap_or(defaults.max_response_body),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
