use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use tokio::sync::{Mutex, OwnedRwLockReadGuard, RwLock, Semaphore};
use tracing::warn;

use crate::config::RelayConfig;
use crate::signing::{sign, signature_header_value};
use crate::storage::Storage;

#[cfg(feature = "metrics")]
pub(crate) fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn metric_inc(_name: &'static str) {}

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptResult {
    /// True iff the endpoint answered with a 2xx status.
    pub success: bool,

    /// HTTP status, 0 when no response was obtained.
    pub status: u16,

    pub body: String,
    pub error: Option<String>,
}

impl AttemptResult {
    pub fn transport_error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            status: 0,
            body: String::new(),
            error: Some(message.into()),
        }
    }

    /// Build a result from a response status and body.
    pub fn from_response(status: u16, body: String) -> Self {
        let success = (200..300).contains(&status);
        Self {
            success,
            status,
            body,
            error: (!success).then(|| format!("endpoint returned HTTP {}", status)),
        }
    }
}

/// Performs one POST of a serialized payload.
///
/// Implementations never fail outright: every problem is reported through
/// the returned [`AttemptResult`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, url: &str, payload: &[u8], signature: Option<&str>) -> AttemptResult;
}

/// reqwest-backed transport used in production.
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
    signature_header: String,
    user_agent: String,
    max_response_body: usize,
}

impl HttpTransport {
    pub fn new(config: &RelayConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: &RelayConfig) -> Self {
        Self {
            client,
            timeout: config.request_timeout,
            signature_header: config.signature_header.clone(),
            user_agent: config.user_agent.clone(),
            max_response_body: config.max_response_body,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, url: &str, payload: &[u8], signature: Option<&str>) -> AttemptResult {
        let mut request = self
            .client
            .post(url)
            .timeout(self.timeout)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, self.user_agent.as_str())
            .body(payload.to_vec());

        if let Some(signature) = signature {
            request = request.header(self.signature_header.as_str(), signature_header_value(signature));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = read_capped(response, self.max_response_body, url).await;
                AttemptResult::from_response(status, body)
            }
            Err(err) if err.is_timeout() => {
                AttemptResult::transport_error(format!("request timed out: {}", err))
            }
            Err(err) => AttemptResult::transport_error(format!("failed to send webhook: {}", err)),
        }
    }
}

/// Read at most `max` bytes of the response body, stopping at the cap.
///
/// A read error keeps what arrived so far; the status alone decides the
/// outcome.
async fn read_capped(mut response: reqwest::Response, max: usize, url: &str) -> String {
    let mut buf: Vec<u8> = Vec::new();
    while buf.len() < max {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let room = max - buf.len();
                buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
            }
            Ok(None) => break,
            Err(err) => {
                warn!(url = %url, error = %err, "failed to read webhook response body");
                break;
            }
        }
    }
    truncate_body(String::from_utf8_lossy(&buf).into_owned(), max)
}

/// Cut `body` to at most `max` bytes without splitting a character.
pub fn truncate_body(mut body: String, max: usize) -> String {
    if body.len() > max {
        let mut end = max;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

/// Shared context for dispatch and retry tasks.
pub struct WorkerContext {
    pub storage: Arc<dyn Storage>,
    pub transport: Arc<dyn Transport>,
    pub config: RelayConfig,

    /// Bounds concurrent outbound attempts. Tasks wait for a permit.
    pub in_flight: Arc<Semaphore>,

    /// Held shared by every dispatch task until its record is saved.
    /// Taking it exclusively waits for all of them.
    pending: Arc<RwLock<()>>,

    /// Serializes retry passes so a due record is never picked up twice.
    pub(crate) retry_pass: Mutex<()>,
}

impl WorkerContext {
    pub fn new(storage: Arc<dyn Storage>, transport: Arc<dyn Transport>, config: RelayConfig) -> Self {
        let permits = config.max_in_flight.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            storage,
            transport,
            config,
            in_flight: Arc::new(Semaphore::new(permits)),
            pending: Arc::new(RwLock::new(())),
            retry_pass: Mutex::new(()),
        }
    }

    /// Register a dispatch task. Never waits; returns `None` while
    /// [`WorkerContext::drain`] is in progress.
    pub(crate) fn track(&self) -> Option<OwnedRwLockReadGuard<()>> {
        self.pending.clone().try_read_owned().ok()
    }

    /// Wait until every tracked dispatch task has saved its record.
    pub async fn drain(&self) {
        let _all = self.pending.write().await;
    }

    /// Sign `payload` with `secret` (if any) and make one delivery attempt.
    ///
    /// The attempt runs on its own task so that a panicking transport turns
    /// into a failed attempt instead of taking the caller down.
    pub async fn attempt(&self, url: &str, payload: &str, secret: Option<&str>) -> AttemptResult {
        let signature = secret.map(|s| sign(payload.as_bytes(), s));

        let Ok(_permit) = self.in_flight.clone().acquire_owned().await else {
            return AttemptResult::transport_error("delivery pool closed");
        };

        let transport = self.transport.clone();
        let url = url.to_string();
        let payload = payload.to_string();
        let task = tokio::spawn(async move {
            transport
                .send(&url, payload.as_bytes(), signature.as_deref())
                .await
        });

        match task.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => AttemptResult::transport_error("delivery task panicked"),
            Err(_) => AttemptResult::transport_error("delivery task cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_hundreds_are_success() {
        assert!(AttemptResult::from_response(200, String::new()).success);
        assert!(AttemptResult::from_response(204, String::new()).success);
        assert!(AttemptResult::from_response(299, String::new()).success);
        assert!(!AttemptResult::from_response(199, String::new()).success);
        assert!(!AttemptResult::from_response(300, String::new()).success);

        let failed = AttemptResult::from_response(503, "busy".into());
        assert_eq!(failed.status, 503);
        assert_eq!(failed.body, "busy");
        assert_eq!(failed.error.as_deref(), Some("endpoint returned HTTP 503"));
    }

    #[test]
    fn transport_errors_have_no_status() {
        let result = AttemptResult::transport_error("connection refused");
        assert!(!result.success);
        assert_eq!(result.status, 0);
        assert_eq!(result.error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_body("short".into(), 10), "short");
        assert_eq!(truncate_body("abcdef".into(), 3), "abc");
        // 'é' is two bytes; cutting at 2 would split it.
        assert_eq!(truncate_body("aé".into(), 2), "a");
    }
}
