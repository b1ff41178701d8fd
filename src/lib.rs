//! Outbound webhook delivery for a chat gateway.
//!
//! Users register HTTP destinations that subscribe to gateway events
//! (messages received or sent, connection changes). Each event is fanned
//! out to every matching destination, signed with HMAC-SHA256 when the
//! destination has a secret, and its outcome is recorded. Failed
//! deliveries are retried in the background on a fixed backoff schedule
//! until they succeed or reach the retry ceiling.
//!
//! ## Guarantees
//! - Dispatch never blocks or fails the caller
//! - Per-destination isolation: one slow or failing endpoint delays no other
//! - Bounded outbound concurrency
//! - Retries resend the exact bytes of the first attempt
//! - At most one attempt in flight per delivery record
//!
//! ## Non-Guarantees
//! - Exactly-once delivery
//! - Ordering between events
//! - Coordination between several processes sharing one database
//!
//! Storage is pluggable through [`Storage`]. [`InMemoryStorage`] ships by
//! default; enable the `postgres` feature for [`PostgresStorage`].

mod config;
mod dispatcher;
mod error;
mod filter;
mod history;
mod registry;
mod retry;
mod service;
mod signing;
mod storage;
mod types;
mod worker;

#[cfg(feature = "postgres")]
mod storage_postgres;

pub use config::RelayConfig;
pub use dispatcher::{build_payload, event_data, DispatchHandle, Dispatcher, TEST_MESSAGE};
pub use error::{RelayError, StorageError, ValidationError};
pub use filter::{normalize_phone, should_deliver};
pub use history::{DeliveryPage, DeliveryStats, History, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
pub use registry::{DestinationUpdate, NewDestination, Registry};
pub use retry::{backoff, next_retry_at, retry_due, RetryScheduler, TickSummary};
pub use service::{available_events, EventDescription, WebhookService};
pub use signing::{
    sign,
    signature_from_headers,
    signature_header_value,
    verify,
    verify_webhook_request,
    VerificationError,
    SIGNATURE_HEADER,
    SIGNATURE_PREFIX,
};
pub use storage::{InMemoryStorage, Storage};
pub use types::{
    ChatTypeFilter, DeliveryId, DeliveryRecord, DeliveryView, Destination, DestinationId,
    DestinationView, EventPayload, EventType, Filters, MessageData, PhoneMatchType, RetryState,
    UserId,
};
pub use worker::{AttemptResult, HttpTransport, Transport, WorkerContext};

#[cfg(feature = "postgres")]
pub use storage_postgres::PostgresStorage;
