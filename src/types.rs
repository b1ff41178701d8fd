use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Identity of the authenticated account that owns destinations.
///
/// Authentication happens upstream; the relay only compares these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        UserId(value.to_string())
    }
}

/// Unique identifier for a webhook destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationId(pub Uuid);

impl DestinationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DestinationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a delivery record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(pub Uuid);

impl DeliveryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeliveryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Domain occurrence a destination can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MessageReceived,
    MessageSent,
    Connected,
    Disconnected,
    /// Only produced by on-demand destination tests.
    Test,
}

impl EventType {
    /// Event types a destination may subscribe to, with a short description.
    pub const SUBSCRIBABLE: [(EventType, &'static str); 4] = [
        (EventType::MessageReceived, "Triggered when a new chat message is received"),
        (EventType::MessageSent, "Triggered when a message is sent"),
        (EventType::Connected, "Triggered when the chat client connects"),
        (EventType::Disconnected, "Triggered when the chat client disconnects"),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::MessageReceived => "message_received",
            EventType::MessageSent => "message_sent",
            EventType::Connected => "connected",
            EventType::Disconnected => "disconnected",
            EventType::Test => "test",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ValidationError;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "message_received" => Ok(EventType::MessageReceived),
            "message_sent" => Ok(EventType::MessageSent),
            "connected" => Ok(EventType::Connected),
            "disconnected" => Ok(EventType::Disconnected),
            "test" => Ok(EventType::Test),
            _ => Err(ValidationError::UnknownEventType(s.to_string())),
        }
    }
}

/// Which conversations a destination hears about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatTypeFilter {
    #[default]
    All,
    Individual,
    Group,
}

impl ChatTypeFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatTypeFilter::All => "all",
            ChatTypeFilter::Individual => "individual",
            ChatTypeFilter::Group => "group",
        }
    }
}

impl FromStr for ChatTypeFilter {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(ChatTypeFilter::All),
            "individual" => Ok(ChatTypeFilter::Individual),
            "group" => Ok(ChatTypeFilter::Group),
            other => Err(ValidationError::InvalidChatType(other.to_string())),
        }
    }
}

/// How the phone list is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhoneMatchType {
    #[default]
    Whitelist,
    Blacklist,
}

impl PhoneMatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhoneMatchType::Whitelist => "whitelist",
            PhoneMatchType::Blacklist => "blacklist",
        }
    }
}

impl FromStr for PhoneMatchType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "whitelist" => Ok(PhoneMatchType::Whitelist),
            "blacklist" => Ok(PhoneMatchType::Blacklist),
            other => Err(ValidationError::InvalidMatchType(other.to_string())),
        }
    }
}

/// Per-destination predicates over inbound message events.
///
/// Every list is a real sequence; nothing here is ever delimiter-joined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filters {
    pub chat_type: ChatTypeFilter,
    pub phone_numbers: Vec<String>,
    pub phone_match_type: PhoneMatchType,
    pub group_jids: Vec<String>,
    pub group_names: Vec<String>,
}

/// A user's registered webhook callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub id: DestinationId,
    pub user_id: UserId,
    pub url: String,
    /// Signing key. `None` means deliveries go out unsigned.
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    pub description: String,
    pub active: bool,
    pub event_types: Vec<EventType>,
    pub filters: Filters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Destination {
    pub fn subscribes_to(&self, event: EventType) -> bool {
        self.event_types.contains(&event)
    }

    /// Returns the secret only when it is usable for signing.
    pub fn signing_secret(&self) -> Option<&str> {
        self.secret.as_deref().filter(|s| !s.is_empty())
    }

    /// Secret-free projection handed to the API layer.
    pub fn view(&self) -> DestinationView {
        DestinationView {
            id: self.id,
            url: self.url.clone(),
            description: self.description.clone(),
            is_active: self.active,
            has_secret: self.signing_secret().is_some(),
            event_types: self.event_types.clone(),
            filter_chat_type: self.filters.chat_type,
            filter_phone_numbers: self.filters.phone_numbers.clone(),
            filter_phone_match_type: self.filters.phone_match_type,
            filter_group_jids: self.filters.group_jids.clone(),
            filter_group_names: self.filters.group_names.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationView {
    pub id: DestinationId,
    pub url: String,
    pub description: String,
    pub is_active: bool,
    pub has_secret: bool,
    pub event_types: Vec<EventType>,
    pub filter_chat_type: ChatTypeFilter,
    pub filter_phone_numbers: Vec<String>,
    pub filter_phone_match_type: PhoneMatchType,
    pub filter_group_jids: Vec<String>,
    pub filter_group_names: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where a delivery record sits in its retry lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryState {
    PendingRetry,
    Exhausted,
    Resolved,
}

/// Ledger entry for one delivery and its retry history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: DeliveryId,
    pub destination_id: DestinationId,
    pub event_type: EventType,
    /// Exact bytes sent on the first attempt. Retries resend these unchanged.
    pub payload: String,
    pub success: bool,
    /// HTTP status of the last attempt, 0 when no response was obtained.
    pub response_status: u16,
    pub response_body: String,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryRecord {
    pub fn state(&self) -> RetryState {
        if self.success {
            RetryState::Resolved
        } else if self.next_retry_at.is_some() {
            RetryState::PendingRetry
        } else {
            RetryState::Exhausted
        }
    }

    pub fn view(&self) -> DeliveryView {
        DeliveryView {
            id: self.id,
            event_type: self.event_type,
            success: self.success,
            response_status: self.response_status,
            error_message: self.error_message.clone(),
            retry_count: self.retry_count,
            next_retry_at: self.next_retry_at,
            created_at: self.created_at,
        }
    }
}

/// Delivery listing entry without payload or response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryView {
    pub id: DeliveryId,
    pub event_type: EventType,
    pub success: bool,
    pub response_status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Message event emitted by the chat client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageData {
    #[serde(rename = "from")]
    pub sender_id: String,
    #[serde(rename = "from_phone")]
    pub sender_phone: String,
    #[serde(rename = "from_name", default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub content: String,
    pub message_id: String,
    pub is_group: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(rename = "timestamp")]
    pub unix_timestamp: i64,
}

/// Wire envelope posted to destinations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub webhook_id: String,
    pub event: EventType,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}
