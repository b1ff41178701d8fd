use std::fmt;

/// Errors returned by the destination and history operations.
///
/// Delivery itself never fails from the caller's point of view; transport
/// problems end up in the delivery record instead.
#[derive(Debug)]
pub enum RelayError {
    /// Request rejected before anything was persisted.
    Validation(ValidationError),

    /// Destination is absent or owned by another user.
    NotFound,

    /// Backing store failed.
    Storage(StorageError),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Validation(err) =>
                write!(f, "invalid request: {}", err),
            RelayError::NotFound =>
                write!(f, "webhook not found"),
            RelayError::Storage(err) =>
                write!(f, "storage error: {}", err),
        }
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RelayError::Validation(err) => Some(err),
            RelayError::NotFound => None,
            RelayError::Storage(err) => Some(err),
        }
    }
}

impl From<ValidationError> for RelayError {
    fn from(err: ValidationError) -> Self {
        RelayError::Validation(err)
    }
}

impl From<StorageError> for RelayError {
    fn from(err: StorageError) -> Self {
        RelayError::Storage(err)
    }
}

/// Reasons a registration or update request is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyUrl,
    InvalidUrl(String),
    NoEventTypes,
    UnknownEventType(String),
    InvalidChatType(String),
    InvalidMatchType(String),
    NoFieldsToUpdate,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyUrl =>
                write!(f, "url is required"),
            ValidationError::InvalidUrl(url) =>
                write!(f, "url is not a valid absolute http(s) url: {}", url),
            ValidationError::NoEventTypes =>
                write!(f, "at least one event type is required"),
            ValidationError::UnknownEventType(value) =>
                write!(f, "unknown event type: {}", value),
            ValidationError::InvalidChatType(value) =>
                write!(f, "filter_chat_type must be 'all', 'individual', or 'group', got '{}'", value),
            ValidationError::InvalidMatchType(value) =>
                write!(f, "filter_phone_match_type must be 'whitelist' or 'blacklist', got '{}'", value),
            ValidationError::NoFieldsToUpdate =>
                write!(f, "no fields to update"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Failure reported by a [`Storage`](crate::Storage) backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backend could not complete the query.
    Backend(String),

    /// A stored row could not be mapped back into a domain value.
    Corrupt(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Backend(msg) =>
                write!(f, "backend failure: {}", msg),
            StorageError::Corrupt(msg) =>
                write!(f, "corrupt row: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for StorageError {
    fn from(err: tokio_postgres::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}
