//! Destination registration, partial update and ownership checks.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use tracing::{debug, info};

use crate::error::{RelayError, StorageError, ValidationError};
use crate::storage::Storage;
use crate::types::{
    ChatTypeFilter, Destination, DestinationId, EventType, Filters, PhoneMatchType, UserId,
};

/// Registration request for a new destination.
#[derive(Debug, Clone, Deserialize)]
pub struct NewDestination {
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub description: String,
    pub event_types: Vec<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub filter_phone_numbers: Vec<String>,
    #[serde(default)]
    pub filter_phone_match_type: Option<String>,
    #[serde(default)]
    pub filter_chat_type: Option<String>,
    #[serde(default)]
    pub filter_group_jids: Vec<String>,
    #[serde(default)]
    pub filter_group_names: Vec<String>,
}

fn default_active() -> bool {
    true
}

impl NewDestination {
    pub fn new(url: impl Into<String>, event_types: &[EventType]) -> Self {
        Self {
            url: url.into(),
            secret: None,
            description: String::new(),
            event_types: event_types.iter().map(|e| e.as_str().to_string()).collect(),
            is_active: true,
            filter_phone_numbers: Vec::new(),
            filter_phone_match_type: None,
            filter_chat_type: None,
            filter_group_jids: Vec::new(),
            filter_group_names: Vec::new(),
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// Partial update. `None` leaves a field untouched; `Some(vec![])` clears a
/// list filter. For the secret, `Some(None)` (JSON `null`) removes it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DestinationUpdate {
    pub url: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub secret: Option<Option<String>>,
    pub description: Option<String>,
    pub event_types: Option<Vec<String>>,
    pub is_active: Option<bool>,
    pub filter_phone_numbers: Option<Vec<String>>,
    pub filter_phone_match_type: Option<String>,
    pub filter_chat_type: Option<String>,
    pub filter_group_jids: Option<Vec<String>>,
    pub filter_group_names: Option<Vec<String>>,
}

/// Marks a field as supplied even when its value is `null`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl DestinationUpdate {
    pub fn is_empty(&self) -> bool {
        self.url.is_none()
            && self.secret.is_none()
            && self.description.is_none()
            && self.event_types.is_none()
            && self.is_active.is_none()
            && self.filter_phone_numbers.is_none()
            && self.filter_phone_match_type.is_none()
            && self.filter_chat_type.is_none()
            && self.filter_group_jids.is_none()
            && self.filter_group_names.is_none()
    }
}

fn validate_url(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyUrl);
    }

    let parsed = url::Url::parse(trimmed)
        .map_err(|_| ValidationError::InvalidUrl(trimmed.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ValidationError::InvalidUrl(trimmed.to_string()));
    }

    Ok(trimmed.to_string())
}

fn parse_event_types(raw: &[String]) -> Result<Vec<EventType>, ValidationError> {
    let mut parsed = Vec::with_capacity(raw.len());
    for value in raw {
        let event: EventType = value.parse()?;
        if event == EventType::Test {
            return Err(ValidationError::UnknownEventType(value.clone()));
        }
        if !parsed.contains(&event) {
            parsed.push(event);
        }
    }

    if parsed.is_empty() {
        return Err(ValidationError::NoEventTypes);
    }
    Ok(parsed)
}

fn parse_chat_type(raw: Option<&str>) -> Result<ChatTypeFilter, ValidationError> {
    match raw {
        None | Some("") => Ok(ChatTypeFilter::All),
        Some(value) => value.parse(),
    }
}

fn parse_match_type(raw: Option<&str>) -> Result<PhoneMatchType, ValidationError> {
    match raw {
        None | Some("") => Ok(PhoneMatchType::Whitelist),
        Some(value) => value.parse(),
    }
}

/// Trim entries and drop blanks. Commas inside an entry are kept as-is.
fn clean_list(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn clean_secret(raw: Option<&str>) -> Option<String> {
    raw.filter(|s| !s.is_empty()).map(str::to_string)
}

/// Validate a registration request and build the destination it describes.
pub fn build_destination(
    user_id: UserId,
    request: &NewDestination,
    now: DateTime<Utc>,
) -> Result<Destination, ValidationError> {
    let url = validate_url(&request.url)?;
    let event_types = parse_event_types(&request.event_types)?;
    let filters = Filters {
        chat_type: parse_chat_type(request.filter_chat_type.as_deref())?,
        phone_numbers: clean_list(&request.filter_phone_numbers),
        phone_match_type: parse_match_type(request.filter_phone_match_type.as_deref())?,
        group_jids: clean_list(&request.filter_group_jids),
        group_names: clean_list(&request.filter_group_names),
    };

    Ok(Destination {
        id: DestinationId::new(),
        user_id,
        url,
        secret: clean_secret(request.secret.as_deref()),
        description: request.description.clone(),
        active: request.is_active,
        event_types,
        filters,
        created_at: now,
        updated_at: now,
    })
}

/// Apply a partial update, touching only the supplied fields.
///
/// Everything is validated before anything is written, so a rejected
/// update leaves `destination` unchanged.
pub fn apply_update(
    destination: &mut Destination,
    update: &DestinationUpdate,
    now: DateTime<Utc>,
) -> Result<(), ValidationError> {
    if update.is_empty() {
        return Err(ValidationError::NoFieldsToUpdate);
    }

    let url = update.url.as_deref().map(validate_url).transpose()?;
    let event_types = update
        .event_types
        .as_deref()
        .map(parse_event_types)
        .transpose()?;
    let chat_type = update
        .filter_chat_type
        .as_deref()
        .map(|v| parse_chat_type(Some(v)))
        .transpose()?;
    let match_type = update
        .filter_phone_match_type
        .as_deref()
        .map(|v| parse_match_type(Some(v)))
        .transpose()?;

    if let Some(url) = url {
        destination.url = url;
    }
    if let Some(secret) = &update.secret {
        destination.secret = clean_secret(secret.as_deref());
    }
    if let Some(description) = &update.description {
        destination.description = description.clone();
    }
    if let Some(event_types) = event_types {
        destination.event_types = event_types;
    }
    if let Some(active) = update.is_active {
        destination.active = active;
    }
    if let Some(chat_type) = chat_type {
        destination.filters.chat_type = chat_type;
    }
    if let Some(match_type) = match_type {
        destination.filters.phone_match_type = match_type;
    }
    if let Some(phones) = &update.filter_phone_numbers {
        destination.filters.phone_numbers = clean_list(phones);
    }
    if let Some(jids) = &update.filter_group_jids {
        destination.filters.group_jids = clean_list(jids);
    }
    if let Some(names) = &update.filter_group_names {
        destination.filters.group_names = clean_list(names);
    }

    destination.updated_at = now;
    Ok(())
}

/// Owner-scoped access to stored destinations.
#[derive(Clone)]
pub struct Registry {
    storage: Arc<dyn Storage>,
}

impl Registry {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn register(
        &self,
        user_id: &UserId,
        request: &NewDestination,
    ) -> Result<Destination, RelayError> {
        let destination = build_destination(user_id.clone(), request, Utc::now())?;
        self.storage.insert_destination(&destination).await?;
        info!(destination_id = %destination.id, user_id = %user_id, url = %destination.url, "registered webhook");
        Ok(destination)
    }

    /// Fetch a destination only if `user_id` owns it.
    ///
    /// Absent and foreign destinations both come back as `NotFound`.
    pub async fn owned(
        &self,
        user_id: &UserId,
        id: DestinationId,
    ) -> Result<Destination, RelayError> {
        match self.storage.get_destination(id).await? {
            Some(destination) if &destination.user_id == user_id => Ok(destination),
            _ => Err(RelayError::NotFound),
        }
    }

    pub async fn update(
        &self,
        user_id: &UserId,
        id: DestinationId,
        update: &DestinationUpdate,
    ) -> Result<Destination, RelayError> {
        let mut destination = self.owned(user_id, id).await?;
        apply_update(&mut destination, update, Utc::now())?;
        self.storage.update_destination(&destination).await?;
        info!(destination_id = %id, "updated webhook");
        Ok(destination)
    }

    pub async fn delete(&self, user_id: &UserId, id: DestinationId) -> Result<(), RelayError> {
        self.owned(user_id, id).await?;
        if !self.storage.delete_destination(id).await? {
            return Err(RelayError::NotFound);
        }
        info!(destination_id = %id, "deleted webhook and its delivery history");
        Ok(())
    }

    pub async fn list(&self, user_id: &UserId) -> Result<Vec<Destination>, RelayError> {
        Ok(self.storage.destinations_for_user(user_id).await?)
    }

    /// Active destinations of `user_id` subscribed to `event`.
    pub async fn find_active_subscribers(
        &self,
        user_id: &UserId,
        event: EventType,
    ) -> Result<Vec<Destination>, StorageError> {
        let all = self.storage.destinations_for_user(user_id).await?;
        let matching: Vec<Destination> = all
            .into_iter()
            .filter(|d| d.active && d.subscribes_to(event))
            .collect();
        debug!(user_id = %user_id, event = %event, count = matching.len(), "matched subscribers");
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserId {
        UserId::from("user-1")
    }

    fn request() -> NewDestination {
        NewDestination::new("https://example.com/hook", &[EventType::MessageReceived])
    }

    #[test]
    fn builds_with_defaults() {
        let destination = build_destination(user(), &request(), Utc::now()).unwrap();
        assert!(destination.active);
        assert_eq!(destination.secret, None);
        assert_eq!(destination.event_types, vec![EventType::MessageReceived]);
        assert_eq!(destination.filters, Filters::default());
    }

    #[test]
    fn rejects_bad_urls() {
        for url in ["", "   ", "not a url", "example.com/hook", "ftp://example.com/x", "mailto:a@b.c"] {
            let mut req = request();
            req.url = url.to_string();
            assert!(build_destination(user(), &req, Utc::now()).is_err(), "accepted {url:?}");
        }

        let mut req = request();
        req.url = String::new();
        assert_eq!(
            build_destination(user(), &req, Utc::now()).unwrap_err(),
            ValidationError::EmptyUrl
        );
    }

    #[test]
    fn event_types_are_required_and_parsed_case_insensitively() {
        let mut req = request();
        req.event_types = vec![];
        assert_eq!(
            build_destination(user(), &req, Utc::now()).unwrap_err(),
            ValidationError::NoEventTypes
        );

        req.event_types = vec!["Message_Received".into(), "CONNECTED".into(), "connected".into()];
        let destination = build_destination(user(), &req, Utc::now()).unwrap();
        assert_eq!(
            destination.event_types,
            vec![EventType::MessageReceived, EventType::Connected]
        );

        req.event_types = vec!["test".into()];
        assert!(matches!(
            build_destination(user(), &req, Utc::now()),
            Err(ValidationError::UnknownEventType(_))
        ));
    }

    #[test]
    fn rejects_invalid_enum_values() {
        let mut req = request();
        req.filter_chat_type = Some("channels".into());
        assert_eq!(
            build_destination(user(), &req, Utc::now()).unwrap_err(),
            ValidationError::InvalidChatType("channels".into())
        );

        let mut req = request();
        req.filter_phone_match_type = Some("greylist".into());
        assert_eq!(
            build_destination(user(), &req, Utc::now()).unwrap_err(),
            ValidationError::InvalidMatchType("greylist".into())
        );
    }

    #[test]
    fn empty_secret_means_unsigned() {
        let req = request().with_secret("");
        let destination = build_destination(user(), &req, Utc::now()).unwrap();
        assert_eq!(destination.secret, None);
    }

    #[test]
    fn update_json_distinguishes_absent_from_empty() {
        let absent: DestinationUpdate = serde_json::from_str(r#"{"is_active": false}"#).unwrap();
        assert_eq!(absent.filter_group_names, None);
        assert_eq!(absent.secret, None);

        let cleared: DestinationUpdate =
            serde_json::from_str(r#"{"filter_group_names": [], "secret": null}"#).unwrap();
        assert_eq!(cleared.filter_group_names, Some(vec![]));
        assert_eq!(cleared.secret, Some(None));
    }

    #[test]
    fn empty_list_clears_and_absent_list_keeps() {
        let mut req = request();
        req.filter_group_names = vec!["Ops".into()];
        req.filter_phone_numbers = vec!["123".into()];
        let mut destination = build_destination(user(), &req, Utc::now()).unwrap();

        let update = DestinationUpdate {
            filter_group_names: Some(vec![]),
            ..Default::default()
        };
        apply_update(&mut destination, &update, Utc::now()).unwrap();

        assert!(destination.filters.group_names.is_empty());
        assert_eq!(destination.filters.phone_numbers, vec!["123".to_string()]);
    }

    #[test]
    fn rejected_update_changes_nothing() {
        let mut destination = build_destination(user(), &request(), Utc::now()).unwrap();
        let before = destination.clone();

        let update = DestinationUpdate {
            url: Some("https://example.org/new".into()),
            filter_chat_type: Some("bogus".into()),
            ..Default::default()
        };
        assert!(apply_update(&mut destination, &update, Utc::now()).is_err());
        assert_eq!(destination, before);

        assert_eq!(
            apply_update(&mut destination, &DestinationUpdate::default(), Utc::now()),
            Err(ValidationError::NoFieldsToUpdate)
        );
    }

    #[test]
    fn secret_can_be_rotated_and_cleared() {
        let mut destination =
            build_destination(user(), &request().with_secret("old"), Utc::now()).unwrap();

        let rotate = DestinationUpdate {
            secret: Some(Some("new".into())),
            ..Default::default()
        };
        apply_update(&mut destination, &rotate, Utc::now()).unwrap();
        assert_eq!(destination.secret.as_deref(), Some("new"));

        let clear = DestinationUpdate {
            secret: Some(None),
            ..Default::default()
        };
        apply_update(&mut destination, &clear, Utc::now()).unwrap();
        assert_eq!(destination.secret, None);
    }
}
