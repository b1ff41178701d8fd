//! Composition root tying registry, dispatcher, history and retry together.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::config::RelayConfig;
use crate::dispatcher::{DispatchHandle, Dispatcher};
use crate::error::RelayError;
use crate::history::{DeliveryPage, DeliveryStats, History};
use crate::registry::{DestinationUpdate, NewDestination, Registry};
use crate::retry::{retry_due, RetryScheduler, TickSummary};
use crate::storage::Storage;
use crate::types::{DeliveryRecord, DestinationId, DestinationView, EventType, MessageData, UserId};
use crate::worker::{HttpTransport, Transport, WorkerContext};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventDescription {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub description: &'static str,
}

/// Event types a destination may subscribe to.
pub fn available_events() -> Vec<EventDescription> {
    EventType::SUBSCRIBABLE
        .iter()
        .map(|&(event_type, description)| EventDescription {
            event_type,
            description,
        })
        .collect()
}

/// Owns the webhook subsystem for the life of the process.
///
/// Every destination-scoped operation checks ownership first and reports a
/// foreign destination exactly like a missing one.
pub struct WebhookService {
    ctx: Arc<WorkerContext>,
    registry: Registry,
    dispatcher: Dispatcher,
    history: History,
    scheduler: RetryScheduler,
}

impl WebhookService {
    pub fn new(storage: Arc<dyn Storage>, config: RelayConfig) -> Self {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config));
        Self::with_transport(storage, transport, config)
    }

    pub fn with_transport(
        storage: Arc<dyn Storage>,
        transport: Arc<dyn Transport>,
        config: RelayConfig,
    ) -> Self {
        let ctx = Arc::new(WorkerContext::new(storage.clone(), transport, config));
        let registry = Registry::new(storage.clone());

        Self {
            dispatcher: Dispatcher::new(ctx.clone(), registry.clone()),
            history: History::new(storage),
            scheduler: RetryScheduler::new(ctx.clone()),
            registry,
            ctx,
        }
    }

    /// Start the background retry loop.
    pub fn start(&mut self) {
        self.scheduler.start();
    }

    /// Stop the retry loop and wait until every started dispatch has
    /// saved its delivery record.
    pub async fn stop(&mut self) {
        self.scheduler.stop().await;
        self.ctx.drain().await;
        info!("webhook service stopped");
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn config(&self) -> &RelayConfig {
        &self.ctx.config
    }

    /// Deliver an event to every matching destination of `user_id`.
    pub async fn trigger(
        &self,
        user_id: &UserId,
        event: EventType,
        message: Option<MessageData>,
    ) -> DispatchHandle {
        self.dispatcher.trigger(user_id, event, message).await
    }

    pub async fn trigger_message_received(&self, user_id: &UserId, message: MessageData) -> DispatchHandle {
        self.trigger(user_id, EventType::MessageReceived, Some(message)).await
    }

    /// Run one retry pass as if the clock read `now`.
    pub async fn run_retries_at(&self, now: DateTime<Utc>) -> TickSummary {
        retry_due(&self.ctx, now).await
    }

    pub async fn register_destination(
        &self,
        user_id: &UserId,
        request: &NewDestination,
    ) -> Result<DestinationView, RelayError> {
        Ok(self.registry.register(user_id, request).await?.view())
    }

    pub async fn update_destination(
        &self,
        user_id: &UserId,
        id: DestinationId,
        update: &DestinationUpdate,
    ) -> Result<DestinationView, RelayError> {
        Ok(self.registry.update(user_id, id, update).await?.view())
    }

    pub async fn delete_destination(&self, user_id: &UserId, id: DestinationId) -> Result<(), RelayError> {
        self.registry.delete(user_id, id).await
    }

    pub async fn list_destinations(&self, user_id: &UserId) -> Result<Vec<DestinationView>, RelayError> {
        Ok(self
            .registry
            .list(user_id)
            .await?
            .iter()
            .map(|d| d.view())
            .collect())
    }

    pub async fn get_destination(
        &self,
        user_id: &UserId,
        id: DestinationId,
    ) -> Result<DestinationView, RelayError> {
        Ok(self.registry.owned(user_id, id).await?.view())
    }

    /// Send a test payload and record the outcome. Never retried.
    pub async fn test_destination(
        &self,
        user_id: &UserId,
        id: DestinationId,
    ) -> Result<DeliveryRecord, RelayError> {
        let destination = self.registry.owned(user_id, id).await?;
        let record = self.dispatcher.test_deliver(&destination).await;

        if let Err(err) = self.ctx.storage.insert_delivery(&record).await {
            error!(destination_id = %id, error = %err, "failed to save test delivery");
        }
        info!(destination_id = %id, success = record.success, status = record.response_status, "test webhook sent");
        Ok(record)
    }

    pub async fn list_deliveries(
        &self,
        user_id: &UserId,
        id: DestinationId,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<DeliveryPage, RelayError> {
        self.registry.owned(user_id, id).await?;
        Ok(self.history.list(id, limit, offset).await?)
    }

    pub async fn stats(&self, user_id: &UserId, id: DestinationId) -> Result<DeliveryStats, RelayError> {
        self.registry.owned(user_id, id).await?;
        Ok(self.history.stats(id).await?)
    }
}
