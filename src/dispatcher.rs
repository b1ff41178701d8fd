use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::filter::should_deliver;
use crate::registry::Registry;
use crate::retry::next_retry_at;
use crate::types::{
    DeliveryId, DeliveryRecord, Destination, DestinationId, EventPayload, EventType, MessageData,
    UserId,
};
use crate::worker::{metric_inc, WorkerContext};

pub const TEST_MESSAGE: &str = "This is a test webhook from webhook-relay";

/// Tasks spawned by one [`Dispatcher::trigger`] call.
///
/// Dropping the handle detaches the tasks; they still run to completion.
#[derive(Debug, Default)]
pub struct DispatchHandle {
    handles: Vec<JoinHandle<DeliveryRecord>>,
}

impl DispatchHandle {
    /// Number of destinations a delivery was started for.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every delivery and return the records they produced.
    pub async fn wait(self) -> Vec<DeliveryRecord> {
        let mut records = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            match handle.await {
                Ok(record) => records.push(record),
                Err(err) => error!(error = %err, "delivery task did not complete"),
            }
        }
        records
    }
}

/// The `data` object for an event.
///
/// Message events carry the message; connection events carry a static
/// status marker; tests carry a static test marker.
pub fn event_data(event: EventType, message: Option<&MessageData>) -> Value {
    match (event, message) {
        (EventType::Test, _) => json!({ "test": true, "message": TEST_MESSAGE }),
        (_, Some(message)) => serde_json::to_value(message).unwrap_or(Value::Null),
        (_, None) => json!({ "status": event.as_str() }),
    }
}

pub fn build_payload(
    destination_id: DestinationId,
    event: EventType,
    data: Value,
    now: DateTime<Utc>,
) -> EventPayload {
    EventPayload {
        webhook_id: destination_id.to_string(),
        event,
        timestamp: now,
        data,
    }
}

/// Fans events out to matching destinations.
#[derive(Clone)]
pub struct Dispatcher {
    ctx: Arc<WorkerContext>,
    registry: Registry,
}

impl Dispatcher {
    pub fn new(ctx: Arc<WorkerContext>, registry: Registry) -> Self {
        Self { ctx, registry }
    }

    /// Start one independent delivery per matching destination.
    ///
    /// Never fails: lookup errors are logged and produce an empty handle,
    /// delivery failures end up in the persisted records.
    pub async fn trigger(
        &self,
        user_id: &UserId,
        event: EventType,
        message: Option<MessageData>,
    ) -> DispatchHandle {
        let subscribers = match self.registry.find_active_subscribers(user_id, event).await {
            Ok(subscribers) => subscribers,
            Err(err) => {
                error!(user_id = %user_id, event = %event, error = %err, "failed to fetch webhooks");
                return DispatchHandle::default();
            }
        };

        let data = event_data(event, message.as_ref());
        let mut handles = Vec::with_capacity(subscribers.len());

        for destination in subscribers {
            if let Some(message) = &message {
                if !should_deliver(&destination.filters, message) {
                    debug!(destination_id = %destination.id, "webhook skipped, filters don't match");
                    continue;
                }
            }

            metric_inc("webhook.dispatch.matched");
            let ctx = self.ctx.clone();
            let data = data.clone();
            let tracked = ctx.track();
            if tracked.is_none() {
                warn!(destination_id = %destination.id, "dispatching while the relay is stopping");
            }
            handles.push(tokio::spawn(async move {
                let _tracked = tracked;
                deliver(&ctx, &destination, event, data).await
            }));
        }

        info!(user_id = %user_id, event = %event, triggered = handles.len(), "triggered webhooks");
        DispatchHandle { handles }
    }

    /// Send a static test payload to one destination, bypassing matching.
    ///
    /// The record is returned unpersisted and is never scheduled for retry.
    pub async fn test_deliver(&self, destination: &Destination) -> DeliveryRecord {
        let data = event_data(EventType::Test, None);
        attempt_once(&self.ctx, destination, EventType::Test, data).await
    }
}

/// Build, sign and send a payload once, returning the unsaved record.
async fn attempt_once(
    ctx: &WorkerContext,
    destination: &Destination,
    event: EventType,
    data: Value,
) -> DeliveryRecord {
    let now = Utc::now();
    let payload = build_payload(destination.id, event, data, now);

    let mut record = DeliveryRecord {
        id: DeliveryId::new(),
        destination_id: destination.id,
        event_type: event,
        payload: String::new(),
        success: false,
        response_status: 0,
        response_body: String::new(),
        error_message: None,
        retry_count: 0,
        next_retry_at: None,
        created_at: now,
        updated_at: now,
    };

    match serde_json::to_string(&payload) {
        Ok(body) => record.payload = body,
        Err(err) => {
            warn!(destination_id = %destination.id, error = %err, "failed to serialize webhook payload");
            record.error_message = Some(format!("failed to serialize payload: {}", err));
            return record;
        }
    }

    let result = ctx
        .attempt(&destination.url, &record.payload, destination.signing_secret())
        .await;

    record.success = result.success;
    record.response_status = result.status;
    record.response_body = result.body;
    record.error_message = result.error;
    record.updated_at = Utc::now();

    if record.success {
        metric_inc("webhook.delivery.success");
    } else {
        metric_inc("webhook.delivery.failure");
    }
    record
}

async fn deliver(
    ctx: &WorkerContext,
    destination: &Destination,
    event: EventType,
    data: Value,
) -> DeliveryRecord {
    let mut record = attempt_once(ctx, destination, event, data).await;

    if !record.success && !record.payload.is_empty() {
        record.next_retry_at = next_retry_at(record.retry_count, ctx.config.max_retries, Utc::now());
    }

    match ctx.storage.insert_delivery(&record).await {
        Ok(()) => debug!(
            destination_id = %destination.id,
            delivery_id = %record.id,
            success = record.success,
            status = record.response_status,
            "delivery record saved"
        ),
        Err(err) => error!(
            destination_id = %destination.id,
            delivery_id = %record.id,
            error = %err,
            "failed to save webhook delivery"
        ),
    }

    record
}
