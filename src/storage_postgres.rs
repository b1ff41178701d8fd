#[cfg(feature = "postgres")]
use async_trait::async_trait;
#[cfg(feature = "postgres")]
use chrono::{DateTime, Utc};
#[cfg(feature = "postgres")]
use tokio_postgres::{Client, Row};

#[cfg(feature = "postgres")]
use crate::error::StorageError;
#[cfg(feature = "postgres")]
use crate::storage::Storage;
#[cfg(feature = "postgres")]
use crate::types::{
    DeliveryId, DeliveryRecord, Destination, DestinationId, EventType, Filters, UserId,
};

#[cfg(feature = "postgres")]
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS webhook_destinations (
    id UUID PRIMARY KEY,
    user_id TEXT NOT NULL,
    url TEXT NOT NULL,
    secret TEXT,
    description TEXT NOT NULL DEFAULT '',
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    event_types TEXT[] NOT NULL,
    filter_chat_type TEXT NOT NULL DEFAULT 'all',
    filter_phone_numbers TEXT[] NOT NULL DEFAULT '{}',
    filter_phone_match_type TEXT NOT NULL DEFAULT 'whitelist',
    filter_group_jids TEXT[] NOT NULL DEFAULT '{}',
    filter_group_names TEXT[] NOT NULL DEFAULT '{}',
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS webhook_destinations_user_idx ON webhook_destinations (user_id);

CREATE TABLE IF NOT EXISTS webhook_deliveries (
    id UUID PRIMARY KEY,
    destination_id UUID NOT NULL REFERENCES webhook_destinations (id) ON DELETE CASCADE,
    event_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    success BOOLEAN NOT NULL,
    response_status INTEGER NOT NULL DEFAULT 0,
    response_body TEXT NOT NULL DEFAULT '',
    error_message TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    next_retry_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS webhook_deliveries_destination_idx
    ON webhook_deliveries (destination_id, created_at DESC);
CREATE INDEX IF NOT EXISTS webhook_deliveries_retry_idx
    ON webhook_deliveries (next_retry_at) WHERE success = FALSE;
";

#[cfg(feature = "postgres")]
const DESTINATION_COLUMNS: &str = "id, user_id, url, secret, description, is_active, event_types, \
    filter_chat_type, filter_phone_numbers, filter_phone_match_type, filter_group_jids, \
    filter_group_names, created_at, updated_at";

#[cfg(feature = "postgres")]
const DELIVERY_COLUMNS: &str = "d.id, d.destination_id, d.event_type, d.payload, d.success, \
    d.response_status, d.response_body, d.error_message, d.retry_count, d.next_retry_at, \
    d.created_at, d.updated_at";

/// Postgres-backed storage.
///
/// List-valued filters live in `TEXT[]` columns and are converted to and
/// from `Vec<String>` only here.
#[cfg(feature = "postgres")]
pub struct PostgresStorage {
    client: Client,
}

#[cfg(feature = "postgres")]
impl PostgresStorage {
    /// Wrap a connected client, creating the tables if needed.
    pub async fn new(client: Client) -> Result<Self, tokio_postgres::Error> {
        client.batch_execute(SCHEMA).await?;
        Ok(Self { client })
    }

    fn destination_from_row(row: &Row) -> Result<Destination, StorageError> {
        let corrupt = |e: tokio_postgres::Error| StorageError::Corrupt(e.to_string());

        let event_types: Vec<String> = row.try_get("event_types").map_err(corrupt)?;
        let event_types = event_types
            .iter()
            .map(|e| e.parse::<EventType>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;

        let chat_type: String = row.try_get("filter_chat_type").map_err(corrupt)?;
        let match_type: String = row.try_get("filter_phone_match_type").map_err(corrupt)?;

        Ok(Destination {
            id: DestinationId(row.try_get("id").map_err(corrupt)?),
            user_id: UserId(row.try_get("user_id").map_err(corrupt)?),
            url: row.try_get("url").map_err(corrupt)?,
            secret: row.try_get("secret").map_err(corrupt)?,
            description: row.try_get("description").map_err(corrupt)?,
            active: row.try_get("is_active").map_err(corrupt)?,
            event_types,
            filters: Filters {
                chat_type: chat_type
                    .parse()
                    .map_err(|e: crate::error::ValidationError| StorageError::Corrupt(e.to_string()))?,
                phone_numbers: row.try_get("filter_phone_numbers").map_err(corrupt)?,
                phone_match_type: match_type
                    .parse()
                    .map_err(|e: crate::error::ValidationError| StorageError::Corrupt(e.to_string()))?,
                group_jids: row.try_get("filter_group_jids").map_err(corrupt)?,
                group_names: row.try_get("filter_group_names").map_err(corrupt)?,
            },
            created_at: row.try_get("created_at").map_err(corrupt)?,
            updated_at: row.try_get("updated_at").map_err(corrupt)?,
        })
    }

    fn delivery_from_row(row: &Row) -> Result<DeliveryRecord, StorageError> {
        let corrupt = |e: tokio_postgres::Error| StorageError::Corrupt(e.to_string());

        let event_type: String = row.try_get("event_type").map_err(corrupt)?;
        let status: i32 = row.try_get("response_status").map_err(corrupt)?;
        let retry_count: i32 = row.try_get("retry_count").map_err(corrupt)?;

        Ok(DeliveryRecord {
            id: DeliveryId(row.try_get("id").map_err(corrupt)?),
            destination_id: DestinationId(row.try_get("destination_id").map_err(corrupt)?),
            event_type: event_type
                .parse()
                .map_err(|e: crate::error::ValidationError| StorageError::Corrupt(e.to_string()))?,
            payload: row.try_get("payload").map_err(corrupt)?,
            success: row.try_get("success").map_err(corrupt)?,
            response_status: u16::try_from(status)
                .map_err(|_| StorageError::Corrupt(format!("response_status out of range: {}", status)))?,
            response_body: row.try_get("response_body").map_err(corrupt)?,
            error_message: row.try_get("error_message").map_err(corrupt)?,
            retry_count: u32::try_from(retry_count)
                .map_err(|_| StorageError::Corrupt(format!("negative retry_count: {}", retry_count)))?,
            next_retry_at: row.try_get("next_retry_at").map_err(corrupt)?,
            created_at: row.try_get("created_at").map_err(corrupt)?,
            updated_at: row.try_get("updated_at").map_err(corrupt)?,
        })
    }

    fn event_type_strings(destination: &Destination) -> Vec<String> {
        destination
            .event_types
            .iter()
            .map(|e| e.as_str().to_string())
            .collect()
    }
}

#[cfg(feature = "postgres")]
#[async_trait]
impl Storage for PostgresStorage {
    async fn insert_destination(&self, destination: &Destination) -> Result<(), StorageError> {
        let event_types = Self::event_type_strings(destination);
        self.client
            .execute(
                &format!(
                    "INSERT INTO webhook_destinations ({}) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
                    DESTINATION_COLUMNS
                ),
                &[
                    &destination.id.0,
                    &destination.user_id.0,
                    &destination.url,
                    &destination.secret,
                    &destination.description,
                    &destination.active,
                    &event_types,
                    &destination.filters.chat_type.as_str(),
                    &destination.filters.phone_numbers,
                    &destination.filters.phone_match_type.as_str(),
                    &destination.filters.group_jids,
                    &destination.filters.group_names,
                    &destination.created_at,
                    &destination.updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_destination(&self, id: DestinationId) -> Result<Option<Destination>, StorageError> {
        let row = self
            .client
            .query_opt(
                &format!("SELECT {} FROM webhook_destinations WHERE id = $1", DESTINATION_COLUMNS),
                &[&id.0],
            )
            .await?;
        row.as_ref().map(Self::destination_from_row).transpose()
    }

    async fn destinations_for_user(&self, user_id: &UserId) -> Result<Vec<Destination>, StorageError> {
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT {} FROM webhook_destinations WHERE user_id = $1 ORDER BY created_at",
                    DESTINATION_COLUMNS
                ),
                &[&user_id.0],
            )
            .await?;
        rows.iter().map(Self::destination_from_row).collect()
    }

    async fn update_destination(&self, destination: &Destination) -> Result<(), StorageError> {
        let event_types = Self::event_type_strings(destination);
        let updated = self
            .client
            .execute(
                "UPDATE webhook_destinations SET \
                    url = $2, secret = $3, description = $4, is_active = $5, event_types = $6, \
                    filter_chat_type = $7, filter_phone_numbers = $8, filter_phone_match_type = $9, \
                    filter_group_jids = $10, filter_group_names = $11, updated_at = $12 \
                 WHERE id = $1",
                &[
                    &destination.id.0,
                    &destination.url,
                    &destination.secret,
                    &destination.description,
                    &destination.active,
                    &event_types,
                    &destination.filters.chat_type.as_str(),
                    &destination.filters.phone_numbers,
                    &destination.filters.phone_match_type.as_str(),
                    &destination.filters.group_jids,
                    &destination.filters.group_names,
                    &destination.updated_at,
                ],
            )
            .await?;

        if updated == 0 {
            return Err(StorageError::Backend(format!(
                "destination {} does not exist",
                destination.id
            )));
        }
        Ok(())
    }

    async fn delete_destination(&self, id: DestinationId) -> Result<bool, StorageError> {
        // Delivery rows go with it through ON DELETE CASCADE.
        let deleted = self
            .client
            .execute("DELETE FROM webhook_destinations WHERE id = $1", &[&id.0])
            .await?;
        Ok(deleted > 0)
    }

    async fn insert_delivery(&self, record: &DeliveryRecord) -> Result<(), StorageError> {
        self.client
            .execute(
                "INSERT INTO webhook_deliveries \
                    (id, destination_id, event_type, payload, success, response_status, \
                     response_body, error_message, retry_count, next_retry_at, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
                &[
                    &record.id.0,
                    &record.destination_id.0,
                    &record.event_type.as_str(),
                    &record.payload,
                    &record.success,
                    &i32::from(record.response_status),
                    &record.response_body,
                    &record.error_message,
                    &(record.retry_count as i32),
                    &record.next_retry_at,
                    &record.created_at,
                    &record.updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn update_delivery(&self, record: &DeliveryRecord) -> Result<(), StorageError> {
        // Payload and creation time are immutable.
        let updated = self
            .client
            .execute(
                "UPDATE webhook_deliveries SET \
                    success = $2, response_status = $3, response_body = $4, error_message = $5, \
                    retry_count = $6, next_retry_at = $7, updated_at = $8 \
                 WHERE id = $1",
                &[
                    &record.id.0,
                    &record.success,
                    &i32::from(record.response_status),
                    &record.response_body,
                    &record.error_message,
                    &(record.retry_count as i32),
                    &record.next_retry_at,
                    &record.updated_at,
                ],
            )
            .await?;

        if updated == 0 {
            return Err(StorageError::Backend(format!(
                "delivery {} does not exist",
                record.id
            )));
        }
        Ok(())
    }

    async fn get_delivery(&self, id: DeliveryId) -> Result<Option<DeliveryRecord>, StorageError> {
        let row = self
            .client
            .query_opt(
                &format!("SELECT {} FROM webhook_deliveries d WHERE d.id = $1", DELIVERY_COLUMNS),
                &[&id.0],
            )
            .await?;
        row.as_ref().map(Self::delivery_from_row).transpose()
    }

    async fn list_deliveries(
        &self,
        destination_id: DestinationId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DeliveryRecord>, StorageError> {
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT {} FROM webhook_deliveries d WHERE d.destination_id = $1 \
                     ORDER BY d.created_at DESC LIMIT $2 OFFSET $3",
                    DELIVERY_COLUMNS
                ),
                &[&destination_id.0, &(limit as i64), &(offset as i64)],
            )
            .await?;
        rows.iter().map(Self::delivery_from_row).collect()
    }

    async fn count_deliveries(
        &self,
        destination_id: DestinationId,
        success: Option<bool>,
    ) -> Result<u64, StorageError> {
        let row = match success {
            Some(success) => {
                self.client
                    .query_one(
                        "SELECT COUNT(*) FROM webhook_deliveries WHERE destination_id = $1 AND success = $2",
                        &[&destination_id.0, &success],
                    )
                    .await?
            }
            None => {
                self.client
                    .query_one(
                        "SELECT COUNT(*) FROM webhook_deliveries WHERE destination_id = $1",
                        &[&destination_id.0],
                    )
                    .await?
            }
        };
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn latest_delivery(
        &self,
        destination_id: DestinationId,
    ) -> Result<Option<DeliveryRecord>, StorageError> {
        Ok(self.list_deliveries(destination_id, 1, 0).await?.into_iter().next())
    }

    async fn due_retries(
        &self,
        now: DateTime<Utc>,
        max_retries: u32,
    ) -> Result<Vec<DeliveryRecord>, StorageError> {
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT {} FROM webhook_deliveries d \
                     JOIN webhook_destinations w ON w.id = d.destination_id \
                     WHERE d.success = FALSE AND d.retry_count < $2 \
                       AND d.next_retry_at IS NOT NULL AND d.next_retry_at <= $1 \
                       AND w.is_active = TRUE \
                     ORDER BY d.next_retry_at",
                    DELIVERY_COLUMNS
                ),
                &[&now, &(max_retries as i32)],
            )
            .await?;
        rows.iter().map(Self::delivery_from_row).collect()
    }
}
