use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::types::{DeliveryId, DeliveryRecord, Destination, DestinationId, UserId};

/// Relational store behind the relay.
///
/// Every call touches a single row or a simple predicate over one table;
/// no operation needs a cross-record transaction.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn insert_destination(&self, destination: &Destination) -> Result<(), StorageError>;
    async fn get_destination(&self, id: DestinationId) -> Result<Option<Destination>, StorageError>;
    async fn destinations_for_user(&self, user_id: &UserId) -> Result<Vec<Destination>, StorageError>;
    async fn update_destination(&self, destination: &Destination) -> Result<(), StorageError>;

    /// Remove a destination and every delivery record it owns.
    /// Returns `false` when nothing was deleted.
    async fn delete_destination(&self, id: DestinationId) -> Result<bool, StorageError>;

    async fn insert_delivery(&self, record: &DeliveryRecord) -> Result<(), StorageError>;
    async fn update_delivery(&self, record: &DeliveryRecord) -> Result<(), StorageError>;
    async fn get_delivery(&self, id: DeliveryId) -> Result<Option<DeliveryRecord>, StorageError>;

    /// Page of records for one destination, newest first.
    async fn list_deliveries(
        &self,
        destination_id: DestinationId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DeliveryRecord>, StorageError>;

    /// Count records for a destination, optionally restricted by outcome.
    async fn count_deliveries(
        &self,
        destination_id: DestinationId,
        success: Option<bool>,
    ) -> Result<u64, StorageError>;

    async fn latest_delivery(
        &self,
        destination_id: DestinationId,
    ) -> Result<Option<DeliveryRecord>, StorageError>;

    /// Failed records below the retry ceiling whose `next_retry_at` has
    /// passed and whose destination is currently active, oldest due first.
    async fn due_retries(
        &self,
        now: DateTime<Utc>,
        max_retries: u32,
    ) -> Result<Vec<DeliveryRecord>, StorageError>;
}

/// In-memory storage for tests and embedded deployments.
#[derive(Default)]
pub struct InMemoryStorage {
    destinations: RwLock<HashMap<DestinationId, Destination>>,
    deliveries: RwLock<Vec<DeliveryRecord>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(records: &mut [DeliveryRecord]) {
    // Stable sort keeps reverse insertion order for equal timestamps.
    records.reverse();
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn insert_destination(&self, destination: &Destination) -> Result<(), StorageError> {
        self.destinations
            .write()
            .await
            .insert(destination.id, destination.clone());
        Ok(())
    }

    async fn get_destination(&self, id: DestinationId) -> Result<Option<Destination>, StorageError> {
        Ok(self.destinations.read().await.get(&id).cloned())
    }

    async fn destinations_for_user(&self, user_id: &UserId) -> Result<Vec<Destination>, StorageError> {
        let guard = self.destinations.read().await;
        let mut found: Vec<Destination> = guard
            .values()
            .filter(|d| &d.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn update_destination(&self, destination: &Destination) -> Result<(), StorageError> {
        let mut guard = self.destinations.write().await;
        match guard.get_mut(&destination.id) {
            Some(existing) => {
                *existing = destination.clone();
                Ok(())
            }
            None => Err(StorageError::Backend(format!(
                "destination {} does not exist",
                destination.id
            ))),
        }
    }

    async fn delete_destination(&self, id: DestinationId) -> Result<bool, StorageError> {
        let mut destinations = self.destinations.write().await;
        let removed = destinations.remove(&id).is_some();
        if removed {
            self.deliveries
                .write()
                .await
                .retain(|record| record.destination_id != id);
        }
        Ok(removed)
    }

    async fn insert_delivery(&self, record: &DeliveryRecord) -> Result<(), StorageError> {
        if !self.destinations.read().await.contains_key(&record.destination_id) {
            return Err(StorageError::Backend(format!(
                "destination {} does not exist",
                record.destination_id
            )));
        }
        self.deliveries.write().await.push(record.clone());
        Ok(())
    }

    async fn update_delivery(&self, record: &DeliveryRecord) -> Result<(), StorageError> {
        let mut guard = self.deliveries.write().await;
        match guard.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StorageError::Backend(format!(
                "delivery {} does not exist",
                record.id
            ))),
        }
    }

    async fn get_delivery(&self, id: DeliveryId) -> Result<Option<DeliveryRecord>, StorageError> {
        Ok(self
            .deliveries
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn list_deliveries(
        &self,
        destination_id: DestinationId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DeliveryRecord>, StorageError> {
        let mut records: Vec<DeliveryRecord> = self
            .deliveries
            .read()
            .await
            .iter()
            .filter(|r| r.destination_id == destination_id)
            .cloned()
            .collect();
        newest_first(&mut records);
        Ok(records.into_iter().skip(offset).take(limit).collect())
    }

    async fn count_deliveries(
        &self,
        destination_id: DestinationId,
        success: Option<bool>,
    ) -> Result<u64, StorageError> {
        let count = self
            .deliveries
            .read()
            .await
            .iter()
            .filter(|r| r.destination_id == destination_id)
            .filter(|r| success.map_or(true, |s| r.success == s))
            .count();
        Ok(count as u64)
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
        let destinations = self.destinations.read().await;
        let deliveries = self.deliveries.read().await;

        let mut due: Vec<DeliveryRecord> = deliveries
            .iter()
            .filter(|r| !r.success && r.retry_count < max_retries)
            .filter(|r| r.next_retry_at.is_some_and(|at| at <= now))
            .filter(|r| {
                destinations
                    .get(&r.destination_id)
                    .is_some_and(|d| d.active)
            })
            .cloned()
            .collect();
        due.sort_by_key(|r| r.next_retry_at);
        Ok(due)
    }
}
