use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StorageError;
use crate::storage::Storage;
use crate::types::{DeliveryView, DestinationId};

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 100;

/// Aggregate outcome counts for one destination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryStats {
    pub total_deliveries: u64,
    pub successful: u64,
    pub failed: u64,
    /// Percentage with two decimals and a `%` suffix, e.g. `"66.67%"`.
    pub success_rate: String,
    pub last_delivery_at: Option<DateTime<Utc>>,
    #[serde(rename = "last_delivery_status")]
    pub last_delivery_success: Option<bool>,
}

/// One page of a destination's delivery log. Entries leave out the payload
/// and response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryPage {
    pub deliveries: Vec<DeliveryView>,
    pub total: u64,
    pub limit: usize,
    pub offset: usize,
}

/// Requested page size, falling back to the default when out of range.
pub fn page_limit(requested: Option<usize>) -> usize {
    match requested {
        Some(limit) if (1..=MAX_PAGE_LIMIT).contains(&limit) => limit,
        _ => DEFAULT_PAGE_LIMIT,
    }
}

pub fn success_rate(successful: u64, total: u64) -> String {
    let rate = if total == 0 {
        0.0
    } else {
        successful as f64 / total as f64 * 100.0
    };
    format!("{:.2}%", rate)
}

/// Read side over delivery records.
#[derive(Clone)]
pub struct History {
    storage: Arc<dyn Storage>,
}

impl History {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn list(
        &self,
        destination_id: DestinationId,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<DeliveryPage, StorageError> {
        let limit = page_limit(limit);
        let offset = offset.unwrap_or(0);

        let total = self.storage.count_deliveries(destination_id, None).await?;
        let deliveries = self
            .storage
            .list_deliveries(destination_id, limit, offset)
            .await?
            .iter()
            .map(|record| record.view())
            .collect();

        Ok(DeliveryPage {
            deliveries,
            total,
            limit,
            offset,
        })
    }

    pub async fn stats(&self, destination_id: DestinationId) -> Result<DeliveryStats, StorageError> {
        let total = self.storage.count_deliveries(destination_id, None).await?;
        let successful = self
            .storage
            .count_deliveries(destination_id, Some(true))
            .await?;
        let failed = self
            .storage
            .count_deliveries(destination_id, Some(false))
            .await?;
        let last = self.storage.latest_delivery(destination_id).await?;

        Ok(DeliveryStats {
            total_deliveries: total,
            successful,
            failed,
            success_rate: success_rate(successful, total),
            last_delivery_at: last.as_ref().map(|r| r.created_at),
            last_delivery_success: last.map(|r| r.success),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_formatting() {
        assert_eq!(success_rate(0, 0), "0.00%");
        assert_eq!(success_rate(1, 1), "100.00%");
        assert_eq!(success_rate(2, 3), "66.67%");
        assert_eq!(success_rate(0, 7), "0.00%");
    }

    #[test]
    fn page_limit_bounds() {
        assert_eq!(page_limit(None), 50);
        assert_eq!(page_limit(Some(0)), 50);
        assert_eq!(page_limit(Some(1)), 1);
        assert_eq!(page_limit(Some(100)), 100);
        assert_eq!(page_limit(Some(101)), 50);
    }
}
