//! Read access to deliveries and their attempt trail.

use std::sync::Arc;

use hookrelay_core::{Delivery, DeliveryAttempt, DeliveryId, DeliveryQuery, SubscriptionId};
use serde::Serialize;

use crate::{
    error::{DeliveryError, Result},
    storage::WebhookStorage,
};

/// A delivery together with every attempt made for it.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryDetail {
    /// The delivery.
    #[serde(flatten)]
    pub delivery: Delivery,
    /// Attempts in order.
    pub attempts_history: Vec<DeliveryAttempt>,
}

/// Delivery history queries.
pub struct DeliveryHistory {
    storage: Arc<dyn WebhookStorage>,
}

impl DeliveryHistory {
    /// Creates a history reader.
    pub fn new(storage: Arc<dyn WebhookStorage>) -> Self {
        Self { storage }
    }

    /// Lists a subscription's deliveries, newest first.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionNotFound` or a storage error.
    pub async fn list_for_subscription(
        &self,
        subscription_id: SubscriptionId,
        query: DeliveryQuery,
    ) -> Result<Vec<Delivery>> {
        if self.storage.find_subscription(subscription_id).await?.is_none() {
            return Err(DeliveryError::SubscriptionNotFound { id: subscription_id });
        }
        Ok(self.storage.list_deliveries(subscription_id, query.normalized()).await?)
    }

    /// Returns one delivery.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryNotFound` or a storage error.
    pub async fn get_delivery(&self, id: DeliveryId) -> Result<Delivery> {
        self.storage.find_delivery(id).await?.ok_or(DeliveryError::DeliveryNotFound { id })
    }

    /// Returns the attempts of a delivery in order.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryNotFound` or a storage error.
    pub async fn attempts(&self, id: DeliveryId) -> Result<Vec<DeliveryAttempt>> {
        if self.storage.find_delivery(id).await?.is_none() {
            return Err(DeliveryError::DeliveryNotFound { id });
        }
        Ok(self.storage.find_attempts(id).await?)
    }

    /// Returns a delivery with its attempts.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryNotFound` or a storage error.
    pub async fn detail(&self, id: DeliveryId) -> Result<DeliveryDetail> {
        let delivery = self.get_delivery(id).await?;
        let attempts_history = self.storage.find_attempts(id).await?;
        Ok(DeliveryDetail { delivery, attempts_history })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use hookrelay_core::{DeliveryStatus, WebhookSubscription};
    use serde_json::json;

    use super::*;
    use crate::storage::mock::MockWebhookStorage;

    #[tokio::test]
    async fn lists_newest_first_with_filter_and_page() {
        let storage = MockWebhookStorage::new();
        let now = Utc::now();
        let subscription = WebhookSubscription {
            id: SubscriptionId::new(),
            name: "history".to_string(),
            url: "https://example.com".to_string(),
            secret: "s".to_string(),
            event_types: vec!["deal.won".to_string()],
            active: true,
            failure_count: 0,
            last_triggered_at: None,
            created_at: now,
            updated_at: now,
        };
        storage.add_subscription(subscription.clone()).await;

        for i in 0..5 {
            let mut delivery = Delivery::new_pending(
                subscription.id,
                "deal.won",
                json!({"n": i}),
                now + Duration::seconds(i),
            );
            if i % 2 == 0 {
                delivery.status = DeliveryStatus::Failed;
            }
            storage.add_delivery(delivery).await;
        }

        let history = DeliveryHistory::new(Arc::new(storage));

        let all = history
            .list_for_subscription(subscription.id, DeliveryQuery::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].payload.0["n"], 4);

        let failed = history
            .list_for_subscription(
                subscription.id,
                DeliveryQuery { status: Some(DeliveryStatus::Failed), limit: 2, offset: 1 },
            )
            .await
            .unwrap();
        let numbers: Vec<_> = failed.iter().map(|d| d.payload.0["n"].clone()).collect();
        assert_eq!(numbers, vec![json!(2), json!(0)]);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let history = DeliveryHistory::new(Arc::new(MockWebhookStorage::new()));

        assert!(matches!(
            history.list_for_subscription(SubscriptionId::new(), DeliveryQuery::default()).await,
            Err(DeliveryError::SubscriptionNotFound { .. })
        ));
        assert!(matches!(
            history.get_delivery(DeliveryId::new()).await,
            Err(DeliveryError::DeliveryNotFound { .. })
        ));
        assert!(history.attempts(DeliveryId::new()).await.is_err());
    }
}
