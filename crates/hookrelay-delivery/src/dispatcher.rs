//! Event fan-out.
//!
//! Turns one domain event into one pending delivery per matching
//! subscription and schedules the first attempt of each. Creation and
//! scheduling are separate steps: a crash in between leaves a pending row
//! that the recovery sweep picks up.
//!
//! Producers are never blocked by delivery and never see its failures.

use std::{sync::Arc, time::Duration};

use hookrelay_core::{Clock, Delivery, DeliveryId, EventType, SubscriptionId, TEST_EVENT};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::{
    error::{DeliveryError, Result},
    scheduler::{Job, Scheduler},
    storage::WebhookStorage,
};

/// Creates deliveries for events and hands them to the scheduler.
pub struct Dispatcher {
    storage: Arc<dyn WebhookStorage>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    /// Creates a dispatcher.
    pub fn new(
        storage: Arc<dyn WebhookStorage>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { storage, scheduler, clock }
    }

    /// Fans `event_type` out to every active subscription listening to it.
    ///
    /// Returns how many deliveries were created. Storage and scheduling
    /// failures are logged and never returned: a delivery that failed to
    /// insert is not counted, and one that failed to schedule stays pending
    /// for the recovery sweep.
    pub async fn enqueue_event(&self, event_type: EventType, payload: serde_json::Value) -> usize {
        let subscriptions = match self
            .storage
            .find_active_subscriptions_for_event(event_type.as_str().to_string())
            .await
        {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                error!(event = %event_type, error = %e, "failed to load subscriptions for event");
                return 0;
            },
        };

        if subscriptions.is_empty() {
            debug!(event = %event_type, "no subscriptions for event");
            return 0;
        }

        let now = self.clock.now();
        let mut created = Vec::with_capacity(subscriptions.len());

        for subscription in &subscriptions {
            let delivery =
                Delivery::new_pending(subscription.id, event_type.as_str(), payload.clone(), now);
            match self.storage.insert_delivery(delivery).await {
                Ok(id) => {
                    created.push(id);
                    if let Err(e) = self.storage.touch_last_triggered(subscription.id, now).await {
                        warn!(
                            subscription_id = %subscription.id,
                            error = %e,
                            "failed to update last triggered time"
                        );
                    }
                },
                Err(e) => {
                    error!(
                        subscription_id = %subscription.id,
                        event = %event_type,
                        error = %e,
                        "failed to create delivery"
                    );
                },
            }
        }

        for id in &created {
            self.schedule_now(*id).await;
        }

        info!(
            event = %event_type,
            matched = subscriptions.len(),
            created = created.len(),
            "event fanned out"
        );

        created.len()
    }

    /// Sends a `test` event to one subscription through the normal
    /// pipeline and returns its delivery id.
    ///
    /// An inactive subscription still gets the delivery; it then fails
    /// fast in the executor.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionNotFound` or a storage error.
    pub async fn test_webhook(&self, subscription_id: SubscriptionId) -> Result<DeliveryId> {
        if self.storage.find_subscription(subscription_id).await?.is_none() {
            return Err(DeliveryError::SubscriptionNotFound { id: subscription_id });
        }

        let now = self.clock.now();
        let payload = json!({
            "message": "This is a test webhook",
            "subscription_id": subscription_id,
            "triggered_at": now.to_rfc3339(),
        });

        let id = self
            .storage
            .insert_delivery(Delivery::new_pending(subscription_id, TEST_EVENT, payload, now))
            .await?;
        self.storage.touch_last_triggered(subscription_id, now).await?;
        self.schedule_now(id).await;

        info!(subscription_id = %subscription_id, delivery_id = %id, "test webhook enqueued");
        Ok(id)
    }

    async fn schedule_now(&self, delivery_id: DeliveryId) {
        if let Err(e) =
            self.scheduler.run_after(Duration::ZERO, Job::AttemptDelivery(delivery_id)).await
        {
            warn!(
                delivery_id = %delivery_id,
                error = %e,
                "failed to schedule delivery, leaving it to the recovery sweep"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use hookrelay_core::{DeliveryStatus, TestClock, WebhookSubscription};

    use super::*;
    use crate::{scheduler::ManualScheduler, storage::mock::MockWebhookStorage};

    struct Fixture {
        storage: MockWebhookStorage,
        scheduler: ManualScheduler,
        clock: TestClock,
        dispatcher: Dispatcher,
    }

    fn fixture() -> Fixture {
        let storage = MockWebhookStorage::new();
        let clock = TestClock::new();
        let scheduler = ManualScheduler::new(Arc::new(clock.clone()));
        let dispatcher = Dispatcher::new(
            Arc::new(storage.clone()),
            Arc::new(scheduler.clone()),
            Arc::new(clock.clone()),
        );
        Fixture { storage, scheduler, clock, dispatcher }
    }

    fn subscription(events: &[&str], active: bool) -> WebhookSubscription {
        let now = Utc::now();
        WebhookSubscription {
            id: SubscriptionId::new(),
            name: "fanout".to_string(),
            url: "https://example.com/hook".to_string(),
            secret: "secret".to_string(),
            event_types: events.iter().map(|e| (*e).to_string()).collect(),
            active,
            failure_count: 0,
            last_triggered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn one_delivery_per_matching_active_subscription() {
        let f = fixture();
        let a = subscription(&["deal.won"], true);
        let b = subscription(&["deal.won", "deal.lost"], true);
        let inactive = subscription(&["deal.won"], false);
        let other = subscription(&["contact.created"], true);
        for s in [&a, &b, &inactive, &other] {
            f.storage.add_subscription(s.clone()).await;
        }

        let created = f.dispatcher.enqueue_event(EventType::DealWon, json!({"deal_id": 1})).await;

        assert_eq!(created, 2);
        let deliveries = f.storage.deliveries().await;
        assert_eq!(deliveries.len(), 2);
        for delivery in &deliveries {
            assert_eq!(delivery.status, DeliveryStatus::Pending);
            assert_eq!(delivery.attempts, 0);
            assert_eq!(delivery.event_type, "deal.won");
            assert_eq!(delivery.payload.0["deal_id"], 1);
        }

        let jobs = f.scheduler.due(f.clock.now());
        assert_eq!(jobs.len(), 2);

        assert!(f.storage.subscription(a.id).await.unwrap().last_triggered_at.is_some());
        assert!(f.storage.subscription(other.id).await.unwrap().last_triggered_at.is_none());
    }

    #[tokio::test]
    async fn no_match_is_zero() {
        let f = fixture();
        assert_eq!(f.dispatcher.enqueue_event(EventType::MessageSent, json!({})).await, 0);
        assert!(f.scheduler.is_empty());
    }

    #[tokio::test]
    async fn storage_failure_is_not_counted() {
        let f = fixture();
        f.storage.add_subscription(subscription(&["deal.won"], true)).await;
        f.storage.add_subscription(subscription(&["deal.won"], true)).await;
        f.storage.inject_insert_delivery_error("disk full").await;

        let created = f.dispatcher.enqueue_event(EventType::DealWon, json!({})).await;

        assert_eq!(created, 1);
        assert_eq!(f.scheduler.len(), 1);
    }

    #[tokio::test]
    async fn test_webhook_uses_test_event() {
        let f = fixture();
        let sub = subscription(&["deal.won"], false);
        f.storage.add_subscription(sub.clone()).await;

        let id = f.dispatcher.test_webhook(sub.id).await.unwrap();

        let delivery = f.storage.delivery(id).await.unwrap();
        assert_eq!(delivery.event_type, TEST_EVENT);
        assert_eq!(delivery.payload.0["message"], "This is a test webhook");
        assert_eq!(delivery.payload.0["subscription_id"], sub.id.to_string());
        assert!(delivery.payload.0["triggered_at"].is_string());
        assert_eq!(f.scheduler.due(f.clock.now()), vec![Job::AttemptDelivery(id)]);

        assert!(matches!(
            f.dispatcher.test_webhook(SubscriptionId::new()).await,
            Err(DeliveryError::SubscriptionNotFound { .. })
        ));
    }
}
