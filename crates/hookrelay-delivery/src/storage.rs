//! Storage abstraction layer for the delivery engine.
//!
//! Provides trait-based abstractions over storage operations so the
//! registry, dispatcher, executor and sweeper can run against Postgres in
//! production and an in-memory double in tests. Production uses the
//! concrete `hookrelay_core::storage::Storage`.

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};
use hookrelay_core::{
    error::Result, storage::Storage, Delivery, DeliveryAttempt, DeliveryId, DeliveryQuery,
    DeliveryTransition, FailureCount, SubscriptionId, SubscriptionPatch, WebhookSubscription,
};

/// Boxed future returned by every storage operation.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Storage operations required by the webhook engine.
///
/// Delivery transitions are compare-and-set: they apply only while the
/// delivery is pending with the expected attempt count and report whether
/// they did. Failure counter changes are atomic read-modify-writes.
pub trait WebhookStorage: Send + Sync + 'static {
    /// Inserts a new subscription.
    fn insert_subscription(&self, subscription: WebhookSubscription) -> StorageFuture<'_, ()>;

    /// Finds a subscription by ID.
    fn find_subscription(
        &self,
        id: SubscriptionId,
    ) -> StorageFuture<'_, Option<WebhookSubscription>>;

    /// Lists all subscriptions, newest first.
    fn list_subscriptions(&self) -> StorageFuture<'_, Vec<WebhookSubscription>>;

    /// Applies a partial update. Reactivation zeroes the failure counter in
    /// the same step. Returns `None` for an unknown subscription.
    fn update_subscription(
        &self,
        id: SubscriptionId,
        patch: SubscriptionPatch,
        now: DateTime<Utc>,
    ) -> StorageFuture<'_, Option<WebhookSubscription>>;

    /// Replaces the signing secret. Returns false for an unknown
    /// subscription.
    fn replace_secret(
        &self,
        id: SubscriptionId,
        secret: String,
        now: DateTime<Utc>,
    ) -> StorageFuture<'_, bool>;

    /// Deletes a subscription and everything it owns. Returns false for an
    /// unknown subscription.
    fn delete_subscription(&self, id: SubscriptionId) -> StorageFuture<'_, bool>;

    /// Finds active subscriptions listening to `event_type`.
    fn find_active_subscriptions_for_event(
        &self,
        event_type: String,
    ) -> StorageFuture<'_, Vec<WebhookSubscription>>;

    /// Sets `last_triggered_at`.
    fn touch_last_triggered(&self, id: SubscriptionId, at: DateTime<Utc>)
        -> StorageFuture<'_, ()>;

    /// Increments the failure counter, deactivating at `threshold`.
    fn increment_failure_count(
        &self,
        id: SubscriptionId,
        threshold: i32,
        now: DateTime<Utc>,
    ) -> StorageFuture<'_, Option<FailureCount>>;

    /// Resets the failure counter to zero.
    fn reset_failure_count(&self, id: SubscriptionId, now: DateTime<Utc>) -> StorageFuture<'_, ()>;

    /// Inserts a new delivery. Fails if the subscription does not exist.
    fn insert_delivery(&self, delivery: Delivery) -> StorageFuture<'_, DeliveryId>;

    /// Finds a delivery by ID.
    fn find_delivery(&self, id: DeliveryId) -> StorageFuture<'_, Option<Delivery>>;

    /// Lists a subscription's deliveries, newest first.
    fn list_deliveries(
        &self,
        subscription_id: SubscriptionId,
        query: DeliveryQuery,
    ) -> StorageFuture<'_, Vec<Delivery>>;

    /// Moves a pending delivery to success.
    fn complete_delivery(
        &self,
        id: DeliveryId,
        transition: DeliveryTransition,
    ) -> StorageFuture<'_, bool>;

    /// Records a failed attempt and arms `next_retry_at`.
    fn schedule_delivery_retry(
        &self,
        id: DeliveryId,
        transition: DeliveryTransition,
        next_retry_at: DateTime<Utc>,
    ) -> StorageFuture<'_, bool>;

    /// Moves a pending delivery to failed.
    fn fail_delivery(&self, id: DeliveryId, transition: DeliveryTransition)
        -> StorageFuture<'_, bool>;

    /// Re-opens all failed deliveries of a subscription and returns their
    /// IDs.
    fn reset_failed_deliveries(
        &self,
        subscription_id: SubscriptionId,
        now: DateTime<Utc>,
    ) -> StorageFuture<'_, Vec<DeliveryId>>;

    /// Re-opens one failed delivery. Returns false if it is not failed.
    fn reset_failed_delivery(&self, id: DeliveryId, now: DateTime<Utc>) -> StorageFuture<'_, bool>;

    /// Finds pending deliveries due at or before `cutoff`.
    fn find_due_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StorageFuture<'_, Vec<Delivery>>;

    /// Appends an attempt to the audit trail.
    fn record_attempt(&self, attempt: DeliveryAttempt) -> StorageFuture<'_, ()>;

    /// Lists the attempts of a delivery in order.
    fn find_attempts(&self, delivery_id: DeliveryId) -> StorageFuture<'_, Vec<DeliveryAttempt>>;

    /// Checks that storage is reachable.
    fn health_check(&self) -> StorageFuture<'_, ()>;
}

/// Production storage implementation using PostgreSQL.
///
/// Wraps the concrete `hookrelay_core::storage::Storage`; every call goes
/// through its repositories.
#[derive(Clone)]
pub struct PostgresWebhookStorage {
    storage: Arc<Storage>,
}

impl PostgresWebhookStorage {
    /// Creates a new PostgreSQL storage adapter.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl WebhookStorage for PostgresWebhookStorage {
    fn insert_subscription(&self, subscription: WebhookSubscription) -> StorageFuture<'_, ()> {
        Box::pin(async move {
            self.storage.subscriptions.create(&subscription).await?;
            Ok(())
        })
    }

    fn find_subscription(
        &self,
        id: SubscriptionId,
    ) -> StorageFuture<'_, Option<WebhookSubscription>> {
        Box::pin(async move { self.storage.subscriptions.find_by_id(id).await })
    }

    fn list_subscriptions(&self) -> StorageFuture<'_, Vec<WebhookSubscription>> {
        Box::pin(async move { self.storage.subscriptions.list().await })
    }

    fn update_subscription(
        &self,
        id: SubscriptionId,
        patch: SubscriptionPatch,
        now: DateTime<Utc>,
    ) -> StorageFuture<'_, Option<WebhookSubscription>> {
        Box::pin(async move { self.storage.subscriptions.update(id, &patch, now).await })
    }

    fn replace_secret(
        &self,
        id: SubscriptionId,
        secret: String,
        now: DateTime<Utc>,
    ) -> StorageFuture<'_, bool> {
        Box::pin(async move { self.storage.subscriptions.update_secret(id, &secret, now).await })
    }

    fn delete_subscription(&self, id: SubscriptionId) -> StorageFuture<'_, bool> {
        Box::pin(async move { self.storage.subscriptions.delete(id).await })
    }

    fn find_active_subscriptions_for_event(
        &self,
        event_type: String,
    ) -> StorageFuture<'_, Vec<WebhookSubscription>> {
        Box::pin(async move { self.storage.subscriptions.find_active_for_event(&event_type).await })
    }

    fn touch_last_triggered(
        &self,
        id: SubscriptionId,
        at: DateTime<Utc>,
    ) -> StorageFuture<'_, ()> {
        Box::pin(async move { self.storage.subscriptions.touch_last_triggered(id, at).await })
    }

    fn increment_failure_count(
        &self,
        id: SubscriptionId,
        threshold: i32,
        now: DateTime<Utc>,
    ) -> StorageFuture<'_, Option<FailureCount>> {
        Box::pin(async move {
            self.storage.subscriptions.increment_failure_count(id, threshold, now).await
        })
    }

    fn reset_failure_count(&self, id: SubscriptionId, now: DateTime<Utc>) -> StorageFuture<'_, ()> {
        Box::pin(async move { self.storage.subscriptions.reset_failure_count(id, now).await })
    }

    fn insert_delivery(&self, delivery: Delivery) -> StorageFuture<'_, DeliveryId> {
        Box::pin(async move { self.storage.deliveries.create(&delivery).await })
    }

    fn find_delivery(&self, id: DeliveryId) -> StorageFuture<'_, Option<Delivery>> {
        Box::pin(async move { self.storage.deliveries.find_by_id(id).await })
    }

    fn list_deliveries(
        &self,
        subscription_id: SubscriptionId,
        query: DeliveryQuery,
    ) -> StorageFuture<'_, Vec<Delivery>> {
        Box::pin(
            async move { self.storage.deliveries.find_by_subscription(subscription_id, query).await },
        )
    }

    fn complete_delivery(
        &self,
        id: DeliveryId,
        transition: DeliveryTransition,
    ) -> StorageFuture<'_, bool> {
        Box::pin(async move { self.storage.deliveries.mark_succeeded(id, &transition).await })
    }

    fn schedule_delivery_retry(
        &self,
        id: DeliveryId,
        transition: DeliveryTransition,
        next_retry_at: DateTime<Utc>,
    ) -> StorageFuture<'_, bool> {
        Box::pin(async move {
            self.storage.deliveries.schedule_retry(id, &transition, next_retry_at).await
        })
    }

    fn fail_delivery(
        &self,
        id: DeliveryId,
        transition: DeliveryTransition,
    ) -> StorageFuture<'_, bool> {
        Box::pin(async move { self.storage.deliveries.mark_failed(id, &transition).await })
    }

    fn reset_failed_deliveries(
        &self,
        subscription_id: SubscriptionId,
        now: DateTime<Utc>,
    ) -> StorageFuture<'_, Vec<DeliveryId>> {
        Box::pin(async move {
            self.storage.deliveries.reset_failed_for_subscription(subscription_id, now).await
        })
    }

    fn reset_failed_delivery(&self, id: DeliveryId, now: DateTime<Utc>) -> StorageFuture<'_, bool> {
        Box::pin(async move { self.storage.deliveries.reset_failed(id, now).await })
    }

    fn find_due_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StorageFuture<'_, Vec<Delivery>> {
        Box::pin(async move { self.storage.deliveries.find_due_pending(cutoff, limit).await })
    }

    fn record_attempt(&self, attempt: DeliveryAttempt) -> StorageFuture<'_, ()> {
        Box::pin(async move { self.storage.delivery_attempts.create(&attempt).await })
    }

    fn find_attempts(&self, delivery_id: DeliveryId) -> StorageFuture<'_, Vec<DeliveryAttempt>> {
        Box::pin(async move { self.storage.delivery_attempts.find_by_delivery(delivery_id).await })
    }

    fn health_check(&self) -> StorageFuture<'_, ()> {
        Box::pin(async move { self.storage.health_check().await })
    }
}

pub mod mock {
    //! In-memory storage for tests.
    //!
    //! All state sits behind one `RwLock`, so every trait operation is
    //! atomic with respect to the others, matching the single-statement
    //! guarantees of the Postgres repositories.

    use std::{collections::HashMap, sync::Arc};

    use chrono::{DateTime, Utc};
    use hookrelay_core::{
        error::CoreError, Delivery, DeliveryAttempt, DeliveryId, DeliveryQuery, DeliveryStatus,
        DeliveryTransition, FailureCount, SubscriptionId, SubscriptionPatch, WebhookSubscription,
    };
    use tokio::sync::RwLock;

    use super::{StorageFuture, WebhookStorage};

    #[derive(Default)]
    struct State {
        subscriptions: HashMap<SubscriptionId, WebhookSubscription>,
        deliveries: HashMap<DeliveryId, Delivery>,
        attempts: Vec<DeliveryAttempt>,
        insert_delivery_error: Option<String>,
        unhealthy: Option<String>,
    }

    /// Mock storage for testing engine logic without a database.
    #[derive(Clone, Default)]
    pub struct MockWebhookStorage {
        state: Arc<RwLock<State>>,
    }

    impl MockWebhookStorage {
        /// Creates a new mock storage with empty state.
        pub fn new() -> Self {
            Self::default()
        }

        /// Inserts or replaces a subscription directly.
        pub async fn add_subscription(&self, subscription: WebhookSubscription) {
            self.state.write().await.subscriptions.insert(subscription.id, subscription);
        }

        /// Inserts or replaces a delivery directly.
        pub async fn add_delivery(&self, delivery: Delivery) {
            self.state.write().await.deliveries.insert(delivery.id, delivery);
        }

        /// Returns a copy of a stored subscription.
        pub async fn subscription(&self, id: SubscriptionId) -> Option<WebhookSubscription> {
            self.state.read().await.subscriptions.get(&id).cloned()
        }

        /// Returns a copy of a stored delivery.
        pub async fn delivery(&self, id: DeliveryId) -> Option<Delivery> {
            self.state.read().await.deliveries.get(&id).cloned()
        }

        /// Returns every stored delivery, oldest first.
        pub async fn deliveries(&self) -> Vec<Delivery> {
            let mut deliveries: Vec<Delivery> =
                self.state.read().await.deliveries.values().cloned().collect();
            deliveries.sort_by_key(|d| d.created_at);
            deliveries
        }

        /// Returns every recorded attempt in insertion order.
        pub async fn recorded_attempts(&self) -> Vec<DeliveryAttempt> {
            self.state.read().await.attempts.clone()
        }

        /// Makes the next `insert_delivery` call fail.
        pub async fn inject_insert_delivery_error(&self, error: impl Into<String>) {
            self.state.write().await.insert_delivery_error = Some(error.into());
        }

        /// Makes `health_check` fail until cleared with `None`.
        pub async fn set_unhealthy(&self, error: Option<String>) {
            self.state.write().await.unhealthy = error;
        }
    }

    fn apply_transition(delivery: &mut Delivery, transition: &DeliveryTransition) -> bool {
        if delivery.status != DeliveryStatus::Pending
            || delivery.attempts != transition.expected_attempts
        {
            return false;
        }
        delivery.attempts = transition.attempts;
        delivery.updated_at = transition.at;
        true
    }

    fn reset(delivery: &mut Delivery, now: DateTime<Utc>) {
        delivery.status = DeliveryStatus::Pending;
        delivery.attempts = 0;
        delivery.next_retry_at = None;
        delivery.last_response_code = None;
        delivery.last_response_body = None;
        delivery.last_error = None;
        delivery.delivered_at = None;
        delivery.updated_at = now;
    }

    impl WebhookStorage for MockWebhookStorage {
        fn insert_subscription(&self, subscription: WebhookSubscription) -> StorageFuture<'_, ()> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                if state.subscriptions.contains_key(&subscription.id) {
                    return Err(CoreError::ConstraintViolation(format!(
                        "subscription {} already exists",
                        subscription.id
                    )));
                }
                state.subscriptions.insert(subscription.id, subscription);
                Ok(())
            })
        }

        fn find_subscription(
            &self,
            id: SubscriptionId,
        ) -> StorageFuture<'_, Option<WebhookSubscription>> {
            Box::pin(async move { Ok(self.state.read().await.subscriptions.get(&id).cloned()) })
        }

        fn list_subscriptions(&self) -> StorageFuture<'_, Vec<WebhookSubscription>> {
            Box::pin(async move {
                let mut subscriptions: Vec<WebhookSubscription> =
                    self.state.read().await.subscriptions.values().cloned().collect();
                subscriptions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                Ok(subscriptions)
            })
        }

        fn update_subscription(
            &self,
            id: SubscriptionId,
            patch: SubscriptionPatch,
            now: DateTime<Utc>,
        ) -> StorageFuture<'_, Option<WebhookSubscription>> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                let Some(subscription) = state.subscriptions.get_mut(&id) else {
                    return Ok(None);
                };
                if let Some(name) = patch.name {
                    subscription.name = name;
                }
                if let Some(url) = patch.url {
                    subscription.url = url;
                }
                if let Some(event_types) = patch.event_types {
                    subscription.event_types = event_types;
                }
                if let Some(active) = patch.active {
                    if active && !subscription.active {
                        subscription.failure_count = 0;
                    }
                    subscription.active = active;
                }
                subscription.updated_at = now;
                Ok(Some(subscription.clone()))
            })
        }

        fn replace_secret(
            &self,
            id: SubscriptionId,
            secret: String,
            now: DateTime<Utc>,
        ) -> StorageFuture<'_, bool> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                Ok(state.subscriptions.get_mut(&id).is_some_and(|subscription| {
                    subscription.secret = secret;
                    subscription.updated_at = now;
                    true
                }))
            })
        }

        fn delete_subscription(&self, id: SubscriptionId) -> StorageFuture<'_, bool> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                state.attempts.retain(|a| a.subscription_id != id);
                state.deliveries.retain(|_, d| d.subscription_id != id);
                Ok(state.subscriptions.remove(&id).is_some())
            })
        }

        fn find_active_subscriptions_for_event(
            &self,
            event_type: String,
        ) -> StorageFuture<'_, Vec<WebhookSubscription>> {
            Box::pin(async move {
                let mut matches: Vec<WebhookSubscription> = self
                    .state
                    .read()
                    .await
                    .subscriptions
                    .values()
                    .filter(|s| s.active && s.subscribes_to(&event_type))
                    .cloned()
                    .collect();
                matches.sort_by_key(|s| s.created_at);
                Ok(matches)
            })
        }

        fn touch_last_triggered(
            &self,
            id: SubscriptionId,
            at: DateTime<Utc>,
        ) -> StorageFuture<'_, ()> {
            Box::pin(async move {
                if let Some(subscription) = self.state.write().await.subscriptions.get_mut(&id) {
                    subscription.last_triggered_at = Some(at);
                }
                Ok(())
            })
        }

        fn increment_failure_count(
            &self,
            id: SubscriptionId,
            threshold: i32,
            now: DateTime<Utc>,
        ) -> StorageFuture<'_, Option<FailureCount>> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                Ok(state.subscriptions.get_mut(&id).map(|subscription| {
                    subscription.failure_count += 1;
                    if subscription.failure_count >= threshold {
                        subscription.active = false;
                    }
                    subscription.updated_at = now;
                    FailureCount {
                        failure_count: subscription.failure_count,
                        active: subscription.active,
                    }
                }))
            })
        }

        fn reset_failure_count(
            &self,
            id: SubscriptionId,
            now: DateTime<Utc>,
        ) -> StorageFuture<'_, ()> {
            Box::pin(async move {
                if let Some(subscription) = self.state.write().await.subscriptions.get_mut(&id) {
                    if subscription.failure_count != 0 {
                        subscription.failure_count = 0;
                        subscription.updated_at = now;
                    }
                }
                Ok(())
            })
        }

        fn insert_delivery(&self, delivery: Delivery) -> StorageFuture<'_, DeliveryId> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                if let Some(error) = state.insert_delivery_error.take() {
                    return Err(CoreError::Database(error));
                }
                if !state.subscriptions.contains_key(&delivery.subscription_id) {
                    return Err(CoreError::ConstraintViolation(format!(
                        "subscription {} does not exist",
                        delivery.subscription_id
                    )));
                }
                let id = delivery.id;
                state.deliveries.insert(id, delivery);
                Ok(id)
            })
        }

        fn find_delivery(&self, id: DeliveryId) -> StorageFuture<'_, Option<Delivery>> {
            Box::pin(async move { Ok(self.state.read().await.deliveries.get(&id).cloned()) })
        }

        fn list_deliveries(
            &self,
            subscription_id: SubscriptionId,
            query: DeliveryQuery,
        ) -> StorageFuture<'_, Vec<Delivery>> {
            Box::pin(async move {
                let query = query.normalized();
                let mut deliveries: Vec<Delivery> = self
                    .state
                    .read()
                    .await
                    .deliveries
                    .values()
                    .filter(|d| d.subscription_id == subscription_id)
                    .filter(|d| query.status.map_or(true, |status| d.status == status))
                    .cloned()
                    .collect();
                deliveries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                Ok(deliveries
                    .into_iter()
                    .skip(usize::try_from(query.offset).unwrap_or(usize::MAX))
                    .take(usize::try_from(query.limit).unwrap_or(0))
                    .collect())
            })
        }

        fn complete_delivery(
            &self,
            id: DeliveryId,
            transition: DeliveryTransition,
        ) -> StorageFuture<'_, bool> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                let Some(delivery) = state.deliveries.get_mut(&id) else {
                    return Ok(false);
                };
                if !apply_transition(delivery, &transition) {
                    return Ok(false);
                }
                delivery.status = DeliveryStatus::Success;
                delivery.next_retry_at = None;
                delivery.last_response_code = transition.response_code;
                delivery.last_response_body = transition.response_body;
                delivery.last_error = None;
                delivery.delivered_at = Some(transition.at);
                Ok(true)
            })
        }

        fn schedule_delivery_retry(
            &self,
            id: DeliveryId,
            transition: DeliveryTransition,
            next_retry_at: DateTime<Utc>,
        ) -> StorageFuture<'_, bool> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                let Some(delivery) = state.deliveries.get_mut(&id) else {
                    return Ok(false);
                };
                if !apply_transition(delivery, &transition) {
                    return Ok(false);
                }
                delivery.next_retry_at = Some(next_retry_at);
                delivery.last_response_code = transition.response_code;
                delivery.last_response_body = transition.response_body;
                delivery.last_error = transition.error;
                Ok(true)
            })
        }

        fn fail_delivery(
            &self,
            id: DeliveryId,
            transition: DeliveryTransition,
        ) -> StorageFuture<'_, bool> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                let Some(delivery) = state.deliveries.get_mut(&id) else {
                    return Ok(false);
                };
                if !apply_transition(delivery, &transition) {
                    return Ok(false);
                }
                delivery.status = DeliveryStatus::Failed;
                delivery.next_retry_at = None;
                if transition.response_code.is_some() {
                    delivery.last_response_code = transition.response_code;
                }
                if transition.response_body.is_some() {
                    delivery.last_response_body = transition.response_body;
                }
                delivery.last_error = transition.error;
                Ok(true)
            })
        }

        fn reset_failed_deliveries(
            &self,
            subscription_id: SubscriptionId,
            now: DateTime<Utc>,
        ) -> StorageFuture<'_, Vec<DeliveryId>> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                let mut ids = Vec::new();
                for delivery in state.deliveries.values_mut().filter(|d| {
                    d.subscription_id == subscription_id && d.status == DeliveryStatus::Failed
                }) {
                    reset(delivery, now);
                    ids.push(delivery.id);
                }
                Ok(ids)
            })
        }

        fn reset_failed_delivery(
            &self,
            id: DeliveryId,
            now: DateTime<Utc>,
        ) -> StorageFuture<'_, bool> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                match state.deliveries.get_mut(&id) {
                    Some(delivery) if delivery.status == DeliveryStatus::Failed => {
                        reset(delivery, now);
                        Ok(true)
                    },
                    _ => Ok(false),
                }
            })
        }

        fn find_due_pending(
            &self,
            cutoff: DateTime<Utc>,
            limit: i64,
        ) -> StorageFuture<'_, Vec<Delivery>> {
            Box::pin(async move {
                let due_at = |d: &Delivery| d.next_retry_at.unwrap_or(d.created_at);
                let mut due: Vec<Delivery> = self
                    .state
                    .read()
                    .await
                    .deliveries
                    .values()
                    .filter(|d| {
                        d.status == DeliveryStatus::Pending
                            && d.next_retry_at.unwrap_or(d.created_at) <= cutoff
                    })
                    .cloned()
                    .collect();
                due.sort_by_key(due_at);
                due.truncate(usize::try_from(limit).unwrap_or(0));
                Ok(due)
            })
        }

        fn record_attempt(&self, attempt: DeliveryAttempt) -> StorageFuture<'_, ()> {
            Box::pin(async move {
                self.state.write().await.attempts.push(attempt);
                Ok(())
            })
        }

        fn find_attempts(
            &self,
            delivery_id: DeliveryId,
        ) -> StorageFuture<'_, Vec<DeliveryAttempt>> {
            Box::pin(async move {
                let mut attempts: Vec<DeliveryAttempt> = self
                    .state
                    .read()
                    .await
                    .attempts
                    .iter()
                    .filter(|a| a.delivery_id == delivery_id)
                    .cloned()
                    .collect();
                attempts.sort_by_key(|a| (a.attempted_at, a.attempt_number));
                Ok(attempts)
            })
        }

        fn health_check(&self) -> StorageFuture<'_, ()> {
            Box::pin(async move {
                match &self.state.read().await.unhealthy {
                    Some(error) => Err(CoreError::Database(error.clone())),
                    None => Ok(()),
                }
            })
        }
    }

}
