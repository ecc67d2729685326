//! Subscription registry.
//!
//! Administrative create/read/update/delete of subscriptions. The secret is
//! handed out exactly twice: when a subscription is created and when it is
//! regenerated. Every other read returns a [`SubscriptionView`].

use std::sync::Arc;

use hookrelay_core::{
    Clock, SubscriptionId, SubscriptionPatch, SubscriptionView, WebhookSubscription,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error::{DeliveryError, Result},
    signing::generate_secret,
    storage::WebhookStorage,
    validation::{validate_event_types, validate_name, validate_url},
};

/// Input for creating a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSubscription {
    /// Human-readable name.
    pub name: String,
    /// Destination URL.
    pub url: String,
    /// Catalog event names to receive.
    pub event_types: Vec<String>,
    /// Initial active flag. Defaults to true.
    #[serde(default)]
    pub active: Option<bool>,
}

/// Returned once at creation: the new id and its signing secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedSubscription {
    /// New subscription id.
    pub id: SubscriptionId,
    /// Signing secret. Not retrievable later.
    pub secret: String,
}

/// Administrative operations on subscriptions.
pub struct SubscriptionRegistry {
    storage: Arc<dyn WebhookStorage>,
    clock: Arc<dyn Clock>,
    require_https: bool,
}

impl SubscriptionRegistry {
    /// Creates a registry. `require_https` rejects plain `http` URLs.
    pub fn new(storage: Arc<dyn WebhookStorage>, clock: Arc<dyn Clock>, require_https: bool) -> Self {
        Self { storage, clock, require_https }
    }

    /// Validates and stores a new subscription.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad name, URL or event type list,
    /// or a storage error.
    pub async fn create(&self, input: NewSubscription) -> Result<CreatedSubscription> {
        let name = validate_name(&input.name)?;
        validate_url(&input.url, self.require_https)?;
        let event_types = validate_event_types(&input.event_types)?;

        let now = self.clock.now();
        let subscription = WebhookSubscription {
            id: SubscriptionId::new(),
            name,
            url: input.url,
            secret: generate_secret(),
            event_types,
            active: input.active.unwrap_or(true),
            failure_count: 0,
            last_triggered_at: None,
            created_at: now,
            updated_at: now,
        };
        let created = CreatedSubscription { id: subscription.id, secret: subscription.secret.clone() };

        info!(
            subscription_id = %subscription.id,
            url = %subscription.url,
            event_types = ?subscription.event_types,
            "creating webhook subscription"
        );
        self.storage.insert_subscription(subscription).await?;

        Ok(created)
    }

    /// Applies a partial update after re-validating changed fields.
    ///
    /// Setting `active` to true on an inactive subscription also resets its
    /// failure counter.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionNotFound`, a validation error, or a storage
    /// error.
    pub async fn update(
        &self,
        id: SubscriptionId,
        patch: SubscriptionPatch,
    ) -> Result<SubscriptionView> {
        let patch = SubscriptionPatch {
            name: patch.name.as_deref().map(validate_name).transpose()?,
            url: match patch.url {
                Some(url) => {
                    validate_url(&url, self.require_https)?;
                    Some(url)
                },
                None => None,
            },
            event_types: patch.event_types.as_deref().map(validate_event_types).transpose()?,
            active: patch.active,
        };

        if patch.is_empty() {
            return self.get(id).await;
        }

        let updated = self
            .storage
            .update_subscription(id, patch.clone(), self.clock.now())
            .await?
            .ok_or(DeliveryError::SubscriptionNotFound { id })?;

        info!(
            subscription_id = %id,
            active = updated.active,
            reactivated = patch.active == Some(true),
            "webhook subscription updated"
        );

        Ok(updated.view())
    }

    /// Replaces the signing secret and returns the new one.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionNotFound` or a storage error.
    pub async fn regenerate_secret(&self, id: SubscriptionId) -> Result<String> {
        let secret = generate_secret();
        if !self.storage.replace_secret(id, secret.clone(), self.clock.now()).await? {
            return Err(DeliveryError::SubscriptionNotFound { id });
        }

        info!(subscription_id = %id, "webhook secret regenerated");
        Ok(secret)
    }

    /// Deletes a subscription with all of its deliveries and attempts.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionNotFound` or a storage error.
    pub async fn delete(&self, id: SubscriptionId) -> Result<()> {
        if !self.storage.delete_subscription(id).await? {
            return Err(DeliveryError::SubscriptionNotFound { id });
        }

        info!(subscription_id = %id, "webhook subscription deleted");
        Ok(())
    }

    /// Returns one subscription without its secret.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionNotFound` or a storage error.
    pub async fn get(&self, id: SubscriptionId) -> Result<SubscriptionView> {
        self.storage
            .find_subscription(id)
            .await?
            .map(SubscriptionView::from)
            .ok_or(DeliveryError::SubscriptionNotFound { id })
    }

    /// Lists all subscriptions without their secrets, newest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn list(&self) -> Result<Vec<SubscriptionView>> {
        Ok(self.storage.list_subscriptions().await?.into_iter().map(SubscriptionView::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use hookrelay_core::TestClock;

    use super::*;
    use crate::{signing::SECRET_LENGTH, storage::mock::MockWebhookStorage};

    fn registry() -> (MockWebhookStorage, SubscriptionRegistry) {
        let storage = MockWebhookStorage::new();
        let registry =
            SubscriptionRegistry::new(Arc::new(storage.clone()), Arc::new(TestClock::new()), false);
        (storage, registry)
    }

    fn input() -> NewSubscription {
        NewSubscription {
            name: "Billing".to_string(),
            url: "https://billing.example.com/hooks".to_string(),
            event_types: vec!["deal.won".to_string()],
            active: None,
        }
    }

    #[tokio::test]
    async fn create_returns_secret_once() {
        let (storage, registry) = registry();

        let created = registry.create(input()).await.unwrap();

        assert_eq!(created.secret.len(), SECRET_LENGTH);
        let stored = storage.subscription(created.id).await.unwrap();
        assert_eq!(stored.secret, created.secret);
        assert!(stored.active);

        let view = serde_json::to_value(registry.get(created.id).await.unwrap()).unwrap();
        assert!(view.get("secret").is_none());
    }

    #[tokio::test]
    async fn create_rejects_invalid_input() {
        let (storage, registry) = registry();

        let bad_url = NewSubscription { url: "nope".to_string(), ..input() };
        assert!(matches!(
            registry.create(bad_url).await,
            Err(DeliveryError::InvalidUrl { .. })
        ));

        let no_events = NewSubscription { event_types: vec![], ..input() };
        assert!(matches!(
            registry.create(no_events).await,
            Err(DeliveryError::InvalidEventTypes { .. })
        ));

        let unknown = NewSubscription { event_types: vec!["deal.closed".to_string()], ..input() };
        assert!(registry.create(unknown).await.is_err());

        assert!(registry.list().await.unwrap().is_empty());
        assert!(storage.deliveries().await.is_empty());
    }

    #[tokio::test]
    async fn regenerate_replaces_secret() {
        let (storage, registry) = registry();
        let created = registry.create(input()).await.unwrap();

        let secret = registry.regenerate_secret(created.id).await.unwrap();

        assert_ne!(secret, created.secret);
        assert_eq!(storage.subscription(created.id).await.unwrap().secret, secret);
    }

    #[tokio::test]
    async fn update_revalidates_and_reactivates() {
        let (storage, registry) = registry();
        let created = registry.create(input()).await.unwrap();

        let bad = SubscriptionPatch { url: Some("ftp://x".to_string()), ..Default::default() };
        assert!(registry.update(created.id, bad).await.is_err());

        let mut stored = storage.subscription(created.id).await.unwrap();
        stored.active = false;
        stored.failure_count = 10;
        storage.add_subscription(stored).await;

        let reactivate = SubscriptionPatch { active: Some(true), ..Default::default() };
        let view = registry.update(created.id, reactivate).await.unwrap();
        assert!(view.active);
        assert_eq!(view.failure_count, 0);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let (_storage, registry) = registry();
        let id = SubscriptionId::new();

        assert!(matches!(registry.get(id).await, Err(DeliveryError::SubscriptionNotFound { .. })));
        assert!(matches!(registry.delete(id).await, Err(DeliveryError::SubscriptionNotFound { .. })));
        assert!(registry.regenerate_secret(id).await.is_err());
        let patch = SubscriptionPatch { name: Some("x".to_string()), ..Default::default() };
        assert!(registry.update(id, patch).await.is_err());
    }
}
