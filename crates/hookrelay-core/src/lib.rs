//! Core domain models and persistence for outbound webhook delivery.
//!
//! Provides strongly-typed identifiers, the subscription and delivery
//! records, the closed event catalog, a clock abstraction and the Postgres
//! repositories that the delivery engine builds on.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use catalog::{EventType, TEST_EVENT};
pub use error::{CoreError, Result};
pub use models::{
    Delivery, DeliveryAttempt, DeliveryId, DeliveryQuery, DeliveryStatus, DeliveryTransition,
    FailureCount, SubscriptionId, SubscriptionPatch, SubscriptionView, WebhookSubscription,
};
pub use time::{Clock, RealClock, TestClock};
