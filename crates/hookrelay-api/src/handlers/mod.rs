//! HTTP request handlers for the hookrelay API.
//!
//! Every handler takes its path, query and body extractors as `Result`s so
//! malformed input is reported through [`ApiError`] with the same JSON shape
//! as domain errors:
//!
//! ```json
//! { "error": { "code": "validation", "message": "..." } }
//! ```
//!
//! # Handler Organization
//!
//! - `health` - storage ping and engine counters
//! - `events` - event submission and fan-out
//! - `subscriptions` - subscription CRUD, secret rotation, test and retry
//! - `deliveries` - delivery detail and single retry

pub mod deliveries;
pub mod error;
pub mod events;
pub mod health;
pub mod subscriptions;

pub use deliveries::{get_delivery, retry_delivery};
pub use error::{ApiError, ErrorResponse};
pub use events::enqueue_event;
pub use health::health_check;
pub use subscriptions::{
    create_subscription, delete_subscription, get_subscription, list_deliveries,
    list_subscriptions, regenerate_secret, retry_failed_deliveries, test_webhook,
    update_subscription,
};
