//! hookrelay administrative HTTP API.
//!
//! Exposes subscription management, event submission and delivery history
//! over JSON, plus the service configuration loader shared with the binary.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use hookrelay_core::Clock;
use hookrelay_delivery::WebhookEngine;

pub mod config;
pub mod handlers;
pub mod server;

pub use config::Config;
pub use server::{create_router, start_server};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// The running webhook engine.
    pub engine: Arc<WebhookEngine>,
    /// Clock used for response timestamps.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Creates application state.
    pub fn new(engine: Arc<WebhookEngine>, clock: Arc<dyn Clock>) -> Self {
        Self { engine, clock }
    }
}
