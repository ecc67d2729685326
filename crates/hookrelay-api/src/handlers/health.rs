//! Health check handler for service monitoring.
//!
//! Reports storage connectivity and the engine's delivery counters.

use std::{sync::Arc, time::Instant};

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use hookrelay_core::Clock;
use hookrelay_delivery::{EngineStats, WebhookEngine};
use serde::Serialize;
use tracing::{debug, error, instrument};

use crate::AppState;

/// Health check response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service health status
    pub status: HealthStatus,
    /// Timestamp when health check was performed
    pub timestamp: DateTime<Utc>,
    /// Individual component health checks
    pub checks: HealthChecks,
    /// Delivery engine counters
    pub engine: EngineStats,
    /// Service version information
    pub version: String,
}

/// Overall health status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Storage reachable but the engine is shutting down
    Degraded,
    /// Critical systems failing
    Unhealthy,
}

/// Individual component health check results.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Database connectivity
    pub database: ComponentHealth,
}

/// Health status for individual components.
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    /// Component status
    pub status: ComponentStatus,
    /// Optional error message if unhealthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Response time in milliseconds
    pub response_time_ms: u64,
}

/// Component-level health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is healthy
    Up,
    /// Component is experiencing issues
    Down,
}

/// Health service that encapsulates the clock for testable timestamps.
pub struct HealthService {
    clock: Arc<dyn Clock>,
}

impl HealthService {
    /// Creates a new health service with the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Checks storage and collects engine counters.
    pub async fn health_check(&self, engine: &WebhookEngine) -> HealthResponse {
        debug!("performing health check");

        let started = Instant::now();
        let database = match engine.health_check().await {
            Ok(()) => ComponentHealth {
                status: ComponentStatus::Up,
                message: None,
                response_time_ms: elapsed_ms(started),
            },
            Err(e) => {
                error!(error = %e, "database health check failed");
                ComponentHealth {
                    status: ComponentStatus::Down,
                    message: Some(format!("Database connection failed: {e}")),
                    response_time_ms: elapsed_ms(started),
                }
            },
        };

        let status = match (database.status, engine.is_shutting_down()) {
            (ComponentStatus::Down, _) => HealthStatus::Unhealthy,
            (ComponentStatus::Up, true) => HealthStatus::Degraded,
            (ComponentStatus::Up, false) => HealthStatus::Healthy,
        };

        HealthResponse {
            status,
            timestamp: self.clock.now(),
            checks: HealthChecks { database },
            engine: engine.stats().await,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Health check endpoint handler.
#[instrument(name = "health_check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Response {
    let response = HealthService::new(state.clock.clone()).health_check(&state.engine).await;

    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    debug!(status = ?response.status, "health check completed");

    (status_code, Json(response)).into_response()
}
