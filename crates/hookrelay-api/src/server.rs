//! HTTP server configuration and request routing.
//!
//! Requests flow through middleware in order:
//! 1. Request ID assignment
//! 2. Request/response logging
//! 3. Timeout enforcement
//! 4. Handler execution
//!
//! # Graceful Shutdown
//!
//! On CTRL+C or SIGTERM the server stops accepting connections and drains
//! in-flight requests. The caller then shuts the delivery engine down.

use std::{net::SocketAddr, time::Duration};

use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{handlers, AppState};

/// Header carrying the request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest caller-supplied request id that is echoed back.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Creates the Axum router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
///
/// use hookrelay_api::{server::create_router, AppState};
///
/// fn build(state: AppState) {
///     let app = create_router(state, Duration::from_secs(30));
///     // Serve the app...
/// }
/// ```
pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    let subscription_routes = Router::new()
        .route(
            "/subscriptions",
            get(handlers::list_subscriptions).post(handlers::create_subscription),
        )
        .route(
            "/subscriptions/{id}",
            get(handlers::get_subscription)
                .patch(handlers::update_subscription)
                .delete(handlers::delete_subscription),
        )
        .route("/subscriptions/{id}/secret", post(handlers::regenerate_secret))
        .route("/subscriptions/{id}/test", post(handlers::test_webhook))
        .route("/subscriptions/{id}/retry-failed", post(handlers::retry_failed_deliveries))
        .route("/subscriptions/{id}/deliveries", get(handlers::list_deliveries));

    let delivery_routes = Router::new()
        .route("/deliveries/{id}", get(handlers::get_delivery))
        .route("/deliveries/{id}/retry", post(handlers::retry_delivery));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/events", post(handlers::enqueue_event))
        .merge(subscription_routes)
        .merge(delivery_routes)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Middleware to tag every request and response with a request id.
///
/// A well-formed incoming `X-Request-Id` is kept, otherwise a fresh UUID is
/// assigned.
async fn inject_request_id(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty() && value.len() <= MAX_REQUEST_ID_LEN)
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);

    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, header_value);
    }

    response
}

/// Starts the HTTP server with graceful shutdown support.
///
/// Returns once a shutdown signal has been received and in-flight requests
/// have drained.
///
/// # Errors
///
/// Returns `std::io::Error` if the address cannot be bound.
pub async fn start_server(
    state: AppState,
    addr: SocketAddr,
    request_timeout: Duration,
) -> Result<(), std::io::Error> {
    let app = create_router(state, request_timeout);

    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("HTTP server listening on {}", actual_addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("HTTP server stopped gracefully");
    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C, starting graceful shutdown");
        },
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    warn!("Draining in-flight requests before stopping the delivery engine");
}
