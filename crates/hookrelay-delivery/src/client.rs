//! HTTP client for webhook delivery with configurable timeouts.
//!
//! Builds the signed envelope, POSTs it and classifies the result into an
//! [`AttemptOutcome`]. Nothing here returns an error for a failed attempt:
//! non-2xx responses and transport failures are outcomes the executor hands
//! to the retry scheduler.

use std::time::{Duration, Instant};

use bytes::Bytes;
use hookrelay_core::{Delivery, DeliveryId, SubscriptionId, WebhookSubscription};
use reqwest::Response;
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::{
    error::{DeliveryError, Result},
    signing,
};

/// Characters of the response body kept for history and diagnostics.
pub const RESPONSE_BODY_LIMIT: usize = 1000;

/// Bytes read off the wire before truncation. A UTF-8 character is at most
/// four bytes, so this always covers `RESPONSE_BODY_LIMIT` characters.
const MAX_BODY_BYTES: usize = RESPONSE_BODY_LIMIT * 4;

/// Header carrying `sha256=<hex>` over the body.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
/// Header carrying the event name.
pub const EVENT_HEADER: &str = "X-Webhook-Event";
/// Header carrying the envelope timestamp in milliseconds.
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";
/// Header carrying the delivery id, stable across retries.
pub const DELIVERY_ID_HEADER: &str = "X-Webhook-Delivery-Id";

/// Configuration for the webhook delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout for a single HTTP attempt.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: default_user_agent(),
            max_redirects: 3,
            verify_tls: true,
        }
    }
}

/// Returns `hookrelay/<crate version>`.
pub fn default_user_agent() -> String {
    format!("hookrelay/{}", env!("CARGO_PKG_VERSION"))
}

/// JSON body POSTed to receivers.
#[derive(Debug, Serialize)]
pub struct WebhookEnvelope<'a> {
    /// Delivery id.
    pub id: DeliveryId,
    /// Event name.
    pub event: &'a str,
    /// Milliseconds since the Unix epoch, equal to `X-Webhook-Timestamp`.
    pub timestamp: i64,
    /// Payload captured at enqueue time.
    pub data: &'a serde_json::Value,
}

/// A fully serialized and signed request, ready to send.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    /// Delivery being attempted.
    pub delivery_id: DeliveryId,
    /// Subscription receiving it.
    pub subscription_id: SubscriptionId,
    /// Destination URL.
    pub url: String,
    /// Event name.
    pub event_type: String,
    /// Envelope timestamp in milliseconds.
    pub timestamp_ms: i64,
    /// 1-based attempt number.
    pub attempt_number: i32,
    /// Serialized envelope. These are exactly the signed bytes.
    pub body: Bytes,
    /// `sha256=<hex>` signature header value.
    pub signature: String,
}

impl SignedRequest {
    /// Serializes the envelope once and signs the resulting bytes.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the payload cannot be serialized or the
    /// secret cannot key an HMAC.
    pub fn build(
        delivery: &Delivery,
        subscription: &WebhookSubscription,
        attempt_number: i32,
        timestamp_ms: i64,
    ) -> Result<Self> {
        let envelope = WebhookEnvelope {
            id: delivery.id,
            event: &delivery.event_type,
            timestamp: timestamp_ms,
            data: &delivery.payload.0,
        };

        let body = serde_json::to_vec(&envelope)
            .map_err(|e| DeliveryError::validation(format!("failed to serialize envelope: {e}")))?;
        let signature = signing::signature_header(&subscription.secret, &body)
            .map_err(|e| DeliveryError::validation(e.to_string()))?;

        Ok(Self {
            delivery_id: delivery.id,
            subscription_id: subscription.id,
            url: subscription.url.clone(),
            event_type: delivery.event_type.clone(),
            timestamp_ms,
            attempt_number,
            body: Bytes::from(body),
            signature,
        })
    }
}

/// Result of one HTTP attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Receiver answered 2xx.
    Success {
        /// HTTP status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },
    /// Receiver answered outside 2xx.
    HttpError {
        /// HTTP status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },
    /// No response: connect failure, timeout, TLS or protocol error.
    TransportError {
        /// Description of the failure.
        message: String,
    },
}

impl AttemptOutcome {
    /// Returns true for a 2xx response.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Status code, if a response arrived.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Success { status, .. } | Self::HttpError { status, .. } => Some(*status),
            Self::TransportError { .. } => None,
        }
    }

    /// Truncated response body, if a response arrived.
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Success { body, .. } | Self::HttpError { body, .. } => Some(body),
            Self::TransportError { .. } => None,
        }
    }

    /// Failure description stored as the delivery's last error.
    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Success { .. } => None,
            Self::HttpError { status, .. } => Some(format!("HTTP {status}")),
            Self::TransportError { message } => Some(message.clone()),
        }
    }
}

/// Result of [`DeliveryClient::send`] with its timing.
#[derive(Debug, Clone)]
pub struct AttemptReport {
    /// Classified outcome.
    pub outcome: AttemptOutcome,
    /// Wall-clock duration of the request.
    pub duration: Duration,
}

/// HTTP client for webhook delivery.
///
/// Wraps a pooled `reqwest::Client`; cheap to clone and shared by every
/// worker.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be configured with the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// POSTs a signed request and classifies the result.
    pub async fn send(&self, request: &SignedRequest) -> AttemptReport {
        let span = info_span!(
            "webhook_attempt",
            delivery_id = %request.delivery_id,
            subscription_id = %request.subscription_id,
            event = %request.event_type,
            attempt = request.attempt_number,
        );

        async move {
            let start_time = Instant::now();
            tracing::debug!(url = %request.url, "sending webhook");

            let result = self
                .client
                .post(&request.url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .header(SIGNATURE_HEADER, &request.signature)
                .header(EVENT_HEADER, &request.event_type)
                .header(TIMESTAMP_HEADER, request.timestamp_ms.to_string())
                .header(DELIVERY_ID_HEADER, request.delivery_id.to_string())
                .body(request.body.clone())
                .send()
                .await;

            let outcome = match result {
                Ok(response) => self.classify(response).await,
                Err(e) => {
                    let message = self.transport_message(&e);
                    tracing::warn!(
                        duration_ms = start_time.elapsed().as_millis(),
                        error = %message,
                        "webhook request failed"
                    );
                    AttemptOutcome::TransportError { message }
                },
            };

            let duration = start_time.elapsed();
            match &outcome {
                AttemptOutcome::Success { status, .. } => {
                    tracing::info!(status, duration_ms = duration.as_millis(), "webhook delivered");
                },
                AttemptOutcome::HttpError { status, .. } => {
                    tracing::warn!(
                        status,
                        duration_ms = duration.as_millis(),
                        "receiver returned non-success status"
                    );
                },
                AttemptOutcome::TransportError { .. } => {},
            }

            AttemptReport { outcome, duration }
        }
        .instrument(span)
        .await
    }

    async fn classify(&self, response: Response) -> AttemptOutcome {
        let status = response.status();
        let body = read_body(response).await;

        if status.is_success() {
            AttemptOutcome::Success { status: status.as_u16(), body }
        } else {
            AttemptOutcome::HttpError { status: status.as_u16(), body }
        }
    }

    fn transport_message(&self, error: &reqwest::Error) -> String {
        if error.is_timeout() {
            format!("request timed out after {}ms", self.config.timeout.as_millis())
        } else if error.is_connect() {
            format!("connection failed: {error}")
        } else {
            error.to_string()
        }
    }
}

/// Reads at most `MAX_BODY_BYTES` and keeps the first
/// `RESPONSE_BODY_LIMIT` characters.
async fn read_body(mut response: Response) -> String {
    let mut buffer: Vec<u8> = Vec::new();

    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let remaining = MAX_BODY_BYTES - buffer.len();
                buffer.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
                if buffer.len() >= MAX_BODY_BYTES {
                    break;
                }
            },
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "failed to read response body");
                break;
            },
        }
    }

    truncate_chars(&String::from_utf8_lossy(&buffer), RESPONSE_BODY_LIMIT)
}

/// Returns the first `limit` characters of `text`.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
