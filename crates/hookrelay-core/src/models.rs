//! Domain models and strongly-typed identifiers.
//!
//! Defines webhook subscriptions, deliveries and their attempt history,
//! plus the newtype ID wrappers and database encodings shared by the
//! repositories and the delivery engine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Default page size for delivery history queries.
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Largest page size a history query may request.
pub const MAX_PAGE_SIZE: i64 = 200;

/// Strongly-typed subscription identifier.
///
/// # Example
///
/// ```
/// use hookrelay_core::models::SubscriptionId;
/// let id = SubscriptionId::new();
/// println!("subscription {id}");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    /// Creates a new random subscription ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SubscriptionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for SubscriptionId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for SubscriptionId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for SubscriptionId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed delivery identifier.
///
/// Sent to receivers as the envelope `id` and the `X-Webhook-Delivery-Id`
/// header, so it stays stable across every retry of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(pub Uuid);

impl DeliveryId {
    /// Creates a new random delivery ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeliveryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for DeliveryId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for DeliveryId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DeliveryId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for DeliveryId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// A registered external endpoint and what it listens to.
///
/// The signing secret is only ever serialized out through
/// [`WebhookSubscription::secret`] at creation or regeneration time; the
/// `Serialize` impl skips it and read paths hand out [`SubscriptionView`].
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookSubscription {
    /// Unique identifier for this subscription.
    pub id: SubscriptionId,

    /// Human-readable name.
    pub name: String,

    /// Destination URL receiving POST requests.
    pub url: String,

    /// HMAC signing secret.
    #[serde(skip_serializing)]
    pub secret: String,

    /// Subscribed catalog event names.
    pub event_types: Vec<String>,

    /// Whether deliveries are attempted.
    pub active: bool,

    /// Consecutive permanently failed deliveries.
    pub failure_count: i32,

    /// When an event last fanned out to this subscription.
    pub last_triggered_at: Option<DateTime<Utc>>,

    /// When this subscription was created.
    pub created_at: DateTime<Utc>,

    /// When this subscription was last updated.
    pub updated_at: DateTime<Utc>,
}

impl WebhookSubscription {
    /// Returns true if the subscription listens to `event_type`.
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.event_types.iter().any(|t| t == event_type)
    }

    /// Returns the secret-free read model.
    pub fn view(&self) -> SubscriptionView {
        SubscriptionView {
            id: self.id,
            name: self.name.clone(),
            url: self.url.clone(),
            event_types: self.event_types.clone(),
            active: self.active,
            failure_count: self.failure_count,
            last_triggered_at: self.last_triggered_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Read model for a subscription. Never carries the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionView {
    /// Subscription ID.
    pub id: SubscriptionId,
    /// Human-readable name.
    pub name: String,
    /// Destination URL.
    pub url: String,
    /// Subscribed catalog event names.
    pub event_types: Vec<String>,
    /// Whether deliveries are attempted.
    pub active: bool,
    /// Consecutive permanently failed deliveries.
    pub failure_count: i32,
    /// When an event last fanned out to this subscription.
    pub last_triggered_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl From<WebhookSubscription> for SubscriptionView {
    fn from(subscription: WebhookSubscription) -> Self {
        subscription.view()
    }
}

/// Partial update of a subscription. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPatch {
    /// New name.
    #[serde(default)]
    pub name: Option<String>,
    /// New destination URL.
    #[serde(default)]
    pub url: Option<String>,
    /// New set of subscribed event names.
    #[serde(default)]
    pub event_types: Option<Vec<String>>,
    /// New active flag. `Some(true)` on an inactive subscription also
    /// resets its failure counter.
    #[serde(default)]
    pub active: Option<bool>,
}

impl SubscriptionPatch {
    /// Returns true if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.url.is_none()
            && self.event_types.is_none()
            && self.active.is_none()
    }
}

/// Failure counter state returned by an atomic increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct FailureCount {
    /// Counter value after the increment.
    pub failure_count: i32,
    /// Active flag after the increment.
    pub active: bool,
}

/// Delivery lifecycle status.
///
/// ```text
/// pending --2xx--------------------------> success
///    |  ^
///    |  +-- retry scheduled (attempts < max)
///    +--------------------------------------> failed
///         (max attempts, or subscription gone)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Waiting for its next attempt.
    Pending,
    /// Receiver acknowledged with a 2xx. Terminal.
    Success,
    /// Gave up. Terminal.
    Failed,
}

impl DeliveryStatus {
    /// Returns true for `Success` and `Failed`.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Returns the stored text form.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl sqlx::Type<PgDb> for DeliveryStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DeliveryStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid delivery status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for DeliveryStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// One logical notification of one event to one subscription.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Delivery {
    /// Unique identifier for this delivery.
    pub id: DeliveryId,

    /// Owning subscription.
    pub subscription_id: SubscriptionId,

    /// Catalog event name, or `test` for the manual trigger.
    pub event_type: String,

    /// Payload captured at enqueue time.
    pub payload: Json<serde_json::Value>,

    /// Lifecycle status.
    pub status: DeliveryStatus,

    /// Completed HTTP attempts in the current cycle.
    pub attempts: i32,

    /// When the next attempt is due, while waiting on backoff.
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Status code of the most recent response.
    pub last_response_code: Option<i32>,

    /// Truncated body of the most recent response.
    pub last_response_body: Option<String>,

    /// Error text of the most recent failure.
    pub last_error: Option<String>,

    /// When the delivery was enqueued.
    pub created_at: DateTime<Utc>,

    /// When the receiver acknowledged it.
    pub delivered_at: Option<DateTime<Utc>>,

    /// When the row last changed.
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    /// Creates a pending delivery with no attempts.
    pub fn new_pending(
        subscription_id: SubscriptionId,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DeliveryId::new(),
            subscription_id,
            event_type: event_type.into(),
            payload: Json(payload),
            status: DeliveryStatus::Pending,
            attempts: 0,
            next_retry_at: None,
            last_response_code: None,
            last_response_body: None,
            last_error: None,
            created_at: now,
            delivered_at: None,
            updated_at: now,
        }
    }
}

/// Immutable audit record of one HTTP attempt.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryAttempt {
    /// Unique identifier for this attempt.
    pub id: Uuid,
    /// Delivery the attempt belongs to.
    pub delivery_id: DeliveryId,
    /// Subscription the attempt was sent for.
    pub subscription_id: SubscriptionId,
    /// 1-based attempt number within the delivery cycle.
    pub attempt_number: i32,
    /// HTTP status, if a response arrived.
    pub response_status: Option<i32>,
    /// Truncated response body, if a response arrived.
    pub response_body: Option<String>,
    /// Failure description for non-2xx and transport failures.
    pub error_message: Option<String>,
    /// Whether the receiver answered 2xx.
    pub succeeded: bool,
    /// Wall-clock duration of the request.
    pub duration_ms: i64,
    /// When the attempt started.
    pub attempted_at: DateTime<Utc>,
}

/// Compare-and-set update of a pending delivery.
///
/// Applied only while the delivery is still pending with exactly
/// `expected_attempts` attempts, so a duplicate executor run cannot move a
/// delivery twice or revive a terminal one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTransition {
    /// Attempts count observed before the attempt started.
    pub expected_attempts: i32,
    /// Attempts count to store.
    pub attempts: i32,
    /// Response status to store.
    pub response_code: Option<i32>,
    /// Response body to store.
    pub response_body: Option<String>,
    /// Error text to store.
    pub error: Option<String>,
    /// Time of the transition.
    pub at: DateTime<Utc>,
}

/// Filter and page for delivery history listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryQuery {
    /// Only return deliveries in this status.
    #[serde(default)]
    pub status: Option<DeliveryStatus>,
    /// Page size.
    #[serde(default = "default_page_size")]
    pub limit: i64,
    /// Rows to skip.
    #[serde(default)]
    pub offset: i64,
}

impl DeliveryQuery {
    /// Clamps the page into the accepted range.
    pub fn normalized(self) -> Self {
        Self {
            status: self.status,
            limit: self.limit.clamp(1, MAX_PAGE_SIZE),
            offset: self.offset.max(0),
        }
    }
}

impl Default for DeliveryQuery {
    fn default() -> Self {
        Self { status: None, limit: DEFAULT_PAGE_SIZE, offset: 0 }
    }
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription() -> WebhookSubscription {
        let now = Utc::now();
        WebhookSubscription {
            id: SubscriptionId::new(),
            name: "crm sync".to_string(),
            url: "https://example.com/hooks".to_string(),
            secret: "s3cr3t".repeat(8),
            event_types: vec!["contact.created".to_string(), "deal.won".to_string()],
            active: true,
            failure_count: 0,
            last_triggered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn serialized_subscription_omits_secret() {
        let json = serde_json::to_value(subscription()).unwrap();
        assert!(json.get("secret").is_none());
        assert_eq!(json["event_types"][1], "deal.won");
    }

    #[test]
    fn view_matches_subscription_fields() {
        let sub = subscription();
        let view = sub.view();
        assert_eq!(view.id, sub.id);
        assert_eq!(view.event_types, sub.event_types);
        assert!(sub.subscribes_to("deal.won"));
        assert!(!sub.subscribes_to("deal.lost"));
    }

    #[test]
    fn terminal_statuses() {
        assert!(!DeliveryStatus::Pending.is_terminal());
        assert!(DeliveryStatus::Success.is_terminal());
        assert!(DeliveryStatus::Failed.is_terminal());
        assert_eq!(DeliveryStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn new_delivery_starts_pending() {
        let now = Utc::now();
        let delivery = Delivery::new_pending(
            SubscriptionId::new(),
            "contact.created",
            serde_json::json!({"id": "c1"}),
            now,
        );
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert_eq!(delivery.attempts, 0);
        assert_eq!(delivery.payload.0["id"], "c1");
        assert!(delivery.next_retry_at.is_none());
    }

    #[test]
    fn query_is_clamped() {
        let query = DeliveryQuery { status: None, limit: 10_000, offset: -4 }.normalized();
        assert_eq!(query.limit, MAX_PAGE_SIZE);
        assert_eq!(query.offset, 0);

        let query = DeliveryQuery { status: None, limit: 0, offset: 3 }.normalized();
        assert_eq!(query.limit, 1);
    }

    #[test]
    fn empty_patch_detected() {
        assert!(SubscriptionPatch::default().is_empty());
        assert!(!SubscriptionPatch { active: Some(false), ..Default::default() }.is_empty());
    }
}
