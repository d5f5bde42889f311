//! Contract with the external card-payment gateway.
//!
//! The ledger only depends on [`PaymentGatewayPort`]; the HTTP implementation lives in
//! `adapters.rs` and tests substitute their own double.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use super::models::Money;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway api error status={status} body={body}")]
    Api { status: u16, body: String },
    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),
    #[error("malformed webhook event: {0}")]
    MalformedEvent(String),
    #[error("webhook signature verification failed")]
    Signature,
    #[error("invalid gateway reference `{0}`")]
    InvalidReference(String),
}

impl GatewayError {
    /// Transport failures, throttling and 5xx answers are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Http(_) => true,
            GatewayError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Gateway object ids (`pi_..`, `acct_..`, `sub_..`) are plain `[A-Za-z0-9_]` tokens. Anything
/// else must never be spliced into a request path.
pub fn is_valid_reference(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 255
        && value
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || byte == b'_')
}

/// Onboarding state of a connected merchant account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatus {
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
}

impl AccountStatus {
    pub fn label(&self) -> &'static str {
        if self.details_submitted {
            "active"
        } else {
            "pending"
        }
    }
}

/// Attribution attached to every payment intent the ledger creates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentMetadata {
    #[serde(default)]
    pub plan_id: Option<Uuid>,
    #[serde(default)]
    pub client_id: Option<Uuid>,
    #[serde(default)]
    pub trainer_id: Option<Uuid>,
}

impl IntentMetadata {
    /// Reads attribution from a gateway metadata map, ignoring keys it does not know.
    pub fn from_value(value: Option<&Value>) -> Self {
        let field = |key: &str| {
            value
                .and_then(|map| map.get(key))
                .and_then(|v| v.as_str())
                .and_then(|v| Uuid::parse_str(v).ok())
        };
        Self {
            plan_id: field("plan_id"),
            client_id: field("client_id"),
            trainer_id: field("trainer_id"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntentRequest {
    pub amount: Money,
    pub currency: String,
    pub destination_account_ref: String,
    pub platform_fee_amount: Money,
    pub metadata: IntentMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedIntent {
    pub intent_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
    #[serde(other)]
    Unknown,
}

/// A payment as the gateway reports it, whether fetched or pushed by webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentSnapshot {
    pub intent_id: String,
    pub status: IntentStatus,
    pub amount: Money,
    pub currency: String,
    pub receipt_url: Option<String>,
    pub metadata: IntentMetadata,
}

/// Webhook events the ledger acts on. Anything else is acknowledged and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    PaymentSucceeded {
        event_id: String,
        payment: IntentSnapshot,
    },
    AccountUpdated {
        event_id: String,
        account_ref: String,
        status: AccountStatus,
    },
    SubscriptionDeleted {
        event_id: String,
        external_ref: String,
    },
    Unrecognized {
        event_id: String,
        event_type: String,
    },
}

impl GatewayEvent {
    pub fn event_id(&self) -> &str {
        match self {
            GatewayEvent::PaymentSucceeded { event_id, .. }
            | GatewayEvent::AccountUpdated { event_id, .. }
            | GatewayEvent::SubscriptionDeleted { event_id, .. }
            | GatewayEvent::Unrecognized { event_id, .. } => event_id,
        }
    }
}

/// key: gateway-port -> narrow interface the ledger consumes
#[async_trait]
pub trait PaymentGatewayPort: Send + Sync {
    async fn create_connected_account(
        &self,
        owner_id: Uuid,
        email: &str,
    ) -> Result<String, GatewayError>;

    async fn create_onboarding_link(
        &self,
        account_ref: &str,
        return_url: &str,
        refresh_url: &str,
    ) -> Result<String, GatewayError>;

    async fn get_account_status(&self, account_ref: &str) -> Result<AccountStatus, GatewayError>;

    async fn create_dashboard_link(&self, account_ref: &str) -> Result<String, GatewayError>;

    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<CreatedIntent, GatewayError>;

    async fn retrieve_payment_intent(&self, intent_id: &str)
        -> Result<IntentSnapshot, GatewayError>;

    async fn cancel_subscription(&self, external_ref: &str) -> Result<(), GatewayError>;

    fn verify_webhook_signature(
        &self,
        raw_payload: &[u8],
        signature_header: &str,
        secret: &str,
    ) -> Result<GatewayEvent, GatewayError>;
}

/// Checks a `t=<unix>,v1=<hex>` signature header against the shared secret.
///
/// The signed message is `"{t}.{payload}"` under HMAC-SHA256. Several `v1` entries may be
/// present during secret rotation; any match is accepted.
pub fn verify_signature(
    raw_payload: &[u8],
    signature_header: &str,
    secret: &str,
    tolerance_secs: i64,
    now_unix: i64,
) -> Result<(), GatewayError> {
    if secret.is_empty() {
        return Err(GatewayError::Signature);
    }

    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in signature_header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = Some(value),
            "v1" => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(GatewayError::Signature)?;
    let issued_at: i64 = timestamp.parse().map_err(|_| GatewayError::Signature)?;
    let tolerance = u64::try_from(tolerance_secs).unwrap_or(0);
    if now_unix.abs_diff(issued_at) > tolerance {
        return Err(GatewayError::Signature);
    }

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| GatewayError::Signature)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(raw_payload);

    let matched = candidates.into_iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });
    if matched {
        Ok(())
    } else {
        Err(GatewayError::Signature)
    }
}

/// Produces the header [`verify_signature`] accepts.
pub fn signature_header(raw_payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(raw_payload);
    format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    )
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Deserialize)]
struct RawEventData {
    object: Value,
}

#[derive(Deserialize)]
struct RawAccount {
    id: String,
    #[serde(default)]
    charges_enabled: bool,
    #[serde(default)]
    payouts_enabled: bool,
    #[serde(default)]
    details_submitted: bool,
}

#[derive(Deserialize)]
struct RawObjectId {
    id: String,
}

/// Gateway payment intent as returned by the API or embedded in a webhook.
#[derive(Deserialize)]
pub(crate) struct RawIntent {
    id: String,
    status: IntentStatus,
    amount: Money,
    currency: String,
    #[serde(default)]
    metadata: Option<Value>,
    #[serde(default)]
    receipt_url: Option<String>,
    #[serde(default)]
    latest_charge: Option<Value>,
}

impl From<RawIntent> for IntentSnapshot {
    fn from(raw: RawIntent) -> Self {
        let receipt_url = raw.receipt_url.or_else(|| {
            raw.latest_charge
                .as_ref()
                .and_then(|charge| charge.get("receipt_url"))
                .and_then(|url| url.as_str())
                .map(str::to_string)
        });
        IntentSnapshot {
            intent_id: raw.id,
            status: raw.status,
            amount: raw.amount,
            currency: raw.currency.to_ascii_lowercase(),
            receipt_url,
            metadata: IntentMetadata::from_value(raw.metadata.as_ref()),
        }
    }
}

fn object<T: serde::de::DeserializeOwned>(event_type: &str, value: Value) -> Result<T, GatewayError> {
    serde_json::from_value(value)
        .map_err(|err| GatewayError::MalformedEvent(format!("{event_type}: {err}")))
}

/// Decodes a verified payload into the closed set of events the ledger understands.
pub fn decode_event(raw_payload: &[u8]) -> Result<GatewayEvent, GatewayError> {
    let raw: RawEvent = serde_json::from_slice(raw_payload)
        .map_err(|err| GatewayError::MalformedEvent(err.to_string()))?;
    let event_id = raw.id;
    let event = match raw.event_type.as_str() {
        "payment_intent.succeeded" => {
            let intent: RawIntent = object(&raw.event_type, raw.data.object)?;
            GatewayEvent::PaymentSucceeded {
                event_id,
                payment: intent.into(),
            }
        }
        "account.updated" => {
            let account: RawAccount = object(&raw.event_type, raw.data.object)?;
            GatewayEvent::AccountUpdated {
                event_id,
                account_ref: account.id,
                status: AccountStatus {
                    charges_enabled: account.charges_enabled,
                    payouts_enabled: account.payouts_enabled,
                    details_submitted: account.details_submitted,
                },
            }
        }
        "customer.subscription.deleted" => {
            let subscription: RawObjectId = object(&raw.event_type, raw.data.object)?;
            GatewayEvent::SubscriptionDeleted {
                event_id,
                external_ref: subscription.id,
            }
        }
        _ => GatewayEvent::Unrecognized {
            event_id,
            event_type: raw.event_type,
        },
    };
    Ok(event)
}
