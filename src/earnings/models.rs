use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Amounts are integer minor currency units (cents) throughout the ledger.
pub type Money = i64;

/// Largest single amount the ledger accepts (one billion major units).
pub const MAX_AMOUNT: Money = 100_000_000_000;

/// Raised when a persisted status or interval string is not one the ledger knows.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    OneTime,
    Week,
    Month,
}

text_enum!(BillingInterval, "billing interval", {
    OneTime => "one_time",
    Week => "week",
    Month => "month",
});

/// key: pricing-plan -> trainer-owned offer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingPlan {
    pub id: Uuid,
    pub trainer_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: Money,
    pub currency: String,
    pub interval: BillingInterval,
    pub duration_weeks: Option<i32>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    Canceled,
}

text_enum!(SubscriptionStatus, "subscription status", {
    Active => "ACTIVE",
    Canceled => "CANCELED",
});

/// What paid for a subscription. Every subscription names exactly one funding source, and a
/// funding source funds at most one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum FundingSource {
    GatewayPayment(Uuid),
    ManualPayment(Uuid),
}

impl FundingSource {
    pub fn kind(&self) -> &'static str {
        match self {
            FundingSource::GatewayPayment(_) => "gateway_payment",
            FundingSource::ManualPayment(_) => "manual_payment",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            FundingSource::GatewayPayment(id) | FundingSource::ManualPayment(id) => *id,
        }
    }

    pub fn from_parts(kind: &str, id: Uuid) -> Result<Self, UnknownVariant> {
        match kind {
            "gateway_payment" => Ok(FundingSource::GatewayPayment(id)),
            "manual_payment" => Ok(FundingSource::ManualPayment(id)),
            other => Err(UnknownVariant {
                kind: "funding source",
                value: other.to_string(),
            }),
        }
    }
}

/// key: subscription -> client access to a trainer offer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub client_id: Uuid,
    pub trainer_id: Uuid,
    pub plan_id: Uuid,
    pub status: SubscriptionStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub external_ref: Option<String>,
    pub funding: FundingSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_party(&self, user_id: Uuid) -> bool {
        self.client_id == user_id || self.trainer_id == user_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Succeeded,
}

text_enum!(PaymentStatus, "payment status", {
    Succeeded => "succeeded",
});

/// key: payment-record -> durable gateway payment, keyed by external id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub trainer_id: Uuid,
    pub client_id: Uuid,
    pub plan_id: Uuid,
    pub external_payment_id: String,
    pub amount: Money,
    pub currency: String,
    pub status: PaymentStatus,
    pub receipt_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PaymentRecord {
    /// A durable payment whose subscription was never created.
    pub fn needs_reconciliation(&self) -> bool {
        self.subscription_id.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManualPaymentStatus {
    Pending,
    Approved,
    Rejected,
}

text_enum!(ManualPaymentStatus, "manual payment status", {
    Pending => "PENDING",
    Approved => "APPROVED",
    Rejected => "REJECTED",
});

impl ManualPaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ManualPaymentStatus::Pending)
    }
}

/// key: manual-payment -> client receipt awaiting admin disposition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualPayment {
    pub id: Uuid,
    pub client_id: Uuid,
    pub trainer_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub amount: Money,
    pub currency: String,
    pub receipt_ref: String,
    pub external_ref: Option<String>,
    pub status: ManualPaymentStatus,
    pub decided_by: Option<Uuid>,
    pub decided_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub subscription_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutStatus {
    Pending,
    Paid,
}

text_enum!(PayoutStatus, "payout status", {
    Pending => "PENDING",
    Paid => "PAID",
});

/// key: payout -> amount owed to a trainer and its disbursement state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub id: Uuid,
    pub trainer_id: Uuid,
    pub amount: Money,
    pub currency: String,
    pub status: PayoutStatus,
    pub method: String,
    pub destination_ref: Option<String>,
    pub notes: Option<String>,
    pub paid_by: Option<Uuid>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// key: connected-account -> trainer merchant account at the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedAccount {
    pub owner_id: Uuid,
    pub account_ref: String,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
