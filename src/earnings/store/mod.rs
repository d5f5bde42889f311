//! Durable state behind the earnings services.
//!
//! Every compound operation on the trait is atomic with respect to other callers: approvals
//! and credits serialise per trainer, status changes are compare-and-transition.

mod memory;
mod postgres;

pub use memory::MemoryEarningsStore;
pub use postgres::PgEarningsStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::gateway::AccountStatus;
use super::models::{
    BillingInterval, ConnectedAccount, FundingSource, ManualPayment, ManualPaymentStatus, Money,
    PaymentRecord, Payout, PayoutStatus, PricingPlan, Subscription,
};
use super::payouts::CreditPolicy;
use crate::error::AppResult;

#[derive(Debug, Clone)]
pub struct NewPlan {
    pub trainer_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: Money,
    pub currency: String,
    pub interval: BillingInterval,
    pub duration_weeks: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub client_id: Uuid,
    pub trainer_id: Uuid,
    pub plan_id: Uuid,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub external_ref: Option<String>,
    pub funding: FundingSource,
}

#[derive(Debug, Clone)]
pub struct NewPaymentRecord {
    pub trainer_id: Uuid,
    pub client_id: Uuid,
    pub plan_id: Uuid,
    pub external_payment_id: String,
    pub amount: Money,
    pub currency: String,
    pub receipt_url: Option<String>,
}

/// Result of inserting a payment record keyed by its external id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordInsert {
    Inserted(PaymentRecord),
    Existing(PaymentRecord),
}

impl RecordInsert {
    pub fn record(&self) -> &PaymentRecord {
        match self {
            RecordInsert::Inserted(record) | RecordInsert::Existing(record) => record,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewManualPayment {
    pub client_id: Uuid,
    pub trainer_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub amount: Money,
    pub currency: String,
    pub receipt_ref: String,
    pub external_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ManualPaymentFilter {
    pub status: Option<ManualPaymentStatus>,
    pub client_id: Option<Uuid>,
    pub trainer_id: Option<Uuid>,
}

impl ManualPaymentFilter {
    pub fn matches(&self, payment: &ManualPayment) -> bool {
        self.status.map_or(true, |status| payment.status == status)
            && self.client_id.map_or(true, |id| payment.client_id == id)
            && self.trainer_id.map_or(true, |id| payment.trainer_id == id)
    }
}

#[derive(Debug, Clone)]
pub struct NewPayout {
    pub trainer_id: Uuid,
    pub amount: Money,
    pub currency: String,
    pub method: String,
    pub destination_ref: Option<String>,
    pub notes: Option<String>,
}

/// A trainer's share to be added to what they are owed.
#[derive(Debug, Clone)]
pub struct PayoutCredit {
    pub trainer_id: Uuid,
    pub amount: Money,
    pub currency: String,
    pub method: String,
    pub destination_ref: Option<String>,
    pub policy: CreditPolicy,
}

/// Outcome of a guarded status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition<T, S = T> {
    Applied(T),
    /// Precondition failed; carries the current state.
    Stale(S),
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approval {
    pub payment: ManualPayment,
    pub payout: Payout,
}

/// key: earnings-store -> persistence seam
#[async_trait]
pub trait EarningsStore: Send + Sync {
    async fn insert_plan(&self, plan: NewPlan) -> AppResult<PricingPlan>;
    async fn get_plan(&self, plan_id: Uuid) -> AppResult<Option<PricingPlan>>;
    /// Persists the mutable fields of `plan` and returns the stored row.
    async fn update_plan(&self, plan: &PricingPlan) -> AppResult<PricingPlan>;
    async fn list_plans(&self, trainer_id: Uuid, include_inactive: bool)
        -> AppResult<Vec<PricingPlan>>;

    /// Creates the subscription for `draft.funding`, or returns the one that source already
    /// funds. Links the funding record back to the subscription.
    async fn fund_subscription(&self, draft: NewSubscription) -> AppResult<Subscription>;
    async fn get_subscription(&self, subscription_id: Uuid) -> AppResult<Option<Subscription>>;
    /// Moves an ACTIVE subscription to CANCELED; a canceled one is returned unchanged.
    async fn cancel_subscription(
        &self,
        subscription_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Subscription>>;
    /// Cancels every ACTIVE subscription carrying `external_ref`, returning those changed.
    async fn cancel_subscriptions_by_external_ref(
        &self,
        external_ref: &str,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<Subscription>>;
    async fn list_subscriptions_for_client(&self, client_id: Uuid) -> AppResult<Vec<Subscription>>;
    async fn list_subscriptions_for_trainer(
        &self,
        trainer_id: Uuid,
        active_only: bool,
    ) -> AppResult<Vec<Subscription>>;

    async fn insert_payment_record(&self, record: NewPaymentRecord) -> AppResult<RecordInsert>;
    async fn find_payment_record(
        &self,
        external_payment_id: &str,
    ) -> AppResult<Option<PaymentRecord>>;
    async fn list_payment_records_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> AppResult<Vec<PaymentRecord>>;
    async fn list_payment_records(&self, trainer_id: Option<Uuid>)
        -> AppResult<Vec<PaymentRecord>>;

    async fn insert_manual_payment(&self, payment: NewManualPayment) -> AppResult<ManualPayment>;
    async fn get_manual_payment(&self, payment_id: Uuid) -> AppResult<Option<ManualPayment>>;
    async fn list_manual_payments(
        &self,
        filter: ManualPaymentFilter,
    ) -> AppResult<Vec<ManualPayment>>;
    /// PENDING -> APPROVED together with the payout credit, serialised per trainer.
    async fn approve_manual_payment(
        &self,
        payment_id: Uuid,
        admin_id: Uuid,
        at: DateTime<Utc>,
        credit: &PayoutCredit,
    ) -> AppResult<Transition<Approval, ManualPayment>>;
    async fn reject_manual_payment(
        &self,
        payment_id: Uuid,
        admin_id: Uuid,
        at: DateTime<Utc>,
        reason: Option<String>,
    ) -> AppResult<Transition<ManualPayment>>;

    async fn credit_payout(&self, credit: &PayoutCredit) -> AppResult<Payout>;
    async fn insert_payout(&self, payout: NewPayout) -> AppResult<Payout>;
    async fn get_payout(&self, payout_id: Uuid) -> AppResult<Option<Payout>>;
    async fn mark_payout_paid(
        &self,
        payout_id: Uuid,
        admin_id: Uuid,
        at: DateTime<Utc>,
        note: Option<String>,
    ) -> AppResult<Transition<Payout>>;
    /// Removes a PENDING payout; Applied carries the deleted row.
    async fn delete_pending_payout(&self, payout_id: Uuid) -> AppResult<Transition<Payout>>;
    async fn list_payouts(
        &self,
        trainer_id: Option<Uuid>,
        status: Option<PayoutStatus>,
    ) -> AppResult<Vec<Payout>>;

    async fn get_account(&self, owner_id: Uuid) -> AppResult<Option<ConnectedAccount>>;
    /// Inserts unless the owner already has an account, returning whichever is stored.
    async fn insert_account(&self, account: ConnectedAccount) -> AppResult<ConnectedAccount>;
    async fn update_account_status(
        &self,
        account_ref: &str,
        status: &AccountStatus,
        at: DateTime<Utc>,
    ) -> AppResult<Option<ConnectedAccount>>;
}
