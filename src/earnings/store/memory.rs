use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    Approval, EarningsStore, ManualPaymentFilter, NewManualPayment, NewPaymentRecord, NewPayout,
    NewPlan, NewSubscription, PayoutCredit, RecordInsert, Transition,
};
use crate::earnings::gateway::AccountStatus;
use crate::earnings::models::{
    ConnectedAccount, FundingSource, ManualPayment, ManualPaymentStatus, PaymentRecord,
    PaymentStatus, Payout, PayoutStatus, PricingPlan, Subscription, SubscriptionStatus,
};
use crate::earnings::payouts::{append_note, CreditPolicy};
use crate::error::{AppError, AppResult};

#[derive(Default)]
struct State {
    plans: HashMap<Uuid, PricingPlan>,
    subscriptions: HashMap<Uuid, Subscription>,
    payment_records: HashMap<Uuid, PaymentRecord>,
    records_by_external_id: HashMap<String, Uuid>,
    manual_payments: HashMap<Uuid, ManualPayment>,
    payouts: HashMap<Uuid, Payout>,
    accounts: HashMap<Uuid, ConnectedAccount>,
}

impl State {
    fn credit(&mut self, credit: &PayoutCredit, at: DateTime<Utc>) -> AppResult<Payout> {
        if credit.policy == CreditPolicy::Accumulate {
            let open = self
                .payouts
                .values_mut()
                .filter(|payout| {
                    payout.trainer_id == credit.trainer_id
                        && payout.status == PayoutStatus::Pending
                        && payout.currency == credit.currency
                })
                .min_by_key(|payout| payout.created_at);
            if let Some(payout) = open {
                payout.amount = payout
                    .amount
                    .checked_add(credit.amount)
                    .ok_or_else(|| AppError::Validation("Payout amount out of range".into()))?;
                if payout.destination_ref.is_none() {
                    payout.destination_ref = credit.destination_ref.clone();
                }
                payout.updated_at = at;
                return Ok(payout.clone());
            }
        }
        let payout = Payout {
            id: Uuid::new_v4(),
            trainer_id: credit.trainer_id,
            amount: credit.amount,
            currency: credit.currency.clone(),
            status: PayoutStatus::Pending,
            method: credit.method.clone(),
            destination_ref: credit.destination_ref.clone(),
            notes: None,
            paid_by: None,
            paid_at: None,
            created_at: at,
            updated_at: at,
        };
        self.payouts.insert(payout.id, payout.clone());
        Ok(payout)
    }
}

fn oldest_first<T, F>(mut items: Vec<T>, created_at: F) -> Vec<T>
where
    F: Fn(&T) -> DateTime<Utc>,
{
    items.sort_by_key(|item| created_at(item));
    items
}

/// key: earnings-store-memory -> single-lock in-process ledger
///
/// Every operation takes the one write lock, so compound operations are trivially atomic.
#[derive(Clone, Default)]
pub struct MemoryEarningsStore {
    state: Arc<RwLock<State>>,
}

impl MemoryEarningsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EarningsStore for MemoryEarningsStore {
    async fn insert_plan(&self, plan: NewPlan) -> AppResult<PricingPlan> {
        let now = Utc::now();
        let plan = PricingPlan {
            id: Uuid::new_v4(),
            trainer_id: plan.trainer_id,
            name: plan.name,
            description: plan.description,
            price: plan.price,
            currency: plan.currency,
            interval: plan.interval,
            duration_weeks: plan.duration_weeks,
            active: true,
            created_at: now,
            updated_at: now,
        };
        self.state.write().await.plans.insert(plan.id, plan.clone());
        Ok(plan)
    }

    async fn get_plan(&self, plan_id: Uuid) -> AppResult<Option<PricingPlan>> {
        Ok(self.state.read().await.plans.get(&plan_id).cloned())
    }

    async fn update_plan(&self, plan: &PricingPlan) -> AppResult<PricingPlan> {
        let mut state = self.state.write().await;
        let stored = state
            .plans
            .get_mut(&plan.id)
            .ok_or_else(|| AppError::not_found("Plan"))?;
        stored.name = plan.name.clone();
        stored.description = plan.description.clone();
        stored.price = plan.price;
        stored.interval = plan.interval;
        stored.duration_weeks = plan.duration_weeks;
        stored.active = plan.active;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn list_plans(
        &self,
        trainer_id: Uuid,
        include_inactive: bool,
    ) -> AppResult<Vec<PricingPlan>> {
        let state = self.state.read().await;
        let plans: Vec<PricingPlan> = state
            .plans
            .values()
            .filter(|plan| plan.trainer_id == trainer_id && (include_inactive || plan.active))
            .cloned()
            .collect();
        Ok(oldest_first(plans, |plan| plan.created_at))
    }

    async fn fund_subscription(&self, draft: NewSubscription) -> AppResult<Subscription> {
        let mut state = self.state.write().await;
        let existing = state
            .subscriptions
            .values()
            .find(|subscription| subscription.funding == draft.funding)
            .cloned();
        let subscription = match existing {
            Some(subscription) => subscription,
            None => {
                let now = Utc::now();
                let subscription = Subscription {
                    id: Uuid::new_v4(),
                    client_id: draft.client_id,
                    trainer_id: draft.trainer_id,
                    plan_id: draft.plan_id,
                    status: SubscriptionStatus::Active,
                    start_date: draft.start_date,
                    end_date: draft.end_date,
                    canceled_at: None,
                    external_ref: draft.external_ref,
                    funding: draft.funding,
                    created_at: now,
                    updated_at: now,
                };
                state
                    .subscriptions
                    .insert(subscription.id, subscription.clone());
                subscription
            }
        };
        match subscription.funding {
            FundingSource::GatewayPayment(record_id) => {
                if let Some(record) = state.payment_records.get_mut(&record_id) {
                    record.subscription_id.get_or_insert(subscription.id);
                }
            }
            FundingSource::ManualPayment(payment_id) => {
                if let Some(payment) = state.manual_payments.get_mut(&payment_id) {
                    payment.subscription_id.get_or_insert(subscription.id);
                }
            }
        }
        Ok(subscription)
    }

    async fn get_subscription(&self, subscription_id: Uuid) -> AppResult<Option<Subscription>> {
        Ok(self
            .state
            .read()
            .await
            .subscriptions
            .get(&subscription_id)
            .cloned())
    }

    async fn cancel_subscription(
        &self,
        subscription_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Subscription>> {
        let mut state = self.state.write().await;
        let Some(subscription) = state.subscriptions.get_mut(&subscription_id) else {
            return Ok(None);
        };
        if subscription.status == SubscriptionStatus::Active {
            subscription.status = SubscriptionStatus::Canceled;
            subscription.canceled_at = Some(at);
            subscription.updated_at = at;
        }
        Ok(Some(subscription.clone()))
    }

    async fn cancel_subscriptions_by_external_ref(
        &self,
        external_ref: &str,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<Subscription>> {
        let mut state = self.state.write().await;
        let mut changed = Vec::new();
        for subscription in state.subscriptions.values_mut() {
            if subscription.external_ref.as_deref() == Some(external_ref)
                && subscription.status == SubscriptionStatus::Active
            {
                subscription.status = SubscriptionStatus::Canceled;
                subscription.canceled_at = Some(at);
                subscription.updated_at = at;
                changed.push(subscription.clone());
            }
        }
        Ok(oldest_first(changed, |s| s.created_at))
    }

    async fn list_subscriptions_for_client(&self, client_id: Uuid) -> AppResult<Vec<Subscription>> {
        let state = self.state.read().await;
        let subscriptions: Vec<Subscription> = state
            .subscriptions
            .values()
            .filter(|s| s.client_id == client_id)
            .cloned()
            .collect();
        Ok(oldest_first(subscriptions, |s| s.created_at))
    }

    async fn list_subscriptions_for_trainer(
        &self,
        trainer_id: Uuid,
        active_only: bool,
    ) -> AppResult<Vec<Subscription>> {
        let state = self.state.read().await;
        let subscriptions: Vec<Subscription> = state
            .subscriptions
            .values()
            .filter(|s| {
                s.trainer_id == trainer_id
                    && (!active_only || s.status == SubscriptionStatus::Active)
            })
            .cloned()
            .collect();
        Ok(oldest_first(subscriptions, |s| s.created_at))
    }

    async fn insert_payment_record(&self, record: NewPaymentRecord) -> AppResult<RecordInsert> {
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .records_by_external_id
            .get(&record.external_payment_id)
            .and_then(|id| state.payment_records.get(id))
        {
            return Ok(RecordInsert::Existing(existing.clone()));
        }
        let stored = PaymentRecord {
            id: Uuid::new_v4(),
            subscription_id: None,
            trainer_id: record.trainer_id,
            client_id: record.client_id,
            plan_id: record.plan_id,
            external_payment_id: record.external_payment_id,
            amount: record.amount,
            currency: record.currency,
            status: PaymentStatus::Succeeded,
            receipt_url: record.receipt_url,
            created_at: Utc::now(),
        };
        state
            .records_by_external_id
            .insert(stored.external_payment_id.clone(), stored.id);
        state.payment_records.insert(stored.id, stored.clone());
        Ok(RecordInsert::Inserted(stored))
    }

    async fn find_payment_record(
        &self,
        external_payment_id: &str,
    ) -> AppResult<Option<PaymentRecord>> {
        let state = self.state.read().await;
        Ok(state
            .records_by_external_id
            .get(external_payment_id)
            .and_then(|id| state.payment_records.get(id))
            .cloned())
    }

    async fn list_payment_records_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> AppResult<Vec<PaymentRecord>> {
        let state = self.state.read().await;
        let records: Vec<PaymentRecord> = state
            .payment_records
            .values()
            .filter(|r| r.subscription_id == Some(subscription_id))
            .cloned()
            .collect();
        Ok(oldest_first(records, |r| r.created_at))
    }

    async fn list_payment_records(
        &self,
        trainer_id: Option<Uuid>,
    ) -> AppResult<Vec<PaymentRecord>> {
        let state = self.state.read().await;
        let records: Vec<PaymentRecord> = state
            .payment_records
            .values()
            .filter(|r| trainer_id.map_or(true, |id| r.trainer_id == id))
            .cloned()
            .collect();
        Ok(oldest_first(records, |r| r.created_at))
    }

    async fn insert_manual_payment(&self, payment: NewManualPayment) -> AppResult<ManualPayment> {
        let stored = ManualPayment {
            id: Uuid::new_v4(),
            client_id: payment.client_id,
            trainer_id: payment.trainer_id,
            plan_id: payment.plan_id,
            amount: payment.amount,
            currency: payment.currency,
            receipt_ref: payment.receipt_ref,
            external_ref: payment.external_ref,
            status: ManualPaymentStatus::Pending,
            decided_by: None,
            decided_at: None,
            rejection_reason: None,
            subscription_id: None,
            created_at: Utc::now(),
        };
        self.state
            .write()
            .await
            .manual_payments
            .insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_manual_payment(&self, payment_id: Uuid) -> AppResult<Option<ManualPayment>> {
        Ok(self
            .state
            .read()
            .await
            .manual_payments
            .get(&payment_id)
            .cloned())
    }

    async fn list_manual_payments(
        &self,
        filter: ManualPaymentFilter,
    ) -> AppResult<Vec<ManualPayment>> {
        let state = self.state.read().await;
        let payments: Vec<ManualPayment> = state
            .manual_payments
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        Ok(oldest_first(payments, |p| p.created_at))
    }

    async fn approve_manual_payment(
        &self,
        payment_id: Uuid,
        admin_id: Uuid,
        at: DateTime<Utc>,
        credit: &PayoutCredit,
    ) -> AppResult<Transition<Approval, ManualPayment>> {
        let mut state = self.state.write().await;
        match state.manual_payments.get(&payment_id) {
            None => return Ok(Transition::Missing),
            Some(payment) if payment.status != ManualPaymentStatus::Pending => {
                return Ok(Transition::Stale(payment.clone()));
            }
            Some(_) => {}
        }
        // Credit before the status flip; a refused credit leaves the payment PENDING.
        let payout = state.credit(credit, at)?;
        let Some(payment) = state.manual_payments.get_mut(&payment_id) else {
            return Ok(Transition::Missing);
        };
        payment.status = ManualPaymentStatus::Approved;
        payment.decided_by = Some(admin_id);
        payment.decided_at = Some(at);
        Ok(Transition::Applied(Approval {
            payment: payment.clone(),
            payout,
        }))
    }

    async fn reject_manual_payment(
        &self,
        payment_id: Uuid,
        admin_id: Uuid,
        at: DateTime<Utc>,
        reason: Option<String>,
    ) -> AppResult<Transition<ManualPayment>> {
        let mut state = self.state.write().await;
        let Some(payment) = state.manual_payments.get_mut(&payment_id) else {
            return Ok(Transition::Missing);
        };
        if payment.status != ManualPaymentStatus::Pending {
            return Ok(Transition::Stale(payment.clone()));
        }
        payment.status = ManualPaymentStatus::Rejected;
        payment.decided_by = Some(admin_id);
        payment.decided_at = Some(at);
        payment.rejection_reason = reason;
        Ok(Transition::Applied(payment.clone()))
    }

    async fn credit_payout(&self, credit: &PayoutCredit) -> AppResult<Payout> {
        self.state.write().await.credit(credit, Utc::now())
    }

    async fn insert_payout(&self, payout: NewPayout) -> AppResult<Payout> {
        let now = Utc::now();
        let stored = Payout {
            id: Uuid::new_v4(),
            trainer_id: payout.trainer_id,
            amount: payout.amount,
            currency: payout.currency,
            status: PayoutStatus::Pending,
            method: payout.method,
            destination_ref: payout.destination_ref,
            notes: payout.notes,
            paid_by: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };
        self.state
            .write()
            .await
            .payouts
            .insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_payout(&self, payout_id: Uuid) -> AppResult<Option<Payout>> {
        Ok(self.state.read().await.payouts.get(&payout_id).cloned())
    }

    async fn mark_payout_paid(
        &self,
        payout_id: Uuid,
        admin_id: Uuid,
        at: DateTime<Utc>,
        note: Option<String>,
    ) -> AppResult<Transition<Payout>> {
        let mut state = self.state.write().await;
        let Some(payout) = state.payouts.get_mut(&payout_id) else {
            return Ok(Transition::Missing);
        };
        if payout.status == PayoutStatus::Paid {
            return Ok(Transition::Stale(payout.clone()));
        }
        payout.status = PayoutStatus::Paid;
        payout.paid_by = Some(admin_id);
        payout.paid_at = Some(at);
        payout.notes = append_note(payout.notes.as_deref(), note.as_deref());
        payout.updated_at = at;
        Ok(Transition::Applied(payout.clone()))
    }

    async fn delete_pending_payout(&self, payout_id: Uuid) -> AppResult<Transition<Payout>> {
        let mut state = self.state.write().await;
        let Some(payout) = state.payouts.get(&payout_id) else {
            return Ok(Transition::Missing);
        };
        if payout.status == PayoutStatus::Paid {
            return Ok(Transition::Stale(payout.clone()));
        }
        Ok(state
            .payouts
            .remove(&payout_id)
            .map_or(Transition::Missing, Transition::Applied))
    }

    async fn list_payouts(
        &self,
        trainer_id: Option<Uuid>,
        status: Option<PayoutStatus>,
    ) -> AppResult<Vec<Payout>> {
        let state = self.state.read().await;
        let payouts: Vec<Payout> = state
            .payouts
            .values()
            .filter(|p| trainer_id.map_or(true, |id| p.trainer_id == id))
            .filter(|p| status.map_or(true, |status| p.status == status))
            .cloned()
            .collect();
        Ok(oldest_first(payouts, |p| p.created_at))
    }

    async fn get_account(&self, owner_id: Uuid) -> AppResult<Option<ConnectedAccount>> {
        Ok(self.state.read().await.accounts.get(&owner_id).cloned())
    }

    async fn insert_account(&self, account: ConnectedAccount) -> AppResult<ConnectedAccount> {
        let mut state = self.state.write().await;
        Ok(state
            .accounts
            .entry(account.owner_id)
            .or_insert(account)
            .clone())
    }

    async fn update_account_status(
        &self,
        account_ref: &str,
        status: &AccountStatus,
        at: DateTime<Utc>,
    ) -> AppResult<Option<ConnectedAccount>> {
        let mut state = self.state.write().await;
        let account = state
            .accounts
            .values_mut()
            .find(|account| account.account_ref == account_ref);
        Ok(account.map(|account| {
            account.charges_enabled = status.charges_enabled;
            account.payouts_enabled = status.payouts_enabled;
            account.details_submitted = status.details_submitted;
            account.status = status.label().to_string();
            account.updated_at = at;
            account.clone()
        }))
    }
}
