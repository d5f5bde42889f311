use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use super::catalog::PricingCatalog;
use super::commission::{split, CommissionRate, CommissionSplit};
use super::models::{
    FundingSource, ManualPayment, ManualPaymentStatus, Money, Payout, Subscription, MAX_AMOUNT,
};
use super::payouts::PayoutLedger;
use super::store::{EarningsStore, ManualPaymentFilter, NewManualPayment, Transition};
use super::subscriptions::SubscriptionLedger;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Deserialize)]
pub struct ManualPaymentSubmission {
    pub trainer_id: Uuid,
    #[serde(default)]
    pub plan_id: Option<Uuid>,
    pub amount: Money,
    pub receipt_ref: String,
    #[serde(default)]
    pub external_ref: Option<String>,
}

/// Everything an approval changed, for the admin who made it.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovedPayment {
    pub payment: ManualPayment,
    pub split: CommissionSplit,
    pub payout: Payout,
    pub subscription: Option<Subscription>,
}

fn not_pending(payment: &ManualPayment) -> AppError {
    AppError::conflict(
        format!("Manual payment is already {}", payment.status),
        payment.id,
        payment.status.as_str(),
    )
}

/// key: manual-approval-queue -> receipts awaiting admin disposition
#[derive(Clone)]
pub struct ManualPaymentApprovalQueue {
    store: Arc<dyn EarningsStore>,
    catalog: PricingCatalog,
    subscriptions: SubscriptionLedger,
    payouts: PayoutLedger,
    manual_rate: CommissionRate,
    currency: String,
}

impl ManualPaymentApprovalQueue {
    pub fn new(
        store: Arc<dyn EarningsStore>,
        catalog: PricingCatalog,
        subscriptions: SubscriptionLedger,
        payouts: PayoutLedger,
        manual_rate: CommissionRate,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            store,
            catalog,
            subscriptions,
            payouts,
            manual_rate,
            currency: currency.into().to_ascii_lowercase(),
        }
    }

    /// Currency manual receipts are recorded in.
    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Queues a client's receipt as PENDING. The receipt itself is not inspected.
    pub async fn submit(
        &self,
        client_id: Uuid,
        submission: ManualPaymentSubmission,
    ) -> AppResult<ManualPayment> {
        if submission.amount <= 0 {
            return Err(AppError::Validation("Amount must be positive".into()));
        }
        if submission.amount > MAX_AMOUNT {
            return Err(AppError::Validation(format!("Amount cannot exceed {MAX_AMOUNT}")));
        }
        let receipt_ref = submission.receipt_ref.trim().to_string();
        if receipt_ref.is_empty() {
            return Err(AppError::Validation("Receipt reference is required".into()));
        }
        if let Some(plan_id) = submission.plan_id {
            let plan = self.catalog.get_plan(plan_id).await?;
            if plan.trainer_id != submission.trainer_id {
                return Err(AppError::Validation(
                    "Plan does not belong to this trainer".into(),
                ));
            }
        }
        let payment = self
            .store
            .insert_manual_payment(NewManualPayment {
                client_id,
                trainer_id: submission.trainer_id,
                plan_id: submission.plan_id,
                amount: submission.amount,
                currency: self.currency.clone(),
                receipt_ref,
                external_ref: submission.external_ref,
            })
            .await?;
        info!(
            manual_payment = %payment.id,
            %client_id,
            trainer_id = %payment.trainer_id,
            amount = payment.amount,
            "manual payment submitted"
        );
        Ok(payment)
    }

    pub async fn get(&self, payment_id: Uuid) -> AppResult<ManualPayment> {
        self.store
            .get_manual_payment(payment_id)
            .await?
            .ok_or_else(|| AppError::not_found("Manual payment"))
    }

    /// Oldest first, so clients are served in the order they waited.
    pub async fn list_pending(&self) -> AppResult<Vec<ManualPayment>> {
        self.store
            .list_manual_payments(ManualPaymentFilter {
                status: Some(ManualPaymentStatus::Pending),
                ..ManualPaymentFilter::default()
            })
            .await
    }

    pub async fn list_for_client(&self, client_id: Uuid) -> AppResult<Vec<ManualPayment>> {
        let mut payments = self
            .store
            .list_manual_payments(ManualPaymentFilter {
                client_id: Some(client_id),
                ..ManualPaymentFilter::default()
            })
            .await?;
        payments.reverse();
        Ok(payments)
    }

    /// PENDING -> APPROVED and credit the trainer's share, as one step.
    ///
    /// When the payment names a plan, access is activated afterwards; a failure there is
    /// logged and leaves the approval standing.
    pub async fn approve(&self, payment_id: Uuid, admin_id: Uuid) -> AppResult<ApprovedPayment> {
        // Detached so a dropped request cannot stop between approval and activation.
        let queue = self.clone();
        tokio::spawn(async move { queue.approve_and_activate(payment_id, admin_id).await })
            .await
            .map_err(|err| AppError::Message(format!("approval task failed: {err}")))?
    }

    async fn approve_and_activate(
        &self,
        payment_id: Uuid,
        admin_id: Uuid,
    ) -> AppResult<ApprovedPayment> {
        let current = self.get(payment_id).await?;
        if current.status.is_terminal() {
            return Err(not_pending(&current));
        }

        let shares = split(current.amount, self.manual_rate);
        let credit = self.payouts.credit_for(
            current.trainer_id,
            shares.trainer_share,
            &current.currency,
            None,
        );
        let approval = match self
            .store
            .approve_manual_payment(payment_id, admin_id, Utc::now(), &credit)
            .await?
        {
            Transition::Applied(approval) => approval,
            Transition::Stale(latest) => return Err(not_pending(&latest)),
            Transition::Missing => return Err(AppError::not_found("Manual payment")),
        };
        info!(
            manual_payment = %approval.payment.id,
            admin = %admin_id,
            trainer_id = %approval.payment.trainer_id,
            trainer_share = shares.trainer_share,
            payout = %approval.payout.id,
            payout_balance = approval.payout.amount,
            "manual payment approved"
        );

        let mut payment = approval.payment;
        let subscription = match payment.plan_id {
            Some(plan_id) => match self
                .subscriptions
                .create_subscription(
                    payment.client_id,
                    plan_id,
                    FundingSource::ManualPayment(payment.id),
                    None,
                )
                .await
            {
                Ok(subscription) => {
                    payment.subscription_id = Some(subscription.id);
                    Some(subscription)
                }
                Err(err) => {
                    error!(
                        manual_payment = %payment.id,
                        plan = %plan_id,
                        error = %err,
                        "subscription activation failed after approval; needs reconciliation"
                    );
                    None
                }
            },
            None => None,
        };

        Ok(ApprovedPayment {
            payment,
            split: shares,
            payout: approval.payout,
            subscription,
        })
    }

    /// PENDING -> REJECTED. No ledger effect.
    pub async fn reject(
        &self,
        payment_id: Uuid,
        admin_id: Uuid,
        reason: Option<String>,
    ) -> AppResult<ManualPayment> {
        let reason = reason
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        match self
            .store
            .reject_manual_payment(payment_id, admin_id, Utc::now(), reason)
            .await?
        {
            Transition::Applied(payment) => {
                info!(
                    manual_payment = %payment.id,
                    admin = %admin_id,
                    reason = payment.rejection_reason.as_deref().unwrap_or(""),
                    "manual payment rejected"
                );
                Ok(payment)
            }
            Transition::Stale(current) => Err(not_pending(&current)),
            Transition::Missing => Err(AppError::not_found("Manual payment")),
        }
    }
}
