use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use super::catalog::PricingCatalog;
use super::gateway::PaymentGatewayPort;
use super::models::{BillingInterval, FundingSource, PricingPlan, Subscription, SubscriptionStatus};
use super::store::{EarningsStore, NewSubscription};
use crate::error::{AppError, AppResult};

/// Fixed-duration one-time plans end `duration_weeks` after the start; everything else runs
/// until canceled.
pub fn end_date_for(
    plan: &PricingPlan,
    start: DateTime<Utc>,
) -> AppResult<Option<DateTime<Utc>>> {
    match (plan.interval, plan.duration_weeks) {
        (BillingInterval::OneTime, Some(weeks)) => start
            .checked_add_signed(Duration::weeks(i64::from(weeks)))
            .map(Some)
            .ok_or_else(|| AppError::Validation("Plan duration is out of range".into())),
        _ => Ok(None),
    }
}

/// key: subscription-ledger -> client access lifecycle
#[derive(Clone)]
pub struct SubscriptionLedger {
    store: Arc<dyn EarningsStore>,
    catalog: PricingCatalog,
    gateway: Arc<dyn PaymentGatewayPort>,
}

impl SubscriptionLedger {
    pub fn new(
        store: Arc<dyn EarningsStore>,
        catalog: PricingCatalog,
        gateway: Arc<dyn PaymentGatewayPort>,
    ) -> Self {
        Self {
            store,
            catalog,
            gateway,
        }
    }

    /// Activates access to `plan_id` for `client_id`, paid for by `funding`.
    ///
    /// Idempotent per funding source: a second call for the same payment returns the
    /// subscription the first one created.
    pub async fn create_subscription(
        &self,
        client_id: Uuid,
        plan_id: Uuid,
        funding: FundingSource,
        external_ref: Option<String>,
    ) -> AppResult<Subscription> {
        let plan = self.catalog.get_plan(plan_id).await?;
        let start_date = Utc::now();
        let end_date = end_date_for(&plan, start_date)?;
        let subscription = self
            .store
            .fund_subscription(NewSubscription {
                client_id,
                trainer_id: plan.trainer_id,
                plan_id: plan.id,
                start_date,
                end_date,
                external_ref,
                funding,
            })
            .await?;
        info!(
            subscription = %subscription.id,
            %client_id,
            trainer_id = %subscription.trainer_id,
            funding = funding.kind(),
            "subscription active"
        );
        Ok(subscription)
    }

    pub async fn get(&self, subscription_id: Uuid) -> AppResult<Subscription> {
        self.store
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| AppError::not_found("Subscription"))
    }

    /// Lookup scoped to the parties; anyone else sees NotFound.
    pub async fn get_for_party(
        &self,
        subscription_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Subscription> {
        let subscription = self.get(subscription_id).await?;
        if !subscription.is_party(user_id) {
            return Err(AppError::not_found("Subscription"));
        }
        Ok(subscription)
    }

    /// Either party may cancel. Canceling twice returns the canceled record.
    pub async fn cancel(&self, subscription_id: Uuid, requester_id: Uuid) -> AppResult<Subscription> {
        let subscription = self.get(subscription_id).await?;
        if !subscription.is_party(requester_id) {
            return Err(AppError::Forbidden(
                "Not authorized to cancel this subscription".into(),
            ));
        }
        if subscription.status == SubscriptionStatus::Canceled {
            return Ok(subscription);
        }

        let canceled = self
            .store
            .cancel_subscription(subscription_id, Utc::now())
            .await?
            .ok_or_else(|| AppError::not_found("Subscription"))?;
        info!(
            subscription = %canceled.id,
            requester = %requester_id,
            "subscription canceled"
        );

        if let Some(external_ref) = canceled.external_ref.as_deref() {
            if let Err(err) = self.gateway.cancel_subscription(external_ref).await {
                warn!(
                    subscription = %canceled.id,
                    external_ref,
                    error = %err,
                    "gateway subscription cancel failed; local cancel stands"
                );
            }
        }
        Ok(canceled)
    }

    /// Gateway-initiated cancel; unknown references are a no-op.
    pub async fn cancel_by_external_ref(&self, external_ref: &str) -> AppResult<Vec<Subscription>> {
        let canceled = self
            .store
            .cancel_subscriptions_by_external_ref(external_ref, Utc::now())
            .await?;
        for subscription in &canceled {
            info!(
                subscription = %subscription.id,
                external_ref,
                "subscription canceled by gateway"
            );
        }
        Ok(canceled)
    }

    pub async fn list_for_client(&self, client_id: Uuid) -> AppResult<Vec<Subscription>> {
        let subscriptions = self.store.list_subscriptions_for_client(client_id).await?;
        Ok(newest_first(subscriptions))
    }

    pub async fn list_for_trainer(
        &self,
        trainer_id: Uuid,
        active_only: bool,
    ) -> AppResult<Vec<Subscription>> {
        let subscriptions = self
            .store
            .list_subscriptions_for_trainer(trainer_id, active_only)
            .await?;
        Ok(newest_first(subscriptions))
    }
}

fn newest_first(mut subscriptions: Vec<Subscription>) -> Vec<Subscription> {
    subscriptions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    subscriptions
}
