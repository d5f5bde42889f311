//! Turns gateway payment signals into durable payment records and active subscriptions.
//!
//! The external payment id is the only idempotency key: replays of the same event, or a
//! confirmation racing its webhook, converge on one record and one subscription. A record
//! written without its subscription is finished by the next delivery of the same id.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::accounts::ConnectedAccounts;
use super::aggregator::month_start;
use super::catalog::PricingCatalog;
use super::commission::{split, CommissionRate};
use super::gateway::{
    is_valid_reference, CreatedIntent, GatewayError, GatewayEvent, IntentMetadata,
    IntentSnapshot, IntentStatus, PaymentGatewayPort, PaymentIntentRequest,
};
use super::models::{FundingSource, Money, PaymentRecord, Subscription, SubscriptionStatus};
use super::store::{EarningsStore, NewPaymentRecord, RecordInsert};
use super::subscriptions::SubscriptionLedger;
use crate::error::{AppError, AppResult};

/// What a verified webhook delivery did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessingResult {
    Recorded {
        payment_record_id: Uuid,
        subscription_id: Uuid,
    },
    Duplicate {
        payment_record_id: Uuid,
        subscription_id: Uuid,
    },
    /// A succeeded payment without the plan/client attribution this ledger stamps on intents.
    Unattributed {
        intent_id: String,
    },
    AccountRefreshed {
        account_ref: String,
        known: bool,
    },
    SubscriptionsCanceled {
        external_ref: String,
        count: usize,
    },
    Ignored {
        event_type: String,
    },
}

/// Gateway-channel earnings for one trainer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayEarnings {
    pub trainer_id: Uuid,
    pub gross: Money,
    pub platform_fee: Money,
    pub net: Money,
    pub this_period_net: Money,
    pub payment_count: usize,
    pub active_subscribers: usize,
}

struct Recording {
    record: PaymentRecord,
    subscription: Subscription,
    replay: bool,
}

/// key: payment-recorder -> gateway payments into the ledger
#[derive(Clone)]
pub struct PaymentRecorder {
    store: Arc<dyn EarningsStore>,
    gateway: Arc<dyn PaymentGatewayPort>,
    catalog: PricingCatalog,
    subscriptions: SubscriptionLedger,
    accounts: ConnectedAccounts,
    gateway_rate: CommissionRate,
    webhook_secret: String,
}

impl PaymentRecorder {
    pub fn new(
        store: Arc<dyn EarningsStore>,
        gateway: Arc<dyn PaymentGatewayPort>,
        catalog: PricingCatalog,
        subscriptions: SubscriptionLedger,
        accounts: ConnectedAccounts,
        gateway_rate: CommissionRate,
        webhook_secret: impl Into<String>,
    ) -> Self {
        Self {
            store,
            gateway,
            catalog,
            subscriptions,
            accounts,
            gateway_rate,
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Creates an intent paying `plan_id`'s trainer, with the platform fee withheld.
    pub async fn create_payment_intent(
        &self,
        client_id: Uuid,
        plan_id: Uuid,
    ) -> AppResult<CreatedIntent> {
        let plan = self.catalog.get_plan(plan_id).await?;
        if !plan.active {
            return Err(AppError::BadRequest("Plan is no longer available".into()));
        }
        let account = self
            .accounts
            .account_for(plan.trainer_id)
            .await?
            .filter(|account| account.charges_enabled)
            .ok_or_else(|| AppError::BadRequest("Trainer has not set up payments".into()))?;

        let fee = split(plan.price, self.gateway_rate).platform_share;
        let intent = self
            .gateway
            .create_payment_intent(&PaymentIntentRequest {
                amount: plan.price,
                currency: plan.currency.clone(),
                destination_account_ref: account.account_ref,
                platform_fee_amount: fee,
                metadata: IntentMetadata {
                    plan_id: Some(plan.id),
                    client_id: Some(client_id),
                    trainer_id: Some(plan.trainer_id),
                },
            })
            .await?;
        info!(
            intent = %intent.intent_id,
            %client_id,
            plan = %plan.id,
            amount = plan.price,
            platform_fee = fee,
            "payment intent created"
        );
        Ok(intent)
    }

    /// Synchronous confirmation of an intent the client reports as paid.
    pub async fn confirm_intent(
        &self,
        intent_id: &str,
        client_id: Uuid,
        plan_id: Uuid,
    ) -> AppResult<Subscription> {
        if !is_valid_reference(intent_id) {
            return Err(AppError::BadRequest("Invalid payment intent id".into()));
        }
        let snapshot = self.gateway.retrieve_payment_intent(intent_id).await?;
        if snapshot.status != IntentStatus::Succeeded {
            return Err(AppError::BadRequest("Payment not completed".into()));
        }
        // Only intents this ledger created carry both ids; anything else is not confirmable.
        if snapshot.metadata.client_id != Some(client_id) {
            return Err(AppError::Forbidden(
                "Payment intent belongs to another client".into(),
            ));
        }
        if snapshot.metadata.plan_id != Some(plan_id) {
            return Err(AppError::BadRequest(
                "Payment intent was created for a different plan".into(),
            ));
        }
        let recording = self.record_detached(snapshot, client_id, plan_id).await?;
        Ok(recording.subscription)
    }

    /// Verifies and applies one webhook delivery. Signature failures change nothing.
    pub async fn handle_gateway_event(
        &self,
        raw_payload: &[u8],
        signature_header: &str,
    ) -> AppResult<ProcessingResult> {
        let event = match self.gateway.verify_webhook_signature(
            raw_payload,
            signature_header,
            &self.webhook_secret,
        ) {
            Ok(event) => event,
            Err(GatewayError::MalformedEvent(reason)) => {
                warn!(%reason, "webhook payload could not be decoded");
                return Err(AppError::BadRequest(format!("Malformed event: {reason}")));
            }
            Err(err) => {
                warn!(error = %err, "webhook signature rejected");
                return Err(AppError::Signature);
            }
        };
        debug!(event = event.event_id(), "webhook verified");

        match event {
            GatewayEvent::PaymentSucceeded { event_id, payment } => {
                if payment.status != IntentStatus::Succeeded {
                    return Ok(ProcessingResult::Ignored {
                        event_type: "payment_intent.succeeded".into(),
                    });
                }
                let (Some(client_id), Some(plan_id)) =
                    (payment.metadata.client_id, payment.metadata.plan_id)
                else {
                    warn!(
                        event = %event_id,
                        intent = %payment.intent_id,
                        "succeeded payment carries no plan/client attribution"
                    );
                    return Ok(ProcessingResult::Unattributed {
                        intent_id: payment.intent_id,
                    });
                };
                let recording = self.record_detached(payment, client_id, plan_id).await?;
                let payment_record_id = recording.record.id;
                let subscription_id = recording.subscription.id;
                Ok(if recording.replay {
                    ProcessingResult::Duplicate {
                        payment_record_id,
                        subscription_id,
                    }
                } else {
                    ProcessingResult::Recorded {
                        payment_record_id,
                        subscription_id,
                    }
                })
            }
            GatewayEvent::AccountUpdated {
                account_ref,
                status,
                ..
            } => {
                let known = self
                    .accounts
                    .refresh_from_event(&account_ref, &status)
                    .await?
                    .is_some();
                Ok(ProcessingResult::AccountRefreshed { account_ref, known })
            }
            GatewayEvent::SubscriptionDeleted { external_ref, .. } => {
                let count = self
                    .subscriptions
                    .cancel_by_external_ref(&external_ref)
                    .await?
                    .len();
                Ok(ProcessingResult::SubscriptionsCanceled {
                    external_ref,
                    count,
                })
            }
            GatewayEvent::Unrecognized {
                event_id,
                event_type,
            } => {
                debug!(event = %event_id, %event_type, "ignoring unhandled webhook event");
                Ok(ProcessingResult::Ignored { event_type })
            }
        }
    }

    /// Runs the record-then-subscription sequence on its own task so a dropped request
    /// cannot abandon it halfway.
    async fn record_detached(
        &self,
        payment: IntentSnapshot,
        client_id: Uuid,
        plan_id: Uuid,
    ) -> AppResult<Recording> {
        let recorder = self.clone();
        tokio::spawn(async move { recorder.record(payment, client_id, plan_id).await })
            .await
            .map_err(|err| AppError::Message(format!("payment recording task failed: {err}")))?
    }

    async fn record(
        &self,
        payment: IntentSnapshot,
        client_id: Uuid,
        plan_id: Uuid,
    ) -> AppResult<Recording> {
        let existing = self.store.find_payment_record(&payment.intent_id).await?;
        if let Some(record) = &existing {
            if let Some(subscription_id) = record.subscription_id {
                debug!(
                    payment_record = %record.id,
                    external_payment_id = %record.external_payment_id,
                    "duplicate payment event"
                );
                let subscription = self.subscriptions.get(subscription_id).await?;
                return Ok(Recording {
                    record: record.clone(),
                    subscription,
                    replay: true,
                });
            }
        }

        let (mut record, replay) = match existing {
            Some(record) => {
                warn!(
                    payment_record = %record.id,
                    external_payment_id = %record.external_payment_id,
                    "resuming payment whose subscription was never created"
                );
                (record, false)
            }
            None => {
                let plan = self.catalog.get_plan(plan_id).await?;
                let inserted = self
                    .store
                    .insert_payment_record(NewPaymentRecord {
                        trainer_id: plan.trainer_id,
                        client_id,
                        plan_id,
                        external_payment_id: payment.intent_id.clone(),
                        amount: payment.amount,
                        currency: payment.currency.clone(),
                        receipt_url: payment.receipt_url.clone(),
                    })
                    .await?;
                match inserted {
                    RecordInsert::Inserted(record) => {
                        info!(
                            payment_record = %record.id,
                            external_payment_id = %record.external_payment_id,
                            trainer_id = %record.trainer_id,
                            amount = record.amount,
                            "payment recorded"
                        );
                        (record, false)
                    }
                    RecordInsert::Existing(record) => {
                        debug!(
                            payment_record = %record.id,
                            external_payment_id = %record.external_payment_id,
                            "payment recorded concurrently by another delivery"
                        );
                        (record, true)
                    }
                }
            }
        };

        // The subscription is idempotent per funding record, so a concurrent delivery that
        // won the insert above still converges on the same subscription.
        let subscription = self
            .subscriptions
            .create_subscription(
                record.client_id,
                record.plan_id,
                FundingSource::GatewayPayment(record.id),
                None,
            )
            .await
            .map_err(|err| {
                error!(
                    payment_record = %record.id,
                    external_payment_id = %record.external_payment_id,
                    error = %err,
                    "subscription activation failed after payment was recorded; needs reconciliation"
                );
                err
            })?;

        record.subscription_id = Some(subscription.id);
        Ok(Recording {
            record,
            subscription,
            replay,
        })
    }

    /// Payments for a subscription, newest first, visible to its parties only.
    pub async fn payment_history(
        &self,
        subscription_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Vec<PaymentRecord>> {
        self.subscriptions
            .get_for_party(subscription_id, user_id)
            .await?;
        let mut records = self
            .store
            .list_payment_records_for_subscription(subscription_id)
            .await?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    pub async fn earnings_for(&self, trainer_id: Uuid) -> AppResult<GatewayEarnings> {
        let records = self.store.list_payment_records(Some(trainer_id)).await?;
        let period_start = month_start(Utc::now());
        let mut earnings = GatewayEarnings {
            trainer_id,
            gross: 0,
            platform_fee: 0,
            net: 0,
            this_period_net: 0,
            payment_count: records.len(),
            active_subscribers: 0,
        };
        for record in &records {
            let share = split(record.amount, self.gateway_rate);
            earnings.gross = earnings.gross.saturating_add(share.gross_amount);
            earnings.platform_fee = earnings
                .platform_fee
                .saturating_add(share.platform_share);
            earnings.net = earnings.net.saturating_add(share.trainer_share);
            if record.created_at >= period_start {
                earnings.this_period_net = earnings
                    .this_period_net
                    .saturating_add(share.trainer_share);
            }
        }
        earnings.active_subscribers = self
            .store
            .list_subscriptions_for_trainer(trainer_id, true)
            .await?
            .iter()
            .filter(|subscription| subscription.status == SubscriptionStatus::Active)
            .count();
        Ok(earnings)
    }
}
