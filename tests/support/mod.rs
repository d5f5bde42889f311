#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use coach_ledger::earnings::gateway::{
    decode_event, signature_header, verify_signature, AccountStatus, CreatedIntent,
    IntentMetadata, IntentSnapshot, IntentStatus, PaymentIntentRequest,
};
use coach_ledger::earnings::models::{BillingInterval, Money, PricingPlan};
use coach_ledger::earnings::{
    EarningsEngine, EarningsSettings, EarningsStore, GatewayError, GatewayEvent,
    MemoryEarningsStore, PaymentGatewayPort, PlanDraft,
};
use serde_json::json;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_ledger_tests";

#[derive(Default)]
struct Script {
    intents: HashMap<String, IntentSnapshot>,
    accounts: HashMap<String, AccountStatus>,
    created_intents: Vec<PaymentIntentRequest>,
    canceled_subscriptions: Vec<String>,
    fail_cancel: bool,
}

/// Scripted stand-in for the card gateway. Signature checks use the real verifier.
#[derive(Default)]
pub struct FakeGateway {
    script: Mutex<Script>,
    account_seq: AtomicUsize,
    intent_seq: AtomicUsize,
}

impl FakeGateway {
    pub fn set_intent(&self, snapshot: IntentSnapshot) {
        let mut script = self.script.lock().unwrap();
        script.intents.insert(snapshot.intent_id.clone(), snapshot);
    }

    pub fn set_account_status(&self, account_ref: &str, status: AccountStatus) {
        let mut script = self.script.lock().unwrap();
        script.accounts.insert(account_ref.to_string(), status);
    }

    pub fn fail_cancellations(&self) {
        self.script.lock().unwrap().fail_cancel = true;
    }

    pub fn created_intents(&self) -> Vec<PaymentIntentRequest> {
        self.script.lock().unwrap().created_intents.clone()
    }

    pub fn canceled_subscriptions(&self) -> Vec<String> {
        self.script.lock().unwrap().canceled_subscriptions.clone()
    }
}

#[async_trait]
impl PaymentGatewayPort for FakeGateway {
    async fn create_connected_account(
        &self,
        _owner_id: Uuid,
        _email: &str,
    ) -> Result<String, GatewayError> {
        let next = self.account_seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("acct_test_{next}"))
    }

    async fn create_onboarding_link(
        &self,
        account_ref: &str,
        _return_url: &str,
        _refresh_url: &str,
    ) -> Result<String, GatewayError> {
        Ok(format!("https://gateway.test/onboarding/{account_ref}"))
    }

    async fn get_account_status(&self, account_ref: &str) -> Result<AccountStatus, GatewayError> {
        Ok(self
            .script
            .lock()
            .unwrap()
            .accounts
            .get(account_ref)
            .copied()
            .unwrap_or_default())
    }

    async fn create_dashboard_link(&self, account_ref: &str) -> Result<String, GatewayError> {
        Ok(format!("https://gateway.test/dashboard/{account_ref}"))
    }

    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<CreatedIntent, GatewayError> {
        let next = self.intent_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let intent_id = format!("pi_test_{next}");
        let mut script = self.script.lock().unwrap();
        script.created_intents.push(request.clone());
        script.intents.insert(
            intent_id.clone(),
            IntentSnapshot {
                intent_id: intent_id.clone(),
                status: IntentStatus::RequiresPaymentMethod,
                amount: request.amount,
                currency: request.currency.clone(),
                receipt_url: None,
                metadata: request.metadata,
            },
        );
        Ok(CreatedIntent {
            client_secret: format!("{intent_id}_secret"),
            intent_id,
        })
    }

    async fn retrieve_payment_intent(
        &self,
        intent_id: &str,
    ) -> Result<IntentSnapshot, GatewayError> {
        self.script
            .lock()
            .unwrap()
            .intents
            .get(intent_id)
            .cloned()
            .ok_or(GatewayError::Api {
                status: 404,
                body: format!("no such payment_intent: {intent_id}"),
            })
    }

    async fn cancel_subscription(&self, external_ref: &str) -> Result<(), GatewayError> {
        let mut script = self.script.lock().unwrap();
        if script.fail_cancel {
            return Err(GatewayError::Api {
                status: 503,
                body: "unavailable".into(),
            });
        }
        script.canceled_subscriptions.push(external_ref.to_string());
        Ok(())
    }

    fn verify_webhook_signature(
        &self,
        raw_payload: &[u8],
        signature_header: &str,
        secret: &str,
    ) -> Result<GatewayEvent, GatewayError> {
        verify_signature(
            raw_payload,
            signature_header,
            secret,
            300,
            Utc::now().timestamp(),
        )?;
        decode_event(raw_payload)
    }
}

pub struct Harness {
    pub engine: EarningsEngine,
    pub store: Arc<MemoryEarningsStore>,
    pub gateway: Arc<FakeGateway>,
}

pub fn harness() -> Harness {
    harness_with(EarningsSettings::default())
}

pub fn harness_with(settings: EarningsSettings) -> Harness {
    let store = Arc::new(MemoryEarningsStore::new());
    let gateway = Arc::new(FakeGateway::default());
    let settings = EarningsSettings {
        webhook_secret: WEBHOOK_SECRET.to_string(),
        ..settings
    };
    let engine = EarningsEngine::new(
        store.clone() as Arc<dyn EarningsStore>,
        gateway.clone() as Arc<dyn PaymentGatewayPort>,
        settings,
    );
    Harness {
        engine,
        store,
        gateway,
    }
}

pub async fn plan(engine: &EarningsEngine, trainer_id: Uuid, price: Money) -> PricingPlan {
    engine
        .catalog
        .create_plan(
            trainer_id,
            PlanDraft {
                name: "Monthly coaching".into(),
                description: None,
                price,
                currency: "usd".into(),
                interval: BillingInterval::Month,
                duration_weeks: None,
            },
        )
        .await
        .expect("plan created")
}

/// Gives `trainer_id` a connected account that can take card payments.
pub async fn chargeable_trainer(h: &Harness, trainer_id: Uuid) -> String {
    let account = h
        .engine
        .accounts
        .create_account(trainer_id, "coach@example.com")
        .await
        .expect("account created");
    h.gateway.set_account_status(
        &account.account_ref,
        AccountStatus {
            charges_enabled: true,
            payouts_enabled: true,
            details_submitted: true,
        },
    );
    h.engine
        .accounts
        .refresh_status(trainer_id)
        .await
        .expect("status refreshed");
    account.account_ref
}

pub fn succeeded_intent(
    intent_id: &str,
    amount: Money,
    client_id: Uuid,
    plan_id: Uuid,
) -> IntentSnapshot {
    IntentSnapshot {
        intent_id: intent_id.to_string(),
        status: IntentStatus::Succeeded,
        amount,
        currency: "usd".into(),
        receipt_url: Some(format!("https://gateway.test/receipts/{intent_id}")),
        metadata: IntentMetadata {
            plan_id: Some(plan_id),
            client_id: Some(client_id),
            trainer_id: None,
        },
    }
}

pub fn payment_succeeded_event(
    event_id: &str,
    intent_id: &str,
    amount: Money,
    client_id: Uuid,
    plan_id: Uuid,
) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": event_id,
        "type": "payment_intent.succeeded",
        "data": { "object": {
            "id": intent_id,
            "status": "succeeded",
            "amount": amount,
            "currency": "USD",
            "metadata": {
                "plan_id": plan_id.to_string(),
                "client_id": client_id.to_string(),
            },
            "latest_charge": { "receipt_url": format!("https://gateway.test/receipts/{intent_id}") },
        }},
    }))
    .unwrap()
}

pub fn event(event_id: &str, event_type: &str, object: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": event_id,
        "type": event_type,
        "data": { "object": object },
    }))
    .unwrap()
}

pub fn sign(payload: &[u8]) -> String {
    signature_header(payload, WEBHOOK_SECRET, Utc::now().timestamp())
}
