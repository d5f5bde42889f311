mod support;

use coach_ledger::earnings::gateway::{IntentMetadata, IntentStatus};
use coach_ledger::earnings::models::{FundingSource, SubscriptionStatus};
use coach_ledger::earnings::store::NewPaymentRecord;
use coach_ledger::earnings::{EarningsStore, ProcessingResult};
use coach_ledger::error::AppError;
use serde_json::json;
use support::{
    chargeable_trainer, event, harness, payment_succeeded_event, plan, sign, succeeded_intent,
};
use uuid::Uuid;

// key: gateway-tests -> idempotent recording
#[tokio::test]
async fn replayed_webhook_records_payment_once() {
    let h = harness();
    let (client, trainer) = (Uuid::new_v4(), Uuid::new_v4());
    let offer = plan(&h.engine, trainer, 10_000).await;
    let payload = payment_succeeded_event("evt_1", "pi_replay", 10_000, client, offer.id);
    let signature = sign(&payload);

    let first = h
        .engine
        .recorder
        .handle_gateway_event(&payload, &signature)
        .await
        .unwrap();
    let ProcessingResult::Recorded {
        payment_record_id,
        subscription_id,
    } = first
    else {
        panic!("expected first delivery to record, got {first:?}");
    };

    let second = h
        .engine
        .recorder
        .handle_gateway_event(&payload, &signature)
        .await
        .unwrap();
    assert_eq!(
        second,
        ProcessingResult::Duplicate {
            payment_record_id,
            subscription_id,
        }
    );

    let records = h.store.list_payment_records(Some(trainer)).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].currency, "usd");
    assert_eq!(
        records[0].receipt_url.as_deref(),
        Some("https://gateway.test/receipts/pi_replay")
    );
    let subscriptions = h.engine.subscriptions.list_for_client(client).await.unwrap();
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(
        subscriptions[0].funding,
        FundingSource::GatewayPayment(payment_record_id)
    );
}

#[tokio::test]
async fn confirmation_and_webhook_converge_on_one_subscription() {
    let h = harness();
    let (client, trainer) = (Uuid::new_v4(), Uuid::new_v4());
    let offer = plan(&h.engine, trainer, 4000).await;
    h.gateway
        .set_intent(succeeded_intent("pi_race", 4000, client, offer.id));

    let confirmed = h
        .engine
        .recorder
        .confirm_intent("pi_race", client, offer.id)
        .await
        .unwrap();
    assert_eq!(confirmed.status, SubscriptionStatus::Active);

    let payload = payment_succeeded_event("evt_race", "pi_race", 4000, client, offer.id);
    let outcome = h
        .engine
        .recorder
        .handle_gateway_event(&payload, &sign(&payload))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ProcessingResult::Duplicate { subscription_id, .. } if subscription_id == confirmed.id
    ));

    let again = h
        .engine
        .recorder
        .confirm_intent("pi_race", client, offer.id)
        .await
        .unwrap();
    assert_eq!(again.id, confirmed.id);
}

#[tokio::test]
async fn concurrent_deliveries_of_one_payment_converge() {
    let h = harness();
    let (client, trainer) = (Uuid::new_v4(), Uuid::new_v4());
    let offer = plan(&h.engine, trainer, 2500).await;
    let payload = payment_succeeded_event("evt_c", "pi_concurrent", 2500, client, offer.id);
    let signature = sign(&payload);

    let deliveries = (0..6).map(|_| {
        let recorder = h.engine.recorder.clone();
        let payload = payload.clone();
        let signature = signature.clone();
        tokio::spawn(async move { recorder.handle_gateway_event(&payload, &signature).await })
    });
    let outcomes: Vec<ProcessingResult> = futures_util::future::join_all(deliveries)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let recorded = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, ProcessingResult::Recorded { .. }))
        .count();
    assert!(recorded >= 1);
    assert_eq!(h.store.list_payment_records(Some(trainer)).await.unwrap().len(), 1);
    assert_eq!(
        h.engine.subscriptions.list_for_client(client).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn bad_signatures_change_nothing() {
    let h = harness();
    let (client, trainer) = (Uuid::new_v4(), Uuid::new_v4());
    let offer = plan(&h.engine, trainer, 10_000).await;
    let payload = payment_succeeded_event("evt_forged", "pi_forged", 10_000, client, offer.id);

    let forged = coach_ledger::earnings::gateway::signature_header(
        &payload,
        "not-the-secret",
        chrono::Utc::now().timestamp(),
    );
    for header in [forged.as_str(), "", "t=abc,v1=00"] {
        let err = h
            .engine
            .recorder
            .handle_gateway_event(&payload, header)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Signature));
    }

    let stale = coach_ledger::earnings::gateway::signature_header(
        &payload,
        support::WEBHOOK_SECRET,
        chrono::Utc::now().timestamp() - 3600,
    );
    let err = h
        .engine
        .recorder
        .handle_gateway_event(&payload, &stale)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Signature));

    assert!(h.store.list_payment_records(None).await.unwrap().is_empty());
    assert!(h.engine.subscriptions.list_for_client(client).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_and_malformed_events() {
    let h = harness();
    let payload = event("evt_unknown", "charge.refunded", json!({ "id": "ch_1" }));
    let outcome = h
        .engine
        .recorder
        .handle_gateway_event(&payload, &sign(&payload))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ProcessingResult::Ignored {
            event_type: "charge.refunded".into()
        }
    );

    let garbage = b"{not json".to_vec();
    let err = h
        .engine
        .recorder
        .handle_gateway_event(&garbage, &sign(&garbage))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test]
async fn succeeded_payment_without_attribution_is_reported() {
    let h = harness();
    let payload = event(
        "evt_bare",
        "payment_intent.succeeded",
        json!({ "id": "pi_bare", "status": "succeeded", "amount": 900, "currency": "usd" }),
    );
    let outcome = h
        .engine
        .recorder
        .handle_gateway_event(&payload, &sign(&payload))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ProcessingResult::Unattributed {
            intent_id: "pi_bare".into()
        }
    );
    assert!(h.store.list_payment_records(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn confirmation_checks_status_and_ownership() {
    let h = harness();
    let (client, intruder, trainer) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let offer = plan(&h.engine, trainer, 3000).await;
    let other_offer = plan(&h.engine, trainer, 6000).await;

    let mut pending = succeeded_intent("pi_pending", 3000, client, offer.id);
    pending.status = IntentStatus::Processing;
    h.gateway.set_intent(pending);
    let err = h
        .engine
        .recorder
        .confirm_intent("pi_pending", client, offer.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(ref message) if message == "Payment not completed"));

    h.gateway
        .set_intent(succeeded_intent("pi_owned", 3000, client, offer.id));
    let err = h
        .engine
        .recorder
        .confirm_intent("pi_owned", intruder, offer.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
    let err = h
        .engine
        .recorder
        .confirm_intent("pi_owned", client, other_offer.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let err = h
        .engine
        .recorder
        .confirm_intent("pi_missing", client, offer.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Gateway(_)));

    assert!(h.store.list_payment_records(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn intents_without_ledger_metadata_cannot_be_confirmed() {
    let h = harness();
    let (client, trainer) = (Uuid::new_v4(), Uuid::new_v4());
    let offer = plan(&h.engine, trainer, 50_000).await;

    let mut foreign = succeeded_intent("pi_foreign", 1, client, offer.id);
    foreign.metadata = IntentMetadata::default();
    h.gateway.set_intent(foreign);
    let err = h
        .engine
        .recorder
        .confirm_intent("pi_foreign", client, offer.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let mut planless = succeeded_intent("pi_planless", 1, client, offer.id);
    planless.metadata.plan_id = None;
    h.gateway.set_intent(planless);
    let err = h
        .engine
        .recorder
        .confirm_intent("pi_planless", client, offer.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let err = h
        .engine
        .recorder
        .confirm_intent("pi_1/../../v1/balance", client, offer.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    assert!(h.store.list_payment_records(None).await.unwrap().is_empty());
    assert!(h
        .engine
        .subscriptions
        .list_for_client(client)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn absurd_signature_timestamps_are_refused() {
    let h = harness();
    for header in [
        "t=-9223372036854775808,v1=00",
        "t=9223372036854775807,v1=00",
    ] {
        let err = h
            .engine
            .recorder
            .handle_gateway_event(b"{}", header)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Signature));
    }
}

#[tokio::test]
async fn intents_require_a_chargeable_trainer_account() {
    let h = harness();
    let (client, trainer) = (Uuid::new_v4(), Uuid::new_v4());
    let offer = plan(&h.engine, trainer, 10_000).await;

    let err = h
        .engine
        .recorder
        .create_payment_intent(client, offer.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let account_ref = chargeable_trainer(&h, trainer).await;
    let intent = h
        .engine
        .recorder
        .create_payment_intent(client, offer.id)
        .await
        .unwrap();
    assert!(intent.client_secret.starts_with(&intent.intent_id));

    let requests = h.gateway.created_intents();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].amount, 10_000);
    assert_eq!(requests[0].platform_fee_amount, 3000);
    assert_eq!(requests[0].destination_account_ref, account_ref);
    assert_eq!(requests[0].metadata.client_id, Some(client));
    assert_eq!(requests[0].metadata.plan_id, Some(offer.id));
    assert_eq!(requests[0].metadata.trainer_id, Some(trainer));

    h.engine
        .catalog
        .deactivate_plan(offer.id, trainer)
        .await
        .unwrap();
    let err = h
        .engine
        .recorder
        .create_payment_intent(client, offer.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(ref message) if message == "Plan is no longer available"));
}

#[tokio::test]
async fn payment_recorded_without_subscription_is_completed_on_redelivery() {
    let h = harness();
    let (client, trainer) = (Uuid::new_v4(), Uuid::new_v4());
    let offer = plan(&h.engine, trainer, 5000).await;

    // A record left behind by a delivery that failed before activation.
    let orphan = h
        .store
        .insert_payment_record(NewPaymentRecord {
            trainer_id: trainer,
            client_id: client,
            plan_id: offer.id,
            external_payment_id: "pi_orphan".into(),
            amount: 5000,
            currency: "usd".into(),
            receipt_url: None,
        })
        .await
        .unwrap()
        .record()
        .clone();
    assert!(orphan.needs_reconciliation());

    let payload = payment_succeeded_event("evt_retry", "pi_orphan", 5000, client, offer.id);
    let outcome = h
        .engine
        .recorder
        .handle_gateway_event(&payload, &sign(&payload))
        .await
        .unwrap();
    let ProcessingResult::Recorded {
        payment_record_id,
        subscription_id,
    } = outcome
    else {
        panic!("expected the orphaned payment to be completed, got {outcome:?}");
    };
    assert_eq!(payment_record_id, orphan.id);

    let record = h.store.find_payment_record("pi_orphan").await.unwrap().unwrap();
    assert_eq!(record.subscription_id, Some(subscription_id));
    assert!(!record.needs_reconciliation());
}

#[tokio::test]
async fn account_updates_refresh_known_accounts_only() {
    let h = harness();
    let trainer = Uuid::new_v4();
    let account = h
        .engine
        .accounts
        .create_account(trainer, "coach@example.com")
        .await
        .unwrap();
    assert!(!account.charges_enabled);
    assert_eq!(account.status, "pending");

    let again = h
        .engine
        .accounts
        .create_account(trainer, "coach@example.com")
        .await
        .unwrap();
    assert_eq!(again.account_ref, account.account_ref);

    let payload = event(
        "evt_acct",
        "account.updated",
        json!({
            "id": account.account_ref,
            "charges_enabled": true,
            "payouts_enabled": true,
            "details_submitted": true,
        }),
    );
    let outcome = h
        .engine
        .recorder
        .handle_gateway_event(&payload, &sign(&payload))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ProcessingResult::AccountRefreshed {
            account_ref: account.account_ref.clone(),
            known: true,
        }
    );
    let refreshed = h.engine.accounts.account_for(trainer).await.unwrap().unwrap();
    assert!(refreshed.charges_enabled);
    assert_eq!(refreshed.status, "active");

    let stranger = event("evt_other", "account.updated", json!({ "id": "acct_unknown" }));
    let outcome = h
        .engine
        .recorder
        .handle_gateway_event(&stranger, &sign(&stranger))
        .await
        .unwrap();
    assert!(matches!(outcome, ProcessingResult::AccountRefreshed { known: false, .. }));

    let link = h
        .engine
        .accounts
        .onboarding_link(trainer, "https://app.test/done", "https://app.test/retry")
        .await
        .unwrap();
    assert!(link.ends_with(&account.account_ref));
    let err = h
        .engine
        .accounts
        .onboarding_link(Uuid::new_v4(), "https://app.test/done", "https://app.test/retry")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn gateway_earnings_apply_the_gateway_rate() {
    let h = harness();
    let (client, trainer) = (Uuid::new_v4(), Uuid::new_v4());
    let offer = plan(&h.engine, trainer, 10_000).await;
    let payload = payment_succeeded_event("evt_e", "pi_earn", 10_000, client, offer.id);
    h.engine
        .recorder
        .handle_gateway_event(&payload, &sign(&payload))
        .await
        .unwrap();

    let earnings = h.engine.recorder.earnings_for(trainer).await.unwrap();
    assert_eq!(earnings.gross, 10_000);
    assert_eq!(earnings.platform_fee, 3000);
    assert_eq!(earnings.net, 7000);
    assert_eq!(earnings.this_period_net, 7000);
    assert_eq!(earnings.payment_count, 1);
    assert_eq!(earnings.active_subscribers, 1);
}

#[tokio::test]
async fn payment_history_is_visible_to_parties_only() {
    let h = harness();
    let (client, trainer) = (Uuid::new_v4(), Uuid::new_v4());
    let offer = plan(&h.engine, trainer, 1200).await;
    let payload = payment_succeeded_event("evt_h", "pi_history", 1200, client, offer.id);
    let ProcessingResult::Recorded {
        subscription_id, ..
    } = h
        .engine
        .recorder
        .handle_gateway_event(&payload, &sign(&payload))
        .await
        .unwrap()
    else {
        panic!("expected payment to be recorded");
    };

    for party in [client, trainer] {
        let history = h
            .engine
            .recorder
            .payment_history(subscription_id, party)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].external_payment_id, "pi_history");
    }
    let err = h
        .engine
        .recorder
        .payment_history(subscription_id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
