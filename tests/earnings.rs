mod support;

use coach_ledger::earnings::ManualPaymentSubmission;
use support::{harness, payment_succeeded_event, plan, sign, Harness};
use uuid::Uuid;

async fn approve(h: &Harness, trainer_id: Uuid, amount: i64) {
    let payment = h
        .engine
        .manual
        .submit(
            Uuid::new_v4(),
            ManualPaymentSubmission {
                trainer_id,
                plan_id: None,
                amount,
                receipt_ref: "receipt".into(),
                external_ref: None,
            },
        )
        .await
        .unwrap();
    h.engine.manual.approve(payment.id, Uuid::new_v4()).await.unwrap();
}

#[tokio::test]
async fn owed_is_clamped_when_payouts_exceed_share() {
    let h = harness();
    let trainer = Uuid::new_v4();
    approve(&h, trainer, 1000).await;
    h.engine
        .payouts
        .record_manual_payout(trainer, 5000, "usd", None, None, Some("advance".into()))
        .await
        .unwrap();

    let summary = h.engine.aggregator.trainer_summary(trainer).await.unwrap();
    assert_eq!(summary.trainer_share, 900);
    assert_eq!(summary.pending_payouts, 900 + 5000);
    assert_eq!(summary.amount_owed, 0);
}

#[tokio::test]
async fn gross_income_covers_both_channels() {
    let h = harness();
    let (client, trainer) = (Uuid::new_v4(), Uuid::new_v4());
    approve(&h, trainer, 2000).await;
    let offer = plan(&h.engine, trainer, 10_000).await;
    let payload = payment_succeeded_event("evt_mix", "pi_mix", 10_000, client, offer.id);
    h.engine
        .recorder
        .handle_gateway_event(&payload, &sign(&payload))
        .await
        .unwrap();

    let summary = h.engine.aggregator.trainer_summary(trainer).await.unwrap();
    assert_eq!(summary.manual_gross, 2000);
    assert_eq!(summary.gateway_gross, 10_000);
    assert_eq!(summary.gross_income, 12_000);
    assert_eq!(summary.trainer_share, 1800 + 7000);
    assert_eq!(summary.platform_share, 200 + 3000);
    assert_eq!(summary.pending_payouts, 1800);
    assert_eq!(summary.amount_owed, 7000);
}

#[tokio::test]
async fn outstanding_trainers_are_ranked_by_amount_owed() {
    let h = harness();
    let (small, large, settled) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let client = Uuid::new_v4();

    for (trainer, price, intent) in [(small, 1000, "pi_small"), (large, 8000, "pi_large")] {
        let offer = plan(&h.engine, trainer, price).await;
        let payload = payment_succeeded_event(intent, intent, price, client, offer.id);
        h.engine
            .recorder
            .handle_gateway_event(&payload, &sign(&payload))
            .await
            .unwrap();
    }
    approve(&h, settled, 3000).await;

    let ranked = h.engine.aggregator.all_trainer_earnings_ranked().await.unwrap();
    let order: Vec<(Uuid, i64)> = ranked
        .iter()
        .map(|summary| (summary.trainer_id, summary.amount_owed))
        .collect();
    assert_eq!(order, vec![(large, 5600), (small, 700)]);
}

#[tokio::test]
async fn platform_summary_totals_and_finance_stats() {
    let h = harness();
    let (first, second, admin) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    approve(&h, first, 1000).await;
    approve(&h, second, 4000).await;
    h.engine
        .manual
        .submit(
            Uuid::new_v4(),
            ManualPaymentSubmission {
                trainer_id: first,
                plan_id: None,
                amount: 700,
                receipt_ref: "pending".into(),
                external_ref: None,
            },
        )
        .await
        .unwrap();
    let second_payout = h.engine.payouts.history_for(second).await.unwrap().remove(0);
    h.engine
        .payouts
        .mark_paid(second_payout.id, admin, None)
        .await
        .unwrap();

    let platform = h.engine.aggregator.platform_summary().await.unwrap();
    assert_eq!(platform.trainer_count, 2);
    assert_eq!(platform.gross_income, 5000);
    assert_eq!(platform.trainer_share, 4500);
    assert_eq!(platform.platform_share, 500);
    assert_eq!(platform.paid_out, 3600);
    assert_eq!(platform.pending_payouts, 900);
    assert_eq!(platform.amount_owed, 0);
    assert_eq!(platform.stats.pending_manual_count, 1);
    assert_eq!(platform.stats.approved_this_month, 2);
    assert_eq!(platform.stats.pending_payout_count, 1);
    assert_eq!(platform.stats.pending_payout_amount, 900);
    assert_eq!(platform.stats.paid_payout_count, 1);
}

#[tokio::test]
async fn recent_payments_keep_the_latest_five() {
    let h = harness();
    let trainer = Uuid::new_v4();
    for amount in 1..=7 {
        approve(&h, trainer, amount * 100).await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    let summary = h.engine.aggregator.trainer_summary(trainer).await.unwrap();
    assert_eq!(summary.approved_payment_count, 7);
    let amounts: Vec<i64> = summary
        .recent_payments
        .iter()
        .map(|payment| payment.amount)
        .collect();
    assert_eq!(amounts, vec![700, 600, 500, 400, 300]);
}
