//! Read-side projection over payments, approvals and payouts.
//!
//! Nothing here writes. Reads across the stores are not taken in one transaction; a summary
//! may be a moment stale, which is fine for a dashboard.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use futures_util::future::try_join3;
use serde::Serialize;
use uuid::Uuid;

use super::commission::{split, CommissionRates};
use super::models::{ManualPayment, ManualPaymentStatus, Money, PaymentRecord, Payout, PayoutStatus};
use super::store::{EarningsStore, ManualPaymentFilter};
use crate::error::AppResult;

const RECENT_PAYMENTS: usize = 5;

/// First instant of the UTC calendar month containing `now`.
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .with_day(1)
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|midnight| Utc.from_utc_datetime(&midnight))
        .unwrap_or(now)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainerSummary {
    pub trainer_id: Uuid,
    pub manual_gross: Money,
    pub gateway_gross: Money,
    pub gross_income: Money,
    pub trainer_share: Money,
    pub platform_share: Money,
    pub paid_out: Money,
    pub pending_payouts: Money,
    pub amount_owed: Money,
    pub approved_payment_count: usize,
    pub gateway_payment_count: usize,
    pub recent_payments: Vec<ManualPayment>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinanceStats {
    pub pending_manual_count: usize,
    pub approved_this_month: usize,
    pub pending_payout_count: usize,
    pub pending_payout_amount: Money,
    pub paid_payout_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSummary {
    pub trainer_count: usize,
    pub manual_gross: Money,
    pub gateway_gross: Money,
    pub gross_income: Money,
    pub trainer_share: Money,
    pub platform_share: Money,
    pub paid_out: Money,
    pub pending_payouts: Money,
    pub amount_owed: Money,
    pub stats: FinanceStats,
}

/// Ledger totals saturate instead of wrapping.
fn add(total: &mut Money, amount: Money) {
    *total = total.saturating_add(amount);
}

/// Folds one trainer's approved income and payouts into a summary.
///
/// Each payment is split at its channel's rate before summing. `amount_owed` is clamped at
/// zero: paid plus pending can exceed the computed share after manual corrections.
pub fn summarize(
    trainer_id: Uuid,
    approved_manual: &[ManualPayment],
    gateway_records: &[PaymentRecord],
    payouts: &[Payout],
    rates: &CommissionRates,
) -> TrainerSummary {
    let mut summary = TrainerSummary {
        trainer_id,
        manual_gross: 0,
        gateway_gross: 0,
        gross_income: 0,
        trainer_share: 0,
        platform_share: 0,
        paid_out: 0,
        pending_payouts: 0,
        amount_owed: 0,
        approved_payment_count: 0,
        gateway_payment_count: 0,
        recent_payments: Vec::new(),
    };

    for payment in approved_manual
        .iter()
        .filter(|p| p.status == ManualPaymentStatus::Approved)
    {
        let shares = split(payment.amount, rates.manual);
        add(&mut summary.manual_gross, payment.amount);
        add(&mut summary.trainer_share, shares.trainer_share);
        add(&mut summary.platform_share, shares.platform_share);
        summary.approved_payment_count += 1;
    }
    for record in gateway_records {
        let shares = split(record.amount, rates.gateway);
        add(&mut summary.gateway_gross, record.amount);
        add(&mut summary.trainer_share, shares.trainer_share);
        add(&mut summary.platform_share, shares.platform_share);
        summary.gateway_payment_count += 1;
    }
    summary.gross_income = summary.manual_gross.saturating_add(summary.gateway_gross);

    for payout in payouts {
        match payout.status {
            PayoutStatus::Paid => add(&mut summary.paid_out, payout.amount),
            PayoutStatus::Pending => add(&mut summary.pending_payouts, payout.amount),
        }
    }
    summary.amount_owed = summary
        .trainer_share
        .saturating_sub(summary.paid_out.saturating_add(summary.pending_payouts))
        .max(0);
    summary
}

#[derive(Default)]
struct TrainerLedger {
    manual: Vec<ManualPayment>,
    gateway: Vec<PaymentRecord>,
    payouts: Vec<Payout>,
}

/// key: earnings-aggregator -> dashboards over the ledger
#[derive(Clone)]
pub struct EarningsAggregator {
    store: Arc<dyn EarningsStore>,
    rates: CommissionRates,
}

impl EarningsAggregator {
    pub fn new(store: Arc<dyn EarningsStore>, rates: CommissionRates) -> Self {
        Self { store, rates }
    }

    pub async fn trainer_summary(&self, trainer_id: Uuid) -> AppResult<TrainerSummary> {
        let approved = self
            .store
            .list_manual_payments(ManualPaymentFilter {
                status: Some(ManualPaymentStatus::Approved),
                trainer_id: Some(trainer_id),
                ..ManualPaymentFilter::default()
            })
            .await?;
        let records = self.store.list_payment_records(Some(trainer_id)).await?;
        let payouts = self.store.list_payouts(Some(trainer_id), None).await?;

        let mut summary = summarize(trainer_id, &approved, &records, &payouts, &self.rates);
        summary.recent_payments = approved
            .into_iter()
            .rev()
            .take(RECENT_PAYMENTS)
            .collect();
        Ok(summary)
    }

    async fn summaries(&self) -> AppResult<Vec<TrainerSummary>> {
        let (approved, records, payouts) = try_join3(
            self.store.list_manual_payments(ManualPaymentFilter {
                status: Some(ManualPaymentStatus::Approved),
                ..ManualPaymentFilter::default()
            }),
            self.store.list_payment_records(None),
            self.store.list_payouts(None, None),
        )
        .await?;

        let mut ledgers: HashMap<Uuid, TrainerLedger> = HashMap::new();
        for payment in approved {
            ledgers.entry(payment.trainer_id).or_default().manual.push(payment);
        }
        for record in records {
            ledgers.entry(record.trainer_id).or_default().gateway.push(record);
        }
        for payout in payouts {
            ledgers.entry(payout.trainer_id).or_default().payouts.push(payout);
        }

        let trainers: BTreeSet<Uuid> = ledgers.keys().copied().collect();
        Ok(trainers
            .into_iter()
            .filter_map(|trainer_id| {
                ledgers.get(&trainer_id).map(|ledger| {
                    summarize(
                        trainer_id,
                        &ledger.manual,
                        &ledger.gateway,
                        &ledger.payouts,
                        &self.rates,
                    )
                })
            })
            .collect())
    }

    pub async fn platform_summary(&self) -> AppResult<PlatformSummary> {
        let summaries = self.summaries().await?;
        let mut platform = PlatformSummary {
            trainer_count: summaries.len(),
            ..PlatformSummary::default()
        };
        for summary in &summaries {
            add(&mut platform.manual_gross, summary.manual_gross);
            add(&mut platform.gateway_gross, summary.gateway_gross);
            add(&mut platform.gross_income, summary.gross_income);
            add(&mut platform.trainer_share, summary.trainer_share);
            add(&mut platform.platform_share, summary.platform_share);
            add(&mut platform.paid_out, summary.paid_out);
            add(&mut platform.pending_payouts, summary.pending_payouts);
            add(&mut platform.amount_owed, summary.amount_owed);
        }
        platform.stats = self.finance_stats().await?;
        Ok(platform)
    }

    async fn finance_stats(&self) -> AppResult<FinanceStats> {
        let this_month = month_start(Utc::now());
        let pending_manual_count = self
            .store
            .list_manual_payments(ManualPaymentFilter {
                status: Some(ManualPaymentStatus::Pending),
                ..ManualPaymentFilter::default()
            })
            .await?
            .len();
        let approved_this_month = self
            .store
            .list_manual_payments(ManualPaymentFilter {
                status: Some(ManualPaymentStatus::Approved),
                ..ManualPaymentFilter::default()
            })
            .await?
            .iter()
            .filter(|p| p.decided_at.map_or(false, |at| at >= this_month))
            .count();
        let payouts = self.store.list_payouts(None, None).await?;
        let (pending, paid): (Vec<&Payout>, Vec<&Payout>) = payouts
            .iter()
            .partition(|payout| payout.status == PayoutStatus::Pending);
        Ok(FinanceStats {
            pending_manual_count,
            approved_this_month,
            pending_payout_count: pending.len(),
            pending_payout_amount: pending
                .iter()
                .fold(0, |total: Money, payout| total.saturating_add(payout.amount)),
            paid_payout_count: paid.len(),
        })
    }

    /// Trainers still owed money, most owed first.
    pub async fn all_trainer_earnings_ranked(&self) -> AppResult<Vec<TrainerSummary>> {
        let mut ranked: Vec<TrainerSummary> = self
            .summaries()
            .await?
            .into_iter()
            .filter(|summary| summary.amount_owed > 0)
            .collect();
        ranked.sort_by(|a, b| {
            b.amount_owed
                .cmp(&a.amount_owed)
                .then_with(|| a.trainer_id.cmp(&b.trainer_id))
        });
        Ok(ranked)
    }
}
