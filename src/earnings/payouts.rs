use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::models::{Money, Payout, PayoutStatus, UnknownVariant, MAX_AMOUNT};
use super::store::{EarningsStore, NewPayout, PayoutCredit, Transition};
use crate::error::{AppError, AppResult};

/// How a credit lands in a trainer's payouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditPolicy {
    /// Top up the trainer's open PENDING payout, creating one only when none exists.
    #[default]
    Accumulate,
    /// One PENDING payout per credit.
    PerCredit,
}

impl CreditPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditPolicy::Accumulate => "accumulate",
            CreditPolicy::PerCredit => "per_credit",
        }
    }
}

impl FromStr for CreditPolicy {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "accumulate" => Ok(CreditPolicy::Accumulate),
            "per_credit" => Ok(CreditPolicy::PerCredit),
            other => Err(UnknownVariant {
                kind: "payout credit policy",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for CreditPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Appends `note` on its own line; prior notes are never overwritten.
pub fn append_note(existing: Option<&str>, note: Option<&str>) -> Option<String> {
    let existing = existing.map(str::trim).filter(|value| !value.is_empty());
    let note = note.map(str::trim).filter(|value| !value.is_empty());
    match (existing, note) {
        (Some(existing), Some(note)) => Some(format!("{existing}\n{note}")),
        (Some(only), None) | (None, Some(only)) => Some(only.to_string()),
        (None, None) => None,
    }
}

/// key: payout-ledger -> what each trainer is owed and its disbursement
#[derive(Clone)]
pub struct PayoutLedger {
    store: Arc<dyn EarningsStore>,
    policy: CreditPolicy,
    default_method: String,
}

impl PayoutLedger {
    pub fn new(
        store: Arc<dyn EarningsStore>,
        policy: CreditPolicy,
        default_method: impl Into<String>,
    ) -> Self {
        Self {
            store,
            policy,
            default_method: default_method.into().to_ascii_lowercase(),
        }
    }

    pub fn policy(&self) -> CreditPolicy {
        self.policy
    }

    /// Builds the credit the store applies; approvals hand it over so approval and credit
    /// commit together.
    pub fn credit_for(
        &self,
        trainer_id: Uuid,
        amount: Money,
        currency: &str,
        destination_ref: Option<String>,
    ) -> PayoutCredit {
        PayoutCredit {
            trainer_id,
            amount,
            currency: currency.to_ascii_lowercase(),
            method: self.default_method.clone(),
            destination_ref,
            policy: self.policy,
        }
    }

    pub async fn credit(
        &self,
        trainer_id: Uuid,
        amount: Money,
        currency: &str,
        destination_ref: Option<String>,
    ) -> AppResult<Payout> {
        if amount < 0 {
            return Err(AppError::Validation(
                "Credit amount must not be negative".into(),
            ));
        }
        let credit = self.credit_for(trainer_id, amount, currency, destination_ref);
        let payout = self.store.credit_payout(&credit).await?;
        info!(
            %trainer_id,
            payout = %payout.id,
            amount,
            balance = payout.amount,
            policy = %self.policy,
            "payout credited"
        );
        Ok(payout)
    }

    pub async fn record_manual_payout(
        &self,
        trainer_id: Uuid,
        amount: Money,
        currency: &str,
        method: Option<&str>,
        destination_ref: Option<String>,
        notes: Option<String>,
    ) -> AppResult<Payout> {
        if amount <= 0 {
            return Err(AppError::Validation(
                "Payout amount must be positive".into(),
            ));
        }
        if amount > MAX_AMOUNT {
            return Err(AppError::Validation(format!(
                "Payout amount cannot exceed {MAX_AMOUNT}"
            )));
        }
        let method = method
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| self.default_method.clone());
        let payout = self
            .store
            .insert_payout(NewPayout {
                trainer_id,
                amount,
                currency: currency.to_ascii_lowercase(),
                method,
                destination_ref,
                notes: append_note(None, notes.as_deref()),
            })
            .await?;
        info!(%trainer_id, payout = %payout.id, amount, "manual payout recorded");
        Ok(payout)
    }

    pub async fn mark_paid(
        &self,
        payout_id: Uuid,
        admin_id: Uuid,
        notes: Option<String>,
    ) -> AppResult<Payout> {
        match self
            .store
            .mark_payout_paid(payout_id, admin_id, Utc::now(), notes)
            .await?
        {
            Transition::Applied(payout) => {
                info!(
                    payout = %payout.id,
                    trainer_id = %payout.trainer_id,
                    admin = %admin_id,
                    amount = payout.amount,
                    "payout marked paid"
                );
                Ok(payout)
            }
            Transition::Stale(current) => Err(AppError::conflict(
                "Payout already marked as paid",
                current.id,
                current.status.as_str(),
            )),
            Transition::Missing => Err(AppError::not_found("Payout")),
        }
    }

    /// Removes a PENDING payout. PAID payouts are immutable.
    pub async fn cancel(&self, payout_id: Uuid) -> AppResult<Payout> {
        match self.store.delete_pending_payout(payout_id).await? {
            Transition::Applied(payout) => {
                info!(
                    payout = %payout.id,
                    trainer_id = %payout.trainer_id,
                    amount = payout.amount,
                    "pending payout canceled"
                );
                Ok(payout)
            }
            Transition::Stale(current) => Err(AppError::conflict(
                "Cannot cancel a paid payout",
                current.id,
                current.status.as_str(),
            )),
            Transition::Missing => Err(AppError::not_found("Payout")),
        }
    }

    pub async fn history_for(&self, trainer_id: Uuid) -> AppResult<Vec<Payout>> {
        let payouts = self.store.list_payouts(Some(trainer_id), None).await?;
        Ok(newest_first(payouts))
    }

    /// Every payout, PENDING ones first, newest first within each status.
    pub async fn all_payouts(&self) -> AppResult<Vec<Payout>> {
        let mut payouts = newest_first(self.store.list_payouts(None, None).await?);
        payouts.sort_by_key(|payout| payout.status != PayoutStatus::Pending);
        Ok(payouts)
    }

    pub async fn all_pending(&self) -> AppResult<Vec<Payout>> {
        let payouts = self
            .store
            .list_payouts(None, Some(PayoutStatus::Pending))
            .await?;
        Ok(newest_first(payouts))
    }

    pub async fn all_paid(&self) -> AppResult<Vec<Payout>> {
        let mut payouts = self
            .store
            .list_payouts(None, Some(PayoutStatus::Paid))
            .await?;
        payouts.sort_by(|a, b| b.paid_at.cmp(&a.paid_at));
        Ok(payouts)
    }
}

fn newest_first(mut payouts: Vec<Payout>) -> Vec<Payout> {
    payouts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    payouts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::earnings::store::MemoryEarningsStore;

    fn ledger(policy: CreditPolicy) -> PayoutLedger {
        PayoutLedger::new(Arc::new(MemoryEarningsStore::new()), policy, "Mobile_Money")
    }

    #[test]
    fn notes_are_appended_not_replaced() {
        assert_eq!(append_note(None, None), None);
        assert_eq!(append_note(Some("first"), None).as_deref(), Some("first"));
        assert_eq!(append_note(None, Some(" second ")).as_deref(), Some("second"));
        assert_eq!(
            append_note(Some("first"), Some("bank transfer #123")).as_deref(),
            Some("first\nbank transfer #123")
        );
        assert_eq!(append_note(Some("  "), Some("")), None);
    }

    #[test]
    fn credit_policy_parses_from_config_text() {
        assert_eq!("accumulate".parse(), Ok(CreditPolicy::Accumulate));
        assert_eq!("per_credit".parse(), Ok(CreditPolicy::PerCredit));
        assert!("weekly".parse::<CreditPolicy>().is_err());
        assert_eq!(CreditPolicy::default(), CreditPolicy::Accumulate);
    }

    #[tokio::test]
    async fn accumulate_tops_up_single_pending_payout() {
        let ledger = ledger(CreditPolicy::Accumulate);
        let trainer = Uuid::new_v4();
        let first = ledger.credit(trainer, 900, "usd", None).await.unwrap();
        let second = ledger
            .credit(trainer, 2250, "usd", Some("+255700000000".into()))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.amount, 3150);
        assert_eq!(second.method, "mobile_money");
        assert_eq!(second.destination_ref.as_deref(), Some("+255700000000"));
        assert_eq!(ledger.history_for(trainer).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn per_credit_policy_opens_a_payout_per_credit() {
        let ledger = ledger(CreditPolicy::PerCredit);
        let trainer = Uuid::new_v4();
        ledger.credit(trainer, 900, "usd", None).await.unwrap();
        ledger.credit(trainer, 2250, "usd", None).await.unwrap();
        let pending = ledger.all_pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending.iter().map(|p| p.amount).sum::<Money>(), 3150);
    }

    #[tokio::test]
    async fn paid_payout_is_not_topped_up() {
        let ledger = ledger(CreditPolicy::Accumulate);
        let trainer = Uuid::new_v4();
        let admin = Uuid::new_v4();
        let first = ledger.credit(trainer, 500, "usd", None).await.unwrap();
        ledger.mark_paid(first.id, admin, None).await.unwrap();
        let second = ledger.credit(trainer, 700, "usd", None).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(second.amount, 700);
    }

    #[tokio::test]
    async fn manual_payout_validates_and_lowercases_method() {
        let ledger = ledger(CreditPolicy::Accumulate);
        let trainer = Uuid::new_v4();
        let err = ledger
            .record_manual_payout(trainer, 0, "usd", None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let payout = ledger
            .record_manual_payout(
                trainer,
                1200,
                "USD",
                Some("Bank_Transfer"),
                Some("ACC-1".into()),
                Some("off-cycle".into()),
            )
            .await
            .unwrap();
        assert_eq!(payout.method, "bank_transfer");
        assert_eq!(payout.currency, "usd");
        assert_eq!(payout.status, PayoutStatus::Pending);
        assert_eq!(payout.notes.as_deref(), Some("off-cycle"));
    }

    #[tokio::test]
    async fn all_payouts_lists_pending_first() {
        let ledger = ledger(CreditPolicy::PerCredit);
        let admin = Uuid::new_v4();
        let paid = ledger.credit(Uuid::new_v4(), 100, "usd", None).await.unwrap();
        ledger.mark_paid(paid.id, admin, None).await.unwrap();
        let pending = ledger.credit(Uuid::new_v4(), 200, "usd", None).await.unwrap();
        let all = ledger.all_payouts().await.unwrap();
        assert_eq!(all[0].id, pending.id);
        assert_eq!(all[1].id, paid.id);
        assert_eq!(ledger.all_paid().await.unwrap().len(), 1);
    }
}
