use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use super::{
    Approval, EarningsStore, ManualPaymentFilter, NewManualPayment, NewPaymentRecord, NewPayout,
    NewPlan, NewSubscription, PayoutCredit, RecordInsert, Transition,
};
use crate::earnings::gateway::AccountStatus;
use crate::earnings::models::{
    ConnectedAccount, FundingSource, ManualPayment, ManualPaymentStatus, PaymentRecord,
    PaymentStatus, Payout, PayoutStatus, PricingPlan, Subscription, UnknownVariant,
};
use crate::earnings::payouts::{append_note, CreditPolicy};
use crate::error::{AppError, AppResult};

/// key: earnings-store-postgres -> durable ledger on sqlx
#[derive(Clone)]
pub struct PgEarningsStore {
    pool: PgPool,
}

impl PgEarningsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_text<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = UnknownVariant>,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|err: UnknownVariant| sqlx::Error::Decode(Box::new(err)))
}

fn plan_from_row(row: &PgRow) -> Result<PricingPlan, sqlx::Error> {
    Ok(PricingPlan {
        id: row.try_get("id")?,
        trainer_id: row.try_get("trainer_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        price: row.try_get("price")?,
        currency: row.try_get("currency")?,
        interval: parse_text(row, "billing_interval")?,
        duration_weeks: row.try_get("duration_weeks")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn subscription_from_row(row: &PgRow) -> Result<Subscription, sqlx::Error> {
    let funding_kind: String = row.try_get("funding_kind")?;
    let funding = FundingSource::from_parts(&funding_kind, row.try_get("funding_id")?)
        .map_err(|err| sqlx::Error::Decode(Box::new(err)))?;
    Ok(Subscription {
        id: row.try_get("id")?,
        client_id: row.try_get("client_id")?,
        trainer_id: row.try_get("trainer_id")?,
        plan_id: row.try_get("plan_id")?,
        status: parse_text(row, "status")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        canceled_at: row.try_get("canceled_at")?,
        external_ref: row.try_get("external_ref")?,
        funding,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn record_from_row(row: &PgRow) -> Result<PaymentRecord, sqlx::Error> {
    Ok(PaymentRecord {
        id: row.try_get("id")?,
        subscription_id: row.try_get("subscription_id")?,
        trainer_id: row.try_get("trainer_id")?,
        client_id: row.try_get("client_id")?,
        plan_id: row.try_get("plan_id")?,
        external_payment_id: row.try_get("external_payment_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        status: parse_text(row, "status")?,
        receipt_url: row.try_get("receipt_url")?,
        created_at: row.try_get("created_at")?,
    })
}

fn manual_payment_from_row(row: &PgRow) -> Result<ManualPayment, sqlx::Error> {
    Ok(ManualPayment {
        id: row.try_get("id")?,
        client_id: row.try_get("client_id")?,
        trainer_id: row.try_get("trainer_id")?,
        plan_id: row.try_get("plan_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        receipt_ref: row.try_get("receipt_ref")?,
        external_ref: row.try_get("external_ref")?,
        status: parse_text(row, "status")?,
        decided_by: row.try_get("decided_by")?,
        decided_at: row.try_get("decided_at")?,
        rejection_reason: row.try_get("rejection_reason")?,
        subscription_id: row.try_get("subscription_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn payout_from_row(row: &PgRow) -> Result<Payout, sqlx::Error> {
    Ok(Payout {
        id: row.try_get("id")?,
        trainer_id: row.try_get("trainer_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        status: parse_text(row, "status")?,
        method: row.try_get("method")?,
        destination_ref: row.try_get("destination_ref")?,
        notes: row.try_get("notes")?,
        paid_by: row.try_get("paid_by")?,
        paid_at: row.try_get("paid_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn account_from_row(row: &PgRow) -> Result<ConnectedAccount, sqlx::Error> {
    Ok(ConnectedAccount {
        owner_id: row.try_get("owner_id")?,
        account_ref: row.try_get("account_ref")?,
        charges_enabled: row.try_get("charges_enabled")?,
        payouts_enabled: row.try_get("payouts_enabled")?,
        details_submitted: row.try_get("details_submitted")?,
        status: row.try_get("status")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn collect<T>(
    rows: Vec<PgRow>,
    map: fn(&PgRow) -> Result<T, sqlx::Error>,
) -> AppResult<Vec<T>> {
    rows.iter()
        .map(|row| map(row).map_err(AppError::from))
        .collect()
}

/// Advisory lock key for a trainer; the high half of the uuid is plenty of entropy.
fn trainer_lock_key(trainer_id: Uuid) -> i64 {
    let mut high = [0u8; 8];
    high.copy_from_slice(&trainer_id.as_bytes()[..8]);
    i64::from_be_bytes(high)
}

/// Postgres reports `numeric_value_out_of_range` when an accumulated payout leaves BIGINT.
fn out_of_range_as_validation(err: sqlx::Error) -> AppError {
    let out_of_range = err
        .as_database_error()
        .and_then(|db| db.code())
        .map_or(false, |code| code == "22003");
    if out_of_range {
        AppError::Validation("Payout amount out of range".into())
    } else {
        AppError::from(err)
    }
}

/// Trainer owning a payout, read without locking so the advisory lock can be taken first.
async fn payout_trainer(
    tx: &mut Transaction<'_, Postgres>,
    payout_id: Uuid,
) -> AppResult<Option<Uuid>> {
    let trainer = sqlx::query_scalar::<_, Uuid>("SELECT trainer_id FROM payouts WHERE id = $1")
        .bind(payout_id)
        .fetch_optional(&mut *tx)
        .await?;
    Ok(trainer)
}

/// Serialises ledger writes for one trainer until the transaction ends.
async fn lock_trainer(tx: &mut Transaction<'_, Postgres>, trainer_id: Uuid) -> AppResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(trainer_lock_key(trainer_id))
        .execute(&mut *tx)
        .await?;
    Ok(())
}

async fn credit_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    credit: &PayoutCredit,
    at: DateTime<Utc>,
) -> AppResult<Payout> {
    lock_trainer(tx, credit.trainer_id).await?;

    if credit.policy == CreditPolicy::Accumulate {
        let open = sqlx::query(
            r#"
            UPDATE payouts
            SET amount = amount + $3,
                destination_ref = COALESCE(destination_ref, $4),
                updated_at = $5
            WHERE id = (
                SELECT id FROM payouts
                WHERE trainer_id = $1 AND currency = $2 AND status = 'PENDING'
                ORDER BY created_at ASC
                LIMIT 1
            )
            AND status = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(credit.trainer_id)
        .bind(&credit.currency)
        .bind(credit.amount)
        .bind(&credit.destination_ref)
        .bind(at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(out_of_range_as_validation)?;
        if let Some(row) = open {
            return Ok(payout_from_row(&row)?);
        }
    }

    let row = sqlx::query(
        r#"
        INSERT INTO payouts (
            id, trainer_id, amount, currency, status, method, destination_ref,
            created_at, updated_at
        ) VALUES ($1, $2, $3, $4, 'PENDING', $5, $6, $7, $7)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(credit.trainer_id)
    .bind(credit.amount)
    .bind(&credit.currency)
    .bind(&credit.method)
    .bind(&credit.destination_ref)
    .bind(at)
    .fetch_one(&mut *tx)
    .await?;
    Ok(payout_from_row(&row)?)
}

#[async_trait]
impl EarningsStore for PgEarningsStore {
    async fn insert_plan(&self, plan: NewPlan) -> AppResult<PricingPlan> {
        let row = sqlx::query(
            r#"
            INSERT INTO pricing_plans (
                id, trainer_id, name, description, price, currency, billing_interval,
                duration_weeks, active
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(plan.trainer_id)
        .bind(&plan.name)
        .bind(&plan.description)
        .bind(plan.price)
        .bind(&plan.currency)
        .bind(plan.interval.as_str())
        .bind(plan.duration_weeks)
        .fetch_one(&self.pool)
        .await?;
        Ok(plan_from_row(&row)?)
    }

    async fn get_plan(&self, plan_id: Uuid) -> AppResult<Option<PricingPlan>> {
        let row = sqlx::query("SELECT * FROM pricing_plans WHERE id = $1")
            .bind(plan_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(plan_from_row).transpose()?)
    }

    async fn update_plan(&self, plan: &PricingPlan) -> AppResult<PricingPlan> {
        let row = sqlx::query(
            r#"
            UPDATE pricing_plans
            SET name = $2, description = $3, price = $4, billing_interval = $5,
                duration_weeks = $6, active = $7, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(plan.id)
        .bind(&plan.name)
        .bind(&plan.description)
        .bind(plan.price)
        .bind(plan.interval.as_str())
        .bind(plan.duration_weeks)
        .bind(plan.active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::not_found("Plan"))?;
        Ok(plan_from_row(&row)?)
    }

    async fn list_plans(
        &self,
        trainer_id: Uuid,
        include_inactive: bool,
    ) -> AppResult<Vec<PricingPlan>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM pricing_plans
            WHERE trainer_id = $1 AND (active OR $2)
            ORDER BY created_at ASC
            "#,
        )
        .bind(trainer_id)
        .bind(include_inactive)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, plan_from_row)
    }

    async fn fund_subscription(&self, draft: NewSubscription) -> AppResult<Subscription> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, client_id, trainer_id, plan_id, status, start_date, end_date,
                external_ref, funding_kind, funding_id
            ) VALUES ($1, $2, $3, $4, 'ACTIVE', $5, $6, $7, $8, $9)
            ON CONFLICT (funding_kind, funding_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(draft.client_id)
        .bind(draft.trainer_id)
        .bind(draft.plan_id)
        .bind(draft.start_date)
        .bind(draft.end_date)
        .bind(&draft.external_ref)
        .bind(draft.funding.kind())
        .bind(draft.funding.id())
        .fetch_optional(&mut tx)
        .await?;

        let row = match inserted {
            Some(row) => row,
            None => {
                sqlx::query(
                    "SELECT * FROM subscriptions WHERE funding_kind = $1 AND funding_id = $2",
                )
                .bind(draft.funding.kind())
                .bind(draft.funding.id())
                .fetch_one(&mut tx)
                .await?
            }
        };
        let subscription = subscription_from_row(&row)?;

        let link = match subscription.funding {
            FundingSource::GatewayPayment(_) => {
                "UPDATE payment_records SET subscription_id = $1 WHERE id = $2 AND subscription_id IS NULL"
            }
            FundingSource::ManualPayment(_) => {
                "UPDATE manual_payments SET subscription_id = $1 WHERE id = $2 AND subscription_id IS NULL"
            }
        };
        sqlx::query(link)
            .bind(subscription.id)
            .bind(subscription.funding.id())
            .execute(&mut tx)
            .await?;

        tx.commit().await?;
        Ok(subscription)
    }

    async fn get_subscription(&self, subscription_id: Uuid) -> AppResult<Option<Subscription>> {
        let row = sqlx::query("SELECT * FROM subscriptions WHERE id = $1")
            .bind(subscription_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(subscription_from_row).transpose()?)
    }

    async fn cancel_subscription(
        &self,
        subscription_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Subscription>> {
        let changed = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'CANCELED', canceled_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'ACTIVE'
            RETURNING *
            "#,
        )
        .bind(subscription_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        match changed {
            Some(row) => Ok(Some(subscription_from_row(&row)?)),
            None => self.get_subscription(subscription_id).await,
        }
    }

    async fn cancel_subscriptions_by_external_ref(
        &self,
        external_ref: &str,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<Subscription>> {
        let rows = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'CANCELED', canceled_at = $2, updated_at = $2
            WHERE external_ref = $1 AND status = 'ACTIVE'
            RETURNING *
            "#,
        )
        .bind(external_ref)
        .bind(at)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, subscription_from_row)
    }

    async fn list_subscriptions_for_client(&self, client_id: Uuid) -> AppResult<Vec<Subscription>> {
        let rows =
            sqlx::query("SELECT * FROM subscriptions WHERE client_id = $1 ORDER BY created_at ASC")
                .bind(client_id)
                .fetch_all(&self.pool)
                .await?;
        collect(rows, subscription_from_row)
    }

    async fn list_subscriptions_for_trainer(
        &self,
        trainer_id: Uuid,
        active_only: bool,
    ) -> AppResult<Vec<Subscription>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM subscriptions
            WHERE trainer_id = $1 AND (NOT $2 OR status = 'ACTIVE')
            ORDER BY created_at ASC
            "#,
        )
        .bind(trainer_id)
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, subscription_from_row)
    }

    async fn insert_payment_record(&self, record: NewPaymentRecord) -> AppResult<RecordInsert> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO payment_records (
                id, trainer_id, client_id, plan_id, external_payment_id, amount, currency,
                status, receipt_url
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (external_payment_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.trainer_id)
        .bind(record.client_id)
        .bind(record.plan_id)
        .bind(&record.external_payment_id)
        .bind(record.amount)
        .bind(&record.currency)
        .bind(PaymentStatus::Succeeded.as_str())
        .bind(&record.receipt_url)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = inserted {
            return Ok(RecordInsert::Inserted(record_from_row(&row)?));
        }
        let existing = self
            .find_payment_record(&record.external_payment_id)
            .await?
            .ok_or_else(|| AppError::Message("payment record vanished after conflict".into()))?;
        Ok(RecordInsert::Existing(existing))
    }

    async fn find_payment_record(
        &self,
        external_payment_id: &str,
    ) -> AppResult<Option<PaymentRecord>> {
        let row = sqlx::query("SELECT * FROM payment_records WHERE external_payment_id = $1")
            .bind(external_payment_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(record_from_row).transpose()?)
    }

    async fn list_payment_records_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> AppResult<Vec<PaymentRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM payment_records WHERE subscription_id = $1 ORDER BY created_at ASC",
        )
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, record_from_row)
    }

    async fn list_payment_records(
        &self,
        trainer_id: Option<Uuid>,
    ) -> AppResult<Vec<PaymentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM payment_records
            WHERE ($1::uuid IS NULL OR trainer_id = $1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(trainer_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, record_from_row)
    }

    async fn insert_manual_payment(&self, payment: NewManualPayment) -> AppResult<ManualPayment> {
        let row = sqlx::query(
            r#"
            INSERT INTO manual_payments (
                id, client_id, trainer_id, plan_id, amount, currency, receipt_ref,
                external_ref, status
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'PENDING')
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(payment.client_id)
        .bind(payment.trainer_id)
        .bind(payment.plan_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(&payment.receipt_ref)
        .bind(&payment.external_ref)
        .fetch_one(&self.pool)
        .await?;
        Ok(manual_payment_from_row(&row)?)
    }

    async fn get_manual_payment(&self, payment_id: Uuid) -> AppResult<Option<ManualPayment>> {
        let row = sqlx::query("SELECT * FROM manual_payments WHERE id = $1")
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(manual_payment_from_row).transpose()?)
    }

    async fn list_manual_payments(
        &self,
        filter: ManualPaymentFilter,
    ) -> AppResult<Vec<ManualPayment>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM manual_payments
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR client_id = $2)
              AND ($3::uuid IS NULL OR trainer_id = $3)
            ORDER BY created_at ASC
            "#,
        )
        .bind(filter.status.map(|status| status.as_str()))
        .bind(filter.client_id)
        .bind(filter.trainer_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, manual_payment_from_row)
    }

    async fn approve_manual_payment(
        &self,
        payment_id: Uuid,
        admin_id: Uuid,
        at: DateTime<Utc>,
        credit: &PayoutCredit,
    ) -> AppResult<Transition<Approval, ManualPayment>> {
        let mut tx = self.pool.begin().await?;
        lock_trainer(&mut tx, credit.trainer_id).await?;

        let current = sqlx::query("SELECT * FROM manual_payments WHERE id = $1 FOR UPDATE")
            .bind(payment_id)
            .fetch_optional(&mut tx)
            .await?;
        let Some(current) = current else {
            return Ok(Transition::Missing);
        };
        let current = manual_payment_from_row(&current)?;
        if current.status != ManualPaymentStatus::Pending {
            return Ok(Transition::Stale(current));
        }

        let row = sqlx::query(
            r#"
            UPDATE manual_payments
            SET status = 'APPROVED', decided_by = $2, decided_at = $3
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(payment_id)
        .bind(admin_id)
        .bind(at)
        .fetch_one(&mut tx)
        .await?;
        let payment = manual_payment_from_row(&row)?;
        let payout = credit_in_tx(&mut tx, credit, at).await?;

        tx.commit().await?;
        Ok(Transition::Applied(Approval { payment, payout }))
    }

    async fn reject_manual_payment(
        &self,
        payment_id: Uuid,
        admin_id: Uuid,
        at: DateTime<Utc>,
        reason: Option<String>,
    ) -> AppResult<Transition<ManualPayment>> {
        let mut tx = self.pool.begin().await?;
        let current = sqlx::query("SELECT * FROM manual_payments WHERE id = $1 FOR UPDATE")
            .bind(payment_id)
            .fetch_optional(&mut tx)
            .await?;
        let Some(current) = current else {
            return Ok(Transition::Missing);
        };
        let current = manual_payment_from_row(&current)?;
        if current.status != ManualPaymentStatus::Pending {
            return Ok(Transition::Stale(current));
        }

        let row = sqlx::query(
            r#"
            UPDATE manual_payments
            SET status = 'REJECTED', decided_by = $2, decided_at = $3, rejection_reason = $4
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(payment_id)
        .bind(admin_id)
        .bind(at)
        .bind(&reason)
        .fetch_one(&mut tx)
        .await?;
        let payment = manual_payment_from_row(&row)?;
        tx.commit().await?;
        Ok(Transition::Applied(payment))
    }

    async fn credit_payout(&self, credit: &PayoutCredit) -> AppResult<Payout> {
        let mut tx = self.pool.begin().await?;
        let payout = credit_in_tx(&mut tx, credit, Utc::now()).await?;
        tx.commit().await?;
        Ok(payout)
    }

    async fn insert_payout(&self, payout: NewPayout) -> AppResult<Payout> {
        let row = sqlx::query(
            r#"
            INSERT INTO payouts (
                id, trainer_id, amount, currency, status, method, destination_ref, notes
            ) VALUES ($1, $2, $3, $4, 'PENDING', $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(payout.trainer_id)
        .bind(payout.amount)
        .bind(&payout.currency)
        .bind(&payout.method)
        .bind(&payout.destination_ref)
        .bind(&payout.notes)
        .fetch_one(&self.pool)
        .await?;
        Ok(payout_from_row(&row)?)
    }

    async fn get_payout(&self, payout_id: Uuid) -> AppResult<Option<Payout>> {
        let row = sqlx::query("SELECT * FROM payouts WHERE id = $1")
            .bind(payout_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(payout_from_row).transpose()?)
    }

    async fn mark_payout_paid(
        &self,
        payout_id: Uuid,
        admin_id: Uuid,
        at: DateTime<Utc>,
        note: Option<String>,
    ) -> AppResult<Transition<Payout>> {
        let mut tx = self.pool.begin().await?;
        let Some(trainer_id) = payout_trainer(&mut tx, payout_id).await? else {
            return Ok(Transition::Missing);
        };
        lock_trainer(&mut tx, trainer_id).await?;
        let current = sqlx::query("SELECT * FROM payouts WHERE id = $1 FOR UPDATE")
            .bind(payout_id)
            .fetch_optional(&mut tx)
            .await?;
        let Some(current) = current else {
            return Ok(Transition::Missing);
        };
        let current = payout_from_row(&current)?;
        if current.status == PayoutStatus::Paid {
            return Ok(Transition::Stale(current));
        }

        let notes = append_note(current.notes.as_deref(), note.as_deref());
        let row = sqlx::query(
            r#"
            UPDATE payouts
            SET status = 'PAID', paid_by = $2, paid_at = $3, notes = $4, updated_at = $3
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(payout_id)
        .bind(admin_id)
        .bind(at)
        .bind(&notes)
        .fetch_one(&mut tx)
        .await?;
        let payout = payout_from_row(&row)?;
        tx.commit().await?;
        Ok(Transition::Applied(payout))
    }

    async fn delete_pending_payout(&self, payout_id: Uuid) -> AppResult<Transition<Payout>> {
        let mut tx = self.pool.begin().await?;
        let Some(trainer_id) = payout_trainer(&mut tx, payout_id).await? else {
            return Ok(Transition::Missing);
        };
        lock_trainer(&mut tx, trainer_id).await?;
        let current = sqlx::query("SELECT * FROM payouts WHERE id = $1 FOR UPDATE")
            .bind(payout_id)
            .fetch_optional(&mut tx)
            .await?;
        let Some(current) = current else {
            return Ok(Transition::Missing);
        };
        let current = payout_from_row(&current)?;
        if current.status == PayoutStatus::Paid {
            return Ok(Transition::Stale(current));
        }
        sqlx::query("DELETE FROM payouts WHERE id = $1")
            .bind(payout_id)
            .execute(&mut tx)
            .await?;
        tx.commit().await?;
        Ok(Transition::Applied(current))
    }

    async fn list_payouts(
        &self,
        trainer_id: Option<Uuid>,
        status: Option<PayoutStatus>,
    ) -> AppResult<Vec<Payout>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM payouts
            WHERE ($1::uuid IS NULL OR trainer_id = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at ASC
            "#,
        )
        .bind(trainer_id)
        .bind(status.map(|status| status.as_str()))
        .fetch_all(&self.pool)
        .await?;
        collect(rows, payout_from_row)
    }

    async fn get_account(&self, owner_id: Uuid) -> AppResult<Option<ConnectedAccount>> {
        let row = sqlx::query("SELECT * FROM connected_accounts WHERE owner_id = $1")
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(account_from_row).transpose()?)
    }

    async fn insert_account(&self, account: ConnectedAccount) -> AppResult<ConnectedAccount> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO connected_accounts (
                owner_id, account_ref, charges_enabled, payouts_enabled, details_submitted,
                status, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (owner_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(account.owner_id)
        .bind(&account.account_ref)
        .bind(account.charges_enabled)
        .bind(account.payouts_enabled)
        .bind(account.details_submitted)
        .bind(&account.status)
        .bind(account.created_at)
        .bind(account.updated_at)
        .fetch_optional(&self.pool)
        .await?;
        match inserted {
            Some(row) => Ok(account_from_row(&row)?),
            None => self
                .get_account(account.owner_id)
                .await?
                .ok_or_else(|| AppError::Message("connected account vanished after conflict".into())),
        }
    }

    async fn update_account_status(
        &self,
        account_ref: &str,
        status: &AccountStatus,
        at: DateTime<Utc>,
    ) -> AppResult<Option<ConnectedAccount>> {
        let row = sqlx::query(
            r#"
            UPDATE connected_accounts
            SET charges_enabled = $2, payouts_enabled = $3, details_submitted = $4,
                status = $5, updated_at = $6
            WHERE account_ref = $1
            RETURNING *
            "#,
        )
        .bind(account_ref)
        .bind(status.charges_enabled)
        .bind(status.payouts_enabled)
        .bind(status.details_submitted)
        .bind(status.label())
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(account_from_row).transpose()?)
    }
}
