//! Admin-only finance endpoints. Every handler checks the admin role before touching state.

use axum::extract::Path;
use axum::http::StatusCode;
use axum::{
    routing::{delete, get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::aggregator::{PlatformSummary, TrainerSummary};
use super::manual::ApprovedPayment;
use super::models::{ManualPayment, Money, Payout};
use super::EarningsEngine;
use crate::error::AppResult;
use crate::extractor::AuthUser;

pub fn routes() -> Router {
    Router::new()
        .route(
            "/api/admin/manual-payments/pending",
            get(list_pending_manual_payments),
        )
        .route(
            "/api/admin/manual-payments/:id/approve",
            post(approve_manual_payment),
        )
        .route(
            "/api/admin/manual-payments/:id/reject",
            post(reject_manual_payment),
        )
        .route(
            "/api/admin/payouts",
            get(list_payouts).post(record_manual_payout),
        )
        .route("/api/admin/payouts/pending", get(list_pending_payouts))
        .route("/api/admin/payouts/paid", get(list_paid_payouts))
        .route("/api/admin/payouts/:id/paid", post(mark_payout_paid))
        .route("/api/admin/payouts/:id", delete(cancel_payout))
        .route(
            "/api/admin/trainers/:trainer_id/payouts",
            get(trainer_payouts),
        )
        .route(
            "/api/admin/trainers/:trainer_id/earnings",
            get(trainer_earnings),
        )
        .route("/api/admin/earnings/platform", get(platform_summary))
        .route("/api/admin/earnings/outstanding", get(outstanding_earnings))
}

#[derive(Deserialize, Default)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct ManualPayoutRequest {
    pub trainer_id: Uuid,
    pub amount: Money,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub destination_ref: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct MarkPaidRequest {
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn list_pending_manual_payments(
    Extension(engine): Extension<EarningsEngine>,
    user: AuthUser,
) -> AppResult<Json<Vec<ManualPayment>>> {
    user.require_admin()?;
    Ok(Json(engine.manual.list_pending().await?))
}

pub async fn approve_manual_payment(
    Extension(engine): Extension<EarningsEngine>,
    user: AuthUser,
    Path(payment_id): Path<Uuid>,
) -> AppResult<Json<ApprovedPayment>> {
    user.require_admin()?;
    Ok(Json(engine.manual.approve(payment_id, user.user_id).await?))
}

pub async fn reject_manual_payment(
    Extension(engine): Extension<EarningsEngine>,
    user: AuthUser,
    Path(payment_id): Path<Uuid>,
    payload: Option<Json<RejectRequest>>,
) -> AppResult<Json<ManualPayment>> {
    user.require_admin()?;
    let payload = payload.map(|Json(body)| body).unwrap_or_default();
    let payment = engine
        .manual
        .reject(payment_id, user.user_id, payload.reason)
        .await?;
    Ok(Json(payment))
}

/// Pending payouts first, so the queue of work is at the top.
pub async fn list_payouts(
    Extension(engine): Extension<EarningsEngine>,
    user: AuthUser,
) -> AppResult<Json<Vec<Payout>>> {
    user.require_admin()?;
    Ok(Json(engine.payouts.all_payouts().await?))
}

pub async fn record_manual_payout(
    Extension(engine): Extension<EarningsEngine>,
    user: AuthUser,
    Json(payload): Json<ManualPayoutRequest>,
) -> AppResult<(StatusCode, Json<Payout>)> {
    user.require_admin()?;
    let currency = payload
        .currency
        .as_deref()
        .unwrap_or_else(|| engine.manual.currency());
    let payout = engine
        .payouts
        .record_manual_payout(
            payload.trainer_id,
            payload.amount,
            currency,
            payload.method.as_deref(),
            payload.destination_ref,
            payload.notes,
        )
        .await?;
    tracing::info!(admin = %user.user_id, payout = %payout.id, "admin recorded payout");
    Ok((StatusCode::CREATED, Json(payout)))
}

pub async fn list_pending_payouts(
    Extension(engine): Extension<EarningsEngine>,
    user: AuthUser,
) -> AppResult<Json<Vec<Payout>>> {
    user.require_admin()?;
    Ok(Json(engine.payouts.all_pending().await?))
}

pub async fn list_paid_payouts(
    Extension(engine): Extension<EarningsEngine>,
    user: AuthUser,
) -> AppResult<Json<Vec<Payout>>> {
    user.require_admin()?;
    Ok(Json(engine.payouts.all_paid().await?))
}

pub async fn mark_payout_paid(
    Extension(engine): Extension<EarningsEngine>,
    user: AuthUser,
    Path(payout_id): Path<Uuid>,
    payload: Option<Json<MarkPaidRequest>>,
) -> AppResult<Json<Payout>> {
    user.require_admin()?;
    let payload = payload.map(|Json(body)| body).unwrap_or_default();
    let payout = engine
        .payouts
        .mark_paid(payout_id, user.user_id, payload.notes)
        .await?;
    Ok(Json(payout))
}

pub async fn cancel_payout(
    Extension(engine): Extension<EarningsEngine>,
    user: AuthUser,
    Path(payout_id): Path<Uuid>,
) -> AppResult<Json<Payout>> {
    user.require_admin()?;
    let payout = engine.payouts.cancel(payout_id).await?;
    tracing::info!(admin = %user.user_id, payout = %payout.id, "admin canceled payout");
    Ok(Json(payout))
}

pub async fn trainer_payouts(
    Extension(engine): Extension<EarningsEngine>,
    user: AuthUser,
    Path(trainer_id): Path<Uuid>,
) -> AppResult<Json<Vec<Payout>>> {
    user.require_admin()?;
    Ok(Json(engine.payouts.history_for(trainer_id).await?))
}

pub async fn trainer_earnings(
    Extension(engine): Extension<EarningsEngine>,
    user: AuthUser,
    Path(trainer_id): Path<Uuid>,
) -> AppResult<Json<TrainerSummary>> {
    user.require_admin()?;
    Ok(Json(engine.aggregator.trainer_summary(trainer_id).await?))
}

pub async fn platform_summary(
    Extension(engine): Extension<EarningsEngine>,
    user: AuthUser,
) -> AppResult<Json<PlatformSummary>> {
    user.require_admin()?;
    Ok(Json(engine.aggregator.platform_summary().await?))
}

pub async fn outstanding_earnings(
    Extension(engine): Extension<EarningsEngine>,
    user: AuthUser,
) -> AppResult<Json<Vec<TrainerSummary>>> {
    user.require_admin()?;
    Ok(Json(engine.aggregator.all_trainer_earnings_ranked().await?))
}
