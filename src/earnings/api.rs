use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::{
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::aggregator::TrainerSummary;
use super::catalog::{PlanDraft, PlanPatch};
use super::gateway::CreatedIntent;
use super::manual::ManualPaymentSubmission;
use super::models::{ConnectedAccount, ManualPayment, PaymentRecord, Payout, PricingPlan, Subscription};
use super::recorder::GatewayEarnings;
use super::EarningsEngine;
use crate::error::AppResult;
use crate::extractor::AuthUser;

pub fn routes() -> Router {
    Router::new()
        .route("/api/payments/accounts", post(create_account))
        .route(
            "/api/payments/accounts/onboarding-link",
            post(onboarding_link),
        )
        .route("/api/payments/accounts/status", get(account_status))
        .route("/api/payments/accounts/dashboard-link", get(dashboard_link))
        .route("/api/payments/plans", get(list_my_plans).post(create_plan))
        .route(
            "/api/payments/plans/:id",
            put(update_plan).delete(deactivate_plan),
        )
        .route(
            "/api/payments/plans/trainer/:trainer_id",
            get(list_trainer_plans),
        )
        .route("/api/payments/subscriptions", get(list_my_subscriptions))
        .route("/api/payments/subscribers", get(list_my_subscribers))
        .route(
            "/api/payments/subscriptions/:id/cancel",
            post(cancel_subscription),
        )
        .route(
            "/api/payments/subscriptions/:id/payments",
            get(payment_history),
        )
        .route("/api/payments/intents", post(create_intent))
        .route("/api/payments/confirm", post(confirm_intent))
        .route("/api/payments/earnings", get(gateway_earnings))
        .route("/api/payments/payouts", get(my_payouts))
        .route(
            "/api/manual-payments",
            get(my_manual_payments).post(submit_manual_payment),
        )
        .route("/api/earnings/me", get(my_summary))
}

#[derive(Serialize)]
pub struct LinkResponse {
    pub url: String,
}

#[derive(Deserialize)]
pub struct OnboardingLinkRequest {
    pub return_url: String,
    pub refresh_url: String,
}

#[derive(Deserialize)]
pub struct PlanListQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
pub struct SubscriberQuery {
    #[serde(default = "default_true")]
    pub active_only: bool,
}

#[derive(Deserialize)]
pub struct IntentRequest {
    pub plan_id: Uuid,
}

#[derive(Deserialize)]
pub struct ConfirmRequest {
    pub intent_id: String,
    pub plan_id: Uuid,
}

pub async fn create_account(
    Extension(engine): Extension<EarningsEngine>,
    AuthUser { user_id, email, .. }: AuthUser,
) -> AppResult<Json<ConnectedAccount>> {
    let account = engine.accounts.create_account(user_id, &email).await?;
    Ok(Json(account))
}

pub async fn onboarding_link(
    Extension(engine): Extension<EarningsEngine>,
    AuthUser { user_id, .. }: AuthUser,
    Json(payload): Json<OnboardingLinkRequest>,
) -> AppResult<Json<LinkResponse>> {
    let url = engine
        .accounts
        .onboarding_link(user_id, &payload.return_url, &payload.refresh_url)
        .await?;
    Ok(Json(LinkResponse { url }))
}

pub async fn account_status(
    Extension(engine): Extension<EarningsEngine>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<ConnectedAccount>> {
    Ok(Json(engine.accounts.refresh_status(user_id).await?))
}

pub async fn dashboard_link(
    Extension(engine): Extension<EarningsEngine>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<LinkResponse>> {
    let url = engine.accounts.dashboard_link(user_id).await?;
    Ok(Json(LinkResponse { url }))
}

pub async fn create_plan(
    Extension(engine): Extension<EarningsEngine>,
    AuthUser { user_id, .. }: AuthUser,
    Json(draft): Json<PlanDraft>,
) -> AppResult<(StatusCode, Json<PricingPlan>)> {
    let plan = engine.catalog.create_plan(user_id, draft).await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

pub async fn list_my_plans(
    Extension(engine): Extension<EarningsEngine>,
    AuthUser { user_id, .. }: AuthUser,
    Query(query): Query<PlanListQuery>,
) -> AppResult<Json<Vec<PricingPlan>>> {
    let plans = engine
        .catalog
        .list_all_plans(user_id, query.include_inactive)
        .await?;
    Ok(Json(plans))
}

pub async fn update_plan(
    Extension(engine): Extension<EarningsEngine>,
    AuthUser { user_id, .. }: AuthUser,
    Path(plan_id): Path<Uuid>,
    Json(patch): Json<PlanPatch>,
) -> AppResult<Json<PricingPlan>> {
    Ok(Json(engine.catalog.update_plan(plan_id, user_id, patch).await?))
}

pub async fn deactivate_plan(
    Extension(engine): Extension<EarningsEngine>,
    AuthUser { user_id, .. }: AuthUser,
    Path(plan_id): Path<Uuid>,
) -> AppResult<Json<PricingPlan>> {
    Ok(Json(engine.catalog.deactivate_plan(plan_id, user_id).await?))
}

/// Public: clients browse a trainer's offers before signing in.
pub async fn list_trainer_plans(
    Extension(engine): Extension<EarningsEngine>,
    Path(trainer_id): Path<Uuid>,
) -> AppResult<Json<Vec<PricingPlan>>> {
    Ok(Json(engine.catalog.list_active_plans(trainer_id).await?))
}

pub async fn list_my_subscriptions(
    Extension(engine): Extension<EarningsEngine>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<Vec<Subscription>>> {
    Ok(Json(engine.subscriptions.list_for_client(user_id).await?))
}

pub async fn list_my_subscribers(
    Extension(engine): Extension<EarningsEngine>,
    AuthUser { user_id, .. }: AuthUser,
    Query(query): Query<SubscriberQuery>,
) -> AppResult<Json<Vec<Subscription>>> {
    let subscriptions = engine
        .subscriptions
        .list_for_trainer(user_id, query.active_only)
        .await?;
    Ok(Json(subscriptions))
}

pub async fn cancel_subscription(
    Extension(engine): Extension<EarningsEngine>,
    AuthUser { user_id, .. }: AuthUser,
    Path(subscription_id): Path<Uuid>,
) -> AppResult<Json<Subscription>> {
    Ok(Json(engine.subscriptions.cancel(subscription_id, user_id).await?))
}

pub async fn payment_history(
    Extension(engine): Extension<EarningsEngine>,
    AuthUser { user_id, .. }: AuthUser,
    Path(subscription_id): Path<Uuid>,
) -> AppResult<Json<Vec<PaymentRecord>>> {
    let records = engine
        .recorder
        .payment_history(subscription_id, user_id)
        .await?;
    Ok(Json(records))
}

pub async fn create_intent(
    Extension(engine): Extension<EarningsEngine>,
    AuthUser { user_id, .. }: AuthUser,
    Json(payload): Json<IntentRequest>,
) -> AppResult<Json<CreatedIntent>> {
    let intent = engine
        .recorder
        .create_payment_intent(user_id, payload.plan_id)
        .await?;
    Ok(Json(intent))
}

pub async fn confirm_intent(
    Extension(engine): Extension<EarningsEngine>,
    AuthUser { user_id, .. }: AuthUser,
    Json(payload): Json<ConfirmRequest>,
) -> AppResult<Json<Subscription>> {
    let subscription = engine
        .recorder
        .confirm_intent(&payload.intent_id, user_id, payload.plan_id)
        .await?;
    Ok(Json(subscription))
}

pub async fn gateway_earnings(
    Extension(engine): Extension<EarningsEngine>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<GatewayEarnings>> {
    Ok(Json(engine.recorder.earnings_for(user_id).await?))
}

pub async fn my_payouts(
    Extension(engine): Extension<EarningsEngine>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<Vec<Payout>>> {
    Ok(Json(engine.payouts.history_for(user_id).await?))
}

pub async fn submit_manual_payment(
    Extension(engine): Extension<EarningsEngine>,
    AuthUser { user_id, .. }: AuthUser,
    Json(submission): Json<ManualPaymentSubmission>,
) -> AppResult<(StatusCode, Json<ManualPayment>)> {
    let payment = engine.manual.submit(user_id, submission).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn my_manual_payments(
    Extension(engine): Extension<EarningsEngine>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<Vec<ManualPayment>>> {
    Ok(Json(engine.manual.list_for_client(user_id).await?))
}

pub async fn my_summary(
    Extension(engine): Extension<EarningsEngine>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<TrainerSummary>> {
    Ok(Json(engine.aggregator.trainer_summary(user_id).await?))
}
