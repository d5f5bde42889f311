use axum::{routing::post, Router};

use crate::earnings::{admin, api};
use crate::webhooks;

pub fn api_routes() -> Router {
    Router::new()
        .merge(api::routes())
        .merge(admin::routes())
        .route("/api/payments/webhook", post(webhooks::gateway_webhook))
}
