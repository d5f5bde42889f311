use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde_json::json;

use crate::earnings::EarningsEngine;
use crate::error::AppError;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// key: webhooks-gateway -> adapter entrypoint
///
/// Takes the raw body: the signature covers the exact bytes the gateway sent.
pub async fn gateway_webhook(
    Extension(engine): Extension<EarningsEngine>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    match engine.recorder.handle_gateway_event(&body, signature).await {
        Ok(outcome) => Json(json!({ "received": true, "outcome": outcome })).into_response(),
        // Unverified or undecodable deliveries change nothing.
        Err(err @ (AppError::Signature | AppError::BadRequest(_))) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "received": false, "error": err.to_string() })),
        )
            .into_response(),
        // Storage failures surface as 5xx so the gateway redelivers.
        Err(err) => err.into_response(),
    }
}
