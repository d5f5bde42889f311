pub mod config;
pub mod earnings;
pub mod error;
pub mod extractor;
pub mod routes;
pub mod webhooks;

use axum::{routing::get, Extension, Router};

use crate::earnings::EarningsEngine;

pub async fn root() -> &'static str {
    "Coach Ledger API"
}

/// The full HTTP surface over one engine, without the metrics layer.
pub fn app(engine: EarningsEngine) -> Router {
    Router::new()
        .route("/", get(root))
        .merge(routes::api_routes())
        .layer(Extension(engine))
}
