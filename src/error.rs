use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::earnings::GatewayError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("payment gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("webhook signature verification failed")]
    Signature,
    #[error("{0}")]
    NotFound(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("{message}")]
    Conflict {
        message: String,
        resource_id: Uuid,
        current_status: String,
    },
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Message(String),
}

impl AppError {
    pub fn not_found(what: &str) -> Self {
        AppError::NotFound(format!("{what} not found"))
    }

    pub fn conflict(message: impl Into<String>, resource_id: Uuid, current_status: &str) -> Self {
        AppError::Conflict {
            message: message.into(),
            resource_id,
            current_status: current_status.to_string(),
        }
    }

    /// Stable machine-readable kind surfaced to API callers.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Db(_) | AppError::Message(_) => "internal",
            AppError::Gateway(_) => "external_gateway_error",
            AppError::Signature => "signature_error",
            AppError::NotFound(_) => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::Conflict { .. } => "conflict",
            AppError::Validation(_) => "validation_error",
            AppError::BadRequest(_) => "bad_request",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) | AppError::Signature => StatusCode::BAD_REQUEST,
            AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Db(_) | AppError::Message(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(?self);
        } else {
            tracing::debug!(?self, "request rejected");
        }
        let message = match &self {
            // Internal and upstream details stay in the logs.
            AppError::Db(_) | AppError::Message(_) => "internal error".to_string(),
            AppError::Gateway(GatewayError::Api { status, .. }) => {
                format!("payment gateway error (status {status})")
            }
            AppError::Gateway(_) => "payment gateway error".to_string(),
            other => other.to_string(),
        };
        let mut body = json!({
            "kind": self.kind(),
            "message": message,
        });
        if let AppError::Conflict {
            resource_id,
            current_status,
            ..
        } = &self
        {
            body["context"] = json!({ "id": resource_id, "status": current_status });
        }
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
