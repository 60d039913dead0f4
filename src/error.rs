use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::engine::transitions::allowed_targets;
use crate::models::order::{OrderStatus, ProofKind};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("cannot move order from {current} to {requested}")]
    InvalidTransition {
        current: OrderStatus,
        requested: OrderStatus,
    },

    #[error("conflict: {message}")]
    Conflict {
        message: String,
        current: Option<OrderStatus>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{proof} proof required before moving to {requested}")]
    ProofRequired {
        proof: ProofKind,
        current: OrderStatus,
        requested: OrderStatus,
    },

    #[error("driver {0} is not verified")]
    NotVerified(Uuid),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("permanent event error: {0}")]
    PermanentEventError(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("no drivers available")]
    NoAvailableDrivers,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn conflict(message: impl Into<String>, current: Option<OrderStatus>) -> Self {
        AppError::Conflict {
            message: message.into(),
            current,
        }
    }

    /// Status of the order the rejection refers to, when one is known.
    pub fn current_status(&self) -> Option<OrderStatus> {
        match self {
            AppError::InvalidTransition { current, .. } => Some(*current),
            AppError::ProofRequired { current, .. } => Some(*current),
            AppError::Conflict { current, .. } => *current,
            _ => None,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::Conflict { .. } => "conflict",
            AppError::NotFound(_) => "not_found",
            AppError::Forbidden(_) => "forbidden",
            AppError::ProofRequired { .. } => "proof_required",
            AppError::NotVerified(_) => "not_verified",
            AppError::AuthenticationFailed(_) => "authentication_failed",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::PermanentEventError(_) => "permanent_event_error",
            AppError::UpstreamUnavailable(_) => "upstream_unavailable",
            AppError::BadRequest(_) => "bad_request",
            AppError::NoAvailableDrivers => "no_available_drivers",
            AppError::Storage(_) => "storage_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) | AppError::NotVerified(_) => StatusCode::FORBIDDEN,
            AppError::ProofRequired { .. } => StatusCode::PRECONDITION_FAILED,
            AppError::AuthenticationFailed(_) | AppError::Unauthorized(_) => {
                StatusCode::UNAUTHORIZED
            }
            AppError::PermanentEventError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NoAvailableDrivers => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Storage(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let mut body = json!({
            "error": self.to_string(),
            "code": self.code(),
        });

        if let Some(current) = self.current_status() {
            let allowed: Vec<Value> = allowed_targets(current)
                .iter()
                .map(|target| Value::from(target.as_str()))
                .collect();
            body["current_status"] = Value::from(current.as_str());
            body["allowed"] = Value::from(allowed);
        }

        (status, Json(body)).into_response()
    }
}
