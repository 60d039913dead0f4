use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::Json;
use axum::Router;

use crate::engine::reconciler::{handle_webhook, ReconcileOutcome};
use crate::engine::signature::SIGNATURE_HEADER;
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/webhooks/payments", post(payment_webhook))
}

/// Takes the body as raw bytes: the signature covers the exact payload.
async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ReconcileOutcome>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = handle_webhook(&state, &body, signature).await?;
    Ok(Json(outcome))
}
