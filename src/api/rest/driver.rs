use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::auth::{issue_session, revoke_session, DriverActor, IssuedSession};
use crate::engine::dispatch::{accept, decline, list_available};
use crate::engine::progress::{advance, my_orders, record_location, record_proof, LocationInput, ProofInput};
use crate::error::AppError;
use crate::models::driver::LocationPing;
use crate::models::order::{Order, OrderStatus, ProofKind};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/driver/sessions", post(login).delete(logout))
        .route("/driver/orders", get(list_mine))
        .route("/driver/orders/available", get(list_open))
        .route("/driver/orders/:id/accept", post(accept_order))
        .route("/driver/orders/:id/decline", post(decline_order))
        .route("/driver/orders/:id/proof/:kind", post(submit_proof))
        .route("/driver/orders/:id/status", post(update_status))
        .route("/driver/location", post(report_location))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub driver_id: Uuid,
    pub pin: String,
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: OrderStatus,
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<(StatusCode, Json<IssuedSession>), AppError> {
    let session = issue_session(&state, payload.driver_id, &payload.pin).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn logout(
    State(state): State<Arc<AppState>>,
    actor: DriverActor,
) -> Result<StatusCode, AppError> {
    revoke_session(&state, &actor).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_mine(
    State(state): State<Arc<AppState>>,
    actor: DriverActor,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(my_orders(&state, actor.driver_id).await?))
}

async fn list_open(
    State(state): State<Arc<AppState>>,
    actor: DriverActor,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(list_available(&state, actor.driver_id).await?))
}

async fn accept_order(
    State(state): State<Arc<AppState>>,
    actor: DriverActor,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(accept(&state, actor.driver_id, id).await?))
}

async fn decline_order(
    State(state): State<Arc<AppState>>,
    actor: DriverActor,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    decline(&state, actor.driver_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn submit_proof(
    State(state): State<Arc<AppState>>,
    actor: DriverActor,
    Path((id, kind)): Path<(Uuid, ProofKind)>,
    Json(payload): Json<ProofInput>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(record_proof(&state, actor.driver_id, id, kind, payload).await?))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    actor: DriverActor,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(advance(&state, actor.driver_id, id, payload.status).await?))
}

async fn report_location(
    State(state): State<Arc<AppState>>,
    actor: DriverActor,
    Json(payload): Json<LocationInput>,
) -> Result<(StatusCode, Json<LocationPing>), AppError> {
    let ping = record_location(&state, actor.driver_id, payload).await?;
    Ok((StatusCode::ACCEPTED, Json(ping)))
}
