use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::api::auth::{hash_pin, AdminActor};
use crate::engine::admin::{approve, mark_paid, reject, ApproveInput, ManualPayInput, RejectInput};
use crate::engine::dispatch::assign;
use crate::engine::intake::{create_order, create_prepaid_order, NewOrder};
use crate::error::AppError;
use crate::models::driver::{Driver, LocationPing};
use crate::models::order::{Order, OrderStatus, PaymentStatus};
use crate::state::AppState;
use crate::store::OrderFilter;

const DEFAULT_LOCATION_LIMIT: usize = 50;
const MAX_LOCATION_LIMIT: usize = 500;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/orders", post(create_admin_order).get(list_orders))
        .route("/admin/orders/:id/approve", post(approve_order))
        .route("/admin/orders/:id/reject", post(reject_order))
        .route("/admin/orders/:id/mark-paid", post(mark_order_paid))
        .route("/admin/orders/:id/assign", post(assign_order))
        .route("/admin/drivers", post(create_driver).get(list_drivers))
        .route("/admin/drivers/:id", patch(update_driver))
        .route("/admin/drivers/:id/locations", get(driver_locations))
}

#[derive(Deserialize)]
pub struct AdminOrderRequest {
    #[serde(flatten)]
    pub order: NewOrder,
    #[serde(default)]
    pub prepaid: bool,
    pub payment_reference: Option<String>,
}

#[derive(Deserialize)]
pub struct OrderListQuery {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
}

#[derive(Deserialize, Default)]
pub struct AssignRequest {
    pub driver_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct CreateDriverRequest {
    pub name: String,
    pub phone: Option<String>,
    pub pin: String,
    #[serde(default)]
    pub verified: bool,
}

#[derive(Deserialize)]
pub struct UpdateDriverRequest {
    pub active: Option<bool>,
    pub verified: Option<bool>,
}

#[derive(Deserialize)]
pub struct LocationQuery {
    pub limit: Option<usize>,
}

async fn create_admin_order(
    State(state): State<Arc<AppState>>,
    actor: AdminActor,
    Json(payload): Json<AdminOrderRequest>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let order = if payload.prepaid {
        create_prepaid_order(&state, payload.order, payload.payment_reference).await?
    } else {
        create_order(&state, payload.order).await?
    };

    info!(order_id = %order.id, actor = %actor.id, prepaid = payload.prepaid, "order entered by staff");
    Ok((StatusCode::CREATED, Json(order)))
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    _actor: AdminActor,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<Vec<Order>>, AppError> {
    let filter = OrderFilter {
        status: query.status,
        payment_status: query.payment_status,
        ..OrderFilter::default()
    };
    Ok(Json(state.orders.list_orders(filter).await?))
}

async fn approve_order(
    State(state): State<Arc<AppState>>,
    actor: AdminActor,
    Path(id): Path<Uuid>,
    Json(payload): Json<ApproveInput>,
) -> Result<Json<Order>, AppError> {
    info!(order_id = %id, actor = %actor.id, "approve requested");
    Ok(Json(approve(&state, id, payload).await?))
}

async fn reject_order(
    State(state): State<Arc<AppState>>,
    actor: AdminActor,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectInput>,
) -> Result<Json<Order>, AppError> {
    info!(order_id = %id, actor = %actor.id, "reject requested");
    Ok(Json(reject(&state, id, payload).await?))
}

async fn mark_order_paid(
    State(state): State<Arc<AppState>>,
    actor: AdminActor,
    Path(id): Path<Uuid>,
    Json(payload): Json<ManualPayInput>,
) -> Result<Json<Order>, AppError> {
    actor.require_admin()?;
    Ok(Json(mark_paid(&state, id, &actor.id, payload).await?))
}

async fn assign_order(
    State(state): State<Arc<AppState>>,
    actor: AdminActor,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<Order>, AppError> {
    info!(order_id = %id, actor = %actor.id, driver_id = ?payload.driver_id, "push assignment requested");
    Ok(Json(assign(&state, id, payload.driver_id).await?))
}

async fn create_driver(
    State(state): State<Arc<AppState>>,
    _actor: AdminActor,
    Json(payload): Json<CreateDriverRequest>,
) -> Result<(StatusCode, Json<Driver>), AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    let pin = payload.pin.trim();
    if !(4..=8).contains(&pin.len()) || !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::BadRequest("pin must be 4 to 8 digits".to_string()));
    }

    let id = Uuid::new_v4();
    let driver = Driver {
        id,
        name: payload.name.trim().to_string(),
        phone: payload.phone,
        active: true,
        verified: payload.verified,
        pin_digest: hash_pin(&state.settings.pin_secret, id, pin)?,
        last_assigned_at: None,
        created_at: Utc::now(),
    };

    state.drivers.insert_driver(driver.clone()).await?;
    info!(driver_id = %driver.id, verified = driver.verified, "driver registered");
    Ok((StatusCode::CREATED, Json(driver)))
}

async fn list_drivers(
    State(state): State<Arc<AppState>>,
    _actor: AdminActor,
) -> Result<Json<Vec<Driver>>, AppError> {
    Ok(Json(state.drivers.list_drivers().await?))
}

async fn update_driver(
    State(state): State<Arc<AppState>>,
    actor: AdminActor,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateDriverRequest>,
) -> Result<Json<Driver>, AppError> {
    let driver = state
        .drivers
        .set_driver_flags(id, payload.active, payload.verified)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("driver {} not found", id)))?;

    info!(
        driver_id = %id,
        actor = %actor.id,
        active = driver.active,
        verified = driver.verified,
        "driver flags updated"
    );
    Ok(Json(driver))
}

async fn driver_locations(
    State(state): State<Arc<AppState>>,
    _actor: AdminActor,
    Path(id): Path<Uuid>,
    Query(query): Query<LocationQuery>,
) -> Result<Json<Vec<LocationPing>>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LOCATION_LIMIT)
        .clamp(1, MAX_LOCATION_LIMIT);
    Ok(Json(state.drivers.locations_for(id, limit).await?))
}
