use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::lifecycle::commit;
use crate::engine::transitions::{sources_of, validate};
use crate::error::AppError;
use crate::models::driver::{GeoPoint, LocationPing};
use crate::models::order::{Order, OrderStatus, ProofArtifact, ProofKind};
use crate::state::AppState;
use crate::store::{DriverGuard, Guard, OrderFilter, OrderPatch, UpdateOutcome};

#[derive(Debug, Clone, Deserialize)]
pub struct ProofInput {
    pub url: Option<String>,
    #[serde(default)]
    pub confirmed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationInput {
    pub lat: f64,
    pub lng: f64,
    pub order_id: Option<Uuid>,
}

fn not_yours(order_id: Uuid) -> AppError {
    AppError::Forbidden(format!("order {order_id} is not assigned to you"))
}

/// Status an order must be in while the given proof can be recorded.
fn proof_stage(kind: ProofKind) -> OrderStatus {
    match kind {
        ProofKind::Pickup => OrderStatus::Assigned,
        ProofKind::Delivery => OrderStatus::EnRoute,
    }
}

pub async fn record_proof(
    state: &AppState,
    driver_id: Uuid,
    order_id: Uuid,
    kind: ProofKind,
    input: ProofInput,
) -> Result<Order, AppError> {
    let url = input
        .url
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty());
    if url.is_none() && !input.confirmed {
        return Err(AppError::BadRequest(
            "proof needs a photo url or an explicit confirmation".to_string(),
        ));
    }

    let artifact = ProofArtifact {
        url,
        confirmed: input.confirmed,
        recorded_at: Utc::now(),
    };
    let mut patch = OrderPatch::default();
    match kind {
        ProofKind::Pickup => patch.pickup_proof = Some(artifact),
        ProofKind::Delivery => patch.delivery_proof = Some(artifact),
    }

    let stage = proof_stage(kind);
    let guard = Guard::status_in(vec![stage]).driver(DriverGuard::AssignedTo(driver_id));

    match commit(state, order_id, guard, patch).await? {
        UpdateOutcome::Applied { order, .. } => {
            info!(order_id = %order.id, driver_id = %driver_id, proof = %kind, "proof recorded");
            Ok(order)
        }
        UpdateOutcome::Unchanged(current) if current.assigned_driver_id != Some(driver_id) => {
            Err(not_yours(order_id))
        }
        UpdateOutcome::Unchanged(current) => Err(AppError::conflict(
            format!("{kind} proof can only be recorded while the order is {stage}"),
            Some(current.status),
        )),
        UpdateOutcome::Missing => Err(not_yours(order_id)),
    }
}

/// Moves an order the calling driver holds to `requested`, provided the
/// proof gating that step is on record.
pub async fn advance(
    state: &AppState,
    driver_id: Uuid,
    order_id: Uuid,
    requested: OrderStatus,
) -> Result<Order, AppError> {
    let proof = match requested {
        OrderStatus::EnRoute => ProofKind::Pickup,
        OrderStatus::Completed => ProofKind::Delivery,
        other => {
            return Err(AppError::Forbidden(format!(
                "drivers cannot move orders to {other}"
            )));
        }
    };

    let guard = Guard::status_in(sources_of(requested))
        .driver(DriverGuard::AssignedTo(driver_id))
        .with_proof(proof);
    let now = Utc::now();
    let mut patch = OrderPatch::status(requested);
    match requested {
        OrderStatus::EnRoute => patch.en_route_at = Some(now),
        _ => patch.delivered_at = Some(now),
    }

    match commit(state, order_id, guard, patch).await? {
        UpdateOutcome::Applied { order, .. } => Ok(order),
        UpdateOutcome::Unchanged(current) => classify_miss(current, driver_id, requested, proof),
        UpdateOutcome::Missing => Err(not_yours(order_id)),
    }
}

fn classify_miss(
    current: Order,
    driver_id: Uuid,
    requested: OrderStatus,
    proof: ProofKind,
) -> Result<Order, AppError> {
    if current.assigned_driver_id != Some(driver_id) {
        return Err(not_yours(current.id));
    }
    // Retried request that already went through.
    if current.status == requested {
        return Ok(current);
    }
    validate(current.status, requested)?;
    if !current.has_proof(proof) {
        return Err(AppError::ProofRequired {
            proof,
            current: current.status,
            requested,
        });
    }
    Err(AppError::conflict(
        format!("order {} changed concurrently", current.id),
        Some(current.status),
    ))
}

/// Orders the driver currently holds, oldest first.
pub async fn my_orders(state: &AppState, driver_id: Uuid) -> Result<Vec<Order>, AppError> {
    Ok(state.orders.list_orders(OrderFilter::assigned_to(driver_id)).await?)
}

pub async fn record_location(
    state: &AppState,
    driver_id: Uuid,
    input: LocationInput,
) -> Result<LocationPing, AppError> {
    if !(-90.0..=90.0).contains(&input.lat) || !(-180.0..=180.0).contains(&input.lng) {
        return Err(AppError::BadRequest("coordinates out of range".to_string()));
    }

    let ping = LocationPing {
        driver_id,
        order_id: input.order_id,
        location: GeoPoint {
            lat: input.lat,
            lng: input.lng,
        },
        recorded_at: Utc::now(),
    };
    state.drivers.append_location(ping.clone()).await?;
    debug!(driver_id = %driver_id, "location ping stored");
    Ok(ping)
}
