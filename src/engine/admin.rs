//! Admin action gateway: the only way out of manual review.

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::lifecycle::{commit, rejection};
use crate::engine::queue::{enqueue, SideEffect};
use crate::engine::transitions::{sources_of, validate};
use crate::error::AppError;
use crate::models::order::{Order, OrderStatus, PaidVia, PaymentStatus, ServiceType};
use crate::models::payment::CheckoutRequest;
use crate::state::AppState;
use crate::store::{Guard, OrderPatch, PaymentGuard, UpdateOutcome};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApproveInput {
    /// Final price; keeps the quoted amount when absent.
    pub amount_cents: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RejectInput {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManualPayInput {
    pub note: String,
}

async fn load(state: &AppState, order_id: Uuid) -> Result<Order, AppError> {
    state
        .orders
        .get_order(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))
}

fn describe(order: &Order) -> String {
    match order.service_type {
        ServiceType::Courier => format!("Courier delivery {}", order.id),
        ServiceType::Notary => format!("Mobile notary appointment {}", order.id),
    }
}

/// Creates the checkout session first and only then writes the status, so a
/// provider failure leaves the order in review.
pub async fn approve(
    state: &AppState,
    order_id: Uuid,
    input: ApproveInput,
) -> Result<Order, AppError> {
    let order = load(state, order_id).await?;
    validate(order.status, OrderStatus::ApprovedPendingPayment)?;

    let amount_cents = input.amount_cents.unwrap_or(order.amount_cents);
    if amount_cents <= 0 {
        return Err(AppError::BadRequest("amount_cents must be > 0".to_string()));
    }

    let session = state
        .checkout
        .create_checkout_session(&CheckoutRequest {
            order_id,
            amount_cents,
            currency: order.currency.clone(),
            description: describe(&order),
            customer: order.customer.clone(),
        })
        .await
        .map_err(|err| {
            warn!(order_id = %order_id, error = %err, "checkout session creation failed");
            AppError::UpstreamUnavailable(err.to_string())
        })?;

    let guard = Guard::status_in(sources_of(OrderStatus::ApprovedPendingPayment));
    let patch = OrderPatch {
        status: Some(OrderStatus::ApprovedPendingPayment),
        amount_cents: Some(amount_cents),
        checkout_session_id: Some(session.id.clone()),
        checkout_url: Some(session.url),
        approved_at: Some(Utc::now()),
        ..OrderPatch::default()
    };

    match commit(state, order_id, guard, patch).await? {
        UpdateOutcome::Applied { order, .. } => {
            info!(order_id = %order.id, session_id = %session.id, amount_cents, "order approved");
            Ok(order)
        }
        UpdateOutcome::Unchanged(current) => {
            warn!(
                order_id = %order_id,
                session_id = %session.id,
                status = %current.status,
                "order moved during approval; checkout session orphaned"
            );
            Err(rejection(&current, OrderStatus::ApprovedPendingPayment))
        }
        UpdateOutcome::Missing => Err(AppError::NotFound(format!("order {order_id} not found"))),
    }
}

pub async fn reject(
    state: &AppState,
    order_id: Uuid,
    input: RejectInput,
) -> Result<Order, AppError> {
    let guard = Guard::status_in(sources_of(OrderStatus::Rejected))
        .payment(PaymentGuard::IsNot(PaymentStatus::Paid));
    let patch = OrderPatch {
        status: Some(OrderStatus::Rejected),
        rejection_reason: input.reason.filter(|reason| !reason.trim().is_empty()),
        rejected_at: Some(Utc::now()),
        ..OrderPatch::default()
    };

    match commit(state, order_id, guard, patch).await? {
        UpdateOutcome::Applied { order, .. } => Ok(order),
        UpdateOutcome::Unchanged(current) => Err(rejection(&current, OrderStatus::Rejected)),
        UpdateOutcome::Missing => Err(AppError::NotFound(format!("order {order_id} not found"))),
    }
}

/// Marks an order paid without a provider event. Carries its own
/// already-paid guard since it bypasses the reconciler.
pub async fn mark_paid(
    state: &AppState,
    order_id: Uuid,
    actor: &str,
    input: ManualPayInput,
) -> Result<Order, AppError> {
    let note = input.note.trim();
    if note.is_empty() {
        return Err(AppError::BadRequest(
            "manual payment needs a justification note".to_string(),
        ));
    }

    let guard = Guard::status_in(sources_of(OrderStatus::Paid))
        .payment(PaymentGuard::IsNot(PaymentStatus::Paid));
    let patch = OrderPatch {
        status: Some(OrderStatus::Paid),
        payment_status: Some(PaymentStatus::Paid),
        paid_via: Some(PaidVia::Manual),
        manual_payment_note: Some(format!("{note} (by {actor})")),
        paid_at: Some(Utc::now()),
        ..OrderPatch::default()
    };

    match commit(state, order_id, guard, patch).await? {
        UpdateOutcome::Applied { order, .. } => {
            warn!(order_id = %order.id, actor = %actor, "order marked paid manually");
            if state.settings.auto_assign {
                enqueue(state, SideEffect::AutoAssign { order_id: order.id });
            }
            Ok(order)
        }
        UpdateOutcome::Unchanged(current) if current.payment_status == PaymentStatus::Paid => {
            Err(AppError::conflict(
                format!("order {order_id} is already paid"),
                Some(current.status),
            ))
        }
        UpdateOutcome::Unchanged(current) => Err(rejection(&current, OrderStatus::Paid)),
        UpdateOutcome::Missing => Err(AppError::NotFound(format!("order {order_id} not found"))),
    }
}
