//! Payment reconciler.
//!
//! Turns provider callbacks into at most one `paid` commit per order. The
//! callback channel is at-least-once and unordered, so the commit is a
//! conditional update on `payment_status <> 'paid'`; a replay simply matches
//! no row and is acknowledged.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::lifecycle::commit;
use crate::engine::queue::{enqueue, SideEffect};
use crate::engine::transitions::sources_of;
use crate::error::AppError;
use crate::models::order::{OrderStatus, PaidVia, PaymentStatus};
use crate::models::payment::{PaymentEvent, CHECKOUT_COMPLETED};
use crate::state::AppState;
use crate::store::{Guard, OrderPatch, PaymentGuard, UpdateOutcome};

/// Every variant is acknowledged to the provider with a 2xx.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Applied { order_id: Uuid },
    Duplicate { order_id: Uuid },
    Ignored { event_type: String },
    Unreconciled { reason: String },
}

impl ReconcileOutcome {
    fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied { .. } => "applied",
            ReconcileOutcome::Duplicate { .. } => "duplicate",
            ReconcileOutcome::Ignored { .. } => "ignored",
            ReconcileOutcome::Unreconciled { .. } => "unreconciled",
        }
    }
}

pub async fn handle_webhook(
    state: &AppState,
    payload: &[u8],
    signature: Option<&str>,
) -> Result<ReconcileOutcome, AppError> {
    let result = reconcile(state, payload, signature).await;

    let label = match &result {
        Ok(outcome) => outcome.label(),
        Err(AppError::AuthenticationFailed(_)) => "auth_failed",
        Err(_) => "error",
    };
    state
        .metrics
        .payment_events_total
        .with_label_values(&[label])
        .inc();

    result
}

async fn reconcile(
    state: &AppState,
    payload: &[u8],
    signature: Option<&str>,
) -> Result<ReconcileOutcome, AppError> {
    if let Err(err) = state.webhook.verify(payload, signature, Utc::now().timestamp()) {
        warn!(error = %err, "rejected payment webhook");
        return Err(err);
    }

    let envelope: Value = serde_json::from_slice(payload).map_err(|err| {
        warn!(error = %err, "unparseable payment webhook payload");
        AppError::AuthenticationFailed(format!("unparseable payload: {err}"))
    })?;

    // Only the type is required up front; event types this service does not
    // handle are acknowledged whatever the rest of their shape.
    let event_type = envelope
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if event_type != CHECKOUT_COMPLETED {
        debug!(event_id = ?envelope.get("id"), event_type = %event_type, "ignoring payment event");
        return Ok(ReconcileOutcome::Ignored { event_type });
    }

    let event: PaymentEvent = match serde_json::from_value(envelope) {
        Ok(event) => event,
        Err(err) => {
            return Ok(unreconciled(
                None,
                None,
                format!("malformed {CHECKOUT_COMPLETED} event: {err}"),
            ));
        }
    };

    match apply_checkout_completed(state, &event).await {
        Err(AppError::PermanentEventError(reason)) => Ok(unreconciled(
            Some(&event.id),
            event.session_id(),
            reason,
        )),
        other => other,
    }
}

/// Acknowledged to the provider, left for manual reconciliation.
fn unreconciled(event_id: Option<&str>, session_id: Option<&str>, reason: String) -> ReconcileOutcome {
    error!(
        event_id = ?event_id,
        session_id = ?session_id,
        reason = %reason,
        "payment event needs manual reconciliation"
    );
    ReconcileOutcome::Unreconciled { reason }
}

async fn apply_checkout_completed(
    state: &AppState,
    event: &PaymentEvent,
) -> Result<ReconcileOutcome, AppError> {
    let raw_order_id = event
        .metadata_order_id()
        .ok_or_else(|| AppError::PermanentEventError("missing order_id metadata".to_string()))?;
    let order_id = Uuid::parse_str(raw_order_id).map_err(|_| {
        AppError::PermanentEventError(format!("order_id metadata {raw_order_id} is not a uuid"))
    })?;

    let reference = event.session_id().unwrap_or(event.id.as_str()).to_string();
    let guard = Guard::status_in(sources_of(OrderStatus::Paid))
        .payment(PaymentGuard::IsNot(PaymentStatus::Paid));
    let patch = OrderPatch {
        status: Some(OrderStatus::Paid),
        payment_status: Some(PaymentStatus::Paid),
        paid_via: Some(PaidVia::Checkout),
        payment_reference: Some(reference),
        paid_at: Some(Utc::now()),
        ..OrderPatch::default()
    };

    match commit(state, order_id, guard, patch).await? {
        UpdateOutcome::Applied { order, .. } => {
            info!(order_id = %order.id, event_id = %event.id, "payment reconciled");
            if state.settings.auto_assign {
                enqueue(state, SideEffect::AutoAssign { order_id: order.id });
            }
            Ok(ReconcileOutcome::Applied { order_id })
        }
        UpdateOutcome::Unchanged(current) if current.payment_status == PaymentStatus::Paid => {
            info!(order_id = %order_id, event_id = %event.id, "duplicate payment event");
            Ok(ReconcileOutcome::Duplicate { order_id })
        }
        UpdateOutcome::Unchanged(current) => Err(AppError::PermanentEventError(format!(
            "order {order_id} is {} and cannot take a payment",
            current.status
        ))),
        UpdateOutcome::Missing => Err(AppError::PermanentEventError(format!(
            "order {order_id} does not exist"
        ))),
    }
}
