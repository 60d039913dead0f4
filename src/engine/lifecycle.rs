use tracing::info;
use uuid::Uuid;

use crate::engine::queue::{enqueue, SideEffect};
use crate::engine::transitions::validate;
use crate::error::AppError;
use crate::models::event::OrderEvent;
use crate::models::order::{Order, OrderStatus};
use crate::state::AppState;
use crate::store::{Guard, OrderPatch, UpdateOutcome};

/// Runs one conditional update and, when it changed the status, publishes
/// the transition: metrics, the live event stream and a queued notification.
pub async fn commit(
    state: &AppState,
    order_id: Uuid,
    guard: Guard,
    patch: OrderPatch,
) -> Result<UpdateOutcome, AppError> {
    let outcome = state.orders.update_if(order_id, guard, patch).await?;

    if let UpdateOutcome::Applied { previous, order } = &outcome {
        if *previous != order.status {
            publish(state, *previous, order);
        }
    }

    Ok(outcome)
}

fn publish(state: &AppState, previous: OrderStatus, order: &Order) {
    state
        .metrics
        .order_transitions_total
        .with_label_values(&[previous.as_str(), order.status.as_str()])
        .inc();

    info!(
        order_id = %order.id,
        from = %previous,
        to = %order.status,
        "order transition committed"
    );

    let event = OrderEvent::transition(previous, order);
    let _ = state.order_events_tx.send(event.clone());
    enqueue(state, SideEffect::Notify(event));
}

/// Explains why a write aimed at `requested` matched nothing: the table
/// forbids it, or the row moved underneath the caller.
pub fn rejection(current: &Order, requested: OrderStatus) -> AppError {
    match validate(current.status, requested) {
        Err(err) => err,
        Ok(()) => AppError::conflict(
            format!("order {} changed concurrently", current.id),
            Some(current.status),
        ),
    }
}
