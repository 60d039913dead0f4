use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::dispatch::auto_assign;
use crate::error::AppError;
use crate::models::event::OrderEvent;
use crate::state::AppState;

/// Work that follows a committed transition but must never hold it up.
#[derive(Debug, Clone)]
pub enum SideEffect {
    Notify(OrderEvent),
    AutoAssign { order_id: Uuid },
}

/// Non-blocking: a full or closed queue drops the effect with a warning and
/// leaves the already committed order untouched.
pub fn enqueue(state: &AppState, effect: SideEffect) {
    match state.effects_tx.try_send(effect) {
        Ok(()) => state.metrics.side_effects_in_queue.inc(),
        Err(TrySendError::Full(effect)) => {
            warn!(?effect, "side effect queue full; dropping effect");
        }
        Err(TrySendError::Closed(effect)) => {
            warn!(?effect, "side effect queue closed; dropping effect");
        }
    }
}

pub async fn run_side_effect_worker(state: Arc<AppState>, mut effects_rx: mpsc::Receiver<SideEffect>) {
    info!("side effect worker started");

    while let Some(effect) = effects_rx.recv().await {
        state.metrics.side_effects_in_queue.dec();

        match effect {
            SideEffect::Notify(event) => {
                if let Err(err) = state.notifier.notify(&event).await {
                    warn!(order_id = %event.order_id, error = %err, "notification failed");
                }
            }
            SideEffect::AutoAssign { order_id } => match auto_assign(&state, order_id).await {
                Ok(order) => {
                    info!(
                        order_id = %order.id,
                        driver_id = ?order.assigned_driver_id,
                        "order auto-assigned"
                    );
                }
                Err(AppError::NoAvailableDrivers) => {
                    warn!(order_id = %order_id, "no available driver for auto-assign; order stays in pool");
                }
                Err(err) => {
                    error!(order_id = %order_id, error = %err, "auto-assign failed");
                }
            },
        }
    }

    warn!("side effect worker stopped: queue channel closed");
}
