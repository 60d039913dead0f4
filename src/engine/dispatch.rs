use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::lifecycle::{commit, rejection};
use crate::engine::transitions::sources_of;
use crate::error::AppError;
use crate::models::driver::Driver;
use crate::models::order::{Order, OrderStatus, PaymentStatus};
use crate::state::AppState;
use crate::store::{DriverGuard, Guard, OrderFilter, OrderPatch, PaymentGuard, UpdateOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignMode {
    /// Driver accepted from the open pool.
    Pull,
    /// Admin chose the driver, or asked for the fairness pick.
    Push,
    /// Fairness pick triggered by a payment commit.
    Auto,
}

impl AssignMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignMode::Pull => "pull",
            AssignMode::Push => "push",
            AssignMode::Auto => "auto",
        }
    }
}

pub async fn eligible_driver(state: &AppState, driver_id: Uuid) -> Result<Driver, AppError> {
    let driver = state
        .drivers
        .get_driver(driver_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

    if !driver.verified {
        return Err(AppError::NotVerified(driver.id));
    }
    if !driver.active {
        return Err(AppError::Forbidden(format!("driver {} is inactive", driver.id)));
    }

    Ok(driver)
}

pub async fn list_available(state: &AppState, driver_id: Uuid) -> Result<Vec<Order>, AppError> {
    eligible_driver(state, driver_id).await?;
    Ok(state.orders.list_orders(OrderFilter::available()).await?)
}

/// Driver self-accept. Losing the race is an ordinary `Conflict`.
pub async fn accept(state: &AppState, driver_id: Uuid, order_id: Uuid) -> Result<Order, AppError> {
    let driver = eligible_driver(state, driver_id).await?;
    Ok(claim(state, order_id, &driver, AssignMode::Pull).await?.into_order())
}

/// Driver passes on an open order. Nothing is written: the order stays in
/// the pool, and a driver that already holds it cannot hand it back.
pub async fn decline(state: &AppState, driver_id: Uuid, order_id: Uuid) -> Result<(), AppError> {
    eligible_driver(state, driver_id).await?;

    let order = state
        .orders
        .get_order(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    if order.assigned_driver_id == Some(driver_id) {
        return Err(AppError::conflict(
            format!("order {order_id} is already assigned to you"),
            Some(order.status),
        ));
    }

    info!(order_id = %order_id, driver_id = %driver_id, "order declined");
    Ok(())
}

/// Admin assignment to a named driver, or to the fairness pick when none is given.
pub async fn assign(
    state: &AppState,
    order_id: Uuid,
    driver_id: Option<Uuid>,
) -> Result<Order, AppError> {
    let driver = match driver_id {
        Some(driver_id) => eligible_driver(state, driver_id).await?,
        None => pick_driver(state).await?,
    };

    settle(state, &driver, claim(state, order_id, &driver, AssignMode::Push).await?).await
}

pub async fn auto_assign(state: &AppState, order_id: Uuid) -> Result<Order, AppError> {
    let driver = pick_driver(state).await?;
    settle(state, &driver, claim(state, order_id, &driver, AssignMode::Auto).await?).await
}

async fn pick_driver(state: &AppState) -> Result<Driver, AppError> {
    state
        .drivers
        .next_available_driver()
        .await?
        .ok_or(AppError::NoAvailableDrivers)
}

/// Only a fresh claim moves the driver to the back of the fairness order.
async fn settle(state: &AppState, driver: &Driver, claimed: Claim) -> Result<Order, AppError> {
    if let Claim::Fresh(_) = &claimed {
        if let Err(err) = state.drivers.stamp_last_assigned(driver.id, Utc::now()).await {
            warn!(driver_id = %driver.id, error = %err, "failed to stamp last_assigned_at");
        }
    }
    Ok(claimed.into_order())
}

enum Claim {
    Fresh(Order),
    /// The driver already held the order; nothing was written.
    AlreadyHeld(Order),
}

impl Claim {
    fn into_order(self) -> Order {
        match self {
            Claim::Fresh(order) | Claim::AlreadyHeld(order) => order,
        }
    }
}

async fn claim(
    state: &AppState,
    order_id: Uuid,
    driver: &Driver,
    mode: AssignMode,
) -> Result<Claim, AppError> {
    let start = Instant::now();
    let result = try_claim(state, order_id, driver, mode).await;

    let outcome = match &result {
        Ok(Claim::Fresh(_)) => "success",
        Ok(Claim::AlreadyHeld(_)) => "already_held",
        Err(AppError::Conflict { .. }) => "conflict",
        Err(AppError::InvalidTransition { .. }) | Err(AppError::NotFound(_)) => "rejected",
        Err(_) => "error",
    };
    state
        .metrics
        .assignment_latency_seconds
        .with_label_values(&[mode.as_str()])
        .observe(start.elapsed().as_secs_f64());
    state
        .metrics
        .assignments_total
        .with_label_values(&[mode.as_str(), outcome])
        .inc();

    result
}

async fn try_claim(
    state: &AppState,
    order_id: Uuid,
    driver: &Driver,
    mode: AssignMode,
) -> Result<Claim, AppError> {
    let now = Utc::now();
    let guard = Guard::status_in(sources_of(OrderStatus::Assigned))
        .payment(PaymentGuard::Is(PaymentStatus::Paid))
        .driver(DriverGuard::Unassigned);
    let patch = OrderPatch {
        status: Some(OrderStatus::Assigned),
        assigned_driver_id: Some(driver.id),
        assigned_at: Some(now),
        ..OrderPatch::default()
    };

    match commit(state, order_id, guard, patch).await? {
        UpdateOutcome::Applied { order, .. } => {
            info!(
                order_id = %order.id,
                driver_id = %driver.id,
                mode = mode.as_str(),
                "order assigned"
            );
            Ok(Claim::Fresh(order))
        }
        // Retried accept or assign after a client-side timeout.
        UpdateOutcome::Unchanged(current)
            if current.status == OrderStatus::Assigned
                && current.assigned_driver_id == Some(driver.id) =>
        {
            Ok(Claim::AlreadyHeld(current))
        }
        UpdateOutcome::Unchanged(current) => {
            info!(
                order_id = %current.id,
                driver_id = %driver.id,
                mode = mode.as_str(),
                status = %current.status,
                "claim lost"
            );
            if current.assigned_driver_id.is_some() {
                Err(AppError::conflict(
                    format!("order {} is already claimed", current.id),
                    Some(current.status),
                ))
            } else {
                Err(rejection(&current, OrderStatus::Assigned))
            }
        }
        UpdateOutcome::Missing => Err(AppError::NotFound(format!("order {order_id} not found"))),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use super::{accept, assign, auto_assign, decline};
    use crate::engine::testing::test_state;
    use crate::error::AppError;
    use crate::models::order::{OrderStatus, PaymentStatus};
    use crate::store::memory::tests::{driver, order_with};

    #[tokio::test]
    async fn two_drivers_racing_for_one_order_yield_one_winner() {
        let (state, store, _rx) = test_state();
        let state = Arc::new(state);
        let d1 = driver("d1", true);
        let d2 = driver("d2", true);
        let order = order_with(OrderStatus::Paid, PaymentStatus::Paid);
        store.insert_driver_now(d1.clone()).await;
        store.insert_driver_now(d2.clone()).await;
        store.insert_order_now(order.clone()).await;

        let first = {
            let state = state.clone();
            tokio::spawn(async move { accept(&state, d1.id, order.id).await })
        };
        let second = {
            let state = state.clone();
            tokio::spawn(async move { accept(&state, d2.id, order.id).await })
        };

        let results = [first.await.unwrap(), second.await.unwrap()];
        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        let losers = results
            .iter()
            .filter(|r| matches!(r, Err(AppError::Conflict { .. })))
            .count();

        assert_eq!(winners.len(), 1);
        assert_eq!(losers, 1);
        let stored = store.order(order.id).await;
        assert_eq!(stored.assigned_driver_id, winners[0].assigned_driver_id);
        assert_eq!(stored.status, OrderStatus::Assigned);
    }

    #[tokio::test]
    async fn retried_accept_is_a_no_op_for_the_winner() {
        let (state, store, _rx) = test_state();
        let d1 = driver("d1", true);
        let order = order_with(OrderStatus::Paid, PaymentStatus::Paid);
        store.insert_driver_now(d1.clone()).await;
        store.insert_order_now(order.clone()).await;

        let first = accept(&state, d1.id, order.id).await.unwrap();
        let again = accept(&state, d1.id, order.id).await.unwrap();
        assert_eq!(first.assigned_at, again.assigned_at);
    }

    #[tokio::test]
    async fn repeated_push_assign_keeps_fairness_stamp() {
        let (state, store, _rx) = test_state();
        let d1 = driver("d1", true);
        let order = order_with(OrderStatus::Paid, PaymentStatus::Paid);
        store.insert_driver_now(d1.clone()).await;
        store.insert_order_now(order.clone()).await;

        assign(&state, order.id, Some(d1.id)).await.unwrap();
        let stamped = store.driver(d1.id).await.last_assigned_at;
        assert!(stamped.is_some());

        let again = assign(&state, order.id, Some(d1.id)).await.unwrap();
        assert_eq!(again.assigned_driver_id, Some(d1.id));
        assert_eq!(store.driver(d1.id).await.last_assigned_at, stamped);
    }

    #[tokio::test]
    async fn unverified_driver_is_refused_even_when_orders_are_open() {
        let (state, store, _rx) = test_state();
        let rookie = driver("rookie", false);
        let order = order_with(OrderStatus::Paid, PaymentStatus::Paid);
        store.insert_driver_now(rookie.clone()).await;
        store.insert_order_now(order.clone()).await;

        assert!(matches!(
            accept(&state, rookie.id, order.id).await,
            Err(AppError::NotVerified(_))
        ));
        assert!(matches!(
            assign(&state, order.id, Some(rookie.id)).await,
            Err(AppError::NotVerified(_))
        ));
        assert_eq!(store.order(order.id).await.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn push_never_precedes_payment() {
        let (state, store, _rx) = test_state();
        let d1 = driver("d1", true);
        let order = order_with(OrderStatus::ApprovedPendingPayment, PaymentStatus::Unpaid);
        store.insert_driver_now(d1.clone()).await;
        store.insert_order_now(order.clone()).await;

        let err = assign(&state, order.id, Some(d1.id)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
        assert!(store.order(order.id).await.assigned_driver_id.is_none());
    }

    #[tokio::test]
    async fn auto_assign_uses_fairness_and_stamps_driver() {
        let (state, store, _rx) = test_state();
        let mut busy = driver("busy", true);
        busy.last_assigned_at = Some(Utc::now() - Duration::minutes(5));
        let idle = driver("idle", true);
        let order = order_with(OrderStatus::Paid, PaymentStatus::Paid);
        store.insert_driver_now(busy).await;
        store.insert_driver_now(idle.clone()).await;
        store.insert_order_now(order.clone()).await;

        let assigned = auto_assign(&state, order.id).await.unwrap();
        assert_eq!(assigned.assigned_driver_id, Some(idle.id));
        assert!(store.driver(idle.id).await.last_assigned_at.is_some());
    }

    #[tokio::test]
    async fn auto_assign_without_drivers_leaves_order_in_pool() {
        let (state, store, _rx) = test_state();
        let order = order_with(OrderStatus::Paid, PaymentStatus::Paid);
        store.insert_order_now(order.clone()).await;

        assert!(matches!(
            auto_assign(&state, order.id).await,
            Err(AppError::NoAvailableDrivers)
        ));
        assert_eq!(store.order(order.id).await.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn decline_leaves_order_in_pool_but_holder_cannot_decline() {
        let (state, store, _rx) = test_state();
        let d1 = driver("d1", true);
        let d2 = driver("d2", true);
        let order = order_with(OrderStatus::Paid, PaymentStatus::Paid);
        store.insert_driver_now(d1.clone()).await;
        store.insert_driver_now(d2.clone()).await;
        store.insert_order_now(order.clone()).await;

        decline(&state, d2.id, order.id).await.unwrap();
        assert_eq!(store.order(order.id).await.status, OrderStatus::Paid);

        accept(&state, d1.id, order.id).await.unwrap();
        assert!(matches!(
            decline(&state, d1.id, order.id).await,
            Err(AppError::Conflict { .. })
        ));
    }
}
