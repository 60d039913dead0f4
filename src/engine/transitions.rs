//! Order status transition table.
//!
//! Pure and storage independent. Writers consult it twice: once to build the
//! predicate of their conditional update, and again to classify a write that
//! matched no row.

use crate::error::AppError;
use crate::models::order::OrderStatus;

pub fn allowed_targets(current: OrderStatus) -> &'static [OrderStatus] {
    match current {
        OrderStatus::PendingAdminReview => &[
            OrderStatus::ApprovedPendingPayment,
            OrderStatus::Rejected,
        ],
        OrderStatus::ApprovedPendingPayment => &[OrderStatus::Paid, OrderStatus::Rejected],
        OrderStatus::Paid => &[OrderStatus::Assigned],
        OrderStatus::Assigned => &[OrderStatus::EnRoute],
        OrderStatus::EnRoute => &[OrderStatus::Completed],
        OrderStatus::Completed | OrderStatus::Rejected => &[],
    }
}

pub fn can_transition(current: OrderStatus, requested: OrderStatus) -> bool {
    allowed_targets(current).contains(&requested)
}

pub fn validate(current: OrderStatus, requested: OrderStatus) -> Result<(), AppError> {
    if can_transition(current, requested) {
        Ok(())
    } else {
        Err(AppError::InvalidTransition { current, requested })
    }
}

/// Every status from which `target` is reachable in one step.
pub fn sources_of(target: OrderStatus) -> Vec<OrderStatus> {
    OrderStatus::ALL
        .into_iter()
        .filter(|source| can_transition(*source, target))
        .collect()
}
