use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::engine::queue::{enqueue, SideEffect};
use crate::error::AppError;
use crate::models::order::{
    CustomerContact, Order, OrderStatus, PaidVia, PaymentStatus, ServiceType,
};
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    pub service_type: ServiceType,
    pub pickup_address: String,
    pub delivery_address: Option<String>,
    pub scheduled_for: DateTime<Utc>,
    pub amount_cents: i64,
    pub currency: Option<String>,
    pub customer: CustomerContact,
}

impl NewOrder {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.pickup_address.trim().is_empty() {
            return Err(AppError::BadRequest("pickup_address cannot be empty".to_string()));
        }

        let has_delivery = self
            .delivery_address
            .as_deref()
            .is_some_and(|address| !address.trim().is_empty());
        if self.service_type == ServiceType::Courier && !has_delivery {
            return Err(AppError::BadRequest(
                "courier orders need a delivery_address".to_string(),
            ));
        }

        if self.amount_cents <= 0 {
            return Err(AppError::BadRequest("amount_cents must be > 0".to_string()));
        }

        if self.customer.name.trim().is_empty() {
            return Err(AppError::BadRequest("customer.name cannot be empty".to_string()));
        }

        if !self.customer.email.contains('@') {
            return Err(AppError::BadRequest(
                "customer.email is not an address".to_string(),
            ));
        }

        if let Some(currency) = &self.currency {
            if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(AppError::BadRequest(format!(
                    "currency {currency} is not an ISO 4217 code"
                )));
            }
        }

        Ok(())
    }

    fn into_order(self, default_currency: &str) -> Order {
        Order {
            id: Uuid::new_v4(),
            service_type: self.service_type,
            pickup_address: self.pickup_address.trim().to_string(),
            delivery_address: self
                .delivery_address
                .map(|address| address.trim().to_string())
                .filter(|address| !address.is_empty()),
            scheduled_for: self.scheduled_for,
            amount_cents: self.amount_cents,
            currency: self
                .currency
                .unwrap_or_else(|| default_currency.to_string())
                .to_lowercase(),
            customer: self.customer,
            status: OrderStatus::PendingAdminReview,
            payment_status: PaymentStatus::Unpaid,
            paid_via: None,
            payment_reference: None,
            manual_payment_note: None,
            checkout_session_id: None,
            checkout_url: None,
            assigned_driver_id: None,
            pickup_proof: None,
            delivery_proof: None,
            rejection_reason: None,
            created_at: Utc::now(),
            approved_at: None,
            paid_at: None,
            assigned_at: None,
            en_route_at: None,
            delivered_at: None,
            rejected_at: None,
        }
    }
}

/// Customer-facing creation: every order starts under admin review.
pub async fn create_order(state: &AppState, input: NewOrder) -> Result<Order, AppError> {
    input.validate()?;

    let order = input.into_order(&state.settings.default_currency);
    state.orders.insert_order(order.clone()).await?;

    info!(order_id = %order.id, service_type = ?order.service_type, "order created");
    Ok(order)
}

/// Ops creation of an order already settled outside the checkout flow. It
/// lands directly in the dispatch pool.
pub async fn create_prepaid_order(
    state: &AppState,
    input: NewOrder,
    payment_reference: Option<String>,
) -> Result<Order, AppError> {
    input.validate()?;

    let mut order = input.into_order(&state.settings.default_currency);
    let now = Utc::now();
    order.status = OrderStatus::Paid;
    order.payment_status = PaymentStatus::Paid;
    order.paid_via = Some(PaidVia::Prepaid);
    order.payment_reference = payment_reference;
    order.approved_at = Some(now);
    order.paid_at = Some(now);

    state.orders.insert_order(order.clone()).await?;
    info!(order_id = %order.id, "prepaid order created");

    if state.settings.auto_assign {
        enqueue(state, SideEffect::AutoAssign { order_id: order.id });
    }
    Ok(order)
}
