use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::order::{Order, OrderStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: Uuid,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub driver_id: Option<Uuid>,
    pub customer_email: String,
    pub at: DateTime<Utc>,
}

impl OrderEvent {
    pub fn transition(from: OrderStatus, order: &Order) -> Self {
        Self {
            order_id: order.id,
            from,
            to: order.status,
            driver_id: order.assigned_driver_id,
            customer_email: order.customer.email.clone(),
            at: Utc::now(),
        }
    }
}
