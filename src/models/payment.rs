use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::order::CustomerContact;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub order_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub description: String,
    pub customer: CustomerContact,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// Provider event envelope. Only the fields the reconciler reads are typed;
/// the rest of the payload is kept opaque.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: PaymentEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEventData {
    pub object: Value,
}

impl PaymentEvent {
    pub fn session_id(&self) -> Option<&str> {
        self.data.object.get("id").and_then(Value::as_str)
    }

    pub fn metadata_order_id(&self) -> Option<&str> {
        self.data
            .object
            .get("metadata")
            .and_then(|metadata| metadata.get("order_id"))
            .and_then(Value::as_str)
    }
}
