use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Courier,
    Notary,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingAdminReview,
    ApprovedPendingPayment,
    #[serde(alias = "ready_for_dispatch")]
    Paid,
    Assigned,
    EnRoute,
    Completed,
    Rejected,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::PendingAdminReview,
        OrderStatus::ApprovedPendingPayment,
        OrderStatus::Paid,
        OrderStatus::Assigned,
        OrderStatus::EnRoute,
        OrderStatus::Completed,
        OrderStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingAdminReview => "pending_admin_review",
            OrderStatus::ApprovedPendingPayment => "approved_pending_payment",
            OrderStatus::Paid => "paid",
            OrderStatus::Assigned => "assigned",
            OrderStatus::EnRoute => "en_route",
            OrderStatus::Completed => "completed",
            OrderStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Rejected)
    }

    /// Statuses in which an order carries an assigned driver.
    pub fn has_driver(&self) -> bool {
        matches!(
            self,
            OrderStatus::Assigned | OrderStatus::EnRoute | OrderStatus::Completed
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready_for_dispatch" => Ok(OrderStatus::Paid),
            other => OrderStatus::ALL
                .into_iter()
                .find(|status| status.as_str() == other)
                .ok_or_else(|| format!("unknown order status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(PaymentStatus::Unpaid),
            "paid" => Ok(PaymentStatus::Paid),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaidVia {
    Checkout,
    Manual,
    Prepaid,
}

impl PaidVia {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaidVia::Checkout => "checkout",
            PaidVia::Manual => "manual",
            PaidVia::Prepaid => "prepaid",
        }
    }
}

impl FromStr for PaidVia {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checkout" => Ok(PaidVia::Checkout),
            "manual" => Ok(PaidVia::Manual),
            "prepaid" => Ok(PaidVia::Prepaid),
            other => Err(format!("unknown payment channel: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProofKind {
    Pickup,
    Delivery,
}

impl fmt::Display for ProofKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProofKind::Pickup => f.write_str("pickup"),
            ProofKind::Delivery => f.write_str("delivery"),
        }
    }
}

/// Evidence reported by the upload service: a photo reference, an explicit
/// confirmation flag, or both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProofArtifact {
    pub url: Option<String>,
    pub confirmed: bool,
    pub recorded_at: DateTime<Utc>,
}

impl ProofArtifact {
    pub fn is_recorded(&self) -> bool {
        self.confirmed || self.url.as_deref().is_some_and(|url| !url.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerContact {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub service_type: ServiceType,
    pub pickup_address: String,
    pub delivery_address: Option<String>,
    pub scheduled_for: DateTime<Utc>,
    pub amount_cents: i64,
    pub currency: String,
    pub customer: CustomerContact,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub paid_via: Option<PaidVia>,
    pub payment_reference: Option<String>,
    pub manual_payment_note: Option<String>,
    pub checkout_session_id: Option<String>,
    pub checkout_url: Option<String>,
    pub assigned_driver_id: Option<Uuid>,
    pub pickup_proof: Option<ProofArtifact>,
    pub delivery_proof: Option<ProofArtifact>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub en_route_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn proof(&self, kind: ProofKind) -> Option<&ProofArtifact> {
        match kind {
            ProofKind::Pickup => self.pickup_proof.as_ref(),
            ProofKind::Delivery => self.delivery_proof.as_ref(),
        }
    }

    pub fn has_proof(&self, kind: ProofKind) -> bool {
        self.proof(kind).is_some_and(ProofArtifact::is_recorded)
    }
}
