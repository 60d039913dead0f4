//! Order store and driver directory.
//!
//! Every contended write goes through [`OrderStore::update_if`]: the guard is
//! evaluated and the patch applied as one atomic step against a single row.
//! That step is the only serialization point between concurrent handlers.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::driver::{Driver, DriverSession, LocationPing};
use crate::models::order::{
    Order, OrderStatus, PaidVia, PaymentStatus, ProofArtifact, ProofKind,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("storage task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum PaymentGuard {
    #[default]
    Any,
    Is(PaymentStatus),
    IsNot(PaymentStatus),
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum DriverGuard {
    #[default]
    Any,
    Unassigned,
    AssignedTo(Uuid),
}

/// Predicate of a conditional update.
#[derive(Debug, Clone, Default)]
pub struct Guard {
    pub status_in: Vec<OrderStatus>,
    pub payment: PaymentGuard,
    pub driver: DriverGuard,
    pub proof: Option<ProofKind>,
}

impl Guard {
    pub fn status_in(statuses: Vec<OrderStatus>) -> Self {
        Self {
            status_in: statuses,
            ..Self::default()
        }
    }

    pub fn payment(mut self, payment: PaymentGuard) -> Self {
        self.payment = payment;
        self
    }

    pub fn driver(mut self, driver: DriverGuard) -> Self {
        self.driver = driver;
        self
    }

    pub fn with_proof(mut self, kind: ProofKind) -> Self {
        self.proof = Some(kind);
        self
    }

    pub fn matches(&self, order: &Order) -> bool {
        let status_ok = self.status_in.is_empty() || self.status_in.contains(&order.status);

        let payment_ok = match self.payment {
            PaymentGuard::Any => true,
            PaymentGuard::Is(expected) => order.payment_status == expected,
            PaymentGuard::IsNot(excluded) => order.payment_status != excluded,
        };

        let driver_ok = match self.driver {
            DriverGuard::Any => true,
            DriverGuard::Unassigned => order.assigned_driver_id.is_none(),
            DriverGuard::AssignedTo(driver_id) => order.assigned_driver_id == Some(driver_id),
        };

        let proof_ok = self.proof.is_none_or(|kind| order.has_proof(kind));

        status_ok && payment_ok && driver_ok && proof_ok
    }
}

/// Columns a conditional update writes. Fields left as `None` are untouched;
/// a patch never clears a column.
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub paid_via: Option<PaidVia>,
    pub payment_reference: Option<String>,
    pub manual_payment_note: Option<String>,
    pub checkout_session_id: Option<String>,
    pub checkout_url: Option<String>,
    pub amount_cents: Option<i64>,
    pub assigned_driver_id: Option<Uuid>,
    pub pickup_proof: Option<ProofArtifact>,
    pub delivery_proof: Option<ProofArtifact>,
    pub rejection_reason: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub en_route_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
}

impl OrderPatch {
    pub fn status(status: OrderStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn apply(&self, order: &mut Order) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }
        fn set_opt<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                *slot = value.clone();
            }
        }

        set(&mut order.status, &self.status);
        set(&mut order.payment_status, &self.payment_status);
        set(&mut order.amount_cents, &self.amount_cents);
        set_opt(&mut order.paid_via, &self.paid_via);
        set_opt(&mut order.payment_reference, &self.payment_reference);
        set_opt(&mut order.manual_payment_note, &self.manual_payment_note);
        set_opt(&mut order.checkout_session_id, &self.checkout_session_id);
        set_opt(&mut order.checkout_url, &self.checkout_url);
        set_opt(&mut order.assigned_driver_id, &self.assigned_driver_id);
        set_opt(&mut order.pickup_proof, &self.pickup_proof);
        set_opt(&mut order.delivery_proof, &self.delivery_proof);
        set_opt(&mut order.rejection_reason, &self.rejection_reason);
        set_opt(&mut order.approved_at, &self.approved_at);
        set_opt(&mut order.paid_at, &self.paid_at);
        set_opt(&mut order.assigned_at, &self.assigned_at);
        set_opt(&mut order.en_route_at, &self.en_route_at);
        set_opt(&mut order.delivered_at, &self.delivered_at);
        set_opt(&mut order.rejected_at, &self.rejected_at);
    }
}

#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    Applied { previous: OrderStatus, order: Order },
    /// The row exists but the guard did not match; carries the row as read
    /// right after the failed write.
    Unchanged(Order),
    Missing,
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub unassigned_only: bool,
    pub assigned_driver_id: Option<Uuid>,
}

impl OrderFilter {
    /// Paid orders no driver has claimed yet.
    pub fn available() -> Self {
        Self {
            status: Some(OrderStatus::Paid),
            payment_status: Some(PaymentStatus::Paid),
            unassigned_only: true,
            assigned_driver_id: None,
        }
    }

    pub fn assigned_to(driver_id: Uuid) -> Self {
        Self {
            assigned_driver_id: Some(driver_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, order: &Order) -> bool {
        self.status.is_none_or(|status| order.status == status)
            && self
                .payment_status
                .is_none_or(|payment| order.payment_status == payment)
            && (!self.unassigned_only || order.assigned_driver_id.is_none())
            && self
                .assigned_driver_id
                .is_none_or(|driver_id| order.assigned_driver_id == Some(driver_id))
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert_order(&self, order: Order) -> Result<(), StoreError>;

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    /// Matching orders, oldest first.
    async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>, StoreError>;

    async fn update_if(
        &self,
        id: Uuid,
        guard: Guard,
        patch: OrderPatch,
    ) -> Result<UpdateOutcome, StoreError>;

    async fn count_orders(&self) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait DriverStore: Send + Sync {
    async fn insert_driver(&self, driver: Driver) -> Result<(), StoreError>;

    async fn get_driver(&self, id: Uuid) -> Result<Option<Driver>, StoreError>;

    async fn list_drivers(&self) -> Result<Vec<Driver>, StoreError>;

    async fn set_driver_flags(
        &self,
        id: Uuid,
        active: Option<bool>,
        verified: Option<bool>,
    ) -> Result<Option<Driver>, StoreError>;

    /// Fairness pick: active and verified, least recently assigned first,
    /// never-assigned drivers ahead of everyone.
    async fn next_available_driver(&self) -> Result<Option<Driver>, StoreError>;

    async fn stamp_last_assigned(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn count_drivers(&self) -> Result<usize, StoreError>;

    async fn insert_session(&self, session: DriverSession) -> Result<(), StoreError>;

    async fn find_session(&self, token_digest: &str) -> Result<Option<DriverSession>, StoreError>;

    async fn revoke_session(&self, token_digest: &str) -> Result<bool, StoreError>;

    async fn append_location(&self, ping: LocationPing) -> Result<(), StoreError>;

    /// Most recent pings first.
    async fn locations_for(
        &self,
        driver_id: Uuid,
        limit: usize,
    ) -> Result<Vec<LocationPing>, StoreError>;
}

/// Ordering used by the fairness pick: `None` sorts before any timestamp.
pub(crate) fn fairness_key(driver: &Driver) -> (Option<DateTime<Utc>>, DateTime<Utc>) {
    (driver.last_assigned_at, driver.created_at)
}
