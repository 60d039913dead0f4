use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::driver::{Driver, DriverSession, LocationPing};
use crate::models::order::Order;
use crate::store::{
    fairness_key, DriverStore, Guard, OrderFilter, OrderPatch, OrderStore, StoreError,
    UpdateOutcome,
};

/// DashMap-backed store. A conditional update holds the shard write lock of
/// the order's entry for the whole read-check-write, which gives the same
/// per-row atomicity as a single `UPDATE ... WHERE`.
#[derive(Default)]
pub struct MemoryStore {
    orders: DashMap<Uuid, Order>,
    drivers: DashMap<Uuid, Driver>,
    sessions: DashMap<String, DriverSession>,
    locations: DashMap<Uuid, Vec<LocationPing>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(&self, order: Order) -> Result<(), StoreError> {
        match self.orders.entry(order.id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(format!("order {}", order.id))),
            Entry::Vacant(slot) => {
                slot.insert(order);
                Ok(())
            }
        }
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        orders.sort_by_key(|order| order.created_at);
        Ok(orders)
    }

    async fn update_if(
        &self,
        id: Uuid,
        guard: Guard,
        patch: OrderPatch,
    ) -> Result<UpdateOutcome, StoreError> {
        let Some(mut entry) = self.orders.get_mut(&id) else {
            return Ok(UpdateOutcome::Missing);
        };

        if !guard.matches(entry.value()) {
            return Ok(UpdateOutcome::Unchanged(entry.value().clone()));
        }

        let previous = entry.status;
        patch.apply(entry.value_mut());

        Ok(UpdateOutcome::Applied {
            previous,
            order: entry.value().clone(),
        })
    }

    async fn count_orders(&self) -> Result<usize, StoreError> {
        Ok(self.orders.len())
    }
}

#[async_trait]
impl DriverStore for MemoryStore {
    async fn insert_driver(&self, driver: Driver) -> Result<(), StoreError> {
        match self.drivers.entry(driver.id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(format!("driver {}", driver.id))),
            Entry::Vacant(slot) => {
                slot.insert(driver);
                Ok(())
            }
        }
    }

    async fn get_driver(&self, id: Uuid) -> Result<Option<Driver>, StoreError> {
        Ok(self.drivers.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list_drivers(&self) -> Result<Vec<Driver>, StoreError> {
        let mut drivers: Vec<Driver> = self
            .drivers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        drivers.sort_by_key(|driver| driver.created_at);
        Ok(drivers)
    }

    async fn set_driver_flags(
        &self,
        id: Uuid,
        active: Option<bool>,
        verified: Option<bool>,
    ) -> Result<Option<Driver>, StoreError> {
        let Some(mut driver) = self.drivers.get_mut(&id) else {
            return Ok(None);
        };

        if let Some(active) = active {
            driver.active = active;
        }
        if let Some(verified) = verified {
            driver.verified = verified;
        }

        Ok(Some(driver.clone()))
    }

    async fn next_available_driver(&self) -> Result<Option<Driver>, StoreError> {
        Ok(self
            .drivers
            .iter()
            .filter(|entry| entry.active && entry.verified)
            .map(|entry| entry.value().clone())
            .min_by_key(fairness_key))
    }

    async fn stamp_last_assigned(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(mut driver) = self.drivers.get_mut(&id) {
            driver.last_assigned_at = Some(at);
        }
        Ok(())
    }

    async fn count_drivers(&self) -> Result<usize, StoreError> {
        Ok(self.drivers.len())
    }

    async fn insert_session(&self, session: DriverSession) -> Result<(), StoreError> {
        self.sessions.insert(session.token_digest.clone(), session);
        Ok(())
    }

    async fn find_session(&self, token_digest: &str) -> Result<Option<DriverSession>, StoreError> {
        Ok(self
            .sessions
            .get(token_digest)
            .map(|entry| entry.value().clone()))
    }

    async fn revoke_session(&self, token_digest: &str) -> Result<bool, StoreError> {
        match self.sessions.get_mut(token_digest) {
            Some(mut session) if !session.revoked => {
                session.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn append_location(&self, ping: LocationPing) -> Result<(), StoreError> {
        self.locations.entry(ping.driver_id).or_default().push(ping);
        Ok(())
    }

    async fn locations_for(
        &self,
        driver_id: Uuid,
        limit: usize,
    ) -> Result<Vec<LocationPing>, StoreError> {
        let mut pings = self
            .locations
            .get(&driver_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        pings.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        pings.truncate(limit);
        Ok(pings)
    }
}
