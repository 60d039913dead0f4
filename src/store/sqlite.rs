//! SQLite-backed store.
//!
//! `rusqlite::Connection` is not `Sync`, so it lives behind a mutex and every
//! call runs on the blocking pool. Conditional updates compile the guard into
//! the `WHERE` clause of a single `UPDATE` and judge success by affected rows.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row, TransactionBehavior};
use tracing::info;
use uuid::Uuid;

use crate::models::driver::{Driver, DriverSession, GeoPoint, LocationPing};
use crate::models::order::{
    CustomerContact, Order, OrderStatus, PaidVia, PaymentStatus, ProofArtifact, ProofKind,
    ServiceType,
};
use crate::store::{
    DriverGuard, DriverStore, Guard, OrderFilter, OrderPatch, OrderStore, PaymentGuard,
    StoreError, UpdateOutcome,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS orders (
    id TEXT PRIMARY KEY,
    service_type TEXT NOT NULL,
    pickup_address TEXT NOT NULL,
    delivery_address TEXT,
    scheduled_for TEXT NOT NULL,
    amount_cents INTEGER NOT NULL,
    currency TEXT NOT NULL,
    customer_name TEXT NOT NULL,
    customer_email TEXT NOT NULL,
    customer_phone TEXT,
    status TEXT NOT NULL,
    payment_status TEXT NOT NULL,
    paid_via TEXT,
    payment_reference TEXT,
    manual_payment_note TEXT,
    checkout_session_id TEXT,
    checkout_url TEXT,
    assigned_driver_id TEXT,
    pickup_proof_url TEXT,
    pickup_confirmed INTEGER,
    pickup_recorded_at TEXT,
    delivery_proof_url TEXT,
    delivery_confirmed INTEGER,
    delivery_recorded_at TEXT,
    rejection_reason TEXT,
    created_at TEXT NOT NULL,
    approved_at TEXT,
    paid_at TEXT,
    assigned_at TEXT,
    en_route_at TEXT,
    delivered_at TEXT,
    rejected_at TEXT
);
CREATE INDEX IF NOT EXISTS orders_status_idx ON orders (status, assigned_driver_id);

CREATE TABLE IF NOT EXISTS drivers (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    phone TEXT,
    active INTEGER NOT NULL,
    verified INTEGER NOT NULL,
    pin_digest TEXT NOT NULL,
    last_assigned_at TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS driver_sessions (
    token_digest TEXT PRIMARY KEY,
    driver_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    revoked INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS location_pings (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    driver_id TEXT NOT NULL,
    order_id TEXT,
    lat REAL NOT NULL,
    lng REAL NOT NULL,
    recorded_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS location_pings_driver_idx ON location_pings (driver_id, recorded_at);
";

const ORDER_COLUMNS: &str = "id, service_type, pickup_address, delivery_address, scheduled_for, \
    amount_cents, currency, customer_name, customer_email, customer_phone, status, payment_status, \
    paid_via, payment_reference, manual_payment_note, checkout_session_id, checkout_url, \
    assigned_driver_id, pickup_proof_url, pickup_confirmed, pickup_recorded_at, delivery_proof_url, \
    delivery_confirmed, delivery_recorded_at, rejection_reason, created_at, approved_at, paid_at, \
    assigned_at, en_route_at, delivered_at, rejected_at";

const DRIVER_COLUMNS: &str =
    "id, name, phone, active, verified, pin_digest, last_assigned_at, created_at";

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        info!(path = %path.as_ref().display(), "sqlite store opened");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, job: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| StoreError::Task("sqlite connection mutex poisoned".to_string()))?;
            job(&mut conn)
        })
        .await
        .map_err(|err| StoreError::Task(err.to_string()))?
    }
}

fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn ts_value(value: Option<DateTime<Utc>>) -> Value {
    value.map(|at| Value::Text(ts(at))).unwrap_or(Value::Null)
}

fn text_value(value: Option<&str>) -> Value {
    value.map(|text| Value::Text(text.to_string())).unwrap_or(Value::Null)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|err| StoreError::Corrupt(format!("bad timestamp {raw}: {err}")))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.as_deref().map(parse_ts).transpose()
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|err| StoreError::Corrupt(format!("bad uuid {raw}: {err}")))
}

fn parse_enum<T: FromStr<Err = String>>(raw: &str) -> Result<T, StoreError> {
    raw.parse::<T>().map_err(StoreError::Corrupt)
}

fn service_type_str(service_type: ServiceType) -> &'static str {
    match service_type {
        ServiceType::Courier => "courier",
        ServiceType::Notary => "notary",
    }
}

fn parse_service_type(raw: &str) -> Result<ServiceType, StoreError> {
    match raw {
        "courier" => Ok(ServiceType::Courier),
        "notary" => Ok(ServiceType::Notary),
        other => Err(StoreError::Corrupt(format!("unknown service type: {other}"))),
    }
}

fn proof_prefix(kind: ProofKind) -> &'static str {
    match kind {
        ProofKind::Pickup => "pickup",
        ProofKind::Delivery => "delivery",
    }
}

fn read_proof(row: &Row<'_>, kind: ProofKind) -> Result<Option<ProofArtifact>, StoreError> {
    let prefix = proof_prefix(kind);
    let recorded_at: Option<String> = row.get(format!("{prefix}_recorded_at").as_str())?;
    let Some(recorded_at) = recorded_at else {
        return Ok(None);
    };

    let confirmed: Option<i64> = row.get(format!("{prefix}_confirmed").as_str())?;
    Ok(Some(ProofArtifact {
        url: row.get(format!("{prefix}_proof_url").as_str())?,
        confirmed: confirmed.unwrap_or(0) != 0,
        recorded_at: parse_ts(&recorded_at)?,
    }))
}

fn read_order(row: &Row<'_>) -> Result<Order, StoreError> {
    let id: String = row.get("id")?;
    let assigned: Option<String> = row.get("assigned_driver_id")?;
    let paid_via: Option<String> = row.get("paid_via")?;

    Ok(Order {
        id: parse_uuid(&id)?,
        service_type: parse_service_type(&row.get::<_, String>("service_type")?)?,
        pickup_address: row.get("pickup_address")?,
        delivery_address: row.get("delivery_address")?,
        scheduled_for: parse_ts(&row.get::<_, String>("scheduled_for")?)?,
        amount_cents: row.get("amount_cents")?,
        currency: row.get("currency")?,
        customer: CustomerContact {
            name: row.get("customer_name")?,
            email: row.get("customer_email")?,
            phone: row.get("customer_phone")?,
        },
        status: parse_enum::<OrderStatus>(&row.get::<_, String>("status")?)?,
        payment_status: parse_enum::<PaymentStatus>(&row.get::<_, String>("payment_status")?)?,
        paid_via: paid_via.as_deref().map(parse_enum::<PaidVia>).transpose()?,
        payment_reference: row.get("payment_reference")?,
        manual_payment_note: row.get("manual_payment_note")?,
        checkout_session_id: row.get("checkout_session_id")?,
        checkout_url: row.get("checkout_url")?,
        assigned_driver_id: assigned.as_deref().map(parse_uuid).transpose()?,
        pickup_proof: read_proof(row, ProofKind::Pickup)?,
        delivery_proof: read_proof(row, ProofKind::Delivery)?,
        rejection_reason: row.get("rejection_reason")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?)?,
        approved_at: parse_opt_ts(row.get("approved_at")?)?,
        paid_at: parse_opt_ts(row.get("paid_at")?)?,
        assigned_at: parse_opt_ts(row.get("assigned_at")?)?,
        en_route_at: parse_opt_ts(row.get("en_route_at")?)?,
        delivered_at: parse_opt_ts(row.get("delivered_at")?)?,
        rejected_at: parse_opt_ts(row.get("rejected_at")?)?,
    })
}

fn read_driver(row: &Row<'_>) -> Result<Driver, StoreError> {
    let id: String = row.get("id")?;
    let active: i64 = row.get("active")?;
    let verified: i64 = row.get("verified")?;

    Ok(Driver {
        id: parse_uuid(&id)?,
        name: row.get("name")?,
        phone: row.get("phone")?,
        active: active != 0,
        verified: verified != 0,
        pin_digest: row.get("pin_digest")?,
        last_assigned_at: parse_opt_ts(row.get("last_assigned_at")?)?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?)?,
    })
}

fn select_order(conn: &Connection, id: Uuid) -> Result<Option<Order>, StoreError> {
    let mut stmt = conn.prepare_cached(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1"))?;
    let mut rows = stmt.query(params![id.to_string()])?;
    match rows.next()? {
        Some(row) => Ok(Some(read_order(row)?)),
        None => Ok(None),
    }
}

fn select_driver(conn: &Connection, id: Uuid) -> Result<Option<Driver>, StoreError> {
    let mut stmt =
        conn.prepare_cached(&format!("SELECT {DRIVER_COLUMNS} FROM drivers WHERE id = ?1"))?;
    let mut rows = stmt.query(params![id.to_string()])?;
    match rows.next()? {
        Some(row) => Ok(Some(read_driver(row)?)),
        None => Ok(None),
    }
}

/// `UPDATE orders SET ... WHERE id = ? AND <guard>` with positional values.
fn compile_update(id: Uuid, guard: &Guard, patch: &OrderPatch) -> (String, Vec<Value>) {
    let mut sets: Vec<&'static str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    let mut set = |column: &'static str, value: Value| {
        sets.push(column);
        values.push(value);
    };

    if let Some(status) = patch.status {
        set("status", Value::Text(status.as_str().to_string()));
    }
    if let Some(payment_status) = patch.payment_status {
        set("payment_status", Value::Text(payment_status.as_str().to_string()));
    }
    if let Some(paid_via) = patch.paid_via {
        set("paid_via", Value::Text(paid_via.as_str().to_string()));
    }
    if let Some(amount) = patch.amount_cents {
        set("amount_cents", Value::Integer(amount));
    }
    if patch.payment_reference.is_some() {
        set("payment_reference", text_value(patch.payment_reference.as_deref()));
    }
    if patch.manual_payment_note.is_some() {
        set("manual_payment_note", text_value(patch.manual_payment_note.as_deref()));
    }
    if patch.checkout_session_id.is_some() {
        set("checkout_session_id", text_value(patch.checkout_session_id.as_deref()));
    }
    if patch.checkout_url.is_some() {
        set("checkout_url", text_value(patch.checkout_url.as_deref()));
    }
    if let Some(driver_id) = patch.assigned_driver_id {
        set("assigned_driver_id", Value::Text(driver_id.to_string()));
    }
    if let Some(proof) = &patch.pickup_proof {
        set("pickup_proof_url", text_value(proof.url.as_deref()));
        set("pickup_confirmed", Value::Integer(i64::from(proof.confirmed)));
        set("pickup_recorded_at", Value::Text(ts(proof.recorded_at)));
    }
    if let Some(proof) = &patch.delivery_proof {
        set("delivery_proof_url", text_value(proof.url.as_deref()));
        set("delivery_confirmed", Value::Integer(i64::from(proof.confirmed)));
        set("delivery_recorded_at", Value::Text(ts(proof.recorded_at)));
    }
    if patch.rejection_reason.is_some() {
        set("rejection_reason", text_value(patch.rejection_reason.as_deref()));
    }
    for (column, at) in [
        ("approved_at", patch.approved_at),
        ("paid_at", patch.paid_at),
        ("assigned_at", patch.assigned_at),
        ("en_route_at", patch.en_route_at),
        ("delivered_at", patch.delivered_at),
        ("rejected_at", patch.rejected_at),
    ] {
        if at.is_some() {
            set(column, ts_value(at));
        }
    }

    let mut assignments: Vec<String> = sets.iter().map(|column| format!("{column} = ?")).collect();
    if assignments.is_empty() {
        assignments.push("status = status".to_string());
    }

    let mut conditions = vec!["id = ?".to_string()];
    values.push(Value::Text(id.to_string()));

    if !guard.status_in.is_empty() {
        let marks = vec!["?"; guard.status_in.len()].join(", ");
        conditions.push(format!("status IN ({marks})"));
        values.extend(
            guard
                .status_in
                .iter()
                .map(|status| Value::Text(status.as_str().to_string())),
        );
    }

    match guard.payment {
        PaymentGuard::Any => {}
        PaymentGuard::Is(expected) => {
            conditions.push("payment_status = ?".to_string());
            values.push(Value::Text(expected.as_str().to_string()));
        }
        PaymentGuard::IsNot(excluded) => {
            conditions.push("payment_status <> ?".to_string());
            values.push(Value::Text(excluded.as_str().to_string()));
        }
    }

    match guard.driver {
        DriverGuard::Any => {}
        DriverGuard::Unassigned => conditions.push("assigned_driver_id IS NULL".to_string()),
        DriverGuard::AssignedTo(driver_id) => {
            conditions.push("assigned_driver_id = ?".to_string());
            values.push(Value::Text(driver_id.to_string()));
        }
    }

    if let Some(kind) = guard.proof {
        let prefix = proof_prefix(kind);
        conditions.push(format!(
            "({prefix}_recorded_at IS NOT NULL AND ({prefix}_confirmed = 1 OR trim(coalesce({prefix}_proof_url, '')) <> ''))"
        ));
    }

    let sql = format!(
        "UPDATE orders SET {} WHERE {}",
        assignments.join(", "),
        conditions.join(" AND ")
    );
    (sql, values)
}

#[async_trait]
impl OrderStore for SqliteStore {
    async fn insert_order(&self, order: Order) -> Result<(), StoreError> {
        self.run(move |conn| {
            let pickup = order.pickup_proof.as_ref();
            let delivery = order.delivery_proof.as_ref();
            let values: Vec<Value> = vec![
                Value::Text(order.id.to_string()),
                Value::Text(service_type_str(order.service_type).to_string()),
                Value::Text(order.pickup_address.clone()),
                text_value(order.delivery_address.as_deref()),
                Value::Text(ts(order.scheduled_for)),
                Value::Integer(order.amount_cents),
                Value::Text(order.currency.clone()),
                Value::Text(order.customer.name.clone()),
                Value::Text(order.customer.email.clone()),
                text_value(order.customer.phone.as_deref()),
                Value::Text(order.status.as_str().to_string()),
                Value::Text(order.payment_status.as_str().to_string()),
                text_value(order.paid_via.map(|via| via.as_str())),
                text_value(order.payment_reference.as_deref()),
                text_value(order.manual_payment_note.as_deref()),
                text_value(order.checkout_session_id.as_deref()),
                text_value(order.checkout_url.as_deref()),
                text_value(order.assigned_driver_id.map(|id| id.to_string()).as_deref()),
                text_value(pickup.and_then(|proof| proof.url.as_deref())),
                pickup.map(|proof| Value::Integer(i64::from(proof.confirmed))).unwrap_or(Value::Null),
                ts_value(pickup.map(|proof| proof.recorded_at)),
                text_value(delivery.and_then(|proof| proof.url.as_deref())),
                delivery.map(|proof| Value::Integer(i64::from(proof.confirmed))).unwrap_or(Value::Null),
                ts_value(delivery.map(|proof| proof.recorded_at)),
                text_value(order.rejection_reason.as_deref()),
                Value::Text(ts(order.created_at)),
                ts_value(order.approved_at),
                ts_value(order.paid_at),
                ts_value(order.assigned_at),
                ts_value(order.en_route_at),
                ts_value(order.delivered_at),
                ts_value(order.rejected_at),
            ];
            let marks = vec!["?"; values.len()].join(", ");

            let inserted = conn.execute(
                &format!("INSERT OR IGNORE INTO orders ({ORDER_COLUMNS}) VALUES ({marks})"),
                params_from_iter(values.iter()),
            )?;
            if inserted == 0 {
                return Err(StoreError::Duplicate(format!("order {}", order.id)));
            }
            Ok(())
        })
        .await
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        self.run(move |conn| select_order(conn, id)).await
    }

    async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>, StoreError> {
        self.run(move |conn| {
            let mut conditions = vec!["1 = 1".to_string()];
            let mut values: Vec<Value> = Vec::new();

            if let Some(status) = filter.status {
                conditions.push("status = ?".to_string());
                values.push(Value::Text(status.as_str().to_string()));
            }
            if let Some(payment_status) = filter.payment_status {
                conditions.push("payment_status = ?".to_string());
                values.push(Value::Text(payment_status.as_str().to_string()));
            }
            if filter.unassigned_only {
                conditions.push("assigned_driver_id IS NULL".to_string());
            }
            if let Some(driver_id) = filter.assigned_driver_id {
                conditions.push("assigned_driver_id = ?".to_string());
                values.push(Value::Text(driver_id.to_string()));
            }

            let mut stmt = conn.prepare(&format!(
                "SELECT {ORDER_COLUMNS} FROM orders WHERE {} ORDER BY created_at ASC",
                conditions.join(" AND ")
            ))?;
            let mut rows = stmt.query(params_from_iter(values.iter()))?;

            let mut orders = Vec::new();
            while let Some(row) = rows.next()? {
                orders.push(read_order(row)?);
            }
            Ok(orders)
        })
        .await
    }

    async fn update_if(
        &self,
        id: Uuid,
        guard: Guard,
        patch: OrderPatch,
    ) -> Result<UpdateOutcome, StoreError> {
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let previous: Option<String> = tx
                .query_row(
                    "SELECT status FROM orders WHERE id = ?1",
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(previous) = previous else {
                return Ok(UpdateOutcome::Missing);
            };

            let (sql, values) = compile_update(id, &guard, &patch);
            let changed = tx.execute(&sql, params_from_iter(values.iter()))?;

            let order = select_order(&tx, id)?
                .ok_or_else(|| StoreError::Corrupt(format!("order {id} vanished mid-update")))?;
            tx.commit()?;

            if changed == 0 {
                return Ok(UpdateOutcome::Unchanged(order));
            }

            Ok(UpdateOutcome::Applied {
                previous: parse_enum::<OrderStatus>(&previous)?,
                order,
            })
        })
        .await
    }

    async fn count_orders(&self) -> Result<usize, StoreError> {
        self.run(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }
}

#[async_trait]
impl DriverStore for SqliteStore {
    async fn insert_driver(&self, driver: Driver) -> Result<(), StoreError> {
        self.run(move |conn| {
            let inserted = conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO drivers ({DRIVER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    driver.id.to_string(),
                    driver.name,
                    driver.phone,
                    driver.active,
                    driver.verified,
                    driver.pin_digest,
                    driver.last_assigned_at.map(ts),
                    ts(driver.created_at),
                ],
            )?;
            if inserted == 0 {
                return Err(StoreError::Duplicate(format!("driver {}", driver.id)));
            }
            Ok(())
        })
        .await
    }

    async fn get_driver(&self, id: Uuid) -> Result<Option<Driver>, StoreError> {
        self.run(move |conn| select_driver(conn, id)).await
    }

    async fn list_drivers(&self) -> Result<Vec<Driver>, StoreError> {
        self.run(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DRIVER_COLUMNS} FROM drivers ORDER BY created_at ASC"
            ))?;
            let mut rows = stmt.query([])?;
            let mut drivers = Vec::new();
            while let Some(row) = rows.next()? {
                drivers.push(read_driver(row)?);
            }
            Ok(drivers)
        })
        .await
    }

    async fn set_driver_flags(
        &self,
        id: Uuid,
        active: Option<bool>,
        verified: Option<bool>,
    ) -> Result<Option<Driver>, StoreError> {
        self.run(move |conn| {
            conn.execute(
                "UPDATE drivers SET active = coalesce(?2, active), verified = coalesce(?3, verified) WHERE id = ?1",
                params![id.to_string(), active, verified],
            )?;
            select_driver(conn, id)
        })
        .await
    }

    async fn next_available_driver(&self) -> Result<Option<Driver>, StoreError> {
        self.run(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {DRIVER_COLUMNS} FROM drivers WHERE active = 1 AND verified = 1 \
                 ORDER BY last_assigned_at ASC NULLS FIRST, created_at ASC LIMIT 1"
            ))?;
            let mut rows = stmt.query([])?;
            match rows.next()? {
                Some(row) => Ok(Some(read_driver(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn stamp_last_assigned(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.run(move |conn| {
            conn.execute(
                "UPDATE drivers SET last_assigned_at = ?2 WHERE id = ?1",
                params![id.to_string(), ts(at)],
            )?;
            Ok(())
        })
        .await
    }

    async fn count_drivers(&self) -> Result<usize, StoreError> {
        self.run(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM drivers", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    async fn insert_session(&self, session: DriverSession) -> Result<(), StoreError> {
        self.run(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO driver_sessions (token_digest, driver_id, created_at, expires_at, revoked) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    session.token_digest,
                    session.driver_id.to_string(),
                    ts(session.created_at),
                    ts(session.expires_at),
                    session.revoked,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn find_session(&self, token_digest: &str) -> Result<Option<DriverSession>, StoreError> {
        let token_digest = token_digest.to_string();
        self.run(move |conn| {
            let row: Option<(String, String, String, bool)> = conn
                .query_row(
                    "SELECT driver_id, created_at, expires_at, revoked FROM driver_sessions WHERE token_digest = ?1",
                    params![token_digest],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;

            row.map(|(driver_id, created_at, expires_at, revoked)| {
                Ok(DriverSession {
                    token_digest: token_digest.clone(),
                    driver_id: parse_uuid(&driver_id)?,
                    created_at: parse_ts(&created_at)?,
                    expires_at: parse_ts(&expires_at)?,
                    revoked,
                })
            })
            .transpose()
        })
        .await
    }

    async fn revoke_session(&self, token_digest: &str) -> Result<bool, StoreError> {
        let token_digest = token_digest.to_string();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE driver_sessions SET revoked = 1 WHERE token_digest = ?1 AND revoked = 0",
                params![token_digest],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn append_location(&self, ping: LocationPing) -> Result<(), StoreError> {
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO location_pings (driver_id, order_id, lat, lng, recorded_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    ping.driver_id.to_string(),
                    ping.order_id.map(|id| id.to_string()),
                    ping.location.lat,
                    ping.location.lng,
                    ts(ping.recorded_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn locations_for(
        &self,
        driver_id: Uuid,
        limit: usize,
    ) -> Result<Vec<LocationPing>, StoreError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT order_id, lat, lng, recorded_at FROM location_pings \
                 WHERE driver_id = ?1 ORDER BY recorded_at DESC, seq DESC LIMIT ?2",
            )?;
            let mut rows = stmt.query(params![driver_id.to_string(), limit as i64])?;

            let mut pings = Vec::new();
            while let Some(row) = rows.next()? {
                let order_id: Option<String> = row.get(0)?;
                let recorded_at: String = row.get(3)?;
                pings.push(LocationPing {
                    driver_id,
                    order_id: order_id.as_deref().map(parse_uuid).transpose()?,
                    location: GeoPoint {
                        lat: row.get(1)?,
                        lng: row.get(2)?,
                    },
                    recorded_at: parse_ts(&recorded_at)?,
                });
            }
            Ok(pings)
        })
        .await
    }
}
