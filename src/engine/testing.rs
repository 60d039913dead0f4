use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::DispatchSettings;
use crate::engine::queue::SideEffect;
use crate::engine::signature::WebhookVerifier;
use crate::models::driver::Driver;
use crate::models::order::Order;
use crate::models::payment::{CheckoutRequest, CheckoutSession};
use crate::notify::LogNotifier;
use crate::payments::{CheckoutProvider, PaymentError};
use crate::state::{AppState, Dependencies};
use crate::store::{DriverStore, MemoryStore, OrderStore};

pub(crate) const WEBHOOK_SECRET: &str = "whsec_unit";

#[derive(Default)]
pub(crate) struct FakeCheckout {
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl CheckoutProvider for FakeCheckout {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(PaymentError::Malformed("provider offline".to_string()));
        }
        Ok(CheckoutSession {
            id: format!("cs_test_{call}"),
            url: format!("https://pay.test/{}", request.order_id),
        })
    }
}

pub(crate) struct TestStore {
    pub inner: Arc<MemoryStore>,
    pub checkout: Arc<FakeCheckout>,
}

impl TestStore {
    pub async fn insert_order_now(&self, order: Order) {
        self.inner.insert_order(order).await.unwrap();
    }

    pub async fn insert_driver_now(&self, driver: Driver) {
        self.inner.insert_driver(driver).await.unwrap();
    }

    pub async fn order(&self, id: Uuid) -> Order {
        self.inner.get_order(id).await.unwrap().unwrap()
    }

    pub async fn driver(&self, id: Uuid) -> Driver {
        self.inner.get_driver(id).await.unwrap().unwrap()
    }
}

pub(crate) fn test_state_with(
    settings: DispatchSettings,
) -> (AppState, TestStore, mpsc::Receiver<SideEffect>) {
    let store = Arc::new(MemoryStore::new());
    let checkout = Arc::new(FakeCheckout::default());
    let deps = Dependencies::with_store(
        store.clone(),
        checkout.clone(),
        Arc::new(LogNotifier),
        WebhookVerifier::new(WEBHOOK_SECRET, 300),
        settings,
    );
    let (state, rx) = AppState::new(deps, 64, 64);
    (
        state,
        TestStore {
            inner: store,
            checkout,
        },
        rx,
    )
}

pub(crate) fn test_state() -> (AppState, TestStore, mpsc::Receiver<SideEffect>) {
    test_state_with(DispatchSettings::default())
}
