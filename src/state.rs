use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::config::DispatchSettings;
use crate::engine::queue::SideEffect;
use crate::engine::signature::WebhookVerifier;
use crate::models::event::OrderEvent;
use crate::notify::Notifier;
use crate::observability::metrics::Metrics;
use crate::payments::CheckoutProvider;
use crate::store::{DriverStore, OrderStore};

/// Process-scoped collaborators, built once at startup.
pub struct Dependencies {
    pub orders: Arc<dyn OrderStore>,
    pub drivers: Arc<dyn DriverStore>,
    pub checkout: Arc<dyn CheckoutProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub webhook: WebhookVerifier,
    pub settings: DispatchSettings,
}

impl Dependencies {
    pub fn with_store<S>(
        store: Arc<S>,
        checkout: Arc<dyn CheckoutProvider>,
        notifier: Arc<dyn Notifier>,
        webhook: WebhookVerifier,
        settings: DispatchSettings,
    ) -> Self
    where
        S: OrderStore + DriverStore + 'static,
    {
        Self {
            orders: store.clone(),
            drivers: store,
            checkout,
            notifier,
            webhook,
            settings,
        }
    }
}

pub struct AppState {
    pub orders: Arc<dyn OrderStore>,
    pub drivers: Arc<dyn DriverStore>,
    pub checkout: Arc<dyn CheckoutProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub webhook: WebhookVerifier,
    pub settings: DispatchSettings,
    pub effects_tx: mpsc::Sender<SideEffect>,
    pub order_events_tx: broadcast::Sender<OrderEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        deps: Dependencies,
        side_effect_queue_size: usize,
        event_buffer_size: usize,
    ) -> (Self, mpsc::Receiver<SideEffect>) {
        let (effects_tx, effects_rx) = mpsc::channel(side_effect_queue_size);
        let (order_events_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        (
            Self {
                orders: deps.orders,
                drivers: deps.drivers,
                checkout: deps.checkout,
                notifier: deps.notifier,
                webhook: deps.webhook,
                settings: deps.settings,
                effects_tx,
                order_events_tx,
                metrics: Metrics::new(),
            },
            effects_rx,
        )
    }
}
