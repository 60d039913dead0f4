//! Outbound customer/driver notifications.
//!
//! Message formatting and delivery belong to an external mailer; this crate
//! only decides when a notification is due.

use async_trait::async_trait;
use tracing::info;

use crate::models::event::OrderEvent;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &OrderEvent) -> Result<(), String>;
}

/// Writes each due notification to the log instead of sending it.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &OrderEvent) -> Result<(), String> {
        info!(
            order_id = %event.order_id,
            to = %event.to,
            recipient = %event.customer_email,
            "customer notification"
        );
        Ok(())
    }
}
