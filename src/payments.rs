//! Outbound checkout-session collaborator.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::payment::{CheckoutRequest, CheckoutSession};

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("payment provider rejected request with {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("payment provider returned an unusable session: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError>;
}

#[derive(Debug, Clone)]
pub struct StripeSettings {
    pub api_base: String,
    pub api_key: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// Stripe-compatible client speaking the form-encoded `/v1/checkout/sessions` API.
pub struct StripeCheckout {
    http: reqwest::Client,
    settings: StripeSettings,
}

#[derive(Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

impl StripeCheckout {
    pub fn new(settings: StripeSettings) -> Self {
        let http = match reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
        {
            Ok(client) => client,
            Err(err) => {
                warn!(error = %err, "failed to configure payment http client; using defaults");
                reqwest::Client::new()
            }
        };

        Self { http, settings }
    }

    fn form(&self, request: &CheckoutRequest) -> Vec<(String, String)> {
        let order_id = request.order_id.to_string();
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("client_reference_id".to_string(), order_id.clone()),
            ("metadata[order_id]".to_string(), order_id.clone()),
            ("payment_intent_data[metadata][order_id]".to_string(), order_id),
            ("customer_email".to_string(), request.customer.email.clone()),
            ("success_url".to_string(), self.settings.success_url.clone()),
            ("cancel_url".to_string(), self.settings.cancel_url.clone()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            (
                "line_items[0][price_data][currency]".to_string(),
                request.currency.to_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                request.amount_cents.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                request.description.clone(),
            ),
        ];

        if let Some(phone) = &request.customer.phone {
            form.push(("metadata[customer_phone]".to_string(), phone.clone()));
        }

        form
    }
}

#[async_trait]
impl CheckoutProvider for StripeCheckout {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let url = format!(
            "{}/v1/checkout/sessions",
            self.settings.api_base.trim_end_matches('/')
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .header("Idempotency-Key", format!("checkout-{}", request.order_id))
            .form(&self.form(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let session: SessionResponse = response.json().await?;
        let url = session
            .url
            .ok_or_else(|| PaymentError::Malformed(format!("session {} has no url", session.id)))?;

        debug!(order_id = %request.order_id, session_id = %session.id, "checkout session created");
        Ok(CheckoutSession {
            id: session.id,
            url,
        })
    }
}
