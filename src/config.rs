use std::env;
use std::path::PathBuf;

use crate::error::AppError;
use crate::payments::StripeSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub side_effect_queue_size: usize,
    pub event_buffer_size: usize,
    pub database_path: Option<PathBuf>,
    pub payment: StripeSettings,
    pub webhook_secret: String,
    pub webhook_tolerance_secs: i64,
    pub dispatch: DispatchSettings,
}

/// Engine knobs that travel with `AppState`.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub auto_assign: bool,
    pub default_currency: String,
    pub driver_session_ttl_hours: i64,
    /// Key for driver PIN digests. Rotating it invalidates every stored PIN.
    pub pin_secret: String,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            auto_assign: false,
            default_currency: "usd".to_string(),
            driver_session_ttl_hours: 12,
            pin_secret: "dev-pin-secret".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            side_effect_queue_size: parse_or_default("SIDE_EFFECT_QUEUE_SIZE", 1024)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            database_path: env::var("DATABASE_PATH").ok().map(PathBuf::from),
            payment: StripeSettings {
                api_base: env::var("PAYMENT_API_BASE")
                    .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
                api_key: required("PAYMENT_API_KEY")?,
                success_url: env::var("CHECKOUT_SUCCESS_URL")
                    .unwrap_or_else(|_| "http://localhost:3000/checkout/success".to_string()),
                cancel_url: env::var("CHECKOUT_CANCEL_URL")
                    .unwrap_or_else(|_| "http://localhost:3000/checkout/cancel".to_string()),
            },
            webhook_secret: required("PAYMENT_WEBHOOK_SECRET")?,
            webhook_tolerance_secs: parse_or_default("WEBHOOK_TOLERANCE_SECS", 300)?,
            dispatch: DispatchSettings {
                auto_assign: parse_or_default("AUTO_ASSIGN", false)?,
                default_currency: env::var("DEFAULT_CURRENCY")
                    .unwrap_or_else(|_| "usd".to_string()),
                driver_session_ttl_hours: parse_or_default("DRIVER_SESSION_TTL_HOURS", 12)?,
                pin_secret: required("DRIVER_PIN_SECRET")?,
            },
        })
    }
}

fn required(key: &str) -> Result<String, AppError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(AppError::Internal(format!("{key} must be set"))),
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
