//! Caller identity for the HTTP surface.
//!
//! Drivers authenticate with a bearer token issued by `POST /driver/sessions`.
//! Admin and ops callers arrive pre-authenticated from the gateway, which
//! forwards their role and id as headers; only role checks happen here.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::DriverSession;
use crate::state::AppState;

pub const ROLE_HEADER: &str = "x-actor-role";
pub const ACTOR_HEADER: &str = "x-actor-id";

type HmacSha256 = Hmac<Sha256>;

/// Hex SHA-256 of a session token, the form tokens are stored and looked up
/// in. Tokens are 256 random bits, so no salt is needed; PINs are short and
/// go through [`hash_pin`] instead.
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

fn pin_mac(pin_secret: &str, driver_id: Uuid, pin: &str) -> Result<HmacSha256, AppError> {
    let mut mac = HmacSha256::new_from_slice(pin_secret.as_bytes())
        .map_err(|_| AppError::Internal("failed to initialize hmac".to_string()))?;
    mac.update(driver_id.as_bytes());
    mac.update(pin.as_bytes());
    Ok(mac)
}

/// Hex HMAC-SHA256 over the driver id and PIN, keyed by the server's PIN
/// secret. Equal PINs on different drivers get different digests, and the
/// digests are useless without the secret.
pub fn hash_pin(pin_secret: &str, driver_id: Uuid, pin: &str) -> Result<String, AppError> {
    Ok(hex::encode(pin_mac(pin_secret, driver_id, pin)?.finalize().into_bytes()))
}

/// Constant-time check of `pin` against a digest from [`hash_pin`].
pub fn verify_pin(
    pin_secret: &str,
    driver_id: Uuid,
    pin: &str,
    digest: &str,
) -> Result<bool, AppError> {
    let Ok(expected) = hex::decode(digest) else {
        return Ok(false);
    };
    Ok(pin_mac(pin_secret, driver_id, pin)?
        .verify_slice(&expected)
        .is_ok())
}

fn new_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn bearer(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// An authenticated driver with a live session.
#[derive(Debug, Clone)]
pub struct DriverActor {
    pub driver_id: Uuid,
    pub token_digest: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for DriverActor {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer(parts)
            .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;
        let token_digest = hash_secret(token);

        let session = state
            .drivers
            .find_session(&token_digest)
            .await?
            .filter(|session| session.is_live(Utc::now()))
            .ok_or_else(|| AppError::Unauthorized("session expired or revoked".to_string()))?;

        Ok(Self {
            driver_id: session.driver_id,
            token_digest,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Admin,
    Ops,
}

#[derive(Debug, Clone)]
pub struct AdminActor {
    pub role: ActorRole,
    pub id: String,
}

impl AdminActor {
    pub fn require_admin(&self) -> Result<(), AppError> {
        match self.role {
            ActorRole::Admin => Ok(()),
            ActorRole::Ops => Err(AppError::Forbidden(format!(
                "{} lacks the admin role",
                self.id
            ))),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminActor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let role = match header(parts, ROLE_HEADER) {
            Some("admin") => ActorRole::Admin,
            Some("ops") => ActorRole::Ops,
            Some(other) => {
                return Err(AppError::Forbidden(format!("role {other} cannot use admin routes")));
            }
            None => return Err(AppError::Unauthorized(format!("missing {ROLE_HEADER}"))),
        };
        let id = header(parts, ACTOR_HEADER)
            .ok_or_else(|| AppError::Unauthorized(format!("missing {ACTOR_HEADER}")))?
            .to_string();

        Ok(Self { role, id })
    }
}

#[derive(Debug, Serialize)]
pub struct IssuedSession {
    pub token: String,
    pub driver_id: Uuid,
    pub expires_at: chrono::DateTime<Utc>,
}

/// Exchanges a driver id and PIN for a bearer token. Unknown drivers and wrong
/// PINs fail identically.
pub async fn issue_session(
    state: &AppState,
    driver_id: Uuid,
    pin: &str,
) -> Result<IssuedSession, AppError> {
    let denied = || AppError::Unauthorized("invalid driver credentials".to_string());

    let driver = state.drivers.get_driver(driver_id).await?.ok_or_else(denied)?;
    if !verify_pin(&state.settings.pin_secret, driver.id, pin, &driver.pin_digest)? {
        warn!(driver_id = %driver_id, "driver login rejected");
        return Err(denied());
    }
    if !driver.active {
        return Err(AppError::Forbidden(format!("driver {driver_id} is inactive")));
    }

    let token = new_token();
    let now = Utc::now();
    let expires_at = now + Duration::hours(state.settings.driver_session_ttl_hours);
    state
        .drivers
        .insert_session(DriverSession {
            token_digest: hash_secret(&token),
            driver_id,
            created_at: now,
            expires_at,
            revoked: false,
        })
        .await?;

    info!(driver_id = %driver_id, %expires_at, "driver session issued");
    Ok(IssuedSession {
        token,
        driver_id,
        expires_at,
    })
}

pub async fn revoke_session(state: &AppState, actor: &DriverActor) -> Result<(), AppError> {
    if state.drivers.revoke_session(&actor.token_digest).await? {
        info!(driver_id = %actor.driver_id, "driver session revoked");
    }
    Ok(())
}
