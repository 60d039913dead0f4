pub mod admin;
pub mod driver;
pub mod orders;
pub mod webhooks;
pub mod ws;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(orders::router())
        .merge(admin::router())
        .merge(driver::router())
        .merge(webhooks::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    orders: Option<usize>,
    drivers: Option<usize>,
}

async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let orders = state.orders.count_orders().await;
    let drivers = state.drivers.count_drivers().await;

    match (orders, drivers) {
        (Ok(orders), Ok(drivers)) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                orders: Some(orders),
                drivers: Some(drivers),
            }),
        ),
        (orders, drivers) => {
            warn!(
                orders_ok = orders.is_ok(),
                drivers_ok = drivers.is_ok(),
                "store unreachable during health check"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    orders: orders.ok(),
                    drivers: drivers.ok(),
                }),
            )
        }
    }
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
