use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use order_dispatch::api;
use order_dispatch::config::Config;
use order_dispatch::engine::queue::run_side_effect_worker;
use order_dispatch::engine::signature::WebhookVerifier;
use order_dispatch::error::AppError;
use order_dispatch::notify::LogNotifier;
use order_dispatch::payments::StripeCheckout;
use order_dispatch::state::{AppState, Dependencies};
use order_dispatch::store::{MemoryStore, SqliteStore};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let checkout = Arc::new(StripeCheckout::new(config.payment.clone()));
    let notifier = Arc::new(LogNotifier);
    let webhook = WebhookVerifier::new(config.webhook_secret.clone(), config.webhook_tolerance_secs);

    let deps = match &config.database_path {
        Some(path) => {
            let store = SqliteStore::open(path)
                .map_err(|err| AppError::Internal(format!("failed to open {}: {err}", path.display())))?;
            tracing::info!(path = %path.display(), "using sqlite order store");
            Dependencies::with_store(Arc::new(store), checkout, notifier, webhook, config.dispatch.clone())
        }
        None => {
            tracing::warn!("DATABASE_PATH not set; orders are kept in memory only");
            Dependencies::with_store(
                Arc::new(MemoryStore::new()),
                checkout,
                notifier,
                webhook,
                config.dispatch.clone(),
            )
        }
    };

    let (app_state, effects_rx) =
        AppState::new(deps, config.side_effect_queue_size, config.event_buffer_size);
    let shared_state = Arc::new(app_state);

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(run_side_effect_worker(shared_state.clone(), effects_rx));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(
        http_port = config.http_port,
        auto_assign = config.dispatch.auto_assign,
        "http server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
