//! HTTP API
//!
//! `/health` is open; every other route requires HMAC request authentication
//! (see [`auth`]).

pub mod auth;
pub mod handlers;
pub mod types;

use crate::config::Config;
use crate::keys::KeyManager;
use crate::wallet::Signer;
use crate::{Error, Result};
use auth::RequestAuthenticator;
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::sync::Arc;
use tracing::{error, info};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub signer: Signer,
    pub auth: Arc<RequestAuthenticator>,
}

impl AppState {
    pub fn new(keys: Arc<KeyManager>, auth: RequestAuthenticator) -> Self {
        Self {
            signer: Signer::new(keys),
            auth: Arc::new(auth),
        }
    }
}

/// Create and configure the Axum router
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/accounts", get(handlers::list_accounts))
        .route("/create-account", post(handlers::create_account))
        .route("/sign-transaction", post(handlers::sign_transaction))
        .route("/sign-message", post(handlers::sign_message))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_hmac,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .with_state(state)
}

/// Build the key manager from configuration and serve until shutdown
pub async fn serve(config: &Config) -> Result<()> {
    config.validate()?;

    let auth = RequestAuthenticator::from_config(&config.auth)?;
    let keys = Arc::new(KeyManager::from_config(&config.key_manager).await?);
    let app = create_router(AppState::new(keys, auth));

    let bind = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|e| Error::Config(format!("failed to bind {}: {}", bind, e)))?;
    info!(address = %bind, backend = config.key_manager.backend.name(), "Signing service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Signing service stopped");
    Ok(())
}

/// Wait for SIGTERM or SIGINT signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Starting graceful shutdown...");
}
