//! Main Entrypoint for the RobAI Proxy Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Building the profile catalog, credential gate and upstream connector.
//! 3. Constructing the Axum router and applying middleware.
//! 4. Starting the web server and handling graceful shutdown, which also
//!    closes every live session.

use anyhow::Context;
use robai_api::{
    config::Config, credentials::EnvCredentialProvider, router::create_router, state::AppState,
    upstream::GeminiConnector,
};
use robai_core::{CredentialGate, ProfileCatalog, telemetry::TracingSink};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Listens for the `Ctrl+C` signal, then tells live sessions to close.
async fn shutdown_signal(shutdown: watch::Sender<bool>) {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
    shutdown.send_replace(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Shared Services ---
    let mut catalog = ProfileCatalog::builtin()
        .with_default_mode(&config.default_mode)
        .context("DEFAULT_MODE does not name a known profile")?;
    if let Some(dir) = &config.prompts_path {
        catalog = catalog
            .with_instruction_overrides(dir)
            .with_context(|| format!("Failed to load prompts from {}", dir.display()))?;
    }
    info!(
        modes = ?catalog.modes().collect::<Vec<_>>(),
        default_mode = %catalog.default_mode(),
        "Profile catalog ready."
    );

    let connector = GeminiConnector::new(&config.upstream_base_url, &config.upstream_api_version);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let app_state = Arc::new(AppState {
        catalog: Arc::new(catalog),
        credentials: CredentialGate::new(Arc::new(EnvCredentialProvider::new(
            &config.credential_var,
        ))),
        connector: Arc::new(connector.clone()),
        telemetry: Arc::new(TracingSink),
        shutdown: shutdown_rx,
        config: Arc::new(config.clone()),
    });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        upstream = %connector.endpoint(),
        credential_var = %config.credential_var,
        handshake_timeout = ?config.handshake_timeout,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown_tx))
    .await?;

    info!("Server has shut down.");
    Ok(())
}
