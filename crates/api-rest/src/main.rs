//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the REST API server on its own.
//!
//! ## Intended use
//! Useful for development and debugging. The workspace's main `guardian-run` binary serves the
//! same router after loading `.env`.

use api_rest::{env, router, AppState};
use guardian_core::SessionManager;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the Guardian REST API server
///
/// # Environment Variables
/// - `GUARDIAN_REST_ADDR`: Server address (default: "0.0.0.0:3000")
/// - `GUARDIAN_API_KEY`: require this key in the `x-api-key` header (optional)
/// - the core variables read by [`env::core_config_from_env`]
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - the configuration is invalid or the audit log cannot be opened,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?)
                .add_directive("guardian_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("GUARDIAN_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let (cfg, gateway) = env::core_config_from_env()?;
    let manager = SessionManager::open(Arc::new(cfg), &gateway).await?;
    let app = router(AppState::new(Arc::new(manager), env::api_key_from_env()));

    tracing::info!("-- Starting Guardian REST API on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
