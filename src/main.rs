use api_rest::{env, router, AppState};
use guardian_core::SessionManager;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the Patient Safety Guardian
///
/// Loads `.env`, resolves the core configuration once, opens the session manager and serves
/// the Session API over REST.
///
/// # Environment Variables
/// - `GUARDIAN_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `GUARDIAN_PATIENT_DATA_DIR`: Directory of `<patient_id>.json` records (default: "patients")
/// - `GUARDIAN_AUDIT_LOG`: Audit log file (default: "audit/safety_interventions.jsonl")
/// - `GUARDIAN_GATEWAY_URL`: OpenAI-compatible reasoning endpoint; unset runs offline
/// - `GUARDIAN_API_KEY`: API key required on every route except `/health` (optional)
///
/// # Returns
/// * `Ok(())` - If the server starts and runs successfully
/// * `Err(anyhow::Error)` - If configuration, startup or the server fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guardian_run=info".parse()?)
                .add_directive("guardian_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("GUARDIAN_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let (cfg, gateway) = env::core_config_from_env()?;
    tracing::info!(
        patient_data_dir = %cfg.patient_data_dir().display(),
        max_tool_calls = cfg.max_tool_calls(),
        "configuration resolved"
    );
    let manager = SessionManager::open(Arc::new(cfg), &gateway).await?;
    let app = router(AppState::new(Arc::new(manager), env::api_key_from_env()));

    tracing::info!("++ Starting Guardian REST on {}", rest_addr);
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
