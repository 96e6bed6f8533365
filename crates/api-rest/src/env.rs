//! Startup configuration from environment variables.
//!
//! Read once by the binaries before the server starts; handlers never touch the environment.

use guardian_core::constants::DEFAULT_GATEWAY_TIMEOUT;
use guardian_core::{
    duration_secs_from_env_value, gateway_settings_from_env_values, load_knowledge_base,
    max_tool_calls_from_env_value, CoreConfig, GatewaySettings, DEFAULT_AUDIT_LOG_PATH,
    DEFAULT_PATIENT_DATA_DIR,
};
use std::path::PathBuf;

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Resolves the core configuration and reasoning-service settings.
///
/// # Environment Variables
/// - `GUARDIAN_PATIENT_DATA_DIR`: patient record directory (default: "patients")
/// - `GUARDIAN_AUDIT_LOG`: audit JSON Lines file (default: "audit/safety_interventions.jsonl";
///   empty keeps the log in memory)
/// - `GUARDIAN_MAX_TOOL_CALLS`, `GUARDIAN_GATEWAY_TIMEOUT_SECS`, `GUARDIAN_KNOWLEDGE_FILE`
/// - `GUARDIAN_GATEWAY_URL`, `GUARDIAN_GATEWAY_MODEL`, `GUARDIAN_GATEWAY_API_KEY`
///
/// # Errors
/// Returns an error if the patient data directory does not exist, a numeric value does not
/// parse, or the knowledge base file cannot be loaded or fails validation.
pub fn core_config_from_env() -> anyhow::Result<(CoreConfig, GatewaySettings)> {
    let patient_data_dir = PathBuf::from(
        var("GUARDIAN_PATIENT_DATA_DIR").unwrap_or_else(|| DEFAULT_PATIENT_DATA_DIR.into()),
    );
    if !patient_data_dir.exists() {
        anyhow::bail!(
            "Patient data directory does not exist: {}",
            patient_data_dir.display()
        );
    }

    let audit_log_path = match var("GUARDIAN_AUDIT_LOG") {
        Some(path) if path.trim().is_empty() => None,
        Some(path) => Some(PathBuf::from(path)),
        None => Some(PathBuf::from(DEFAULT_AUDIT_LOG_PATH)),
    };

    let max_tool_calls = max_tool_calls_from_env_value(var("GUARDIAN_MAX_TOOL_CALLS"))?;
    let gateway_timeout = duration_secs_from_env_value(
        "GUARDIAN_GATEWAY_TIMEOUT_SECS",
        var("GUARDIAN_GATEWAY_TIMEOUT_SECS"),
        DEFAULT_GATEWAY_TIMEOUT,
    )?;
    let knowledge = load_knowledge_base(var("GUARDIAN_KNOWLEDGE_FILE").map(PathBuf::from))?;

    let cfg = CoreConfig::new(patient_data_dir, audit_log_path)?
        .with_max_tool_calls(max_tool_calls)?
        .with_gateway_timeout(gateway_timeout)?
        .with_knowledge(knowledge)?;

    let gateway = gateway_settings_from_env_values(
        var("GUARDIAN_GATEWAY_URL"),
        var("GUARDIAN_GATEWAY_MODEL"),
        var("GUARDIAN_GATEWAY_API_KEY"),
    );

    Ok((cfg, gateway))
}

/// The optional REST API key (`GUARDIAN_API_KEY`). Blank means no key is required.
pub fn api_key_from_env() -> Option<String> {
    var("GUARDIAN_API_KEY")
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
}
