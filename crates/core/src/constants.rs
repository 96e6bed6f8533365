//! Constants used throughout the guardian core crate.
//!
//! Defaults for runtime configuration live here so the binaries and the tests agree on them.

use std::time::Duration;

/// Default directory for patient records when no explicit directory is configured.
pub const DEFAULT_PATIENT_DATA_DIR: &str = "patients";

/// Default location of the append-only audit log.
pub const DEFAULT_AUDIT_LOG_PATH: &str = "audit/safety_interventions.jsonl";

/// File extension for patient record files (`<patient_id>.json`).
pub const PATIENT_FILE_EXTENSION: &str = "json";

/// Default upper bound on reasoning-gateway directives per evaluation.
pub const DEFAULT_MAX_TOOL_CALLS: usize = 8;

/// Default per-call timeout for the reasoning service.
pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay before the single retry of a failed reasoning-service call.
pub const DEFAULT_GATEWAY_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Default per-call timeout for patient record lookups.
pub const DEFAULT_RECORD_TIMEOUT: Duration = Duration::from_secs(5);

/// Default model requested from an OpenAI-compatible reasoning endpoint.
pub const DEFAULT_GATEWAY_MODEL: &str = "gpt-4o-mini";

/// Default reading level for patient education material.
pub const DEFAULT_READING_LEVEL: &str = "8th grade";

/// Text surfaced when patient education could not be produced.
pub const EDUCATION_UNAVAILABLE: &str = "education unavailable";
