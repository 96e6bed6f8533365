//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. The intent is to avoid reading process-wide environment variables
//! during request handling, which can lead to inconsistent behaviour in multi-threaded runtimes
//! and test harnesses.
//!
//! The binaries read environment variables and feed the raw values through the
//! `*_from_env_value` helpers below, so parsing and validation live in one place.

use crate::constants::{
    DEFAULT_GATEWAY_RETRY_BACKOFF, DEFAULT_GATEWAY_TIMEOUT, DEFAULT_MAX_TOOL_CALLS,
    DEFAULT_READING_LEVEL, DEFAULT_RECORD_TIMEOUT,
};
use crate::knowledge::KnowledgeBase;
use crate::tools::ToolName;
use crate::{GuardianError, GuardianResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where the reasoning service lives. `None` for the URL means offline.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GatewaySettings {
    pub url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    patient_data_dir: PathBuf,
    audit_log_path: Option<PathBuf>,
    max_tool_calls: usize,
    gateway_timeout: Duration,
    gateway_retry_backoff: Duration,
    record_timeout: Duration,
    require_full_coverage: bool,
    reading_level: String,
    knowledge: KnowledgeBase,
}

impl CoreConfig {
    /// Create a new `CoreConfig` with default limits and the built-in knowledge base.
    ///
    /// # Errors
    ///
    /// Returns `GuardianError::InvalidInput` if `patient_data_dir` is empty.
    pub fn new(
        patient_data_dir: PathBuf,
        audit_log_path: Option<PathBuf>,
    ) -> GuardianResult<Self> {
        if patient_data_dir.as_os_str().is_empty() {
            return Err(GuardianError::InvalidInput(
                "patient_data_dir cannot be empty".into(),
            ));
        }

        Ok(Self {
            patient_data_dir,
            audit_log_path,
            max_tool_calls: DEFAULT_MAX_TOOL_CALLS,
            gateway_timeout: DEFAULT_GATEWAY_TIMEOUT,
            gateway_retry_backoff: DEFAULT_GATEWAY_RETRY_BACKOFF,
            record_timeout: DEFAULT_RECORD_TIMEOUT,
            require_full_coverage: true,
            reading_level: DEFAULT_READING_LEVEL.to_string(),
            knowledge: KnowledgeBase::default(),
        })
    }

    /// Sets the per-evaluation bound on tool calls and reasoning-service directives.
    ///
    /// # Errors
    ///
    /// Returns `GuardianError::InvalidInput` if the bound is smaller than the tool catalog, which
    /// would make full coverage impossible.
    pub fn with_max_tool_calls(mut self, max_tool_calls: usize) -> GuardianResult<Self> {
        if max_tool_calls < ToolName::ALL.len() {
            return Err(GuardianError::InvalidInput(format!(
                "max_tool_calls must be at least {} (the number of catalog tools), got {}",
                ToolName::ALL.len(),
                max_tool_calls
            )));
        }
        self.max_tool_calls = max_tool_calls;
        Ok(self)
    }

    pub fn with_gateway_timeout(mut self, timeout: Duration) -> GuardianResult<Self> {
        if timeout.is_zero() {
            return Err(GuardianError::InvalidInput(
                "gateway timeout must be greater than zero".into(),
            ));
        }
        self.gateway_timeout = timeout;
        Ok(self)
    }

    pub fn with_gateway_retry_backoff(mut self, backoff: Duration) -> Self {
        self.gateway_retry_backoff = backoff;
        self
    }

    pub fn with_record_timeout(mut self, timeout: Duration) -> GuardianResult<Self> {
        if timeout.is_zero() {
            return Err(GuardianError::InvalidInput(
                "record timeout must be greater than zero".into(),
            ));
        }
        self.record_timeout = timeout;
        Ok(self)
    }

    /// When true (the default), every decision tool the reasoning service skipped is run before
    /// the decision rule is applied.
    pub fn with_require_full_coverage(mut self, required: bool) -> Self {
        self.require_full_coverage = required;
        self
    }

    pub fn with_reading_level(mut self, reading_level: impl Into<String>) -> GuardianResult<Self> {
        let reading_level = reading_level.into();
        if reading_level.trim().is_empty() {
            return Err(GuardianError::InvalidInput(
                "reading level cannot be empty".into(),
            ));
        }
        self.reading_level = reading_level.trim().to_string();
        Ok(self)
    }

    pub fn with_knowledge(mut self, knowledge: KnowledgeBase) -> GuardianResult<Self> {
        knowledge.validate()?;
        self.knowledge = knowledge;
        Ok(self)
    }

    pub fn patient_data_dir(&self) -> &Path {
        &self.patient_data_dir
    }

    pub fn audit_log_path(&self) -> Option<&Path> {
        self.audit_log_path.as_deref()
    }

    pub fn max_tool_calls(&self) -> usize {
        self.max_tool_calls
    }

    pub fn gateway_timeout(&self) -> Duration {
        self.gateway_timeout
    }

    pub fn gateway_retry_backoff(&self) -> Duration {
        self.gateway_retry_backoff
    }

    pub fn record_timeout(&self) -> Duration {
        self.record_timeout
    }

    pub fn require_full_coverage(&self) -> bool {
        self.require_full_coverage
    }

    pub fn reading_level(&self) -> &str {
        &self.reading_level
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse the tool-call bound from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns the default.
pub fn max_tool_calls_from_env_value(value: Option<String>) -> GuardianResult<usize> {
    match non_empty(value) {
        None => Ok(DEFAULT_MAX_TOOL_CALLS),
        Some(v) => v.parse::<usize>().map_err(|_| {
            GuardianError::InvalidInput(format!("GUARDIAN_MAX_TOOL_CALLS is not a number: {v}"))
        }),
    }
}

/// Parse a whole number of seconds from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns `default`.
pub fn duration_secs_from_env_value(
    name: &str,
    value: Option<String>,
    default: Duration,
) -> GuardianResult<Duration> {
    match non_empty(value) {
        None => Ok(default),
        Some(v) => v
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| GuardianError::InvalidInput(format!("{name} is not a number: {v}"))),
    }
}

/// Resolve the knowledge base: the YAML file at `path` if given, the built-in tables otherwise.
pub fn load_knowledge_base(path: Option<PathBuf>) -> GuardianResult<KnowledgeBase> {
    match path {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading knowledge base");
            KnowledgeBase::from_yaml_file(&path)
        }
        None => Ok(KnowledgeBase::default()),
    }
}

/// Collect reasoning-service settings from optional string values.
pub fn gateway_settings_from_env_values(
    url: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
) -> GatewaySettings {
    GatewaySettings {
        url: non_empty(url),
        model: non_empty(model),
        api_key: non_empty(api_key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CoreConfig {
        CoreConfig::new(PathBuf::from("patients"), None).expect("valid config")
    }

    #[test]
    fn test_defaults() {
        let cfg = config();
        assert_eq!(cfg.max_tool_calls(), DEFAULT_MAX_TOOL_CALLS);
        assert_eq!(cfg.gateway_timeout(), DEFAULT_GATEWAY_TIMEOUT);
        assert!(cfg.require_full_coverage());
        assert_eq!(cfg.reading_level(), "8th grade");
        assert!(cfg.audit_log_path().is_none());
    }

    #[test]
    fn test_empty_patient_dir_rejected() {
        assert!(CoreConfig::new(PathBuf::new(), None).is_err());
    }

    #[test]
    fn test_max_tool_calls_below_catalog_rejected() {
        assert!(config().with_max_tool_calls(3).is_err());
        assert_eq!(config().with_max_tool_calls(4).unwrap().max_tool_calls(), 4);
    }

    #[test]
    fn test_env_value_parsing() {
        assert_eq!(max_tool_calls_from_env_value(None).unwrap(), DEFAULT_MAX_TOOL_CALLS);
        assert_eq!(max_tool_calls_from_env_value(Some(" 12 ".into())).unwrap(), 12);
        assert!(max_tool_calls_from_env_value(Some("lots".into())).is_err());

        let d = duration_secs_from_env_value("X", Some("".into()), Duration::from_secs(7)).unwrap();
        assert_eq!(d, Duration::from_secs(7));
        let d = duration_secs_from_env_value("X", Some("3".into()), Duration::from_secs(7)).unwrap();
        assert_eq!(d, Duration::from_secs(3));
        assert!(duration_secs_from_env_value("X", Some("-1".into()), Duration::ZERO).is_err());
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        assert!(config().with_gateway_timeout(Duration::ZERO).is_err());
        assert!(config().with_record_timeout(Duration::ZERO).is_err());
    }

    #[test]
    fn test_gateway_settings_treat_blank_as_absent() {
        let s = gateway_settings_from_env_values(Some("  ".into()), None, Some("key".into()));
        assert_eq!(s.url, None);
        assert_eq!(s.api_key.as_deref(), Some("key"));
    }

    #[test]
    fn test_load_knowledge_base_from_yaml_file() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("kb.yaml");
        std::fs::write(
            &path,
            "formulary:\n  - { name: aspirin, class: antiplatelet, standard_dose_mg: 81 }\n",
        )
        .unwrap();
        let kb = load_knowledge_base(Some(path)).unwrap();
        assert_eq!(kb.formulary.len(), 1);
        assert_eq!(load_knowledge_base(None).unwrap(), KnowledgeBase::default());
    }
}
