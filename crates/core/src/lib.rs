//! # Guardian Core
//!
//! Core business logic for the Patient Safety Guardian.
//!
//! This crate contains the safety orchestration loop and everything it drives:
//! - Read-only patient record access keyed by patient identifier
//! - Medication order normalisation from free-text clinician utterances
//! - The deterministic safety tool set (interaction detector, guideline auditor, risk scorer)
//!   and the post-decision education generator
//! - The evidence ledger, the decision rule and the session state machine
//! - The reasoning gateway, which only *advises* on which tool to run next
//! - An append-only audit log
//!
//! **No API concerns**: HTTP servers and request/response shapes belong in `api-rest` and
//! `api-shared`.

pub mod audit;
pub mod config;
pub mod constants;
pub mod decision;
pub mod error;
pub mod finding;
pub mod gateway;
pub mod knowledge;
pub mod ledger;
pub mod manager;
pub mod orchestrator;
pub mod order;
pub mod patient;
pub mod session;
pub mod tools;

pub use audit::{AuditAction, AuditEntry, AuditLog, AuditRecord};
pub use config::{
    duration_secs_from_env_value, gateway_settings_from_env_values, load_knowledge_base,
    max_tool_calls_from_env_value, CoreConfig, GatewaySettings,
};
pub use constants::{DEFAULT_AUDIT_LOG_PATH, DEFAULT_PATIENT_DATA_DIR};
pub use decision::{ClarificationRequest, Decision, SubmitOutcome, Verdict};
pub use error::{GuardianError, GuardianResult};
pub use finding::{Finding, FindingKind, Severity};
pub use gateway::{
    GatewayError, HttpReasoningService, OfflineReasoningService, ReasoningGateway,
    ReasoningService,
};
pub use knowledge::KnowledgeBase;
pub use ledger::EvidenceLedger;
pub use manager::SessionManager;
pub use orchestrator::SafetyOrchestrator;
pub use order::{MedicationOrder, NormalizedOrder};
pub use patient::{
    FilePatientStore, InMemoryPatientStore, PatientProfile, PatientRecords, PatientSummary,
};
pub use session::{SessionState, SessionStatus};
pub use tools::{SafetyTool, ToolError, ToolName, ToolSet};

// Re-export validated primitives so API crates need only depend on `guardian-core`.
pub use guardian_types::{NonEmptyText, PatientId, TextError};
pub use guardian_uuid::{SessionId, UuidError};
