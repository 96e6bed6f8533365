use crate::gateway::GatewayError;
use crate::session::{SessionEvent, SessionStatus};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum GuardianError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("patient not found: {0}")]
    PatientNotFound(String),
    #[error("failed to read patient record: {0}")]
    RecordRead(std::io::Error),
    #[error("failed to parse patient record: {0}")]
    RecordParse(serde_json::Error),
    #[error("patient record lookup timed out after {0:?}")]
    RecordTimeout(Duration),

    #[error("failed to read knowledge base: {0}")]
    KnowledgeRead(std::io::Error),
    #[error("failed to parse knowledge base: {0}")]
    KnowledgeParse(serde_yaml::Error),

    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("session is closed with status {status}")]
    SessionClosed { status: SessionStatus },
    #[error("invalid session transition: {event:?} from {from}")]
    InvalidTransition {
        from: SessionStatus,
        event: SessionEvent,
    },
    #[error("evidence ledger is sealed")]
    LedgerSealed,

    #[error("failed to create audit directory: {0}")]
    AuditDirCreation(std::io::Error),
    #[error("failed to write audit record: {0}")]
    AuditWrite(std::io::Error),
    #[error("failed to read audit log: {0}")]
    AuditRead(std::io::Error),
    #[error("failed to serialize audit record: {0}")]
    AuditSerialization(serde_json::Error),

    #[error("reasoning gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("invalid text: {0}")]
    Text(#[from] guardian_types::TextError),
    #[error("invalid session id: {0}")]
    Uuid(#[from] guardian_uuid::UuidError),
}

pub type GuardianResult<T> = std::result::Result<T, GuardianError>;
