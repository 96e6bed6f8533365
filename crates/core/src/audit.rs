//! Append-only audit log.
//!
//! One [`AuditRecord`] is written for every transition of every session. Appends are serialised
//! through a single async mutex: the sequence number is assigned and the record is written while
//! the lock is held, so concurrent sessions can never interleave partial records or reuse a
//! sequence number.
//!
//! With a path configured, records go only to a JSON Lines file and [`AuditLog::trail`] reads
//! them back from it. Without one, records are kept in memory.

use crate::error::{GuardianError, GuardianResult};
use crate::finding::Finding;
use crate::session::SessionStatus;
use crate::tools::ToolName;
use crate::{PatientId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// What happened at this step of the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AuditAction {
    SessionStarted,
    OrderReceived,
    ToolInvoked { tool: ToolName },
    /// A tool failed; the session continued without its evidence.
    ToolFailed { tool: ToolName, error: String },
    /// The reasoning service produced a directive that failed validation and was not executed.
    DirectiveRejected { reason: String },
    /// A valid directive that was not executed now, e.g. education before a decision.
    DirectiveDeferred { tool: ToolName, reason: String },
    /// The reasoning service failed after its retry; selection became deterministic.
    GatewayFallback { error: String },
    ClarificationRequested { question: String },
    DecisionRendered,
    EducationGenerated,
    EducationUnavailable { reason: String },
    SessionAbandoned,
}

impl AuditAction {
    pub fn label(&self) -> &'static str {
        match self {
            AuditAction::SessionStarted => "session_started",
            AuditAction::OrderReceived => "order_received",
            AuditAction::ToolInvoked { .. } => "tool_invoked",
            AuditAction::ToolFailed { .. } => "tool_failed",
            AuditAction::DirectiveRejected { .. } => "directive_rejected",
            AuditAction::DirectiveDeferred { .. } => "directive_deferred",
            AuditAction::GatewayFallback { .. } => "gateway_fallback",
            AuditAction::ClarificationRequested { .. } => "clarification_requested",
            AuditAction::DecisionRendered => "decision_rendered",
            AuditAction::EducationGenerated => "education_generated",
            AuditAction::EducationUnavailable { .. } => "education_unavailable",
            AuditAction::SessionAbandoned => "session_abandoned",
        }
    }
}

/// A persisted audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Position in the whole log, strictly increasing.
    pub sequence: u64,
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    pub patient_id: PatientId,
    pub input_text: Option<String>,
    pub action_taken: AuditAction,
    pub findings_snapshot: Vec<Finding>,
    pub resulting_status: SessionStatus,
}

/// An audit record before it has been sequenced and timestamped.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    session_id: SessionId,
    patient_id: PatientId,
    input_text: Option<String>,
    action: AuditAction,
    findings: Vec<Finding>,
    status: SessionStatus,
}

impl AuditEntry {
    pub fn new(
        session_id: SessionId,
        patient_id: PatientId,
        action: AuditAction,
        status: SessionStatus,
    ) -> Self {
        Self {
            session_id,
            patient_id,
            input_text: None,
            action,
            findings: Vec::new(),
            status,
        }
    }

    pub fn with_input(mut self, input: &str) -> Self {
        self.input_text = Some(input.to_string());
        self
    }

    pub fn with_findings(mut self, findings: Vec<Finding>) -> Self {
        self.findings = findings;
        self
    }
}

/// Where sequenced records go. A file-backed log keeps nothing in memory and answers queries
/// from the file.
enum Sink {
    Memory(Vec<AuditRecord>),
    File(tokio::fs::File),
}

struct Inner {
    next_sequence: u64,
    sink: Sink,
}

pub struct AuditLog {
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").field("path", &self.path).finish()
    }
}

impl AuditLog {
    /// An audit log that keeps records in memory only.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: Mutex::new(Inner {
                next_sequence: 1,
                sink: Sink::Memory(Vec::new()),
            }),
        }
    }

    /// Opens (or creates) a JSON Lines audit file for appending.
    ///
    /// Sequence numbering continues after the highest sequence already in the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created, or the file cannot be read
    /// or opened for appending.
    pub async fn open(path: impl Into<PathBuf>) -> GuardianResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(GuardianError::AuditDirCreation)?;
        }

        let last = match Self::read_file(&path).await {
            Ok(records) => records.iter().map(|r| r.sequence).max().unwrap_or(0),
            Err(GuardianError::AuditRead(e)) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(GuardianError::AuditWrite)?;

        Ok(Self {
            path: Some(path),
            inner: Mutex::new(Inner {
                next_sequence: last + 1,
                sink: Sink::File(file),
            }),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Sequences, timestamps and writes one record.
    pub async fn append(&self, entry: AuditEntry) -> GuardianResult<AuditRecord> {
        let mut inner = self.inner.lock().await;

        let record = AuditRecord {
            sequence: inner.next_sequence,
            session_id: entry.session_id,
            timestamp: Utc::now(),
            patient_id: entry.patient_id,
            input_text: entry.input_text,
            action_taken: entry.action,
            findings_snapshot: entry.findings,
            resulting_status: entry.status,
        };

        match &mut inner.sink {
            Sink::File(file) => {
                let mut line =
                    serde_json::to_vec(&record).map_err(GuardianError::AuditSerialization)?;
                line.push(b'\n');
                file.write_all(&line)
                    .await
                    .map_err(GuardianError::AuditWrite)?;
                file.flush().await.map_err(GuardianError::AuditWrite)?;
            }
            Sink::Memory(records) => records.push(record.clone()),
        }

        inner.next_sequence += 1;
        tracing::debug!(
            sequence = record.sequence,
            session_id = %record.session_id,
            action = record.action_taken.label(),
            status = %record.resulting_status,
            "audit record appended"
        );
        Ok(record)
    }

    /// Records for one session, in sequence order.
    ///
    /// # Errors
    ///
    /// Returns an error if a file-backed log cannot be read back.
    pub async fn trail(&self, session_id: SessionId) -> GuardianResult<Vec<AuditRecord>> {
        let mut records = self.records().await?;
        records.retain(|r| r.session_id == session_id);
        Ok(records)
    }

    /// Every record in the log. For a file-backed log this includes records written by earlier
    /// runs.
    ///
    /// # Errors
    ///
    /// Returns an error if a file-backed log cannot be read back.
    pub async fn records(&self) -> GuardianResult<Vec<AuditRecord>> {
        // Held while reading so no append is half-written underneath.
        let inner = self.inner.lock().await;
        match (&inner.sink, &self.path) {
            (Sink::Memory(records), _) => Ok(records.clone()),
            (Sink::File(_), Some(path)) => Self::read_file(path).await,
            (Sink::File(_), None) => Ok(Vec::new()),
        }
    }

    /// Reads every record from a JSON Lines audit file.
    pub async fn read_file(path: &Path) -> GuardianResult<Vec<AuditRecord>> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(GuardianError::AuditRead)?;
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(GuardianError::AuditSerialization))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn entry(session_id: SessionId, action: AuditAction) -> AuditEntry {
        AuditEntry::new(
            session_id,
            PatientId::new("P-90210").unwrap(),
            action,
            SessionStatus::Pending,
        )
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_sequence() {
        let log = AuditLog::in_memory();
        let session = SessionId::new();
        let a = log.append(entry(session, AuditAction::SessionStarted)).await.unwrap();
        let b = log
            .append(entry(session, AuditAction::OrderReceived).with_input("aspirin 81 mg"))
            .await
            .unwrap();
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
        assert_eq!(b.input_text.as_deref(), Some("aspirin 81 mg"));
    }

    #[tokio::test]
    async fn test_trail_filters_by_session() {
        let log = AuditLog::in_memory();
        let first = SessionId::new();
        let second = SessionId::new();
        log.append(entry(first, AuditAction::SessionStarted)).await.unwrap();
        log.append(entry(second, AuditAction::SessionStarted)).await.unwrap();
        log.append(entry(first, AuditAction::SessionAbandoned)).await.unwrap();

        let trail = log.trail(first).await.unwrap();
        assert_eq!(trail.len(), 2);
        assert!(trail.iter().all(|r| r.session_id == first));
        assert!(trail[0].sequence < trail[1].sequence);
    }

    #[tokio::test]
    async fn test_concurrent_appends_do_not_interleave() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("audit").join("log.jsonl");
        let log = Arc::new(AuditLog::open(&path).await.unwrap());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                let session = SessionId::new();
                for _ in 0..10 {
                    log.append(entry(session, AuditAction::OrderReceived))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let records = AuditLog::read_file(&path).await.expect("every line parses");
        assert_eq!(records.len(), 80);
        let mut sequences: Vec<u64> = records.iter().map(|r| r.sequence).collect();
        sequences.sort_unstable();
        sequences.dedup();
        assert_eq!(sequences.len(), 80);
    }

    #[tokio::test]
    async fn test_reopen_continues_sequence() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("log.jsonl");
        {
            let log = AuditLog::open(&path).await.unwrap();
            log.append(entry(SessionId::new(), AuditAction::SessionStarted))
                .await
                .unwrap();
            log.append(entry(SessionId::new(), AuditAction::SessionStarted))
                .await
                .unwrap();
        }
        let log = AuditLog::open(&path).await.unwrap();
        let record = log
            .append(entry(SessionId::new(), AuditAction::SessionStarted))
            .await
            .unwrap();
        assert_eq!(record.sequence, 3);
    }

    #[tokio::test]
    async fn test_file_backed_trail_is_served_from_disk() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("log.jsonl");
        let session = SessionId::new();
        {
            let log = AuditLog::open(&path).await.unwrap();
            log.append(entry(session, AuditAction::SessionStarted))
                .await
                .unwrap();
        }

        // A fresh handle sees the earlier run's records plus its own.
        let log = AuditLog::open(&path).await.unwrap();
        log.append(entry(session, AuditAction::SessionAbandoned))
            .await
            .unwrap();
        log.append(entry(SessionId::new(), AuditAction::SessionStarted))
            .await
            .unwrap();

        let trail = log.trail(session).await.unwrap();
        let actions: Vec<&str> = trail.iter().map(|r| r.action_taken.label()).collect();
        assert_eq!(actions, vec!["session_started", "session_abandoned"]);
        assert_eq!(log.records().await.unwrap().len(), 3);
    }

    #[test]
    fn test_action_serializes_with_tag() {
        let json = serde_json::to_value(AuditAction::ToolFailed {
            tool: ToolName::ScoreRisk,
            error: "boom".into(),
        })
        .unwrap();
        assert_eq!(json["action"], "tool_failed");
        assert_eq!(json["tool"], "score_risk");
    }
}
