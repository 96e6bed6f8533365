//! Session API.
//!
//! The [`SessionManager`] owns every live session. Each session sits behind its own
//! `tokio::sync::Mutex`, so one evaluation runs to completion (or to a clarification pause)
//! before the next input for that session is looked at, while different sessions proceed in
//! parallel. The only state shared between sessions is the read-only patient record accessor
//! and the append-only audit log.
//!
//! Only unresolved sessions are held in memory. Once a session is decided or abandoned it is
//! dropped from the map; its audit trail, whose last record carries the terminal status, is then
//! the only record of it.

use crate::audit::{AuditLog, AuditRecord};
use crate::config::{CoreConfig, GatewaySettings};
use crate::decision::SubmitOutcome;
use crate::error::{GuardianError, GuardianResult};
use crate::gateway::{
    HttpReasoningService, OfflineReasoningService, ReasoningGateway, ReasoningService,
};
use crate::orchestrator::SafetyOrchestrator;
use crate::patient::{FilePatientStore, PatientRecords, PatientSummary};
use crate::session::{SessionState, SessionStatus};
use crate::{PatientId, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

type SessionHandle = Arc<Mutex<SessionState>>;

pub struct SessionManager {
    cfg: Arc<CoreConfig>,
    records: Arc<dyn PatientRecords>,
    orchestrator: SafetyOrchestrator,
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(
        cfg: Arc<CoreConfig>,
        records: Arc<dyn PatientRecords>,
        gateway: ReasoningGateway,
        audit: Arc<AuditLog>,
    ) -> Self {
        let orchestrator = SafetyOrchestrator::new(cfg.clone(), gateway, audit);
        Self::with_orchestrator(cfg, records, orchestrator)
    }

    /// Wires the file-backed record store, the reasoning gateway and the audit log from `cfg`.
    ///
    /// With no gateway URL configured every session uses deterministic tool selection.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the audit log cannot be opened.
    pub async fn open(cfg: Arc<CoreConfig>, gateway: &GatewaySettings) -> GuardianResult<Self> {
        let records = Arc::new(FilePatientStore::new(cfg.patient_data_dir()));

        let service: Arc<dyn ReasoningService> = match &gateway.url {
            Some(url) => {
                let service = HttpReasoningService::new(
                    url,
                    gateway.model.clone(),
                    gateway.api_key.clone(),
                    cfg.gateway_timeout(),
                )?;
                tracing::info!(endpoint = service.endpoint(), "reasoning service configured");
                Arc::new(service)
            }
            None => {
                tracing::warn!("no reasoning service configured, tool selection is deterministic");
                Arc::new(OfflineReasoningService)
            }
        };
        let gateway =
            ReasoningGateway::new(service, cfg.gateway_timeout(), cfg.gateway_retry_backoff());

        let audit = match cfg.audit_log_path() {
            Some(path) => AuditLog::open(path).await?,
            None => AuditLog::in_memory(),
        };

        Ok(Self::new(cfg, records, gateway, Arc::new(audit)))
    }

    pub fn with_orchestrator(
        cfg: Arc<CoreConfig>,
        records: Arc<dyn PatientRecords>,
        orchestrator: SafetyOrchestrator,
    ) -> Self {
        Self {
            cfg,
            records,
            orchestrator,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        self.orchestrator.audit()
    }

    async fn live_session(&self, session_id: SessionId) -> Option<SessionHandle> {
        self.sessions.read().await.get(&session_id).cloned()
    }

    /// Terminal status of a session that has left the map, read from its last audit record.
    async fn resolved_status(&self, session_id: SessionId) -> GuardianResult<Option<SessionStatus>> {
        let trail = self.audit().trail(session_id).await?;
        Ok(trail
            .last()
            .map(|r| r.resulting_status)
            .filter(SessionStatus::is_terminal))
    }

    /// The live session, or `SessionClosed` / `SessionNotFound` when there is none.
    async fn session(&self, session_id: SessionId) -> GuardianResult<SessionHandle> {
        if let Some(handle) = self.live_session(session_id).await {
            return Ok(handle);
        }
        match self.resolved_status(session_id).await? {
            Some(status) => Err(GuardianError::SessionClosed { status }),
            None => Err(GuardianError::SessionNotFound(session_id.to_string())),
        }
    }

    async fn evict_if_resolved(&self, session_id: SessionId, status: SessionStatus) {
        if status.is_terminal() {
            self.sessions.write().await.remove(&session_id);
            tracing::debug!(%session_id, %status, "resolved session released");
        }
    }

    /// Number of sessions still awaiting a decision.
    pub async fn live_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Opens a session for `patient_id`.
    ///
    /// # Errors
    ///
    /// Returns `GuardianError::PatientNotFound` if no record exists (no session is created and
    /// nothing is audited), `GuardianError::RecordTimeout` if the lookup exceeds the configured
    /// record timeout, or the accessor's own error otherwise.
    pub async fn start_session(&self, patient_id: &str) -> GuardianResult<SessionId> {
        let patient_id = PatientId::new(patient_id)?;

        let profile = tokio::time::timeout(self.cfg.record_timeout(), self.records.lookup(&patient_id))
            .await
            .map_err(|_| GuardianError::RecordTimeout(self.cfg.record_timeout()))??;

        let session_id = SessionId::new();
        let state = SessionState::new(session_id, Arc::new(profile));
        self.orchestrator.start(&state).await?;

        self.sessions
            .write()
            .await
            .insert(session_id, Arc::new(Mutex::new(state)));
        tracing::info!(%session_id, %patient_id, "session started");
        Ok(session_id)
    }

    /// Evaluates clinician input for a session.
    ///
    /// # Errors
    ///
    /// Returns `GuardianError::SessionNotFound` for an unknown session and
    /// `GuardianError::SessionClosed` once the session has reached a terminal status.
    pub async fn submit_order(
        &self,
        session_id: SessionId,
        text: &str,
    ) -> GuardianResult<SubmitOutcome> {
        if text.trim().is_empty() {
            return Err(GuardianError::InvalidInput("order text cannot be empty".into()));
        }
        let handle = self.session(session_id).await?;
        let (outcome, status) = {
            let mut state = handle.lock().await;
            let outcome = self.orchestrator.evaluate(&mut state, text).await;
            (outcome, state.status())
        };
        self.evict_if_resolved(session_id, status).await;
        outcome
    }

    /// The session's audit records, in sequence order. Available for live and resolved sessions.
    pub async fn get_audit_trail(&self, session_id: SessionId) -> GuardianResult<Vec<AuditRecord>> {
        let trail = self.audit().trail(session_id).await?;
        if trail.is_empty() {
            return Err(GuardianError::SessionNotFound(session_id.to_string()));
        }
        Ok(trail)
    }

    /// Abandons a session that has not yet been decided.
    pub async fn abandon_session(&self, session_id: SessionId) -> GuardianResult<()> {
        let handle = self.session(session_id).await?;
        let (result, status) = {
            let mut state = handle.lock().await;
            let result = self.orchestrator.abandon(&mut state).await;
            (result, state.status())
        };
        self.evict_if_resolved(session_id, status).await;
        result?;
        tracing::info!(%session_id, "session abandoned");
        Ok(())
    }

    pub async fn session_status(&self, session_id: SessionId) -> GuardianResult<SessionStatus> {
        if let Some(handle) = self.live_session(session_id).await {
            return Ok(handle.lock().await.status());
        }
        self.resolved_status(session_id)
            .await?
            .ok_or_else(|| GuardianError::SessionNotFound(session_id.to_string()))
    }

    pub async fn list_patients(&self) -> GuardianResult<Vec<PatientSummary>> {
        self.records.list().await
    }
}
