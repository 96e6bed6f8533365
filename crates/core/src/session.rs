//! Session state and its finite-state machine.
//!
//! ```text
//!                 ToolCall
//!               ┌─────────┐
//!               ▼         │
//!   ──────► Pending ──────┘
//!            │  ▲  │
//!    Clarify │  │  │ Decide(verdict)
//!            ▼  │  ▼
//! NeedsClarification   Blocked | Approved   (terminal)
//!       (Resume ─┘)
//!
//!   Pending | NeedsClarification ── Abandon ──► Abandoned (terminal)
//! ```
//!
//! Every status change goes through [`transition`]. Terminal states accept no events, so a
//! resolved session can never be reopened.

use crate::decision::{Decision, Verdict};
use crate::error::{GuardianError, GuardianResult};
use crate::ledger::EvidenceLedger;
use crate::order::MedicationOrder;
use crate::patient::PatientProfile;
use crate::tools::ToolName;
use crate::SessionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    NeedsClarification,
    Blocked,
    Approved,
    Abandoned,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Blocked | SessionStatus::Approved | SessionStatus::Abandoned
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::NeedsClarification => "needs_clarification",
            SessionStatus::Blocked => "blocked",
            SessionStatus::Approved => "approved",
            SessionStatus::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

impl From<Verdict> for SessionStatus {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Blocked => SessionStatus::Blocked,
            Verdict::Approved => SessionStatus::Approved,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    ToolCall,
    Clarify,
    Decide(Verdict),
    Resume,
    Abandon,
}

/// The only way a session status changes.
///
/// # Errors
///
/// Returns `GuardianError::InvalidTransition` for any (status, event) pair not drawn in the
/// module diagram.
pub fn transition(from: SessionStatus, event: SessionEvent) -> GuardianResult<SessionStatus> {
    use SessionEvent as E;
    use SessionStatus as S;

    match (from, event) {
        (S::Pending, E::ToolCall) => Ok(S::Pending),
        (S::Pending, E::Clarify) => Ok(S::NeedsClarification),
        (S::Pending, E::Decide(verdict)) => Ok(verdict.into()),
        (S::NeedsClarification, E::Resume) => Ok(S::Pending),
        (S::Pending | S::NeedsClarification, E::Abandon) => Ok(S::Abandoned),
        (from, event) => Err(GuardianError::InvalidTransition { from, event }),
    }
}

/// Everything the orchestrator tracks for one session.
///
/// Owned by the session manager behind a per-session mutex; only the orchestrator mutates it.
#[derive(Debug, Clone)]
pub struct SessionState {
    id: SessionId,
    patient: Arc<PatientProfile>,
    status: SessionStatus,
    /// Clinician inputs received so far.
    pub(crate) turns: usize,
    pub(crate) order: Option<MedicationOrder>,
    /// Raw text awaiting clarification, kept so a fragment reply can be combined with it.
    pub(crate) pending_text: Option<String>,
    pub(crate) ledger: EvidenceLedger,
    /// Tools executed for the current order.
    pub(crate) tool_calls: usize,
    /// Directives requested from the reasoning service for the current order.
    pub(crate) gateway_turns: usize,
    pub(crate) attempted: BTreeSet<ToolName>,
    pub(crate) failed: Vec<ToolName>,
    /// Set once the reasoning service has failed; the rest of the session is deterministic.
    pub(crate) fallback: bool,
    pub(crate) gateway_summary: Option<String>,
    pub(crate) decision: Option<Decision>,
}

impl SessionState {
    pub fn new(id: SessionId, patient: Arc<PatientProfile>) -> Self {
        Self {
            id,
            patient,
            status: SessionStatus::Pending,
            turns: 0,
            order: None,
            pending_text: None,
            ledger: EvidenceLedger::new(),
            tool_calls: 0,
            gateway_turns: 0,
            attempted: BTreeSet::new(),
            failed: Vec::new(),
            fallback: false,
            gateway_summary: None,
            decision: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn patient(&self) -> &PatientProfile {
        &self.patient
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn turns(&self) -> usize {
        self.turns
    }

    pub fn order(&self) -> Option<&MedicationOrder> {
        self.order.as_ref()
    }

    pub fn ledger(&self) -> &EvidenceLedger {
        &self.ledger
    }

    pub fn tool_calls(&self) -> usize {
        self.tool_calls
    }

    pub fn gateway_turns(&self) -> usize {
        self.gateway_turns
    }

    pub fn fallback(&self) -> bool {
        self.fallback
    }

    pub fn decision(&self) -> Option<&Decision> {
        self.decision.as_ref()
    }

    /// Applies `event` through [`transition`].
    pub(crate) fn apply(&mut self, event: SessionEvent) -> GuardianResult<SessionStatus> {
        let next = transition(self.status, event)?;
        if next != self.status {
            tracing::info!(session_id = %self.id, from = %self.status, to = %next, "session transition");
        }
        self.status = next;
        Ok(next)
    }

    /// Starts a fresh evaluation for a new order, discarding evidence about the previous one.
    pub(crate) fn begin_evaluation(&mut self, order: MedicationOrder) {
        self.order = Some(order);
        self.pending_text = None;
        self.ledger = EvidenceLedger::new();
        self.tool_calls = 0;
        self.gateway_turns = 0;
        self.attempted.clear();
        self.failed.clear();
        self.gateway_summary = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patient::fixtures;

    #[test]
    fn test_allowed_transitions() {
        use SessionEvent as E;
        use SessionStatus as S;
        assert_eq!(transition(S::Pending, E::ToolCall).unwrap(), S::Pending);
        assert_eq!(transition(S::Pending, E::Clarify).unwrap(), S::NeedsClarification);
        assert_eq!(
            transition(S::Pending, E::Decide(Verdict::Blocked)).unwrap(),
            S::Blocked
        );
        assert_eq!(
            transition(S::Pending, E::Decide(Verdict::Approved)).unwrap(),
            S::Approved
        );
        assert_eq!(transition(S::NeedsClarification, E::Resume).unwrap(), S::Pending);
        assert_eq!(transition(S::NeedsClarification, E::Abandon).unwrap(), S::Abandoned);
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        let events = [
            SessionEvent::ToolCall,
            SessionEvent::Clarify,
            SessionEvent::Decide(Verdict::Approved),
            SessionEvent::Resume,
            SessionEvent::Abandon,
        ];
        for status in [
            SessionStatus::Blocked,
            SessionStatus::Approved,
            SessionStatus::Abandoned,
        ] {
            assert!(status.is_terminal());
            for event in events {
                assert!(
                    matches!(
                        transition(status, event),
                        Err(GuardianError::InvalidTransition { .. })
                    ),
                    "{status} accepted {event:?}"
                );
            }
        }
    }

    #[test]
    fn test_clarification_cannot_decide_directly() {
        assert!(transition(
            SessionStatus::NeedsClarification,
            SessionEvent::Decide(Verdict::Approved)
        )
        .is_err());
    }

    #[test]
    fn test_apply_updates_status() {
        let mut state = SessionState::new(SessionId::new(), Arc::new(fixtures::baseline("P-1")));
        state.apply(SessionEvent::Clarify).unwrap();
        assert_eq!(state.status(), SessionStatus::NeedsClarification);
        assert!(state.apply(SessionEvent::ToolCall).is_err());
        assert_eq!(state.status(), SessionStatus::NeedsClarification);
    }
}
