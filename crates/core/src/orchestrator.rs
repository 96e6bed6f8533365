//! Safety orchestrator.
//!
//! Drives one evaluation of a clinician's input:
//!
//! 1. Normalise the order. Ambiguity about drug or dose becomes a clarification request.
//! 2. Ask the reasoning gateway for directives and execute the tools it names, bounded by
//!    `max_tool_calls` directives per order.
//! 3. Run every decision tool the gateway skipped (always after a gateway failure, and by
//!    default otherwise).
//! 4. Seal the ledger and apply the decision rule. The gateway's own conclusion never enters
//!    the verdict.
//! 5. Generate patient education. Its failure never changes the decision.
//!
//! Every step writes an audit record before the next one starts.

use crate::audit::{AuditAction, AuditEntry, AuditLog, AuditRecord};
use crate::config::CoreConfig;
use crate::constants::EDUCATION_UNAVAILABLE;
use crate::decision::{decision_rule, ClarificationRequest, Decision, SubmitOutcome, Verdict};
use crate::error::{GuardianError, GuardianResult};
use crate::finding::Finding;
use crate::gateway::{GatewayError, GatewayRequest, ReasoningGateway, ValidatedDirective};
use crate::knowledge::DrugEntry;
use crate::order::MedicationOrder;
use crate::session::{SessionEvent, SessionState, SessionStatus};
use crate::tools::{EducationGenerator, ToolContext, ToolError, ToolName, ToolSet, ToolSpec};
use std::sync::Arc;

pub struct SafetyOrchestrator {
    cfg: Arc<CoreConfig>,
    tools: ToolSet,
    gateway: ReasoningGateway,
    audit: Arc<AuditLog>,
}

impl std::fmt::Debug for SafetyOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetyOrchestrator")
            .field("tools", &self.tools)
            .field("gateway", &self.gateway)
            .finish_non_exhaustive()
    }
}

impl SafetyOrchestrator {
    pub fn new(cfg: Arc<CoreConfig>, gateway: ReasoningGateway, audit: Arc<AuditLog>) -> Self {
        let tools = ToolSet::standard()
            .with_education(EducationGenerator::new(cfg.reading_level()));
        Self {
            cfg,
            tools,
            gateway,
            audit,
        }
    }

    /// Replaces the tool set, e.g. to inject a failing tool in tests.
    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    // ========================================================================
    // AUDIT HELPERS
    // ========================================================================

    async fn record(
        &self,
        state: &SessionState,
        action: AuditAction,
        input: Option<&str>,
        findings: Vec<Finding>,
    ) -> GuardianResult<AuditRecord> {
        let mut entry = AuditEntry::new(
            state.id(),
            state.patient().patient_id.clone(),
            action,
            state.status(),
        )
        .with_findings(findings);
        if let Some(input) = input {
            entry = entry.with_input(input);
        }
        self.audit.append(entry).await
    }

    /// Writes the `SessionStarted` record for a freshly created session.
    pub async fn start(&self, state: &SessionState) -> GuardianResult<()> {
        self.record(state, AuditAction::SessionStarted, None, Vec::new())
            .await?;
        Ok(())
    }

    // ========================================================================
    // EVALUATION
    // ========================================================================

    /// Evaluates one clinician input against the session.
    ///
    /// # Arguments
    ///
    /// * `state` - The session, exclusively borrowed for the whole evaluation.
    /// * `input` - Free-text order, or a reply to an earlier clarification request.
    ///
    /// # Returns
    ///
    /// A [`SubmitOutcome::Decision`] once the decision rule has run, or a
    /// [`SubmitOutcome::Clarification`] when the clinician must say more.
    ///
    /// # Errors
    ///
    /// Returns `GuardianError::SessionClosed` if the session is already terminal, or an audit
    /// error if a record cannot be written. Tool and gateway failures are not errors: they are
    /// recorded and the evaluation continues with reduced evidence.
    pub async fn evaluate(
        &self,
        state: &mut SessionState,
        input: &str,
    ) -> GuardianResult<SubmitOutcome> {
        if state.status().is_terminal() {
            return Err(GuardianError::SessionClosed {
                status: state.status(),
            });
        }

        let input = input.trim();
        if state.status() == SessionStatus::NeedsClarification {
            state.apply(SessionEvent::Resume)?;
        }
        state.turns += 1;
        self.record(state, AuditAction::OrderReceived, Some(input), Vec::new())
            .await?;

        let kb = self.cfg.knowledge();
        let previous = state.pending_text.take();
        let parsed = match &previous {
            Some(prev) => MedicationOrder::parse_follow_up(prev, input, kb),
            None => MedicationOrder::parse(input, kb),
        };
        let order = match parsed {
            Ok(order) => order,
            Err(request) => {
                let pending = match previous {
                    Some(prev) => format!("{} {}", prev, input),
                    None => input.to_string(),
                };
                return self.clarify(state, input, request, pending).await;
            }
        };

        let same_order = state
            .order()
            .map(|o| o.normalized() == order.normalized())
            .unwrap_or(false);
        if same_order {
            state.order = Some(order);
        } else {
            state.begin_evaluation(order);
        }

        if let Some(outcome) = self.directive_loop(state, input).await? {
            return Ok(outcome);
        }
        self.ensure_coverage(state, input).await?;
        self.decide(state, input).await
    }

    /// Follows gateway directives until it concludes, fails or hits the bound.
    ///
    /// Returns `Some` if the loop ended in a clarification request.
    async fn directive_loop(
        &self,
        state: &mut SessionState,
        input: &str,
    ) -> GuardianResult<Option<SubmitOutcome>> {
        let max = self.cfg.max_tool_calls();
        let catalog = self.tools.catalog();

        while !state.fallback {
            if state.gateway_turns >= max {
                tracing::info!(
                    session_id = %state.id(),
                    max,
                    "directive bound reached, forcing decision"
                );
                break;
            }
            state.gateway_turns += 1;

            let request = self.gateway_request(state, input, &catalog)?;
            let directive = match self.gateway.next_directive(&request).await {
                Ok(directive) => directive,
                Err(GatewayError::MalformedDirective(reason)) => {
                    return self.reject_directive(state, input, reason).await.map(Some);
                }
                Err(e) => {
                    tracing::warn!(session_id = %state.id(), error = %e, "reasoning gateway failed, switching to deterministic fallback");
                    state.fallback = true;
                    self.record(
                        state,
                        AuditAction::GatewayFallback {
                            error: e.to_string(),
                        },
                        Some(input),
                        state.ledger().snapshot(),
                    )
                    .await?;
                    break;
                }
            };
            tracing::debug!(session_id = %state.id(), ?directive, "directive received");

            let validated = {
                let order = current_order(state)?;
                ReasoningGateway::validate(directive, &catalog, order.normalized(), self.cfg.knowledge())
            };

            match validated {
                Err(e) => {
                    return self
                        .reject_directive(state, input, e.to_string())
                        .await
                        .map(Some);
                }
                Ok(ValidatedDirective::Invoke(tool)) if !tool.is_decision_tool() => {
                    self.defer(state, input, tool, "education is generated after the decision")
                        .await?;
                }
                Ok(ValidatedDirective::Invoke(tool)) if state.attempted.contains(&tool) => {
                    self.defer(state, input, tool, "already run for this order")
                        .await?;
                }
                Ok(ValidatedDirective::Invoke(tool)) => {
                    self.run_tool(state, tool, input).await?;
                }
                Ok(ValidatedDirective::Clarify(question)) => {
                    let pending = current_order(state)?.raw().to_string();
                    let request = ClarificationRequest::new(question, Vec::new());
                    return self.clarify(state, input, request, pending).await.map(Some);
                }
                Ok(ValidatedDirective::Conclude(summary)) => {
                    state.gateway_summary = Some(summary);
                    break;
                }
            }
        }

        Ok(None)
    }

    fn gateway_request(
        &self,
        state: &SessionState,
        input: &str,
        catalog: &[ToolSpec],
    ) -> GuardianResult<GatewayRequest> {
        let patient = state.patient();
        Ok(GatewayRequest {
            session_id: state.id(),
            input_text: input.to_string(),
            order: current_order(state)?.normalized().clone(),
            active_medications: patient
                .active_medications
                .iter()
                .map(|m| m.name.clone())
                .collect(),
            allergies: patient.allergies.iter().map(|a| a.allergen.clone()).collect(),
            conditions: patient.conditions.clone(),
            evidence: state.ledger().snapshot(),
            attempted: state.attempted.iter().copied().collect(),
            catalog: catalog.to_vec(),
            turn: state.gateway_turns,
        })
    }

    /// Runs the decision tools nobody asked for, so the verdict never rests on partial coverage.
    async fn ensure_coverage(&self, state: &mut SessionState, input: &str) -> GuardianResult<()> {
        if !(state.fallback || self.cfg.require_full_coverage()) {
            return Ok(());
        }
        for tool in ToolName::DECISION_TOOLS {
            if state.attempted.contains(&tool) {
                continue;
            }
            if state.tool_calls >= self.cfg.max_tool_calls() {
                tracing::warn!(session_id = %state.id(), %tool, "tool-call bound reached before full coverage");
                break;
            }
            self.run_tool(state, tool, input).await?;
        }
        Ok(())
    }

    async fn run_tool(
        &self,
        state: &mut SessionState,
        tool: ToolName,
        input: &str,
    ) -> GuardianResult<()> {
        state.apply(SessionEvent::ToolCall)?;
        state.tool_calls += 1;
        state.attempted.insert(tool);

        let result = match self.tools.get(tool) {
            Some(evaluator) => {
                let order = current_order(state)?;
                evaluator.evaluate(&ToolContext {
                    order: order.normalized(),
                    patient: state.patient(),
                    knowledge: self.cfg.knowledge(),
                })
            }
            None => Err(ToolError::Internal(format!(
                "{tool} is not registered"
            ))),
        };

        match result {
            Ok(findings) => {
                tracing::info!(session_id = %state.id(), %tool, findings = findings.len(), "tool invoked");
                state.ledger.append(tool, findings.clone())?;
                self.record(state, AuditAction::ToolInvoked { tool }, Some(input), findings)
                    .await?;
            }
            Err(e) => {
                tracing::warn!(session_id = %state.id(), %tool, error = %e, "tool failed, continuing with reduced evidence");
                state.failed.push(tool);
                self.record(
                    state,
                    AuditAction::ToolFailed {
                        tool,
                        error: e.to_string(),
                    },
                    Some(input),
                    Vec::new(),
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn defer(
        &self,
        state: &SessionState,
        input: &str,
        tool: ToolName,
        reason: &str,
    ) -> GuardianResult<()> {
        tracing::debug!(session_id = %state.id(), %tool, reason, "directive deferred");
        self.record(
            state,
            AuditAction::DirectiveDeferred {
                tool,
                reason: reason.to_string(),
            },
            Some(input),
            Vec::new(),
        )
        .await?;
        Ok(())
    }

    async fn reject_directive(
        &self,
        state: &mut SessionState,
        input: &str,
        reason: String,
    ) -> GuardianResult<SubmitOutcome> {
        tracing::warn!(session_id = %state.id(), %reason, "rejected malformed directive");
        self.record(
            state,
            AuditAction::DirectiveRejected {
                reason: reason.clone(),
            },
            Some(input),
            Vec::new(),
        )
        .await?;

        let pending = current_order(state)?.raw().to_string();
        let request = ClarificationRequest::new(
            format!(
                "The safety review could not continue as directed ({reason}). Please confirm or \
                 restate the order."
            ),
            Vec::new(),
        );
        self.clarify(state, input, request, pending).await
    }

    async fn clarify(
        &self,
        state: &mut SessionState,
        input: &str,
        request: ClarificationRequest,
        pending: String,
    ) -> GuardianResult<SubmitOutcome> {
        state.pending_text = Some(pending);
        state.apply(SessionEvent::Clarify)?;
        self.record(
            state,
            AuditAction::ClarificationRequested {
                question: request.question.clone(),
            },
            Some(input),
            state.ledger().snapshot(),
        )
        .await?;
        Ok(SubmitOutcome::Clarification(request))
    }

    // ========================================================================
    // DECISION AND EDUCATION
    // ========================================================================

    async fn decide(&self, state: &mut SessionState, input: &str) -> GuardianResult<SubmitOutcome> {
        state.ledger.seal();
        let outcome = decision_rule(state.ledger());
        let verdict = outcome.verdict;

        let mut decision =
            Decision::render(state.id(), outcome, state.ledger(), state.failed.clone());
        decision.gateway_summary = state.gateway_summary.clone();
        decision.fallback_used = state.fallback;

        state.apply(SessionEvent::Decide(verdict))?;
        tracing::info!(
            session_id = %state.id(),
            %verdict,
            findings = state.ledger().len(),
            fallback = state.fallback,
            "decision rendered"
        );
        self.record(
            state,
            AuditAction::DecisionRendered,
            Some(input),
            state.ledger().snapshot(),
        )
        .await?;

        let education = self.educate(state, &decision, input).await?;
        decision.education = Some(education);
        decision.tool_calls = state.tool_calls;
        state.decision = Some(decision.clone());
        Ok(SubmitOutcome::Decision(decision))
    }

    /// The drug the patient will actually be taking, if any.
    fn education_topic(&self, state: &SessionState, decision: &Decision) -> Option<(DrugEntry, Option<String>)> {
        let kb = self.cfg.knowledge();
        match decision.status {
            Verdict::Approved => {
                let order = state.order()?.normalized();
                let entry = kb.drug(&order.drug)?.clone();
                Some((entry, Some(format!("{} {}", order.dose, order.frequency))))
            }
            Verdict::Blocked => {
                let alternative = decision.alternative.as_deref()?.to_lowercase();
                kb.formulary
                    .iter()
                    .find(|d| alternative.starts_with(&d.name))
                    .map(|d| (d.clone(), None))
            }
        }
    }

    /// Produces education text after the decision. Never alters the decision itself.
    async fn educate(
        &self,
        state: &mut SessionState,
        decision: &Decision,
        input: &str,
    ) -> GuardianResult<String> {
        let generator = self.tools.education();

        let unavailable = if state.tool_calls >= self.cfg.max_tool_calls() {
            Some("tool-call bound reached".to_string())
        } else {
            None
        };
        let topic = self.education_topic(state, decision);

        let (drug, text, reason) = match (unavailable, topic) {
            (Some(reason), _) => (decision_drug(state), None, Some(reason)),
            (None, None) => (
                decision_drug(state),
                None,
                Some("no formulary drug to educate about for a blocked order".to_string()),
            ),
            (None, Some((entry, dosing))) if state.fallback => {
                match generator.counselling_text(&entry, dosing.as_deref()) {
                    Some(text) => {
                        state.tool_calls += 1;
                        (entry.name, Some(text), None)
                    }
                    None => (
                        entry.name,
                        None,
                        Some("reasoning service unavailable and no counselling points".to_string()),
                    ),
                }
            }
            (None, Some((entry, dosing))) => {
                state.tool_calls += 1;
                let prompt = generator.prompt(&entry, dosing.as_deref(), state.patient());
                match self.gateway.compose(&prompt).await {
                    Ok(text) => (entry.name, Some(text), None),
                    Err(e) => {
                        tracing::warn!(session_id = %state.id(), error = %e, "education unavailable");
                        (entry.name, None, Some(e.to_string()))
                    }
                }
            }
        };

        let finding = generator.finding(&drug, text.clone());
        let action = match reason {
            None => AuditAction::EducationGenerated,
            Some(reason) => AuditAction::EducationUnavailable { reason },
        };
        self.record(state, action, Some(input), vec![finding])
            .await?;

        Ok(text.unwrap_or_else(|| EDUCATION_UNAVAILABLE.to_string()))
    }

    // ========================================================================
    // ABANDONMENT
    // ========================================================================

    /// Abandons a session at a Pending or NeedsClarification boundary, flushing the partial
    /// ledger to the audit log.
    pub async fn abandon(&self, state: &mut SessionState) -> GuardianResult<()> {
        if state.status().is_terminal() {
            return Err(GuardianError::SessionClosed {
                status: state.status(),
            });
        }
        state.apply(SessionEvent::Abandon)?;
        state.ledger.seal();
        self.record(
            state,
            AuditAction::SessionAbandoned,
            state.pending_text.as_deref(),
            state.ledger().snapshot(),
        )
        .await?;
        Ok(())
    }
}

fn current_order(state: &SessionState) -> GuardianResult<&MedicationOrder> {
    state
        .order()
        .ok_or_else(|| GuardianError::InvalidInput("no normalised order in session".into()))
}

fn decision_drug(state: &SessionState) -> String {
    state
        .order()
        .map(|o| o.normalized().drug.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Severity;
    use crate::gateway::testing::{DownService, HangingService, ScriptedService};
    use crate::gateway::{Directive, ReasoningService};
    use crate::knowledge::KnowledgeBase;
    use crate::patient::{fixtures, PatientProfile};
    use crate::tools::SafetyTool;
    use crate::SessionId;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn cfg() -> Arc<CoreConfig> {
        Arc::new(
            CoreConfig::new("patients".into(), None)
                .unwrap()
                .with_gateway_retry_backoff(Duration::from_millis(1))
                .with_gateway_timeout(Duration::from_millis(200))
                .unwrap(),
        )
    }

    fn orchestrator(cfg: Arc<CoreConfig>, service: Arc<dyn ReasoningService>) -> SafetyOrchestrator {
        let gateway =
            ReasoningGateway::new(service, cfg.gateway_timeout(), cfg.gateway_retry_backoff());
        SafetyOrchestrator::new(cfg, gateway, Arc::new(AuditLog::in_memory()))
    }

    fn session(patient: PatientProfile) -> SessionState {
        SessionState::new(SessionId::new(), Arc::new(patient))
    }

    fn expect_decision(outcome: SubmitOutcome) -> Decision {
        match outcome {
            SubmitOutcome::Decision(d) => d,
            other => panic!("expected decision, got {other:?}"),
        }
    }

    fn expect_clarification(outcome: SubmitOutcome) -> ClarificationRequest {
        match outcome {
            SubmitOutcome::Clarification(c) => c,
            other => panic!("expected clarification, got {other:?}"),
        }
    }

    async fn actions(orch: &SafetyOrchestrator, id: SessionId) -> Vec<&'static str> {
        orch.audit()
            .trail(id)
            .await
            .unwrap()
            .iter()
            .map(|r| r.action_taken.label())
            .collect()
    }

    #[tokio::test]
    async fn test_warfarin_patient_aspirin_order_is_blocked() {
        let service = Arc::new(ScriptedService::new(vec![
            ScriptedService::invoke(ToolName::CheckDrugInteractions, "aspirin"),
            ScriptedService::conclude("Looks fine to me."),
        ]));
        let orch = orchestrator(cfg(), service);
        let mut state = session(fixtures::on_warfarin());

        let decision = expect_decision(orch.evaluate(&mut state, "aspirin 81 mg daily").await.unwrap());

        assert_eq!(decision.status, Verdict::Blocked);
        assert!(!decision.findings.is_empty());
        assert!(decision
            .findings
            .iter()
            .all(|f| f.severity() == Severity::Critical));
        // The gateway's own narrative is carried but does not override the block.
        assert_eq!(decision.gateway_summary.as_deref(), Some("Looks fine to me."));
        assert!(decision.alternative.is_some());
        assert_eq!(state.status(), SessionStatus::Blocked);
    }

    #[tokio::test]
    async fn test_renal_patient_renally_cleared_drug_is_approved_with_caution() {
        let orch = orchestrator(cfg(), Arc::new(ScriptedService::new(Vec::new())));
        let mut state = session(fixtures::renal_impaired());

        let decision =
            expect_decision(orch.evaluate(&mut state, "metformin 500 mg bid").await.unwrap());

        assert_eq!(decision.status, Verdict::Approved);
        assert!(decision.findings.is_empty());
        assert!(decision
            .cautions
            .iter()
            .any(|f| matches!(f, Finding::Risk(r) if r.severity == Severity::Moderate)));
        assert_eq!(
            decision.education.as_deref(),
            Some("Take this medicine exactly as prescribed.")
        );
    }

    #[tokio::test]
    async fn test_gateway_down_runs_all_four_tools() {
        let down = Arc::new(DownService::default());
        let orch = orchestrator(cfg(), down.clone());
        let mut state = session(fixtures::on_warfarin());

        let decision = expect_decision(orch.evaluate(&mut state, "aspirin 81 mg daily").await.unwrap());

        assert!(decision.fallback_used);
        assert_eq!(decision.status, Verdict::Blocked);
        // Education for the suggested alternative comes from the formulary counselling points.
        let education = decision.education.as_deref().expect("education text");
        assert!(education.starts_with("About your medicine, acetaminophen"));
        assert!(education.contains("4 grams"));
        assert_eq!(decision.tool_calls, 4);
        // One directive attempt plus its retry; education never calls a failed gateway again.
        assert_eq!(down.calls.load(Ordering::SeqCst), 2);

        let trail = orch.audit().trail(state.id()).await.unwrap();
        let invoked: Vec<ToolName> = trail
            .iter()
            .filter_map(|r| match r.action_taken {
                AuditAction::ToolInvoked { tool } => Some(tool),
                _ => None,
            })
            .collect();
        assert_eq!(invoked, ToolName::DECISION_TOOLS.to_vec());
        assert!(trail
            .iter()
            .any(|r| matches!(r.action_taken, AuditAction::GatewayFallback { .. })));
        assert!(trail
            .iter()
            .any(|r| matches!(r.action_taken, AuditAction::EducationGenerated)));
    }

    #[tokio::test]
    async fn test_gateway_down_without_counselling_points_does_not_count_education() {
        let mut kb = KnowledgeBase::default();
        for entry in &mut kb.formulary {
            entry.counselling.clear();
        }
        let cfg = Arc::new(
            CoreConfig::new("patients".into(), None)
                .unwrap()
                .with_gateway_retry_backoff(Duration::from_millis(1))
                .with_knowledge(kb)
                .unwrap(),
        );
        let orch = orchestrator(cfg, Arc::new(DownService::default()));
        let mut state = session(fixtures::baseline("P-1"));

        let decision =
            expect_decision(orch.evaluate(&mut state, "acetaminophen 500 mg").await.unwrap());

        assert!(decision.fallback_used);
        assert_eq!(decision.status, Verdict::Approved);
        assert_eq!(decision.education.as_deref(), Some(EDUCATION_UNAVAILABLE));
        assert_eq!(decision.tool_calls, 3);
        assert!(actions(&orch, state.id()).await.contains(&"education_unavailable"));
    }

    #[tokio::test]
    async fn test_gateway_timeout_falls_back() {
        let orch = orchestrator(cfg(), Arc::new(HangingService));
        let mut state = session(fixtures::renal_impaired());
        let decision =
            expect_decision(orch.evaluate(&mut state, "metformin 500 mg bid").await.unwrap());
        assert!(decision.fallback_used);
        assert_eq!(decision.status, Verdict::Approved);
    }

    #[tokio::test]
    async fn test_tool_calls_never_exceed_bound() {
        // A gateway that asks for the same tool forever.
        let script = (0..50)
            .map(|_| ScriptedService::invoke(ToolName::ScoreRisk, "aspirin"))
            .collect();
        let service = Arc::new(ScriptedService::new(script));
        let cfg = Arc::new(
            CoreConfig::new("patients".into(), None)
                .unwrap()
                .with_max_tool_calls(5)
                .unwrap(),
        );
        let orch = orchestrator(cfg, service.clone());
        let mut state = session(fixtures::baseline("P-1"));

        let decision = expect_decision(orch.evaluate(&mut state, "aspirin 81 mg").await.unwrap());

        assert!(decision.tool_calls <= 5);
        assert_eq!(service.directive_calls.load(Ordering::SeqCst), 5);
        assert_eq!(state.gateway_turns(), 5);
        let labels = actions(&orch, state.id()).await;
        assert_eq!(labels.iter().filter(|l| **l == "directive_deferred").count(), 4);
    }

    #[tokio::test]
    async fn test_critical_finding_blocks_even_without_gateway_selection() {
        // Gateway concludes immediately; coverage still finds the interaction.
        let service = Arc::new(ScriptedService::new(vec![ScriptedService::conclude(
            "Nothing to check.",
        )]));
        let orch = orchestrator(cfg(), service);
        let mut state = session(fixtures::on_warfarin());
        let decision = expect_decision(orch.evaluate(&mut state, "ibuprofen 400 mg").await.unwrap());
        assert_eq!(decision.status, Verdict::Blocked);
    }

    #[tokio::test]
    async fn test_ambiguous_dose_requests_clarification_then_resumes() {
        let orch = orchestrator(cfg(), Arc::new(ScriptedService::new(Vec::new())));
        let mut state = session(fixtures::baseline("P-1"));

        let clarification =
            expect_clarification(orch.evaluate(&mut state, "acetaminophen prn").await.unwrap());
        assert_eq!(clarification.missing, vec!["dose".to_string()]);
        assert_eq!(state.status(), SessionStatus::NeedsClarification);
        assert!(state.ledger().is_empty());

        let decision = expect_decision(orch.evaluate(&mut state, "500 mg").await.unwrap());
        assert_eq!(decision.status, Verdict::Approved);
        assert_eq!(state.order().unwrap().normalized().dose.amount, 500.0);
        assert_eq!(state.turns(), 2);
    }

    #[tokio::test]
    async fn test_unknown_tool_directive_is_rejected_not_executed() {
        let service = Arc::new(ScriptedService::new(vec![Ok(Directive::Invoke {
            tool: "approve_order".into(),
            arguments: serde_json::json!({"drug": "aspirin"}),
        })]));
        let orch = orchestrator(cfg(), service);
        let mut state = session(fixtures::baseline("P-1"));

        let clarification =
            expect_clarification(orch.evaluate(&mut state, "aspirin 81 mg").await.unwrap());
        assert!(clarification.question.contains("approve_order"));
        assert_eq!(state.tool_calls(), 0);
        let labels = actions(&orch, state.id()).await;
        assert!(labels.contains(&"directive_rejected"));
        assert!(!labels.contains(&"tool_invoked"));
    }

    #[tokio::test]
    async fn test_gateway_clarification_then_same_order_keeps_evidence() {
        let service = Arc::new(ScriptedService::new(vec![
            ScriptedService::invoke(ToolName::AuditGuidelines, "aspirin"),
            Ok(Directive::Clarify {
                question: "Is this for secondary prevention?".into(),
            }),
        ]));
        let orch = orchestrator(cfg(), service);
        let mut state = session(fixtures::baseline("P-1"));

        let clarification =
            expect_clarification(orch.evaluate(&mut state, "aspirin 81 mg daily").await.unwrap());
        assert!(clarification.question.contains("secondary prevention"));
        assert_eq!(state.tool_calls(), 1);

        let decision = expect_decision(orch.evaluate(&mut state, "yes").await.unwrap());
        assert_eq!(decision.status, Verdict::Approved);
        // audit_guidelines was not run twice.
        assert_eq!(decision.tool_calls, 4);
    }

    struct BrokenScorer;

    impl SafetyTool for BrokenScorer {
        fn name(&self) -> ToolName {
            ToolName::ScoreRisk
        }

        fn evaluate(&self, _ctx: &ToolContext<'_>) -> Result<Vec<Finding>, ToolError> {
            Err(ToolError::Internal("lab service offline".into()))
        }
    }

    #[tokio::test]
    async fn test_tool_failure_is_recorded_and_evaluation_continues() {
        let orch = orchestrator(cfg(), Arc::new(ScriptedService::new(Vec::new())))
            .with_tools(ToolSet::standard().with_tool(Box::new(BrokenScorer)));
        let mut state = session(fixtures::on_warfarin());

        let decision = expect_decision(orch.evaluate(&mut state, "aspirin 81 mg").await.unwrap());
        assert_eq!(decision.status, Verdict::Blocked);
        assert_eq!(decision.omitted_tools, vec![ToolName::ScoreRisk]);
        assert!(actions(&orch, state.id()).await.contains(&"tool_failed"));
    }

    #[tokio::test]
    async fn test_education_failure_does_not_change_decision() {
        let service = Arc::new(
            ScriptedService::new(Vec::new())
                .with_compose(Err(GatewayError::Unavailable("quota exceeded".into()))),
        );
        let orch = orchestrator(cfg(), service);
        let mut state = session(fixtures::baseline("P-1"));

        let decision =
            expect_decision(orch.evaluate(&mut state, "acetaminophen 500 mg").await.unwrap());
        assert_eq!(decision.status, Verdict::Approved);
        assert_eq!(decision.education.as_deref(), Some(EDUCATION_UNAVAILABLE));
        assert_eq!(state.status(), SessionStatus::Approved);
    }

    #[tokio::test]
    async fn test_terminal_session_rejects_new_input() {
        let orch = orchestrator(cfg(), Arc::new(ScriptedService::new(Vec::new())));
        let mut state = session(fixtures::baseline("P-1"));
        orch.evaluate(&mut state, "acetaminophen 500 mg").await.unwrap();

        let err = orch
            .evaluate(&mut state, "acetaminophen 650 mg")
            .await
            .expect_err("terminal session must not reopen");
        assert!(matches!(
            err,
            GuardianError::SessionClosed {
                status: SessionStatus::Approved
            }
        ));
    }

    #[tokio::test]
    async fn test_abandon_flushes_partial_ledger() {
        let service = Arc::new(ScriptedService::new(vec![
            ScriptedService::invoke(ToolName::CheckDrugInteractions, "aspirin"),
            Ok(Directive::Clarify {
                question: "Confirm the indication?".into(),
            }),
        ]));
        let orch = orchestrator(cfg(), service);
        let mut state = session(fixtures::on_warfarin());
        expect_clarification(orch.evaluate(&mut state, "aspirin 81 mg").await.unwrap());

        orch.abandon(&mut state).await.unwrap();
        assert_eq!(state.status(), SessionStatus::Abandoned);

        let trail = orch.audit().trail(state.id()).await.unwrap();
        let last = trail.last().expect("abandon record");
        assert_eq!(last.action_taken, AuditAction::SessionAbandoned);
        assert!(!last.findings_snapshot.is_empty());
        assert!(orch.abandon(&mut state).await.is_err());
    }

    #[tokio::test]
    async fn test_every_record_carries_resulting_status() {
        let orch = orchestrator(cfg(), Arc::new(ScriptedService::new(Vec::new())));
        let mut state = session(fixtures::on_warfarin());
        orch.start(&state).await.unwrap();
        orch.evaluate(&mut state, "aspirin 81 mg").await.unwrap();

        let trail = orch.audit().trail(state.id()).await.unwrap();
        assert_eq!(trail[0].action_taken, AuditAction::SessionStarted);
        assert_eq!(trail[0].resulting_status, SessionStatus::Pending);
        let decided = trail
            .iter()
            .find(|r| r.action_taken == AuditAction::DecisionRendered)
            .expect("decision record");
        assert_eq!(decided.resulting_status, SessionStatus::Blocked);
        assert!(!decided.findings_snapshot.is_empty());
    }
}
