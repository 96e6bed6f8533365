//! Reasoning gateway.
//!
//! The external reasoning service is an *advisory dispatcher*. Given the order, the evidence
//! gathered so far and the tool catalog, it suggests the next step: run a tool, ask the
//! clinician a question, or stop. It never renders the verdict; the decision rule does.
//!
//! [`ReasoningGateway`] wraps any [`ReasoningService`] with:
//! - a per-call timeout (a timeout is a failure, never a silent success)
//! - one retry after a fixed backoff
//! - validation of every directive against the catalog, the tool's input schema and the order
//!
//! When a call still fails after the retry, the error is returned to the orchestrator, which
//! switches the session to its deterministic fallback.

pub mod http;

pub use http::HttpReasoningService;

use crate::finding::Finding;
use crate::knowledge::KnowledgeBase;
use crate::order::NormalizedOrder;
use crate::tools::{ToolName, ToolSpec};
use crate::SessionId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum GatewayError {
    #[error("reasoning service timed out after {0:?}")]
    Timeout(Duration),
    #[error("reasoning service unavailable: {0}")]
    Unavailable(String),
    #[error("reasoning service is not configured")]
    NotConfigured,
    #[error("reasoning service returned an unreadable response: {0}")]
    InvalidResponse(String),
    #[error("malformed directive: {0}")]
    MalformedDirective(String),
}

impl GatewayError {
    /// Only transient failures are worth a second attempt.
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout(_) | GatewayError::Unavailable(_) | GatewayError::InvalidResponse(_)
        )
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// A directive exactly as the reasoning service produced it, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Directive {
    Invoke {
        tool: String,
        #[serde(default)]
        arguments: serde_json::Value,
    },
    Clarify {
        question: String,
    },
    Conclude {
        summary: String,
    },
}

/// A directive that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidatedDirective {
    Invoke(ToolName),
    Clarify(String),
    Conclude(String),
}

/// Everything the reasoning service is shown for one directive request.
///
/// Patient context is limited to clinical facts; name and identifier are never included.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayRequest {
    pub session_id: SessionId,
    pub input_text: String,
    pub order: NormalizedOrder,
    pub active_medications: Vec<String>,
    pub allergies: Vec<String>,
    pub conditions: Vec<String>,
    pub evidence: Vec<Finding>,
    pub attempted: Vec<ToolName>,
    pub catalog: Vec<ToolSpec>,
    pub turn: usize,
}

impl GatewayRequest {
    /// Renders the request as the user message of a chat prompt.
    pub fn prompt(&self) -> String {
        let mut prompt = format!(
            "Medication order: \"{}\"\nNormalised: {} {} ({:?}, {})\n",
            self.input_text,
            self.order.drug,
            self.order.dose,
            self.order.route,
            self.order.frequency
        );
        prompt.push_str(&format!(
            "Active medications: {}\nAllergies: {}\nConditions: {}\n",
            join_or_none(&self.active_medications),
            join_or_none(&self.allergies),
            join_or_none(&self.conditions)
        ));
        if self.evidence.is_empty() {
            prompt.push_str("Evidence so far: none\n");
        } else {
            prompt.push_str("Evidence so far:\n");
            for finding in &self.evidence {
                prompt.push_str(&format!("- {finding}\n"));
            }
        }
        let attempted: Vec<&str> = self.attempted.iter().map(|t| t.as_str()).collect();
        prompt.push_str(&format!(
            "Tools already run: {}\nTurn: {}\n",
            if attempted.is_empty() {
                "none".to_string()
            } else {
                attempted.join(", ")
            },
            self.turn
        ));
        prompt.push_str(
            "Call the next safety tool with the ordered drug as its `drug` argument, call \
             request_clarification if the order is ambiguous, or reply in plain text with a \
             short summary when the evaluation is complete.",
        );
        prompt
    }
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

/// The external reasoning capability.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Suggests the next step of an evaluation.
    async fn next_directive(&self, request: &GatewayRequest) -> GatewayResult<Directive>;

    /// Phrases free text, e.g. patient education, from a prompt.
    async fn compose(&self, prompt: &str) -> GatewayResult<String>;
}

/// Used when no reasoning endpoint is configured. Every session runs the deterministic fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineReasoningService;

#[async_trait]
impl ReasoningService for OfflineReasoningService {
    async fn next_directive(&self, _request: &GatewayRequest) -> GatewayResult<Directive> {
        Err(GatewayError::NotConfigured)
    }

    async fn compose(&self, _prompt: &str) -> GatewayResult<String> {
        Err(GatewayError::NotConfigured)
    }
}

/// Timeout, retry and validation around a [`ReasoningService`].
#[derive(Clone)]
pub struct ReasoningGateway {
    service: Arc<dyn ReasoningService>,
    timeout: Duration,
    retry_backoff: Duration,
}

impl std::fmt::Debug for ReasoningGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReasoningGateway")
            .field("timeout", &self.timeout)
            .field("retry_backoff", &self.retry_backoff)
            .finish_non_exhaustive()
    }
}

impl ReasoningGateway {
    pub fn new(service: Arc<dyn ReasoningService>, timeout: Duration, retry_backoff: Duration) -> Self {
        Self {
            service,
            timeout,
            retry_backoff,
        }
    }

    /// Runs `op` under the timeout, retrying once after the backoff on a transient failure.
    async fn with_retry<T, F, Fut>(&self, what: &'static str, mut op: F) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let mut attempt = 1;
        loop {
            let err = match tokio::time::timeout(self.timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => GatewayError::Timeout(self.timeout),
            };

            if attempt >= 2 || !err.is_retryable() {
                return Err(err);
            }
            tracing::warn!(call = what, error = %err, backoff = ?self.retry_backoff, "reasoning call failed, retrying");
            tokio::time::sleep(self.retry_backoff).await;
            attempt += 1;
        }
    }

    pub async fn next_directive(&self, request: &GatewayRequest) -> GatewayResult<Directive> {
        self.with_retry("next_directive", || self.service.next_directive(request))
            .await
    }

    pub async fn compose(&self, prompt: &str) -> GatewayResult<String> {
        self.with_retry("compose", || self.service.compose(prompt)).await
    }

    /// Checks a directive against the catalog, the tool's input schema and the current order.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::MalformedDirective` if the tool is not in the catalog, the
    /// arguments violate its input schema, the `drug` argument does not name the ordered drug,
    /// or a clarification question is empty.
    pub fn validate(
        directive: Directive,
        catalog: &[ToolSpec],
        order: &NormalizedOrder,
        kb: &KnowledgeBase,
    ) -> GatewayResult<ValidatedDirective> {
        match directive {
            Directive::Invoke { tool, arguments } => {
                let spec = catalog
                    .iter()
                    .find(|spec| spec.name.as_str() == tool)
                    .ok_or_else(|| {
                        GatewayError::MalformedDirective(format!("'{tool}' is not in the catalog"))
                    })?;

                spec.check_arguments(&arguments)
                    .map_err(|e| GatewayError::MalformedDirective(e.to_string()))?;

                let named = arguments
                    .get("drug")
                    .and_then(|d| d.as_str())
                    .unwrap_or_default();
                let resolved = kb.drug(named).map(|d| d.name.as_str());
                if resolved != Some(order.drug.as_str()) {
                    return Err(GatewayError::MalformedDirective(format!(
                        "{} was asked to evaluate '{}' but the order is for {}",
                        spec.name, named, order.drug
                    )));
                }

                Ok(ValidatedDirective::Invoke(spec.name))
            }
            Directive::Clarify { question } => {
                let question = question.trim();
                if question.is_empty() {
                    return Err(GatewayError::MalformedDirective(
                        "clarification request has no question".into(),
                    ));
                }
                Ok(ValidatedDirective::Clarify(question.to_string()))
            }
            Directive::Conclude { summary } => Ok(ValidatedDirective::Conclude(summary)),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted reasoning services for tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays a fixed list of directive results, then concludes.
    pub struct ScriptedService {
        directives: Mutex<VecDeque<GatewayResult<Directive>>>,
        compose: GatewayResult<String>,
        pub directive_calls: AtomicUsize,
        pub compose_calls: AtomicUsize,
    }

    impl ScriptedService {
        pub fn new(directives: Vec<GatewayResult<Directive>>) -> Self {
            Self {
                directives: Mutex::new(directives.into()),
                compose: Ok("Take this medicine exactly as prescribed.".into()),
                directive_calls: AtomicUsize::new(0),
                compose_calls: AtomicUsize::new(0),
            }
        }

        pub fn with_compose(mut self, compose: GatewayResult<String>) -> Self {
            self.compose = compose;
            self
        }

        pub fn invoke(tool: ToolName, drug: &str) -> GatewayResult<Directive> {
            Ok(Directive::Invoke {
                tool: tool.as_str().to_string(),
                arguments: serde_json::json!({ "drug": drug }),
            })
        }

        pub fn conclude(summary: &str) -> GatewayResult<Directive> {
            Ok(Directive::Conclude {
                summary: summary.to_string(),
            })
        }
    }

    #[async_trait]
    impl ReasoningService for ScriptedService {
        async fn next_directive(&self, _request: &GatewayRequest) -> GatewayResult<Directive> {
            self.directive_calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .directives
                .lock()
                .expect("script mutex poisoned")
                .pop_front();
            next.unwrap_or_else(|| Self::conclude("done"))
        }

        async fn compose(&self, _prompt: &str) -> GatewayResult<String> {
            self.compose_calls.fetch_add(1, Ordering::SeqCst);
            self.compose.clone()
        }
    }

    /// Always fails with `Unavailable`.
    #[derive(Default)]
    pub struct DownService {
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl ReasoningService for DownService {
        async fn next_directive(&self, _request: &GatewayRequest) -> GatewayResult<Directive> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(GatewayError::Unavailable("connection refused".into()))
        }

        async fn compose(&self, _prompt: &str) -> GatewayResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(GatewayError::Unavailable("connection refused".into()))
        }
    }

    /// Never answers.
    pub struct HangingService;

    #[async_trait]
    impl ReasoningService for HangingService {
        async fn next_directive(&self, _request: &GatewayRequest) -> GatewayResult<Directive> {
            std::future::pending().await
        }

        async fn compose(&self, _prompt: &str) -> GatewayResult<String> {
            std::future::pending().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::order::MedicationOrder;
    use crate::tools::ToolSet;
    use std::sync::atomic::Ordering;

    fn gateway(service: Arc<dyn ReasoningService>) -> ReasoningGateway {
        ReasoningGateway::new(service, Duration::from_millis(50), Duration::from_millis(1))
    }

    fn aspirin() -> (NormalizedOrder, KnowledgeBase) {
        let kb = KnowledgeBase::default();
        let order = MedicationOrder::parse("aspirin 81 mg daily", &kb).unwrap();
        (order.normalized().clone(), kb)
    }

    #[tokio::test]
    async fn test_compose_retries_once_then_fails() {
        let down = Arc::new(DownService::default());
        let err = gateway(down.clone())
            .compose("hello")
            .await
            .expect_err("down service should fail");
        assert!(matches!(err, GatewayError::Unavailable(_)));
        assert_eq!(down.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_an_error() {
        let err = gateway(Arc::new(HangingService))
            .compose("hello")
            .await
            .expect_err("hanging service should time out");
        assert_eq!(err, GatewayError::Timeout(Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_not_configured_is_not_retried() {
        let err = gateway(Arc::new(OfflineReasoningService))
            .compose("hello")
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::NotConfigured);
    }

    #[tokio::test]
    async fn test_successful_call_passes_through() {
        let service = Arc::new(ScriptedService::new(Vec::new()));
        let text = gateway(service.clone()).compose("hello").await.unwrap();
        assert!(text.contains("prescribed"));
        assert_eq!(service.compose_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_validate_accepts_catalog_tool_for_ordered_drug() {
        let (order, kb) = aspirin();
        let catalog = ToolSet::standard().catalog();
        let directive = Directive::Invoke {
            tool: "check_drug_interactions".into(),
            arguments: serde_json::json!({"drug": "ASA"}),
        };
        assert_eq!(
            ReasoningGateway::validate(directive, &catalog, &order, &kb),
            Ok(ValidatedDirective::Invoke(ToolName::CheckDrugInteractions))
        );
    }

    #[test]
    fn test_validate_rejects_unknown_tool() {
        let (order, kb) = aspirin();
        let catalog = ToolSet::standard().catalog();
        let directive = Directive::Invoke {
            tool: "approve_order".into(),
            arguments: serde_json::json!({"drug": "aspirin"}),
        };
        assert!(matches!(
            ReasoningGateway::validate(directive, &catalog, &order, &kb),
            Err(GatewayError::MalformedDirective(_))
        ));
    }

    #[test]
    fn test_validate_rejects_schema_violation_and_wrong_drug() {
        let (order, kb) = aspirin();
        let catalog = ToolSet::standard().catalog();
        let missing_drug = Directive::Invoke {
            tool: "score_risk".into(),
            arguments: serde_json::json!({}),
        };
        assert!(ReasoningGateway::validate(missing_drug, &catalog, &order, &kb).is_err());

        let wrong_drug = Directive::Invoke {
            tool: "score_risk".into(),
            arguments: serde_json::json!({"drug": "ibuprofen"}),
        };
        assert!(ReasoningGateway::validate(wrong_drug, &catalog, &order, &kb).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_clarification() {
        let (order, kb) = aspirin();
        let directive = Directive::Clarify {
            question: "   ".into(),
        };
        assert!(ReasoningGateway::validate(directive, &[], &order, &kb).is_err());
    }

    #[test]
    fn test_prompt_omits_patient_identity() {
        let (order, _) = aspirin();
        let request = GatewayRequest {
            session_id: SessionId::new(),
            input_text: "aspirin 81 mg daily".into(),
            order,
            active_medications: vec!["Warfarin".into()],
            allergies: Vec::new(),
            conditions: vec!["Atrial Fibrillation".into()],
            evidence: Vec::new(),
            attempted: vec![ToolName::ScoreRisk],
            catalog: ToolSet::standard().catalog(),
            turn: 2,
        };
        let prompt = request.prompt();
        assert!(prompt.contains("Warfarin"));
        assert!(prompt.contains("score_risk"));
        assert!(prompt.contains("Allergies: none"));
    }
}
