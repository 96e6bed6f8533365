//! The decision rule and the values a session hands back to its caller.
//!
//! [`decision_rule`] is a pure function over the sealed [`EvidenceLedger`]. The reasoning
//! service's own conclusion is carried along as `gateway_summary` for display, but it is never
//! an input to the verdict:
//!
//! - any critical finding → [`Verdict::Blocked`], the critical findings are the trigger
//! - otherwise moderate findings → [`Verdict::Approved`] with those findings as cautions
//! - otherwise → [`Verdict::Approved`], clean

use crate::finding::{Finding, Severity};
use crate::ledger::EvidenceLedger;
use crate::tools::ToolName;
use crate::SessionId;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Blocked,
    Approved,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Blocked => f.write_str("blocked"),
            Verdict::Approved => f.write_str("approved"),
        }
    }
}

/// Output of the decision rule.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub verdict: Verdict,
    /// Critical findings that caused a block. Empty when approved.
    pub triggering: Vec<Finding>,
    /// Moderate findings attached as cautionary notes.
    pub cautions: Vec<Finding>,
}

/// Maps ledger contents to a verdict. Deterministic and independent of the reasoning service.
pub fn decision_rule(ledger: &EvidenceLedger) -> RuleOutcome {
    let triggering = ledger.with_severity(Severity::Critical);
    let cautions = ledger.with_severity(Severity::Moderate);
    let verdict = if triggering.is_empty() {
        Verdict::Approved
    } else {
        Verdict::Blocked
    };
    RuleOutcome {
        verdict,
        triggering,
        cautions,
    }
}

/// Final output of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub session_id: SessionId,
    pub status: Verdict,
    /// Findings that triggered a block; empty for approvals.
    pub findings: Vec<Finding>,
    pub cautions: Vec<Finding>,
    pub explanation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternative: Option<String>,
    /// Patient-facing text, or `"education unavailable"`.
    pub education: Option<String>,
    /// The reasoning service's own narrative, when it produced one. Informational only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_summary: Option<String>,
    /// Every finding in the sealed ledger, in call order.
    pub evidence: Vec<Finding>,
    /// Decision tools that failed and therefore contributed no evidence.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub omitted_tools: Vec<ToolName>,
    pub tool_calls: usize,
    pub fallback_used: bool,
}

impl Decision {
    /// Builds a decision from the rule outcome and the sealed ledger.
    pub fn render(
        session_id: SessionId,
        outcome: RuleOutcome,
        ledger: &EvidenceLedger,
        omitted_tools: Vec<ToolName>,
    ) -> Self {
        let RuleOutcome {
            verdict,
            triggering,
            cautions,
        } = outcome;

        let mut explanation = match verdict {
            Verdict::Blocked => {
                let reasons: Vec<&str> = triggering.iter().map(Finding::explanation).collect();
                format!("Order blocked. {}", reasons.join(" "))
            }
            Verdict::Approved if !cautions.is_empty() => {
                let notes: Vec<&str> = cautions.iter().map(Finding::explanation).collect();
                format!("Order approved with cautions. {}", notes.join(" "))
            }
            Verdict::Approved => {
                "Order approved. No critical or moderate safety concerns were found.".to_string()
            }
        };
        if !omitted_tools.is_empty() {
            let names: Vec<&str> = omitted_tools.iter().map(|t| t.as_str()).collect();
            explanation.push_str(&format!(
                " Not evaluated because the check failed: {}.",
                names.join(", ")
            ));
        }

        let source = match verdict {
            Verdict::Blocked => &triggering,
            Verdict::Approved => &cautions,
        };
        let alternative = source
            .iter()
            .find_map(|f| f.alternative())
            .map(str::to_string);

        Self {
            session_id,
            status: verdict,
            findings: triggering,
            cautions,
            explanation,
            alternative,
            education: None,
            gateway_summary: None,
            evidence: ledger.snapshot(),
            omitted_tools,
            tool_calls: 0,
            fallback_used: false,
        }
    }
}

/// Question put back to the clinician when the order cannot be evaluated as given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationRequest {
    pub question: String,
    /// Which parts of the order are missing or ambiguous, e.g. `["dose"]`.
    pub missing: Vec<String>,
}

impl ClarificationRequest {
    pub fn new(question: impl Into<String>, missing: Vec<String>) -> Self {
        Self {
            question: question.into(),
            missing,
        }
    }
}

/// What `submit_order` returns.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Decision(Decision),
    Clarification(ClarificationRequest),
}
