//! Request and response bodies for the Session API.
//!
//! These are flat, transport-friendly shapes. Conversions from the core types live next to
//! them so every surface renders a decision the same way.

use guardian_core::{
    AuditRecord, ClarificationRequest, Decision, Finding, FindingKind, PatientSummary,
    SubmitOutcome,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ErrorRes {
    pub error: String,
}

// ============================================================================
// PATIENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PatientRes {
    pub patient_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ListPatientsRes {
    pub patients: Vec<PatientRes>,
}

impl From<PatientSummary> for PatientRes {
    fn from(summary: PatientSummary) -> Self {
        Self {
            patient_id: summary.patient_id.to_string(),
            name: summary.name,
        }
    }
}

// ============================================================================
// SESSIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StartSessionReq {
    pub patient_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StartSessionRes {
    pub session_id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SubmitOrderReq {
    /// Free-text order, or the reply to a clarification question.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AbandonSessionRes {
    pub session_id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FindingRes {
    pub kind: String,
    pub severity: String,
    pub source_tool: String,
    pub explanation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternative: Option<String>,
    /// The full structured finding.
    #[schema(value_type = Object)]
    pub detail: serde_json::Value,
}

impl From<&Finding> for FindingRes {
    fn from(finding: &Finding) -> Self {
        let kind = match finding.kind() {
            FindingKind::Interaction => "interaction",
            FindingKind::Guideline => "guideline",
            FindingKind::Risk => "risk",
            FindingKind::Education => "education",
        };
        Self {
            kind: kind.into(),
            severity: finding.severity().to_string(),
            source_tool: finding.source_tool().to_string(),
            explanation: finding.explanation().to_string(),
            alternative: finding.alternative().map(str::to_string),
            detail: serde_json::to_value(finding).unwrap_or(serde_json::Value::Null),
        }
    }
}

fn findings(items: &[Finding]) -> Vec<FindingRes> {
    items.iter().map(FindingRes::from).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DecisionRes {
    pub session_id: String,
    /// `blocked` or `approved`.
    pub status: String,
    pub findings: Vec<FindingRes>,
    pub cautions: Vec<FindingRes>,
    pub explanation: String,
    pub alternative: Option<String>,
    pub education: Option<String>,
    pub gateway_summary: Option<String>,
    pub evidence: Vec<FindingRes>,
    pub omitted_tools: Vec<String>,
    pub tool_calls: usize,
    pub fallback_used: bool,
}

impl From<&Decision> for DecisionRes {
    fn from(d: &Decision) -> Self {
        Self {
            session_id: d.session_id.to_string(),
            status: d.status.to_string(),
            findings: findings(&d.findings),
            cautions: findings(&d.cautions),
            explanation: d.explanation.clone(),
            alternative: d.alternative.clone(),
            education: d.education.clone(),
            gateway_summary: d.gateway_summary.clone(),
            evidence: findings(&d.evidence),
            omitted_tools: d.omitted_tools.iter().map(|t| t.to_string()).collect(),
            tool_calls: d.tool_calls,
            fallback_used: d.fallback_used,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ClarificationRes {
    pub question: String,
    pub missing: Vec<String>,
}

impl From<&ClarificationRequest> for ClarificationRes {
    fn from(c: &ClarificationRequest) -> Self {
        Self {
            question: c.question.clone(),
            missing: c.missing.clone(),
        }
    }
}

/// Exactly one of `decision` and `clarification` is set, matching `outcome`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SubmitOrderRes {
    /// `decision` or `clarification`.
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<DecisionRes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarification: Option<ClarificationRes>,
}

impl From<&SubmitOutcome> for SubmitOrderRes {
    fn from(outcome: &SubmitOutcome) -> Self {
        match outcome {
            SubmitOutcome::Decision(d) => Self {
                outcome: "decision".into(),
                decision: Some(d.into()),
                clarification: None,
            },
            SubmitOutcome::Clarification(c) => Self {
                outcome: "clarification".into(),
                decision: None,
                clarification: Some(c.into()),
            },
        }
    }
}

// ============================================================================
// AUDIT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuditRecordRes {
    pub sequence: u64,
    pub session_id: String,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    pub patient_id: String,
    pub input_text: Option<String>,
    pub action: String,
    /// The action with its details, e.g. `{"action": "tool_failed", "tool": ..., "error": ...}`.
    #[schema(value_type = Object)]
    pub action_taken: serde_json::Value,
    pub findings_snapshot: Vec<FindingRes>,
    pub resulting_status: String,
}

impl From<&AuditRecord> for AuditRecordRes {
    fn from(r: &AuditRecord) -> Self {
        Self {
            sequence: r.sequence,
            session_id: r.session_id.to_string(),
            timestamp: r.timestamp.to_rfc3339(),
            patient_id: r.patient_id.to_string(),
            input_text: r.input_text.clone(),
            action: r.action_taken.label().to_string(),
            action_taken: serde_json::to_value(&r.action_taken)
                .unwrap_or(serde_json::Value::Null),
            findings_snapshot: findings(&r.findings_snapshot),
            resulting_status: r.resulting_status.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuditTrailRes {
    pub session_id: String,
    pub records: Vec<AuditRecordRes>,
}
