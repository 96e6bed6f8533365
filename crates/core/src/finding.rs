//! Structured safety findings.
//!
//! A [`Finding`] is one observation produced by exactly one tool. It is a tagged variant over the
//! four tool kinds so that severity comparison and the blocking rule stay exhaustive: adding a
//! new kind of finding fails to compile until every `match` handles it.
//!
//! Findings are immutable once created; the ledger only ever clones them into snapshots.

use crate::knowledge::Constraint;
use crate::tools::ToolName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a finding, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Informational,
    Moderate,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Informational => "informational",
            Severity::Moderate => "moderate",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Interaction,
    Guideline,
    Risk,
    Education,
}

/// What the ordered drug was compared against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counterpart {
    /// An active medication on the patient's list.
    Medication,
    /// A recorded allergy.
    Allergy,
    /// Pairs that have no entry in the interaction table.
    UncheckedPairs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionFinding {
    pub severity: Severity,
    pub ordered_drug: String,
    pub counterpart: String,
    pub counterpart_kind: Counterpart,
    pub explanation: String,
    pub alternative: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidelineFinding {
    pub severity: Severity,
    pub condition: String,
    /// Drug name or drug class the rule targets.
    pub target: String,
    pub constraint: Constraint,
    pub explanation: String,
}

/// One named contributor to a composite risk score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    pub weight: f64,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFinding {
    pub severity: Severity,
    pub score: f64,
    pub factors: Vec<RiskFactor>,
    /// Inputs the scorer wanted but the record did not provide.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_data: Vec<String>,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EducationFinding {
    pub drug: String,
    pub reading_level: String,
    pub text: Option<String>,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    Interaction(InteractionFinding),
    Guideline(GuidelineFinding),
    Risk(RiskFinding),
    Education(EducationFinding),
}

impl Finding {
    pub fn kind(&self) -> FindingKind {
        match self {
            Finding::Interaction(_) => FindingKind::Interaction,
            Finding::Guideline(_) => FindingKind::Guideline,
            Finding::Risk(_) => FindingKind::Risk,
            Finding::Education(_) => FindingKind::Education,
        }
    }

    /// Education material never carries clinical weight.
    pub fn severity(&self) -> Severity {
        match self {
            Finding::Interaction(f) => f.severity,
            Finding::Guideline(f) => f.severity,
            Finding::Risk(f) => f.severity,
            Finding::Education(_) => Severity::Informational,
        }
    }

    pub fn explanation(&self) -> &str {
        match self {
            Finding::Interaction(f) => &f.explanation,
            Finding::Guideline(f) => &f.explanation,
            Finding::Risk(f) => &f.explanation,
            Finding::Education(f) => &f.explanation,
        }
    }

    /// The tool that produced this finding.
    pub fn source_tool(&self) -> ToolName {
        match self {
            Finding::Interaction(_) => ToolName::CheckDrugInteractions,
            Finding::Guideline(_) => ToolName::AuditGuidelines,
            Finding::Risk(_) => ToolName::ScoreRisk,
            Finding::Education(_) => ToolName::GenerateEducation,
        }
    }

    /// Safer alternative suggested alongside the finding, if any.
    pub fn alternative(&self) -> Option<&str> {
        match self {
            Finding::Interaction(f) => f.alternative.as_deref(),
            Finding::Guideline(_) | Finding::Risk(_) | Finding::Education(_) => None,
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} / {}] {}",
            self.source_tool(),
            self.severity(),
            self.explanation()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interaction(severity: Severity) -> Finding {
        Finding::Interaction(InteractionFinding {
            severity,
            ordered_drug: "aspirin".into(),
            counterpart: "warfarin".into(),
            counterpart_kind: Counterpart::Medication,
            explanation: "bleeding risk".into(),
            alternative: Some("acetaminophen".into()),
        })
    }

    #[test]
    fn test_severity_orders_critical_highest() {
        assert!(Severity::Critical > Severity::Moderate);
        assert!(Severity::Moderate > Severity::Informational);
    }

    #[test]
    fn test_education_is_always_informational() {
        let finding = Finding::Education(EducationFinding {
            drug: "aspirin".into(),
            reading_level: "8th grade".into(),
            text: None,
            explanation: "education unavailable".into(),
        });
        assert_eq!(finding.severity(), Severity::Informational);
        assert_eq!(finding.source_tool(), ToolName::GenerateEducation);
    }

    #[test]
    fn test_finding_serializes_with_kind_tag() {
        let json = serde_json::to_value(interaction(Severity::Critical)).unwrap();
        assert_eq!(json["kind"], "interaction");
        assert_eq!(json["severity"], "critical");
    }

    #[test]
    fn test_alternative_is_exposed_for_interactions() {
        assert_eq!(
            interaction(Severity::Moderate).alternative(),
            Some("acetaminophen")
        );
    }
}
