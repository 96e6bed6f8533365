//! The safety tool set.
//!
//! Each tool is a stateless evaluator: it reads the normalised order, the patient snapshot and
//! the knowledge base, and returns zero or more [`Finding`]s. Tools never see the ledger or the
//! session, so they cannot depend on each other's output except through the orchestrator.
//!
//! The three decision tools implement [`SafetyTool`]. The education generator is listed in the
//! same catalog so the reasoning service knows it exists, but it needs the reasoning service to
//! phrase its text and only runs after a decision, so the orchestrator drives it directly.

pub mod education;
pub mod guideline;
pub mod interaction;
pub mod risk;

pub use education::EducationGenerator;
pub use guideline::GuidelineAuditor;
pub use interaction::InteractionDetector;
pub use risk::RiskScorer;

use crate::finding::Finding;
use crate::knowledge::KnowledgeBase;
use crate::order::NormalizedOrder;
use crate::patient::PatientProfile;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;

/// Tool identifiers as advertised to the reasoning service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    CheckDrugInteractions,
    AuditGuidelines,
    ScoreRisk,
    GenerateEducation,
}

impl ToolName {
    /// Every tool in the catalog, in fallback execution order.
    pub const ALL: [ToolName; 4] = [
        ToolName::CheckDrugInteractions,
        ToolName::AuditGuidelines,
        ToolName::ScoreRisk,
        ToolName::GenerateEducation,
    ];

    /// Tools whose findings feed the decision rule.
    pub const DECISION_TOOLS: [ToolName; 3] = [
        ToolName::CheckDrugInteractions,
        ToolName::AuditGuidelines,
        ToolName::ScoreRisk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::CheckDrugInteractions => "check_drug_interactions",
            ToolName::AuditGuidelines => "audit_guidelines",
            ToolName::ScoreRisk => "score_risk",
            ToolName::GenerateEducation => "generate_education",
        }
    }

    pub fn is_decision_tool(&self) -> bool {
        !matches!(self, ToolName::GenerateEducation)
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ToolError::InvalidInput(format!("unknown tool: {s}")))
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ToolError {
    #[error("required patient data missing: {0}")]
    MissingData(String),
    #[error("invalid tool input: {0}")]
    InvalidInput(String),
    #[error("tool failed internally: {0}")]
    Internal(String),
}

// ============================================================================
// CATALOG
// ============================================================================

/// What the reasoning service is told about a tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: ToolName,
    pub description: String,
    /// JSON Schema for the directive arguments.
    pub input_schema: serde_json::Value,
    /// JSON Schema describing the returned findings.
    pub output_schema: serde_json::Value,
}

impl ToolSpec {
    pub fn for_tool(name: ToolName) -> Self {
        let description = match name {
            ToolName::CheckDrugInteractions => {
                "Compare the ordered drug against the patient's active medications and allergies."
            }
            ToolName::AuditGuidelines => {
                "Check the order against condition-specific guideline rules (contraindications, \
                 dose ceilings)."
            }
            ToolName::ScoreRisk => {
                "Compute a composite risk score from labs, vitals, age and the ordered dose."
            }
            ToolName::GenerateEducation => {
                "Produce patient-facing education for the ordered drug. Only runs after a \
                 decision has been reached."
            }
        };
        Self {
            name,
            description: description.to_string(),
            input_schema: json!({
                "type": "object",
                "required": ["drug"],
                "properties": {
                    "drug": {"type": "string"},
                    "reason": {"type": "string"}
                }
            }),
            output_schema: json!({
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["kind", "severity", "explanation"],
                    "properties": {
                        "kind": {"type": "string"},
                        "severity": {"type": "string"},
                        "explanation": {"type": "string"}
                    }
                }
            }),
        }
    }
}

impl ToolSpec {
    /// Checks directive arguments against this tool's input schema.
    ///
    /// Only the parts of JSON Schema the catalog uses are understood: `type`, `required` and
    /// nested `properties`. A schema without constraints accepts any value.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::InvalidInput` naming the tool and the offending argument.
    pub fn check_arguments(&self, arguments: &serde_json::Value) -> Result<(), ToolError> {
        check_value(self.name, arguments, &self.input_schema, "arguments")
    }
}

fn check_value(
    tool: ToolName,
    value: &serde_json::Value,
    schema: &serde_json::Value,
    at: &str,
) -> Result<(), ToolError> {
    let Some(rules) = schema.as_object().filter(|o| !o.is_empty()) else {
        return Ok(());
    };

    if let Some(expected) = rules.get("type") {
        let expected = expected.as_str().ok_or_else(|| {
            ToolError::Internal(format!("{tool} schema for {at} has a non-string type"))
        })?;
        let ok = match expected {
            "object" => value.is_object(),
            "array" => value.is_array(),
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "null" => value.is_null(),
            other => {
                return Err(ToolError::Internal(format!(
                    "{tool} schema for {at} names unsupported type '{other}'"
                )))
            }
        };
        if !ok {
            return Err(ToolError::InvalidInput(format!(
                "{tool} {at} should be {expected} but is {}",
                kind_of(value)
            )));
        }
    }

    let Some(fields) = value.as_object() else {
        return Ok(());
    };

    let required = rules.get("required").and_then(|r| r.as_array());
    if let Some(key) = required
        .into_iter()
        .flatten()
        .filter_map(|k| k.as_str())
        .find(|k| !fields.contains_key(*k))
    {
        return Err(ToolError::InvalidInput(format!("{tool} {at} lack '{key}'")));
    }

    if let Some(properties) = rules.get("properties").and_then(|p| p.as_object()) {
        for (key, nested) in properties {
            if let Some(field) = fields.get(key) {
                check_value(tool, field, nested, &format!("{at}.{key}"))?;
            }
        }
    }

    Ok(())
}

fn kind_of(value: &serde_json::Value) -> &'static str {
    use serde_json::Value;
    match value {
        Value::Object(_) => "an object",
        Value::Array(_) => "an array",
        Value::String(_) => "a string",
        Value::Number(n) if n.is_i64() || n.is_u64() => "an integer",
        Value::Number(_) => "a number",
        Value::Bool(_) => "a boolean",
        Value::Null => "null",
    }
}

// ============================================================================
// TOOL TRAIT AND SET
// ============================================================================

/// Everything a tool may read.
#[derive(Debug, Clone, Copy)]
pub struct ToolContext<'a> {
    pub order: &'a NormalizedOrder,
    pub patient: &'a PatientProfile,
    pub knowledge: &'a KnowledgeBase,
}

/// A deterministic safety evaluator.
///
/// Implementations must be pure functions of the context: identical inputs give identical
/// findings, in the same order.
pub trait SafetyTool: Send + Sync {
    fn name(&self) -> ToolName;

    fn spec(&self) -> ToolSpec {
        ToolSpec::for_tool(self.name())
    }

    /// # Errors
    ///
    /// Returns a [`ToolError`] if the tool cannot evaluate the order, e.g. a record field it
    /// depends on is malformed. The orchestrator records the failure and continues with
    /// reduced evidence.
    fn evaluate(&self, ctx: &ToolContext<'_>) -> Result<Vec<Finding>, ToolError>;
}

/// The decision tools plus the education generator.
pub struct ToolSet {
    tools: Vec<Box<dyn SafetyTool>>,
    education: EducationGenerator,
}

impl ToolSet {
    /// The standard tool set with the default reading level for education.
    pub fn standard() -> Self {
        Self {
            tools: vec![
                Box::new(InteractionDetector),
                Box::new(GuidelineAuditor),
                Box::new(RiskScorer),
            ],
            education: EducationGenerator::default(),
        }
    }

    /// Replaces the decision tool registered under the same name.
    ///
    /// Used by tests to inject failing tools.
    pub fn with_tool(mut self, tool: Box<dyn SafetyTool>) -> Self {
        let name = tool.name();
        self.tools.retain(|t| t.name() != name);
        self.tools.push(tool);
        self
    }

    pub fn with_education(mut self, education: EducationGenerator) -> Self {
        self.education = education;
        self
    }

    pub fn get(&self, name: ToolName) -> Option<&dyn SafetyTool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn education(&self) -> &EducationGenerator {
        &self.education
    }

    /// The catalog handed to the reasoning service on every directive request.
    pub fn catalog(&self) -> Vec<ToolSpec> {
        ToolName::ALL
            .into_iter()
            .map(|name| match self.get(name) {
                Some(tool) => tool.spec(),
                None => ToolSpec::for_tool(name),
            })
            .collect()
    }
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<ToolName> = self.tools.iter().map(|t| t.name()).collect();
        f.debug_struct("ToolSet")
            .field("tools", &names)
            .field("education", &self.education)
            .finish()
    }
}
