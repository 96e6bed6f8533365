//! Guideline Auditor.
//!
//! Table-driven check of the order against `(condition, drug-or-class, constraint)` rules. A
//! rule fires when one of the patient's conditions contains the rule's condition text and the
//! rule targets the ordered drug or its class.

use super::{SafetyTool, ToolContext, ToolError, ToolName};
use crate::finding::{Finding, GuidelineFinding, Severity};
use crate::knowledge::{Constraint, GuidelineRule};
use crate::order::NormalizedOrder;

#[derive(Debug, Clone, Copy, Default)]
pub struct GuidelineAuditor;

fn targets(rule: &GuidelineRule, order: &NormalizedOrder) -> bool {
    rule.target == order.drug || rule.target == order.drug_class
}

fn severity_of(rule: &GuidelineRule) -> Severity {
    if rule.critical {
        Severity::Critical
    } else {
        Severity::Moderate
    }
}

impl SafetyTool for GuidelineAuditor {
    fn name(&self) -> ToolName {
        ToolName::AuditGuidelines
    }

    fn evaluate(&self, ctx: &ToolContext<'_>) -> Result<Vec<Finding>, ToolError> {
        let order = ctx.order;
        let mut findings = Vec::new();

        for rule in &ctx.knowledge.guidelines {
            if !targets(rule, order) || !ctx.patient.has_condition(&rule.condition) {
                continue;
            }

            let explanation = match &rule.constraint {
                Constraint::Contraindicated => format!(
                    "{} is contraindicated with {}: {}",
                    order.drug, rule.condition, rule.rationale
                ),
                Constraint::DoseCeiling { max_mg } => {
                    let dose_mg = order.dose.to_mg().ok_or_else(|| {
                        ToolError::InvalidInput(format!(
                            "cannot compare a dose in {} with the {} mg ceiling for {}",
                            order.dose.unit, max_mg, rule.condition
                        ))
                    })?;
                    if dose_mg <= *max_mg {
                        continue;
                    }
                    format!(
                        "{} {} exceeds the {} mg ceiling for {}: {}",
                        order.drug, order.dose, max_mg, rule.condition, rule.rationale
                    )
                }
            };

            findings.push(Finding::Guideline(GuidelineFinding {
                severity: severity_of(rule),
                condition: rule.condition.clone(),
                target: rule.target.clone(),
                constraint: rule.constraint.clone(),
                explanation,
            }));
        }

        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::KnowledgeBase;
    use crate::order::{Dose, DoseUnit, Frequency, MedicationOrder, Route};
    use crate::patient::fixtures;
    use crate::patient::PatientProfile;

    fn run(order: &str, patient: &PatientProfile) -> Result<Vec<Finding>, ToolError> {
        let kb = KnowledgeBase::default();
        let order = MedicationOrder::parse(order, &kb).expect("order should parse");
        GuidelineAuditor.evaluate(&ToolContext {
            order: order.normalized(),
            patient,
            knowledge: &kb,
        })
    }

    fn patient_with(conditions: &[&str]) -> PatientProfile {
        let mut p = fixtures::baseline("P-7");
        p.conditions = conditions.iter().map(|c| c.to_string()).collect();
        p
    }

    #[test]
    fn test_critical_rule_blocks_nsaid_in_heart_failure() {
        let findings = run("ibuprofen 400 mg tid", &patient_with(&["Congestive Heart Failure"]))
            .expect("audit should succeed");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity(), Severity::Critical);
    }

    #[test]
    fn test_non_critical_rule_is_moderate() {
        let findings =
            run("naproxen 500 mg bid", &patient_with(&["Hypertension"])).expect("audit");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity(), Severity::Moderate);
    }

    #[test]
    fn test_dose_ceiling_only_fires_above_limit() {
        let ckd = patient_with(&["Chronic Kidney Disease stage 3"]);
        assert!(run("metformin 500 mg bid", &ckd).unwrap().is_empty());

        let findings = run("metformin 2 g daily", &ckd).unwrap();
        assert_eq!(findings.len(), 1);
        match &findings[0] {
            Finding::Guideline(g) => {
                assert_eq!(g.constraint, Constraint::DoseCeiling { max_mg: 1000.0 });
                assert!(g.explanation.contains("exceeds"));
            }
            other => panic!("unexpected finding {other:?}"),
        }
    }

    #[test]
    fn test_volume_order_never_reaches_the_dose_ceiling() {
        let kb = KnowledgeBase::default();
        let err = MedicationOrder::parse("metformin 5 ml daily", &kb)
            .expect_err("normalisation asks for a mass dose first");
        assert_eq!(err.missing, vec!["dose".to_string()]);

        // An order assembled without normalisation still cannot pass the ceiling silently.
        let order = NormalizedOrder {
            drug: "metformin".into(),
            drug_class: "biguanide".into(),
            dose: Dose { amount: 5.0, unit: DoseUnit::Ml },
            route: Route::Oral,
            frequency: Frequency::Daily,
            indication: None,
        };
        let ckd = patient_with(&["chronic kidney disease"]);
        let err = GuidelineAuditor
            .evaluate(&ToolContext { order: &order, patient: &ckd, knowledge: &kb })
            .expect_err("ml cannot be compared with mg");
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[test]
    fn test_no_matching_condition_no_findings() {
        assert!(run("ibuprofen 400 mg", &patient_with(&["Osteoarthritis"]))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_audit_is_idempotent() {
        let patient = patient_with(&["Asthma", "Hypertension"]);
        let first = run("propranolol 40 mg bid", &patient).unwrap();
        let second = run("propranolol 40 mg bid", &patient).unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].severity(), Severity::Critical);
    }
}
