//! Interaction Detector.
//!
//! Compares the ordered drug against every active medication and every recorded allergy.
//!
//! Medication pairs are looked up in the symmetric interaction table at both name and class
//! level. A pair with no table entry is *not* silently ignored: all such pairs are collected into
//! one finding that reports the gap, at the knowledge base's `unknown_pair_severity` floor (or
//! informational when no floor is configured).

use super::{SafetyTool, ToolContext, ToolError, ToolName};
use crate::finding::{Counterpart, Finding, InteractionFinding, Severity};
use crate::knowledge::{InteractionRule, KnowledgeBase};

/// A drug as far as the interaction table is concerned: a name and, when the formulary knows
/// it, a class.
#[derive(Debug, Clone, PartialEq)]
struct DrugKey {
    name: String,
    class: Option<String>,
}

impl DrugKey {
    fn resolve(kb: &KnowledgeBase, raw: &str) -> Self {
        match kb.drug(raw) {
            Some(entry) => Self {
                name: entry.name.clone(),
                class: Some(entry.class.clone()),
            },
            None => Self {
                name: raw.trim().to_lowercase(),
                class: None,
            },
        }
    }

    fn terms(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.class.as_deref())
    }
}

/// Finds the most severe table rule covering the pair, trying name/name, name/class,
/// class/name and class/class.
///
/// The result does not depend on argument order. On a severity tie the earliest table row wins.
fn lookup_keys<'kb>(kb: &'kb KnowledgeBase, a: &DrugKey, b: &DrugKey) -> Option<&'kb InteractionRule> {
    let mut best: Option<&InteractionRule> = None;
    for rule in &kb.interactions {
        let covered = a
            .terms()
            .any(|x| b.terms().any(|y| rule.covers(x, y)));
        if !covered {
            continue;
        }
        match best {
            Some(current) if current.severity >= rule.severity => {}
            _ => best = Some(rule),
        }
    }
    best
}

/// Symmetric interaction lookup by drug name or alias.
pub fn lookup_pair<'kb>(kb: &'kb KnowledgeBase, a: &str, b: &str) -> Option<&'kb InteractionRule> {
    lookup_keys(kb, &DrugKey::resolve(kb, a), &DrugKey::resolve(kb, b))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InteractionDetector;

impl InteractionDetector {
    fn medication_findings(&self, ctx: &ToolContext<'_>, ordered: &DrugKey) -> Vec<Finding> {
        let kb = ctx.knowledge;
        let mut findings = Vec::new();
        let mut unchecked = Vec::new();

        for med in &ctx.patient.active_medications {
            let existing = DrugKey::resolve(kb, &med.name);

            if existing.name == ordered.name {
                findings.push(Finding::Interaction(InteractionFinding {
                    severity: Severity::Moderate,
                    ordered_drug: ordered.name.clone(),
                    counterpart: med.name.clone(),
                    counterpart_kind: Counterpart::Medication,
                    explanation: format!(
                        "Duplicate therapy: {} is already on the active medication list as {}.",
                        ordered.name, med.name
                    ),
                    alternative: None,
                }));
                continue;
            }

            match lookup_keys(kb, ordered, &existing) {
                Some(rule) => findings.push(Finding::Interaction(InteractionFinding {
                    severity: rule.severity,
                    ordered_drug: ordered.name.clone(),
                    counterpart: med.name.clone(),
                    counterpart_kind: Counterpart::Medication,
                    explanation: format!("{} + {}: {}", ordered.name, existing.name, rule.mechanism),
                    alternative: rule.alternative.clone(),
                })),
                None => unchecked.push(med.name.clone()),
            }
        }

        if !unchecked.is_empty() {
            let severity = kb.unknown_pair_severity.unwrap_or(Severity::Informational);
            findings.push(Finding::Interaction(InteractionFinding {
                severity,
                ordered_drug: ordered.name.clone(),
                counterpart: unchecked.join(", "),
                counterpart_kind: Counterpart::UncheckedPairs,
                explanation: format!(
                    "No interaction data for {} with: {}. Absence of data is not evidence of \
                     safety; review manually.",
                    ordered.name,
                    unchecked.join(", ")
                ),
                alternative: None,
            }));
        }

        findings
    }

    fn allergy_findings(&self, ctx: &ToolContext<'_>, ordered: &DrugKey) -> Vec<Finding> {
        let kb = ctx.knowledge;
        let mut findings = Vec::new();

        for allergy in &ctx.patient.allergies {
            let allergen = DrugKey::resolve(kb, &allergy.allergen);
            let reaction = allergy
                .reaction
                .as_deref()
                .map(|r| format!(" (recorded reaction: {r})"))
                .unwrap_or_default();

            let direct = ordered.terms().any(|t| t == allergen.name)
                || (allergen.class.is_some() && allergen.class == ordered.class);
            if direct {
                findings.push(Finding::Interaction(InteractionFinding {
                    severity: Severity::Critical,
                    ordered_drug: ordered.name.clone(),
                    counterpart: allergy.allergen.clone(),
                    counterpart_kind: Counterpart::Allergy,
                    explanation: format!(
                        "Documented allergy to {}{}; {} is the same drug or drug class.",
                        allergy.allergen, reaction, ordered.name
                    ),
                    alternative: None,
                }));
                continue;
            }

            let cross = kb
                .allergies
                .iter()
                .filter(|rule| allergen.terms().any(|t| t == rule.allergen))
                .filter(|rule| ordered.terms().any(|t| t == rule.target))
                .max_by_key(|rule| rule.severity);
            if let Some(rule) = cross {
                findings.push(Finding::Interaction(InteractionFinding {
                    severity: rule.severity,
                    ordered_drug: ordered.name.clone(),
                    counterpart: allergy.allergen.clone(),
                    counterpart_kind: Counterpart::Allergy,
                    explanation: format!(
                        "Allergy to {}{}: {}",
                        allergy.allergen, reaction, rule.mechanism
                    ),
                    alternative: rule.alternative.clone(),
                }));
            }
        }

        findings
    }
}

impl SafetyTool for InteractionDetector {
    fn name(&self) -> ToolName {
        ToolName::CheckDrugInteractions
    }

    fn evaluate(&self, ctx: &ToolContext<'_>) -> Result<Vec<Finding>, ToolError> {
        let ordered = DrugKey {
            name: ctx.order.drug.clone(),
            class: Some(ctx.order.drug_class.clone()),
        };

        let mut findings = self.medication_findings(ctx, &ordered);
        findings.extend(self.allergy_findings(ctx, &ordered));
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::MedicationOrder;
    use crate::patient::fixtures;
    use crate::patient::{Allergy, PatientProfile};

    fn run(order: &str, patient: &PatientProfile, kb: &KnowledgeBase) -> Vec<Finding> {
        let order = MedicationOrder::parse(order, kb).expect("order should parse");
        InteractionDetector
            .evaluate(&ToolContext {
                order: order.normalized(),
                patient,
                knowledge: kb,
            })
            .expect("detector should not fail")
    }

    #[test]
    fn test_warfarin_patient_ordered_aspirin_is_critical() {
        let kb = KnowledgeBase::default();
        let findings = run("aspirin 81 mg daily", &fixtures::on_warfarin(), &kb);
        let worst = findings.iter().map(Finding::severity).max();
        assert_eq!(worst, Some(Severity::Critical));
        let critical = findings
            .iter()
            .find(|f| f.severity() == Severity::Critical)
            .expect("critical finding");
        assert!(critical.explanation().contains("warfarin"));
        assert!(critical.alternative().is_some());
    }

    #[test]
    fn test_lookup_is_symmetric_for_every_table_pair() {
        let kb = KnowledgeBase::default();
        let names: Vec<String> = kb.formulary.iter().map(|d| d.name.clone()).collect();
        for a in &names {
            for b in &names {
                assert_eq!(
                    lookup_pair(&kb, a, b),
                    lookup_pair(&kb, b, a),
                    "asymmetric lookup for {a}/{b}"
                );
            }
        }
    }

    #[test]
    fn test_class_rule_applies_to_members() {
        let kb = KnowledgeBase::default();
        let rule = lookup_pair(&kb, "coumadin", "advil").expect("anticoagulant + nsaid");
        assert_eq!(rule.severity, Severity::Critical);
    }

    #[test]
    fn test_highest_severity_wins_when_rules_overlap() {
        let kb = KnowledgeBase::default();
        // warfarin/aspirin (critical, by name) and anticoagulant/antiplatelet (moderate) overlap.
        let rule = lookup_pair(&kb, "aspirin", "warfarin").expect("rule");
        assert_eq!(rule.severity, Severity::Critical);
        // enoxaparin/clopidogrel only matches the class-level moderate rule.
        let rule = lookup_pair(&kb, "enoxaparin", "clopidogrel").expect("rule");
        assert_eq!(rule.severity, Severity::Moderate);
    }

    #[test]
    fn test_unknown_pairs_are_reported_not_swallowed() {
        let kb = KnowledgeBase::default();
        let mut patient = fixtures::baseline("P-2");
        patient.active_medications = vec![fixtures::medication("Levothyroxine")];
        let findings = run("gabapentin 300 mg nightly", &patient, &kb);
        assert_eq!(findings.len(), 1);
        match &findings[0] {
            Finding::Interaction(f) => {
                assert_eq!(f.counterpart_kind, Counterpart::UncheckedPairs);
                assert_eq!(f.severity, Severity::Informational);
                assert!(f.explanation.contains("Levothyroxine"));
            }
            other => panic!("unexpected finding {other:?}"),
        }
    }

    #[test]
    fn test_unknown_pair_severity_floor_is_configurable() {
        let mut kb = KnowledgeBase::default();
        kb.unknown_pair_severity = Some(Severity::Moderate);
        let mut patient = fixtures::baseline("P-2");
        patient.active_medications = vec![fixtures::medication("Levothyroxine")];
        let findings = run("gabapentin 300 mg nightly", &patient, &kb);
        assert_eq!(findings[0].severity(), Severity::Moderate);
    }

    #[test]
    fn test_direct_allergy_match_is_critical() {
        let kb = KnowledgeBase::default();
        let mut patient = fixtures::baseline("P-3");
        patient.allergies = vec![Allergy {
            allergen: "Penicillin".into(),
            reaction: Some("anaphylaxis".into()),
        }];
        let findings = run("amoxicillin 500 mg tid", &patient, &kb);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity(), Severity::Critical);
        assert!(findings[0].explanation().contains("anaphylaxis"));
    }

    #[test]
    fn test_penicillin_allergy_cross_reacts_with_cephalosporin() {
        let kb = KnowledgeBase::default();
        let findings = run("cephalexin 500 mg qid", &fixtures::on_warfarin(), &kb);
        let allergy = findings
            .iter()
            .find_map(|f| match f {
                Finding::Interaction(i) if i.counterpart_kind == Counterpart::Allergy => Some(i),
                _ => None,
            })
            .expect("cross-reactivity finding");
        assert_eq!(allergy.severity, Severity::Moderate);
        assert_eq!(allergy.alternative.as_deref(), Some("azithromycin"));
    }

    #[test]
    fn test_duplicate_therapy_is_flagged() {
        let kb = KnowledgeBase::default();
        let findings = run("coumadin 5 mg daily", &fixtures::on_warfarin(), &kb);
        assert!(findings
            .iter()
            .any(|f| f.explanation().starts_with("Duplicate therapy")));
    }

    #[test]
    fn test_no_medications_no_allergies_no_findings() {
        let kb = KnowledgeBase::default();
        let findings = run("acetaminophen 500 mg", &fixtures::baseline("P-4"), &kb);
        assert!(findings.is_empty());
    }
}
