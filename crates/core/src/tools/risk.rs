//! Risk Scorer.
//!
//! Sums weighted risk factors into a single composite score and maps the score onto a severity
//! band. Every weight, cut-off and band boundary comes from [`RiskTable`]; this module only
//! decides *whether* each factor is present.
//!
//! Factors:
//! - `renal_impairment`: eGFR below cut-off (creatinine above cut-off when eGFR is absent), for
//!   renally cleared drugs only
//! - `advanced_age`: age at or above the cut-off
//! - `vital_sign_deviation`: systolic pressure or heart rate outside the configured range
//! - `bleeding_tendency`: INR above cut-off when the ordered drug affects haemostasis
//! - `dose_above_standard`: ordered dose above the formulary's standard single dose
//!
//! Inputs the record does not provide are listed in the finding's `missing_data`, never assumed
//! normal without saying so.

use super::{SafetyTool, ToolContext, ToolError, ToolName};
use crate::finding::{Finding, RiskFactor, RiskFinding};
use crate::knowledge::RiskTable;

#[derive(Debug, Clone, Copy, Default)]
pub struct RiskScorer;

/// Parses `"138/82"` into `(systolic, diastolic)`.
fn parse_blood_pressure(raw: &str) -> Option<(u32, u32)> {
    let (sys, dia) = raw.trim().split_once('/')?;
    Some((sys.trim().parse().ok()?, dia.trim().parse().ok()?))
}

struct Tally<'t> {
    table: &'t RiskTable,
    factors: Vec<RiskFactor>,
    missing: Vec<String>,
}

impl<'t> Tally<'t> {
    fn add(&mut self, name: &str, weight: f64, detail: String) {
        self.factors.push(RiskFactor {
            name: name.to_string(),
            weight,
            detail,
        });
    }

    fn not_assessed(&mut self, what: &str) {
        self.missing.push(what.to_string());
    }

    fn score(&self) -> f64 {
        self.factors.iter().map(|f| f.weight).sum()
    }
}

impl RiskScorer {
    fn renal(&self, ctx: &ToolContext<'_>, tally: &mut Tally<'_>) {
        let renally_cleared = ctx
            .knowledge
            .drug(&ctx.order.drug)
            .map(|d| d.renally_cleared)
            .unwrap_or(false);
        if !renally_cleared {
            return;
        }

        let t = tally.table;
        if let Some(egfr) = ctx.patient.lab("eGFR") {
            if egfr.value < t.egfr_threshold {
                tally.add(
                    "renal_impairment",
                    t.weights.renal_impairment,
                    format!(
                        "eGFR {} {} is below {}; {} is renally cleared",
                        egfr.value, egfr.unit, t.egfr_threshold, ctx.order.drug
                    ),
                );
            }
        } else if let Some(creatinine) = ctx.patient.lab("creatinine") {
            if creatinine.value > t.creatinine_threshold {
                tally.add(
                    "renal_impairment",
                    t.weights.renal_impairment,
                    format!(
                        "creatinine {} {} is above {}; {} is renally cleared",
                        creatinine.value, creatinine.unit, t.creatinine_threshold, ctx.order.drug
                    ),
                );
            }
        } else {
            tally.not_assessed("eGFR or creatinine");
        }
    }

    fn age(&self, ctx: &ToolContext<'_>, tally: &mut Tally<'_>) {
        let t = tally.table;
        match ctx.patient.demographics.age {
            Some(age) if age >= t.age_threshold => tally.add(
                "advanced_age",
                t.weights.advanced_age,
                format!("age {} is at or above {}", age, t.age_threshold),
            ),
            Some(_) => {}
            None => tally.not_assessed("age"),
        }
    }

    fn vitals(&self, ctx: &ToolContext<'_>, tally: &mut Tally<'_>) {
        let t = tally.table;
        let vitals = &ctx.patient.vital_signs;
        let mut deviations = Vec::new();

        match vitals.blood_pressure.as_deref() {
            Some(raw) => match parse_blood_pressure(raw) {
                Some((systolic, _)) => {
                    if systolic > t.systolic_high || systolic < t.systolic_low {
                        deviations.push(format!(
                            "systolic {} outside {}-{}",
                            systolic, t.systolic_low, t.systolic_high
                        ));
                    }
                }
                None => {
                    tally.not_assessed(&format!("blood pressure (unreadable '{}')", raw.trim()))
                }
            },
            None => tally.not_assessed("blood pressure"),
        }

        match vitals.heart_rate {
            Some(hr) if hr > t.heart_rate_high || hr < t.heart_rate_low => deviations.push(
                format!("heart rate {} outside {}-{}", hr, t.heart_rate_low, t.heart_rate_high),
            ),
            Some(_) => {}
            None => tally.not_assessed("heart rate"),
        }

        if !deviations.is_empty() {
            tally.add(
                "vital_sign_deviation",
                t.weights.vital_sign_deviation,
                deviations.join("; "),
            );
        }
    }

    fn bleeding(&self, ctx: &ToolContext<'_>, tally: &mut Tally<'_>) {
        let t = tally.table;
        if !t.bleeding_classes.contains(&ctx.order.drug_class) {
            return;
        }
        match ctx.patient.lab("INR") {
            Some(inr) if inr.value > t.inr_threshold => tally.add(
                "bleeding_tendency",
                t.weights.bleeding_tendency,
                format!(
                    "INR {} is above {} and {} affects haemostasis",
                    inr.value, t.inr_threshold, ctx.order.drug
                ),
            ),
            Some(_) => {}
            None => tally.not_assessed("INR"),
        }
    }

    fn dose(&self, ctx: &ToolContext<'_>, tally: &mut Tally<'_>) {
        let t = tally.table;
        let standard = ctx
            .knowledge
            .drug(&ctx.order.drug)
            .and_then(|d| d.standard_dose_mg);
        let (Some(standard), Some(ordered)) = (standard, ctx.order.dose.to_mg()) else {
            return;
        };
        if ordered > standard {
            tally.add(
                "dose_above_standard",
                t.weights.dose_above_standard,
                format!(
                    "{} mg is above the standard single dose of {} mg",
                    ordered, standard
                ),
            );
        }
    }
}

impl SafetyTool for RiskScorer {
    fn name(&self) -> ToolName {
        ToolName::ScoreRisk
    }

    fn evaluate(&self, ctx: &ToolContext<'_>) -> Result<Vec<Finding>, ToolError> {
        let mut tally = Tally {
            table: &ctx.knowledge.risk,
            factors: Vec::new(),
            missing: Vec::new(),
        };

        self.renal(ctx, &mut tally);
        self.age(ctx, &mut tally);
        self.vitals(ctx, &mut tally);
        self.bleeding(ctx, &mut tally);
        self.dose(ctx, &mut tally);

        let score = tally.score();
        let severity = tally.table.band(score);
        let mut explanation = if tally.factors.is_empty() {
            format!("Composite risk score {score} ({severity}); no risk factors identified.")
        } else {
            let names: Vec<&str> = tally.factors.iter().map(|f| f.name.as_str()).collect();
            format!(
                "Composite risk score {score} ({severity}) from: {}.",
                names.join(", ")
            )
        };
        if !tally.missing.is_empty() {
            explanation.push_str(&format!(" Not assessed: {}.", tally.missing.join(", ")));
        }

        Ok(vec![Finding::Risk(RiskFinding {
            severity,
            score,
            factors: tally.factors,
            missing_data: tally.missing,
            explanation,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Severity;
    use crate::knowledge::KnowledgeBase;
    use crate::order::MedicationOrder;
    use crate::patient::{fixtures, PatientProfile};

    fn score(order: &str, patient: &PatientProfile) -> Result<RiskFinding, ToolError> {
        let kb = KnowledgeBase::default();
        let order = MedicationOrder::parse(order, &kb).expect("order should parse");
        let findings = RiskScorer.evaluate(&ToolContext {
            order: order.normalized(),
            patient,
            knowledge: &kb,
        })?;
        assert_eq!(findings.len(), 1, "risk scorer yields exactly one finding");
        match findings.into_iter().next() {
            Some(Finding::Risk(r)) => Ok(r),
            other => panic!("unexpected finding {other:?}"),
        }
    }

    #[test]
    fn test_parse_blood_pressure() {
        assert_eq!(parse_blood_pressure("138/82"), Some((138, 82)));
        assert_eq!(parse_blood_pressure(" 90 / 60 "), Some((90, 60)));
        assert_eq!(parse_blood_pressure("high"), None);
        assert_eq!(parse_blood_pressure("140/"), None);
    }

    #[test]
    fn test_baseline_patient_is_informational() {
        let r = score("acetaminophen 500 mg", &fixtures::baseline("P-1")).unwrap();
        assert_eq!(r.severity, Severity::Informational);
        assert_eq!(r.score, 0.0);
        assert!(r.missing_data.is_empty());
    }

    #[test]
    fn test_renal_impairment_with_renally_cleared_drug_is_moderate() {
        let r = score("metformin 500 mg bid", &fixtures::renal_impaired()).unwrap();
        assert_eq!(r.severity, Severity::Moderate);
        assert_eq!(r.score, 3.0);
        assert_eq!(r.factors[0].name, "renal_impairment");
    }

    #[test]
    fn test_renal_impairment_ignored_for_non_renal_drug() {
        let r = score("acetaminophen 500 mg", &fixtures::renal_impaired()).unwrap();
        assert_eq!(r.severity, Severity::Informational);
    }

    #[test]
    fn test_creatinine_used_when_egfr_absent() {
        let mut patient = fixtures::renal_impaired();
        patient.labs.remove("eGFR");
        let r = score("gabapentin 300 mg", &patient).unwrap();
        assert!(r.factors.iter().any(|f| f.detail.contains("creatinine")));
    }

    #[test]
    fn test_factors_accumulate_to_critical() {
        let mut patient = fixtures::renal_impaired();
        patient.demographics.age = Some(82);
        patient.vital_signs.blood_pressure = Some("178/95".into());
        // renal 3 + age 1 + vitals 2 + dose 2 = 8
        let r = score("metformin 1000 mg", &patient).unwrap();
        assert_eq!(r.score, 8.0);
        assert_eq!(r.severity, Severity::Critical);
    }

    #[test]
    fn test_elevated_inr_with_bleeding_class() {
        let mut patient = fixtures::baseline("P-5");
        patient.labs.insert("INR".into(), fixtures::lab(4.1, ""));
        let r = score("aspirin 81 mg", &patient).unwrap();
        assert!(r.factors.iter().any(|f| f.name == "bleeding_tendency"));
        assert_eq!(r.severity, Severity::Moderate);
    }

    #[test]
    fn test_missing_inputs_are_listed() {
        let mut patient = fixtures::baseline("P-6");
        patient.labs.clear();
        patient.demographics.age = None;
        patient.vital_signs = Default::default();
        let r = score("enoxaparin 40 mg sc daily", &patient).unwrap();
        for expected in ["eGFR or creatinine", "age", "blood pressure", "heart rate", "INR"] {
            assert!(r.missing_data.iter().any(|m| m == expected), "missing {expected}");
        }
        assert!(r.explanation.contains("Not assessed"));
    }

    #[test]
    fn test_unreadable_blood_pressure_keeps_other_factors() {
        let mut patient = fixtures::renal_impaired();
        patient.demographics.age = Some(72);
        patient.vital_signs.blood_pressure = Some("pending".into());
        // renal 3 + age 1 + dose 2 = 6
        let r = score("metformin 1000 mg bid", &patient).expect("scoring continues");
        assert_eq!(r.score, 6.0);
        assert_eq!(r.severity, Severity::Critical);
        assert!(r
            .missing_data
            .iter()
            .any(|m| m == "blood pressure (unreadable 'pending')"));
        assert!(!r.factors.iter().any(|f| f.name == "vital_sign_deviation"));
    }

    #[test]
    fn test_scoring_is_idempotent() {
        let patient = fixtures::on_warfarin();
        assert_eq!(
            score("lisinopril 20 mg daily", &patient).unwrap(),
            score("lisinopril 20 mg daily", &patient).unwrap()
        );
    }
}
