//! Clinical knowledge tables consumed by the safety tools.
//!
//! All drug data, interaction pairs, guideline rules and risk weights live in a single
//! [`KnowledgeBase`] value. The built-in tables are returned by [`KnowledgeBase::default`]; a
//! deployment may replace them wholesale with a YAML file (see
//! [`KnowledgeBase::from_yaml_file`]). Nothing in the tools hard-codes a threshold or a weight.
//!
//! ## YAML layout
//!
//! ```yaml
//! formulary:
//!   - name: warfarin
//!     aliases: [coumadin]
//!     class: anticoagulant
//!     renally_cleared: false
//!     standard_dose_mg: 5
//!     counselling: ["Keep INR appointments"]
//! interactions:
//!   - { a: warfarin, b: aspirin, severity: critical, mechanism: "..." }
//! allergies: []
//! guidelines:
//!   - condition: heart failure
//!     target: nsaid
//!     constraint: { type: contraindicated }
//!     critical: true
//!     rationale: "..."
//! risk: { ... }
//! unknown_pair_severity: null
//! ```

use crate::error::{GuardianError, GuardianResult};
use crate::finding::Severity;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// TABLE ROW TYPES
// ============================================================================

/// One formulary entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrugEntry {
    /// Canonical lowercase generic name.
    pub name: String,
    /// Brand names and abbreviations that resolve to `name`.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Lowercase drug class, used for class-level rules.
    pub class: String,
    #[serde(default)]
    pub renally_cleared: bool,
    /// Usual adult single dose in milligrams.
    #[serde(default)]
    pub standard_dose_mg: Option<f64>,
    /// Patient counselling points used for education material.
    #[serde(default)]
    pub counselling: Vec<String>,
}

impl DrugEntry {
    /// Returns true if `term` names this drug or its class.
    pub fn is_targeted_by(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        term == self.name || term == self.class
    }
}

/// Symmetric drug-drug (or class-class) interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRule {
    pub a: String,
    pub b: String,
    pub severity: Severity,
    pub mechanism: String,
    #[serde(default)]
    pub alternative: Option<String>,
}

impl InteractionRule {
    /// True if the rule covers the unordered pair `{x, y}`.
    pub fn covers(&self, x: &str, y: &str) -> bool {
        (self.a == x && self.b == y) || (self.a == y && self.b == x)
    }
}

/// Allergy cross-reactivity between an allergen and a drug or class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllergyRule {
    pub allergen: String,
    pub target: String,
    pub severity: Severity,
    pub mechanism: String,
    #[serde(default)]
    pub alternative: Option<String>,
}

/// What a guideline rule constrains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    Contraindicated,
    DoseCeiling { max_mg: f64 },
}

/// A (condition, drug-or-class, constraint) triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidelineRule {
    /// Lowercase condition text; matched as a substring of the patient's conditions.
    pub condition: String,
    pub target: String,
    pub constraint: Constraint,
    /// Critical rules block; everything else is a moderate caution.
    #[serde(default)]
    pub critical: bool,
    pub rationale: String,
}

// ============================================================================
// RISK TABLE
// ============================================================================

/// Weight contributed by each named risk factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskWeights {
    pub renal_impairment: f64,
    pub advanced_age: f64,
    pub vital_sign_deviation: f64,
    pub bleeding_tendency: f64,
    pub dose_above_standard: f64,
}

/// Tunable weights, factor cut-offs and severity bands for the risk scorer.
///
/// A composite score below `moderate_threshold` is informational, a score in
/// `[moderate_threshold, critical_threshold)` is moderate, anything at or above
/// `critical_threshold` is critical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskTable {
    pub weights: RiskWeights,
    pub moderate_threshold: f64,
    pub critical_threshold: f64,
    pub age_threshold: u32,
    /// eGFR (mL/min/1.73m²) below this is renal impairment.
    pub egfr_threshold: f64,
    /// Creatinine (mg/dL) above this is renal impairment when eGFR is absent.
    pub creatinine_threshold: f64,
    pub inr_threshold: f64,
    pub systolic_high: u32,
    pub systolic_low: u32,
    pub heart_rate_high: u32,
    pub heart_rate_low: u32,
    /// Drug classes that add to bleeding risk when INR is elevated.
    pub bleeding_classes: Vec<String>,
}

impl Default for RiskTable {
    fn default() -> Self {
        Self {
            weights: RiskWeights {
                renal_impairment: 3.0,
                advanced_age: 1.0,
                vital_sign_deviation: 2.0,
                bleeding_tendency: 3.0,
                dose_above_standard: 2.0,
            },
            moderate_threshold: 2.0,
            critical_threshold: 6.0,
            age_threshold: 65,
            egfr_threshold: 60.0,
            creatinine_threshold: 1.5,
            inr_threshold: 3.0,
            systolic_high: 160,
            systolic_low: 90,
            heart_rate_high: 110,
            heart_rate_low: 50,
            bleeding_classes: vec![
                "anticoagulant".into(),
                "antiplatelet".into(),
                "nsaid".into(),
            ],
        }
    }
}

impl RiskTable {
    /// Maps a composite score onto a severity band.
    pub fn band(&self, score: f64) -> Severity {
        if score >= self.critical_threshold {
            Severity::Critical
        } else if score >= self.moderate_threshold {
            Severity::Moderate
        } else {
            Severity::Informational
        }
    }
}

// ============================================================================
// KNOWLEDGE BASE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub formulary: Vec<DrugEntry>,
    #[serde(default)]
    pub interactions: Vec<InteractionRule>,
    #[serde(default)]
    pub allergies: Vec<AllergyRule>,
    #[serde(default)]
    pub guidelines: Vec<GuidelineRule>,
    #[serde(default)]
    pub risk: RiskTable,
    /// Severity floor for medication pairs with no interaction data. `None` reports the gap as
    /// an informational limitation.
    #[serde(default)]
    pub unknown_pair_severity: Option<Severity>,
}

impl KnowledgeBase {
    /// Parses a knowledge base from YAML and validates it.
    pub fn from_yaml_str(yaml: &str) -> GuardianResult<Self> {
        let mut kb: KnowledgeBase =
            serde_yaml::from_str(yaml).map_err(GuardianError::KnowledgeParse)?;
        kb.normalise();
        kb.validate()?;
        Ok(kb)
    }

    pub fn from_yaml_file(path: &Path) -> GuardianResult<Self> {
        let yaml = std::fs::read_to_string(path).map_err(GuardianError::KnowledgeRead)?;
        Self::from_yaml_str(&yaml)
    }

    /// Resolves a drug by generic name or alias, case-insensitively.
    pub fn drug(&self, name: &str) -> Option<&DrugEntry> {
        let needle = name.trim().to_lowercase();
        self.formulary
            .iter()
            .find(|d| d.name == needle || d.aliases.iter().any(|a| *a == needle))
    }

    /// True if doses of `entry` are compared in milligrams anywhere: it has a standard dose, or a
    /// guideline sets a dose ceiling on the drug or its class.
    pub fn doses_by_mass(&self, entry: &DrugEntry) -> bool {
        entry.standard_dose_mg.is_some()
            || self.guidelines.iter().any(|rule| {
                matches!(rule.constraint, Constraint::DoseCeiling { .. })
                    && entry.is_targeted_by(&rule.target)
            })
    }

    /// Lowercases every lookup key so table comparisons are plain string equality.
    fn normalise(&mut self) {
        for drug in &mut self.formulary {
            drug.name = drug.name.trim().to_lowercase();
            drug.class = drug.class.trim().to_lowercase();
            for alias in &mut drug.aliases {
                *alias = alias.trim().to_lowercase();
            }
        }
        for rule in &mut self.interactions {
            rule.a = rule.a.trim().to_lowercase();
            rule.b = rule.b.trim().to_lowercase();
        }
        for rule in &mut self.allergies {
            rule.allergen = rule.allergen.trim().to_lowercase();
            rule.target = rule.target.trim().to_lowercase();
        }
        for rule in &mut self.guidelines {
            rule.condition = rule.condition.trim().to_lowercase();
            rule.target = rule.target.trim().to_lowercase();
        }
        for class in &mut self.risk.bleeding_classes {
            *class = class.trim().to_lowercase();
        }
    }

    /// Checks internal consistency of the tables.
    ///
    /// # Errors
    ///
    /// Returns `GuardianError::InvalidInput` if the formulary is empty, a drug name is
    /// duplicated, a weight is negative, or the severity bands are out of order.
    pub fn validate(&self) -> GuardianResult<()> {
        if self.formulary.is_empty() {
            return Err(GuardianError::InvalidInput(
                "knowledge base formulary cannot be empty".into(),
            ));
        }

        let mut seen = std::collections::BTreeSet::new();
        for drug in &self.formulary {
            if drug.name.is_empty() || drug.class.is_empty() {
                return Err(GuardianError::InvalidInput(
                    "formulary entries need a name and a class".into(),
                ));
            }
            for term in std::iter::once(&drug.name).chain(drug.aliases.iter()) {
                if !seen.insert(term.clone()) {
                    return Err(GuardianError::InvalidInput(format!(
                        "formulary term '{}' is defined more than once",
                        term
                    )));
                }
            }
        }

        let w = &self.risk.weights;
        let weights = [
            w.renal_impairment,
            w.advanced_age,
            w.vital_sign_deviation,
            w.bleeding_tendency,
            w.dose_above_standard,
        ];
        if weights.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(GuardianError::InvalidInput(
                "risk weights must be finite and non-negative".into(),
            ));
        }
        if !(self.risk.moderate_threshold > 0.0
            && self.risk.moderate_threshold < self.risk.critical_threshold)
        {
            return Err(GuardianError::InvalidInput(
                "risk thresholds must satisfy 0 < moderate < critical".into(),
            ));
        }

        for rule in &self.guidelines {
            if let Constraint::DoseCeiling { max_mg } = rule.constraint {
                if !(max_mg.is_finite() && max_mg > 0.0) {
                    return Err(GuardianError::InvalidInput(format!(
                        "dose ceiling for '{}' must be positive",
                        rule.target
                    )));
                }
            }
        }

        Ok(())
    }
}

fn drug(
    name: &str,
    aliases: &[&str],
    class: &str,
    renally_cleared: bool,
    standard_dose_mg: f64,
    counselling: &[&str],
) -> DrugEntry {
    DrugEntry {
        name: name.into(),
        aliases: aliases.iter().map(|s| s.to_string()).collect(),
        class: class.into(),
        renally_cleared,
        standard_dose_mg: Some(standard_dose_mg),
        counselling: counselling.iter().map(|s| s.to_string()).collect(),
    }
}

fn interaction(
    a: &str,
    b: &str,
    severity: Severity,
    mechanism: &str,
    alternative: Option<&str>,
) -> InteractionRule {
    InteractionRule {
        a: a.into(),
        b: b.into(),
        severity,
        mechanism: mechanism.into(),
        alternative: alternative.map(Into::into),
    }
}

fn guideline(
    condition: &str,
    target: &str,
    constraint: Constraint,
    critical: bool,
    rationale: &str,
) -> GuidelineRule {
    GuidelineRule {
        condition: condition.into(),
        target: target.into(),
        constraint,
        critical,
        rationale: rationale.into(),
    }
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        use Severity::*;

        let formulary = vec![
            drug("warfarin", &["coumadin"], "anticoagulant", false, 5.0, &[
                "Take it at the same time every day.",
                "Keep every INR blood test appointment.",
                "Tell us about any unusual bleeding or bruising.",
                "Check with us before starting any new medicine, including pain relievers.",
            ]),
            drug("enoxaparin", &["lovenox"], "anticoagulant", true, 40.0, &[
                "Inject under the skin of the belly, rotating sites.",
                "Report any unusual bleeding.",
            ]),
            drug("aspirin", &["asa", "acetylsalicylic acid"], "antiplatelet", false, 81.0, &[
                "Take with food to protect your stomach.",
                "Report black stools or vomiting blood straight away.",
            ]),
            drug("clopidogrel", &["plavix"], "antiplatelet", false, 75.0, &[
                "Do not stop taking it without talking to your doctor.",
                "Report any unusual bleeding.",
            ]),
            drug("ibuprofen", &["advil", "motrin"], "nsaid", false, 400.0, &[
                "Take with food.",
                "Use the lowest dose for the shortest time.",
            ]),
            drug("naproxen", &["aleve"], "nsaid", false, 500.0, &[
                "Take with food.",
                "Stop and seek help if you notice black stools.",
            ]),
            drug("acetaminophen", &["paracetamol", "tylenol"], "analgesic", false, 1000.0, &[
                "Do not take more than 4 grams in a day.",
                "Check cold and flu products, many already contain acetaminophen.",
            ]),
            drug("lisinopril", &["zestril"], "ace inhibitor", true, 10.0, &[
                "Stand up slowly if you feel dizzy.",
                "Report swelling of the face or lips straight away.",
            ]),
            drug("spironolactone", &["aldactone"], "potassium-sparing diuretic", true, 25.0, &[
                "Avoid salt substitutes that contain potassium.",
            ]),
            drug("metformin", &["glucophage"], "biguanide", true, 500.0, &[
                "Take with meals to reduce stomach upset.",
                "Tell us before any scan that uses contrast dye.",
            ]),
            drug("gabapentin", &["neurontin"], "anticonvulsant", true, 300.0, &[
                "It may make you drowsy; do not drive until you know how it affects you.",
            ]),
            drug("amoxicillin", &["amoxil"], "penicillin", true, 500.0, &[
                "Finish the whole course even if you feel better.",
            ]),
            drug("cephalexin", &["keflex"], "cephalosporin", true, 500.0, &[
                "Finish the whole course even if you feel better.",
            ]),
            drug("azithromycin", &["zithromax"], "macrolide", false, 500.0, &[
                "Take it once a day at the same time.",
            ]),
            drug("clarithromycin", &["biaxin"], "macrolide", true, 500.0, &[
                "Tell us about every other medicine you take.",
            ]),
            drug("simvastatin", &["zocor"], "statin", false, 20.0, &[
                "Report unexplained muscle pain or weakness.",
                "Avoid large amounts of grapefruit juice.",
            ]),
            drug("propranolol", &["inderal"], "nonselective beta blocker", false, 40.0, &[
                "Do not stop suddenly.",
            ]),
            drug("digoxin", &["lanoxin"], "cardiac glycoside", true, 0.125, &[
                "Report nausea, vision changes or a very slow pulse.",
            ]),
            drug("amiodarone", &["cordarone"], "antiarrhythmic", false, 200.0, &[
                "Protect your skin from the sun.",
            ]),
        ];

        let interactions = vec![
            interaction(
                "warfarin",
                "aspirin",
                Critical,
                "Additive anticoagulant and antiplatelet effect plus gastric mucosal injury; \
                 major bleeding risk.",
                Some("acetaminophen for analgesia; review antiplatelet need with cardiology"),
            ),
            interaction(
                "anticoagulant",
                "nsaid",
                Critical,
                "NSAIDs impair platelet function and injure gastric mucosa; serious bleeding \
                 risk with anticoagulation.",
                Some("acetaminophen"),
            ),
            interaction(
                "anticoagulant",
                "antiplatelet",
                Moderate,
                "Combined anticoagulant and antiplatelet therapy raises bleeding risk; \
                 requires a documented indication.",
                None,
            ),
            interaction(
                "warfarin",
                "amiodarone",
                Moderate,
                "Amiodarone inhibits warfarin metabolism (CYP2C9); INR rises over weeks.",
                None,
            ),
            interaction(
                "warfarin",
                "acetaminophen",
                Informational,
                "Regular high doses of acetaminophen can raise INR.",
                None,
            ),
            interaction(
                "simvastatin",
                "clarithromycin",
                Critical,
                "Strong CYP3A4 inhibition raises simvastatin levels; rhabdomyolysis risk.",
                Some("azithromycin"),
            ),
            interaction(
                "ace inhibitor",
                "potassium-sparing diuretic",
                Moderate,
                "Both raise serum potassium; hyperkalaemia risk.",
                None,
            ),
            interaction(
                "ace inhibitor",
                "nsaid",
                Moderate,
                "NSAIDs blunt the antihypertensive effect and raise acute kidney injury risk.",
                Some("acetaminophen"),
            ),
            interaction(
                "digoxin",
                "amiodarone",
                Moderate,
                "Amiodarone raises digoxin concentration; halve the digoxin dose and monitor.",
                None,
            ),
            interaction(
                "antiplatelet",
                "nsaid",
                Moderate,
                "Combined antiplatelet and NSAID therapy raises gastrointestinal bleeding risk.",
                Some("acetaminophen"),
            ),
        ];

        let allergies = vec![
            AllergyRule {
                allergen: "penicillin".into(),
                target: "cephalosporin".into(),
                severity: Moderate,
                mechanism: "Beta-lactam cross-reactivity between penicillins and \
                            cephalosporins."
                    .into(),
                alternative: Some("azithromycin".into()),
            },
            AllergyRule {
                allergen: "aspirin".into(),
                target: "nsaid".into(),
                severity: Moderate,
                mechanism: "COX-1 inhibition cross-sensitivity in aspirin-sensitive patients."
                    .into(),
                alternative: Some("acetaminophen".into()),
            },
            AllergyRule {
                allergen: "nsaid".into(),
                target: "antiplatelet".into(),
                severity: Moderate,
                mechanism: "Aspirin shares the COX-1 mechanism of NSAID hypersensitivity."
                    .into(),
                alternative: None,
            },
        ];

        let guidelines = vec![
            guideline(
                "heart failure",
                "nsaid",
                Constraint::Contraindicated,
                true,
                "NSAIDs cause fluid retention and worsen heart failure.",
            ),
            guideline(
                "peptic ulcer",
                "nsaid",
                Constraint::Contraindicated,
                true,
                "NSAIDs are contraindicated with active or recent peptic ulcer disease.",
            ),
            guideline(
                "chronic kidney disease",
                "nsaid",
                Constraint::Contraindicated,
                false,
                "NSAIDs accelerate loss of kidney function; avoid where possible.",
            ),
            guideline(
                "hypertension",
                "nsaid",
                Constraint::Contraindicated,
                false,
                "NSAIDs raise blood pressure and blunt antihypertensive therapy.",
            ),
            guideline(
                "asthma",
                "nonselective beta blocker",
                Constraint::Contraindicated,
                true,
                "Non-selective beta blockers can trigger bronchospasm.",
            ),
            guideline(
                "pregnancy",
                "ace inhibitor",
                Constraint::Contraindicated,
                true,
                "ACE inhibitors are teratogenic in the second and third trimester.",
            ),
            guideline(
                "atrial fibrillation",
                "antiplatelet",
                Constraint::Contraindicated,
                false,
                "Antiplatelet monotherapy is not recommended for stroke prevention in atrial \
                 fibrillation; anticoagulation is preferred.",
            ),
            guideline(
                "chronic kidney disease",
                "metformin",
                Constraint::DoseCeiling { max_mg: 1000.0 },
                false,
                "Metformin exposure rises as kidney function falls; cap the dose.",
            ),
            guideline(
                "liver disease",
                "acetaminophen",
                Constraint::DoseCeiling { max_mg: 650.0 },
                false,
                "Reduced hepatic reserve; keep individual acetaminophen doses low.",
            ),
            guideline(
                "cirrhosis",
                "acetaminophen",
                Constraint::DoseCeiling { max_mg: 650.0 },
                false,
                "Reduced hepatic reserve; keep individual acetaminophen doses low.",
            ),
        ];

        Self {
            formulary,
            interactions,
            allergies,
            guidelines,
            risk: RiskTable::default(),
            unknown_pair_severity: None,
        }
    }
}
