//! Medication order normalisation.
//!
//! Clinicians type orders as free text ("start aspirin 81 mg PO daily for chest pain"). Before
//! any safety tool can run, the order is normalised into a [`NormalizedOrder`]: a formulary drug,
//! a dose with a unit, a route and a frequency.
//!
//! Normalisation is deterministic and conservative. Anything that would require a guess about
//! drug identity or dose produces a [`ClarificationRequest`] instead of an order.

use crate::decision::ClarificationRequest;
use crate::knowledge::KnowledgeBase;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

// ============================================================================
// NORMALISED FORM
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoseUnit {
    Mg,
    Mcg,
    G,
    Units,
    Ml,
}

impl fmt::Display for DoseUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DoseUnit::Mg => "mg",
            DoseUnit::Mcg => "mcg",
            DoseUnit::G => "g",
            DoseUnit::Units => "units",
            DoseUnit::Ml => "ml",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dose {
    pub amount: f64,
    pub unit: DoseUnit,
}

impl Dose {
    /// Dose in milligrams, if the unit is a mass unit.
    pub fn to_mg(&self) -> Option<f64> {
        match self.unit {
            DoseUnit::Mg => Some(self.amount),
            DoseUnit::Mcg => Some(self.amount / 1000.0),
            DoseUnit::G => Some(self.amount * 1000.0),
            DoseUnit::Units | DoseUnit::Ml => None,
        }
    }
}

impl fmt::Display for Dose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.unit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Oral,
    Intravenous,
    Intramuscular,
    Subcutaneous,
    Topical,
    Inhaled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "hours")]
pub enum Frequency {
    Once,
    Daily,
    TwiceDaily,
    ThreeTimesDaily,
    FourTimesDaily,
    EveryHours(u32),
    Weekly,
    AsNeeded,
    Unspecified,
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Once => f.write_str("once"),
            Frequency::Daily => f.write_str("once daily"),
            Frequency::TwiceDaily => f.write_str("twice daily"),
            Frequency::ThreeTimesDaily => f.write_str("three times daily"),
            Frequency::FourTimesDaily => f.write_str("four times daily"),
            Frequency::EveryHours(h) => write!(f, "every {h} hours"),
            Frequency::Weekly => f.write_str("weekly"),
            Frequency::AsNeeded => f.write_str("as needed"),
            Frequency::Unspecified => f.write_str("frequency not stated"),
        }
    }
}

/// The structured part of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedOrder {
    /// Canonical formulary name.
    pub drug: String,
    pub drug_class: String,
    pub dose: Dose,
    pub route: Route,
    pub frequency: Frequency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indication: Option<String>,
}

/// A clinician utterance together with its normalised form.
///
/// Only constructible through [`MedicationOrder::parse`], so an order in hand is always fully
/// normalised and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationOrder {
    raw: String,
    normalized: NormalizedOrder,
}

// ============================================================================
// PATTERNS
// ============================================================================

struct Patterns {
    dose: Regex,
    plain_amount: Regex,
    routes: Vec<(Regex, Route)>,
    frequencies: Vec<(Regex, Frequency)>,
    every_hours: Regex,
    indication: Regex,
}

static PATTERNS: LazyLock<Patterns> = LazyLock::new(|| {
    let re = |p: &str| Regex::new(p).expect("order pattern literals are valid");
    Patterns {
        dose: re(r"(?i)([\d.,]*\d)\s*(mcg|µg|ug|mg|g|units?|iu|ml)\b"),
        plain_amount: re(r"^\d+(?:\.\d+)?$"),
        routes: vec![
            (re(r"(?i)\b(iv|intravenous(ly)?)\b"), Route::Intravenous),
            (re(r"(?i)\b(im|intramuscular(ly)?)\b"), Route::Intramuscular),
            (re(r"(?i)\b(sc|sq|subq|subcut|subcutaneous(ly)?)\b"), Route::Subcutaneous),
            (re(r"(?i)\b(topical(ly)?|cream|ointment)\b"), Route::Topical),
            (re(r"(?i)\b(inhaled|inhaler|nebuli[sz]ed)\b"), Route::Inhaled),
            (re(r"(?i)\b(po|oral(ly)?|by mouth)\b"), Route::Oral),
        ],
        frequencies: vec![
            (re(r"(?i)\b(bid|b\.i\.d|twice (a |per )?day|twice daily)\b"), Frequency::TwiceDaily),
            (re(r"(?i)\b(tid|t\.i\.d|three times (a |per )?day|three times daily)\b"), Frequency::ThreeTimesDaily),
            (re(r"(?i)\b(qid|q\.i\.d|four times (a |per )?day|four times daily)\b"), Frequency::FourTimesDaily),
            (re(r"(?i)\b(weekly|once a week)\b"), Frequency::Weekly),
            (re(r"(?i)\b(prn|as needed)\b"), Frequency::AsNeeded),
            (re(r"(?i)\b(daily|once daily|once a day|od|qd|every day|nightly|qhs)\b"), Frequency::Daily),
            (re(r"(?i)\b(once|stat|single dose)\b"), Frequency::Once),
        ],
        every_hours: re(r"(?i)\b(?:every\s+(\d+)\s*(?:hours?|hrs?|h)|q(\d+)h)\b"),
        indication: re(r"(?i)\bfor\s+([a-z][a-z '\-]*[a-z])"),
    }
});

fn term_pattern(term: &str) -> Option<Regex> {
    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(term))).ok()
}

// ============================================================================
// PARSING
// ============================================================================

impl MedicationOrder {
    /// Normalises a free-text order against the formulary.
    ///
    /// # Errors
    ///
    /// Returns a [`ClarificationRequest`] if no formulary drug is named, more than one is named,
    /// no dose is given, more than one distinct dose is given, an amount is not plain digits, or
    /// a drug dosed by weight is ordered in ml or units. Missing route defaults to oral
    /// and missing frequency is recorded as [`Frequency::Unspecified`]; neither changes the drug
    /// or the amount, so neither needs a question.
    pub fn parse(raw: &str, kb: &KnowledgeBase) -> Result<Self, ClarificationRequest> {
        let raw = raw.trim();
        let mut missing = Vec::new();
        let mut problems = Vec::new();

        if raw.is_empty() {
            return Err(ClarificationRequest::new(
                "Please enter a medication order, e.g. \"aspirin 81 mg PO daily\".",
                vec!["drug".into(), "dose".into()],
            ));
        }

        let mut drugs: Vec<&str> = Vec::new();
        for entry in &kb.formulary {
            let named = std::iter::once(&entry.name)
                .chain(entry.aliases.iter())
                .filter_map(|t| term_pattern(t))
                .any(|re| re.is_match(raw));
            if named && !drugs.contains(&entry.name.as_str()) {
                drugs.push(entry.name.as_str());
            }
        }
        match drugs.len() {
            0 => {
                missing.push("drug".to_string());
                problems.push("No medication from the formulary was recognised.".to_string());
            }
            1 => {}
            _ => {
                missing.push("drug".to_string());
                problems.push(format!(
                    "More than one medication was named ({}); submit one order at a time.",
                    drugs.join(", ")
                ));
            }
        }

        let p = &*PATTERNS;
        let mut doses: Vec<Dose> = Vec::new();
        let mut unreadable: Vec<String> = Vec::new();
        for caps in p.dose.captures_iter(raw) {
            let Some(token) = caps.get(1).map(|m| m.as_str().trim_start_matches(',')) else {
                continue;
            };
            // Grouped digits ("2,000") and bare decimals (".5") are never read as a number.
            if !p.plain_amount.is_match(token) {
                unreadable.push(caps[0].trim_start_matches(',').to_string());
                continue;
            }
            let Ok(amount) = token.parse::<f64>() else {
                unreadable.push(caps[0].to_string());
                continue;
            };
            let unit = match caps.get(2).map(|m| m.as_str().to_lowercase()).as_deref() {
                Some("mg") => DoseUnit::Mg,
                Some("mcg") | Some("µg") | Some("ug") => DoseUnit::Mcg,
                Some("g") => DoseUnit::G,
                Some("ml") => DoseUnit::Ml,
                _ => DoseUnit::Units,
            };
            let dose = Dose { amount, unit };
            if !doses.contains(&dose) {
                doses.push(dose);
            }
        }
        if !unreadable.is_empty() {
            missing.push("dose".to_string());
            problems.push(format!(
                "The dose could not be read unambiguously ({}); write the amount as plain digits, \
                 e.g. 2000 mg or 0.5 g.",
                unreadable.join(", ")
            ));
        } else {
            match doses.len() {
                0 => {
                    missing.push("dose".to_string());
                    problems.push("No dose with a unit was given (e.g. 81 mg).".to_string());
                }
                1 => {}
                _ => {
                    missing.push("dose".to_string());
                    let listed: Vec<String> = doses.iter().map(ToString::to_string).collect();
                    problems.push(format!(
                        "More than one dose was given ({}); which one is intended?",
                        listed.join(", ")
                    ));
                }
            }
        }

        if !missing.is_empty() {
            return Err(ClarificationRequest::new(problems.join(" "), missing));
        }

        // Both vectors hold exactly one element here.
        let (Some(drug_name), Some(dose)) = (drugs.first(), doses.first().copied()) else {
            return Err(ClarificationRequest::new(
                "The order could not be read; please restate it.",
                vec!["drug".into(), "dose".into()],
            ));
        };
        let Some(entry) = kb.drug(drug_name) else {
            return Err(ClarificationRequest::new(
                format!("'{drug_name}' is not in the formulary."),
                vec!["drug".into()],
            ));
        };
        if dose.to_mg().is_none() && kb.doses_by_mass(entry) {
            return Err(ClarificationRequest::new(
                format!(
                    "{} is dosed by weight; {} cannot be checked. Give the dose in mg, mcg or g.",
                    entry.name, dose
                ),
                vec!["dose".into()],
            ));
        }

        let route = p
            .routes
            .iter()
            .find(|(re, _)| re.is_match(raw))
            .map(|(_, route)| *route)
            .unwrap_or(Route::Oral);

        let frequency = match p.every_hours.captures(raw) {
            Some(caps) => caps
                .get(1)
                .or_else(|| caps.get(2))
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .map(Frequency::EveryHours)
                .unwrap_or(Frequency::Unspecified),
            None => p
                .frequencies
                .iter()
                .find(|(re, _)| re.is_match(raw))
                .map(|(_, f)| *f)
                .unwrap_or(Frequency::Unspecified),
        };

        let indication = p
            .indication
            .captures(raw)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_lowercase())
            .filter(|s| !s.is_empty());

        Ok(Self {
            raw: raw.to_string(),
            normalized: NormalizedOrder {
                drug: entry.name.clone(),
                drug_class: entry.class.clone(),
                dose,
                route,
                frequency,
                indication,
            },
        })
    }

    /// Interprets a clinician's reply to a clarification request.
    ///
    /// The reply is tried on its own first (a restated order), then appended to the previous
    /// utterance (a fragment such as "81 mg").
    pub fn parse_follow_up(
        previous: &str,
        reply: &str,
        kb: &KnowledgeBase,
    ) -> Result<Self, ClarificationRequest> {
        match Self::parse(reply, kb) {
            Ok(order) => Ok(order),
            Err(_) => Self::parse(&format!("{} {}", previous.trim(), reply.trim()), kb),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn normalized(&self) -> &NormalizedOrder {
        &self.normalized
    }
}
