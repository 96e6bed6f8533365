//! Education Generator.
//!
//! Builds the prompt for patient-facing medication education and wraps the result as a
//! [`Finding::Education`]. Text is phrased by the reasoning service; the prompt is assembled here
//! from formulary counselling points and the few profile fields that do not identify the
//! patient. Name, identifier, notes and conditions never leave this module.

use crate::constants::{DEFAULT_READING_LEVEL, EDUCATION_UNAVAILABLE};
use crate::finding::{EducationFinding, Finding};
use crate::knowledge::DrugEntry;
use crate::patient::PatientProfile;

#[derive(Debug, Clone, PartialEq)]
pub struct EducationGenerator {
    reading_level: String,
}

impl Default for EducationGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_READING_LEVEL)
    }
}

impl EducationGenerator {
    pub fn new(reading_level: impl Into<String>) -> Self {
        Self {
            reading_level: reading_level.into(),
        }
    }

    pub fn reading_level(&self) -> &str {
        &self.reading_level
    }

    /// Age rounded down to the decade, e.g. "in their 60s".
    fn age_band(patient: &PatientProfile) -> Option<String> {
        patient
            .demographics
            .age
            .map(|age| format!("in their {}s", (age / 10) * 10))
    }

    /// Assembles the prompt sent to the reasoning service.
    ///
    /// # Arguments
    ///
    /// * `drug` - Formulary entry the material is about.
    /// * `dosing` - Human-readable dose and frequency, when the material follows an order.
    /// * `patient` - Source of the age band only.
    pub fn prompt(&self, drug: &DrugEntry, dosing: Option<&str>, patient: &PatientProfile) -> String {
        let mut prompt = format!(
            "Write short patient education about {} ({}) at a {} reading level.\n",
            drug.name, drug.class, self.reading_level
        );
        if let Some(dosing) = dosing {
            prompt.push_str(&format!("Prescribed as: {dosing}.\n"));
        }
        if let Some(band) = Self::age_band(patient) {
            prompt.push_str(&format!("The reader is an adult {band}.\n"));
        }
        if !drug.counselling.is_empty() {
            prompt.push_str("Cover these points:\n");
            for point in &drug.counselling {
                prompt.push_str(&format!("- {point}\n"));
            }
        }
        prompt.push_str(
            "Use plain language, no more than 150 words, and end by telling the reader to ask \
             their pharmacist or doctor if anything is unclear.",
        );
        prompt
    }

    /// Education built from the counselling points alone, used when the reasoning service is
    /// unavailable. `None` when the formulary lists no counselling points for the drug.
    pub fn counselling_text(&self, drug: &DrugEntry, dosing: Option<&str>) -> Option<String> {
        if drug.counselling.is_empty() {
            return None;
        }
        let mut text = format!("About your medicine, {}", drug.name);
        match dosing {
            Some(dosing) => text.push_str(&format!(" ({dosing}):")),
            None => text.push(':'),
        }
        for point in &drug.counselling {
            text.push(' ');
            text.push_str(point);
        }
        text.push_str(" Ask your pharmacist or doctor if anything is unclear.");
        Some(text)
    }

    /// Wraps phrased text, or its absence, as a finding.
    pub fn finding(&self, drug: &str, text: Option<String>) -> Finding {
        let explanation = match &text {
            Some(_) => format!(
                "Patient education for {} at a {} reading level.",
                drug, self.reading_level
            ),
            None => EDUCATION_UNAVAILABLE.to_string(),
        };
        Finding::Education(EducationFinding {
            drug: drug.to_string(),
            reading_level: self.reading_level.clone(),
            text,
            explanation,
        })
    }
}
