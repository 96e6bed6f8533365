//! Patient record access.
//!
//! The orchestrator never stores or edits patient data. It asks a [`PatientRecords`]
//! implementation for an immutable [`PatientProfile`] snapshot once per session and works from
//! that snapshot until the session ends.
//!
//! Two implementations are provided:
//! - [`FilePatientStore`] reads `<patient_data_dir>/<patient_id>.json`
//! - [`InMemoryPatientStore`] holds profiles in a map, used by tests and demos

use crate::constants::PATIENT_FILE_EXTENSION;
use crate::error::{GuardianError, GuardianResult};
use crate::PatientId;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

// ============================================================================
// PROFILE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Demographics {
    pub name: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub height_cm: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveMedication {
    pub name: String,
    #[serde(default)]
    pub dosage: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allergy {
    pub allergen: String,
    #[serde(default)]
    pub reaction: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabResult {
    pub value: f64,
    pub unit: String,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VitalSigns {
    /// Systolic/diastolic in mmHg, e.g. `"138/82"`.
    #[serde(default)]
    pub blood_pressure: Option<String>,
    #[serde(default)]
    pub heart_rate: Option<u32>,
    #[serde(default)]
    pub temperature_c: Option<f64>,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalNote {
    pub date: NaiveDate,
    pub note: String,
}

/// Immutable snapshot of one patient's record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientProfile {
    pub patient_id: PatientId,
    pub demographics: Demographics,
    #[serde(default, rename = "current_medications")]
    pub active_medications: Vec<ActiveMedication>,
    #[serde(default)]
    pub allergies: Vec<Allergy>,
    #[serde(default, rename = "medical_conditions")]
    pub conditions: Vec<String>,
    /// Most recent result per lab name.
    #[serde(default)]
    pub labs: BTreeMap<String, LabResult>,
    #[serde(default)]
    pub vital_signs: VitalSigns,
    #[serde(default)]
    pub clinical_notes: Vec<ClinicalNote>,
}

impl PatientProfile {
    /// Looks up a lab result by name, ignoring ASCII case (`"eGFR"` and `"egfr"` are the same).
    pub fn lab(&self, name: &str) -> Option<&LabResult> {
        self.labs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, result)| result)
    }

    /// True if any recorded condition contains `needle`, ignoring case.
    pub fn has_condition(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.conditions
            .iter()
            .any(|c| c.to_lowercase().contains(&needle))
    }
}

/// Listing entry for the patient selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientSummary {
    pub patient_id: PatientId,
    pub name: String,
}

// ============================================================================
// ACCESSOR TRAIT
// ============================================================================

/// Read-only, key-value access to patient records.
#[async_trait]
pub trait PatientRecords: Send + Sync {
    /// Returns the profile for `patient_id`.
    ///
    /// # Errors
    ///
    /// Returns `GuardianError::PatientNotFound` if there is no backing record. Callers must
    /// treat this as terminal and never substitute placeholder data.
    async fn lookup(&self, patient_id: &PatientId) -> GuardianResult<PatientProfile>;

    /// Lists every patient that can be looked up, sorted by identifier.
    async fn list(&self) -> GuardianResult<Vec<PatientSummary>>;
}

// ============================================================================
// FILE STORE
// ============================================================================

/// Patient records stored as one JSON document per patient.
#[derive(Debug, Clone)]
pub struct FilePatientStore {
    dir: PathBuf,
}

impl FilePatientStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, patient_id: &PatientId) -> PathBuf {
        self.dir
            .join(format!("{}.{}", patient_id, PATIENT_FILE_EXTENSION))
    }
}

#[async_trait]
impl PatientRecords for FilePatientStore {
    async fn lookup(&self, patient_id: &PatientId) -> GuardianResult<PatientProfile> {
        let path = self.record_path(patient_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GuardianError::PatientNotFound(patient_id.to_string()));
            }
            Err(e) => return Err(GuardianError::RecordRead(e)),
        };

        let profile: PatientProfile =
            serde_json::from_slice(&bytes).map_err(GuardianError::RecordParse)?;

        if profile.patient_id != *patient_id {
            return Err(GuardianError::InvalidInput(format!(
                "record {} declares patient_id {}",
                path.display(),
                profile.patient_id
            )));
        }

        Ok(profile)
    }

    async fn list(&self) -> GuardianResult<Vec<PatientSummary>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(GuardianError::RecordRead(e)),
        };

        let mut patients = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(GuardianError::RecordRead)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PATIENT_FILE_EXTENSION) {
                continue;
            }

            let bytes = tokio::fs::read(&path)
                .await
                .map_err(GuardianError::RecordRead)?;
            match serde_json::from_slice::<PatientProfile>(&bytes) {
                Ok(profile) => patients.push(PatientSummary {
                    patient_id: profile.patient_id,
                    name: profile.demographics.name,
                }),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable patient record");
                }
            }
        }

        patients.sort_by(|a, b| a.patient_id.cmp(&b.patient_id));
        Ok(patients)
    }
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct InMemoryPatientStore {
    profiles: HashMap<PatientId, PatientProfile>,
}

impl InMemoryPatientStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, profile: PatientProfile) -> Self {
        self.profiles.insert(profile.patient_id.clone(), profile);
        self
    }
}

#[async_trait]
impl PatientRecords for InMemoryPatientStore {
    async fn lookup(&self, patient_id: &PatientId) -> GuardianResult<PatientProfile> {
        self.profiles
            .get(patient_id)
            .cloned()
            .ok_or_else(|| GuardianError::PatientNotFound(patient_id.to_string()))
    }

    async fn list(&self) -> GuardianResult<Vec<PatientSummary>> {
        let mut patients: Vec<PatientSummary> = self
            .profiles
            .values()
            .map(|p| PatientSummary {
                patient_id: p.patient_id.clone(),
                name: p.demographics.name.clone(),
            })
            .collect();
        patients.sort_by(|a, b| a.patient_id.cmp(&b.patient_id));
        Ok(patients)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures;
    use super::*;
    use tempfile::TempDir;

    fn write_profile(dir: &Path, profile: &PatientProfile) {
        let path = dir.join(format!("{}.json", profile.patient_id));
        std::fs::write(path, serde_json::to_vec_pretty(profile).expect("serialize"))
            .expect("write fixture");
    }

    #[test]
    fn test_lab_lookup_ignores_case() {
        let profile = fixtures::on_warfarin();
        assert_eq!(profile.lab("inr").map(|l| l.value), Some(2.3));
        assert_eq!(profile.lab("EGFR").map(|l| l.value), Some(92.0));
        assert!(profile.lab("HbA1c").is_none());
    }

    #[test]
    fn test_has_condition_matches_substring() {
        let profile = fixtures::on_warfarin();
        assert!(profile.has_condition("atrial fibrillation"));
        assert!(profile.has_condition("diabetes"));
        assert!(!profile.has_condition("asthma"));
    }

    #[test]
    fn test_profile_uses_record_field_names() {
        let json = serde_json::to_value(fixtures::on_warfarin()).expect("serialize");
        assert!(json.get("current_medications").is_some());
        assert!(json.get("medical_conditions").is_some());
    }

    #[tokio::test]
    async fn test_file_store_lookup_roundtrip() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let profile = fixtures::on_warfarin();
        write_profile(dir.path(), &profile);

        let store = FilePatientStore::new(dir.path());
        let loaded = store
            .lookup(&profile.patient_id)
            .await
            .expect("lookup should succeed");
        assert_eq!(loaded, profile);
    }

    #[tokio::test]
    async fn test_file_store_unknown_patient_is_not_found() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = FilePatientStore::new(dir.path());
        let err = store
            .lookup(&PatientId::new("P-00000").unwrap())
            .await
            .expect_err("missing record should fail");
        assert!(matches!(err, GuardianError::PatientNotFound(id) if id == "P-00000"));
    }

    #[tokio::test]
    async fn test_file_store_rejects_mismatched_patient_id() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let profile = fixtures::on_warfarin();
        let json = serde_json::to_vec(&profile).unwrap();
        std::fs::write(dir.path().join("P-11111.json"), json).unwrap();

        let store = FilePatientStore::new(dir.path());
        let err = store
            .lookup(&PatientId::new("P-11111").unwrap())
            .await
            .expect_err("mismatched id should fail");
        assert!(matches!(err, GuardianError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_file_store_list_skips_invalid_and_sorts() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        write_profile(dir.path(), &fixtures::on_warfarin());
        write_profile(dir.path(), &fixtures::renal_impaired());
        std::fs::write(dir.path().join("broken.json"), b"{ not json").unwrap();
        std::fs::write(dir.path().join("README.txt"), b"ignore me").unwrap();

        let store = FilePatientStore::new(dir.path());
        let patients = store.list().await.expect("list should succeed");
        let ids: Vec<&str> = patients.iter().map(|p| p.patient_id.as_str()).collect();
        assert_eq!(ids, vec!["P-40411", "P-90210"]);
    }

    #[tokio::test]
    async fn test_file_store_list_missing_dir_is_empty() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = FilePatientStore::new(dir.path().join("nope"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_store_lookup_and_not_found() {
        let store = InMemoryPatientStore::new().with_profile(fixtures::on_warfarin());
        assert!(store.lookup(&PatientId::new("P-90210").unwrap()).await.is_ok());
        assert!(matches!(
            store.lookup(&PatientId::new("P-1").unwrap()).await,
            Err(GuardianError::PatientNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_bundled_sample_records_load() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../patients");
        let store = FilePatientStore::new(dir);

        let robert = store
            .lookup(&PatientId::new("P-90210").unwrap())
            .await
            .expect("sample record parses");
        assert!(robert.has_condition("atrial fibrillation"));
        assert_eq!(robert.lab("inr").map(|l| l.value), Some(2.3));
        assert_eq!(robert.active_medications.len(), 3);

        assert_eq!(store.list().await.unwrap().len(), 2);
    }
}
