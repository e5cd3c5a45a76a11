//! Built-in validation profile for the MoH clinical data model.
//!
//! Donors nest diagnoses, which nest specimens and treatments; follow-ups and biomarkers may
//! appear at several levels.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde_json::{Map, Value};

use super::{is_present, KindDescriptor, RuleRegistry, ValidationSchema, ValidationScope};

/// Manifest name of this profile.
pub const PROFILE: &str = "moh";

fn kind(name: &str, id: Option<&str>, required: &[&str], nested: &[&str]) -> KindDescriptor {
    KindDescriptor {
        name: name.to_string(),
        id: id.map(str::to_string),
        required_fields: required.iter().map(|s| s.to_string()).collect(),
        nested_schemas: nested.iter().map(|s| s.to_string()).collect(),
    }
}

/// The kind descriptor of the MoH model, rooted at `donors`.
pub fn validation_schema() -> ValidationSchema {
    let systemic = [
        "drug_reference_database",
        "drug_reference_identifier",
        "drug_name",
    ];
    let mut kinds = BTreeMap::new();
    kinds.insert(
        "donors".to_string(),
        kind(
            "Donor",
            Some("submitter_donor_id"),
            &[
                "submitter_donor_id",
                "gender",
                "sex_at_birth",
                "is_deceased",
                "program_id",
                "date_resolution",
                "date_of_birth",
            ],
            &["primary_diagnoses", "comorbidities", "exposures", "biomarkers", "followups"],
        ),
    );
    kinds.insert(
        "primary_diagnoses".to_string(),
        kind(
            "Primary Diagnosis",
            Some("submitter_primary_diagnosis_id"),
            &[
                "submitter_primary_diagnosis_id",
                "date_of_diagnosis",
                "cancer_type_code",
                "primary_site",
                "basis_of_diagnosis",
            ],
            &["specimens", "treatments", "biomarkers", "followups"],
        ),
    );
    kinds.insert(
        "specimens".to_string(),
        kind(
            "Specimen",
            Some("submitter_specimen_id"),
            &[
                "submitter_specimen_id",
                "specimen_collection_date",
                "specimen_storage",
                "specimen_anatomic_location",
            ],
            &["sample_registrations", "biomarkers"],
        ),
    );
    kinds.insert(
        "sample_registrations".to_string(),
        kind(
            "Sample Registration",
            Some("submitter_sample_id"),
            &["submitter_sample_id", "specimen_tissue_source", "specimen_type", "sample_type"],
            &[],
        ),
    );
    kinds.insert(
        "treatments".to_string(),
        kind(
            "Treatment",
            Some("submitter_treatment_id"),
            &[
                "submitter_treatment_id",
                "treatment_type",
                "is_primary_treatment",
                "treatment_start_date",
                "treatment_end_date",
                "treatment_intent",
            ],
            &[
                "chemotherapies",
                "hormone_therapies",
                "immunotherapies",
                "radiations",
                "surgeries",
                "followups",
                "biomarkers",
            ],
        ),
    );
    kinds.insert("chemotherapies".to_string(), kind("Chemotherapy", None, &systemic, &[]));
    kinds.insert("hormone_therapies".to_string(), kind("Hormone Therapy", None, &systemic, &[]));
    kinds.insert("immunotherapies".to_string(), kind("Immunotherapy", None, &systemic, &[]));
    kinds.insert(
        "radiations".to_string(),
        kind(
            "Radiation",
            None,
            &[
                "radiation_therapy_modality",
                "radiation_therapy_type",
                "anatomical_site_irradiated",
                "radiation_therapy_fractions",
                "radiation_therapy_dosage",
            ],
            &[],
        ),
    );
    kinds.insert(
        "surgeries".to_string(),
        kind(
            "Surgery",
            None,
            &["surgery_reference_database", "surgery_reference_identifier", "surgery_type"],
            &[],
        ),
    );
    kinds.insert("biomarkers".to_string(), kind("Biomarker", None, &[], &[]));
    kinds.insert(
        "followups".to_string(),
        kind(
            "Follow Up",
            Some("submitter_follow_up_id"),
            &["submitter_follow_up_id", "date_of_followup", "disease_status_at_followup"],
            &["biomarkers"],
        ),
    );
    kinds.insert(
        "comorbidities".to_string(),
        kind("Comorbidity", None, &["comorbidity_type_code"], &[]),
    );
    kinds.insert("exposures".to_string(), kind("Exposure", None, &[], &[]));

    ValidationSchema {
        root: "donors".to_string(),
        kinds,
    }
}

/// The per-kind rules of the MoH model.
pub fn rules() -> RuleRegistry {
    let mut rules = RuleRegistry::new();
    rules.register("donors", validate_donor);
    rules.register("primary_diagnoses", validate_primary_diagnosis);
    rules.register("specimens", validate_specimen);
    rules.register("treatments", validate_treatment);
    rules.register("radiations", validate_radiation);
    rules
}

/// Descriptor and rules together.
pub fn profile() -> (ValidationSchema, RuleRegistry) {
    (validation_schema(), rules())
}

fn present(obj: &Map<String, Value>, field: &str) -> bool {
    obj.get(field).is_some_and(is_present)
}

/// Booleans may arrive as JSON booleans or as yes/no text.
fn truth(obj: &Map<String, Value>, field: &str) -> Option<bool> {
    match obj.get(field)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" => Some(true),
            "no" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn date(obj: &Map<String, Value>, field: &str) -> Option<NaiveDate> {
    let raw = obj.get(field)?.as_str()?.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d"))
        .ok()
}

fn validate_donor(donor: &Map<String, Value>, scope: &mut ValidationScope<'_>) {
    match truth(donor, "is_deceased") {
        Some(true) => {
            if !present(donor, "cause_of_death") {
                scope.warn("cause_of_death required if is_deceased = Yes");
            }
            if !present(donor, "date_of_death") {
                scope.warn("date_of_death required if is_deceased = Yes");
            }
        }
        Some(false) => {
            if present(donor, "date_of_death") {
                scope.warn("date_of_death cannot be submitted if is_deceased = No");
            }
        }
        None => {}
    }
}

fn validate_primary_diagnosis(dx: &Map<String, Value>, scope: &mut ValidationScope<'_>) {
    let Some(system) = dx.get("clinical_tumour_staging_system").filter(|v| is_present(v)) else {
        return;
    };
    let has_stage = ["clinical_stage_group", "clinical_t_category", "clinical_n_category", "clinical_m_category"]
        .iter()
        .any(|f| present(dx, f));
    if !has_stage {
        let system = system.as_str().map(str::to_string).unwrap_or_else(|| system.to_string());
        scope.warn(format!(
            "clinical_stage_group or clinical T/N/M categories required for clinical_tumour_staging_system {system}"
        ));
    }
}

fn validate_specimen(specimen: &Map<String, Value>, scope: &mut ValidationScope<'_>) {
    let is_tumour = |obj: &Map<String, Value>| {
        obj.get("tumour_normal_designation")
            .and_then(Value::as_str)
            .is_some_and(|d| d.eq_ignore_ascii_case("tumour"))
    };
    let tumour = is_tumour(specimen)
        || specimen
            .get("sample_registrations")
            .and_then(Value::as_array)
            .is_some_and(|samples| samples.iter().filter_map(Value::as_object).any(is_tumour));
    if tumour && !present(specimen, "reference_pathology_confirmed_diagnosis") {
        scope.warn("Tumour specimens require a reference_pathology_confirmed_diagnosis");
    }
}

const THERAPY_RECORDS: &[(&str, &str)] = &[
    ("Chemotherapy", "chemotherapies"),
    ("Hormonal therapy", "hormone_therapies"),
    ("Immunotherapy", "immunotherapies"),
    ("Radiation therapy", "radiations"),
    ("Surgery", "surgeries"),
];

fn validate_treatment(treatment: &Map<String, Value>, scope: &mut ValidationScope<'_>) {
    if let (Some(start), Some(end)) = (
        date(treatment, "treatment_start_date"),
        date(treatment, "treatment_end_date"),
    ) {
        if end < start {
            scope.fail("treatment_end_date is earlier than treatment_start_date");
        }
    }

    let types: Vec<&str> = match treatment.get("treatment_type") {
        Some(Value::String(s)) => vec![s.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    for treatment_type in types {
        let expected = THERAPY_RECORDS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(treatment_type))
            .map(|(_, key)| *key);
        if let Some(key) = expected {
            if !present(treatment, key) {
                scope.warn(format!(
                    "treatment type {treatment_type} should have one or more {key} submitted"
                ));
            }
        }
    }
}

fn validate_radiation(radiation: &Map<String, Value>, scope: &mut ValidationScope<'_>) {
    if truth(radiation, "radiation_boost") == Some(true)
        && !present(radiation, "reference_radiation_treatment_id")
    {
        scope.warn("reference_radiation_treatment_id required if radiation_boost = Yes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ValidationEngine;
    use serde_json::json;

    fn run(packets: &[Value]) -> crate::validation::ValidationReport {
        let (schema, rules) = profile();
        ValidationEngine::new(&schema, &rules).validate(packets)
    }

    #[test]
    fn descriptor_is_consistent() {
        validation_schema().check().unwrap();
    }

    #[test]
    fn deceased_donor_needs_cause_and_date() {
        let report = run(&[json!({"submitter_donor_id": "D3", "is_deceased": true})]);
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings.iter().all(|w| w.location == "D3"));
    }

    #[test]
    fn treatment_dates_and_types() {
        let report = run(&[json!({
            "submitter_donor_id": "D4",
            "primary_diagnoses": [{
                "submitter_primary_diagnosis_id": "DX4",
                "clinical_tumour_staging_system": "AJCC 8th edition",
                "treatments": [{
                    "submitter_treatment_id": "TR4",
                    "treatment_type": ["Surgery", "Radiation therapy"],
                    "treatment_start_date": "2021-05",
                    "treatment_end_date": "2021-02",
                    "surgeries": [{"surgery_type": "Biopsy"}],
                    "radiations": [{"radiation_boost": "Yes"}]
                }]
            }]
        })]);

        assert_eq!(report.errors.len(), 1);
        assert_eq!(
            report.errors[0].to_string(),
            "D4 > DX4 > TR4: treatment_end_date is earlier than treatment_start_date"
        );
        let warnings: Vec<String> = report.warnings.iter().map(ToString::to_string).collect();
        assert_eq!(warnings.len(), 2, "{warnings:?}");
        assert!(warnings[0].starts_with("D4 > DX4: clinical_stage_group"));
        assert_eq!(
            warnings[1],
            "D4 > DX4 > TR4 > Radiation 0: reference_radiation_treatment_id required if radiation_boost = Yes"
        );
    }

    #[test]
    fn tumour_specimen_needs_confirmed_diagnosis() {
        let report = run(&[json!({
            "submitter_donor_id": "D5",
            "primary_diagnoses": [{
                "submitter_primary_diagnosis_id": "DX5",
                "specimens": [{
                    "submitter_specimen_id": "SP5",
                    "sample_registrations": [{"submitter_sample_id": "S5", "tumour_normal_designation": "Tumour"}]
                }]
            }]
        })]);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].location, "D5 > DX5 > SP5");
    }
}
