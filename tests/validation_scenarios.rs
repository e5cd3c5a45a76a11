use clinical_etl::validation::{
    moh, JsonSchemaValidator, RuleRegistry, ValidationEngine, ValidationSchema,
};
use serde_json::json;

#[test]
fn deceased_no_with_date_of_death_is_one_warning() {
    let (schema, rules) = moh::profile();
    let packets = vec![json!({
        "submitter_donor_id": "D2",
        "is_deceased": "No",
        "date_of_death": "2022-03-01"
    })];

    let report = ValidationEngine::new(&schema, &rules).validate(&packets);

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].location, "D2");
    assert!(report.warnings[0].message.contains("date_of_death"));
}

#[test]
fn duplicated_follow_up_ids_across_subjects_fail_once() {
    let (schema, rules) = moh::profile();
    let packets = vec![
        json!({"submitter_donor_id": "D1", "followups": [{"submitter_follow_up_id": "FU-9"}]}),
        json!({"submitter_donor_id": "D2", "followups": [{"submitter_follow_up_id": "FU-9"}]}),
    ];

    let report = ValidationEngine::new(&schema, &rules).validate(&packets);

    assert_eq!(report.errors.len(), 1);
    assert_eq!(
        report.errors[0].to_string(),
        "Duplicated IDs: in schema followups, FU-9 occurs 2 times"
    );
    assert_eq!(report.identifiers["followups"]["FU-9"], 2);
}

#[test]
fn structural_failure_skips_only_that_subject() {
    let descriptor = ValidationSchema::from_path("tests/fixtures/validation.yml").unwrap();
    let mut rules = RuleRegistry::new();
    rules.register("donors", |donor, scope| {
        if !donor.contains_key("date_of_birth") {
            scope.warn("date_of_birth missing");
        }
    });
    let structural = JsonSchemaValidator::new(&json!({
        "type": "object",
        "properties": {"is_deceased": {"type": "boolean"}}
    }))
    .unwrap();

    let packets = vec![
        json!({"submitter_donor_id": "D1", "is_deceased": "maybe"}),
        json!({"submitter_donor_id": "D2", "is_deceased": false}),
    ];
    let report = ValidationEngine::new(&descriptor, &rules)
        .with_structural(&structural)
        .validate(&packets);

    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].to_string().starts_with("D1: /is_deceased: "));
    // Only D2 was walked.
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].location, "D2");
    assert_eq!(report.identifiers["donors"].len(), 1);
}

#[test]
fn coverage_is_aggregated_over_the_run() {
    let descriptor = ValidationSchema::from_path("tests/fixtures/validation.yml").unwrap();
    let rules = RuleRegistry::new();
    let packets = vec![
        json!({
            "submitter_donor_id": "D1",
            "date_of_birth": "1950-03",
            "primary_diagnoses": [
                {"submitter_primary_diagnosis_id": "DX1", "date_of_diagnosis": "2020-01"},
                {"submitter_primary_diagnosis_id": "DX2"}
            ]
        }),
        json!({"submitter_donor_id": "D2"}),
    ];

    let report = ValidationEngine::new(&descriptor, &rules).validate(&packets);

    assert!(report.is_valid());
    let donors = &report.coverage["donors"];
    assert_eq!((donors["date_of_birth"].seen, donors["date_of_birth"].missing), (1, 1));
    let dx = &report.coverage["primary_diagnoses"]["date_of_diagnosis"];
    assert_eq!((dx.seen, dx.missing), (1, 1));
}
