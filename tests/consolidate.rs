use clinical_etl::consolidate::consolidate;
use clinical_etl::ingestion::{ingest_sheets, IngestionOptions};
use clinical_etl::types::Sheet;
use clinical_etl::EtlError;

fn fixture_sheets() -> Vec<Sheet> {
    ingest_sheets("tests/fixtures/raw_data", &IngestionOptions::default()).unwrap()
}

#[test]
fn every_field_list_has_one_value_per_subject_row() {
    let indexed = consolidate(&fixture_sheets(), "id").unwrap();

    assert_eq!(indexed.subjects, vec!["D1", "D2", "D3"]);
    for (sheet, subjects) in &indexed.data {
        for (subject, rows) in subjects {
            for (field, values) in &rows.fields {
                assert_eq!(
                    values.len(),
                    rows.row_count,
                    "{sheet}/{subject}/{field} has {} values for {} rows",
                    values.len(),
                    rows.row_count
                );
            }
        }
    }
}

#[test]
fn column_presence_index_lists_every_sheet() {
    let indexed = consolidate(&fixture_sheets(), "id").unwrap();

    assert_eq!(indexed.sheets_for("dx_id"), &["Diagnosis".to_string(), "Treatment".to_string()]);
    assert_eq!(indexed.resolve_sheet("dx_id"), Some("Diagnosis"));
    assert_eq!(indexed.sheets_for("id").len(), 4);
    assert!(indexed.has_column("Treatment", "tx_type"));
    assert!(indexed.rows("Treatment", "D3").is_none());
    assert_eq!(indexed.rows("Diagnosis", "D1").unwrap().row_count, 2);
}

#[test]
fn sheet_without_identifier_column_fails() {
    let sheets = vec![
        Sheet::from_strs("Donor", &["id", "sex"], &[&["D1", "F"]]),
        Sheet::from_strs("Labs", &["patient", "value"], &[&["D1", "3.2"]]),
    ];

    match consolidate(&sheets, "id").unwrap_err() {
        EtlError::MissingIdentifier { sheet, identifier } => {
            assert_eq!(sheet, "Labs");
            assert_eq!(identifier, "id");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn indexed_data_serializes_for_the_indexed_artifact() {
    let indexed = consolidate(&fixture_sheets(), "id").unwrap();
    let json = serde_json::to_value(&indexed).unwrap();

    assert_eq!(json["identifier"], "id");
    assert_eq!(json["data"]["Diagnosis"]["D1"]["fields"]["primary_site"], serde_json::json!(["Lung", "Liver"]));
}
