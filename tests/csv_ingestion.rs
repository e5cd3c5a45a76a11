use clinical_etl::ingestion::csv::{read_csv_directory, read_csv_sheet, read_csv_sheet_from_reader};
use clinical_etl::EtlError;

#[test]
fn read_csv_sheet_happy_path() {
    let sheet = read_csv_sheet("tests/fixtures/people.csv").unwrap();

    assert_eq!(sheet.name, "people");
    assert_eq!(sheet.headers, vec!["id", "name", "score"]);
    assert_eq!(sheet.row_count(), 2);
    assert_eq!(
        sheet.rows[0],
        vec![Some("1".to_string()), Some("Ada".to_string()), Some("98.5".to_string())]
    );
    assert_eq!(sheet.rows[1][2], None);
}

#[test]
fn read_csv_keeps_every_cell_as_text() {
    let input = "id,flag,value\nD1,true,007\n";
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(input.as_bytes());

    let sheet = read_csv_sheet_from_reader(&mut rdr, "Labs").unwrap();
    assert_eq!(sheet.rows[0][1].as_deref(), Some("true"));
    assert_eq!(sheet.rows[0][2].as_deref(), Some("007"));
}

#[test]
fn read_csv_directory_sorts_sheets_by_file_name() {
    let sheets = read_csv_directory("tests/fixtures/raw_data").unwrap();
    let names: Vec<&str> = sheets.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Diagnosis", "Donor", "FollowUp", "Treatment"]);
}

#[test]
fn read_csv_directory_without_csv_files_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "not a sheet").unwrap();

    let err = read_csv_directory(dir.path()).unwrap_err();
    assert!(matches!(err, EtlError::Config { .. }));
}

#[test]
fn read_csv_sheet_errors_on_missing_file() {
    let err = read_csv_sheet("tests/fixtures/does_not_exist.csv").unwrap_err();
    assert!(matches!(err, EtlError::Csv(_)));
}
