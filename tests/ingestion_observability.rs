use std::sync::{Arc, Mutex};

use clinical_etl::ingestion::{
    ingest_sheets, CompositeObserver, IngestionContext, IngestionFormat, IngestionObserver, IngestionOptions,
    IngestionSeverity, IngestionStats,
};
use clinical_etl::EtlError;

#[derive(Default)]
struct RecordingObserver {
    successes: Mutex<Vec<IngestionStats>>,
    failures: Mutex<Vec<IngestionSeverity>>,
    alerts: Mutex<Vec<IngestionSeverity>>,
}

impl IngestionObserver for RecordingObserver {
    fn on_success(&self, _ctx: &IngestionContext, stats: IngestionStats) {
        self.successes.lock().unwrap().push(stats);
    }

    fn on_failure(&self, _ctx: &IngestionContext, severity: IngestionSeverity, _error: &EtlError) {
        self.failures.lock().unwrap().push(severity);
    }

    fn on_alert(&self, _ctx: &IngestionContext, severity: IngestionSeverity, _error: &EtlError) {
        self.alerts.lock().unwrap().push(severity);
    }
}

#[test]
fn observer_receives_sheet_and_row_counts_on_success() {
    let obs = Arc::new(RecordingObserver::default());
    let opts = IngestionOptions {
        observer: Some(obs.clone()),
        ..Default::default()
    };

    let sheets = ingest_sheets("tests/fixtures/raw_data", &opts).unwrap();

    assert_eq!(sheets.len(), 4);
    assert_eq!(
        obs.successes.lock().unwrap().clone(),
        vec![IngestionStats { sheets: 4, rows: 12 }]
    );
    assert!(obs.failures.lock().unwrap().is_empty());
}

#[test]
fn observer_receives_failure_and_alert_on_critical_io_error() {
    let obs = Arc::new(RecordingObserver::default());
    let opts = IngestionOptions {
        format: Some(IngestionFormat::Csv),
        observer: Some(obs.clone()),
        alert_at_or_above: IngestionSeverity::Critical,
        ..Default::default()
    };

    // Missing file -> Io error -> Critical
    let _ = ingest_sheets("tests/fixtures/does_not_exist.csv", &opts).unwrap_err();

    let failures = obs.failures.lock().unwrap().clone();
    let alerts = obs.alerts.lock().unwrap().clone();
    assert_eq!(failures, vec![IngestionSeverity::Critical]);
    assert_eq!(alerts, vec![IngestionSeverity::Critical]);
}

#[test]
fn observer_receives_failure_without_alert_for_non_critical_error() {
    let obs = Arc::new(RecordingObserver::default());
    let opts = IngestionOptions {
        observer: Some(obs.clone()),
        alert_at_or_above: IngestionSeverity::Critical,
        ..Default::default()
    };

    // Unknown extension -> Config error -> Error severity (not Critical) -> should not alert
    let _ = ingest_sheets("tests/fixtures/manifest.yml", &opts).unwrap_err();

    let failures = obs.failures.lock().unwrap().clone();
    assert_eq!(failures, vec![IngestionSeverity::Error]);
    assert!(obs.alerts.lock().unwrap().is_empty());
}

#[test]
fn composite_observer_fans_out() {
    let a = Arc::new(RecordingObserver::default());
    let b = Arc::new(RecordingObserver::default());
    let composite = CompositeObserver::new(vec![a.clone(), b.clone()]);
    let opts = IngestionOptions {
        observer: Some(Arc::new(composite)),
        ..Default::default()
    };

    ingest_sheets("tests/fixtures/people.csv", &opts).unwrap();

    assert_eq!(a.successes.lock().unwrap().len(), 1);
    assert_eq!(b.successes.lock().unwrap().len(), 1);
}

#[test]
fn pre_indexed_sheets_get_a_row_position_column() {
    let opts = IngestionOptions {
        indexed: vec!["FollowUp".to_string()],
        ..Default::default()
    };
    let sheets = ingest_sheets("tests/fixtures/raw_data", &opts).unwrap();

    let followup = sheets.iter().find(|s| s.name == "FollowUp").unwrap();
    assert_eq!(followup.headers.last().map(String::as_str), Some("index"));
    assert_eq!(followup.rows[2].last().unwrap().as_deref(), Some("2"));

    let donor = sheets.iter().find(|s| s.name == "Donor").unwrap();
    assert!(donor.index_of("index").is_none());
}
