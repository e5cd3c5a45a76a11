//! Unified ingestion entrypoint.
//!
//! Most callers should use [`ingest_sheets`], which reads an input path into raw [`Sheet`]s.
//!
//! - If [`IngestionOptions::format`] is `None`, the format is inferred: a directory is a set of
//!   CSV sheets, otherwise the file extension decides.
//! - Sheets named in [`IngestionOptions::indexed`] get the synthetic row-index column.
//! - If an [`super::observability::IngestionObserver`] is provided, success/failure/alerts are
//!   reported to it.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::error::{EtlError, EtlResult};
use crate::types::Sheet;

use super::csv;
use super::observability::{IngestionContext, IngestionObserver, IngestionSeverity, IngestionStats};

/// Supported input layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionFormat {
    /// A directory with one `.csv` file per sheet.
    CsvDirectory,
    /// A single `.csv` file (one sheet).
    Csv,
    /// Spreadsheet/workbook formats, one sheet per worksheet (feature-gated behind `excel`).
    Excel,
}

impl IngestionFormat {
    /// Parse an ingestion format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "xlsx" | "xls" | "xlsm" | "xlsb" | "ods" => Some(Self::Excel),
            _ => None,
        }
    }
}

/// Options controlling unified ingestion behavior.
///
/// Use [`Default`] for common cases.
#[derive(Clone)]
pub struct IngestionOptions {
    /// If `None`, auto-detect the format from the path.
    pub format: Option<IngestionFormat>,
    /// Sheets that receive the synthetic `index` column.
    pub indexed: Vec<String>,
    /// Optional observer for logging/alerts.
    pub observer: Option<Arc<dyn IngestionObserver>>,
    /// Severity threshold at which `on_alert` is invoked.
    pub alert_at_or_above: IngestionSeverity,
}

impl fmt::Debug for IngestionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionOptions")
            .field("format", &self.format)
            .field("indexed", &self.indexed)
            .field("observer_set", &self.observer.is_some())
            .field("alert_at_or_above", &self.alert_at_or_above)
            .finish()
    }
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            format: None,
            indexed: Vec::new(),
            observer: None,
            alert_at_or_above: IngestionSeverity::Critical,
        }
    }
}

/// Read an input path into raw sheets.
///
/// When an observer is configured, this function reports:
///
/// - `on_success` on success, with sheet and row counts
/// - `on_failure` on failure, with a computed severity
/// - `on_alert` on failure when the computed severity is >= `options.alert_at_or_above`
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use clinical_etl::ingestion::{ingest_sheets, IngestionOptions, TracingObserver};
///
/// # fn main() -> Result<(), clinical_etl::EtlError> {
/// let opts = IngestionOptions {
///     indexed: vec!["Biomarkers".to_string()],
///     observer: Some(Arc::new(TracingObserver)),
///     ..Default::default()
/// };
/// let sheets = ingest_sheets("raw_data/", &opts)?;
/// println!("sheets={}", sheets.len());
/// # Ok(())
/// # }
/// ```
pub fn ingest_sheets(path: impl AsRef<Path>, options: &IngestionOptions) -> EtlResult<Vec<Sheet>> {
    let path = path.as_ref();
    let fmt = match options.format {
        Some(f) => f,
        None => infer_format_from_path(path)?,
    };

    let ctx = IngestionContext {
        path: path.to_path_buf(),
        format: fmt,
    };

    let result = match fmt {
        IngestionFormat::CsvDirectory => csv::read_csv_directory(path),
        IngestionFormat::Csv => csv::read_csv_sheet(path).map(|s| vec![s]),
        IngestionFormat::Excel => read_excel_dispatch(path),
    }
    .map(|sheets| apply_row_index(sheets, &options.indexed));

    if let Some(obs) = options.observer.as_ref() {
        match &result {
            Ok(sheets) => obs.on_success(
                &ctx,
                IngestionStats {
                    sheets: sheets.len(),
                    rows: sheets.iter().map(Sheet::row_count).sum(),
                },
            ),
            Err(e) => {
                let sev = severity_for_error(e);
                obs.on_failure(&ctx, sev, e);
                if sev >= options.alert_at_or_above {
                    obs.on_alert(&ctx, sev, e);
                }
            }
        }
    }

    result
}

fn apply_row_index(mut sheets: Vec<Sheet>, indexed: &[String]) -> Vec<Sheet> {
    for name in indexed {
        match sheets.iter_mut().find(|s| &s.name == name) {
            Some(sheet) => sheet.add_row_index(),
            None => warn!(sheet = %name, "pre-indexed sheet not found in input"),
        }
    }
    sheets
}

fn severity_for_error(e: &EtlError) -> IngestionSeverity {
    match e {
        EtlError::Io(_) => IngestionSeverity::Critical,
        EtlError::Csv(err) => match err.kind() {
            ::csv::ErrorKind::Io(_) => IngestionSeverity::Critical,
            _ => IngestionSeverity::Error,
        },
        _ => IngestionSeverity::Error,
    }
}

fn infer_format_from_path(path: &Path) -> EtlResult<IngestionFormat> {
    if path.is_dir() {
        return Ok(IngestionFormat::CsvDirectory);
    }

    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| {
            EtlError::config(format!(
                "cannot infer format: path has no extension ({})",
                path.display()
            ))
        })?;

    IngestionFormat::from_extension(ext).ok_or_else(|| {
        EtlError::config(format!(
            "cannot infer format from extension '{ext}' for path ({})",
            path.display()
        ))
    })
}

fn read_excel_dispatch(path: &Path) -> EtlResult<Vec<Sheet>> {
    #[cfg(feature = "excel")]
    {
        super::excel::read_workbook(path, None)
    }

    #[cfg(not(feature = "excel"))]
    {
        Err(EtlError::config(format!(
            "excel ingestion not enabled (enable cargo feature 'excel') for {}",
            path.display()
        )))
    }
}
