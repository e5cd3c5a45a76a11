#![cfg(feature = "excel")]

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use chrono::{Days, NaiveDate};
use tracing::warn;

use crate::error::{EtlError, EtlResult};
use crate::functions::integral;
use crate::types::{normalize_cell, RawValue, Sheet};

/// Read an Excel document (`.xlsx`, `.xls`, `.ods`, etc.) as one sheet per worksheet.
///
/// Behavior:
/// - If `sheet_names` is `None`, reads **all worksheets** in workbook order
/// - Detects the first non-empty row of each worksheet as its header row
/// - Worksheets with no non-empty row are skipped with a warning
/// - Every cell is converted to text; date cells become ISO `YYYY-MM-DD`
pub fn read_workbook(path: impl AsRef<Path>, sheet_names: Option<&[&str]>) -> EtlResult<Vec<Sheet>> {
    let mut workbook = open_workbook_auto(path)?;

    let names: Vec<String> = match sheet_names {
        Some(names) => names.iter().map(|s| s.to_string()).collect(),
        None => workbook.sheet_names().to_vec(),
    };
    if names.is_empty() {
        return Err(EtlError::config("workbook has no sheets"));
    }

    let mut sheets = Vec::with_capacity(names.len());
    for name in names {
        let range = workbook.worksheet_range(&name)?;
        match sheet_from_range(&name, &range) {
            Some(sheet) => sheets.push(sheet),
            None => warn!(sheet = %name, "worksheet has no header row; skipping"),
        }
    }
    Ok(sheets)
}

fn sheet_from_range(name: &str, range: &calamine::Range<Data>) -> Option<Sheet> {
    let mut rows_iter = range
        .rows()
        .skip_while(|row| row.iter().all(|c| matches!(c, Data::Empty)));

    let header_row = rows_iter.next()?;
    let headers: Vec<String> = header_row.iter().map(cell_to_header_string).collect();

    let rows: Vec<Vec<RawValue>> = rows_iter
        .map(|row| {
            (0..headers.len())
                .map(|idx| row.get(idx).and_then(cell_to_raw))
                .collect()
        })
        .collect();

    Some(Sheet::new(name, headers, rows))
}

fn cell_to_header_string(c: &Data) -> String {
    cell_to_raw(c).unwrap_or_default()
}

fn cell_to_raw(c: &Data) -> RawValue {
    match c {
        Data::Empty => None,
        Data::String(s) => normalize_cell(s),
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) => Some(match integral(*f) {
            Some(i) => i.to_string(),
            None => f.to_string(),
        }),
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(dt) => Some(excel_serial_to_iso(dt.as_f64())),
        Data::DateTimeIso(s) => normalize_cell(s),
        Data::DurationIso(s) => normalize_cell(s),
        Data::Error(_) => None,
    }
}

/// Excel stores dates as days since 1899-12-30 (accounting for the 1900 leap-year quirk).
fn excel_serial_to_iso(serial: f64) -> String {
    let base = NaiveDate::from_ymd_opt(1899, 12, 30);
    match base.and_then(|b| b.checked_add_days(Days::new(serial.trunc().max(0.0) as u64))) {
        Some(date) => date.format("%Y-%m-%d").to_string(),
        None => serial.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{cell_to_raw, excel_serial_to_iso};
    use calamine::Data;

    #[test]
    fn float_cells_keep_out_of_range_values() {
        assert_eq!(cell_to_raw(&Data::Float(64.0)).as_deref(), Some("64"));
        assert_eq!(cell_to_raw(&Data::Float(57.5)).as_deref(), Some("57.5"));
        assert_eq!(
            cell_to_raw(&Data::Float(1e20)).as_deref(),
            Some("100000000000000000000")
        );
    }

    #[test]
    fn converts_excel_serial_dates() {
        assert_eq!(excel_serial_to_iso(43845.0), "2020-01-15");
        assert_eq!(excel_serial_to_iso(44349.5), "2021-06-02");
    }
}
