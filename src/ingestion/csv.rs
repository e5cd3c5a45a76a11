//! CSV ingestion: one file is one sheet; a directory of files is a workbook.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{EtlError, EtlResult};
use crate::types::{normalize_cell, RawValue, Sheet};

/// Read a single CSV file as a sheet named after the file stem.
///
/// Rules:
///
/// - the first record is the header row;
/// - every cell is kept as text (trimmed, null-like cells become null);
/// - ragged rows are padded with nulls or truncated to the header width.
pub fn read_csv_sheet(path: impl AsRef<Path>) -> EtlResult<Sheet> {
    let path = path.as_ref();
    let name = sheet_name_for(path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    read_csv_sheet_from_reader(&mut rdr, &name)
}

/// Read CSV data from an existing reader into a sheet called `name`.
pub fn read_csv_sheet_from_reader<R: std::io::Read>(
    rdr: &mut csv::Reader<R>,
    name: &str,
) -> EtlResult<Sheet> {
    let headers: Vec<String> = rdr
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let mut rows: Vec<Vec<RawValue>> = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let mut row: Vec<RawValue> = Vec::with_capacity(headers.len());
        for idx in 0..headers.len() {
            row.push(record.get(idx).and_then(normalize_cell));
        }
        rows.push(row);
    }

    Ok(Sheet::new(name, headers, rows))
}

/// Read every `*.csv` file directly inside `dir`, sorted by file name.
///
/// Subdirectories are not descended into.
pub fn read_csv_directory(dir: impl AsRef<Path>) -> EtlResult<Vec<Sheet>> {
    let dir = dir.as_ref();
    let mut files: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| match e.into_io_error() {
            Some(io) => EtlError::Io(io),
            None => EtlError::config(format!("cannot walk directory {}", dir.display())),
        })?;
        let is_csv = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if entry.file_type().is_file() && is_csv {
            files.push(entry.into_path());
        }
    }

    if files.is_empty() {
        return Err(EtlError::config(format!(
            "no .csv files found in {}",
            dir.display()
        )));
    }

    files.iter().map(read_csv_sheet).collect()
}

fn sheet_name_for(path: &Path) -> EtlResult<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| EtlError::config(format!("cannot derive a sheet name from {}", path.display())))
}
