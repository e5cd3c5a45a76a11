//! Tabular consolidation: raw sheets -> [`IndexedData`].
//!
//! Each sheet is normalized, sorted by the subject identifier and grouped so that every subject
//! owns, per sheet, one column-wise list of raw values per field.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info, warn};

use crate::error::{EtlError, EtlResult};
use crate::types::{IndexedData, RawValue, Sheet, SubjectRows};

/// Build the Indexed Data Table from raw sheets.
///
/// Rules:
///
/// - cells are trimmed; null-like cells become null;
/// - all-null rows, all-null columns and exact duplicate rows are dropped;
/// - every sheet must carry the `identifier` column, otherwise the run fails with
///   [`EtlError::MissingIdentifier`];
/// - rows without an identifier value are skipped with a warning;
/// - a subject with several rows in a sheet is logged (it is expected for child sheets).
pub fn consolidate(sheets: &[Sheet], identifier: &str) -> EtlResult<IndexedData> {
    let mut indexed = IndexedData {
        identifier: identifier.to_string(),
        ..Default::default()
    };
    let mut seen_subjects: HashSet<String> = HashSet::new();

    for raw in sheets {
        info!(sheet = %raw.name, rows = raw.row_count(), "processing sheet");
        let sheet = normalize_sheet(raw, identifier);
        let id_idx = sheet
            .index_of(identifier)
            .ok_or_else(|| EtlError::MissingIdentifier {
                sheet: sheet.name.clone(),
                identifier: identifier.to_string(),
            })?;

        for header in &sheet.headers {
            indexed
                .columns
                .entry(header.clone())
                .or_default()
                .push(sheet.name.clone());
        }

        let grouped = group_by_subject(&sheet, id_idx);
        for subject in grouped.keys() {
            if seen_subjects.insert(subject.clone()) {
                indexed.subjects.push(subject.clone());
            }
        }
        indexed.sheets.push(sheet.name.clone());
        indexed.data.insert(sheet.name.clone(), grouped);
    }

    for (column, in_sheets) in &indexed.columns {
        if column != identifier && in_sheets.len() > 1 {
            warn!(
                column = %column,
                sheets = %in_sheets.join(", "),
                "column present in multiple sheets; unqualified references use '{}'",
                in_sheets[0]
            );
        }
    }

    info!(
        sheets = indexed.sheets.len(),
        subjects = indexed.subjects.len(),
        "indexed data built"
    );
    Ok(indexed)
}

fn normalize_sheet(sheet: &Sheet, identifier: &str) -> Sheet {
    let mut headers: Vec<String> = Vec::with_capacity(sheet.headers.len());
    let mut keep_cols: Vec<usize> = Vec::with_capacity(sheet.headers.len());
    for (idx, header) in sheet.headers.iter().enumerate() {
        let header = header.trim();
        if header.is_empty() {
            continue;
        }
        if headers.iter().any(|h| h == header) {
            warn!(sheet = %sheet.name, column = header, "duplicate column header; keeping the first");
            continue;
        }
        let all_null = sheet
            .rows
            .iter()
            .all(|row| clean(row.get(idx)).is_none());
        if all_null && header != identifier {
            debug!(sheet = %sheet.name, column = header, "dropping empty column");
            continue;
        }
        headers.push(header.to_string());
        keep_cols.push(idx);
    }

    let mut seen_rows: HashSet<Vec<RawValue>> = HashSet::new();
    let mut rows = Vec::with_capacity(sheet.rows.len());
    for row in &sheet.rows {
        let cleaned: Vec<RawValue> = keep_cols.iter().map(|&idx| clean(row.get(idx))).collect();
        if cleaned.iter().all(Option::is_none) {
            continue;
        }
        if !seen_rows.insert(cleaned.clone()) {
            debug!(sheet = %sheet.name, "dropping identical row");
            continue;
        }
        rows.push(cleaned);
    }

    Sheet::new(sheet.name.clone(), headers, rows)
}

fn clean(cell: Option<&RawValue>) -> RawValue {
    cell.and_then(|c| c.as_deref())
        .and_then(crate::types::normalize_cell)
}

fn group_by_subject(sheet: &Sheet, id_idx: usize) -> BTreeMap<String, SubjectRows> {
    let mut keyed: Vec<(&str, &Vec<RawValue>)> = Vec::with_capacity(sheet.rows.len());
    for (pos, row) in sheet.rows.iter().enumerate() {
        match row[id_idx].as_deref() {
            Some(id) => keyed.push((id, row)),
            None => warn!(
                sheet = %sheet.name,
                row = pos + 2,
                "row has no identifier value; skipping"
            ),
        }
    }
    // Stable: rows of one subject keep their encounter order.
    keyed.sort_by(|a, b| a.0.cmp(b.0));

    let mut grouped: BTreeMap<String, SubjectRows> = BTreeMap::new();
    for (id, row) in keyed {
        let entry = grouped.entry(id.to_string()).or_insert_with(|| SubjectRows {
            row_count: 0,
            fields: sheet
                .headers
                .iter()
                .map(|h| (h.clone(), Vec::new()))
                .collect(),
        });
        entry.row_count += 1;
        for (header, cell) in sheet.headers.iter().zip(row.iter()) {
            if let Some(values) = entry.fields.get_mut(header) {
                values.push(cell.clone());
            }
        }
    }

    for (id, rows) in &grouped {
        if rows.row_count > 1 {
            warn!(subject = %id, sheet = %sheet.name, rows = rows.row_count, "multiple rows for subject");
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::consolidate;
    use crate::error::EtlError;
    use crate::types::Sheet;

    fn donor_sheets() -> Vec<Sheet> {
        vec![
            Sheet::from_strs(
                "Donor",
                &["id", "birth_date", "notes"],
                &[&["D2", "1960-02-01", ""], &["D1", "1955-05-20", "nan"]],
            ),
            Sheet::from_strs(
                "Diagnosis",
                &["id", "diagnosis_date", "primary_site"],
                &[
                    &["D1", "2020-01-15", "Lung"],
                    &["D3", "2019-03-03", "Skin"],
                    &["D1", "2021-06-02", "Liver"],
                    &["D1", "2021-06-02", "Liver"],
                    &["", "", ""],
                ],
            ),
        ]
    }

    #[test]
    fn groups_rows_per_subject_in_encounter_order() {
        let indexed = consolidate(&donor_sheets(), "id").unwrap();
        let d1 = indexed.rows("Diagnosis", "D1").unwrap();
        assert_eq!(d1.row_count, 2);
        assert_eq!(
            d1.values("primary_site").unwrap(),
            &[Some("Lung".to_string()), Some("Liver".to_string())]
        );
        assert_eq!(d1.values("id").unwrap().len(), 2);
    }

    #[test]
    fn subjects_follow_sheet_order_then_identifier_order() {
        let indexed = consolidate(&donor_sheets(), "id").unwrap();
        assert_eq!(indexed.subjects, vec!["D1", "D2", "D3"]);
        assert_eq!(indexed.sheets, vec!["Donor", "Diagnosis"]);
    }

    #[test]
    fn empty_columns_are_dropped_and_presence_is_indexed() {
        let indexed = consolidate(&donor_sheets(), "id").unwrap();
        assert!(!indexed.columns.contains_key("notes"));
        assert_eq!(indexed.sheets_for("id"), &["Donor", "Diagnosis"]);
        assert_eq!(indexed.resolve_sheet("primary_site"), Some("Diagnosis"));
    }

    #[test]
    fn every_field_list_matches_row_count() {
        let indexed = consolidate(&donor_sheets(), "id").unwrap();
        for subjects in indexed.data.values() {
            for rows in subjects.values() {
                for values in rows.fields.values() {
                    assert_eq!(values.len(), rows.row_count);
                }
            }
        }
    }

    #[test]
    fn missing_identifier_is_fatal() {
        let sheets = vec![Sheet::from_strs("Labs", &["patient", "value"], &[&["D1", "3"]])];
        let err = consolidate(&sheets, "id").unwrap_err();
        assert!(matches!(err, EtlError::MissingIdentifier { ref sheet, .. } if sheet == "Labs"));
    }
}
