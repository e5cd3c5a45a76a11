//! Core data model: raw sheets as read from disk, and the Indexed Data Table the evaluator reads.
//!
//! Every cell is kept as a raw string ([`RawValue`]); typing happens later, inside the mapping
//! functions, because the same column can feed a date in one template and a label in another.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single raw cell. `None` is the null-like value (empty cell, `nan`, absent).
pub type RawValue = Option<String>;

/// Name of the synthetic row-position column added to pre-indexed sheets.
pub const ROW_INDEX_COLUMN: &str = "index";

/// Returns `true` for the textual null markers produced by spreadsheets and dataframe exports.
pub fn is_null_like(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan")
}

/// Trim a cell and collapse null-like text to `None`.
pub fn normalize_cell(raw: &str) -> RawValue {
    if is_null_like(raw) {
        None
    } else {
        Some(raw.trim().to_owned())
    }
}

/// A named table of rows, before any consolidation.
///
/// Rows are stored in the same column order as [`Sheet::headers`]; short rows are padded with
/// nulls by the readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sheet {
    /// Sheet name (file stem for CSV, worksheet name for Excel).
    pub name: String,
    /// Column names.
    pub headers: Vec<String>,
    /// Row-major cell storage.
    pub rows: Vec<Vec<RawValue>>,
}

impl Sheet {
    /// Create a sheet from headers and rows.
    pub fn new(name: impl Into<String>, headers: Vec<String>, rows: Vec<Vec<RawValue>>) -> Self {
        Self {
            name: name.into(),
            headers,
            rows,
        }
    }

    /// Convenience constructor used heavily by tests: every cell goes through [`normalize_cell`].
    pub fn from_strs(name: &str, headers: &[&str], rows: &[&[&str]]) -> Self {
        Self::new(
            name,
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|row| row.iter().map(|c| normalize_cell(c)).collect())
                .collect(),
        )
    }

    /// Number of rows in the sheet.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Returns the index of a column by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Append the synthetic [`ROW_INDEX_COLUMN`] holding each row's zero-based position.
    ///
    /// Used for sheets listed as pre-indexed in the manifest, which have no natural key of their
    /// own. A sheet that already has such a column is left untouched.
    pub fn add_row_index(&mut self) {
        if self.index_of(ROW_INDEX_COLUMN).is_some() {
            return;
        }
        self.headers.push(ROW_INDEX_COLUMN.to_string());
        for (pos, row) in self.rows.iter_mut().enumerate() {
            row.resize(self.headers.len() - 1, None);
            row.push(Some(pos.to_string()));
        }
    }
}

/// All rows one subject has in one sheet, stored column-wise.
///
/// Invariant: every list in `fields` has exactly `row_count` entries, in encounter order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRows {
    pub row_count: usize,
    pub fields: BTreeMap<String, Vec<RawValue>>,
}

impl SubjectRows {
    /// Raw values of `field`, one per row.
    pub fn values(&self, field: &str) -> Option<&[RawValue]> {
        self.fields.get(field).map(Vec::as_slice)
    }

    /// The non-null value of `field` at `row`, if any.
    pub fn value(&self, field: &str, row: usize) -> Option<&str> {
        self.fields.get(field)?.get(row)?.as_deref()
    }
}

/// The consolidated, subject-keyed view of all sheets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedData {
    /// Name of the subject identifier column shared by all sheets.
    pub identifier: String,
    /// Presence index: column name -> sheets containing it, in sheet order.
    pub columns: BTreeMap<String, Vec<String>>,
    /// Sheet names in the order they were consolidated.
    pub sheets: Vec<String>,
    /// Subjects in first-encounter order.
    pub subjects: Vec<String>,
    /// sheet -> subject -> rows.
    pub data: BTreeMap<String, BTreeMap<String, SubjectRows>>,
}

impl IndexedData {
    /// Sheets that contain `field`, in sheet order.
    pub fn sheets_for(&self, field: &str) -> &[String] {
        self.columns.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The sheet an unqualified reference to `field` resolves to: the first one listing it.
    pub fn resolve_sheet(&self, field: &str) -> Option<&str> {
        self.sheets_for(field).first().map(String::as_str)
    }

    /// Whether `sheet` has a column named `field`.
    pub fn has_column(&self, sheet: &str, field: &str) -> bool {
        self.sheets_for(field).iter().any(|s| s == sheet)
    }

    /// Column names of `sheet`, sorted.
    pub fn sheet_columns(&self, sheet: &str) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|(_, sheets)| sheets.iter().any(|s| s == sheet))
            .map(|(col, _)| col.as_str())
            .collect()
    }

    /// Rows of `subject` in `sheet`, if the subject appears there.
    pub fn rows(&self, sheet: &str, subject: &str) -> Option<&SubjectRows> {
        self.data.get(sheet)?.get(subject)
    }

    /// Number of subjects.
    pub fn subject_count(&self) -> usize {
        self.subjects.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_like_values_are_normalized() {
        assert_eq!(normalize_cell("  Lung "), Some("Lung".to_string()));
        assert_eq!(normalize_cell(""), None);
        assert_eq!(normalize_cell("   "), None);
        assert_eq!(normalize_cell("NaN"), None);
        assert_eq!(normalize_cell("nan"), None);
        assert!(!is_null_like("0"));
    }

    #[test]
    fn add_row_index_appends_positions() {
        let mut sheet = Sheet::from_strs("Labs", &["id", "value"], &[&["A", "1"], &["B", "2"]]);
        sheet.add_row_index();
        assert_eq!(sheet.headers, vec!["id", "value", "index"]);
        assert_eq!(sheet.rows[1][2], Some("1".to_string()));

        sheet.add_row_index();
        assert_eq!(sheet.headers.len(), 3);
    }
}
