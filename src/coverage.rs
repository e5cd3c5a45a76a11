//! Which input columns a compiled template actually reads.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::template::ScaffoldNode;
use crate::types::{IndexedData, ROW_INDEX_COLUMN};

/// Column usage of one sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SheetUsage {
    pub sheet: String,
    pub columns_used: Vec<String>,
    pub columns_unused: Vec<String>,
    pub total_columns: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageReport {
    pub sheets: Vec<SheetUsage>,
    /// Template fields found in no sheet, as written in the template.
    pub unknown_fields: Vec<String>,
}

/// Compare the fields referenced by `scaffold` with the columns of `indexed`.
///
/// The identifier and the synthetic row index column are not counted.
pub fn sheet_usage(scaffold: &ScaffoldNode, indexed: &IndexedData) -> UsageReport {
    let mut used: BTreeSet<(String, String)> = BTreeSet::new();
    let mut unknown: BTreeSet<String> = BTreeSet::new();

    for param in scaffold.params() {
        match param.sheet.as_deref() {
            Some(sheet) if indexed.has_column(sheet, &param.field) => {
                used.insert((sheet.to_string(), param.field.clone()));
            }
            Some(_) => {
                unknown.insert(param.to_string());
            }
            None => match indexed.resolve_sheet(&param.field) {
                Some(sheet) => {
                    used.insert((sheet.to_string(), param.field.clone()));
                }
                None => {
                    unknown.insert(param.to_string());
                }
            },
        }
    }

    let sheets = indexed
        .sheets
        .iter()
        .map(|sheet| {
            let (columns_used, columns_unused): (Vec<String>, Vec<String>) = indexed
                .sheet_columns(sheet)
                .into_iter()
                .filter(|c| *c != indexed.identifier && *c != ROW_INDEX_COLUMN)
                .map(str::to_string)
                .partition(|c| used.contains(&(sheet.clone(), c.clone())));
            SheetUsage {
                sheet: sheet.clone(),
                total_columns: columns_used.len() + columns_unused.len(),
                columns_used,
                columns_unused,
            }
        })
        .collect();

    UsageReport {
        sheets,
        unknown_fields: unknown.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidate::consolidate;
    use crate::functions::FunctionRegistry;
    use crate::template::{compile, Template};
    use crate::types::Sheet;

    #[test]
    fn counts_used_columns_per_sheet() {
        let mut diagnosis = Sheet::from_strs(
            "Diagnosis",
            &["id", "dx_id", "site", "grade"],
            &[&["D1", "DX1", "Lung", "2"]],
        );
        diagnosis.add_row_index();
        let data = consolidate(
            &[
                Sheet::from_strs("Donor", &["id", "sex", "birth"], &[&["D1", "F", "1950"]]),
                diagnosis,
            ],
            "id",
        )
        .unwrap();

        let template = Template::parse(
            "sex, {single_val(sex)}\n\
             dx.INDEX, {indexed_on(Diagnosis.index)}\n\
             dx.site, {single_val(Diagnosis.site)}\n\
             dx.stage, {single_val(stage)}",
        )
        .unwrap();
        let scaffold = compile(&template, &FunctionRegistry::with_builtins()).unwrap();

        let usage = sheet_usage(&scaffold, &data);
        assert_eq!(usage.unknown_fields, vec!["stage".to_string()]);

        let donor = &usage.sheets[0];
        assert_eq!(donor.sheet, "Donor");
        assert_eq!(donor.columns_used, vec!["sex"]);
        assert_eq!(donor.columns_unused, vec!["birth"]);
        assert_eq!(donor.total_columns, 2);

        let dx = &usage.sheets[1];
        assert_eq!(dx.columns_used, vec!["site"]);
        assert_eq!(dx.columns_unused, vec!["dx_id", "grade"]);
        assert_eq!(dx.total_columns, 3);
    }
}
