//! Mapping function library and registry.
//!
//! A mapping function receives the raw values its parameters resolved to (see
//! [`ResolvedValues`]) and either computes an output value ([`FunctionKind::Value`]) or, for
//! indexed arrays, describes the candidate keys to iterate over ([`FunctionKind::Index`]).
//!
//! Built-ins are registered under their bare name. Host programs add their own functions as
//! plugins, grouped in a module and addressed as `module.function` from templates:
//!
//! ```
//! use clinical_etl::functions::{single_val, FunctionRegistry};
//! use serde_json::Value;
//!
//! let mut registry = FunctionRegistry::default();
//! registry.register_plugin_value("site", "upper_site", |values| {
//!     Ok(match single_val(values)? {
//!         Value::String(s) => Value::String(s.to_uppercase()),
//!         other => other,
//!     })
//! });
//! assert!(registry.resolve("site.upper_site").is_some());
//! assert!(registry.resolve("upper_site").is_some());
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{json, Map, Number, Value};
use tracing::warn;

use crate::error::MappingError;
use crate::types::{is_null_like, RawValue};

/// Values gathered for one parameter: the sheets it resolved to and their raw values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedField {
    pub field: String,
    pub sheets: Vec<(String, Vec<RawValue>)>,
}

impl ResolvedField {
    /// All raw values of this field across its sheets, nulls included.
    pub fn raw(&self) -> impl Iterator<Item = &RawValue> {
        self.sheets.iter().flat_map(|(_, values)| values.iter())
    }

    /// Non-null values across all sheets, in order.
    pub fn non_null(&self) -> Vec<&str> {
        self.raw()
            .filter_map(|v| v.as_deref())
            .filter(|v| !is_null_like(v))
            .collect()
    }
}

/// Ordered field -> sheet -> raw values map handed to mapping functions.
///
/// Parameter order is preserved; a parameter whose field exists in no sheet is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedValues {
    fields: Vec<ResolvedField>,
}

impl ResolvedValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `values` for `field` from `sheet`, appending to an existing entry for `field`.
    pub fn insert(&mut self, field: &str, sheet: &str, values: Vec<RawValue>) {
        match self.fields.iter_mut().find(|f| f.field == field) {
            Some(existing) => existing.sheets.push((sheet.to_string(), values)),
            None => self.fields.push(ResolvedField {
                field: field.to_string(),
                sheets: vec![(sheet.to_string(), values)],
            }),
        }
    }

    pub fn fields(&self) -> &[ResolvedField] {
        &self.fields
    }

    /// The first parameter, which most functions operate on.
    pub fn first(&self) -> Option<&ResolvedField> {
        self.fields.first()
    }

    pub fn get(&self, field: &str) -> Option<&ResolvedField> {
        self.fields.iter().find(|f| f.field == field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// JSON rendering `{field: {sheet: [values]}}`, used by `placeholder`.
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        for field in &self.fields {
            let mut sheets = Map::new();
            for (sheet, values) in &field.sheets {
                let values = values
                    .iter()
                    .map(|v| v.clone().map(Value::String).unwrap_or(Value::Null))
                    .collect();
                sheets.insert(sheet.clone(), Value::Array(values));
            }
            out.insert(field.field.clone(), Value::Object(sheets));
        }
        Value::Object(out)
    }
}

/// Result of an index function: the candidate keys of one indexed-array level.
///
/// `values` is aligned with the subject's rows in `sheet`; a null entry is not a candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexDescriptor {
    pub field: String,
    pub sheet: String,
    pub values: Vec<RawValue>,
}

pub type ValueFn = Arc<dyn Fn(&ResolvedValues) -> Result<Value, MappingError> + Send + Sync>;
pub type IndexFn = Arc<dyn Fn(&ResolvedValues) -> Result<IndexDescriptor, MappingError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Value,
    Index,
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionKind::Value => f.write_str("value"),
            FunctionKind::Index => f.write_str("index"),
        }
    }
}

/// A registered mapping function.
#[derive(Clone)]
pub enum MappingFunction {
    Value(ValueFn),
    Index(IndexFn),
}

impl MappingFunction {
    pub fn kind(&self) -> FunctionKind {
        match self {
            MappingFunction::Value(_) => FunctionKind::Value,
            MappingFunction::Index(_) => FunctionKind::Index,
        }
    }
}

impl fmt::Debug for MappingFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MappingFunction::{:?}", self.kind())
    }
}

/// Name -> function registry, populated at startup and read-only afterwards.
#[derive(Clone)]
pub struct FunctionRegistry {
    builtins: BTreeMap<String, MappingFunction>,
    plugins: BTreeMap<String, BTreeMap<String, MappingFunction>>,
}

/// Module name templates may use to address built-ins explicitly.
pub const BUILTIN_MODULE: &str = "mappings";

impl FunctionRegistry {
    /// A registry without any functions.
    pub fn empty() -> Self {
        Self {
            builtins: BTreeMap::new(),
            plugins: BTreeMap::new(),
        }
    }

    /// A registry holding the built-in library.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register_value("single_val", single_val);
        registry.register_value("list_val", list_val);
        registry.register_value("flat_list_val", flat_list_val);
        registry.register_value("date", date);
        registry.register_value("single_date", single_date);
        registry.register_value("boolean", boolean);
        registry.register_value("integer", integer);
        registry.register_value("float", float);
        registry.register_value("pipe_delim", pipe_delim);
        registry.register_value("concat_vals", concat_vals);
        registry.register_value("has_value", has_value);
        registry.register_value("placeholder", placeholder);
        registry.register_value("ontology_placeholder", ontology_placeholder);
        registry.register_index("indexed_on", indexed_on);
        registry
    }

    pub fn register_value<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&ResolvedValues) -> Result<Value, MappingError> + Send + Sync + 'static,
    {
        self.builtins
            .insert(name.to_string(), MappingFunction::Value(Arc::new(f)));
    }

    pub fn register_index<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&ResolvedValues) -> Result<IndexDescriptor, MappingError> + Send + Sync + 'static,
    {
        self.builtins
            .insert(name.to_string(), MappingFunction::Index(Arc::new(f)));
    }

    pub fn register_plugin_value<F>(&mut self, module: &str, name: &str, f: F)
    where
        F: Fn(&ResolvedValues) -> Result<Value, MappingError> + Send + Sync + 'static,
    {
        self.plugins
            .entry(module.to_string())
            .or_default()
            .insert(name.to_string(), MappingFunction::Value(Arc::new(f)));
    }

    pub fn register_plugin_index<F>(&mut self, module: &str, name: &str, f: F)
    where
        F: Fn(&ResolvedValues) -> Result<IndexDescriptor, MappingError> + Send + Sync + 'static,
    {
        self.plugins
            .entry(module.to_string())
            .or_default()
            .insert(name.to_string(), MappingFunction::Index(Arc::new(f)));
    }

    pub fn has_module(&self, module: &str) -> bool {
        module == BUILTIN_MODULE || self.plugins.contains_key(module)
    }

    /// Look a function up by bare or `module.function` name.
    ///
    /// A bare name prefers the built-in; failing that, it resolves to a plugin function when
    /// exactly one plugin module provides that name.
    pub fn resolve(&self, name: &str) -> Option<&MappingFunction> {
        if let Some((module, function)) = name.split_once('.') {
            if module == BUILTIN_MODULE {
                return self.builtins.get(function);
            }
            return self.plugins.get(module)?.get(function);
        }
        if let Some(f) = self.builtins.get(name) {
            return Some(f);
        }
        let mut providers = self.plugins.values().filter_map(|m| m.get(name));
        match (providers.next(), providers.next()) {
            (Some(f), None) => Some(f),
            _ => None,
        }
    }

    /// All resolvable qualified names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.builtins.keys().cloned().collect();
        for (module, functions) in &self.plugins {
            names.extend(functions.keys().map(|f| format!("{module}.{f}")));
        }
        names.sort();
        names
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("builtins", &self.builtins.keys().collect::<Vec<_>>())
            .field("plugin_modules", &self.plugins.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn first_non_null(values: &ResolvedValues) -> Vec<&str> {
    values.first().map(ResolvedField::non_null).unwrap_or_default()
}

fn single_str(values: &ResolvedValues) -> Result<Option<String>, MappingError> {
    let mut distinct: Vec<&str> = Vec::new();
    for v in first_non_null(values) {
        if !distinct.contains(&v) {
            distinct.push(v);
        }
    }
    match distinct.as_slice() {
        [] => Ok(None),
        [one] => Ok(Some(one.to_string())),
        many => {
            let field = values.first().map(|f| f.field.as_str()).unwrap_or_default();
            Err(MappingError::new(format!(
                "multiple values found for {field}: {}",
                many.join(", ")
            )))
        }
    }
}

/// The single distinct non-null value of the first parameter, or null.
///
/// Fails when two or more distinct values remain.
pub fn single_val(values: &ResolvedValues) -> Result<Value, MappingError> {
    Ok(single_str(values)?.map(Value::String).unwrap_or(Value::Null))
}

/// All non-null values of the first parameter, duplicates kept.
pub fn list_val(values: &ResolvedValues) -> Result<Value, MappingError> {
    Ok(Value::Array(
        first_non_null(values)
            .into_iter()
            .map(|v| Value::String(v.to_string()))
            .collect(),
    ))
}

/// Like [`list_val`], but stringified lists (`['a', 'b']`) and comma lists are spliced in.
pub fn flat_list_val(values: &ResolvedValues) -> Result<Value, MappingError> {
    let mut out = Vec::new();
    for v in first_non_null(values) {
        let trimmed = v.trim();
        let bracketed = trimmed.starts_with('[') && trimmed.ends_with(']');
        let parsed = bracketed
            .then(|| serde_json::from_str::<Vec<Value>>(&trimmed.replace('\'', "\"")).ok())
            .flatten();
        match parsed {
            Some(items) => {
                for item in items {
                    match item {
                        Value::Null => {}
                        Value::String(s) if is_null_like(&s) => {}
                        Value::String(s) => out.push(Value::String(s.trim().to_string())),
                        other => out.push(Value::String(other.to_string())),
                    }
                }
            }
            None => {
                // Quotes inside items (`Crohn's`) break the list syntax; split the text instead.
                let inner = if bracketed { &trimmed[1..trimmed.len() - 1] } else { trimmed };
                out.extend(
                    inner
                        .split(',')
                        .map(|s| s.trim().trim_matches(['\'', '"']).trim())
                        .filter(|s| !is_null_like(s))
                        .map(|s| Value::String(s.to_string())),
                );
            }
        }
    }
    Ok(Value::Array(out))
}

/// Every non-null value of the first parameter normalized to `YYYY-MM`.
pub fn date(values: &ResolvedValues) -> Result<Value, MappingError> {
    first_non_null(values)
        .into_iter()
        .map(|v| parse_month(v).map(Value::String))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

/// [`single_val`] semantics, normalized to `YYYY-MM`.
pub fn single_date(values: &ResolvedValues) -> Result<Value, MappingError> {
    match single_str(values)? {
        Some(v) => parse_month(&v).map(Value::String),
        None => Ok(Value::Null),
    }
}

const DAY_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d-%b-%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %d %Y",
    "%B %d %Y",
    "%Y%m%d",
];

const MONTH_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%Y/%d", "%d %b %Y", "%d %B %Y"];

fn parse_month(raw: &str) -> Result<String, MappingError> {
    let trimmed = raw.trim();
    // Timestamps: keep the date part.
    let day_part = trimmed
        .split(['T', ' '])
        .next()
        .filter(|p| p.len() >= 8 && p.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .unwrap_or(trimmed);

    for candidate in [day_part, trimmed] {
        for fmt in DAY_FORMATS {
            if let Ok(d) = NaiveDate::parse_from_str(candidate, fmt) {
                return Ok(d.format("%Y-%m").to_string());
            }
        }
    }

    // Month precision inputs: `2020-01`, `2020/01`, `01/2020`, `Jan 2020`, `January 2020`.
    let month_inputs = [
        (format!("{trimmed}-01"), MONTH_FORMATS[0]),
        (format!("{trimmed}/01"), MONTH_FORMATS[1]),
        (format!("{trimmed}/01"), MONTH_FORMATS[2]),
        (format!("01 {trimmed}"), MONTH_FORMATS[3]),
        (format!("01 {trimmed}"), MONTH_FORMATS[4]),
    ];
    for (candidate, fmt) in &month_inputs {
        if let Ok(d) = NaiveDate::parse_from_str(candidate, fmt) {
            return Ok(d.format("%Y-%m").to_string());
        }
    }

    Err(MappingError::new(format!("not a date: {raw}")))
}

/// `no`/`false` -> false, null-like -> null, anything else -> true.
pub fn boolean(values: &ResolvedValues) -> Result<Value, MappingError> {
    Ok(match single_str(values)? {
        None => Value::Null,
        Some(v) if v.eq_ignore_ascii_case("no") || v.eq_ignore_ascii_case("false") => Value::Bool(false),
        Some(_) => Value::Bool(true),
    })
}

/// Integer coercion; integral floats (`3.0`) are accepted, anything else becomes null.
pub fn integer(values: &ResolvedValues) -> Result<Value, MappingError> {
    let Some(v) = single_str(values)? else {
        return Ok(Value::Null);
    };
    if let Ok(i) = v.parse::<i64>() {
        return Ok(Value::from(i));
    }
    match v.parse::<f64>().ok().and_then(integral) {
        Some(i) => Ok(Value::from(i)),
        None => {
            warn!(value = %v, "cannot convert to integer; using null");
            Ok(Value::Null)
        }
    }
}

/// `f` as an `i64` when it is integral and in range.
pub(crate) fn integral(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64)
        .then_some(f as i64)
}

/// Float coercion; unparsable values become null.
pub fn float(values: &ResolvedValues) -> Result<Value, MappingError> {
    let Some(v) = single_str(values)? else {
        return Ok(Value::Null);
    };
    match v.parse::<f64>().ok().and_then(Number::from_f64) {
        Some(n) => Ok(Value::Number(n)),
        None => {
            warn!(value = %v, "cannot convert to float; using null");
            Ok(Value::Null)
        }
    }
}

/// The single value split on `|`.
pub fn pipe_delim(values: &ResolvedValues) -> Result<Value, MappingError> {
    Ok(match single_str(values)? {
        None => Value::Null,
        Some(v) => Value::Array(
            v.split('|')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Value::String(s.to_string()))
                .collect(),
        ),
    })
}

/// All non-null values of all parameters joined with `_`.
pub fn concat_vals(values: &ResolvedValues) -> Result<Value, MappingError> {
    let parts: Vec<&str> = values.fields().iter().flat_map(ResolvedField::non_null).collect();
    if parts.is_empty() {
        Ok(Value::Null)
    } else {
        Ok(Value::String(parts.join("_")))
    }
}

/// Whether the first parameter has any non-null value.
pub fn has_value(values: &ResolvedValues) -> Result<Value, MappingError> {
    Ok(Value::Bool(!first_non_null(values).is_empty()))
}

/// Echo the resolved values, for templates still under construction.
pub fn placeholder(values: &ResolvedValues) -> Result<Value, MappingError> {
    Ok(json!({ "placeholder": values.to_json() }))
}

/// An ontology term shaped placeholder built from the single value.
pub fn ontology_placeholder(values: &ResolvedValues) -> Result<Value, MappingError> {
    Ok(match single_str(values)? {
        None => Value::Null,
        Some(label) => json!({ "id": "placeholder", "label": label }),
    })
}

/// Index on the first parameter: one candidate key per row of its (first) sheet.
pub fn indexed_on(values: &ResolvedValues) -> Result<IndexDescriptor, MappingError> {
    let Some(first) = values.first() else {
        return Ok(IndexDescriptor::default());
    };
    let Some((sheet, raw)) = first.sheets.first() else {
        return Ok(IndexDescriptor::default());
    };
    Ok(IndexDescriptor {
        field: first.field.clone(),
        sheet: sheet.clone(),
        values: raw
            .iter()
            .map(|v| v.clone().filter(|s| !is_null_like(s)))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(field: &str, values: &[Option<&str>]) -> ResolvedValues {
        let mut r = ResolvedValues::new();
        r.insert(field, "Sheet", values.iter().map(|v| v.map(str::to_string)).collect());
        r
    }

    #[test]
    fn single_val_agrees_with_list_val_when_unambiguous() {
        let r = one("site", &[Some("Lung"), None, Some("Lung")]);
        assert_eq!(single_val(&r).unwrap(), json!("Lung"));
        assert_eq!(list_val(&r).unwrap(), json!(["Lung", "Lung"]));

        let empty = one("site", &[None, Some("nan")]);
        assert_eq!(single_val(&empty).unwrap(), Value::Null);
        assert_eq!(list_val(&empty).unwrap(), json!([]));
    }

    #[test]
    fn single_val_fails_on_distinct_values() {
        let r = one("site", &[Some("Lung"), Some("Liver")]);
        let err = single_val(&r).unwrap_err();
        assert!(err.message.contains("Lung, Liver"));
    }

    #[test]
    fn single_val_flattens_across_sheets() {
        let mut r = ResolvedValues::new();
        r.insert("site", "A", vec![Some("Lung".into())]);
        r.insert("site", "B", vec![Some("Lung".into()), None]);
        assert_eq!(single_val(&r).unwrap(), json!("Lung"));
    }

    #[test]
    fn absent_parameter_is_null() {
        let r = ResolvedValues::new();
        assert_eq!(single_val(&r).unwrap(), Value::Null);
        assert_eq!(boolean(&r).unwrap(), Value::Null);
        assert_eq!(has_value(&r).unwrap(), json!(false));
    }

    #[test]
    fn dates_normalize_to_month() {
        for (raw, want) in [
            ("2020-01-15", "2020-01"),
            ("2021/06/02", "2021-06"),
            ("03/14/2019", "2019-03"),
            ("2018-07", "2018-07"),
            ("2017-11-30T10:00:00", "2017-11"),
            ("2017-11-30 10:00:00", "2017-11"),
            ("Jan 2016", "2016-01"),
            ("September 2015", "2015-09"),
        ] {
            assert_eq!(parse_month(raw).unwrap(), want, "{raw}");
        }
        assert!(parse_month("not a date").is_err());
    }

    #[test]
    fn date_maps_over_values() {
        let r = one("d", &[Some("2020-01-15"), None, Some("2021-06-02")]);
        assert_eq!(date(&r).unwrap(), json!(["2020-01", "2021-06"]));
        assert_eq!(single_date(&one("d", &[Some("2020-01-15")])).unwrap(), json!("2020-01"));
        assert!(single_date(&one("d", &[Some("yesterday")])).is_err());
    }

    #[test]
    fn boolean_semantics() {
        assert_eq!(boolean(&one("b", &[Some("No")])).unwrap(), json!(false));
        assert_eq!(boolean(&one("b", &[Some("FALSE")])).unwrap(), json!(false));
        assert_eq!(boolean(&one("b", &[Some("Yes")])).unwrap(), json!(true));
        assert_eq!(boolean(&one("b", &[Some("unknown")])).unwrap(), json!(true));
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(integer(&one("n", &[Some("3")])).unwrap(), json!(3));
        assert_eq!(integer(&one("n", &[Some("3.0")])).unwrap(), json!(3));
        assert_eq!(integer(&one("n", &[Some("3.5")])).unwrap(), Value::Null);
        assert_eq!(integer(&one("n", &[Some("abc")])).unwrap(), Value::Null);
        assert_eq!(integer(&one("n", &[Some("1e20")])).unwrap(), Value::Null);
        assert_eq!(integer(&one("n", &[Some("-1e3")])).unwrap(), json!(-1000));
        assert_eq!(float(&one("n", &[Some("2.5")])).unwrap(), json!(2.5));
        assert_eq!(float(&one("n", &[Some("abc")])).unwrap(), Value::Null);
    }

    #[test]
    fn list_splitting_functions() {
        let r = one("drugs", &[Some("['a', 'b']"), Some("c, d")]);
        assert_eq!(flat_list_val(&r).unwrap(), json!(["a", "b", "c", "d"]));
        assert_eq!(
            pipe_delim(&one("p", &[Some("x|y | z")])).unwrap(),
            json!(["x", "y", "z"])
        );

        let quoted = one("comorbidities", &[Some("['Crohn's disease', 'Asthma']")]);
        assert_eq!(flat_list_val(&quoted).unwrap(), json!(["Crohn's disease", "Asthma"]));

        let mut multi = ResolvedValues::new();
        multi.insert("a", "S", vec![Some("1".into())]);
        multi.insert("b", "S", vec![None, Some("2".into())]);
        assert_eq!(concat_vals(&multi).unwrap(), json!("1_2"));
    }

    #[test]
    fn placeholders() {
        let r = one("term", &[Some("Lung")]);
        assert_eq!(
            ontology_placeholder(&r).unwrap(),
            json!({"id": "placeholder", "label": "Lung"})
        );
        assert_eq!(
            placeholder(&r).unwrap(),
            json!({"placeholder": {"term": {"Sheet": ["Lung"]}}})
        );
    }

    #[test]
    fn indexed_on_describes_first_sheet() {
        let r = one("id", &[Some("A"), Some("nan"), Some("B")]);
        let d = indexed_on(&r).unwrap();
        assert_eq!(d.field, "id");
        assert_eq!(d.sheet, "Sheet");
        assert_eq!(d.values, vec![Some("A".into()), None, Some("B".into())]);
        assert_eq!(indexed_on(&ResolvedValues::new()).unwrap(), IndexDescriptor::default());
    }

    #[test]
    fn registry_resolution() {
        let mut registry = FunctionRegistry::default();
        registry.register_plugin_value("extra", "shout", |_| Ok(json!("!")));
        registry.register_plugin_value("a", "dup", |_| Ok(Value::Null));
        registry.register_plugin_value("b", "dup", |_| Ok(Value::Null));
        registry.register_plugin_value("extra", "single_val", |_| Ok(Value::Null));

        assert_eq!(registry.resolve("indexed_on").unwrap().kind(), FunctionKind::Index);
        assert_eq!(registry.resolve("mappings.single_val").unwrap().kind(), FunctionKind::Value);
        assert!(registry.resolve("extra.shout").is_some());
        assert!(registry.resolve("shout").is_some());
        assert!(registry.resolve("dup").is_none());
        assert!(registry.resolve("a.dup").is_some());
        assert!(registry.resolve("nope").is_none());
        assert!(registry.has_module("extra"));
        assert!(!registry.has_module("missing"));

        // The built-in wins over a same-named plugin for bare names.
        let builtin = registry.resolve("single_val").unwrap();
        let MappingFunction::Value(f) = builtin else {
            panic!("expected value function");
        };
        assert_eq!(f(&one("x", &[Some("v")])).unwrap(), json!("v"));
    }
}
