//! Mapping templates: the flat, line-oriented text format and its compiled tree form.
//!
//! A template line is `dot.separated.path, value`. Path segments may carry a `*` (required by the
//! schema) or `+` (ontology term) marker; both are informational. A path segment literally named
//! `INDEX` marks an array element, and the line ending in it holds the index expression:
//!
//! ```text
//! ## Schema generated from donors
//! submitter_donor_id*, {single_val(submitter_donor_id)}
//! primary_diagnoses.INDEX, {indexed_on(Diagnosis.submitter_primary_diagnosis_id)}
//! primary_diagnoses.INDEX.primary_site+, {single_val(primary_site)}
//! ```

pub mod compiler;
pub mod expression;

use std::fmt::Write as _;
use std::path::Path;

use tracing::warn;

use crate::error::{EtlError, EtlResult};

pub use compiler::{compile, CompiledExpression, ScaffoldNode};
pub use expression::{parse_value, Expression, Param};

/// Path segment that marks an array element.
pub const INDEX: &str = "INDEX";

/// One line of a mapping template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateLine {
    /// The path as written, markers included.
    pub display: String,
    /// Clean path segments.
    pub path: Vec<String>,
    pub required: bool,
    pub ontology: bool,
    pub expression: Option<Expression>,
    /// Schema description, emitted as a `##` comment when rendering.
    pub description: Option<String>,
    /// 1-based source line (0 for generated lines).
    pub line: usize,
}

impl TemplateLine {
    /// Build a line from a display path such as `primary_diagnoses*.INDEX.primary_site+`.
    pub fn new(display: impl Into<String>, expression: Option<Expression>) -> Self {
        let display = display.into();
        let path = split_path(&display);
        let last = display.rsplit('.').next().unwrap_or_default();
        Self {
            required: last.contains('*'),
            ontology: last.contains('+'),
            path,
            display,
            expression,
            description: None,
            line: 0,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    /// Dotted clean path.
    pub fn key(&self) -> String {
        self.path.join(".")
    }

    pub fn is_index(&self) -> bool {
        self.path.last().is_some_and(|s| s == INDEX)
    }
}

fn split_path(display: &str) -> Vec<String> {
    display
        .split('.')
        .map(|seg| {
            seg.trim()
                .trim_matches(|c| c == '"' || c == '\'')
                .trim_end_matches(['*', '+'])
                .trim()
                .to_string()
        })
        .collect()
}

/// An ordered list of template lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template {
    pub title: Option<String>,
    pub lines: Vec<TemplateLine>,
}

impl Template {
    pub fn new(lines: Vec<TemplateLine>) -> Self {
        Self { title: None, lines }
    }

    /// Parse template text. Blank lines and lines starting with `#` are skipped.
    pub fn parse(text: &str) -> EtlResult<Self> {
        let mut lines = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let trimmed = raw.trim().trim_start_matches('\u{feff}');
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let (path, value) = trimmed.split_once(',').unwrap_or((trimmed, ""));
            let path = path.trim();
            if path.is_empty() || split_path(path).iter().any(String::is_empty) {
                return Err(EtlError::Template {
                    line: line_no,
                    message: format!("invalid path {path:?}"),
                });
            }
            let expression = parse_value(value).map_err(|message| EtlError::Template {
                line: line_no,
                message,
            })?;
            let mut line = TemplateLine::new(path, expression);
            line.line = line_no;
            lines.push(line);
        }
        Ok(Self::new(lines))
    }

    pub fn from_path(path: impl AsRef<Path>) -> EtlResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Render the template text: header, `## description` comments, then `path, {expression}`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(title) = &self.title {
            let _ = writeln!(out, "## Schema generated from {title}");
        }
        out.push_str("## (*) required field, (+) ontology term, INDEX marks an array element\n");
        for line in &self.lines {
            if let Some(description) = &line.description {
                let flat = description.split_whitespace().collect::<Vec<_>>().join(" ");
                let _ = writeln!(out, "## {}", flat.replace(',', ";"));
            }
            match &line.expression {
                Some(expr) => {
                    let _ = writeln!(out, "{}, {expr}", line.display);
                }
                None => {
                    let _ = writeln!(out, "{}, \"##not mapped\"", line.display);
                }
            }
        }
        out
    }

    /// Merge hand-edited lines into this (generated) template.
    ///
    /// Each edited line replaces the expression of the line with the same clean path; an edited
    /// line without an expression unmaps it. Edited paths unknown to this template are appended
    /// with a warning.
    pub fn interpolate(&mut self, edits: &Template) {
        for edit in &edits.lines {
            match self.lines.iter_mut().find(|l| l.path == edit.path) {
                Some(line) => {
                    line.expression = edit.expression.clone();
                    line.line = edit.line;
                }
                None => {
                    warn!(path = %edit.key(), "mapped path is not part of the schema template");
                    self.lines.push(edit.clone());
                }
            }
        }
    }
}
