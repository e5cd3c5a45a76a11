//! Mapping evaluation: walk a compiled [`ScaffoldNode`] against the [`IndexedData`] of one
//! subject and produce its output tree.
//!
//! Indexed arrays iterate over candidate rows of a sheet. While an array element is being
//! evaluated, an [`IndexFrame`] for it sits on the context's index stack:
//!
//! - value expressions reading the frame's sheet see only the frame's row;
//! - nested arrays keep only rows whose value in an ancestor's key field equals the ancestor's
//!   selected key, which is how child sheets attach to their parent records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info_span, warn};

use crate::error::{EtlError, EtlResult, MappingError};
use crate::functions::{IndexDescriptor, MappingFunction, ResolvedValues};
use crate::template::{CompiledExpression, Param, ScaffoldNode};
use crate::types::{IndexedData, SubjectRows};

/// What a failing mapping function takes down with it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingErrorPolicy {
    /// Omit only the field whose function failed.
    #[default]
    Field,
    /// Drop the subject's whole output.
    Subject,
}

/// A recorded per-subject mapping failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingDiagnostic {
    pub subject: String,
    /// Output path, e.g. `primary_diagnoses[1].date_of_diagnosis`.
    pub path: String,
    pub message: String,
}

/// The result of evaluating one subject.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectOutcome {
    pub subject: String,
    /// `None` when the subject was dropped under [`MappingErrorPolicy::Subject`].
    pub packet: Option<Value>,
    pub diagnostics: Vec<MappingDiagnostic>,
}

/// One open indexed-array element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFrame {
    pub sheet: String,
    pub field: String,
    /// Position of the selected row among the subject's rows in `sheet`.
    pub row: usize,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Key(String),
    Position(usize),
}

/// Per-subject evaluation state.
#[derive(Debug)]
pub struct EvaluationContext<'a> {
    data: &'a IndexedData,
    subject: &'a str,
    policy: MappingErrorPolicy,
    stack: Vec<IndexFrame>,
    path: Vec<PathSegment>,
    diagnostics: Vec<MappingDiagnostic>,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(data: &'a IndexedData, subject: &'a str, policy: MappingErrorPolicy) -> Self {
        Self {
            data,
            subject,
            policy,
            stack: Vec::new(),
            path: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Current index stack depth.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn stack(&self) -> &[IndexFrame] {
        &self.stack
    }

    pub fn diagnostics(&self) -> &[MappingDiagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<MappingDiagnostic> {
        self.diagnostics
    }

    /// Evaluate `node`; `Value::Null` means the node produced nothing.
    ///
    /// An `Err` is only returned under [`MappingErrorPolicy::Subject`]; the failure has already
    /// been recorded as a diagnostic by then.
    pub fn evaluate(&mut self, node: &ScaffoldNode) -> Result<Value, MappingError> {
        match node {
            ScaffoldNode::Expression(expr) => self.evaluate_expression(expr),
            ScaffoldNode::Object(children) => {
                let mut map = Map::new();
                for (name, child) in children {
                    self.path.push(PathSegment::Key(name.clone()));
                    let result = self.evaluate(child);
                    self.path.pop();
                    let value = result?;
                    if !is_empty(&value) {
                        map.insert(name.clone(), value);
                    }
                }
                Ok(if map.is_empty() { Value::Null } else { Value::Object(map) })
            }
            ScaffoldNode::IndexedArray { index, child } => self.evaluate_indexed_array(index, child),
        }
    }

    fn evaluate_expression(&mut self, expr: &CompiledExpression) -> Result<Value, MappingError> {
        let values = self.resolve_params(&expr.expression.params, true);
        let result = match &expr.function {
            MappingFunction::Value(f) => f(&values),
            MappingFunction::Index(_) => Err(MappingError::new(format!(
                "{} is an index function",
                expr.expression.function
            ))),
        };
        self.recover(result, expr)
    }

    fn evaluate_indexed_array(
        &mut self,
        index: &CompiledExpression,
        child: &ScaffoldNode,
    ) -> Result<Value, MappingError> {
        let values = self.resolve_params(&index.expression.params, false);
        let descriptor = match &index.function {
            MappingFunction::Index(f) => f(&values),
            MappingFunction::Value(_) => Err(MappingError::new(format!(
                "{} is not an index function",
                index.expression.function
            ))),
        };
        let descriptor = match descriptor {
            Ok(d) => d,
            Err(e) => return self.recover(Err(e), index),
        };

        let candidates = self.candidates(&descriptor);
        debug!(
            subject = self.subject,
            sheet = %descriptor.sheet,
            field = %descriptor.field,
            candidates = candidates.len(),
            "indexed array"
        );

        let mut items = Vec::with_capacity(candidates.len());
        for (position, (row, key)) in candidates.into_iter().enumerate() {
            self.stack.push(IndexFrame {
                sheet: descriptor.sheet.clone(),
                field: descriptor.field.clone(),
                row,
                key,
            });
            self.path.push(PathSegment::Position(position));
            let result = self.evaluate(child);
            self.path.pop();
            self.stack.pop();
            let value = result?;
            if !is_empty(&value) {
                items.push(value);
            }
        }
        Ok(if items.is_empty() { Value::Null } else { Value::Array(items) })
    }

    /// Candidate `(row, key)` pairs that correlate with every open ancestor frame.
    fn candidates(&self, descriptor: &IndexDescriptor) -> Vec<(usize, String)> {
        let rows = self.data.rows(&descriptor.sheet, self.subject);
        descriptor
            .values
            .iter()
            .enumerate()
            .filter_map(|(row, key)| key.clone().map(|k| (row, k)))
            .filter(|(row, _)| {
                self.stack
                    .iter()
                    .all(|frame| correlates(frame, rows, *row))
            })
            .collect()
    }

    /// Raw values of each parameter for the current subject.
    ///
    /// An unqualified field reads the first sheet that has it. With `filter`, a parameter is cut
    /// down to the selected row of the innermost frame on its own sheet. Parameters on any other
    /// sheet keep all of the subject's rows, even inside an array element of a sibling sheet;
    /// only [`Self::candidates`] correlates rows across sheets.
    fn resolve_params(&self, params: &[Param], filter: bool) -> ResolvedValues {
        let mut resolved = ResolvedValues::new();
        for param in params {
            let sheet = match &param.sheet {
                Some(sheet) if self.data.has_column(sheet, &param.field) => Some(sheet.as_str()),
                Some(_) => None,
                None => self.data.resolve_sheet(&param.field),
            };
            let Some(sheet) = sheet else {
                continue;
            };

            let mut values = self
                .data
                .rows(sheet, self.subject)
                .and_then(|rows| rows.values(&param.field))
                .map(<[_]>::to_vec)
                .unwrap_or_default();
            if filter {
                if let Some(frame) = self.stack.iter().rev().find(|f| f.sheet == sheet) {
                    values = values.get(frame.row).cloned().into_iter().collect();
                }
            }
            resolved.insert(&param.field, sheet, values);
        }
        resolved
    }

    fn recover(
        &mut self,
        result: Result<Value, MappingError>,
        expr: &CompiledExpression,
    ) -> Result<Value, MappingError> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                let path = self.path_string();
                warn!(
                    subject = self.subject,
                    path = %path,
                    line = expr.line,
                    "mapping failed: {err}"
                );
                self.diagnostics.push(MappingDiagnostic {
                    subject: self.subject.to_string(),
                    path,
                    message: err.message.clone(),
                });
                match self.policy {
                    MappingErrorPolicy::Field => Ok(Value::Null),
                    MappingErrorPolicy::Subject => Err(err),
                }
            }
        }
    }

    fn path_string(&self) -> String {
        let mut out = String::new();
        for segment in &self.path {
            match segment {
                PathSegment::Key(key) => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(key);
                }
                PathSegment::Position(pos) => out.push_str(&format!("[{pos}]")),
            }
        }
        out
    }
}

/// Whether `row` of a candidate sheet belongs under the ancestor `frame`.
///
/// A sheet without the ancestor's key column is not constrained by it.
fn correlates(frame: &IndexFrame, rows: Option<&SubjectRows>, row: usize) -> bool {
    let Some(rows) = rows else {
        return true;
    };
    match rows.values(&frame.field) {
        Some(column) => column.get(row).and_then(|v| v.as_deref()) == Some(frame.key.as_str()),
        None => true,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Evaluates a compiled template for subjects of an [`IndexedData`].
#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'a> {
    scaffold: &'a ScaffoldNode,
    data: &'a IndexedData,
    policy: MappingErrorPolicy,
}

impl<'a> Evaluator<'a> {
    pub fn new(scaffold: &'a ScaffoldNode, data: &'a IndexedData) -> Self {
        Self {
            scaffold,
            data,
            policy: MappingErrorPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: MappingErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn data(&self) -> &'a IndexedData {
        self.data
    }

    /// Evaluate one subject in a fresh context.
    pub fn evaluate(&self, subject: &str) -> EtlResult<SubjectOutcome> {
        let span = info_span!("subject", id = %subject);
        let _enter = span.enter();

        let mut ctx = EvaluationContext::new(self.data, subject, self.policy);
        let result = ctx.evaluate(self.scaffold);
        if ctx.depth() != 0 {
            return Err(EtlError::IndexStackNotEmpty {
                subject: subject.to_string(),
                depth: ctx.depth(),
            });
        }

        let packet = match result {
            Ok(Value::Null) => Some(Value::Object(Map::new())),
            Ok(value) => Some(value),
            Err(_) => {
                warn!(subject, "subject dropped after mapping failure");
                None
            }
        };
        Ok(SubjectOutcome {
            subject: subject.to_string(),
            packet,
            diagnostics: ctx.into_diagnostics(),
        })
    }

    /// Evaluate every subject sequentially, in table order.
    pub fn evaluate_all(&self) -> EtlResult<Vec<SubjectOutcome>> {
        self.data.subjects.iter().map(|s| self.evaluate(s)).collect()
    }
}
