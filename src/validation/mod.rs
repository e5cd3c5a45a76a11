//! Post-mapping validation of output trees.
//!
//! A [`ValidationSchema`] describes, per kind of object (donor, diagnosis, ...), its display
//! name, identity field, required fields and the nested kinds reachable from it. The
//! [`ValidationEngine`] walks every output tree along that description and:
//!
//! - runs the optional structural validator on each root instance;
//! - records required-field coverage;
//! - runs the custom rule registered for each kind, which raises hard failures or warnings;
//! - counts identity values per kind and fails on duplicates across the whole run.

pub mod moh;
pub mod structural;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::{EtlError, EtlResult};

pub use structural::{JsonSchemaValidator, StructuralValidator};

/// Validation description of one kind of object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindDescriptor {
    /// Display name used in locations when no identity value is present.
    pub name: String,
    /// Identity field, if the kind has one.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub required_fields: Vec<String>,
    /// Keys holding nested kinds; each key is also the nested kind's name.
    #[serde(default)]
    pub nested_schemas: Vec<String>,
}

/// The full validation description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSchema {
    /// Kind of each top-level output tree.
    pub root: String,
    pub kinds: BTreeMap<String, KindDescriptor>,
}

impl ValidationSchema {
    /// Load a YAML or JSON descriptor and check that every referenced kind exists.
    pub fn from_path(path: impl AsRef<Path>) -> EtlResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let schema: Self = serde_yaml::from_str(&text)?;
        schema.check()?;
        Ok(schema)
    }

    /// A descriptor with no kinds: only structural validation and nothing else.
    pub fn structural_only() -> Self {
        Self {
            root: "root".to_string(),
            kinds: BTreeMap::new(),
        }
    }

    pub fn kind(&self, name: &str) -> Option<&KindDescriptor> {
        self.kinds.get(name)
    }

    pub fn check(&self) -> EtlResult<()> {
        if !self.kinds.is_empty() && !self.kinds.contains_key(&self.root) {
            return Err(EtlError::config(format!(
                "validation root kind '{}' is not described",
                self.root
            )));
        }
        for (name, kind) in &self.kinds {
            if let Some(missing) = kind.nested_schemas.iter().find(|n| !self.kinds.contains_key(*n)) {
                return Err(EtlError::config(format!(
                    "validation kind '{name}' nests unknown kind '{missing}'"
                )));
            }
        }
        Ok(())
    }
}

/// A validation finding at a location, e.g. `D1 > DX1: treatment ends before it starts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub location: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.location.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.location, self.message)
        }
    }
}

/// Required-field coverage for one field of one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FieldCoverage {
    pub seen: usize,
    pub missing: usize,
}

/// Everything a validation run found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    /// kind -> field -> coverage.
    pub coverage: BTreeMap<String, BTreeMap<String, FieldCoverage>>,
    /// kind -> identity value -> occurrences.
    pub identifiers: BTreeMap<String, BTreeMap<String, usize>>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Handle given to custom rules; findings are prefixed with the current location.
pub struct ValidationScope<'a> {
    location: String,
    report: &'a mut ValidationReport,
}

impl ValidationScope<'_> {
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Record a soft failure.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.report.warnings.push(ValidationIssue {
            location: self.location.clone(),
            message: message.into(),
        });
    }

    /// Record a hard failure.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.report.errors.push(ValidationIssue {
            location: self.location.clone(),
            message: message.into(),
        });
    }
}

pub type RuleFn = Arc<dyn Fn(&Map<String, Value>, &mut ValidationScope<'_>) + Send + Sync>;

/// Kind name -> custom rule.
#[derive(Clone, Default)]
pub struct RuleRegistry {
    rules: BTreeMap<String, RuleFn>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: &str, rule: F)
    where
        F: Fn(&Map<String, Value>, &mut ValidationScope<'_>) + Send + Sync + 'static,
    {
        self.rules.insert(kind.to_string(), Arc::new(rule));
    }

    pub fn get(&self, kind: &str) -> Option<&RuleFn> {
        self.rules.get(kind)
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("kinds", &self.rules.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Walks output trees against a [`ValidationSchema`].
pub struct ValidationEngine<'a> {
    schema: &'a ValidationSchema,
    rules: &'a RuleRegistry,
    structural: Option<&'a dyn StructuralValidator>,
}

impl<'a> ValidationEngine<'a> {
    pub fn new(schema: &'a ValidationSchema, rules: &'a RuleRegistry) -> Self {
        Self {
            schema,
            rules,
            structural: None,
        }
    }

    pub fn with_structural(mut self, validator: &'a dyn StructuralValidator) -> Self {
        self.structural = Some(validator);
        self
    }

    /// Validate all output trees of a run.
    pub fn validate(&self, packets: &[Value]) -> ValidationReport {
        let mut report = ValidationReport::default();
        let mut location: Vec<String> = Vec::new();

        for (position, packet) in packets.iter().enumerate() {
            let root_label = self.label(&self.schema.root, packet.as_object(), position);
            if let Some(validator) = self.structural {
                if let Err(messages) = validator.validate(packet) {
                    for message in messages {
                        report.errors.push(ValidationIssue {
                            location: root_label.clone(),
                            message,
                        });
                    }
                    continue;
                }
            }
            match packet.as_object() {
                Some(obj) => self.walk(&self.schema.root, obj, position, &mut location, &mut report),
                None => report.errors.push(ValidationIssue {
                    location: root_label,
                    message: "output is not an object".to_string(),
                }),
            }
        }

        for (kind, counts) in &report.identifiers {
            for (id, count) in counts {
                if *count > 1 {
                    report.errors.push(ValidationIssue {
                        location: String::new(),
                        message: format!("Duplicated IDs: in schema {kind}, {id} occurs {count} times"),
                    });
                }
            }
        }

        info!(
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "validation finished"
        );
        for issue in &report.errors {
            warn!("{issue}");
        }
        report
    }

    fn label(&self, kind: &str, obj: Option<&Map<String, Value>>, position: usize) -> String {
        let descriptor = self.schema.kind(kind);
        descriptor
            .and_then(|d| d.id.as_deref())
            .zip(obj)
            .and_then(|(id, obj)| obj.get(id))
            .and_then(identity_string)
            .unwrap_or_else(|| {
                let name = descriptor.map(|d| d.name.as_str()).unwrap_or(kind);
                format!("{name} {position}")
            })
    }

    fn walk(
        &self,
        kind_name: &str,
        obj: &Map<String, Value>,
        position: usize,
        location: &mut Vec<String>,
        report: &mut ValidationReport,
    ) {
        let Some(kind) = self.schema.kind(kind_name) else {
            return;
        };
        location.push(self.label(kind_name, Some(obj), position));

        let coverage = report.coverage.entry(kind_name.to_string()).or_default();
        for field in &kind.required_fields {
            let entry = coverage.entry(field.clone()).or_default();
            if obj.get(field).is_some_and(is_present) {
                entry.seen += 1;
            } else {
                entry.missing += 1;
            }
        }

        if let Some(id) = kind.id.as_deref().and_then(|f| obj.get(f)).and_then(identity_string) {
            *report
                .identifiers
                .entry(kind_name.to_string())
                .or_default()
                .entry(id)
                .or_default() += 1;
        }

        if let Some(rule) = self.rules.get(kind_name) {
            let mut scope = ValidationScope {
                location: location.join(" > "),
                report: &mut *report,
            };
            rule(obj, &mut scope);
        }

        for nested in &kind.nested_schemas {
            match obj.get(nested) {
                Some(Value::Array(items)) => {
                    for (idx, item) in items.iter().enumerate() {
                        if let Some(child) = item.as_object() {
                            self.walk(nested, child, idx, location, report);
                        }
                    }
                }
                Some(Value::Object(child)) => self.walk(nested, child, 0, location, report),
                _ => {}
            }
        }

        location.pop();
    }
}

fn identity_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A value counts as present unless it is null, an empty string, array or object.
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        _ => true,
    }
}
