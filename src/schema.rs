//! Schema introspection: derive the output shape and a default mapping template from a JSON
//! Schema or OpenAPI document.

use std::collections::BTreeSet;
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{EtlError, EtlResult};
use crate::template::{Expression, Param, Template, TemplateLine, INDEX};

const REF_PREFIXES: &[&str] = &["#/components/schemas/", "#/$defs/", "#/definitions/"];

/// Scalar leaf types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Integer,
    Number,
    Boolean,
    Unknown,
}

/// The shape of the output a schema describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaNode {
    Object(Vec<SchemaProperty>),
    Array(Box<SchemaNode>),
    Scalar(ScalarKind),
    /// An ontology term object, treated as a single leaf.
    Ontology,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaProperty {
    pub name: String,
    pub required: bool,
    pub description: Option<String>,
    pub node: SchemaNode,
}

/// A loaded schema document.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDocument {
    document: Value,
}

impl SchemaDocument {
    pub fn new(document: Value) -> Self {
        Self { document }
    }

    /// Load a JSON (`.json`) or YAML (anything else) schema document.
    pub fn from_path(path: impl AsRef<Path>) -> EtlResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let document: Value = if is_json {
            serde_json::from_str(&text)?
        } else {
            serde_yaml::from_str(&text)?
        };
        Ok(Self::new(document))
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// A named component from `components/schemas`, `$defs` or `definitions`.
    pub fn component(&self, name: &str) -> Option<&Value> {
        self.document
            .pointer("/components/schemas")
            .and_then(|s| s.get(name))
            .or_else(|| self.document.get("$defs").and_then(|s| s.get(name)))
            .or_else(|| self.document.get("definitions").and_then(|s| s.get(name)))
    }

    fn root_value(&self, root: Option<&str>) -> EtlResult<&Value> {
        match root {
            Some(name) => self
                .component(name)
                .ok_or_else(|| EtlError::schema(format!("schema has no component named '{name}'"))),
            None => Ok(&self.document),
        }
    }

    /// The output shape of `root` (or of the whole document when `root` is `None`).
    pub fn scaffold(&self, root: Option<&str>) -> EtlResult<SchemaNode> {
        let mut visiting: Vec<String> = root.map(|r| vec![r.to_string()]).unwrap_or_default();
        self.build_node(self.root_value(root)?, &mut visiting)
    }

    fn build_node(&self, node: &Value, visiting: &mut Vec<String>) -> EtlResult<SchemaNode> {
        if let Some(reference) = node.get("$ref").and_then(Value::as_str) {
            let name = ref_name(reference)?;
            if visiting.iter().any(|v| v == name) {
                return Err(EtlError::schema(format!(
                    "schema reference cycle: {} -> {name}",
                    visiting.join(" -> ")
                )));
            }
            let target = self
                .component(name)
                .ok_or_else(|| EtlError::schema(format!("unresolved reference {reference}")))?;
            visiting.push(name.to_string());
            let built = if name.to_ascii_lowercase().contains("ontology") {
                Ok(SchemaNode::Ontology)
            } else {
                self.build_node(target, visiting)
            };
            visiting.pop();
            return built;
        }

        for combinator in ["allOf", "oneOf", "anyOf"] {
            if let Some(first) = node
                .get(combinator)
                .and_then(Value::as_array)
                .and_then(|members| members.first())
            {
                return self.build_node(first, visiting);
            }
        }

        let is_ontology = node
            .get("$id")
            .and_then(Value::as_str)
            .is_some_and(|id| id.to_ascii_lowercase().contains("ontology"));
        if is_ontology {
            return Ok(SchemaNode::Ontology);
        }

        match type_name(node) {
            Some("object") => self.build_object(node, visiting),
            None if node.get("properties").is_some() => self.build_object(node, visiting),
            Some("array") => match node.get("items") {
                Some(items) => Ok(SchemaNode::Array(Box::new(self.build_node(items, visiting)?))),
                None => Ok(SchemaNode::Array(Box::new(SchemaNode::Scalar(ScalarKind::Unknown)))),
            },
            Some("string") => Ok(SchemaNode::Scalar(ScalarKind::String)),
            Some("integer") => Ok(SchemaNode::Scalar(ScalarKind::Integer)),
            Some("number") => Ok(SchemaNode::Scalar(ScalarKind::Number)),
            Some("boolean") => Ok(SchemaNode::Scalar(ScalarKind::Boolean)),
            _ => Ok(SchemaNode::Scalar(ScalarKind::Unknown)),
        }
    }

    fn build_object(&self, node: &Value, visiting: &mut Vec<String>) -> EtlResult<SchemaNode> {
        let required: BTreeSet<&str> = node
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut props = Vec::new();
        if let Some(properties) = node.get("properties").and_then(Value::as_object) {
            for (name, prop) in properties {
                let description = self.description_of(prop);
                props.push(SchemaProperty {
                    name: name.clone(),
                    required: required.contains(name.as_str()),
                    description,
                    node: self.build_node(prop, visiting)?,
                });
            }
        }
        Ok(SchemaNode::Object(props))
    }

    fn description_of(&self, prop: &Value) -> Option<String> {
        let own = prop.get("description").and_then(Value::as_str);
        let referenced = || {
            let name = ref_name(prop.get("$ref")?.as_str()?).ok()?;
            self.component(name)?.get("description")?.as_str()
        };
        own.or_else(referenced).map(str::to_string)
    }

    /// Generate the default mapping template for `root`.
    pub fn template(&self, root: Option<&str>) -> EtlResult<Template> {
        let scaffold = self.scaffold(root)?;
        if !matches!(scaffold, SchemaNode::Object(_)) {
            return Err(EtlError::schema("the template root must be an object schema"));
        }
        let mut leaves = Vec::new();
        collect_leaves(&scaffold, &mut Vec::new(), &mut Vec::new(), &mut leaves);
        let mut template = Template::new(default_lines(leaves));
        template.title = Some(root.unwrap_or("schema").to_string());
        Ok(template)
    }

    /// A standalone JSON Schema for `root` with every reference rewritten to `#/$defs/...`.
    pub fn json_schema(&self, root: Option<&str>) -> EtlResult<Value> {
        let mut schema = self.root_value(root)?.clone();
        let mut pending: Vec<String> = Vec::new();
        rewrite_refs(&mut schema, &mut pending)?;

        let mut defs = Map::new();
        let mut done: BTreeSet<String> = BTreeSet::new();
        while let Some(name) = pending.pop() {
            if !done.insert(name.clone()) {
                continue;
            }
            let mut component = self
                .component(&name)
                .cloned()
                .ok_or_else(|| EtlError::schema(format!("unresolved reference to {name}")))?;
            rewrite_refs(&mut component, &mut pending)?;
            defs.insert(name, component);
        }

        if let Value::Object(map) = &mut schema {
            map.remove("components");
            map.remove("definitions");
            if !defs.is_empty() {
                match map.get_mut("$defs") {
                    Some(Value::Object(existing)) => existing.extend(defs),
                    _ => {
                        map.insert("$defs".to_string(), Value::Object(defs));
                    }
                }
            }
        }
        Ok(schema)
    }
}

fn ref_name(reference: &str) -> EtlResult<&str> {
    REF_PREFIXES
        .iter()
        .find_map(|prefix| reference.strip_prefix(prefix))
        .filter(|name| !name.is_empty() && !name.contains('/'))
        .ok_or_else(|| EtlError::schema(format!("unsupported reference {reference}")))
}

fn type_name(node: &Value) -> Option<&str> {
    match node.get("type")? {
        Value::String(t) => Some(t.as_str()),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null"),
        _ => None,
    }
}

fn rewrite_refs(value: &mut Value, found: &mut Vec<String>) -> EtlResult<()> {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get_mut("$ref") {
                let name = ref_name(reference)?.to_string();
                *reference = format!("#/$defs/{name}");
                found.push(name);
            }
            for (key, child) in map.iter_mut() {
                if key != "$ref" {
                    rewrite_refs(child, found)?;
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_refs(item, found)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeafKind {
    Index,
    Scalar(ScalarKind),
    List,
    Ontology,
}

struct Leaf {
    display: String,
    path: Vec<String>,
    description: Option<String>,
    kind: LeafKind,
}

fn collect_leaves(
    node: &SchemaNode,
    display: &mut Vec<String>,
    path: &mut Vec<String>,
    out: &mut Vec<Leaf>,
) {
    let SchemaNode::Object(props) = node else {
        return;
    };
    for prop in props {
        let marker = if prop.required { "*" } else { "" };
        let ontology = if matches!(prop.node, SchemaNode::Ontology) { "+" } else { "" };
        display.push(format!("{}{marker}{ontology}", prop.name));
        path.push(prop.name.clone());

        let push_leaf = |kind: LeafKind, display: &[String], path: &[String], out: &mut Vec<Leaf>| {
            out.push(Leaf {
                display: display.join("."),
                path: path.to_vec(),
                description: prop.description.clone(),
                kind,
            })
        };

        match &prop.node {
            SchemaNode::Object(_) => collect_leaves(&prop.node, display, path, out),
            SchemaNode::Array(items) if matches!(items.as_ref(), SchemaNode::Object(_)) => {
                display.push(INDEX.to_string());
                path.push(INDEX.to_string());
                let before = out.len();
                push_leaf(LeafKind::Index, display, path, out);
                collect_leaves(items, display, path, out);
                if out.len() == before + 1 {
                    out.pop();
                }
                display.pop();
                path.pop();
            }
            SchemaNode::Array(_) => push_leaf(LeafKind::List, display, path, out),
            SchemaNode::Scalar(kind) => push_leaf(LeafKind::Scalar(*kind), display, path, out),
            SchemaNode::Ontology => push_leaf(LeafKind::Ontology, display, path, out),
        }

        display.pop();
        path.pop();
    }
}

/// Assign default expressions.
///
/// An `INDEX` line is keyed on the first plain field that follows it inside the same array.
/// Open arrays are tracked on a stack that is trimmed whenever a line leaves them.
fn default_lines(leaves: Vec<Leaf>) -> Vec<TemplateLine> {
    let mut keys: Vec<Option<String>> = vec![None; leaves.len()];
    let mut open: Vec<usize> = Vec::new();
    for (idx, leaf) in leaves.iter().enumerate() {
        while let Some(&top) = open.last() {
            let array_path = &leaves[top].path;
            if leaf.path.len() > array_path.len() && leaf.path.starts_with(array_path) {
                break;
            }
            open.pop();
        }
        if leaf.kind == LeafKind::Index {
            open.push(idx);
            continue;
        }
        if let Some(&top) = open.last() {
            if keys[top].is_none() {
                keys[top] = leaf.path.last().cloned();
            }
        }
    }

    leaves
        .into_iter()
        .zip(keys)
        .map(|(leaf, key)| {
            let n = leaf.path.len();
            let name = leaf.path.last().cloned().unwrap_or_default();
            let expression = match leaf.kind {
                LeafKind::Index => {
                    // Fall back to the array's own name.
                    let key = key.unwrap_or_else(|| leaf.path[n.saturating_sub(2)].clone());
                    Expression::new("indexed_on", vec![Param::field(key)])
                }
                LeafKind::List => Expression::new("list_val", vec![Param::field(name)]),
                LeafKind::Ontology => Expression::single_val(name),
                LeafKind::Scalar(kind) => {
                    Expression::new(default_function(&name, kind), vec![Param::field(name)])
                }
            };
            TemplateLine::new(leaf.display, Some(expression)).with_description(leaf.description)
        })
        .collect()
}

fn default_function(name: &str, kind: ScalarKind) -> &'static str {
    let lower = name.to_ascii_lowercase();
    if lower.starts_with("date") || lower.ends_with("date") {
        "single_date"
    } else if lower.starts_with("is_") || lower.starts_with("has_") {
        "boolean"
    } else if lower.starts_with("number_") || lower.starts_with("age_") || lower.contains("_per_") {
        "integer"
    } else {
        match kind {
            ScalarKind::Boolean => "boolean",
            ScalarKind::Integer => "integer",
            ScalarKind::Number => "float",
            ScalarKind::String | ScalarKind::Unknown => "single_val",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn openapi() -> SchemaDocument {
        SchemaDocument::new(json!({
            "openapi": "3.0.0",
            "components": {"schemas": {
                "Donor": {
                    "type": "object",
                    "required": ["submitter_donor_id"],
                    "properties": {
                        "submitter_donor_id": {"type": "string", "description": "Donor id"},
                        "is_deceased": {"type": "boolean"},
                        "date_of_birth": {"type": "string"},
                        "gender": {"$ref": "#/components/schemas/OntologyTerm"},
                        "comorbidities": {"type": "array", "items": {"type": "string"}},
                        "primary_diagnoses": {
                            "type": "array",
                            "items": {"$ref": "#/components/schemas/PrimaryDiagnosis"}
                        }
                    }
                },
                "PrimaryDiagnosis": {
                    "description": "A diagnosis",
                    "allOf": [{
                        "type": "object",
                        "properties": {
                            "submitter_primary_diagnosis_id": {"type": "string"},
                            "number_lymph_nodes": {"type": ["integer", "null"]},
                            "specimens": {
                                "type": "array",
                                "items": {"$ref": "#/components/schemas/Specimen"}
                            }
                        }
                    }]
                },
                "Specimen": {
                    "type": "object",
                    "properties": {"submitter_specimen_id": {"type": "string"}, "weight": {"type": "number"}}
                },
                "OntologyTerm": {
                    "type": "object",
                    "properties": {"id": {"type": "string"}, "label": {"type": "string"}}
                }
            }}
        }))
    }

    #[test]
    fn scaffold_follows_refs_and_combinators() {
        let node = openapi().scaffold(Some("Donor")).unwrap();
        let SchemaNode::Object(props) = node else {
            panic!("object expected");
        };
        assert!(props[0].required);
        assert_eq!(props[0].description.as_deref(), Some("Donor id"));
        assert_eq!(props[3].node, SchemaNode::Ontology);
        assert_eq!(
            props[4].node,
            SchemaNode::Array(Box::new(SchemaNode::Scalar(ScalarKind::String)))
        );
        assert_eq!(props[5].description.as_deref(), None);
        assert!(matches!(&props[5].node, SchemaNode::Array(item) if matches!(item.as_ref(), SchemaNode::Object(p) if p.len() == 3)));
    }

    #[test]
    fn default_template_lines() {
        let template = openapi().template(Some("Donor")).unwrap();
        let rendered: Vec<String> = template
            .lines
            .iter()
            .map(|l| format!("{}, {}", l.display, l.expression.as_ref().unwrap()))
            .collect();
        assert_eq!(
            rendered,
            vec![
                "submitter_donor_id*, {single_val(submitter_donor_id)}",
                "is_deceased, {boolean(is_deceased)}",
                "date_of_birth, {single_date(date_of_birth)}",
                "gender+, {single_val(gender)}",
                "comorbidities, {list_val(comorbidities)}",
                "primary_diagnoses.INDEX, {indexed_on(submitter_primary_diagnosis_id)}",
                "primary_diagnoses.INDEX.submitter_primary_diagnosis_id, {single_val(submitter_primary_diagnosis_id)}",
                "primary_diagnoses.INDEX.number_lymph_nodes, {integer(number_lymph_nodes)}",
                "primary_diagnoses.INDEX.specimens.INDEX, {indexed_on(submitter_specimen_id)}",
                "primary_diagnoses.INDEX.specimens.INDEX.submitter_specimen_id, {single_val(submitter_specimen_id)}",
                "primary_diagnoses.INDEX.specimens.INDEX.weight, {float(weight)}",
            ]
        );
        assert!(template.render().contains("## Donor id\nsubmitter_donor_id*, "));
    }

    #[test]
    fn cycles_are_reported() {
        let doc = SchemaDocument::new(json!({
            "$defs": {
                "Node": {"type": "object", "properties": {"next": {"$ref": "#/$defs/Node"}}}
            }
        }));
        let err = doc.scaffold(Some("Node")).unwrap_err();
        assert!(matches!(err, EtlError::Schema { .. }));
    }

    #[test]
    fn json_schema_inlines_components_as_defs() {
        let schema = openapi().json_schema(Some("Donor")).unwrap();
        assert_eq!(
            schema.pointer("/properties/primary_diagnoses/items/$ref"),
            Some(&json!("#/$defs/PrimaryDiagnosis"))
        );
        let defs = schema.get("$defs").and_then(Value::as_object).unwrap();
        let mut names: Vec<&str> = defs.keys().map(String::as_str).collect();
        names.sort();
        assert_eq!(names, vec!["OntologyTerm", "PrimaryDiagnosis", "Specimen"]);
        assert_eq!(
            schema.pointer("/$defs/PrimaryDiagnosis/allOf/0/properties/specimens/items/$ref"),
            Some(&json!("#/$defs/Specimen"))
        );
    }

    #[test]
    fn unknown_root_is_a_schema_error() {
        assert!(matches!(
            openapi().scaffold(Some("Nope")),
            Err(EtlError::Schema { .. })
        ));
    }
}
