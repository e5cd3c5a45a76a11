//! Compile a flat [`Template`] into a [`ScaffoldNode`] tree with functions resolved.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{EtlError, EtlResult};
use crate::functions::{FunctionKind, FunctionRegistry, MappingFunction};

use super::expression::{Expression, Param};
use super::{Template, TemplateLine, INDEX};

/// An expression bound to the function it calls.
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    pub expression: Expression,
    pub function: MappingFunction,
    /// Template line the expression came from.
    pub line: usize,
}

/// The compiled mapping tree.
#[derive(Debug, Clone)]
pub enum ScaffoldNode {
    Expression(CompiledExpression),
    /// Named children in order of first appearance.
    Object(Vec<(String, ScaffoldNode)>),
    IndexedArray {
        index: CompiledExpression,
        child: Box<ScaffoldNode>,
    },
}

impl ScaffoldNode {
    /// Every compiled expression in the tree, depth first, index expressions included.
    pub fn expressions(&self) -> Vec<&CompiledExpression> {
        let mut out = Vec::new();
        self.collect_expressions(&mut out);
        out
    }

    fn collect_expressions<'a>(&'a self, out: &mut Vec<&'a CompiledExpression>) {
        match self {
            ScaffoldNode::Expression(e) => out.push(e),
            ScaffoldNode::Object(children) => {
                for (_, child) in children {
                    child.collect_expressions(out);
                }
            }
            ScaffoldNode::IndexedArray { index, child } => {
                out.push(index);
                child.collect_expressions(out);
            }
        }
    }

    /// Every parameter referenced anywhere in the tree.
    pub fn params(&self) -> Vec<&Param> {
        self.expressions()
            .into_iter()
            .flat_map(|e| e.expression.params.iter())
            .collect()
    }
}

struct Entry<'a> {
    rest: &'a [String],
    line: &'a TemplateLine,
}

/// Compile `template` against `registry`.
///
/// Lines without an expression are dropped. The result is always an
/// [`ScaffoldNode::Object`] at the root.
pub fn compile(template: &Template, registry: &FunctionRegistry) -> EtlResult<ScaffoldNode> {
    check_index_consistency(template)?;

    let entries: Vec<Entry<'_>> = template
        .lines
        .iter()
        .filter(|l| l.expression.is_some())
        .map(|l| Entry {
            rest: &l.path,
            line: l,
        })
        .collect();

    if entries.iter().any(|e| e.rest.first().is_some_and(|s| s == INDEX)) {
        return Err(EtlError::config("the template root cannot be an indexed array"));
    }

    match build(entries, &[], registry)? {
        Some(root @ ScaffoldNode::Object(_)) => Ok(root),
        _ => Err(EtlError::config("template maps no fields")),
    }
}

/// Two lines indexing the same array with different expressions is ambiguous.
fn check_index_consistency(template: &Template) -> EtlResult<()> {
    let mut seen: HashMap<String, &TemplateLine> = HashMap::new();
    for line in template.lines.iter().filter(|l| l.is_index()) {
        let Some(expr) = &line.expression else {
            continue;
        };
        match seen.get(&line.key()) {
            Some(prev) if prev.expression.as_ref() != Some(expr) => {
                let parent = line.path[..line.path.len() - 1].join(".");
                return Err(EtlError::config(format!(
                    "{parent} is indexed on both {} (line {}) and {expr} (line {})",
                    prev.expression.as_ref().map(ToString::to_string).unwrap_or_default(),
                    prev.line,
                    line.line
                )));
            }
            Some(_) => debug!(path = %line.key(), "duplicate index line merged"),
            None => {
                seen.insert(line.key(), line);
            }
        }
    }
    Ok(())
}

fn build(
    entries: Vec<Entry<'_>>,
    prefix: &[String],
    registry: &FunctionRegistry,
) -> EtlResult<Option<ScaffoldNode>> {
    let (leaves, children): (Vec<Entry<'_>>, Vec<Entry<'_>>) =
        entries.into_iter().partition(|e| e.rest.is_empty());

    if let Some(leaf) = leaves.first() {
        if let Some(child) = children.first() {
            return Err(EtlError::Template {
                line: child.line.line,
                message: format!(
                    "{} is mapped directly (line {}) and also has mapped children",
                    prefix.join("."),
                    leaf.line.line
                ),
            });
        }
        return compile_leaf(&leaves, prefix, FunctionKind::Value, registry)
            .map(|e| Some(ScaffoldNode::Expression(e)));
    }

    let mut groups: Vec<(&str, Vec<Entry<'_>>)> = Vec::new();
    for entry in children {
        let head = entry.rest[0].as_str();
        let next = Entry {
            rest: &entry.rest[1..],
            line: entry.line,
        };
        match groups.iter_mut().find(|(name, _)| *name == head) {
            Some((_, group)) => group.push(next),
            None => groups.push((head, vec![next])),
        }
    }

    if let Some(pos) = groups.iter().position(|(name, _)| *name == INDEX) {
        if groups.len() > 1 {
            let other = groups
                .iter()
                .find(|(name, _)| *name != INDEX)
                .map(|(name, _)| *name)
                .unwrap_or_default();
            return Err(EtlError::Template {
                line: groups[pos].1.first().map(|e| e.line.line).unwrap_or_default(),
                message: format!(
                    "{} has both INDEX and a named child '{other}'",
                    prefix.join(".")
                ),
            });
        }
        let (_, group) = groups.remove(pos);
        return build_indexed(group, prefix, registry).map(Some);
    }

    let mut fields = Vec::with_capacity(groups.len());
    for (name, group) in groups {
        let mut path = prefix.to_vec();
        path.push(name.to_string());
        if let Some(node) = build(group, &path, registry)? {
            fields.push((name.to_string(), node));
        }
    }
    Ok((!fields.is_empty()).then_some(ScaffoldNode::Object(fields)))
}

fn build_indexed(
    group: Vec<Entry<'_>>,
    prefix: &[String],
    registry: &FunctionRegistry,
) -> EtlResult<ScaffoldNode> {
    let mut path = prefix.to_vec();
    path.push(INDEX.to_string());

    let (index_lines, child_lines): (Vec<Entry<'_>>, Vec<Entry<'_>>) =
        group.into_iter().partition(|e| e.rest.is_empty());

    let first_line = child_lines.first().map(|e| e.line.line).unwrap_or_default();
    if index_lines.is_empty() {
        return Err(EtlError::Template {
            line: first_line,
            message: format!("{} has no index expression", path.join(".")),
        });
    }
    let index = compile_leaf(&index_lines, &path, FunctionKind::Index, registry)?;

    let child = build(child_lines, &path, registry)?.ok_or_else(|| EtlError::Template {
        line: index.line,
        message: format!("{} has no mapped fields", path.join(".")),
    })?;

    Ok(ScaffoldNode::IndexedArray {
        index,
        child: Box::new(child),
    })
}

fn compile_leaf(
    leaves: &[Entry<'_>],
    path: &[String],
    kind: FunctionKind,
    registry: &FunctionRegistry,
) -> EtlResult<CompiledExpression> {
    let first = &leaves[0];
    let Some(expression) = first.line.expression.clone() else {
        return Err(EtlError::Template {
            line: first.line.line,
            message: format!("{} has no expression", path.join(".")),
        });
    };

    if let Some(other) = leaves[1..]
        .iter()
        .find(|e| e.line.expression.as_ref() != Some(&expression))
    {
        return Err(EtlError::Template {
            line: other.line.line,
            message: format!(
                "{} is mapped more than once with different expressions (first at line {})",
                path.join("."),
                first.line.line
            ),
        });
    }

    let function = registry
        .resolve(&expression.function)
        .ok_or_else(|| EtlError::Template {
            line: first.line.line,
            message: format!("unknown function '{}'", expression.function),
        })?;
    if function.kind() != kind {
        return Err(EtlError::Template {
            line: first.line.line,
            message: format!(
                "'{}' is a {} function but {} needs a {kind} function",
                expression.function,
                function.kind(),
                path.join(".")
            ),
        });
    }

    Ok(CompiledExpression {
        function: function.clone(),
        line: first.line.line,
        expression,
    })
}
