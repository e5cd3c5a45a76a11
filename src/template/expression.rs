//! Parser for the `{function(param;param)}` mapping expression syntax.

use std::fmt;

/// Function every bare field reference compiles to.
pub const DEFAULT_FUNCTION: &str = "single_val";

/// A reference to a raw column, optionally qualified by sheet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Param {
    pub sheet: Option<String>,
    pub field: String,
}

impl Param {
    pub fn field(field: impl Into<String>) -> Self {
        Self {
            sheet: None,
            field: field.into(),
        }
    }

    pub fn qualified(sheet: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            sheet: Some(sheet.into()),
            field: field.into(),
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sheet {
            Some(sheet) if sheet.contains(['.', ' ']) => write!(f, "\"{sheet}\".{}", self.field),
            Some(sheet) => write!(f, "{sheet}.{}", self.field),
            None => f.write_str(&self.field),
        }
    }
}

/// A parsed function call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Expression {
    pub function: String,
    pub params: Vec<Param>,
}

impl Expression {
    pub fn new(function: impl Into<String>, params: Vec<Param>) -> Self {
        Self {
            function: function.into(),
            params,
        }
    }

    /// `single_val(field)`.
    pub fn single_val(field: impl Into<String>) -> Self {
        Self::new(DEFAULT_FUNCTION, vec![Param::field(field)])
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}(", self.function)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{p}")?;
        }
        f.write_str(")}")
    }
}

/// Parse the value column of a template line.
///
/// Returns `Ok(None)` for lines that carry no mapping: an empty value, or a value that starts
/// with `##` and has no `{...}` call. A bare field name compiles to `single_val(field)`.
pub fn parse_value(raw: &str) -> Result<Option<Expression>, String> {
    let value = raw.trim();
    if let Some(open) = value.find('{') {
        let close = value
            .rfind('}')
            .filter(|&close| close > open)
            .ok_or_else(|| format!("unclosed '{{' in {value:?}"))?;
        return parse_call(&value[open + 1..close]).map(Some);
    }

    let value = strip_quotes(value);
    if value.is_empty() || value.starts_with("##") {
        return Ok(None);
    }
    if value.contains(['(', ')', ';', ',']) {
        return Err(format!("expected a field name or {{function(...)}}, got {value:?}"));
    }
    let param = parse_param(value)?;
    Ok(Some(Expression::new(DEFAULT_FUNCTION, vec![param])))
}

fn parse_call(body: &str) -> Result<Expression, String> {
    let body = body.trim();
    let open = body
        .find('(')
        .ok_or_else(|| format!("expected function(params) in {body:?}"))?;
    if !body.ends_with(')') {
        return Err(format!("missing ')' in {body:?}"));
    }

    let function = body[..open].trim();
    let valid_name = !function.is_empty()
        && function
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if !valid_name {
        return Err(format!("invalid function name {function:?}"));
    }

    let args = &body[open + 1..body.len() - 1];
    let params = split_args(args)
        .into_iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .map(parse_param)
        .collect::<Result<Vec<_>, _>>()?;
    if params.is_empty() {
        return Err(format!("function {function} has no parameters"));
    }

    Ok(Expression::new(function, params))
}

/// Split on `;` or `,` outside of quotes.
fn split_args(args: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in args.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (None, '"' | '\'') => quote = Some(c),
            (None, ';' | ',') => {
                parts.push(&args[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&args[start..]);
    parts
}

fn parse_param(raw: &str) -> Result<Param, String> {
    let raw = raw.trim();
    let (sheet, field) = match raw.chars().next() {
        Some(q @ ('"' | '\'')) => {
            let close = raw[1..]
                .find(q)
                .map(|i| i + 1)
                .ok_or_else(|| format!("unclosed quote in parameter {raw:?}"))?;
            let sheet = &raw[1..close];
            let rest = &raw[close + 1..];
            match rest.strip_prefix('.') {
                Some(field) => (Some(sheet), field),
                None if rest.trim().is_empty() => (None, sheet),
                None => return Err(format!("expected '.' after quoted sheet in {raw:?}")),
            }
        }
        _ => match raw.split_once('.') {
            Some((sheet, field)) => (Some(sheet), field),
            None => (None, raw),
        },
    };

    let field = strip_quotes(field.trim());
    if field.is_empty() {
        return Err(format!("empty field name in parameter {raw:?}"));
    }
    Ok(Param {
        sheet: sheet.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        field: field.to_string(),
    })
}

fn strip_quotes(s: &str) -> &str {
    s.trim_matches(|c| c == '"' || c == '\'').trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_calls_with_qualified_params() {
        let e = parse_value("{single_date(Diagnosis.diagnosis_date)}").unwrap().unwrap();
        assert_eq!(e.function, "single_date");
        assert_eq!(e.params, vec![Param::qualified("Diagnosis", "diagnosis_date")]);

        let e = parse_value(" {concat_vals(a; b,\"Sample Sheet\".c)} ").unwrap().unwrap();
        assert_eq!(
            e.params,
            vec![
                Param::field("a"),
                Param::field("b"),
                Param::qualified("Sample Sheet", "c")
            ]
        );
    }

    #[test]
    fn plugin_functions_keep_module_prefix() {
        let e = parse_value("{vital.deceased(is_deceased)}").unwrap().unwrap();
        assert_eq!(e.function, "vital.deceased");
    }

    #[test]
    fn bare_values_and_comments() {
        assert_eq!(parse_value("primary_site").unwrap(), Some(Expression::single_val("primary_site")));
        assert_eq!(parse_value("").unwrap(), None);
        assert_eq!(parse_value("\"##not mapped\"").unwrap(), None);
        let e = parse_value("\"## described\" {integer(age)}").unwrap().unwrap();
        assert_eq!(e.function, "integer");
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(parse_value("{single_val(site}").is_err());
        assert!(parse_value("{single_val}").is_err());
        assert!(parse_value("{single_val()}").is_err());
        assert!(parse_value("{bad name(x)}").is_err());
        assert!(parse_value("{single_val(Sheet.)}").is_err());
        assert!(parse_value("a;b").is_err());
    }

    #[test]
    fn display_round_trips() {
        let e = Expression::new(
            "concat_vals",
            vec![Param::field("a"), Param::qualified("Sample Sheet", "b")],
        );
        assert_eq!(e.to_string(), "{concat_vals(a;\"Sample Sheet\".b)}");
        assert_eq!(parse_value(&e.to_string()).unwrap(), Some(e));
    }
}
