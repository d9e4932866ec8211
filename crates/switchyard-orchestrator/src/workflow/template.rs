//! `{{name}}` placeholder expansion over JSON trees.
//!
//! Substitution happens only at string leaves. A string consisting of
//! exactly one placeholder is replaced by the raw context value so numbers,
//! objects and arrays keep their type; anywhere else the value is spliced as
//! text. Unresolved placeholders stay verbatim.

use serde_json::{Map, Value};

/// Expand every placeholder in `input` against `context`.
pub fn expand(input: &Value, context: &Map<String, Value>) -> Value {
    match input {
        Value::String(s) => expand_string(s, context),
        Value::Array(items) => Value::Array(items.iter().map(|v| expand(v, context)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand(v, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Look up a dotted path (`a.b.0`) in the context.
pub fn resolve_path<'a>(context: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = context.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn expand_string(s: &str, context: &Map<String, Value>) -> Value {
    if let Some(name) = sole_placeholder(s) {
        if let Some(value) = resolve_path(context, name) {
            return value.clone();
        }
        return Value::String(s.to_string());
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            out.push_str(&rest[open..]);
            return Value::String(out);
        };
        let name = after[..close].trim();
        match resolve_path(context, name) {
            Some(Value::String(text)) => out.push_str(text),
            Some(value) => out.push_str(&value.to_string()),
            None => out.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    Value::String(out)
}

/// `Some(name)` when the whole string is a single `{{name}}`.
fn sole_placeholder(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}
