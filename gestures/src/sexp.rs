//! S-expression plist helpers for config, template, and recording files.
//!
//! Keys are accepted both as `Value::Keyword("key")` (elisp parser) and as
//! `Value::Symbol(":key")` (default parser), so files written by Emacs and by
//! this crate read the same way.

use anyhow::{anyhow, Result};
use lexpr::Value;

/// Parse a single s-expression.
pub fn parse(raw: &str) -> Result<Value> {
    lexpr::from_str(raw).map_err(|e| anyhow!("malformed s-expression: {}", e))
}

/// Find the value following `:key` in a plist.
pub fn get<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let prefixed = format!(":{}", key);
    let mut current = value;
    while let Value::Cons(pair) = current {
        let is_key = match pair.car() {
            Value::Keyword(k) => k.as_ref() == key,
            Value::Symbol(s) => s.as_ref() == prefixed,
            _ => false,
        };
        if is_key {
            return match pair.cdr() {
                Value::Cons(next) => Some(next.car()),
                _ => None,
            };
        }
        current = pair.cdr();
    }
    None
}

pub fn get_float(value: &Value, key: &str) -> Option<f64> {
    get(value, key).and_then(Value::as_f64)
}

/// Treats `t`, `#t`, and non-nil symbols as true; `nil`, `#f`, and `()` as false.
pub fn get_bool(value: &Value, key: &str) -> Option<bool> {
    get(value, key).map(truthy)
}

/// String, symbol, or keyword value with any leading `:` removed.
pub fn get_name(value: &Value, key: &str) -> Option<String> {
    get(value, key).and_then(as_name)
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Nil | Value::Null => false,
        Value::Symbol(s) => s.as_ref() != "nil",
        _ => true,
    }
}

pub fn as_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.to_string()),
        Value::Keyword(k) => Some(k.to_string()),
        Value::Symbol(s) => Some(s.strip_prefix(':').unwrap_or(s).to_string()),
        _ => None,
    }
}

/// Elements of a proper list or vector; empty for anything else.
pub fn items(value: &Value) -> Vec<&Value> {
    let mut out = Vec::new();
    match value {
        Value::Vector(elements) => out.extend(elements.iter()),
        _ => {
            let mut current = value;
            while let Value::Cons(pair) = current {
                out.push(pair.car());
                current = pair.cdr();
            }
        }
    }
    out
}

/// All elements of a list as numbers, failing on the first non-number.
pub fn floats(value: &Value) -> Result<Vec<f64>> {
    items(value)
        .into_iter()
        .map(|v| v.as_f64().ok_or_else(|| anyhow!("expected a number, got {}", v)))
        .collect()
}

pub fn fmt_bool(b: bool) -> &'static str {
    if b {
        "t"
    } else {
        "nil"
    }
}

/// Escape a string for s-expression output.
pub fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

// ── Tests ──────────────────────────────────────────────────
