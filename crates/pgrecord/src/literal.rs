//! SQL literal formatting.
//!
//! Every value interpolated into SQL text goes through [`format_literal`]; raw values
//! are never concatenated into statements.

use crate::value::{Value, is_bool_type, is_truthy_text};

/// The literal emitted for empty values.
pub const NULL: &str = "NULL";

/// Format `value` as a PostgreSQL literal for a column of type `data_type`.
///
/// - empty values (`NULL`, `""`) become `NULL`
/// - boolean types become `true` / `false`
/// - numeric types pass through unquoted when the value is a well-formed number
/// - everything else is single-quoted with embedded quotes doubled
pub fn format_literal(data_type: &str, value: &Value) -> String {
    if value.is_empty() {
        return NULL.to_string();
    }

    if is_bool_type(data_type) {
        return if literal_truthy(value) { "true" } else { "false" }.to_string();
    }

    if is_numeric_type(data_type) {
        match value {
            Value::Int(i) => return i.to_string(),
            Value::Float(f) if f.is_finite() => return f.to_string(),
            Value::Bool(b) => return if *b { "1" } else { "0" }.to_string(),
            Value::Text(s) if is_numeric_literal(s.trim()) => return s.trim().to_string(),
            _ => {}
        }
    }

    quote(&value.to_string())
}

/// Single-quote a string, doubling embedded quotes.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            out.push('\'');
        }
        out.push(ch);
    }
    out.push('\'');
    out
}

fn literal_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::Text(s) => is_truthy_text(s),
        Value::Null => false,
    }
}

/// Whether `data_type` (as reported by `format_type`) is a numeric type.
pub fn is_numeric_type(data_type: &str) -> bool {
    let t = data_type.trim().to_ascii_lowercase();
    let base = t.split('(').next().unwrap_or_default().trim();
    matches!(
        base,
        "smallint"
            | "integer"
            | "bigint"
            | "int"
            | "int2"
            | "int4"
            | "int8"
            | "numeric"
            | "decimal"
            | "real"
            | "float4"
            | "float8"
            | "double precision"
            | "oid"
            | "smallserial"
            | "serial"
            | "bigserial"
    )
}

/// `[+-]digits[.digits][e[+-]digits]`, with at least one digit in the mantissa.
fn is_numeric_literal(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        i += 1;
    }
    let mut mantissa_digits = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
        mantissa_digits += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
            mantissa_digits += 1;
        }
    }
    if mantissa_digits == 0 {
        return false;
    }
    if i < bytes.len() && matches!(bytes[i], b'e' | b'E') {
        i += 1;
        if matches!(bytes.get(i), Some(b'+' | b'-')) {
            i += 1;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return false;
        }
    }
    i == bytes.len()
}
