//! Positional parameter substitution
//!
//! `$N` markers are rendered into SQL literals: strings with doubled
//! single quotes, timestamps as quoted ISO-8601, byte arrays as quoted
//! `\xHH…`, booleans as bare `true`/`false`, null as `NULL`.

use chrono::SecondsFormat;

use drift_types::{Result, SyncError, Value};

fn render(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => {
            if !f.is_finite() {
                return Err(SyncError::validation("non-finite float parameter"));
            }
            f.to_string()
        }
        Value::Boolean(b) => b.to_string(),
        Value::Null => "NULL".to_string(),
        Value::Timestamp(dt) => format!("'{}'", dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
        Value::Bytes(bytes) => {
            let mut hex = String::with_capacity(bytes.len() * 2);
            for b in bytes {
                hex.push_str(&format!("{:02x}", b));
            }
            format!("'\\x{hex}'")
        }
    })
}

/// Substitute `$1..$N` markers with rendered literals.
///
/// Every supplied parameter must be referenced and every referenced index
/// must exist; either mismatch is a validation error, not a runtime one.
pub fn substitute_params(sql: &str, params: &[Value]) -> Result<String> {
    if sql.trim().is_empty() {
        return Err(SyncError::validation("empty SQL statement"));
    }

    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    let mut max_seen = 0usize;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let mut digits = String::new();
        while let Some(d) = chars.peek().copied() {
            if d.is_ascii_digit() {
                digits.push(d);
                chars.next();
            } else {
                break;
            }
        }
        if digits.is_empty() {
            out.push('$');
            continue;
        }
        let index: usize = digits
            .parse()
            .map_err(|_| SyncError::validation(format!("bad parameter marker ${digits}")))?;
        if index == 0 || index > params.len() {
            return Err(SyncError::validation(format!(
                "parameter ${index} out of range, {} supplied",
                params.len()
            )));
        }
        max_seen = max_seen.max(index);
        out.push_str(&render(&params[index - 1])?);
    }

    if max_seen < params.len() {
        return Err(SyncError::validation(format!(
            "{} parameters supplied but only ${max_seen} referenced",
            params.len()
        )));
    }
    Ok(out)
}
