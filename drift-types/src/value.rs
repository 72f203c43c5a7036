//! Typed column values and rows with a stable JSON wire encoding
//!
//! The wire rules are load-bearing for cross-version compatibility:
//! instants travel as RFC-3339 strings, byte arrays as `\x`-prefixed
//! lower-case base16, and rows keep their keys in sorted order.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, SyncError};

/// A single typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Null,
    Timestamp(DateTime<Utc>),
    Bytes(Vec<u8>),
}

/// An ordered mapping from column name to value.
///
/// `BTreeMap` keeps key order stable, which the JSON wire encoding relies on.
pub type Row = BTreeMap<String, Value>;

impl Value {
    pub fn text(v: impl Into<String>) -> Self {
        Value::Text(v.into())
    }

    pub fn integer(v: i64) -> Self {
        Value::Integer(v)
    }

    pub fn float(v: f64) -> Self {
        Value::Float(v)
    }

    pub fn boolean(v: bool) -> Self {
        Value::Boolean(v)
    }

    pub fn bytes(v: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(v.into())
    }

    pub fn timestamp(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }

    /// Build a `Timestamp` from milliseconds since the Unix epoch.
    pub fn timestamp_ms(ms: i64) -> Self {
        Value::Timestamp(
            DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH),
        )
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Milliseconds since the Unix epoch, for timestamp-bearing values.
    ///
    /// Integers are interpreted as epoch milliseconds directly; this is how
    /// `_sync_timestamp` metadata columns are read off remote rows.
    pub fn as_millis(&self) -> Option<i64> {
        match self {
            Value::Timestamp(dt) => Some(dt.timestamp_millis()),
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Canonical serialized form, used for structural comparison and key
    /// projection fallbacks.
    pub fn canonical(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

fn encode_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(hex.len() / 2);
    let raw = hex.as_bytes();
    for chunk in raw.chunks(2) {
        let pair = std::str::from_utf8(chunk).ok()?;
        out.push(u8::from_str_radix(pair, 16).ok()?);
    }
    Some(out)
}

/// Decode a wire string back into the value it encodes.
///
/// Strings carrying the `\x` byte-array prefix or parsing as RFC-3339
/// instants re-type on the way in; everything else stays text.
fn decode_text(s: &str) -> Value {
    if let Some(hex) = s.strip_prefix("\\x") {
        if let Some(bytes) = decode_hex(hex) {
            return Value::Bytes(bytes);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Value::Timestamp(dt.with_timezone(&Utc));
    }
    Value::Text(s.to_string())
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Text(v) => serializer.serialize_str(v),
            Value::Integer(v) => serializer.serialize_i64(*v),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Boolean(v) => serializer.serialize_bool(*v),
            Value::Null => serializer.serialize_unit(),
            Value::Timestamp(dt) => {
                serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            Value::Bytes(b) => serializer.serialize_str(&encode_bytes(b)),
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON scalar")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Value, E> {
        Ok(decode_text(v))
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<Value, E> {
        Ok(decode_text(&v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Value, E> {
        Ok(Value::Integer(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Value, E> {
        i64::try_from(v)
            .map(Value::Integer)
            .map_err(|_| E::custom("integer out of range"))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<Value, E> {
        Ok(Value::Boolean(v))
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> std::result::Result<Value, D::Error> {
        d.deserialize_any(ValueVisitor)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

/// Serialize a row into its stable JSON wire form.
pub fn row_to_json(row: &Row) -> Result<String> {
    serde_json::to_string(row)
        .map_err(|e| SyncError::validation(format!("row encode failed: {e}")))
}

/// Parse a row from its JSON wire form.
pub fn row_from_json(json: &str) -> Result<Row> {
    serde_json::from_str(json)
        .map_err(|e| SyncError::validation(format!("row decode failed: {e}")))
}

/// Canonical serialized form of a whole row.
pub fn canonical_row(row: &Row) -> String {
    serde_json::to_string(row).unwrap_or_default()
}
