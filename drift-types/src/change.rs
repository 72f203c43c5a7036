//! Recorded changes and detected conflicts

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::value::Row;

/// Milliseconds since the Unix epoch, from the wall clock.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// The kind of mutation a change records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "insert" => Some(Operation::Insert),
            "update" => Some(Operation::Update),
            "delete" => Some(Operation::Delete),
            _ => None,
        }
    }
}

/// A mutation recorded against a tracked table.
///
/// `id` and `timestamp` are assigned by the change log at record time;
/// `data` carries the post-image, `old_data` the pre-image for updates
/// and deletes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: String,
    pub table: String,
    pub op: Operation,
    pub timestamp: i64,
    pub data: Row,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_data: Option<Row>,
}

impl Change {
    /// The row that carries this change's key columns.
    ///
    /// Deletes may record an empty post-image and keep the key in the
    /// pre-image.
    pub fn key_row(&self) -> &Row {
        if !self.data.is_empty() {
            &self.data
        } else {
            self.old_data.as_ref().unwrap_or(&self.data)
        }
    }
}

/// The record-time descriptor handed to the change log.
#[derive(Debug, Clone)]
pub struct ChangeRequest {
    pub table: String,
    pub op: Operation,
    pub data: Row,
    pub old_data: Option<Row>,
}

impl ChangeRequest {
    pub fn new(table: impl Into<String>, op: Operation, data: Row) -> Self {
        Self {
            table: table.into(),
            op,
            data,
            old_data: None,
        }
    }

    pub fn with_old_data(mut self, old_data: Row) -> Self {
        self.old_data = Some(old_data);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.table.trim().is_empty() {
            return Err(SyncError::validation_field("table", "table name is empty"));
        }
        match self.op {
            Operation::Update | Operation::Delete => {
                if self.data.is_empty() && self.old_data.as_ref().map_or(true, |r| r.is_empty()) {
                    return Err(SyncError::validation(format!(
                        "{} change for '{}' carries no key columns",
                        self.op.as_str(),
                        self.table
                    )));
                }
            }
            Operation::Insert => {}
        }
        Ok(())
    }
}

/// One record diverging on both sides.
///
/// For update-vs-delete asymmetries the deleting side's row is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub table: String,
    pub key: String,
    pub local: Row,
    pub remote: Row,
    pub local_timestamp: i64,
    pub remote_timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_operation_round_trip() {
        for op in [Operation::Insert, Operation::Update, Operation::Delete] {
            assert_eq!(Operation::parse(op.as_str()), Some(op));
        }
        assert_eq!(Operation::parse("upsert"), None);
    }

    #[test]
    fn test_request_validation() {
        let mut data = Row::new();
        data.insert("id".to_string(), Value::text("1"));

        assert!(ChangeRequest::new("users", Operation::Insert, data.clone())
            .validate()
            .is_ok());
        assert!(ChangeRequest::new("", Operation::Insert, data.clone())
            .validate()
            .is_err());
        assert!(ChangeRequest::new("users", Operation::Delete, Row::new())
            .validate()
            .is_err());
        assert!(
            ChangeRequest::new("users", Operation::Delete, Row::new())
                .with_old_data(data)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_key_row_falls_back_to_pre_image() {
        let mut old = Row::new();
        old.insert("id".to_string(), Value::text("7"));
        let change = Change {
            id: "c1".to_string(),
            table: "users".to_string(),
            op: Operation::Delete,
            timestamp: 1,
            data: Row::new(),
            old_data: Some(old.clone()),
        };
        assert_eq!(change.key_row(), &old);
    }
}
