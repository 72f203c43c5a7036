//! Table filtering
//!
//! Accept function over table names with fixed precedence: explicit
//! excludes beat exclude patterns beat includes. Empty include lists
//! accept everything that is not excluded.

use std::collections::HashSet;

use regex::Regex;

use drift_types::{now_ms, Change, Result, SyncError, TableFilterConfig};

/// Compiled include/exclude filter.
#[derive(Debug, Clone, Default)]
pub struct TableFilter {
    include: HashSet<String>,
    exclude: HashSet<String>,
    include_patterns: Vec<Regex>,
    exclude_patterns: Vec<Regex>,
}

fn compile(patterns: &[String], field: &str) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p)
                .map_err(|e| SyncError::validation_field(field, format!("bad pattern '{p}': {e}")))
        })
        .collect()
}

impl TableFilter {
    /// Filter that accepts every table.
    pub fn accept_all() -> Self {
        Self::default()
    }

    pub fn from_config(config: &TableFilterConfig) -> Result<Self> {
        Ok(Self {
            include: config.include.iter().cloned().collect(),
            exclude: config.exclude.iter().cloned().collect(),
            include_patterns: compile(&config.include_patterns, "include_patterns")?,
            exclude_patterns: compile(&config.exclude_patterns, "exclude_patterns")?,
        })
    }

    pub fn accepts(&self, table: &str) -> bool {
        if self.exclude.contains(table) {
            return false;
        }
        if self.exclude_patterns.iter().any(|p| p.is_match(table)) {
            return false;
        }
        if self.include.is_empty() && self.include_patterns.is_empty() {
            return true;
        }
        if self.include.contains(table) {
            return true;
        }
        self.include_patterns.iter().any(|p| p.is_match(table))
    }

    /// Drop changes whose table is rejected.
    pub fn filter_changes(&self, changes: Vec<Change>) -> Vec<Change> {
        changes
            .into_iter()
            .filter(|c| self.accepts(&c.table))
            .collect()
    }
}

/// Observed shape of a table, for metadata-based filtering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableMetadata {
    pub row_count: u64,
    pub byte_size: u64,
    /// Milliseconds since epoch of the last mutation, when known.
    pub last_modified: Option<i64>,
}

/// Thresholds over table metadata.
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    pub max_rows: Option<u64>,
    pub max_bytes: Option<u64>,
    /// Only accept tables touched within this window.
    pub modified_within_ms: Option<i64>,
}

impl MetadataFilter {
    pub fn accepts(&self, metadata: &TableMetadata) -> bool {
        self.accepts_at(metadata, now_ms())
    }

    pub fn accepts_at(&self, metadata: &TableMetadata, now: i64) -> bool {
        if let Some(max) = self.max_rows {
            if metadata.row_count > max {
                return false;
            }
        }
        if let Some(max) = self.max_bytes {
            if metadata.byte_size > max {
                return false;
            }
        }
        if let Some(window) = self.modified_within_ms {
            match metadata.last_modified {
                Some(last) if now - last <= window => {}
                _ => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_types::{Operation, Row};

    fn filter(config: TableFilterConfig) -> TableFilter {
        TableFilter::from_config(&config).unwrap()
    }

    fn change(table: &str) -> Change {
        Change {
            id: table.to_string(),
            table: table.to_string(),
            op: Operation::Insert,
            timestamp: 1,
            data: Row::new(),
            old_data: None,
        }
    }

    #[test]
    fn test_empty_filter_accepts_everything() {
        let f = TableFilter::accept_all();
        assert!(f.accepts("users"));
        assert!(f.accepts("logs"));
    }

    #[test]
    fn test_explicit_exclude_beats_explicit_include() {
        let f = filter(TableFilterConfig {
            include: vec!["users".to_string()],
            exclude: vec!["users".to_string()],
            ..TableFilterConfig::default()
        });
        assert!(!f.accepts("users"));
    }

    #[test]
    fn test_exclude_pattern_beats_include_list() {
        let f = filter(TableFilterConfig {
            include: vec!["audit_log".to_string()],
            exclude_patterns: vec!["^audit_".to_string()],
            ..TableFilterConfig::default()
        });
        assert!(!f.accepts("audit_log"));
    }

    #[test]
    fn test_include_list_rejects_everything_else() {
        let f = filter(TableFilterConfig {
            include: vec!["users".to_string()],
            ..TableFilterConfig::default()
        });
        assert!(f.accepts("users"));
        assert!(!f.accepts("products"));
    }

    #[test]
    fn test_include_pattern() {
        let f = filter(TableFilterConfig {
            include_patterns: vec!["^crm_".to_string()],
            ..TableFilterConfig::default()
        });
        assert!(f.accepts("crm_contacts"));
        assert!(!f.accepts("billing"));
    }

    #[test]
    fn test_bad_pattern_is_validation_error() {
        let err = TableFilter::from_config(&TableFilterConfig {
            include_patterns: vec!["(unclosed".to_string()],
            ..TableFilterConfig::default()
        })
        .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_filter_changes() {
        let f = filter(TableFilterConfig {
            exclude: vec!["logs".to_string()],
            ..TableFilterConfig::default()
        });
        let kept = f.filter_changes(vec![change("users"), change("logs"), change("products")]);
        let tables: Vec<&str> = kept.iter().map(|c| c.table.as_str()).collect();
        assert_eq!(tables, vec!["users", "products"]);
    }

    #[test]
    fn test_metadata_thresholds() {
        let f = MetadataFilter {
            max_rows: Some(100),
            max_bytes: Some(10_000),
            modified_within_ms: Some(1_000),
        };
        let fresh = TableMetadata {
            row_count: 50,
            byte_size: 5_000,
            last_modified: Some(9_500),
        };
        assert!(f.accepts_at(&fresh, 10_000));

        let too_big = TableMetadata {
            row_count: 500,
            ..fresh.clone()
        };
        assert!(!f.accepts_at(&too_big, 10_000));

        let stale = TableMetadata {
            last_modified: Some(1_000),
            ..fresh
        };
        assert!(!f.accepts_at(&stale, 10_000));
    }
}
