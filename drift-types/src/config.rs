//! Sync configuration

use std::fmt;
use std::sync::Arc;

use crate::change::Conflict;
use crate::error::{Result, SyncError};
use crate::value::Row;

/// Where the remote credential comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// The token itself.
    Token(String),
    /// Name of an environment variable holding the token, read at
    /// `initialize` time.
    Env(String),
}

impl Credential {
    /// Resolve to the literal token, failing with a non-refreshable auth
    /// error on anything unusable.
    pub fn resolve(&self) -> Result<String> {
        let (token, origin) = match self {
            Credential::Token(t) => (t.clone(), "literal credential".to_string()),
            Credential::Env(name) => match std::env::var(name) {
                Ok(v) => (v, format!("environment variable '{name}'")),
                Err(_) => {
                    return Err(SyncError::auth(format!(
                        "environment variable '{name}' is not set"
                    )))
                }
            },
        };
        let token = token.trim().to_string();
        if token.is_empty() {
            return Err(SyncError::auth(format!("{origin} is empty")));
        }
        if token.chars().any(|c| c.is_control()) {
            return Err(SyncError::auth(format!(
                "{origin} contains control characters"
            )));
        }
        Ok(token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Token(_) => f.write_str("Credential::Token(***)"),
            Credential::Env(name) => write!(f, "Credential::Env({name})"),
        }
    }
}

/// Signature of a user-supplied merge function.
pub type MergeFn = dyn Fn(&Conflict) -> Result<Row> + Send + Sync;

/// Declared conflict-resolution policy.
#[derive(Clone)]
pub enum ConflictStrategy {
    LocalWins,
    RemoteWins,
    /// The side with the larger timestamp wins; ties favor remote.
    LatestWins,
    Merge(Arc<MergeFn>),
    /// Conflicts are surfaced without being applied.
    Manual,
}

impl fmt::Debug for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictStrategy::LocalWins => "LocalWins",
            ConflictStrategy::RemoteWins => "RemoteWins",
            ConflictStrategy::LatestWins => "LatestWins",
            ConflictStrategy::Merge(_) => "Merge(..)",
            ConflictStrategy::Manual => "Manual",
        };
        f.write_str(name)
    }
}

impl ConflictStrategy {
    pub fn is_manual(&self) -> bool {
        matches!(self, ConflictStrategy::Manual)
    }
}

/// Include/exclude lists and regex patterns narrowing the synchronized
/// table set. Patterns are compiled by the engine's table filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableFilterConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub credential: Credential,
    /// Ordered list of table names to synchronize.
    pub tables: Vec<String>,
    /// Period of the auto-sync tick, in milliseconds.
    pub sync_interval_ms: u64,
    pub conflict_strategy: ConflictStrategy,
    /// Maximum records per upload batch.
    pub batch_size: usize,
    /// Maximum in-flight batches.
    pub concurrency: usize,
    pub compression_enabled: bool,
    /// Minimum payload size before compression kicks in, in bytes.
    pub compression_threshold_bytes: usize,
    pub table_filter: TableFilterConfig,
    /// Retry attempts for transient failures.
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub backoff_factor: f64,
    /// Timeout applied to every remote call, in milliseconds.
    pub remote_timeout_ms: u64,
    /// Rows whose `_sync_timestamp`s differ by less than this are treated
    /// as equal during conflict detection.
    pub conflict_timestamp_tolerance_ms: Option<i64>,
}

impl SyncConfig {
    pub fn new(credential: impl Into<String>) -> Self {
        Self {
            credential: Credential::Token(credential.into()),
            ..Self::default()
        }
    }

    pub fn with_tables(mut self, tables: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tables = tables.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SyncError::validation_field("batch_size", "must be > 0"));
        }
        if self.concurrency == 0 {
            return Err(SyncError::validation_field("concurrency", "must be > 0"));
        }
        if self.backoff_factor < 1.0 {
            return Err(SyncError::validation_field(
                "backoff_factor",
                "must be >= 1.0",
            ));
        }
        if self.max_retry_delay_ms < self.initial_retry_delay_ms {
            return Err(SyncError::validation_field(
                "max_retry_delay_ms",
                "must be >= initial_retry_delay_ms",
            ));
        }
        if self.tables.iter().any(|t| t.trim().is_empty()) {
            return Err(SyncError::validation_field("tables", "empty table name"));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            credential: Credential::Token(String::new()),
            tables: Vec::new(),
            sync_interval_ms: 30_000,
            conflict_strategy: ConflictStrategy::LatestWins,
            batch_size: 1_000,
            concurrency: 3,
            compression_enabled: false,
            compression_threshold_bytes: 1_024,
            table_filter: TableFilterConfig::default(),
            max_retries: 3,
            initial_retry_delay_ms: 1_000,
            max_retry_delay_ms: 30_000,
            backoff_factor: 2.0,
            remote_timeout_ms: 30_000,
            conflict_timestamp_tolerance_ms: None,
        }
    }
}
