//! Local store gateway
//!
//! Parameterized query/execute over an embedder-provided relational
//! handle, plus scoped transactions: `BEGIN` on entry, `COMMIT` on
//! success, `ROLLBACK` on any failure including unwinds. Nested
//! transactions are rejected.

pub mod params;
pub mod sqlite;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::debug;

use drift_types::{Result, Row, SyncError, Value};

pub use params::substitute_params;
pub use sqlite::SqliteStore;

/// The minimal relational interface the embedder provides.
///
/// Statements arrive fully rendered; parameter substitution happens in
/// the gateway.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn query(&self, sql: &str) -> Result<Vec<Row>>;
    async fn execute(&self, sql: &str) -> Result<()>;
    async fn begin(&self) -> Result<()>;
    async fn commit(&self) -> Result<()>;
    async fn rollback(&self) -> Result<()>;
}

/// Gateway over a borrowed local store handle.
#[derive(Clone)]
pub struct LocalGateway {
    store: Arc<dyn LocalStore>,
    in_tx: Arc<AtomicBool>,
}

impl LocalGateway {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self {
            store,
            in_tx: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Read with positional parameters.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let sql = substitute_params(sql, params)?;
        self.store.query(&sql).await
    }

    /// Write with positional parameters.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<()> {
        let sql = substitute_params(sql, params)?;
        self.store.execute(&sql).await
    }

    /// Run `body` inside a transaction scope.
    ///
    /// The body receives a handle onto the same gateway and may
    /// query/execute through it. Re-entrant calls fail with a validation
    /// error.
    pub async fn transaction<T, F, Fut>(&self, body: F) -> Result<T>
    where
        F: FnOnce(LocalGateway) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.in_tx.swap(true, Ordering::SeqCst) {
            return Err(SyncError::validation(
                "nested transactions are not supported",
            ));
        }

        let result = async {
            self.store.begin().await?;
            match AssertUnwindSafe(body(self.clone())).catch_unwind().await {
                Ok(Ok(value)) => {
                    self.store.commit().await?;
                    Ok(value)
                }
                Ok(Err(err)) => {
                    if let Err(rb) = self.store.rollback().await {
                        debug!("rollback after failed transaction also failed: {rb}");
                    }
                    Err(err)
                }
                Err(panic) => {
                    let _ = self.store.rollback().await;
                    self.in_tx.store(false, Ordering::SeqCst);
                    std::panic::resume_unwind(panic);
                }
            }
        }
        .await;

        self.in_tx.store(false, Ordering::SeqCst);
        result
    }
}
