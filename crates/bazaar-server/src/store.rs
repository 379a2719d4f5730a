//! Async access to the synchronous [`Database`].
//!
//! Every call runs on tokio's blocking pool so SQLite I/O and the busy wait
//! on the write lock never stall a connection task's executor thread.

use std::sync::Arc;

use bazaar_store::{Database, StoreError};

use crate::error::ServerError;

#[derive(Debug, Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    pub fn new(db: Database) -> Self {
        Self { db: Arc::new(db) }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Run `f` against the database on the blocking pool.
    pub async fn call<T, F>(&self, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| ServerError::Internal(format!("store task failed: {e}")))?
            .map_err(ServerError::from)
    }
}
