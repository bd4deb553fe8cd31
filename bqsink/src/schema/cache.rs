use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::schema::RecordSchema;

/// One cached table schema with the instant it was fetched.
#[derive(Debug, Clone)]
struct CachedSchema {
    schema: Arc<RecordSchema>,
    fetched_at: Instant,
}

/// Internal storage for schema cache data.
#[derive(Debug, Default)]
struct Inner {
    schemas: HashMap<String, CachedSchema>,
}

/// Thread-safe cache of table schemas fetched from the warehouse.
///
/// Shared between the record formatter and the write orchestrator; all
/// mutation happens under one lock so concurrent writers see a consistent
/// fetched-schema / last-fetch-time pair. Entries are replaced wholesale on
/// re-fetch, never patched.
#[derive(Debug, Clone, Default)]
pub struct SchemaCache {
    inner: Arc<Mutex<Inner>>,
}

impl SchemaCache {
    /// Creates a new empty schema cache.
    pub fn new() -> SchemaCache {
        SchemaCache::default()
    }

    /// Stores a freshly fetched schema for a table, replacing any previous
    /// entry, and returns the shared handle to it.
    pub async fn insert(&self, table_id: impl Into<String>, schema: RecordSchema) -> Arc<RecordSchema> {
        let schema = Arc::new(schema);
        let mut inner = self.inner.lock().await;
        inner.schemas.insert(
            table_id.into(),
            CachedSchema {
                schema: schema.clone(),
                fetched_at: Instant::now(),
            },
        );

        schema
    }

    /// Returns the cached schema for a table when it is younger than `ttl`.
    pub async fn get_fresh(&self, table_id: &str, ttl: Duration) -> Option<Arc<RecordSchema>> {
        let inner = self.inner.lock().await;
        inner
            .schemas
            .get(table_id)
            .filter(|cached| cached.fetched_at.elapsed() < ttl)
            .map(|cached| cached.schema.clone())
    }

    /// Returns the cached schema for a table regardless of age.
    ///
    /// Used as the fallback when a refresh fails: the last good schema beats
    /// no schema.
    pub async fn get(&self, table_id: &str) -> Option<Arc<RecordSchema>> {
        let inner = self.inner.lock().await;
        inner.schemas.get(table_id).map(|cached| cached.schema.clone())
    }
}
