//! Schema description and its process-lifetime cache

use asksql_duck::{Database, DuckError, TableSchema};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// Source of table metadata. Implemented by [`Database`].
pub trait SchemaSource: Send + Sync + 'static {
    fn introspect(&self) -> Result<Vec<TableSchema>, DuckError>;
}

impl SchemaSource for Database {
    fn introspect(&self) -> Result<Vec<TableSchema>, DuckError> {
        Database::introspect(self)
    }
}

/// Tables and columns in enumeration order, plus the prompt text rendered
/// from them (one `Table {name}: {col} ({type}), ...` line per table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescription {
    tables: Vec<TableSchema>,
    rendered: String,
}

impl SchemaDescription {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        let rendered = render(&tables);
        Self { tables, rendered }
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

impl fmt::Display for SchemaDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

fn render(tables: &[TableSchema]) -> String {
    let mut out = String::new();
    for table in tables {
        let columns: Vec<String> = table
            .columns
            .iter()
            .map(|c| format!("{} ({})", c.name, c.data_type))
            .collect();
        out.push_str(&format!("Table {}: {}\n", table.name, columns.join(", ")));
    }
    out
}

/// Introspects once and serves the same description until invalidated.
///
/// The first population happens under the lock, so concurrent first callers
/// wait for a single introspection instead of racing. A failed introspection
/// leaves the cache empty and the next call tries again.
pub struct SchemaCache {
    source: Arc<dyn SchemaSource>,
    cached: Mutex<Option<Arc<SchemaDescription>>>,
}

impl SchemaCache {
    pub fn new(source: Arc<dyn SchemaSource>) -> Self {
        Self {
            source,
            cached: Mutex::new(None),
        }
    }

    pub async fn get_schema(&self) -> Result<Arc<SchemaDescription>, DuckError> {
        let mut slot = self.cached.lock().await;
        if let Some(schema) = slot.as_ref() {
            return Ok(Arc::clone(schema));
        }

        tracing::info!("Fetching schema from database");
        let started = Instant::now();
        let source = Arc::clone(&self.source);
        let tables = tokio::task::spawn_blocking(move || source.introspect())
            .await
            .map_err(|e| DuckError::Introspection(format!("introspection task failed: {e}")))??;

        let schema = Arc::new(SchemaDescription::new(tables));
        tracing::info!(
            tables = schema.tables().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Schema fetched"
        );
        *slot = Some(Arc::clone(&schema));
        Ok(schema)
    }

    /// Drop the cached description; the next [`get_schema`](Self::get_schema)
    /// introspects again.
    pub async fn invalidate(&self) {
        let mut slot = self.cached.lock().await;
        if slot.take().is_some() {
            tracing::info!("Schema cache invalidated");
        }
    }

    pub async fn is_cached(&self) -> bool {
        self.cached.lock().await.is_some()
    }
}
