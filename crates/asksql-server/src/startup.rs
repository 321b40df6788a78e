//! Opening and optionally seeding the database at start-up

use crate::config::DatabaseConfig;
use anyhow::Context;
use asksql_duck::{Database, IN_MEMORY};
use std::path::Path;

/// Open the configured database: in-memory, read-only, or read-write (creating
/// the parent directory of a file path when needed)
pub fn open_database(config: &DatabaseConfig) -> anyhow::Result<Database> {
    if config.path == IN_MEMORY {
        return Ok(Database::in_memory()?);
    }
    if config.read_only {
        return Database::open_read_only(&config.path)
            .with_context(|| format!("opening {} read-only", config.path));
    }
    if let Some(parent) = Path::new(&config.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    Database::open(&config.path).with_context(|| format!("opening {}", config.path))
}

/// Seed the demo tables when `seed_demo` is set and the database has no
/// tables. Read-only databases are never seeded. Returns whether seeding ran.
pub fn maybe_seed(database: &Database, config: &DatabaseConfig) -> anyhow::Result<bool> {
    if !config.seed_demo || config.read_only {
        return Ok(false);
    }
    if !database.introspect()?.is_empty() {
        tracing::debug!(database = %database.location(), "Database has tables, skipping demo seed");
        return Ok(false);
    }
    asksql_duck::demo::seed(database)?;
    crate::log_event!(level: tracing::Level::INFO, event: "demo_seeded", location: database.location());
    Ok(true)
}
