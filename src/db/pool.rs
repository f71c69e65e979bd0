use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

use crate::error::HubError;

pub type DbPool = Pool<SqliteConnectionManager>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ticks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    ts_ms INTEGER NOT NULL,
    price REAL NOT NULL,
    qty REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ticks_symbol_ts ON ticks(symbol, ts_ms);
"#;

/// Create a read-write SQLite pool for the tick store, creating the schema
/// on first use.
///
/// Every connection runs in WAL mode so readers keep a consistent snapshot
/// while an upload batch is being committed.
pub fn open_rw_pool(path: &Path, max_size: u32) -> Result<DbPool, HubError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
    });
    let pool = Pool::builder().max_size(max_size).build(manager).map_err(|e| {
        tracing::error!("Failed to create DB pool for {}: {e}", path.display());
        HubError::from(e)
    })?;

    pool.get()?.execute_batch(SCHEMA)?;
    tracing::info!("tick store ready at {}", path.display());
    Ok(pool)
}
