pub mod pool;
pub mod ticks;

use std::path::Path;

use crate::error::HubError;
use pool::{open_rw_pool, DbPool};
pub use ticks::Tick;

/// Append/read contract over the SQLite tick table.
#[derive(Clone)]
pub struct TickStore {
    pool: DbPool,
}

impl TickStore {
    pub fn open(path: &Path, pool_size: u32) -> Result<Self, HubError> {
        Ok(Self {
            pool: open_rw_pool(path, pool_size)?,
        })
    }

    /// Append a validated batch atomically.
    pub fn append(&self, batch: &[Tick]) -> Result<usize, HubError> {
        let mut conn = self.pool.get()?;
        ticks::insert_ticks(&mut conn, batch)
    }

    pub fn symbols(&self) -> Result<Vec<String>, HubError> {
        let conn = self.pool.get()?;
        ticks::list_symbols(&conn)
    }

    /// Load both instruments from one read snapshot so a concurrent upload is
    /// seen entirely or not at all.
    pub fn load_pair(
        &self,
        s1: &str,
        s2: &str,
        limit: u32,
    ) -> Result<(Vec<Tick>, Vec<Tick>), HubError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let first = ticks::fetch_recent_ticks(&tx, s1, limit)?;
        let second = ticks::fetch_recent_ticks(&tx, s2, limit)?;
        tx.commit()?;
        Ok((first, second))
    }

    pub fn count(&self) -> Result<u64, HubError> {
        let conn = self.pool.get()?;
        ticks::count_ticks(&conn)
    }
}
