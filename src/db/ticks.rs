use rusqlite::{params, Connection, TransactionBehavior};
use serde::Serialize;

use crate::error::HubError;

/// One trade print for an instrument.  Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tick {
    pub symbol: String,
    /// UTC milliseconds since epoch.
    pub ts_ms: i64,
    pub price: f64,
    pub qty: f64,
}

/// Append a batch inside one immediate transaction: either every tick lands
/// or none does.
pub fn insert_ticks(conn: &mut Connection, ticks: &[Tick]) -> Result<usize, HubError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    {
        let mut stmt =
            tx.prepare("INSERT INTO ticks (symbol, ts_ms, price, qty) VALUES (?1, ?2, ?3, ?4)")?;
        for t in ticks {
            stmt.execute(params![t.symbol, t.ts_ms, t.price, t.qty])?;
        }
    }
    tx.commit()?;
    Ok(ticks.len())
}

/// Newest `limit` ticks for a symbol, returned in arrival order (oldest first).
pub fn fetch_recent_ticks(
    conn: &Connection,
    symbol: &str,
    limit: u32,
) -> Result<Vec<Tick>, HubError> {
    let mut stmt = conn.prepare(
        "SELECT ts_ms, price, qty
         FROM ticks
         WHERE symbol = ?1
         ORDER BY ts_ms DESC, id DESC
         LIMIT ?2",
    )?;

    let mut ticks: Vec<Tick> = stmt
        .query_map(params![symbol, limit], |row| {
            Ok(Tick {
                symbol: symbol.to_string(),
                ts_ms: row.get(0)?,
                price: row.get(1)?,
                qty: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    ticks.reverse();
    Ok(ticks)
}

/// Distinct symbols present in the store, sorted.
pub fn list_symbols(conn: &Connection) -> Result<Vec<String>, HubError> {
    let mut stmt = conn.prepare("SELECT DISTINCT symbol FROM ticks ORDER BY symbol")?;
    let symbols = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(symbols)
}

pub fn count_ticks(conn: &Connection) -> Result<u64, HubError> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM ticks", [], |row| row.get(0))?;
    Ok(n.max(0) as u64)
}
