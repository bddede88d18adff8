//! SICC database migrations
//!
//! SQL migrations are embedded as strings and executed when a store opens.

use rusqlite::Connection;

use crate::SiccResult;

/// SICC tables SQL (001)
pub const SICC_TABLES_SQL: &str = include_str!("001_sicc_tables.sql");

/// Metric history SQL (002)
pub const SICC_METRICS_SQL: &str = include_str!("002_sicc_metrics.sql");

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> SiccResult<()> {
    conn.execute_batch(SICC_TABLES_SQL)?;
    conn.execute_batch(SICC_METRICS_SQL)?;
    Ok(())
}
