//! Embedded schema migrations.
//!
//! Each migration ships inside the binary and records its version in the
//! schema_migrations table; already-applied versions are skipped on open.

use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../migrations/001_schema.sql"))];

pub struct Migrator;

impl Migrator {
    pub fn new() -> Self {
        Self
    }

    pub fn run(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
        )?;

        for (version, sql) in MIGRATIONS {
            let applied: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE version = ?1)",
                [version],
                |row| row.get(0),
            )?;

            if !applied {
                conn.execute_batch(sql)?;
                info!("Applied migration {:03}", version);
            }
        }

        Ok(())
    }
}

impl Default for Migrator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        let migrator = Migrator::new();
        migrator.run(&conn).unwrap();
        migrator.run(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
    }
}
