//! Schema versioning.
//!
//! Forward-only migrations keyed on a single version scalar in `schema_meta`.
//! Re-running against an equal or lower version is a no-op; a store written
//! by a newer build is rejected with `SchemaTooNew`.

use crate::error::{MemoryError, Result};
use crate::memory_db::schema;
use rusqlite::Connection;
use tracing::{error, info};

/// Highest schema version this build understands.
pub const SCHEMA_VERSION: i64 = 1;

pub struct MigrationManager<'a> {
    conn: &'a mut Connection,
}

impl<'a> MigrationManager<'a> {
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    /// Create or upgrade the schema. Idempotent. Returns the version the
    /// store ends up at.
    pub fn initialize(&mut self) -> Result<i64> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_meta (
                version INTEGER NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;

        let current = self.current_version()?;
        if current > SCHEMA_VERSION {
            return Err(MemoryError::SchemaTooNew {
                found: current,
                supported: SCHEMA_VERSION,
            });
        }

        for (version, sql) in migrations() {
            if version > current {
                info!("Applying schema migration {}", version);
                let tx = self.conn.transaction()?;
                if let Err(e) = tx.execute_batch(sql) {
                    error!("Migration {} failed: {}", version, e);
                    return Err(e.into());
                }
                tx.execute("INSERT INTO schema_meta (version) VALUES (?1)", [version])?;
                tx.commit()?;
            }
        }

        Ok(SCHEMA_VERSION)
    }

    pub fn current_version(&self) -> Result<i64> {
        let version = self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_meta",
            [],
            |row| row.get(0),
        )?;
        Ok(version)
    }
}

fn migrations() -> Vec<(i64, &'static str)> {
    vec![(1, schema::SCHEMA_SQL)]
}

/// Row counts per kind plus the data-file size. Read-only; safe on any
/// connection.
pub fn get_database_stats(conn: &Connection) -> Result<schema::DatabaseStats> {
    fn count(conn: &Connection, table: &str) -> Result<i64> {
        let n = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })?;
        Ok(n)
    }

    let db_size_bytes = conn
        .query_row(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(schema::DatabaseStats {
        sessions: count(conn, "sessions")?,
        messages: count(conn, "messages")?,
        loa_entries: count(conn, "loa_entries")?,
        decisions: count(conn, "decisions")?,
        learnings: count(conn, "learnings")?,
        breadcrumbs: count(conn, "breadcrumbs")?,
        telos_entries: count(conn, "telos_entries")?,
        documents: count(conn, "documents")?,
        embeddings: count(conn, "embeddings")?,
        db_size_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_memory() -> Connection {
        Connection::open_in_memory().expect("in-memory store")
    }

    #[test]
    fn initialize_is_idempotent() {
        let mut conn = open_memory();
        let v1 = MigrationManager::new(&mut conn).initialize().unwrap();
        let v2 = MigrationManager::new(&mut conn).initialize().unwrap();
        assert_eq!(v1, SCHEMA_VERSION);
        assert_eq!(v2, SCHEMA_VERSION);

        // A single schema_meta row per applied migration, not per run.
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_meta", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn newer_store_is_rejected() {
        let mut conn = open_memory();
        MigrationManager::new(&mut conn).initialize().unwrap();
        conn.execute(
            "INSERT INTO schema_meta (version) VALUES (?1)",
            [SCHEMA_VERSION + 5],
        )
        .unwrap();

        let err = MigrationManager::new(&mut conn).initialize().unwrap_err();
        assert!(matches!(err, MemoryError::SchemaTooNew { found, .. } if found == SCHEMA_VERSION + 5));
    }

    #[test]
    fn empty_store_has_stats() {
        let mut conn = open_memory();
        MigrationManager::new(&mut conn).initialize().unwrap();
        let stats = get_database_stats(&conn).unwrap();
        assert_eq!(stats.sessions, 0);
        assert_eq!(stats.messages, 0);
        assert_eq!(stats.decisions, 0);
        assert!(stats.db_size_bytes > 0);
    }
}
