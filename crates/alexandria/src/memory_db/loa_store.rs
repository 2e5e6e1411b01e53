//! Curated extract (Library of Alexandria) storage.
//!
//! Each entry summarizes a contiguous span of message ids and keeps those
//! messages quotable. Entries form a forest via `parent`, so a capture can
//! continue an earlier one.

use crate::error::{MemoryError, Result};
use crate::memory_db::schema::*;
use crate::memory_db::session_store::row_to_message;
use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct LoaStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl LoaStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| MemoryError::Pool(e.to_string()))
    }

    /// Create an entry. The caller supplies the message range; no deep
    /// validation beyond start ≤ end.
    pub fn create_entry(&self, entry: &NewLoaEntry) -> Result<i64> {
        if entry.title.trim().is_empty() {
            return Err(MemoryError::InvalidInput("loa title is empty".into()));
        }
        if let (Some(start), Some(end)) = (entry.range_start, entry.range_end) {
            if start > end {
                return Err(MemoryError::InvalidInput(format!(
                    "loa range {start}..{end} is inverted"
                )));
            }
        }
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO loa_entries
             (created_at, title, description, extract, range_start, range_end,
              parent, session_ref, project, tags, message_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                to_sql_time(&Utc::now()),
                entry.title,
                entry.description,
                entry.extract,
                entry.range_start,
                entry.range_end,
                entry.parent,
                entry.session_ref,
                entry.project,
                entry.tags,
                entry.message_count,
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!(
            "Captured loa entry {} '{}' (range {:?}..{:?})",
            id, entry.title, entry.range_start, entry.range_end
        );
        Ok(id)
    }

    pub fn get_entry(&self, id: i64) -> Result<Option<LoaEntry>> {
        let conn = self.get_conn()?;
        conn.query_row(
            "SELECT id, created_at, title, description, extract, range_start, range_end,
                    parent, session_ref, project, tags, message_count
             FROM loa_entries WHERE id = ?1",
            [id],
            |row| Ok(row_to_entry(row)),
        )
        .optional()?
        .transpose()
    }

    pub fn list_entries(&self, limit: usize) -> Result<Vec<LoaEntry>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, created_at, title, description, extract, range_start, range_end,
                    parent, session_ref, project, tags, message_count
             FROM loa_entries ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let mut rows = stmt.query([limit as i64])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(row_to_entry(row)?);
        }
        Ok(entries)
    }

    /// The messages an entry was derived from, ordered `(ts, id)`. Empty for
    /// entries without a range.
    pub fn entry_messages(&self, id: i64) -> Result<Vec<StoredMessage>> {
        let entry = self.get_entry(id)?.ok_or(MemoryError::NotFound {
            kind: "loa",
            id: id.to_string(),
        })?;
        let (Some(start), Some(end)) = (entry.range_start, entry.range_end) else {
            return Ok(Vec::new());
        };

        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, session_ref, ts, role, content, project
             FROM messages WHERE id >= ?1 AND id <= ?2 ORDER BY ts, id",
        )?;
        let mut rows = stmt.query(params![start, end])?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            messages.push(row_to_message(row)?);
        }
        Ok(messages)
    }
}

fn row_to_entry(row: &Row) -> Result<LoaEntry> {
    let created_at: String = row.get(1)?;
    Ok(LoaEntry {
        id: row.get(0)?,
        created_at: from_sql_time(&created_at)?,
        title: row.get(2)?,
        description: row.get(3)?,
        extract: row.get(4)?,
        range_start: row.get(5)?,
        range_end: row.get(6)?,
        parent: row.get(7)?,
        session_ref: row.get(8)?,
        project: row.get(9)?,
        tags: row.get(10)?,
        message_count: row.get(11)?,
    })
}
