//! Session and message storage.
//!
//! Messages are immutable once written and ordered within a session by
//! `(ts, id)`. Re-ingesting a session goes through `delete_session_cascade`,
//! which also removes curated extracts whose range falls entirely inside the
//! deleted message span.

use crate::error::{MemoryError, Result};
use crate::memory_db::schema::*;
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// Session fields at creation time; the row id is assigned by the store.
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub external_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub project: Option<String>,
    pub cwd: Option<String>,
    pub branch: Option<String>,
    pub model: Option<String>,
}

/// Messages newer than the last captured extract, with their id bounds.
#[derive(Debug, Clone)]
pub struct MessageWindow {
    pub messages: Vec<StoredMessage>,
    pub start_id: Option<i64>,
    pub end_id: Option<i64>,
}

#[derive(Debug)]
pub struct SessionStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SessionStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| MemoryError::Pool(e.to_string()))
    }

    pub fn create_session(&self, session: &NewSession) -> Result<i64> {
        if session.external_id.trim().is_empty() {
            return Err(MemoryError::InvalidInput("session external_id is empty".into()));
        }
        let conn = self.get_conn()?;
        if self.exists_on(&conn, &session.external_id)? {
            return Err(MemoryError::Duplicate(format!(
                "session '{}'",
                session.external_id
            )));
        }
        conn.execute(
            "INSERT INTO sessions
             (external_id, started_at, ended_at, summary, project, cwd, branch, model)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session.external_id,
                to_sql_time(&session.started_at),
                session.ended_at.as_ref().map(to_sql_time),
                session.summary,
                session.project,
                session.cwd,
                session.branch,
                session.model,
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!("Created session {} ({})", session.external_id, id);
        Ok(id)
    }

    pub fn session_exists(&self, external_id: &str) -> Result<bool> {
        let conn = self.get_conn()?;
        self.exists_on(&conn, external_id)
    }

    fn exists_on(&self, conn: &Connection, external_id: &str) -> Result<bool> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM sessions WHERE external_id = ?1",
                [external_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get_session(&self, external_id: &str) -> Result<Option<Session>> {
        let conn = self.get_conn()?;
        conn.query_row(
            "SELECT id, external_id, started_at, ended_at, summary, project, cwd, branch, model
             FROM sessions WHERE external_id = ?1",
            [external_id],
            |row| Ok(row_to_session(row)),
        )
        .optional()?
        .transpose()
    }

    pub fn update_session_summary(
        &self,
        external_id: &str,
        summary: &str,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            "UPDATE sessions SET summary = ?2, ended_at = COALESCE(?3, ended_at)
             WHERE external_id = ?1",
            params![external_id, summary, ended_at.as_ref().map(to_sql_time)],
        )?;
        if updated == 0 {
            return Err(MemoryError::NotFound {
                kind: "session",
                id: external_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn recent_sessions(&self, project: Option<&str>, limit: usize) -> Result<Vec<Session>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, external_id, started_at, ended_at, summary, project, cwd, branch, model
             FROM sessions
             WHERE (?1 IS NULL OR project = ?1)
             ORDER BY started_at DESC LIMIT ?2",
        )?;
        let mut rows = stmt.query(params![project, limit as i64])?;
        let mut sessions = Vec::new();
        while let Some(row) = rows.next()? {
            sessions.push(row_to_session(row)?);
        }
        Ok(sessions)
    }

    /// Insert a batch of messages in one transaction. Returns the number
    /// inserted.
    pub fn add_messages_batch(&self, messages: &[NewMessage]) -> Result<usize> {
        if messages.is_empty() {
            return Ok(0);
        }
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        for message in messages {
            tx.execute(
                "INSERT INTO messages (session_ref, ts, role, content, project)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message.session_ref,
                    to_sql_time(&message.ts),
                    message.role.as_str(),
                    message.content,
                    message.project,
                ],
            )?;
        }
        tx.commit()?;
        debug!("Stored {} messages in batch", messages.len());
        Ok(messages.len())
    }

    pub fn get_session_messages(&self, external_id: &str) -> Result<Vec<StoredMessage>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, session_ref, ts, role, content, project
             FROM messages WHERE session_ref = ?1 ORDER BY ts, id",
        )?;
        let mut rows = stmt.query([external_id])?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            messages.push(row_to_message(row)?);
        }
        Ok(messages)
    }

    pub fn recent_messages(&self, project: Option<&str>, limit: usize) -> Result<Vec<StoredMessage>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, session_ref, ts, role, content, project
             FROM messages
             WHERE (?1 IS NULL OR project = ?1)
             ORDER BY ts DESC, id DESC LIMIT ?2",
        )?;
        let mut rows = stmt.query(params![project, limit as i64])?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            messages.push(row_to_message(row)?);
        }
        Ok(messages)
    }

    /// Delete a session, its messages, and every curated extract whose range
    /// is fully contained in the deleted message span (descendants before
    /// parents). One transaction. Returns the deleted message count.
    pub fn delete_session_cascade(&self, external_id: &str) -> Result<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let span: Option<(i64, i64)> = tx
            .query_row(
                "SELECT MIN(id), MAX(id) FROM messages WHERE session_ref = ?1",
                [external_id],
                |row| {
                    let min: Option<i64> = row.get(0)?;
                    let max: Option<i64> = row.get(1)?;
                    Ok(min.zip(max))
                },
            )
            .optional()?
            .flatten();

        if let Some((min_id, max_id)) = span {
            let mut contained: Vec<i64> = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM loa_entries
                     WHERE range_start IS NOT NULL AND range_end IS NOT NULL
                       AND range_start >= ?1 AND range_end <= ?2",
                )?;
                let ids = stmt
                    .query_map(params![min_id, max_id], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<i64>>>()?;
                ids
            };

            // Walk the forest downward so children can be removed before
            // their parents.
            let mut layers: Vec<Vec<i64>> = vec![contained.clone()];
            loop {
                let frontier = layers.last().unwrap();
                if frontier.is_empty() {
                    layers.pop();
                    break;
                }
                let placeholders = vec!["?"; frontier.len()].join(",");
                let sql = format!(
                    "SELECT id FROM loa_entries WHERE parent IN ({placeholders})"
                );
                let mut stmt = tx.prepare(&sql)?;
                let children = stmt
                    .query_map(rusqlite::params_from_iter(frontier.iter()), |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<i64>>>()?;
                let fresh: Vec<i64> = children
                    .into_iter()
                    .filter(|id| !contained.contains(id))
                    .collect();
                contained.extend(&fresh);
                layers.push(fresh);
            }
            for layer in layers.iter().rev() {
                for id in layer {
                    tx.execute("DELETE FROM loa_entries WHERE id = ?1", [id])?;
                }
            }
        }

        let deleted_messages =
            tx.execute("DELETE FROM messages WHERE session_ref = ?1", [external_id])?;
        tx.execute("DELETE FROM sessions WHERE external_id = ?1", [external_id])?;
        tx.commit()?;

        info!(
            "Deleted session {} ({} messages)",
            external_id, deleted_messages
        );
        Ok(deleted_messages)
    }

    /// Messages newer than the last captured extract, in timestamp order. A
    /// `limit` keeps only the most recent N (still returned ascending).
    pub fn messages_since_last_loa(&self, limit: Option<usize>) -> Result<MessageWindow> {
        let conn = self.get_conn()?;
        let cutoff: i64 = conn.query_row(
            "SELECT COALESCE(MAX(range_end), 0) FROM loa_entries",
            [],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT id, session_ref, ts, role, content, project
             FROM messages WHERE id > ?1 ORDER BY ts DESC, id DESC LIMIT ?2",
        )?;
        let take = limit.map(|n| n as i64).unwrap_or(-1);
        let mut rows = stmt.query(params![cutoff, take])?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            messages.push(row_to_message(row)?);
        }
        messages.reverse();

        let start_id = messages.iter().map(|m| m.id).min();
        let end_id = messages.iter().map(|m| m.id).max();
        Ok(MessageWindow {
            messages,
            start_id,
            end_id,
        })
    }
}

fn row_to_session(row: &Row) -> Result<Session> {
    let started_at: String = row.get(2)?;
    let ended_at: Option<String> = row.get(3)?;
    Ok(Session {
        id: row.get(0)?,
        external_id: row.get(1)?,
        started_at: from_sql_time(&started_at)?,
        ended_at: ended_at.as_deref().map(from_sql_time).transpose()?,
        summary: row.get(4)?,
        project: row.get(5)?,
        cwd: row.get(6)?,
        branch: row.get(7)?,
        model: row.get(8)?,
    })
}

pub(crate) fn row_to_message(row: &Row) -> Result<StoredMessage> {
    let ts: String = row.get(2)?;
    let role: String = row.get(3)?;
    Ok(StoredMessage {
        id: row.get(0)?,
        session_ref: row.get(1)?,
        ts: from_sql_time(&ts)?,
        role: Role::from_str(&role)?,
        content: row.get(4)?,
        project: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::MemoryDatabase;
    use chrono::TimeZone;

    fn seed_session(db: &MemoryDatabase, external_id: &str, messages: usize) -> Vec<i64> {
        db.sessions
            .create_session(&NewSession {
                external_id: external_id.into(),
                started_at: Utc::now(),
                project: Some("demo".into()),
                ..Default::default()
            })
            .unwrap();
        let batch: Vec<NewMessage> = (0..messages)
            .map(|i| NewMessage {
                session_ref: external_id.into(),
                ts: Utc.timestamp_opt(1_700_000_000 + i as i64, 0).unwrap(),
                role: if i % 2 == 0 { Role::User } else { Role::Assistant },
                content: format!("message number {i} with enough text"),
                project: Some("demo".into()),
            })
            .collect();
        db.sessions.add_messages_batch(&batch).unwrap();
        db.sessions
            .get_session_messages(external_id)
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect()
    }

    #[test]
    fn duplicate_external_id_is_rejected() {
        let db = MemoryDatabase::open_in_memory().unwrap();
        seed_session(&db, "s-1", 1);
        let err = db
            .sessions
            .create_session(&NewSession {
                external_id: "s-1".into(),
                started_at: Utc::now(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, MemoryError::Duplicate(_)));
    }

    #[test]
    fn messages_ordered_by_ts_then_id() {
        let db = MemoryDatabase::open_in_memory().unwrap();
        let ids = seed_session(&db, "s-ord", 5);
        assert_eq!(ids.len(), 5);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn cascade_removes_contained_extracts() {
        let db = MemoryDatabase::open_in_memory().unwrap();
        let ids = seed_session(&db, "s-cascade", 3);
        let (min, max) = (ids[0], ids[2]);

        let parent = db
            .loa
            .create_entry(&crate::memory_db::NewLoaEntry {
                title: "span".into(),
                description: None,
                extract: "covers the whole session".into(),
                range_start: Some(min),
                range_end: Some(max),
                parent: None,
                session_ref: Some("s-cascade".into()),
                project: None,
                tags: None,
                message_count: Some(3),
            })
            .unwrap();
        db.loa
            .create_entry(&crate::memory_db::NewLoaEntry {
                title: "child".into(),
                description: None,
                extract: "refinement".into(),
                range_start: None,
                range_end: None,
                parent: Some(parent),
                session_ref: Some("s-cascade".into()),
                project: None,
                tags: None,
                message_count: None,
            })
            .unwrap();

        let deleted = db.sessions.delete_session_cascade("s-cascade").unwrap();
        assert_eq!(deleted, 3);

        let conn = db.get_conn().unwrap();
        let orphans: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages WHERE session_ref = 's-cascade'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(orphans, 0);
        let loa_left: i64 = conn
            .query_row("SELECT COUNT(*) FROM loa_entries", [], |r| r.get(0))
            .unwrap();
        assert_eq!(loa_left, 0);
        assert!(!db.sessions.session_exists("s-cascade").unwrap());
    }

    #[test]
    fn reingest_replaces_without_duplication() {
        let db = MemoryDatabase::open_in_memory().unwrap();
        let ids = seed_session(&db, "s1", 3);
        db.loa
            .create_entry(&crate::memory_db::NewLoaEntry {
                title: "old capture".into(),
                description: None,
                extract: "stale".into(),
                range_start: Some(ids[0]),
                range_end: Some(ids[2]),
                parent: None,
                session_ref: Some("s1".into()),
                project: None,
                tags: None,
                message_count: Some(3),
            })
            .unwrap();

        db.sessions.delete_session_cascade("s1").unwrap();
        seed_session(&db, "s1", 4);

        let messages = db.sessions.get_session_messages("s1").unwrap();
        assert_eq!(messages.len(), 4);
        let loa_left: i64 = db
            .get_conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM loa_entries", [], |r| r.get(0))
            .unwrap();
        assert_eq!(loa_left, 0);
    }

    #[test]
    fn window_since_last_capture() {
        let db = MemoryDatabase::open_in_memory().unwrap();
        let ids = seed_session(&db, "s-window", 5);

        // No captures yet: everything is in the window.
        let window = db.sessions.messages_since_last_loa(None).unwrap();
        assert_eq!(window.messages.len(), 5);
        assert_eq!(window.start_id, Some(ids[0]));
        assert_eq!(window.end_id, Some(ids[4]));

        db.loa
            .create_entry(&crate::memory_db::NewLoaEntry {
                title: "partial".into(),
                description: None,
                extract: "first three".into(),
                range_start: Some(ids[0]),
                range_end: Some(ids[2]),
                parent: None,
                session_ref: Some("s-window".into()),
                project: None,
                tags: None,
                message_count: Some(3),
            })
            .unwrap();

        let window = db.sessions.messages_since_last_loa(None).unwrap();
        assert_eq!(window.messages.len(), 2);
        assert_eq!(window.start_id, Some(ids[3]));

        // Tail limit keeps the newest message only, ascending order retained.
        let window = db.sessions.messages_since_last_loa(Some(1)).unwrap();
        assert_eq!(window.messages.len(), 1);
        assert_eq!(window.end_id, Some(ids[4]));
    }
}
