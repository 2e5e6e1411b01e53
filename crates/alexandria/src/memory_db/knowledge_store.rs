//! TELOS entries and imported documents. Both are upsert-keyed: TELOS by
//! `code`, documents by `path`.

use crate::error::{MemoryError, Result};
use crate::memory_db::schema::*;
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct NewTelosEntry {
    pub code: String,
    pub kind: TelosKind,
    pub category: Option<String>,
    pub title: String,
    pub content: String,
    pub parent_code: Option<String>,
    pub source_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub path: String,
    pub title: String,
    pub kind: DocumentKind,
    pub content: String,
    pub summary: Option<String>,
    pub size_bytes: i64,
    pub file_modified_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct KnowledgeStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl KnowledgeStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| MemoryError::Pool(e.to_string()))
    }

    pub fn upsert_telos_entry(&self, entry: &NewTelosEntry) -> Result<i64> {
        if entry.code.trim().is_empty() || entry.title.trim().is_empty() {
            return Err(MemoryError::InvalidInput(
                "telos entries need a code and a title".into(),
            ));
        }
        let conn = self.get_conn()?;
        let now = to_sql_time(&Utc::now());
        conn.execute(
            "INSERT INTO telos_entries
             (code, kind, category, title, content, parent_code, source_file, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(code) DO UPDATE SET
                kind = excluded.kind,
                category = excluded.category,
                title = excluded.title,
                content = excluded.content,
                parent_code = excluded.parent_code,
                source_file = excluded.source_file,
                updated_at = excluded.updated_at",
            params![
                entry.code,
                entry.kind.as_str(),
                entry.category,
                entry.title,
                entry.content,
                entry.parent_code,
                entry.source_file,
                now,
            ],
        )?;
        let id = conn.query_row(
            "SELECT id FROM telos_entries WHERE code = ?1",
            [&entry.code],
            |row| row.get(0),
        )?;
        debug!("Upserted telos entry {} ({})", entry.code, id);
        Ok(id)
    }

    pub fn get_telos_entry(&self, id: i64) -> Result<Option<TelosEntry>> {
        let conn = self.get_conn()?;
        conn.query_row(
            "SELECT id, code, kind, category, title, content, parent_code, source_file, created_at, updated_at
             FROM telos_entries WHERE id = ?1",
            [id],
            |row| Ok(row_to_telos(row)),
        )
        .optional()?
        .transpose()
    }

    pub fn recent_telos_entries(&self, limit: usize) -> Result<Vec<TelosEntry>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, code, kind, category, title, content, parent_code, source_file, created_at, updated_at
             FROM telos_entries ORDER BY updated_at DESC, id DESC LIMIT ?1",
        )?;
        let mut rows = stmt.query([limit as i64])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(row_to_telos(row)?);
        }
        Ok(entries)
    }

    pub fn upsert_document(&self, doc: &NewDocument) -> Result<i64> {
        if doc.path.trim().is_empty() {
            return Err(MemoryError::InvalidInput("document path is empty".into()));
        }
        let conn = self.get_conn()?;
        let now = to_sql_time(&Utc::now());
        conn.execute(
            "INSERT INTO documents
             (path, title, kind, content, summary, size_bytes, file_modified_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(path) DO UPDATE SET
                title = excluded.title,
                kind = excluded.kind,
                content = excluded.content,
                summary = excluded.summary,
                size_bytes = excluded.size_bytes,
                file_modified_at = excluded.file_modified_at,
                updated_at = excluded.updated_at",
            params![
                doc.path,
                doc.title,
                doc.kind.as_str(),
                doc.content,
                doc.summary,
                doc.size_bytes,
                to_sql_time(&doc.file_modified_at),
                now,
            ],
        )?;
        let id = conn.query_row(
            "SELECT id FROM documents WHERE path = ?1",
            [&doc.path],
            |row| row.get(0),
        )?;
        debug!("Upserted document {} ({})", doc.path, id);
        Ok(id)
    }

    pub fn get_document(&self, id: i64) -> Result<Option<Document>> {
        let conn = self.get_conn()?;
        conn.query_row(
            "SELECT id, path, title, kind, content, summary, size_bytes, file_modified_at, created_at, updated_at
             FROM documents WHERE id = ?1",
            [id],
            |row| Ok(row_to_document(row)),
        )
        .optional()?
        .transpose()
    }

    pub fn recent_documents(&self, limit: usize) -> Result<Vec<Document>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, path, title, kind, content, summary, size_bytes, file_modified_at, created_at, updated_at
             FROM documents ORDER BY updated_at DESC, id DESC LIMIT ?1",
        )?;
        let mut rows = stmt.query([limit as i64])?;
        let mut docs = Vec::new();
        while let Some(row) = rows.next()? {
            docs.push(row_to_document(row)?);
        }
        Ok(docs)
    }
}

fn row_to_telos(row: &Row) -> Result<TelosEntry> {
    let kind: String = row.get(2)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    Ok(TelosEntry {
        id: row.get(0)?,
        code: row.get(1)?,
        kind: TelosKind::from_str(&kind)?,
        category: row.get(3)?,
        title: row.get(4)?,
        content: row.get(5)?,
        parent_code: row.get(6)?,
        source_file: row.get(7)?,
        created_at: from_sql_time(&created_at)?,
        updated_at: from_sql_time(&updated_at)?,
    })
}

fn row_to_document(row: &Row) -> Result<Document> {
    let kind: String = row.get(3)?;
    let file_modified_at: String = row.get(7)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    Ok(Document {
        id: row.get(0)?,
        path: row.get(1)?,
        title: row.get(2)?,
        kind: DocumentKind::from_str(&kind)?,
        content: row.get(4)?,
        summary: row.get(5)?,
        size_bytes: row.get(6)?,
        file_modified_at: from_sql_time(&file_modified_at)?,
        created_at: from_sql_time(&created_at)?,
        updated_at: from_sql_time(&updated_at)?,
    })
}
