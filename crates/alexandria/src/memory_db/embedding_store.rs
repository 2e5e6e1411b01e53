//! Embedding storage: fixed-dimension f32 vectors as little-endian blobs,
//! one row per `(source_kind, source_id)`, brute-force cosine scan.
//!
//! The scan is intentionally linear; the expected row count stays in the
//! tens of thousands. An ANN index can replace the scan behind
//! `find_similar` without touching any caller.

use crate::error::{MemoryError, Result};
use crate::memory_db::schema::*;
use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Encode a vector as consecutive little-endian f32 lanes.
pub fn embedding_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for lane in vector {
        blob.extend_from_slice(&lane.to_le_bytes());
    }
    blob
}

/// Decode a blob that must hold exactly `dimensions` f32 lanes.
pub fn blob_to_embedding(blob: &[u8], dimensions: usize) -> Result<Vec<f32>> {
    if blob.len() != dimensions * 4 {
        return Err(MemoryError::CorruptEmbedding {
            len: blob.len(),
            dimensions,
        });
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Cosine similarity. Calling this with mismatched dimensions is a
/// programmer error.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "cosine over mismatched dimensions");
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingStats {
    pub total: usize,
    pub by_kind: HashMap<String, usize>,
    pub vector_bytes: u64,
    pub dimensions: usize,
    pub model: Option<String>,
}

#[derive(Debug)]
pub struct EmbeddingStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl EmbeddingStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| MemoryError::Pool(e.to_string()))
    }

    /// Store a vector for a source row. Replaces any existing row for the
    /// same `(source_kind, source_id)`.
    pub fn store_embedding(
        &self,
        source_kind: EntityKind,
        source_id: i64,
        model: &str,
        vector: &[f32],
    ) -> Result<i64> {
        if vector.is_empty() {
            return Err(MemoryError::InvalidInput("embedding vector is empty".into()));
        }
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO embeddings (source_kind, source_id, model, dimensions, vector, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(source_kind, source_id) DO UPDATE SET
                model = excluded.model,
                dimensions = excluded.dimensions,
                vector = excluded.vector,
                created_at = excluded.created_at",
            params![
                source_kind.as_str(),
                source_id,
                model,
                vector.len() as i64,
                embedding_to_blob(vector),
                to_sql_time(&Utc::now()),
            ],
        )?;
        let id = conn.query_row(
            "SELECT id FROM embeddings WHERE source_kind = ?1 AND source_id = ?2",
            params![source_kind.as_str(), source_id],
            |row| row.get(0),
        )?;
        debug!(
            "Stored {}-dim embedding for {}:{}",
            vector.len(),
            source_kind,
            source_id
        );
        Ok(id)
    }

    pub fn get_embedding(
        &self,
        source_kind: EntityKind,
        source_id: i64,
    ) -> Result<Option<StoredEmbedding>> {
        let conn = self.get_conn()?;
        let row: Option<(i64, String, i64, String, i64, Vec<u8>, String)> = conn
            .query_row(
                "SELECT id, source_kind, source_id, model, dimensions, vector, created_at
                 FROM embeddings WHERE source_kind = ?1 AND source_id = ?2",
                params![source_kind.as_str(), source_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, kind, source_id, model, dimensions, blob, created_at)| {
            let dimensions = dimensions as usize;
            Ok(StoredEmbedding {
                id,
                source_kind: EntityKind::from_str(&kind)?,
                source_id,
                model,
                dimensions,
                vector: blob_to_embedding(&blob, dimensions)?,
                created_at: from_sql_time(&created_at)?,
            })
        })
        .transpose()
    }

    /// Ids of rows in `kind`'s base table that have no embedding yet.
    pub fn missing_source_ids(&self, kind: EntityKind, limit: usize) -> Result<Vec<i64>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT b.id FROM {table} b
             LEFT JOIN embeddings e ON e.source_kind = ?1 AND e.source_id = b.id
             WHERE e.id IS NULL ORDER BY b.id LIMIT ?2",
            table = kind.table()
        );
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params![kind.as_str(), limit as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// All ids in `kind`'s base table, for forced re-embedding.
    pub fn all_source_ids(&self, kind: EntityKind, limit: usize) -> Result<Vec<i64>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT id FROM {table} ORDER BY id LIMIT ?1",
            table = kind.table()
        );
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map([limit as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// Brute-force similarity scan. Returns `(kind, source_id, score)` sorted
    /// by cosine descending, truncated to `limit`.
    pub fn find_similar(
        &self,
        query: &[f32],
        kind: Option<EntityKind>,
        limit: usize,
    ) -> Result<Vec<(EntityKind, i64, f32)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT source_kind, source_id, dimensions, vector FROM embeddings
             WHERE (?1 IS NULL OR source_kind = ?1)",
        )?;
        let mut rows = stmt.query(params![kind.map(|k| k.as_str())])?;

        let mut matches = Vec::new();
        while let Some(row) = rows.next()? {
            let source_kind: String = row.get(0)?;
            let source_id: i64 = row.get(1)?;
            let dimensions: i64 = row.get(2)?;
            let blob: Vec<u8> = row.get(3)?;
            let vector = blob_to_embedding(&blob, dimensions as usize)?;
            if vector.len() != query.len() {
                // Rows written by a different model; not comparable.
                continue;
            }
            let score = cosine_similarity(query, &vector);
            matches.push((EntityKind::from_str(&source_kind)?, source_id, score));
        }

        matches.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(limit);
        Ok(matches)
    }

    pub fn stats(&self) -> Result<EmbeddingStats> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT source_kind, COUNT(*), SUM(LENGTH(vector)) FROM embeddings GROUP BY source_kind")?;
        let mut rows = stmt.query([])?;
        let mut by_kind = HashMap::new();
        let mut total = 0usize;
        let mut vector_bytes = 0u64;
        while let Some(row) = rows.next()? {
            let kind: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            let bytes: i64 = row.get(2)?;
            total += count as usize;
            vector_bytes += bytes as u64;
            by_kind.insert(kind, count as usize);
        }

        let sample: Option<(i64, String)> = conn
            .query_row(
                "SELECT dimensions, model FROM embeddings LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (dimensions, model) = match sample {
            Some((d, m)) => (d as usize, Some(m)),
            None => (0, None),
        };

        Ok(EmbeddingStats {
            total,
            by_kind,
            vector_bytes,
            dimensions,
            model,
        })
    }
}
