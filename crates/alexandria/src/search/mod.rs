//! Search across entity kinds - lexical (FTS5), semantic (embedding scan),
//! and hybrid (reciprocal-rank fused).
//!
//! A hybrid query:
//! 1. runs the lexical search over the requested kinds,
//! 2. embeds the query and scans stored vectors,
//! 3. fuses both rankings with RRF and tags each hit `fts`, `vec`, or `both`.
//! If the embedding service is down, hybrid degrades to lexical results and
//! reports the outage through a flag instead of an error.

pub mod fusion;

pub use fusion::{reciprocal_rank_fusion, RRF_K};

use crate::embedding::EmbeddingClient;
use crate::error::{MemoryError, Result};
use crate::memory_db::{EntityKind, MemoryDatabase};
use crate::utils::truncate_with_ellipsis;
use rusqlite::params;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Preview length for message bodies and extract tails.
const PREVIEW_CHARS: usize = 200;

/// Which retrieval path produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    Fts,
    Vec,
    Both,
}

impl MatchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchSource::Fts => "fts",
            MatchSource::Vec => "vec",
            MatchSource::Both => "both",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub kind: EntityKind,
    pub id: i64,
    /// Rendered preview; rules are per-kind so the caller never needs a
    /// second fetch.
    pub content: String,
    pub project: Option<String>,
    /// Lexical: FTS rank (lower is better). Semantic: cosine similarity.
    /// Hybrid: fused RRF score.
    pub score: f64,
    pub source: MatchSource,
}

#[derive(Debug)]
pub struct HybridResults {
    pub results: Vec<SearchHit>,
    pub embeddings_available: bool,
}

pub struct SearchEngine<'a> {
    db: &'a MemoryDatabase,
    embeddings: &'a EmbeddingClient,
}

impl<'a> SearchEngine<'a> {
    pub fn new(db: &'a MemoryDatabase, embeddings: &'a EmbeddingClient) -> Self {
        Self { db, embeddings }
    }

    /// Lexical search over the requested kinds. Each kind contributes up to
    /// `2 * limit` candidates; the merged set is ordered by FTS rank
    /// ascending and cut to `limit`.
    pub fn lexical(
        &self,
        query: &str,
        kinds: &[EntityKind],
        project: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(MemoryError::InvalidInput("search query is empty".into()));
        }

        let mut merged = Vec::new();
        for kind in kinds {
            match self.lexical_for_kind(query, *kind, project, limit * 2) {
                Ok(mut hits) => merged.append(&mut hits),
                // A query using FTS operators a kind's tokenizer rejects
                // shouldn't sink the whole search.
                Err(MemoryError::Sqlite(e)) => {
                    debug!("FTS query failed for {}: {}", kind, e);
                }
                Err(e) => return Err(e),
            }
        }

        merged.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
        merged.truncate(limit);
        Ok(merged)
    }

    /// Semantic search: embed the query, scan stored vectors, return the
    /// top `limit` by cosine similarity.
    pub async fn semantic(
        &self,
        query: &str,
        kind: Option<EntityKind>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(MemoryError::InvalidInput("search query is empty".into()));
        }
        let embedded = self.embeddings.embed(query).await?;
        let scored = self.db.embeddings.find_similar(&embedded.vector, kind, limit)?;

        let mut hits = Vec::with_capacity(scored.len());
        for (kind, id, score) in scored {
            let (content, project) = self.preview_for(kind, id)?;
            hits.push(SearchHit {
                kind,
                id,
                content,
                project,
                score: score as f64,
                source: MatchSource::Vec,
            });
        }
        Ok(hits)
    }

    /// Hybrid search. Degrades silently to lexical-only when the embedding
    /// service is unavailable; the outage is reported via
    /// `embeddings_available`.
    pub async fn hybrid(
        &self,
        query: &str,
        kinds: &[EntityKind],
        project: Option<&str>,
        limit: usize,
    ) -> Result<HybridResults> {
        let lexical = self.lexical(query, kinds, project, limit)?;

        let vector_hits: Vec<(EntityKind, i64, f32)> = match self.embeddings.embed(query).await {
            Ok(embedded) => {
                let kind_filter = if kinds.len() == 1 { Some(kinds[0]) } else { None };
                self.db
                    .embeddings
                    .find_similar(&embedded.vector, kind_filter, limit)?
                    .into_iter()
                    .filter(|(kind, _, _)| kinds.contains(kind))
                    .collect()
            }
            Err(MemoryError::ServiceUnavailable(reason)) => {
                warn!("Embeddings unavailable, degrading to lexical-only: {}", reason);
                let results = lexical
                    .into_iter()
                    .map(|hit| SearchHit {
                        source: MatchSource::Fts,
                        ..hit
                    })
                    .collect();
                return Ok(HybridResults {
                    results,
                    embeddings_available: false,
                });
            }
            Err(e) => return Err(e),
        };

        let lexical_keys: Vec<String> = lexical.iter().map(|h| hit_key(h.kind, h.id)).collect();
        let vector_keys: Vec<String> = vector_hits
            .iter()
            .map(|(kind, id, _)| hit_key(*kind, *id))
            .collect();

        let fused = reciprocal_rank_fusion(&[lexical_keys.clone(), vector_keys.clone()], RRF_K);

        let by_key: HashMap<String, &SearchHit> = lexical
            .iter()
            .map(|hit| (hit_key(hit.kind, hit.id), hit))
            .collect();
        let vector_set: std::collections::HashSet<&String> = vector_keys.iter().collect();
        let lexical_set: std::collections::HashSet<&String> = lexical_keys.iter().collect();

        let mut results = Vec::new();
        for (key, score) in fused.into_iter().take(limit) {
            let source = match (lexical_set.contains(&key), vector_set.contains(&key)) {
                (true, true) => MatchSource::Both,
                (true, false) => MatchSource::Fts,
                _ => MatchSource::Vec,
            };
            let hit = if let Some(lex) = by_key.get(&key) {
                SearchHit {
                    score,
                    source,
                    ..(*lex).clone()
                }
            } else {
                let (kind, id) = parse_key(&key)?;
                let (content, project) = self.preview_for(kind, id)?;
                SearchHit {
                    kind,
                    id,
                    content,
                    project,
                    score,
                    source,
                }
            };
            results.push(hit);
        }

        Ok(HybridResults {
            results,
            embeddings_available: true,
        })
    }

    fn lexical_for_kind(
        &self,
        query: &str,
        kind: EntityKind,
        project: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let conn = self.db.get_conn()?;

        // Kinds without a project column (telos, documents) ignore the
        // project filter.
        let sql = match kind {
            EntityKind::Messages => {
                "SELECT b.id, b.content, b.project, rank
                 FROM messages_fts JOIN messages b ON b.id = messages_fts.rowid
                 WHERE messages_fts MATCH ?1 AND (?2 IS NULL OR b.project = ?2)
                 ORDER BY rank LIMIT ?3"
            }
            EntityKind::Decisions => {
                "SELECT b.id, b.decision, b.project, rank
                 FROM decisions_fts JOIN decisions b ON b.id = decisions_fts.rowid
                 WHERE decisions_fts MATCH ?1 AND (?2 IS NULL OR b.project = ?2)
                 ORDER BY rank LIMIT ?3"
            }
            EntityKind::Learnings => {
                "SELECT b.id, b.problem, b.project, rank
                 FROM learnings_fts JOIN learnings b ON b.id = learnings_fts.rowid
                 WHERE learnings_fts MATCH ?1 AND (?2 IS NULL OR b.project = ?2)
                 ORDER BY rank LIMIT ?3"
            }
            EntityKind::Breadcrumbs => {
                "SELECT b.id, b.content, b.project, rank
                 FROM breadcrumbs_fts JOIN breadcrumbs b ON b.id = breadcrumbs_fts.rowid
                 WHERE breadcrumbs_fts MATCH ?1 AND (?2 IS NULL OR b.project = ?2)
                 ORDER BY rank LIMIT ?3"
            }
            EntityKind::Loa => {
                "SELECT b.id, b.title || ': ' || substr(b.extract, 1, 200), b.project, rank
                 FROM loa_fts JOIN loa_entries b ON b.id = loa_fts.rowid
                 WHERE loa_fts MATCH ?1 AND (?2 IS NULL OR b.project = ?2)
                 ORDER BY rank LIMIT ?3"
            }
            EntityKind::Telos => {
                "SELECT b.id, b.code || ': ' || b.title, NULL, rank
                 FROM telos_fts JOIN telos_entries b ON b.id = telos_fts.rowid
                 WHERE telos_fts MATCH ?1
                 ORDER BY rank LIMIT ?3"
            }
            EntityKind::Documents => {
                "SELECT b.id, snippet(documents_fts, 2, '**', '**', '…', 32), NULL, rank
                 FROM documents_fts JOIN documents b ON b.id = documents_fts.rowid
                 WHERE documents_fts MATCH ?1
                 ORDER BY rank LIMIT ?3"
            }
        };

        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params![query, project, limit as i64])?;
        let mut hits = Vec::new();
        while let Some(row) = rows.next()? {
            let content: String = row.get(1)?;
            let content = if kind == EntityKind::Messages {
                truncate_with_ellipsis(&content, PREVIEW_CHARS).into_owned()
            } else {
                content
            };
            hits.push(SearchHit {
                kind,
                id: row.get(0)?,
                content,
                project: row.get(2)?,
                score: row.get::<_, f64>(3)?,
                source: MatchSource::Fts,
            });
        }
        Ok(hits)
    }

    /// Render the preview for one base row, following the same projection
    /// rules as the lexical path. Used for vector-only hits.
    fn preview_for(&self, kind: EntityKind, id: i64) -> Result<(String, Option<String>)> {
        let conn = self.db.get_conn()?;
        let row: Option<(String, Option<String>)> = match kind {
            EntityKind::Messages => conn
                .query_row(
                    "SELECT content, project FROM messages WHERE id = ?1",
                    [id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map(|(content, project): (String, Option<String>)| {
                    (truncate_with_ellipsis(&content, PREVIEW_CHARS).into_owned(), project)
                })
                .map(Some)
                .or_else(not_found_to_none)?,
            EntityKind::Decisions => conn
                .query_row(
                    "SELECT decision, project FROM decisions WHERE id = ?1",
                    [id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map(Some)
                .or_else(not_found_to_none)?,
            EntityKind::Learnings => conn
                .query_row(
                    "SELECT problem, project FROM learnings WHERE id = ?1",
                    [id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map(Some)
                .or_else(not_found_to_none)?,
            EntityKind::Breadcrumbs => conn
                .query_row(
                    "SELECT content, project FROM breadcrumbs WHERE id = ?1",
                    [id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map(Some)
                .or_else(not_found_to_none)?,
            EntityKind::Loa => conn
                .query_row(
                    "SELECT title || ': ' || substr(extract, 1, 200), project FROM loa_entries WHERE id = ?1",
                    [id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map(Some)
                .or_else(not_found_to_none)?,
            EntityKind::Telos => conn
                .query_row(
                    "SELECT code || ': ' || title FROM telos_entries WHERE id = ?1",
                    [id],
                    |row| Ok((row.get::<_, String>(0)?, None::<String>)),
                )
                .map(Some)
                .or_else(not_found_to_none)?,
            EntityKind::Documents => conn
                .query_row(
                    "SELECT content FROM documents WHERE id = ?1",
                    [id],
                    |row| row.get::<_, String>(0),
                )
                .map(|content| {
                    (
                        truncate_with_ellipsis(&content, PREVIEW_CHARS).into_owned(),
                        None::<String>,
                    )
                })
                .map(Some)
                .or_else(not_found_to_none)?,
        };

        row.ok_or(MemoryError::NotFound {
            kind: "search source",
            id: format!("{kind}:{id}"),
        })
    }
}

fn hit_key(kind: EntityKind, id: i64) -> String {
    format!("{}:{}", kind.as_str(), id)
}

fn parse_key(key: &str) -> Result<(EntityKind, i64)> {
    let (kind, id) = key
        .split_once(':')
        .ok_or_else(|| MemoryError::Integrity(format!("bad fusion key '{key}'")))?;
    Ok((
        kind.parse()?,
        id.parse()
            .map_err(|_| MemoryError::Integrity(format!("bad fusion key '{key}'")))?,
    ))
}

fn not_found_to_none<T>(e: rusqlite::Error) -> std::result::Result<Option<T>, rusqlite::Error> {
    match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::record_store::NewDecision;
    use std::time::Duration;

    fn engine_fixture() -> (MemoryDatabase, EmbeddingClient) {
        let db = MemoryDatabase::open_in_memory().unwrap();
        // Nothing listens on port 1; embedding calls fail fast.
        let client =
            EmbeddingClient::new("http://127.0.0.1:1", "test-model", Duration::from_millis(200));
        (db, client)
    }

    #[test]
    fn add_and_search_decision() {
        let (db, client) = engine_fixture();
        db.records
            .add_decision(&NewDecision {
                decision: "Use embedded store".into(),
                reasoning: Some("Simpler deploy".into()),
                project: Some("demo".into()),
                ..Default::default()
            })
            .unwrap();

        let engine = SearchEngine::new(&db, &client);
        let hits = engine
            .lexical("embedded", &EntityKind::ALL, None, 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].kind, EntityKind::Decisions);
        assert_eq!(hits[0].id, 1);
        assert_eq!(hits[0].content, "Use embedded store");
    }

    #[test]
    fn fts_operators_are_honoured() {
        let (db, client) = engine_fixture();
        for text in [
            "redis is the cache",
            "memcached is the cache",
            "redis OR memcached could work",
        ] {
            db.records
                .add_decision(&NewDecision {
                    decision: text.into(),
                    ..Default::default()
                })
                .unwrap();
        }

        let engine = SearchEngine::new(&db, &client);
        let hits = engine
            .lexical("redis NOT memcached", &[EntityKind::Decisions], None, 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.starts_with("redis is"));
    }

    #[test]
    fn project_filter_narrows_results() {
        let (db, client) = engine_fixture();
        for project in ["alpha", "beta"] {
            db.records
                .add_decision(&NewDecision {
                    decision: format!("ship the {project} feature"),
                    project: Some(project.into()),
                    ..Default::default()
                })
                .unwrap();
        }

        let engine = SearchEngine::new(&db, &client);
        let hits = engine
            .lexical("ship", &[EntityKind::Decisions], Some("alpha"), 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].project.as_deref(), Some("alpha"));
    }

    #[tokio::test]
    async fn hybrid_degrades_without_embeddings() {
        let (db, client) = engine_fixture();
        db.records
            .add_decision(&NewDecision {
                decision: "auth goes through the gateway".into(),
                ..Default::default()
            })
            .unwrap();

        let engine = SearchEngine::new(&db, &client);
        let outcome = engine
            .hybrid("auth", &EntityKind::ALL, None, 10)
            .await
            .unwrap();
        assert!(!outcome.embeddings_available);
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome
            .results
            .iter()
            .all(|hit| hit.source == MatchSource::Fts));
    }

    #[tokio::test]
    async fn semantic_surfaces_the_outage() {
        let (db, client) = engine_fixture();
        let engine = SearchEngine::new(&db, &client);
        let err = engine.semantic("anything", None, 5).await.unwrap_err();
        assert!(matches!(err, MemoryError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn hybrid_with_constant_embeddings_keeps_lexical_order() {
        // An embedding service that answers the same vector for every input
        // makes the vector ranking a tie; hybrid then degenerates to the
        // lexical order, with shared hits tagged `both`.
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/embeddings")
            .with_status(200)
            .with_body(r#"{"embedding":[1.0,0.0]}"#)
            .create_async()
            .await;

        let db = MemoryDatabase::open_in_memory().unwrap();
        let client = EmbeddingClient::new(server.url(), "test-model", Duration::from_secs(2));
        let first = db
            .records
            .add_decision(&NewDecision {
                decision: "cache cache cache layer".into(),
                ..Default::default()
            })
            .unwrap();
        let second = db
            .records
            .add_decision(&NewDecision {
                decision: "cache once".into(),
                ..Default::default()
            })
            .unwrap();
        for id in [first, second] {
            db.embeddings
                .store_embedding(EntityKind::Decisions, id, "test-model", &[1.0, 0.0])
                .unwrap();
        }

        let engine = SearchEngine::new(&db, &client);
        let lexical_order: Vec<i64> = engine
            .lexical("cache", &[EntityKind::Decisions], None, 10)
            .unwrap()
            .iter()
            .map(|h| h.id)
            .collect();
        let outcome = engine
            .hybrid("cache", &[EntityKind::Decisions], None, 10)
            .await
            .unwrap();

        assert!(outcome.embeddings_available);
        let hybrid_order: Vec<i64> = outcome.results.iter().map(|h| h.id).collect();
        assert_eq!(hybrid_order, lexical_order);
        assert!(outcome
            .results
            .iter()
            .all(|hit| hit.source == MatchSource::Both));
    }

    #[test]
    fn keys_round_trip() {
        let key = hit_key(EntityKind::Loa, 17);
        assert_eq!(key, "loa:17");
        assert_eq!(parse_key(&key).unwrap(), (EntityKind::Loa, 17));
        assert!(parse_key("garbage").is_err());
    }
}
