//! Engine facade: the stable surface the CLI and tool-protocol layers call.
//!
//! Every operation is a thin orchestration over the stores, the search
//! engine, and the extraction pipeline. Long-running I/O (embedding HTTP,
//! extractor subprocess) never runs inside a store transaction.

use crate::config::Config;
use crate::embedding::{EmbeddingClient, EmbeddingHealth};
use crate::error::{MemoryError, Result};
use crate::extraction::pipeline::{ExtractionOutcome, ExtractionPipeline, EXTRACTION_SYSTEM_PROMPT};
use crate::extraction::scanner::{BatchScanner, ScanReport};
use crate::extraction::transcript::{self, Turn};
use crate::memory_db::knowledge_store::{NewDocument, NewTelosEntry};
use crate::memory_db::record_store::{NewBreadcrumb, NewDecision, NewLearning};
use crate::memory_db::session_store::NewSession;
use crate::memory_db::{
    DatabaseStats, DocumentKind, EmbeddingStats, EntityKind, LoaEntry, MemoryDatabase, NewLoaEntry,
    NewMessage, StoredMessage, TelosKind,
};
use crate::search::{HybridResults, SearchEngine, SearchHit};
use crate::utils::truncate_with_ellipsis;
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

lazy_static! {
    static ref TELOS_HEADING: Regex =
        Regex::new(r"(?m)^##\s+([A-Za-z0-9][A-Za-z0-9_.\-]*)\s*[:\-—]\s*(.+)$").unwrap();
}

/// Options for `loa_write` and `dump`.
#[derive(Debug, Clone, Default)]
pub struct LoaCaptureOptions {
    pub project: Option<String>,
    /// Parent entry id when this capture continues an earlier one.
    pub continues: Option<i64>,
    pub tags: Option<String>,
    /// Tail limit: capture only the most recent N messages.
    pub limit: Option<usize>,
    /// Store the flattened conversation digest instead of calling the
    /// extractor.
    pub skip_extract: bool,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub files: usize,
    pub sessions: usize,
    pub messages: usize,
    pub skipped_existing: usize,
}

#[derive(Debug, Default)]
pub struct BackfillReport {
    pub embedded: usize,
    pub failed: usize,
}

/// One row in a `recent` listing.
#[derive(Debug, Clone)]
pub struct RecentItem {
    pub kind: EntityKind,
    pub id: i64,
    pub preview: String,
    pub project: Option<String>,
    pub created_at: String,
}

pub struct MemoryEngine {
    config: Config,
    db: MemoryDatabase,
    embedding_client: EmbeddingClient,
}

impl MemoryEngine {
    /// Open an existing store.
    pub fn open(config: Config) -> Result<Self> {
        let db = MemoryDatabase::open(&config.db_path)?;
        let embedding_client = EmbeddingClient::from_config(&config);
        Ok(Self {
            config,
            db,
            embedding_client,
        })
    }

    /// Create or upgrade the store. Returns whether it was newly created.
    pub fn init(config: Config) -> Result<(Self, bool)> {
        let (db, created) = MemoryDatabase::init(&config.db_path)?;
        let embedding_client = EmbeddingClient::from_config(&config);
        Ok((
            Self {
                config,
                db,
                embedding_client,
            },
            created,
        ))
    }

    pub fn db(&self) -> &MemoryDatabase {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ── Structured records ─────────────────────────────────────────────

    pub fn add_breadcrumb(&self, record: &NewBreadcrumb) -> Result<i64> {
        self.db.records.add_breadcrumb(record)
    }

    pub fn add_decision(&self, record: &NewDecision) -> Result<i64> {
        self.db.records.add_decision(record)
    }

    pub fn add_learning(&self, record: &NewLearning) -> Result<i64> {
        self.db.records.add_learning(record)
    }

    // ── Search ─────────────────────────────────────────────────────────

    pub fn search(
        &self,
        query: &str,
        kind: Option<EntityKind>,
        project: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let kinds = kind.map(|k| vec![k]).unwrap_or_else(|| EntityKind::ALL.to_vec());
        SearchEngine::new(&self.db, &self.embedding_client).lexical(query, &kinds, project, limit)
    }

    pub async fn semantic(
        &self,
        query: &str,
        kind: Option<EntityKind>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        SearchEngine::new(&self.db, &self.embedding_client)
            .semantic(query, kind, limit)
            .await
    }

    pub async fn hybrid(
        &self,
        query: &str,
        kind: Option<EntityKind>,
        project: Option<&str>,
        limit: usize,
    ) -> Result<HybridResults> {
        let kinds = kind.map(|k| vec![k]).unwrap_or_else(|| EntityKind::ALL.to_vec());
        SearchEngine::new(&self.db, &self.embedding_client)
            .hybrid(query, &kinds, project, limit)
            .await
    }

    // ── Listings ───────────────────────────────────────────────────────

    pub fn recent(
        &self,
        kind: EntityKind,
        project: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RecentItem>> {
        let items = match kind {
            EntityKind::Messages => self
                .db
                .sessions
                .recent_messages(project, limit)?
                .into_iter()
                .map(|m| RecentItem {
                    kind,
                    id: m.id,
                    preview: truncate_with_ellipsis(&m.content, 120).into_owned(),
                    project: m.project,
                    created_at: m.ts.to_rfc3339(),
                })
                .collect(),
            EntityKind::Decisions => self
                .db
                .records
                .recent_decisions(project, limit)?
                .into_iter()
                .map(|d| RecentItem {
                    kind,
                    id: d.id,
                    preview: truncate_with_ellipsis(&d.decision, 120).into_owned(),
                    project: d.project,
                    created_at: d.created_at.to_rfc3339(),
                })
                .collect(),
            EntityKind::Learnings => self
                .db
                .records
                .recent_learnings(project, limit)?
                .into_iter()
                .map(|l| RecentItem {
                    kind,
                    id: l.id,
                    preview: truncate_with_ellipsis(&l.problem, 120).into_owned(),
                    project: l.project,
                    created_at: l.created_at.to_rfc3339(),
                })
                .collect(),
            EntityKind::Breadcrumbs => self
                .db
                .records
                .recent_breadcrumbs(project, limit)?
                .into_iter()
                .map(|b| RecentItem {
                    kind,
                    id: b.id,
                    preview: truncate_with_ellipsis(&b.content, 120).into_owned(),
                    project: b.project,
                    created_at: b.created_at.to_rfc3339(),
                })
                .collect(),
            EntityKind::Loa => self
                .db
                .loa
                .list_entries(limit)?
                .into_iter()
                .map(|e| RecentItem {
                    kind,
                    id: e.id,
                    preview: format!("{}: {}", e.title, truncate_with_ellipsis(&e.extract, 100)),
                    project: e.project,
                    created_at: e.created_at.to_rfc3339(),
                })
                .collect(),
            EntityKind::Telos => self
                .db
                .knowledge
                .recent_telos_entries(limit)?
                .into_iter()
                .map(|t| RecentItem {
                    kind,
                    id: t.id,
                    preview: format!("{}: {}", t.code, t.title),
                    project: None,
                    created_at: t.updated_at.to_rfc3339(),
                })
                .collect(),
            EntityKind::Documents => self
                .db
                .knowledge
                .recent_documents(limit)?
                .into_iter()
                .map(|d| RecentItem {
                    kind,
                    id: d.id,
                    preview: format!("{} ({})", d.title, d.path),
                    project: None,
                    created_at: d.updated_at.to_rfc3339(),
                })
                .collect(),
        };
        Ok(items)
    }

    /// Render one record as display text.
    pub fn show(&self, kind: EntityKind, id: i64) -> Result<String> {
        let not_found = || MemoryError::NotFound {
            kind: kind.as_str(),
            id: id.to_string(),
        };
        let rendered = match kind {
            EntityKind::Messages => {
                let conn = self.db.get_conn()?;
                let mut stmt = conn.prepare(
                    "SELECT id, session_ref, ts, role, content, project FROM messages WHERE id = ?1",
                )?;
                let mut rows = stmt.query([id])?;
                let row = rows.next()?.ok_or_else(not_found)?;
                let message = crate::memory_db::session_store::row_to_message(row)?;
                format!(
                    "message #{} [{}] {} ({})\n\n{}",
                    message.id,
                    message.role.as_str(),
                    message.ts.to_rfc3339(),
                    message.session_ref,
                    message.content
                )
            }
            EntityKind::Decisions => {
                let d = self.db.records.get_decision(id)?.ok_or_else(not_found)?;
                let mut out = format!(
                    "decision #{} [{}] {}\n\n{}",
                    d.id,
                    d.status.as_str(),
                    d.created_at.to_rfc3339(),
                    d.decision
                );
                if let Some(reasoning) = &d.reasoning {
                    out.push_str(&format!("\n\nreasoning: {reasoning}"));
                }
                if let Some(alternatives) = &d.alternatives {
                    out.push_str(&format!("\nalternatives: {alternatives}"));
                }
                out
            }
            EntityKind::Learnings => {
                let l = self.db.records.get_learning(id)?.ok_or_else(not_found)?;
                let mut out = format!(
                    "learning #{} {}\n\nproblem: {}",
                    l.id,
                    l.created_at.to_rfc3339(),
                    l.problem
                );
                if let Some(solution) = &l.solution {
                    out.push_str(&format!("\nsolution: {solution}"));
                }
                if let Some(prevention) = &l.prevention {
                    out.push_str(&format!("\nprevention: {prevention}"));
                }
                if let Some(tags) = &l.tags {
                    out.push_str(&format!("\ntags: {tags}"));
                }
                out
            }
            EntityKind::Breadcrumbs => {
                let b = self.db.records.get_breadcrumb(id)?.ok_or_else(not_found)?;
                format!(
                    "breadcrumb #{} (importance {}) {}\n\n{}",
                    b.id,
                    b.importance,
                    b.created_at.to_rfc3339(),
                    b.content
                )
            }
            EntityKind::Loa => {
                let e = self.db.loa.get_entry(id)?.ok_or_else(not_found)?;
                render_loa_entry(&e)
            }
            EntityKind::Telos => {
                let t = self.db.knowledge.get_telos_entry(id)?.ok_or_else(not_found)?;
                format!(
                    "telos {} [{}] {}\n\n{}",
                    t.code,
                    t.kind.as_str(),
                    t.title,
                    t.content
                )
            }
            EntityKind::Documents => {
                let d = self.db.knowledge.get_document(id)?.ok_or_else(not_found)?;
                format!(
                    "document #{} [{}] {} ({} bytes)\n\n{}",
                    d.id,
                    d.kind.as_str(),
                    d.title,
                    d.size_bytes,
                    d.content
                )
            }
        };
        Ok(rendered)
    }

    pub fn stats(&self) -> Result<DatabaseStats> {
        self.db.stats()
    }

    // ── Import ─────────────────────────────────────────────────────────

    /// Walk the transcript tree and ingest every session not yet in the
    /// store.
    pub fn import_sessions(&self, dry_run: bool, verbose: bool) -> Result<ImportReport> {
        let mut report = ImportReport::default();
        for path in collect_transcript_files(&self.config.transcript_root)? {
            report.files += 1;
            let parsed = match transcript::parse_transcript_file(&path) {
                Ok(parsed) => parsed,
                Err(e) => {
                    // One unreadable file must not sink the whole import.
                    warn!("Cannot read {}: {}", path.display(), e);
                    continue;
                }
            };
            let external_id = parsed
                .session_id
                .clone()
                .unwrap_or_else(|| file_stem(&path));

            if self.db.sessions.session_exists(&external_id)? {
                report.skipped_existing += 1;
                if verbose {
                    info!("Skipping {} (already imported)", external_id);
                }
                continue;
            }
            if parsed.turns.is_empty() {
                continue;
            }
            if dry_run {
                info!(
                    "Would import {} ({} messages)",
                    external_id,
                    parsed.turns.len()
                );
                report.sessions += 1;
                report.messages += parsed.turns.len();
                continue;
            }

            let count = self.ingest_parsed(&path, &parsed, &external_id)?;
            report.sessions += 1;
            report.messages += count;
            if verbose {
                info!("Imported {} ({} messages)", external_id, count);
            }
        }
        Ok(report)
    }

    /// Store one parsed transcript as a session plus its messages.
    fn ingest_parsed(
        &self,
        path: &Path,
        parsed: &transcript::ParsedTranscript,
        external_id: &str,
    ) -> Result<usize> {
        let project = parsed
            .cwd
            .as_deref()
            .map(|cwd| crate::project::detect_project(Path::new(cwd)))
            .or_else(|| {
                path.parent()
                    .and_then(|p| p.file_name())
                    .and_then(|n| n.to_str())
                    .and_then(crate::project::project_from_encoded_dir)
            });

        self.db.sessions.create_session(&NewSession {
            external_id: external_id.to_string(),
            started_at: parsed.first_ts.unwrap_or_else(Utc::now),
            ended_at: parsed.last_ts,
            summary: None,
            project: project.clone(),
            cwd: parsed.cwd.clone(),
            branch: parsed.branch.clone(),
            model: parsed.model.clone(),
        })?;

        let fallback_ts = parsed.first_ts.unwrap_or_else(Utc::now);
        let batch: Vec<NewMessage> = parsed
            .turns
            .iter()
            .map(|turn| NewMessage {
                session_ref: external_id.to_string(),
                ts: turn.ts.unwrap_or(fallback_ts),
                role: turn.role,
                content: turn.content.clone(),
                project: project.clone(),
            })
            .collect();
        self.db.sessions.add_messages_batch(&batch)
    }

    // ── Captures ───────────────────────────────────────────────────────

    /// Bundle the messages since the last capture (or a bounded tail) into
    /// one curated extract, then embed it.
    pub async fn loa_write(&self, title: &str, options: &LoaCaptureOptions) -> Result<LoaEntry> {
        if title.trim().is_empty() {
            return Err(MemoryError::InvalidInput("capture title is empty".into()));
        }
        let window = self.db.sessions.messages_since_last_loa(options.limit)?;
        if window.messages.is_empty() {
            return Err(MemoryError::InvalidInput(
                "no new messages to capture since the last entry".into(),
            ));
        }

        let flattened = flatten_messages(&window.messages);
        let extract = if options.skip_extract {
            flattened
        } else {
            let pipeline = ExtractionPipeline::from_config(&self.config);
            match pipeline
                .extract_once(EXTRACTION_SYSTEM_PROMPT, &flattened)
                .await
            {
                Ok(text) => text,
                Err(e) => {
                    // A capture with the raw digest beats losing the span.
                    warn!("Extractor unavailable for capture ({}), storing digest", e);
                    flattened
                }
            }
        };

        let last = window.messages.last().expect("window is non-empty");
        let entry_id = self.db.loa.create_entry(&NewLoaEntry {
            title: title.to_string(),
            description: None,
            extract,
            range_start: window.start_id,
            range_end: window.end_id,
            parent: options.continues,
            session_ref: Some(last.session_ref.clone()),
            project: options.project.clone().or_else(|| last.project.clone()),
            tags: options.tags.clone(),
            message_count: Some(window.messages.len() as i64),
        })?;

        let entry = self
            .db
            .loa
            .get_entry(entry_id)?
            .expect("entry just created");

        // Auto-embed; search works lexically even when this fails.
        match self
            .embedding_client
            .embed(&format!("{}\n{}", entry.title, entry.extract))
            .await
        {
            Ok(embedded) => {
                self.db.embeddings.store_embedding(
                    EntityKind::Loa,
                    entry.id,
                    &embedded.model,
                    &embedded.vector,
                )?;
            }
            Err(e) => warn!("Auto-embed failed for capture {}: {}", entry.id, e),
        }

        Ok(entry)
    }

    /// Re-ingest the currently active session (replacing any prior rows for
    /// its external id), then capture it.
    pub async fn dump(&self, title: &str, options: &LoaCaptureOptions) -> Result<LoaEntry> {
        let transcript_path = newest_transcript(&self.config.transcript_root)?.ok_or_else(|| {
            MemoryError::NotFound {
                kind: "transcript",
                id: self.config.transcript_root.display().to_string(),
            }
        })?;
        let parsed = transcript::parse_transcript_file(&transcript_path)?;
        let external_id = parsed
            .session_id
            .clone()
            .unwrap_or_else(|| file_stem(&transcript_path));

        if self.db.sessions.session_exists(&external_id)? {
            let deleted = self.db.sessions.delete_session_cascade(&external_id)?;
            debug!("Replaced session {} ({} old messages)", external_id, deleted);
        }
        if parsed.turns.is_empty() {
            return Err(MemoryError::InvalidInput(format!(
                "transcript {} holds no extractable messages",
                transcript_path.display()
            )));
        }
        self.ingest_parsed(&transcript_path, &parsed, &external_id)?;

        self.loa_write(title, options).await
    }

    pub fn loa_show(&self, id: i64) -> Result<LoaEntry> {
        self.db.loa.get_entry(id)?.ok_or(MemoryError::NotFound {
            kind: "loa",
            id: id.to_string(),
        })
    }

    pub fn loa_quote(&self, id: i64) -> Result<Vec<StoredMessage>> {
        self.db.loa.entry_messages(id)
    }

    pub fn loa_list(&self, limit: usize) -> Result<Vec<LoaEntry>> {
        self.db.loa.list_entries(limit)
    }

    // ── Embeddings ─────────────────────────────────────────────────────

    /// Embed rows that don't have a vector yet (all rows with `force`).
    pub async fn embed_backfill(
        &self,
        kind: Option<EntityKind>,
        limit: usize,
        force: bool,
    ) -> Result<BackfillReport> {
        let kinds = kind.map(|k| vec![k]).unwrap_or_else(|| EntityKind::ALL.to_vec());
        let mut report = BackfillReport::default();

        for kind in kinds {
            let ids = if force {
                self.db.embeddings.all_source_ids(kind, limit)?
            } else {
                self.db.embeddings.missing_source_ids(kind, limit)?
            };
            for id in ids {
                let Some(text) = self.source_text(kind, id)? else {
                    continue;
                };
                match self.embedding_client.embed(&text).await {
                    Ok(embedded) => {
                        self.db
                            .embeddings
                            .store_embedding(kind, id, &embedded.model, &embedded.vector)?;
                        report.embedded += 1;
                    }
                    Err(MemoryError::ServiceUnavailable(reason)) => {
                        // The service is down; there is no point iterating on.
                        warn!("Backfill stopped, embeddings unavailable: {}", reason);
                        report.failed += 1;
                        return Ok(report);
                    }
                    Err(e) => {
                        warn!("Backfill failed for {}:{}: {}", kind, id, e);
                        report.failed += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    pub fn embed_stats(&self) -> Result<EmbeddingStats> {
        self.db.embeddings.stats()
    }

    pub async fn embedding_health(&self) -> EmbeddingHealth {
        self.embedding_client.health().await
    }

    /// Text embedded for one base row, per kind.
    fn source_text(&self, kind: EntityKind, id: i64) -> Result<Option<String>> {
        let conn = self.db.get_conn()?;
        let sql = match kind {
            EntityKind::Messages => "SELECT content FROM messages WHERE id = ?1",
            EntityKind::Decisions => {
                "SELECT decision || COALESCE(char(10) || reasoning, '') FROM decisions WHERE id = ?1"
            }
            EntityKind::Learnings => {
                "SELECT problem || COALESCE(char(10) || solution, '') || COALESCE(char(10) || prevention, '')
                 FROM learnings WHERE id = ?1"
            }
            EntityKind::Breadcrumbs => "SELECT content FROM breadcrumbs WHERE id = ?1",
            EntityKind::Loa => "SELECT title || char(10) || extract FROM loa_entries WHERE id = ?1",
            EntityKind::Telos => "SELECT title || char(10) || content FROM telos_entries WHERE id = ?1",
            EntityKind::Documents => "SELECT title || char(10) || content FROM documents WHERE id = ?1",
        };
        use rusqlite::OptionalExtension;
        Ok(conn.query_row(sql, [id], |row| row.get(0)).optional()?)
    }

    // ── Extraction ─────────────────────────────────────────────────────

    pub async fn extract_file(
        &self,
        path: &Path,
        cwd: Option<&Path>,
        force: bool,
    ) -> Result<ExtractionOutcome> {
        ExtractionPipeline::from_config(&self.config)
            .run_file(path, cwd, force)
            .await
    }

    pub async fn batch_extract(&self, limit: Option<usize>, dry_run: bool) -> Result<ScanReport> {
        let pipeline = ExtractionPipeline::from_config(&self.config);
        let scanner = BatchScanner::new(
            self.config.transcript_root.clone(),
            limit,
            dry_run,
            self.config.batch_step_timeout,
            self.config.batch_sleep,
        );
        scanner.run(&pipeline).await
    }

    // ── Knowledge imports ──────────────────────────────────────────────

    /// Import a TELOS markdown file: `## CODE: Title` sections with free
    /// bodies, all entries typed `kind`.
    pub fn telos_import(&self, path: &Path, kind: TelosKind) -> Result<usize> {
        let text = std::fs::read_to_string(path)?;
        let mut imported = 0usize;

        let headings: Vec<(usize, String, String)> = TELOS_HEADING
            .captures_iter(&text)
            .map(|captures| {
                let all = captures.get(0).unwrap();
                (
                    all.end(),
                    captures[1].to_string(),
                    captures[2].trim().to_string(),
                )
            })
            .collect();
        if headings.is_empty() {
            return Err(MemoryError::InvalidInput(format!(
                "{} holds no '## CODE: Title' sections",
                path.display()
            )));
        }

        let starts: Vec<usize> = TELOS_HEADING
            .captures_iter(&text)
            .map(|c| c.get(0).unwrap().start())
            .collect();

        for (index, (body_start, code, title)) in headings.iter().enumerate() {
            let body_end = starts.get(index + 1).copied().unwrap_or(text.len());
            let content = text[*body_start..body_end].trim().to_string();
            self.db.knowledge.upsert_telos_entry(&NewTelosEntry {
                code: code.clone(),
                kind,
                category: None,
                title: title.clone(),
                content,
                parent_code: None,
                source_file: Some(path.to_string_lossy().into_owned()),
            })?;
            imported += 1;
        }
        info!("Imported {} telos entries from {}", imported, path.display());
        Ok(imported)
    }

    /// Import one document file.
    pub fn docs_import(&self, path: &Path, kind: DocumentKind) -> Result<i64> {
        let content = std::fs::read_to_string(path)?;
        let metadata = std::fs::metadata(path)?;
        let title = content
            .lines()
            .find_map(|line| line.strip_prefix("# "))
            .map(|t| t.trim().to_string())
            .unwrap_or_else(|| file_stem(path));
        let modified = metadata
            .modified()
            .map(chrono::DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        self.db.knowledge.upsert_document(&NewDocument {
            path: path.to_string_lossy().into_owned(),
            title,
            kind,
            content,
            summary: None,
            size_bytes: metadata.len() as i64,
            file_modified_at: modified,
        })
    }
}

fn render_loa_entry(entry: &LoaEntry) -> String {
    let mut out = format!(
        "loa #{} — {}\ncreated: {}",
        entry.id,
        entry.title,
        entry.created_at.to_rfc3339()
    );
    if let (Some(start), Some(end)) = (entry.range_start, entry.range_end) {
        out.push_str(&format!(
            "\nmessages: {}..{} ({})",
            start,
            end,
            entry.message_count.unwrap_or(0)
        ));
    }
    if let Some(project) = &entry.project {
        out.push_str(&format!("\nproject: {project}"));
    }
    if let Some(tags) = &entry.tags {
        out.push_str(&format!("\ntags: {tags}"));
    }
    if let Some(parent) = entry.parent {
        out.push_str(&format!("\ncontinues: #{parent}"));
    }
    out.push_str(&format!("\n\n{}", entry.extract));
    out
}

/// Flatten stored messages the same way transcripts are normalized.
fn flatten_messages(messages: &[StoredMessage]) -> String {
    let turns: Vec<Turn> = messages
        .iter()
        .map(|m| Turn {
            role: m.role,
            ts: Some(m.ts),
            content: m.content.clone(),
        })
        .collect();
    transcript::normalize_turns(&turns)
}

fn collect_transcript_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn newest_transcript(root: &Path) -> Result<Option<PathBuf>> {
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for path in collect_transcript_files(root)? {
        let Ok(metadata) = std::fs::metadata(&path) else {
            continue;
        };
        let mtime = metadata.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        if newest.as_ref().map_or(true, |(t, _)| mtime > *t) {
            newest = Some((mtime, path));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
