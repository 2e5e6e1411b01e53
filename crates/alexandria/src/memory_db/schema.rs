//! Entity definitions and the SQL schema for the memory store.
//!
//! Each searchable table has a companion FTS5 index (external content) kept
//! in sync by insert/update/delete triggers, so index rows are always 1:1
//! with base rows after a committed transaction.

use crate::error::{MemoryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Conversation turn role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Uppercase label used when flattening transcripts, e.g. `[USER]:`.
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
            Role::System => "SYSTEM",
        }
    }
}

impl FromStr for Role {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(MemoryError::InvalidInput(format!("unknown role '{other}'"))),
        }
    }
}

/// Lifecycle of a recorded decision. Revisions are append-only; a superseding
/// decision gets its own row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionStatus {
    Active,
    Superseded,
    Reverted,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Active => "active",
            DecisionStatus::Superseded => "superseded",
            DecisionStatus::Reverted => "reverted",
        }
    }
}

impl FromStr for DecisionStatus {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(DecisionStatus::Active),
            "superseded" => Ok(DecisionStatus::Superseded),
            "reverted" => Ok(DecisionStatus::Reverted),
            other => Err(MemoryError::InvalidInput(format!(
                "unknown decision status '{other}'"
            ))),
        }
    }
}

/// The entity kinds that carry searchable prose. Doubles as the
/// `source_kind` discriminator for embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Messages,
    Decisions,
    Learnings,
    Breadcrumbs,
    Loa,
    Telos,
    Documents,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Messages,
        EntityKind::Decisions,
        EntityKind::Learnings,
        EntityKind::Breadcrumbs,
        EntityKind::Loa,
        EntityKind::Telos,
        EntityKind::Documents,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Messages => "messages",
            EntityKind::Decisions => "decisions",
            EntityKind::Learnings => "learnings",
            EntityKind::Breadcrumbs => "breadcrumbs",
            EntityKind::Loa => "loa",
            EntityKind::Telos => "telos",
            EntityKind::Documents => "documents",
        }
    }

    /// Base table backing this kind.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Messages => "messages",
            EntityKind::Decisions => "decisions",
            EntityKind::Learnings => "learnings",
            EntityKind::Breadcrumbs => "breadcrumbs",
            EntityKind::Loa => "loa_entries",
            EntityKind::Telos => "telos_entries",
            EntityKind::Documents => "documents",
        }
    }

    /// FTS5 index table for this kind.
    pub fn fts_table(&self) -> &'static str {
        match self {
            EntityKind::Messages => "messages_fts",
            EntityKind::Decisions => "decisions_fts",
            EntityKind::Learnings => "learnings_fts",
            EntityKind::Breadcrumbs => "breadcrumbs_fts",
            EntityKind::Loa => "loa_fts",
            EntityKind::Telos => "telos_fts",
            EntityKind::Documents => "documents_fts",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "messages" | "message" => Ok(EntityKind::Messages),
            "decisions" | "decision" => Ok(EntityKind::Decisions),
            "learnings" | "learning" => Ok(EntityKind::Learnings),
            "breadcrumbs" | "breadcrumb" => Ok(EntityKind::Breadcrumbs),
            "loa" => Ok(EntityKind::Loa),
            "telos" => Ok(EntityKind::Telos),
            "documents" | "document" | "docs" => Ok(EntityKind::Documents),
            other => Err(MemoryError::InvalidInput(format!("unknown kind '{other}'"))),
        }
    }
}

/// TELOS entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelosKind {
    Identity,
    Problem,
    Mission,
    Goal,
    Challenge,
    Strategy,
    Project,
    Skill,
    Aspiration,
    Metric,
    Other,
}

impl TelosKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TelosKind::Identity => "identity",
            TelosKind::Problem => "problem",
            TelosKind::Mission => "mission",
            TelosKind::Goal => "goal",
            TelosKind::Challenge => "challenge",
            TelosKind::Strategy => "strategy",
            TelosKind::Project => "project",
            TelosKind::Skill => "skill",
            TelosKind::Aspiration => "aspiration",
            TelosKind::Metric => "metric",
            TelosKind::Other => "other",
        }
    }
}

impl FromStr for TelosKind {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "identity" => Ok(TelosKind::Identity),
            "problem" => Ok(TelosKind::Problem),
            "mission" => Ok(TelosKind::Mission),
            "goal" => Ok(TelosKind::Goal),
            "challenge" => Ok(TelosKind::Challenge),
            "strategy" => Ok(TelosKind::Strategy),
            "project" => Ok(TelosKind::Project),
            "skill" => Ok(TelosKind::Skill),
            "aspiration" => Ok(TelosKind::Aspiration),
            "metric" => Ok(TelosKind::Metric),
            "other" => Ok(TelosKind::Other),
            other => Err(MemoryError::InvalidInput(format!(
                "unknown telos type '{other}'"
            ))),
        }
    }
}

/// Imported document type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Diary,
    Reference,
    Wisdom,
    Plan,
    Memory,
    Enterprise,
    Other,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Diary => "diary",
            DocumentKind::Reference => "reference",
            DocumentKind::Wisdom => "wisdom",
            DocumentKind::Plan => "plan",
            DocumentKind::Memory => "memory",
            DocumentKind::Enterprise => "enterprise",
            DocumentKind::Other => "other",
        }
    }
}

impl FromStr for DocumentKind {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "diary" => Ok(DocumentKind::Diary),
            "reference" => Ok(DocumentKind::Reference),
            "wisdom" => Ok(DocumentKind::Wisdom),
            "plan" => Ok(DocumentKind::Plan),
            "memory" => Ok(DocumentKind::Memory),
            "enterprise" => Ok(DocumentKind::Enterprise),
            "other" => Ok(DocumentKind::Other),
            other => Err(MemoryError::InvalidInput(format!(
                "unknown document type '{other}'"
            ))),
        }
    }
}

/// A conversation session, keyed externally by the transcript's session id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub external_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub project: Option<String>,
    pub cwd: Option<String>,
    pub branch: Option<String>,
    pub model: Option<String>,
}

/// One conversation turn. Immutable once written; ordered within a session
/// by `(ts, id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub session_ref: String,
    pub ts: DateTime<Utc>,
    pub role: Role,
    pub content: String,
    pub project: Option<String>,
}

/// A message ready for insertion (id and timestamps assigned by the store).
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub session_ref: String,
    pub ts: DateTime<Utc>,
    pub role: Role,
    pub content: String,
    pub project: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub session_ref: Option<String>,
    pub category: Option<String>,
    pub project: Option<String>,
    pub decision: String,
    pub reasoning: Option<String>,
    pub alternatives: Option<String>,
    pub status: DecisionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learning {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub session_ref: Option<String>,
    pub category: Option<String>,
    pub project: Option<String>,
    pub problem: String,
    pub solution: Option<String>,
    pub prevention: Option<String>,
    pub tags: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub session_ref: Option<String>,
    pub content: String,
    pub category: Option<String>,
    pub project: Option<String>,
    pub importance: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A curated extract over a contiguous span of messages. Forms a forest via
/// `parent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaEntry {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub description: Option<String>,
    pub extract: String,
    pub range_start: Option<i64>,
    pub range_end: Option<i64>,
    pub parent: Option<i64>,
    pub session_ref: Option<String>,
    pub project: Option<String>,
    pub tags: Option<String>,
    pub message_count: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewLoaEntry {
    pub title: String,
    pub description: Option<String>,
    pub extract: String,
    pub range_start: Option<i64>,
    pub range_end: Option<i64>,
    pub parent: Option<i64>,
    pub session_ref: Option<String>,
    pub project: Option<String>,
    pub tags: Option<String>,
    pub message_count: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelosEntry {
    pub id: i64,
    pub code: String,
    pub kind: TelosKind,
    pub category: Option<String>,
    pub title: String,
    pub content: String,
    pub parent_code: Option<String>,
    pub source_file: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub path: String,
    pub title: String,
    pub kind: DocumentKind,
    pub content: String,
    pub summary: Option<String>,
    pub size_bytes: i64,
    pub file_modified_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored embedding row. The vector blob holds `dimensions` little-endian
/// f32 lanes.
#[derive(Debug, Clone)]
pub struct StoredEmbedding {
    pub id: i64,
    pub source_kind: EntityKind,
    pub source_id: i64,
    pub model: String,
    pub dimensions: usize,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// Row counts per kind plus the data-file size.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DatabaseStats {
    pub sessions: i64,
    pub messages: i64,
    pub loa_entries: i64,
    pub decisions: i64,
    pub learnings: i64,
    pub breadcrumbs: i64,
    pub telos_entries: i64,
    pub documents: i64,
    pub embeddings: i64,
    pub db_size_bytes: i64,
}

/// Serialize a timestamp the way every table stores it.
pub fn to_sql_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339()
}

/// Parse a stored timestamp.
pub fn from_sql_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MemoryError::Integrity(format!("bad stored timestamp '{s}': {e}")))
}

/// Full schema, applied by migration version 1. RFC 3339 UTC timestamps sort
/// lexicographically, so TEXT ordering matches time ordering.
pub const SCHEMA_SQL: &str = "
-- Sessions, keyed by the transcript-assigned external id
CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    summary TEXT,
    project TEXT,
    cwd TEXT,
    branch TEXT,
    model TEXT
);

-- Conversation turns; ordered within a session by (ts, id)
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_ref TEXT NOT NULL REFERENCES sessions(external_id) ON DELETE CASCADE,
    ts TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    project TEXT
);

CREATE TABLE IF NOT EXISTS decisions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL,
    session_ref TEXT,
    category TEXT,
    project TEXT,
    decision TEXT NOT NULL,
    reasoning TEXT,
    alternatives TEXT,
    status TEXT NOT NULL DEFAULT 'active'
);

CREATE TABLE IF NOT EXISTS learnings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL,
    session_ref TEXT,
    category TEXT,
    project TEXT,
    problem TEXT NOT NULL,
    solution TEXT,
    prevention TEXT,
    tags TEXT
);

CREATE TABLE IF NOT EXISTS breadcrumbs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL,
    session_ref TEXT,
    content TEXT NOT NULL,
    category TEXT,
    project TEXT,
    importance INTEGER NOT NULL DEFAULT 5,
    expires_at TEXT
);

-- Curated extracts over message spans; forest via parent
CREATE TABLE IF NOT EXISTS loa_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    extract TEXT NOT NULL,
    range_start INTEGER,
    range_end INTEGER,
    parent INTEGER REFERENCES loa_entries(id),
    session_ref TEXT,
    project TEXT,
    tags TEXT,
    message_count INTEGER
);

CREATE TABLE IF NOT EXISTS telos_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    category TEXT,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    parent_code TEXT,
    source_file TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    kind TEXT NOT NULL,
    content TEXT NOT NULL,
    summary TEXT,
    size_bytes INTEGER NOT NULL,
    file_modified_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- One embedding per (source_kind, source_id); replacement is an upsert
CREATE TABLE IF NOT EXISTS embeddings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_kind TEXT NOT NULL,
    source_id INTEGER NOT NULL,
    model TEXT NOT NULL,
    dimensions INTEGER NOT NULL,
    vector BLOB NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(source_kind, source_id)
);

CREATE INDEX IF NOT EXISTS idx_messages_session ON messages (session_ref);
CREATE INDEX IF NOT EXISTS idx_messages_ts ON messages (ts);
CREATE INDEX IF NOT EXISTS idx_decisions_created ON decisions (created_at);
CREATE INDEX IF NOT EXISTS idx_learnings_created ON learnings (created_at);
CREATE INDEX IF NOT EXISTS idx_breadcrumbs_created ON breadcrumbs (created_at);
CREATE INDEX IF NOT EXISTS idx_loa_range_end ON loa_entries (range_end);
CREATE INDEX IF NOT EXISTS idx_embeddings_source ON embeddings (source_kind, source_id);

-- ── Lexical indexes ────────────────────────────────────────────────────
-- External-content FTS5 tables, one per searchable kind, synchronized by
-- triggers. Index rows are 1:1 with base rows after any committed write.

CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
    content, project,
    content=messages, content_rowid=id,
    tokenize='porter unicode61'
);
CREATE TRIGGER IF NOT EXISTS messages_fts_insert AFTER INSERT ON messages
BEGIN
    INSERT INTO messages_fts(rowid, content, project)
    VALUES (NEW.id, NEW.content, NEW.project);
END;
CREATE TRIGGER IF NOT EXISTS messages_fts_delete AFTER DELETE ON messages
BEGIN
    INSERT INTO messages_fts(messages_fts, rowid, content, project)
    VALUES ('delete', OLD.id, OLD.content, OLD.project);
END;
CREATE TRIGGER IF NOT EXISTS messages_fts_update AFTER UPDATE ON messages
BEGIN
    INSERT INTO messages_fts(messages_fts, rowid, content, project)
    VALUES ('delete', OLD.id, OLD.content, OLD.project);
    INSERT INTO messages_fts(rowid, content, project)
    VALUES (NEW.id, NEW.content, NEW.project);
END;

CREATE VIRTUAL TABLE IF NOT EXISTS decisions_fts USING fts5(
    decision, reasoning, project,
    content=decisions, content_rowid=id,
    tokenize='porter unicode61'
);
CREATE TRIGGER IF NOT EXISTS decisions_fts_insert AFTER INSERT ON decisions
BEGIN
    INSERT INTO decisions_fts(rowid, decision, reasoning, project)
    VALUES (NEW.id, NEW.decision, NEW.reasoning, NEW.project);
END;
CREATE TRIGGER IF NOT EXISTS decisions_fts_delete AFTER DELETE ON decisions
BEGIN
    INSERT INTO decisions_fts(decisions_fts, rowid, decision, reasoning, project)
    VALUES ('delete', OLD.id, OLD.decision, OLD.reasoning, OLD.project);
END;
CREATE TRIGGER IF NOT EXISTS decisions_fts_update AFTER UPDATE ON decisions
BEGIN
    INSERT INTO decisions_fts(decisions_fts, rowid, decision, reasoning, project)
    VALUES ('delete', OLD.id, OLD.decision, OLD.reasoning, OLD.project);
    INSERT INTO decisions_fts(rowid, decision, reasoning, project)
    VALUES (NEW.id, NEW.decision, NEW.reasoning, NEW.project);
END;

CREATE VIRTUAL TABLE IF NOT EXISTS learnings_fts USING fts5(
    problem, solution, tags, project,
    content=learnings, content_rowid=id,
    tokenize='porter unicode61'
);
CREATE TRIGGER IF NOT EXISTS learnings_fts_insert AFTER INSERT ON learnings
BEGIN
    INSERT INTO learnings_fts(rowid, problem, solution, tags, project)
    VALUES (NEW.id, NEW.problem, NEW.solution, NEW.tags, NEW.project);
END;
CREATE TRIGGER IF NOT EXISTS learnings_fts_delete AFTER DELETE ON learnings
BEGIN
    INSERT INTO learnings_fts(learnings_fts, rowid, problem, solution, tags, project)
    VALUES ('delete', OLD.id, OLD.problem, OLD.solution, OLD.tags, OLD.project);
END;
CREATE TRIGGER IF NOT EXISTS learnings_fts_update AFTER UPDATE ON learnings
BEGIN
    INSERT INTO learnings_fts(learnings_fts, rowid, problem, solution, tags, project)
    VALUES ('delete', OLD.id, OLD.problem, OLD.solution, OLD.tags, OLD.project);
    INSERT INTO learnings_fts(rowid, problem, solution, tags, project)
    VALUES (NEW.id, NEW.problem, NEW.solution, NEW.tags, NEW.project);
END;

CREATE VIRTUAL TABLE IF NOT EXISTS breadcrumbs_fts USING fts5(
    content, category, project,
    content=breadcrumbs, content_rowid=id,
    tokenize='porter unicode61'
);
CREATE TRIGGER IF NOT EXISTS breadcrumbs_fts_insert AFTER INSERT ON breadcrumbs
BEGIN
    INSERT INTO breadcrumbs_fts(rowid, content, category, project)
    VALUES (NEW.id, NEW.content, NEW.category, NEW.project);
END;
CREATE TRIGGER IF NOT EXISTS breadcrumbs_fts_delete AFTER DELETE ON breadcrumbs
BEGIN
    INSERT INTO breadcrumbs_fts(breadcrumbs_fts, rowid, content, category, project)
    VALUES ('delete', OLD.id, OLD.content, OLD.category, OLD.project);
END;
CREATE TRIGGER IF NOT EXISTS breadcrumbs_fts_update AFTER UPDATE ON breadcrumbs
BEGIN
    INSERT INTO breadcrumbs_fts(breadcrumbs_fts, rowid, content, category, project)
    VALUES ('delete', OLD.id, OLD.content, OLD.category, OLD.project);
    INSERT INTO breadcrumbs_fts(rowid, content, category, project)
    VALUES (NEW.id, NEW.content, NEW.category, NEW.project);
END;

CREATE VIRTUAL TABLE IF NOT EXISTS loa_fts USING fts5(
    title, description, extract, tags, project,
    content=loa_entries, content_rowid=id,
    tokenize='porter unicode61'
);
CREATE TRIGGER IF NOT EXISTS loa_fts_insert AFTER INSERT ON loa_entries
BEGIN
    INSERT INTO loa_fts(rowid, title, description, extract, tags, project)
    VALUES (NEW.id, NEW.title, NEW.description, NEW.extract, NEW.tags, NEW.project);
END;
CREATE TRIGGER IF NOT EXISTS loa_fts_delete AFTER DELETE ON loa_entries
BEGIN
    INSERT INTO loa_fts(loa_fts, rowid, title, description, extract, tags, project)
    VALUES ('delete', OLD.id, OLD.title, OLD.description, OLD.extract, OLD.tags, OLD.project);
END;
CREATE TRIGGER IF NOT EXISTS loa_fts_update AFTER UPDATE ON loa_entries
BEGIN
    INSERT INTO loa_fts(loa_fts, rowid, title, description, extract, tags, project)
    VALUES ('delete', OLD.id, OLD.title, OLD.description, OLD.extract, OLD.tags, OLD.project);
    INSERT INTO loa_fts(rowid, title, description, extract, tags, project)
    VALUES (NEW.id, NEW.title, NEW.description, NEW.extract, NEW.tags, NEW.project);
END;

CREATE VIRTUAL TABLE IF NOT EXISTS telos_fts USING fts5(
    code, kind, title, content, category,
    content=telos_entries, content_rowid=id,
    tokenize='porter unicode61'
);
CREATE TRIGGER IF NOT EXISTS telos_fts_insert AFTER INSERT ON telos_entries
BEGIN
    INSERT INTO telos_fts(rowid, code, kind, title, content, category)
    VALUES (NEW.id, NEW.code, NEW.kind, NEW.title, NEW.content, NEW.category);
END;
CREATE TRIGGER IF NOT EXISTS telos_fts_delete AFTER DELETE ON telos_entries
BEGIN
    INSERT INTO telos_fts(telos_fts, rowid, code, kind, title, content, category)
    VALUES ('delete', OLD.id, OLD.code, OLD.kind, OLD.title, OLD.content, OLD.category);
END;
CREATE TRIGGER IF NOT EXISTS telos_fts_update AFTER UPDATE ON telos_entries
BEGIN
    INSERT INTO telos_fts(telos_fts, rowid, code, kind, title, content, category)
    VALUES ('delete', OLD.id, OLD.code, OLD.kind, OLD.title, OLD.content, OLD.category);
    INSERT INTO telos_fts(rowid, code, kind, title, content, category)
    VALUES (NEW.id, NEW.code, NEW.kind, NEW.title, NEW.content, NEW.category);
END;

CREATE VIRTUAL TABLE IF NOT EXISTS documents_fts USING fts5(
    title, kind, content, summary, path,
    content=documents, content_rowid=id,
    tokenize='porter unicode61'
);
CREATE TRIGGER IF NOT EXISTS documents_fts_insert AFTER INSERT ON documents
BEGIN
    INSERT INTO documents_fts(rowid, title, kind, content, summary, path)
    VALUES (NEW.id, NEW.title, NEW.kind, NEW.content, NEW.summary, NEW.path);
END;
CREATE TRIGGER IF NOT EXISTS documents_fts_delete AFTER DELETE ON documents
BEGIN
    INSERT INTO documents_fts(documents_fts, rowid, title, kind, content, summary, path)
    VALUES ('delete', OLD.id, OLD.title, OLD.kind, OLD.content, OLD.summary, OLD.path);
END;
CREATE TRIGGER IF NOT EXISTS documents_fts_update AFTER UPDATE ON documents
BEGIN
    INSERT INTO documents_fts(documents_fts, rowid, title, kind, content, summary, path)
    VALUES ('delete', OLD.id, OLD.title, OLD.kind, OLD.content, OLD.summary, OLD.path);
    INSERT INTO documents_fts(rowid, title, kind, content, summary, path)
    VALUES (NEW.id, NEW.title, NEW.kind, NEW.content, NEW.summary, NEW.path);
END;
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips() {
        for role in [Role::User, Role::Assistant, Role::System] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("tool".parse::<Role>().is_err());
    }

    #[test]
    fn kind_accepts_singular_aliases() {
        assert_eq!("decision".parse::<EntityKind>().unwrap(), EntityKind::Decisions);
        assert_eq!("loa".parse::<EntityKind>().unwrap(), EntityKind::Loa);
        assert!("widgets".parse::<EntityKind>().is_err());
    }

    #[test]
    fn sql_time_round_trips() {
        let now = Utc::now();
        let parsed = from_sql_time(&to_sql_time(&now)).unwrap();
        assert_eq!(parsed.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn every_kind_names_distinct_tables() {
        let mut tables: Vec<&str> = EntityKind::ALL.iter().map(|k| k.table()).collect();
        tables.sort();
        tables.dedup();
        assert_eq!(tables.len(), EntityKind::ALL.len());
    }
}
