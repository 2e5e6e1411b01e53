//! Engine configuration, resolved from environment variables with sensible
//! defaults. A `.env` file is honoured when present.

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Character ceiling for a single embedding request; longer inputs are
/// truncated to stay inside the embedding model's context.
pub const EMBED_INPUT_CEILING: usize = 30_000;

/// Per-message truncation applied during transcript normalization.
pub const MESSAGE_TRUNCATE_CHARS: usize = 4_000;

/// Normalized transcripts above this size are split into chunks.
pub const CHUNK_THRESHOLD_CHARS: usize = 120_000;

/// Maximum size of a single extraction chunk.
pub const CHUNK_SIZE_CHARS: usize = 80_000;

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory that owns the store and the MEMORY/ side files.
    pub base_dir: PathBuf,
    /// Path of the SQLite data file.
    pub db_path: PathBuf,
    /// Root of the transcript tree scanned by import and batch extraction.
    pub transcript_root: PathBuf,
    /// Base URL of the embedding service (Ollama wire contract).
    pub ollama_url: String,
    /// Embedding model name, checked against the service's model list.
    pub embedding_model: String,
    /// Model used by the fallback HTTP extractor.
    pub extract_model: String,
    /// Primary extractor command line, e.g. `claude -p`. The system prompt is
    /// appended as the final argument and the transcript is piped on stdin.
    /// When unset, extraction goes straight to the HTTP fallback.
    pub extractor_cmd: Option<String>,
    pub embed_timeout: Duration,
    pub llm_timeout: Duration,
    /// Total budget for a chunked extraction (all chunk calls + merge).
    pub llm_total_timeout: Duration,
    /// Budget for one batch-scanner extraction step.
    pub batch_step_timeout: Duration,
    /// Pause between batch extractions.
    pub batch_sleep: Duration,
    /// Sessions kept in the hot-recall rotation.
    pub hot_recall_cap: usize,
    /// Entries kept in the session index.
    pub session_index_cap: usize,
}

impl Config {
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            if !matches!(e, dotenvy::Error::Io(_)) {
                warn!("Failed to load .env file: {}. Using system environment variables.", e);
            }
        }

        let base_dir = env::var("BASE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_base_dir());

        let db_path = env::var("MEM_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| base_dir.join("memory.db"));

        let transcript_root = env::var("TRANSCRIPT_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_transcript_root());

        let config = Self {
            base_dir,
            db_path,
            transcript_root,
            ollama_url: env::var("OLLAMA_URL")
                .unwrap_or_else(|_| "http://localhost:11434".into()),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "nomic-embed-text".into()),
            extract_model: env::var("EXTRACT_MODEL").unwrap_or_else(|_| "llama3.1".into()),
            extractor_cmd: env::var("EXTRACTOR_CMD").ok().filter(|s| !s.trim().is_empty()),
            embed_timeout: duration_from_env("EMBED_TIMEOUT_SECONDS", 180),
            llm_timeout: duration_from_env("LLM_TIMEOUT_SECONDS", 300),
            llm_total_timeout: duration_from_env("LLM_TOTAL_TIMEOUT_SECONDS", 600),
            batch_step_timeout: duration_from_env("BATCH_STEP_TIMEOUT_SECONDS", 120),
            batch_sleep: duration_from_env("BATCH_SLEEP_SECONDS", 5),
            hot_recall_cap: 10,
            session_index_cap: 500,
        };

        info!(
            "Config: db={}, base={}, embeddings={}@{}",
            config.db_path.display(),
            config.base_dir.display(),
            config.embedding_model,
            config.ollama_url
        );

        config
    }

    /// Directory holding DISTILLED.md, HOT_RECALL.md, and the JSON side files.
    pub fn memory_dir(&self) -> PathBuf {
        self.base_dir.join("MEMORY")
    }

    /// Path of the extraction-state file.
    pub fn tracker_path(&self) -> PathBuf {
        self.memory_dir().join(".extraction_tracker.json")
    }
}

fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".alexandria")
}

fn default_transcript_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude")
        .join("projects")
}

fn duration_from_env(key: &str, default_secs: u64) -> Duration {
    let secs = env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default_secs);
    Duration::from_secs(secs)
}
