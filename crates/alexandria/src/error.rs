//! Error taxonomy for the memory engine.
//!
//! Every fallible engine operation returns `Result<T, MemoryError>`. The CLI
//! maps variants to exit codes: integrity-class failures exit 2, everything
//! else exits 1.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MemoryError>;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory store not initialized at {path}; run `alexandria init` first")]
    NotInitialized { path: PathBuf },

    #[error("store schema version {found} is newer than this build supports ({supported}); upgrade alexandria")]
    SchemaTooNew { found: i64, supported: i64 },

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("duplicate {0}")]
    Duplicate(String),

    #[error("corrupt embedding blob: {len} bytes cannot hold {dimensions} f32 lanes")]
    CorruptEmbedding { len: usize, dimensions: usize },

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("malformed response from external service: {0}")]
    Protocol(String),

    #[error("extractor output failed the quality gate: {0}")]
    QualityGateFailed(String),

    #[error("input too large: {size} chars exceeds the {limit} char ceiling")]
    InputTooLarge { size: usize, limit: usize },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<r2d2::Error> for MemoryError {
    fn from(e: r2d2::Error) -> Self {
        MemoryError::Pool(e.to_string())
    }
}

impl MemoryError {
    /// CLI exit code for this error. 2 marks unrecoverable integrity-class
    /// failures, 1 everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            MemoryError::Integrity(_) | MemoryError::SchemaTooNew { .. } => 2,
            _ => 1,
        }
    }
}
