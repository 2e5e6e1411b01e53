//! Memory store - embedded SQLite storage for sessions, structured records,
//! curated extracts, and embeddings.
//!
//! One `MemoryDatabase` owns the connection pool; the per-kind stores borrow
//! it. Writes are serialized through `with_transaction` (BEGIN IMMEDIATE);
//! readers run concurrently thanks to WAL.

pub mod embedding_store;
pub mod knowledge_store;
pub mod loa_store;
pub mod migration;
pub mod record_store;
pub mod schema;
pub mod session_store;

pub use embedding_store::{blob_to_embedding, cosine_similarity, embedding_to_blob, EmbeddingStats, EmbeddingStore};
pub use knowledge_store::KnowledgeStore;
pub use loa_store::LoaStore;
pub use migration::MigrationManager;
pub use record_store::RecordStore;
pub use schema::*;
pub use session_store::SessionStore;

use crate::error::{MemoryError, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug)]
pub struct MemoryDatabase {
    pub sessions: SessionStore,
    pub records: RecordStore,
    pub loa: LoaStore,
    pub knowledge: KnowledgeStore,
    pub embeddings: EmbeddingStore,
    pool: Arc<Pool<SqliteConnectionManager>>,
    path: Option<PathBuf>,
}

impl MemoryDatabase {
    /// Open an existing store. Fails with `NotInitialized` when the data file
    /// does not exist; `init` is the only operation allowed to create it.
    pub fn open(db_path: &Path) -> Result<Self> {
        if !db_path.exists() {
            return Err(MemoryError::NotInitialized {
                path: db_path.to_path_buf(),
            });
        }
        let db = Self::open_or_create(db_path)?;
        Ok(db)
    }

    /// Create or upgrade the store. Returns whether the data file was newly
    /// created.
    pub fn init(db_path: &Path) -> Result<(Self, bool)> {
        let created = !db_path.exists();
        let db = Self::open_or_create(db_path)?;
        info!(
            "Memory store {} at {}",
            if created { "created" } else { "upgraded" },
            db_path.display()
        );
        Ok((db, created))
    }

    fn open_or_create(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                    | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(|conn| {
                // Per-connection pragmas; every pooled connection needs them.
                conn.execute_batch(
                    "PRAGMA foreign_keys = ON;
                     PRAGMA journal_mode = WAL;
                     PRAGMA synchronous = NORMAL;
                     PRAGMA busy_timeout = 5000;",
                )
            });
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| MemoryError::Pool(e.to_string()))?;

        {
            let mut conn = pool.get()?;
            MigrationManager::new(&mut conn).initialize()?;
        }

        restrict_permissions(db_path)?;

        let pool = Arc::new(pool);
        debug!("Memory store opened at {}", db_path.display());
        Ok(Self::from_pool(pool, Some(db_path.to_path_buf())))
    }

    /// In-memory store for tests. Single pooled connection, so every store
    /// struct sees the same database.
    pub fn open_in_memory() -> Result<Self> {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        let uri = format!(
            "file:alexandria_mem_{}?mode=memory&cache=shared",
            NEXT.fetch_add(1, Ordering::Relaxed)
        );
        let manager = SqliteConnectionManager::file(uri)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder()
            .max_size(2)
            .build(manager)
            .map_err(|e| MemoryError::Pool(e.to_string()))?;
        {
            let mut conn = pool.get()?;
            MigrationManager::new(&mut conn).initialize()?;
        }
        Ok(Self::from_pool(Arc::new(pool), None))
    }

    fn from_pool(pool: Arc<Pool<SqliteConnectionManager>>, path: Option<PathBuf>) -> Self {
        Self {
            sessions: SessionStore::new(Arc::clone(&pool)),
            records: RecordStore::new(Arc::clone(&pool)),
            loa: LoaStore::new(Arc::clone(&pool)),
            knowledge: KnowledgeStore::new(Arc::clone(&pool)),
            embeddings: EmbeddingStore::new(Arc::clone(&pool)),
            pool,
            path,
        }
    }

    /// Run `f` inside an exclusive write transaction. Any error rolls the
    /// whole transaction back.
    pub fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.pool.get()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(&conn) {
            Ok(value) => {
                conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| MemoryError::Pool(e.to_string()))
    }

    pub fn stats(&self) -> Result<DatabaseStats> {
        let conn = self.pool.get()?;
        migration::get_database_stats(&conn)
    }
}

impl Drop for MemoryDatabase {
    fn drop(&mut self) {
        if let Ok(conn) = self.pool.get() {
            let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        }
        if let Some(path) = &self.path {
            let _ = restrict_permissions(path);
        }
    }
}

/// Owner-only (0600) permissions on the data file and its WAL/SHM sidecars.
#[cfg(unix)]
fn restrict_permissions(db_path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut targets = vec![db_path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut os = db_path.as_os_str().to_owned();
        os.push(suffix);
        targets.push(PathBuf::from(os));
    }
    for target in targets {
        if target.exists() {
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o600))?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_db_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_requires_init() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory.db");

        let err = MemoryDatabase::open(&path).unwrap_err();
        assert!(matches!(err, MemoryError::NotInitialized { .. }));

        let (_db, created) = MemoryDatabase::init(&path).unwrap();
        assert!(created);

        // Second init is an upgrade check, not a re-create.
        drop(_db);
        let (_db, created) = MemoryDatabase::init(&path).unwrap();
        assert!(!created);

        MemoryDatabase::open(&path).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn data_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory.db");
        let (_db, _) = MemoryDatabase::init(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let db = MemoryDatabase::open_in_memory().unwrap();

        let result: Result<()> = db.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO decisions (created_at, decision) VALUES (datetime('now'), 'doomed')",
                [],
            )?;
            Err(MemoryError::InvalidInput("abort".into()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .get_conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM decisions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn fts_rows_track_base_rows() {
        use proptest::prelude::*;
        use proptest::test_runner::{Config as ProptestConfig, TestRunner};

        #[derive(Debug, Clone)]
        enum Op {
            Insert(String),
            Update(usize, String),
            Delete(usize),
        }

        let op = prop_oneof![
            "[a-z]{3,12}( [a-z]{3,12}){0,4}".prop_map(Op::Insert),
            (any::<usize>(), "[a-z]{3,12}").prop_map(|(i, t)| Op::Update(i, t)),
            any::<usize>().prop_map(Op::Delete),
        ];

        let mut runner = TestRunner::new(ProptestConfig::with_cases(32));
        runner
            .run(&proptest::collection::vec(op, 1..40), |ops| {
                let db = MemoryDatabase::open_in_memory().unwrap();
                let conn = db.get_conn().unwrap();
                let mut ids: Vec<i64> = Vec::new();

                for op in ops {
                    match op {
                        Op::Insert(text) => {
                            conn.execute(
                                "INSERT INTO decisions (created_at, decision) VALUES (datetime('now'), ?1)",
                                [&text],
                            )
                            .unwrap();
                            ids.push(conn.last_insert_rowid());
                        }
                        Op::Update(index, text) => {
                            if !ids.is_empty() {
                                let id = ids[index % ids.len()];
                                conn.execute(
                                    "UPDATE decisions SET decision = ?1 WHERE id = ?2",
                                    rusqlite::params![text, id],
                                )
                                .unwrap();
                            }
                        }
                        Op::Delete(index) => {
                            if !ids.is_empty() {
                                let id = ids.remove(index % ids.len());
                                conn.execute("DELETE FROM decisions WHERE id = ?1", [id]).unwrap();
                            }
                        }
                    }

                    let base: i64 = conn
                        .query_row("SELECT COUNT(*) FROM decisions", [], |r| r.get(0))
                        .unwrap();
                    let indexed: i64 = conn
                        .query_row("SELECT COUNT(*) FROM decisions_fts", [], |r| r.get(0))
                        .unwrap();
                    prop_assert_eq!(base, indexed);
                }

                // Every surviving row is still findable through its index.
                for id in &ids {
                    let text: String = conn
                        .query_row("SELECT decision FROM decisions WHERE id = ?1", [id], |r| r.get(0))
                        .unwrap();
                    if let Some(word) = text.split_whitespace().next() {
                        let found: i64 = conn
                            .query_row(
                                "SELECT COUNT(*) FROM decisions_fts WHERE decisions_fts MATCH ?1 AND rowid = ?2",
                                rusqlite::params![word, id],
                                |r| r.get(0),
                            )
                            .unwrap();
                        prop_assert_eq!(found, 1);
                    }
                }
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn empty_store_stats() {
        let db = MemoryDatabase::open_in_memory().unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.sessions, 0);
        assert_eq!(stats.messages, 0);
        assert_eq!(stats.loa_entries, 0);
        assert_eq!(stats.decisions, 0);
        assert_eq!(stats.learnings, 0);
        assert_eq!(stats.breadcrumbs, 0);
        assert!(stats.db_size_bytes > 0);
    }
}
