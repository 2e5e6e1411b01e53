//! Structured record storage: decisions, learnings, breadcrumbs.

use crate::error::{MemoryError, Result};
use crate::memory_db::schema::*;
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct NewDecision {
    pub decision: String,
    pub reasoning: Option<String>,
    pub alternatives: Option<String>,
    pub category: Option<String>,
    pub project: Option<String>,
    pub session_ref: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewLearning {
    pub problem: String,
    pub solution: Option<String>,
    pub prevention: Option<String>,
    pub tags: Option<String>,
    pub category: Option<String>,
    pub project: Option<String>,
    pub session_ref: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewBreadcrumb {
    pub content: String,
    pub category: Option<String>,
    pub project: Option<String>,
    pub session_ref: Option<String>,
    /// 1..=10, defaulting to 5 when absent.
    pub importance: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct RecordStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl RecordStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| MemoryError::Pool(e.to_string()))
    }

    pub fn add_decision(&self, record: &NewDecision) -> Result<i64> {
        if record.decision.trim().is_empty() {
            return Err(MemoryError::InvalidInput("decision text is empty".into()));
        }
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO decisions
             (created_at, session_ref, category, project, decision, reasoning, alternatives, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                to_sql_time(&Utc::now()),
                record.session_ref,
                record.category,
                record.project,
                record.decision,
                record.reasoning,
                record.alternatives,
                DecisionStatus::Active.as_str(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!("Recorded decision {}", id);
        Ok(id)
    }

    pub fn add_learning(&self, record: &NewLearning) -> Result<i64> {
        if record.problem.trim().is_empty() {
            return Err(MemoryError::InvalidInput("learning problem is empty".into()));
        }
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO learnings
             (created_at, session_ref, category, project, problem, solution, prevention, tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                to_sql_time(&Utc::now()),
                record.session_ref,
                record.category,
                record.project,
                record.problem,
                record.solution,
                record.prevention,
                record.tags,
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!("Recorded learning {}", id);
        Ok(id)
    }

    pub fn add_breadcrumb(&self, record: &NewBreadcrumb) -> Result<i64> {
        if record.content.trim().is_empty() {
            return Err(MemoryError::InvalidInput("breadcrumb content is empty".into()));
        }
        let importance = record.importance.unwrap_or(5);
        if !(1..=10).contains(&importance) {
            return Err(MemoryError::InvalidInput(format!(
                "breadcrumb importance {importance} out of range 1..10"
            )));
        }
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO breadcrumbs
             (created_at, session_ref, content, category, project, importance, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                to_sql_time(&Utc::now()),
                record.session_ref,
                record.content,
                record.category,
                record.project,
                importance,
                record.expires_at.as_ref().map(to_sql_time),
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!("Recorded breadcrumb {}", id);
        Ok(id)
    }

    pub fn get_decision(&self, id: i64) -> Result<Option<Decision>> {
        let conn = self.get_conn()?;
        conn.query_row(
            "SELECT id, created_at, session_ref, category, project, decision, reasoning, alternatives, status
             FROM decisions WHERE id = ?1",
            [id],
            |row| Ok(row_to_decision(row)),
        )
        .optional()?
        .transpose()
    }

    pub fn get_learning(&self, id: i64) -> Result<Option<Learning>> {
        let conn = self.get_conn()?;
        conn.query_row(
            "SELECT id, created_at, session_ref, category, project, problem, solution, prevention, tags
             FROM learnings WHERE id = ?1",
            [id],
            |row| Ok(row_to_learning(row)),
        )
        .optional()?
        .transpose()
    }

    pub fn get_breadcrumb(&self, id: i64) -> Result<Option<Breadcrumb>> {
        let conn = self.get_conn()?;
        conn.query_row(
            "SELECT id, created_at, session_ref, content, category, project, importance, expires_at
             FROM breadcrumbs WHERE id = ?1",
            [id],
            |row| Ok(row_to_breadcrumb(row)),
        )
        .optional()?
        .transpose()
    }

    pub fn recent_decisions(&self, project: Option<&str>, limit: usize) -> Result<Vec<Decision>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, created_at, session_ref, category, project, decision, reasoning, alternatives, status
             FROM decisions
             WHERE (?1 IS NULL OR project = ?1)
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let mut rows = stmt.query(params![project, limit as i64])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(row_to_decision(row)?);
        }
        Ok(records)
    }

    pub fn recent_learnings(&self, project: Option<&str>, limit: usize) -> Result<Vec<Learning>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, created_at, session_ref, category, project, problem, solution, prevention, tags
             FROM learnings
             WHERE (?1 IS NULL OR project = ?1)
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let mut rows = stmt.query(params![project, limit as i64])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(row_to_learning(row)?);
        }
        Ok(records)
    }

    /// Recent breadcrumbs, excluding those whose `expires_at` has passed.
    pub fn recent_breadcrumbs(&self, project: Option<&str>, limit: usize) -> Result<Vec<Breadcrumb>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, created_at, session_ref, content, category, project, importance, expires_at
             FROM breadcrumbs
             WHERE (?1 IS NULL OR project = ?1)
               AND (expires_at IS NULL OR expires_at > ?2)
             ORDER BY created_at DESC, id DESC LIMIT ?3",
        )?;
        let mut rows = stmt.query(params![project, to_sql_time(&Utc::now()), limit as i64])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(row_to_breadcrumb(row)?);
        }
        Ok(records)
    }
}

fn row_to_decision(row: &Row) -> Result<Decision> {
    let created_at: String = row.get(1)?;
    let status: String = row.get(8)?;
    Ok(Decision {
        id: row.get(0)?,
        created_at: from_sql_time(&created_at)?,
        session_ref: row.get(2)?,
        category: row.get(3)?,
        project: row.get(4)?,
        decision: row.get(5)?,
        reasoning: row.get(6)?,
        alternatives: row.get(7)?,
        status: DecisionStatus::from_str(&status)?,
    })
}

fn row_to_learning(row: &Row) -> Result<Learning> {
    let created_at: String = row.get(1)?;
    Ok(Learning {
        id: row.get(0)?,
        created_at: from_sql_time(&created_at)?,
        session_ref: row.get(2)?,
        category: row.get(3)?,
        project: row.get(4)?,
        problem: row.get(5)?,
        solution: row.get(6)?,
        prevention: row.get(7)?,
        tags: row.get(8)?,
    })
}

fn row_to_breadcrumb(row: &Row) -> Result<Breadcrumb> {
    let created_at: String = row.get(1)?;
    let expires_at: Option<String> = row.get(7)?;
    Ok(Breadcrumb {
        id: row.get(0)?,
        created_at: from_sql_time(&created_at)?,
        session_ref: row.get(2)?,
        content: row.get(3)?,
        category: row.get(4)?,
        project: row.get(5)?,
        importance: row.get(6)?,
        expires_at: expires_at.as_deref().map(from_sql_time).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::MemoryDatabase;
    use chrono::Duration;

    #[test]
    fn empty_content_is_rejected() {
        let db = MemoryDatabase::open_in_memory().unwrap();
        assert!(matches!(
            db.records.add_decision(&NewDecision::default()),
            Err(MemoryError::InvalidInput(_))
        ));
        assert!(matches!(
            db.records.add_learning(&NewLearning::default()),
            Err(MemoryError::InvalidInput(_))
        ));
        assert!(matches!(
            db.records.add_breadcrumb(&NewBreadcrumb {
                content: "   ".into(),
                ..Default::default()
            }),
            Err(MemoryError::InvalidInput(_))
        ));
    }

    #[test]
    fn breadcrumb_importance_defaults_to_five() {
        let db = MemoryDatabase::open_in_memory().unwrap();
        let id = db
            .records
            .add_breadcrumb(&NewBreadcrumb {
                content: "remember the build flag".into(),
                ..Default::default()
            })
            .unwrap();
        let crumb = db.records.get_breadcrumb(id).unwrap().unwrap();
        assert_eq!(crumb.importance, 5);

        let err = db
            .records
            .add_breadcrumb(&NewBreadcrumb {
                content: "too loud".into(),
                importance: Some(11),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidInput(_)));
    }

    #[test]
    fn expired_breadcrumbs_are_hidden_from_recent() {
        let db = MemoryDatabase::open_in_memory().unwrap();
        db.records
            .add_breadcrumb(&NewBreadcrumb {
                content: "already stale".into(),
                expires_at: Some(Utc::now() - Duration::hours(1)),
                ..Default::default()
            })
            .unwrap();
        db.records
            .add_breadcrumb(&NewBreadcrumb {
                content: "still warm".into(),
                expires_at: Some(Utc::now() + Duration::hours(1)),
                ..Default::default()
            })
            .unwrap();

        let recent = db.records.recent_breadcrumbs(None, 10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content, "still warm");
    }

    #[test]
    fn decisions_start_active() {
        let db = MemoryDatabase::open_in_memory().unwrap();
        let id = db
            .records
            .add_decision(&NewDecision {
                decision: "Use embedded store".into(),
                reasoning: Some("Simpler deploy".into()),
                project: Some("demo".into()),
                ..Default::default()
            })
            .unwrap();
        let decision = db.records.get_decision(id).unwrap().unwrap();
        assert_eq!(decision.status, DecisionStatus::Active);
        assert_eq!(decision.project.as_deref(), Some("demo"));
    }
}
