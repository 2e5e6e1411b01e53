//! Markdown/JSON side files written after a successful extraction.
//!
//! Everything lives under `$BASE/MEMORY/`: the rolling DISTILLED.md archive,
//! the HOT_RECALL.md rotation, SESSION_INDEX.json, the decisions/rejections
//! logs, and ERROR_PATTERNS.json. Each writer is independent; the pipeline
//! logs a failed step and keeps going.

use crate::error::Result;
use crate::utils::{head_chars, normalize_for_dedup};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Headings whose leading bullets become session topics.
const TOPIC_SECTIONS: [&str; 3] = ["DECISIONS MADE", "MAIN IDEAS", "INSIGHTS"];

const HOT_RECALL_SEPARATOR: &str = "\n---\n";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIndexEntry {
    pub session_id: String,
    pub project: String,
    pub date: String,
    pub timestamp: String,
    pub topics: Vec<String>,
    pub summary: String,
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub error: String,
    pub cause: String,
    pub fix: String,
    pub file: String,
    pub date: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorPatternFile {
    patterns: Vec<ErrorPattern>,
    meta: ErrorPatternMeta,
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorPatternMeta {
    purpose: String,
    updated: String,
}

pub struct MemoryOutputs {
    dir: PathBuf,
    hot_recall_cap: usize,
    session_index_cap: usize,
}

impl MemoryOutputs {
    pub fn new(memory_dir: PathBuf, hot_recall_cap: usize, session_index_cap: usize) -> Self {
        Self {
            dir: memory_dir,
            hot_recall_cap,
            session_index_cap,
        }
    }

    pub fn distilled_path(&self) -> PathBuf {
        self.dir.join("DISTILLED.md")
    }

    pub fn hot_recall_path(&self) -> PathBuf {
        self.dir.join("HOT_RECALL.md")
    }

    pub fn session_index_path(&self) -> PathBuf {
        self.dir.join("SESSION_INDEX.json")
    }

    pub fn decisions_log_path(&self) -> PathBuf {
        self.dir.join("DECISIONS_LOG.txt")
    }

    pub fn rejections_log_path(&self) -> PathBuf {
        self.dir.join("REJECTIONS_LOG.txt")
    }

    pub fn error_patterns_path(&self) -> PathBuf {
        self.dir.join("ERROR_PATTERNS.json")
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Append the extract to the rolling archive under a dated heading.
    pub fn append_distilled(&self, label: &str, extract: &str, now: DateTime<Utc>) -> Result<()> {
        self.ensure_dir()?;
        let mut archive = fs::read_to_string(self.distilled_path()).unwrap_or_default();
        if !archive.is_empty() && !archive.ends_with('\n') {
            archive.push('\n');
        }
        archive.push_str(&format!(
            "\n## {} — {}\n\n{}\n",
            now.format("%Y-%m-%d"),
            label,
            extract.trim()
        ));
        fs::write(self.distilled_path(), archive)?;
        debug!("Archived extract for {}", label);
        Ok(())
    }

    /// Prepend the extract to the hot-recall rotation, keeping the newest N
    /// sessions.
    pub fn update_hot_recall(&self, label: &str, extract: &str, now: DateTime<Utc>) -> Result<()> {
        self.ensure_dir()?;
        let existing = fs::read_to_string(self.hot_recall_path()).unwrap_or_default();
        let mut entries: Vec<String> = existing
            .split(HOT_RECALL_SEPARATOR)
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .collect();

        entries.insert(
            0,
            format!(
                "## {} — {}\n\n{}",
                now.format("%Y-%m-%d %H:%M"),
                label,
                extract.trim()
            ),
        );
        entries.truncate(self.hot_recall_cap);

        let mut body = entries.join(HOT_RECALL_SEPARATOR);
        body.push('\n');
        fs::write(self.hot_recall_path(), body)?;
        Ok(())
    }

    /// Upsert one session's index entry, newest first, capped.
    pub fn upsert_session_index(&self, entry: SessionIndexEntry) -> Result<()> {
        self.ensure_dir()?;
        let mut entries: Vec<SessionIndexEntry> = fs::read_to_string(self.session_index_path())
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();

        entries.retain(|e| e.session_id != entry.session_id);
        entries.push(entry);
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(self.session_index_cap);

        fs::write(
            self.session_index_path(),
            serde_json::to_string_pretty(&entries)?,
        )?;
        Ok(())
    }

    /// Append pipe-delimited lines, skipping entries whose normalized text
    /// already appears in the log.
    pub fn append_log_deduped(
        &self,
        log_path: &Path,
        label: &str,
        lines: &[String],
        now: DateTime<Utc>,
    ) -> Result<usize> {
        if lines.is_empty() {
            return Ok(0);
        }
        self.ensure_dir()?;
        let existing = fs::read_to_string(log_path).unwrap_or_default();
        let mut seen: HashSet<String> = existing
            .lines()
            .filter_map(|line| line.splitn(3, '|').nth(2))
            .map(normalize_for_dedup)
            .collect();

        let date = now.format("%Y-%m-%d");
        let mut appended = 0usize;
        let mut body = existing;
        for line in lines {
            let key = normalize_for_dedup(line);
            if key.is_empty() || seen.contains(&key) {
                continue;
            }
            seen.insert(key);
            body.push_str(&format!("{date}|{label}|{line}\n"));
            appended += 1;
        }
        fs::write(log_path, body)?;
        Ok(appended)
    }

    /// Upsert error patterns keyed by normalized error text.
    pub fn update_error_patterns(
        &self,
        patterns: Vec<ErrorPattern>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        if patterns.is_empty() {
            return Ok(0);
        }
        self.ensure_dir()?;
        let mut file: ErrorPatternFile = fs::read_to_string(self.error_patterns_path())
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or(ErrorPatternFile {
                patterns: Vec::new(),
                meta: ErrorPatternMeta {
                    purpose: "Recurring errors and their fixes, for fast diagnosis in future sessions".into(),
                    updated: String::new(),
                },
            });

        let mut added = 0usize;
        for pattern in patterns {
            let key = normalize_for_dedup(&pattern.error);
            if key.is_empty() {
                continue;
            }
            match file
                .patterns
                .iter_mut()
                .find(|p| normalize_for_dedup(&p.error) == key)
            {
                Some(existing) => *existing = pattern,
                None => {
                    file.patterns.push(pattern);
                    added += 1;
                }
            }
        }
        file.meta.updated = now.format("%Y-%m-%d").to_string();

        fs::write(
            self.error_patterns_path(),
            serde_json::to_string_pretty(&file)?,
        )?;
        Ok(added)
    }

    /// Run the full post-extraction persistence sequence. Individual step
    /// failures are logged, not propagated: a half-written side file must
    /// never fail the session.
    pub fn persist_extract(
        &self,
        session_id: &str,
        project: &str,
        extract: &str,
        source_file: &Path,
        now: DateTime<Utc>,
    ) {
        if let Err(e) = self.append_distilled(session_id, extract, now) {
            warn!("Archive append failed: {}", e);
        }
        if let Err(e) = self.update_hot_recall(session_id, extract, now) {
            warn!("Hot-recall update failed: {}", e);
        }

        let entry = SessionIndexEntry {
            session_id: session_id.to_string(),
            project: project.to_string(),
            date: now.format("%Y-%m-%d").to_string(),
            timestamp: now.to_rfc3339(),
            topics: derive_topics(extract),
            summary: section_first_line(extract, "ONE SENTENCE SUMMARY").unwrap_or_default(),
            file: source_file.to_string_lossy().into_owned(),
        };
        if let Err(e) = self.upsert_session_index(entry) {
            warn!("Session-index update failed: {}", e);
        }

        let decisions = section_bullets(extract, "DECISIONS MADE");
        if let Err(e) = self.append_log_deduped(&self.decisions_log_path(), session_id, &decisions, now) {
            warn!("Decisions log append failed: {}", e);
        }
        let rejections = section_bullets(extract, "THINGS TO REJECT / AVOID");
        if let Err(e) = self.append_log_deduped(&self.rejections_log_path(), session_id, &rejections, now) {
            warn!("Rejections log append failed: {}", e);
        }

        let errors: Vec<ErrorPattern> = section_bullets(extract, "ERRORS FIXED")
            .into_iter()
            .map(|bullet| split_error_bullet(&bullet, session_id, now))
            .collect();
        if let Err(e) = self.update_error_patterns(errors, now) {
            warn!("Error-pattern update failed: {}", e);
        }
    }
}

/// Does this line open a section? Matches markdown headings and bare
/// ALL-CAPS heading lines.
fn is_heading(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.starts_with('#') {
        return true;
    }
    let letters: Vec<char> = trimmed.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() >= 4 && letters.iter().all(|c| c.is_uppercase())
}

fn heading_matches(line: &str, heading: &str) -> bool {
    let cleaned = line.trim().trim_start_matches('#').trim().trim_end_matches(':');
    cleaned.eq_ignore_ascii_case(heading)
}

/// Bullet lines under `heading`, up to the next heading.
pub fn section_bullets(text: &str, heading: &str) -> Vec<String> {
    let mut bullets = Vec::new();
    let mut in_section = false;
    for line in text.lines() {
        if heading_matches(line, heading) {
            in_section = true;
            continue;
        }
        if in_section {
            if is_heading(line) {
                break;
            }
            let trimmed = line.trim();
            for marker in ["- ", "* ", "• "] {
                if let Some(body) = trimmed.strip_prefix(marker) {
                    if !body.trim().is_empty() {
                        bullets.push(body.trim().to_string());
                    }
                    break;
                }
            }
        }
    }
    bullets
}

/// First non-empty line under `heading`, bullet markers stripped.
pub fn section_first_line(text: &str, heading: &str) -> Option<String> {
    let mut in_section = false;
    for line in text.lines() {
        if heading_matches(line, heading) {
            in_section = true;
            continue;
        }
        if in_section {
            if is_heading(line) {
                return None;
            }
            let trimmed = line
                .trim()
                .trim_start_matches("- ")
                .trim_start_matches("* ")
                .trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// Up to five topics: the first three bullets under each topic section.
pub fn derive_topics(extract: &str) -> Vec<String> {
    let mut topics = Vec::new();
    for section in TOPIC_SECTIONS {
        for bullet in section_bullets(extract, section).into_iter().take(3) {
            let topic = head_chars(&bullet, 80).trim().to_string();
            if !topic.is_empty() && !topics.contains(&topic) {
                topics.push(topic);
            }
            if topics.len() >= 5 {
                return topics;
            }
        }
    }
    topics
}

/// Split an "error — fix" bullet into a pattern entry.
fn split_error_bullet(bullet: &str, session_label: &str, now: DateTime<Utc>) -> ErrorPattern {
    let (error, fix) = bullet
        .split_once(" — ")
        .or_else(|| bullet.split_once(" -> "))
        .or_else(|| bullet.split_once(": "))
        .unwrap_or((bullet, ""));
    ErrorPattern {
        error: error.trim().to_string(),
        cause: String::new(),
        fix: fix.trim().to_string(),
        file: session_label.to_string(),
        date: now.format("%Y-%m-%d").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const EXTRACT: &str = "\
ONE SENTENCE SUMMARY

Moved search over to rank fusion after the scoring rewrite stalled.

MAIN IDEAS

- Rank fusion beats score normalization across engines
- Keep the vector scan linear until row counts hurt

DECISIONS MADE

- Use reciprocal rank fusion for hybrid search
- Keep k fixed at 60

INSIGHTS

- FTS rank signs are easy to get backwards

THINGS TO REJECT / AVOID

- Weighted score blending across engines

ERRORS FIXED

- rank ordered ascending by mistake — sort on the raw rank column

SESSION CONTEXT

Search engine rework.
";

    fn outputs(dir: &TempDir) -> MemoryOutputs {
        MemoryOutputs::new(dir.path().join("MEMORY"), 2, 3)
    }

    fn now() -> DateTime<Utc> {
        "2026-03-10T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn section_parsing_finds_bullets_and_summary() {
        assert_eq!(
            section_bullets(EXTRACT, "DECISIONS MADE"),
            vec![
                "Use reciprocal rank fusion for hybrid search",
                "Keep k fixed at 60"
            ]
        );
        assert_eq!(
            section_first_line(EXTRACT, "ONE SENTENCE SUMMARY").unwrap(),
            "Moved search over to rank fusion after the scoring rewrite stalled."
        );
        assert!(section_bullets(EXTRACT, "NONEXISTENT").is_empty());
    }

    #[test]
    fn topics_come_from_the_three_sections_capped_at_five() {
        let topics = derive_topics(EXTRACT);
        assert_eq!(topics.len(), 5);
        assert_eq!(topics[0], "Use reciprocal rank fusion for hybrid search");
        assert!(topics.contains(&"FTS rank signs are easy to get backwards".to_string()));
    }

    #[test]
    fn hot_recall_rotates_newest_first() {
        let dir = TempDir::new().unwrap();
        let out = outputs(&dir);
        out.update_hot_recall("s1", "first extract", now()).unwrap();
        out.update_hot_recall("s2", "second extract", now()).unwrap();
        out.update_hot_recall("s3", "third extract", now()).unwrap();

        let body = fs::read_to_string(out.hot_recall_path()).unwrap();
        let entries: Vec<&str> = body.split("---").collect();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].contains("s3"));
        assert!(entries[1].contains("s2"));
        assert!(!body.contains("s1"));
    }

    #[test]
    fn session_index_upserts_and_caps() {
        let dir = TempDir::new().unwrap();
        let out = outputs(&dir);
        for i in 0..5 {
            out.upsert_session_index(SessionIndexEntry {
                session_id: format!("s{i}"),
                project: "demo".into(),
                date: "2026-03-10".into(),
                timestamp: format!("2026-03-10T12:00:0{i}Z"),
                topics: vec![],
                summary: String::new(),
                file: format!("/t/s{i}.jsonl"),
            })
            .unwrap();
        }

        let entries: Vec<SessionIndexEntry> =
            serde_json::from_str(&fs::read_to_string(out.session_index_path()).unwrap()).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].session_id, "s4");

        // Re-indexing an existing session replaces it instead of duplicating.
        out.upsert_session_index(SessionIndexEntry {
            session_id: "s4".into(),
            project: "demo".into(),
            date: "2026-03-11".into(),
            timestamp: "2026-03-11T09:00:00Z".into(),
            topics: vec!["reworked".into()],
            summary: String::new(),
            file: "/t/s4.jsonl".into(),
        })
        .unwrap();
        let entries: Vec<SessionIndexEntry> =
            serde_json::from_str(&fs::read_to_string(out.session_index_path()).unwrap()).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].topics, vec!["reworked"]);
    }

    #[test]
    fn log_dedup_uses_normalized_text() {
        let dir = TempDir::new().unwrap();
        let out = outputs(&dir);
        let log = out.decisions_log_path();

        let added = out
            .append_log_deduped(&log, "s1", &["Use \"WAL\" mode".into()], now())
            .unwrap();
        assert_eq!(added, 1);
        let added = out
            .append_log_deduped(&log, "s2", &["use 'wal'   MODE".into(), "brand new".into()], now())
            .unwrap();
        assert_eq!(added, 1);

        let body = fs::read_to_string(&log).unwrap();
        assert_eq!(body.lines().count(), 2);
        assert!(body.lines().all(|l| l.splitn(3, '|').count() == 3));
    }

    #[test]
    fn error_patterns_upsert_by_error_text() {
        let dir = TempDir::new().unwrap();
        let out = outputs(&dir);

        out.update_error_patterns(
            vec![split_error_bullet(
                "rank ordered ascending by mistake — sort on the raw rank column",
                "s1",
                now(),
            )],
            now(),
        )
        .unwrap();
        out.update_error_patterns(
            vec![split_error_bullet(
                "Rank ordered ascending by mistake — sort descending instead",
                "s2",
                now(),
            )],
            now(),
        )
        .unwrap();

        let file: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.error_patterns_path()).unwrap()).unwrap();
        let patterns = file["patterns"].as_array().unwrap();
        assert_eq!(patterns.len(), 1);
        assert!(patterns[0]["fix"].as_str().unwrap().contains("descending"));
        assert_eq!(file["meta"]["updated"], "2026-03-10");
    }

    #[test]
    fn persist_extract_writes_every_side_file() {
        let dir = TempDir::new().unwrap();
        let out = outputs(&dir);
        out.persist_extract("s-full", "demo", EXTRACT, Path::new("/t/s.jsonl"), now());

        assert!(out.distilled_path().exists());
        assert!(out.hot_recall_path().exists());
        assert!(out.session_index_path().exists());
        assert!(out.decisions_log_path().exists());
        assert!(out.rejections_log_path().exists());
        assert!(out.error_patterns_path().exists());

        let archive = fs::read_to_string(out.distilled_path()).unwrap();
        assert!(archive.contains("## 2026-03-10 — s-full"));
    }
}
