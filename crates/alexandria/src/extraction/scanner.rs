//! Batch scanner: walks the transcript tree and feeds candidates to the
//! extraction pipeline.
//!
//! Ordering is deliberate: medium-sized transcripts (2 KB..500 KB) first,
//! then the oversize tier, largest first within each - the middle of the
//! distribution yields the best extracts, and oversize outliers tend to
//! fail the quality gate.

use crate::error::Result;
use crate::extraction::pipeline::{ExtractionOutcome, ExtractionPipeline};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

/// Transcripts smaller than this are trivial and skipped.
pub const MIN_TRANSCRIPT_BYTES: u64 = 2_000;

/// Upper bound of the preferred size tier.
pub const MEDIUM_TIER_BYTES: u64 = 500_000;

const TRANSCRIPT_EXTENSION: &str = "jsonl";

#[derive(Debug, Clone)]
pub struct ScanCandidate {
    pub path: PathBuf,
    pub size: u64,
    pub project_dir: PathBuf,
    pub mtime: SystemTime,
}

#[derive(Debug, Default)]
pub struct ScanReport {
    pub scanned: usize,
    pub candidates: usize,
    pub extracted: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct BatchScanner {
    root: PathBuf,
    /// `None` means unlimited.
    limit: Option<usize>,
    dry_run: bool,
    step_timeout: Duration,
    sleep_between: Duration,
}

impl BatchScanner {
    pub fn new(
        root: PathBuf,
        limit: Option<usize>,
        dry_run: bool,
        step_timeout: Duration,
        sleep_between: Duration,
    ) -> Self {
        Self {
            root,
            limit,
            dry_run,
            step_timeout,
            sleep_between,
        }
    }

    /// Sidechain transcripts written by sub-agents share the tree but are
    /// not sessions of their own.
    fn is_side_agent_file(path: &Path) -> bool {
        path.file_stem()
            .and_then(|stem| stem.to_str())
            .map(|stem| stem.starts_with("agent-") || stem.contains("subagent"))
            .unwrap_or(false)
    }

    /// Collect candidate transcripts in extraction order.
    pub fn collect_candidates(&self) -> Result<Vec<ScanCandidate>> {
        let mut found = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Cannot read {}: {}", dir.display(), e);
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let Ok(metadata) = entry.metadata() else {
                    continue;
                };
                if metadata.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !metadata.is_file()
                    || path.extension().and_then(|e| e.to_str()) != Some(TRANSCRIPT_EXTENSION)
                    || Self::is_side_agent_file(&path)
                {
                    continue;
                }
                if metadata.len() < MIN_TRANSCRIPT_BYTES {
                    continue;
                }
                found.push(ScanCandidate {
                    project_dir: path.parent().unwrap_or(&self.root).to_path_buf(),
                    size: metadata.len(),
                    mtime: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    path,
                });
            }
        }

        let (mut medium, mut oversize): (Vec<_>, Vec<_>) = found
            .into_iter()
            .partition(|c| c.size <= MEDIUM_TIER_BYTES);
        medium.sort_by(|a, b| b.size.cmp(&a.size));
        oversize.sort_by(|a, b| b.size.cmp(&a.size));
        medium.extend(oversize);
        Ok(medium)
    }

    /// Walk the tree and extract candidates serially, honouring the
    /// per-invocation limit and the inter-extraction pause.
    pub async fn run(&self, pipeline: &ExtractionPipeline) -> Result<ScanReport> {
        let candidates = self.collect_candidates()?;
        let mut report = ScanReport {
            scanned: candidates.len(),
            ..Default::default()
        };

        if self.dry_run {
            for candidate in &candidates {
                info!(
                    "Would extract {} ({} bytes)",
                    candidate.path.display(),
                    candidate.size
                );
            }
            report.candidates = candidates.len();
            return Ok(report);
        }

        let budget = self.limit.unwrap_or(usize::MAX);
        for candidate in candidates {
            if report.extracted + report.failed >= budget {
                break;
            }
            report.candidates += 1;

            let outcome = tokio::time::timeout(
                self.step_timeout,
                pipeline.run_file(&candidate.path, Some(&candidate.project_dir), false),
            )
            .await;

            match outcome {
                Ok(Ok(ExtractionOutcome::Extracted { .. })) => {
                    report.extracted += 1;
                    tokio::time::sleep(self.sleep_between).await;
                }
                Ok(Ok(ExtractionOutcome::Skipped(_))) => {
                    report.skipped += 1;
                }
                Ok(Ok(ExtractionOutcome::Failed(reason))) => {
                    warn!("Extraction failed for {}: {}", candidate.path.display(), reason);
                    report.failed += 1;
                    tokio::time::sleep(self.sleep_between).await;
                }
                Ok(Err(e)) => {
                    warn!("Pipeline error for {}: {}", candidate.path.display(), e);
                    report.failed += 1;
                }
                Err(_) => {
                    warn!(
                        "Extraction of {} exceeded the {:?} step budget",
                        candidate.path.display(),
                        self.step_timeout
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            "Batch done: {} extracted, {} skipped, {} failed of {} scanned",
            report.extracted, report.skipped, report.failed, report.scanned
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, bytes: usize) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "x".repeat(bytes)).unwrap();
        path
    }

    fn scanner(root: &Path) -> BatchScanner {
        BatchScanner::new(
            root.to_path_buf(),
            Some(10),
            true,
            Duration::from_secs(120),
            Duration::from_millis(1),
        )
    }

    #[test]
    fn tiny_and_side_agent_files_are_dropped() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("proj-a");
        std::fs::create_dir_all(&project).unwrap();

        write_file(&project, "keep.jsonl", 3_000);
        write_file(&project, "tiny.jsonl", 1_999);
        write_file(&project, "agent-sidechain.jsonl", 9_000);
        write_file(&project, "notes.txt", 9_000);

        let candidates = scanner(dir.path()).collect_candidates().unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].path.ends_with("keep.jsonl"));
        assert_eq!(candidates[0].project_dir, project);
    }

    #[test]
    fn exactly_min_size_is_kept() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "edge.jsonl", MIN_TRANSCRIPT_BYTES as usize);
        let candidates = scanner(dir.path()).collect_candidates().unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn medium_tier_precedes_oversize_largest_first() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "huge.jsonl", 700_000);
        write_file(dir.path(), "small.jsonl", 5_000);
        write_file(dir.path(), "large.jsonl", 400_000);
        write_file(dir.path(), "mid.jsonl", 50_000);

        let candidates = scanner(dir.path()).collect_candidates().unwrap();
        let names: Vec<&str> = candidates
            .iter()
            .map(|c| c.path.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, ["large.jsonl", "mid.jsonl", "small.jsonl", "huge.jsonl"]);
    }

    #[test]
    fn walk_recurses_into_project_dirs() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        write_file(&nested, "deep.jsonl", 4_000);

        let candidates = scanner(dir.path()).collect_candidates().unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].project_dir, nested);
    }
}
