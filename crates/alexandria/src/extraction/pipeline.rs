//! The extraction pipeline: transcript file in, structured memory artifacts
//! out.
//!
//! Flow: tracker dedup check → parse + normalize → (chunk if oversize) →
//! LLM extraction with fallback → quality gate → side-file persistence →
//! tracker update. Failures schedule a 24-hour retry and never propagate
//! out of the enclosing session.

use crate::config::{Config, CHUNK_SIZE_CHARS, CHUNK_THRESHOLD_CHARS};
use crate::error::{MemoryError, Result};
use crate::extraction::extractor::{CommandExtractor, Extractor, OllamaExtractor};
use crate::extraction::outputs::MemoryOutputs;
use crate::extraction::tracker::{ExtractionDecision, ExtractionTracker};
use crate::extraction::transcript::{normalize_turns, parse_transcript_file};
use crate::project::detect_project;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// System prompt pinned to the output format the quality gate and the
/// side-file writers expect.
pub const EXTRACTION_SYSTEM_PROMPT: &str = "\
You are distilling a coding-session transcript into durable memory. \
Respond in plain markdown with exactly these ALL-CAPS section headings, \
each followed by short bullet points (except the summary and context, \
which are single sentences):

ONE SENTENCE SUMMARY
MAIN IDEAS
INSIGHTS
DECISIONS MADE
THINGS TO REJECT / AVOID
ERRORS FIXED
ACTIONABLE ITEMS
SESSION CONTEXT

Write 'ERRORS FIXED' bullets as 'error — fix'. Leave a section's body empty \
rather than inventing content. Do not add any other headings.";

/// Prompt for merging partial extracts of a chunked transcript.
pub const MERGE_SYSTEM_PROMPT: &str = "\
You are merging several partial extracts of one long coding session. \
Combine them into a single extract with the same ALL-CAPS section headings \
(ONE SENTENCE SUMMARY, MAIN IDEAS, INSIGHTS, DECISIONS MADE, \
THINGS TO REJECT / AVOID, ERRORS FIXED, ACTIONABLE ITEMS, SESSION CONTEXT), \
deduplicating overlapping bullets and keeping the most specific wording.";

/// What one pipeline run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Skipped(SkipReason),
    /// Extraction failed; the tracker now carries a retry window.
    Failed(String),
    Extracted {
        chunks: usize,
        merged: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyExtracted,
    CoolingDown,
    EmptyTranscript,
}

pub struct ExtractionPipeline {
    extractors: Vec<Box<dyn Extractor>>,
    outputs: MemoryOutputs,
    tracker_path: PathBuf,
    per_call_timeout: Duration,
    total_timeout: Duration,
    chunk_threshold: usize,
    chunk_size: usize,
}

impl ExtractionPipeline {
    /// Build from config: the configured command extractor first (when set),
    /// the HTTP generate endpoint as fallback.
    pub fn from_config(config: &Config) -> Self {
        let mut extractors: Vec<Box<dyn Extractor>> = Vec::new();
        if let Some(command_line) = &config.extractor_cmd {
            match CommandExtractor::from_command_line(command_line, config.llm_timeout) {
                Ok(extractor) => extractors.push(Box::new(extractor)),
                Err(e) => warn!("Primary extractor unusable: {}", e),
            }
        }
        extractors.push(Box::new(OllamaExtractor::new(
            config.ollama_url.clone(),
            config.extract_model.clone(),
            config.llm_timeout,
        )));

        Self {
            extractors,
            outputs: MemoryOutputs::new(
                config.memory_dir(),
                config.hot_recall_cap,
                config.session_index_cap,
            ),
            tracker_path: config.tracker_path(),
            per_call_timeout: config.llm_timeout,
            total_timeout: config.llm_total_timeout,
            chunk_threshold: CHUNK_THRESHOLD_CHARS,
            chunk_size: CHUNK_SIZE_CHARS,
        }
    }

    /// Test/bench constructor with explicit collaborators and limits.
    pub fn with_extractors(
        extractors: Vec<Box<dyn Extractor>>,
        outputs: MemoryOutputs,
        tracker_path: PathBuf,
        per_call_timeout: Duration,
        total_timeout: Duration,
        chunk_threshold: usize,
        chunk_size: usize,
    ) -> Self {
        Self {
            extractors,
            outputs,
            tracker_path,
            per_call_timeout,
            total_timeout,
            chunk_threshold,
            chunk_size,
        }
    }

    pub fn outputs(&self) -> &MemoryOutputs {
        &self.outputs
    }

    /// Run extraction for one transcript file.
    pub async fn run_file(
        &self,
        transcript: &Path,
        cwd: Option<&Path>,
        force: bool,
    ) -> Result<ExtractionOutcome> {
        let size = std::fs::metadata(transcript)?.len();
        let now = Utc::now();
        let mut tracker = ExtractionTracker::load(&self.tracker_path);

        match tracker.decision(transcript, size, force, now) {
            ExtractionDecision::SkipFresh => {
                info!("Skipping {} (already extracted)", transcript.display());
                return Ok(ExtractionOutcome::Skipped(SkipReason::AlreadyExtracted));
            }
            ExtractionDecision::SkipCooldown => {
                info!("Skipping {} (retry window not reached)", transcript.display());
                return Ok(ExtractionOutcome::Skipped(SkipReason::CoolingDown));
            }
            ExtractionDecision::Proceed => {}
        }

        let parsed = parse_transcript_file(transcript)?;
        let session_label = parsed
            .session_id
            .clone()
            .unwrap_or_else(|| file_stem(transcript));
        let project = cwd
            .map(detect_project)
            .or_else(|| parsed.cwd.as_deref().map(|c| detect_project(Path::new(c))))
            .unwrap_or_else(|| "unknown".to_string());

        let normalized = normalize_turns(&parsed.turns);
        if normalized.trim().is_empty() {
            info!("Nothing extractable in {}", transcript.display());
            tracker.mark_extracted(transcript, size, now);
            tracker.save()?;
            return Ok(ExtractionOutcome::Skipped(SkipReason::EmptyTranscript));
        }

        info!(
            "Extracting {} ({} chars, session {}, project {})",
            transcript.display(),
            normalized.chars().count(),
            session_label,
            project
        );

        let (extract, chunks, merged) = match self.extract_document(&normalized).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Extraction failed for {}: {}", transcript.display(), e);
                tracker.mark_failed(transcript, now);
                tracker.save()?;
                return Ok(ExtractionOutcome::Failed(e.to_string()));
            }
        };

        if !passes_quality_gate(&extract) {
            let reason = "output missing ONE SENTENCE SUMMARY / MAIN IDEAS headings";
            warn!("Quality gate rejected extract for {}", transcript.display());
            tracker.mark_failed(transcript, now);
            tracker.save()?;
            return Ok(ExtractionOutcome::Failed(
                MemoryError::QualityGateFailed(reason.into()).to_string(),
            ));
        }

        self.outputs
            .persist_extract(&session_label, &project, &extract, transcript, now);
        tracker.mark_extracted(transcript, size, now);
        tracker.save()?;

        info!(
            "Extracted {} ({} chunk{}{})",
            transcript.display(),
            chunks,
            if chunks == 1 { "" } else { "s" },
            if merged { ", merged" } else { "" }
        );
        Ok(ExtractionOutcome::Extracted { chunks, merged })
    }

    /// Extract a normalized document, chunking when oversize. Returns the
    /// extract plus how many chunk calls ran and whether a merge happened.
    async fn extract_document(&self, normalized: &str) -> Result<(String, usize, bool)> {
        if normalized.chars().count() <= self.chunk_threshold {
            let extract = self
                .call_extractors(EXTRACTION_SYSTEM_PROMPT, normalized, self.per_call_timeout)
                .await?;
            return Ok((extract, 1, false));
        }

        let chunks = split_into_chunks(normalized, self.chunk_size);
        let started = Instant::now();
        let mut partials = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            let remaining = self
                .total_timeout
                .checked_sub(started.elapsed())
                .filter(|d| !d.is_zero())
                .ok_or_else(|| {
                    MemoryError::ServiceUnavailable(format!(
                        "chunked extraction exceeded {:?} total budget",
                        self.total_timeout
                    ))
                })?;
            let timeout = remaining.min(self.per_call_timeout);
            info!("Extracting chunk {}/{}", index + 1, chunks.len());
            let partial = self
                .call_extractors(EXTRACTION_SYSTEM_PROMPT, chunk, timeout)
                .await?;
            partials.push(partial);
        }

        let concatenated = partials.join("\n\n");
        let remaining = self
            .total_timeout
            .checked_sub(started.elapsed())
            .filter(|d| !d.is_zero())
            .unwrap_or(self.per_call_timeout);
        match self
            .call_extractors(MERGE_SYSTEM_PROMPT, &concatenated, remaining.min(self.per_call_timeout))
            .await
        {
            Ok(merged) => Ok((merged, chunks.len(), true)),
            Err(e) => {
                // Partial extracts beat no extract.
                warn!("Meta-extraction failed ({}), keeping partials verbatim", e);
                Ok((concatenated, chunks.len(), false))
            }
        }
    }

    /// One-shot extraction with the per-call timeout. Captures use this to
    /// distill a message window without the file-tracking machinery.
    pub async fn extract_once(&self, system_prompt: &str, input: &str) -> Result<String> {
        self.call_extractors(system_prompt, input, self.per_call_timeout)
            .await
    }

    /// Try each configured extractor in order, bounded by `timeout`.
    async fn call_extractors(
        &self,
        system_prompt: &str,
        input: &str,
        timeout: Duration,
    ) -> Result<String> {
        let mut last_error = MemoryError::ServiceUnavailable("no extractor configured".into());
        for extractor in &self.extractors {
            match tokio::time::timeout(timeout, extractor.extract(system_prompt, input)).await {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(e)) => {
                    warn!("Extractor {} failed: {}", extractor.name(), e);
                    last_error = e;
                }
                Err(_) => {
                    warn!("Extractor {} timed out after {:?}", extractor.name(), timeout);
                    last_error = MemoryError::ServiceUnavailable(format!(
                        "extractor {} timed out",
                        extractor.name()
                    ));
                }
            }
        }
        Err(last_error)
    }
}

/// The two headings an extract must carry to be accepted.
pub fn passes_quality_gate(extract: &str) -> bool {
    extract.contains("ONE SENTENCE SUMMARY") && extract.contains("MAIN IDEAS")
}

/// Split on line boundaries into chunks of at most `max_chars` characters.
/// A single line longer than the budget becomes its own chunk.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for line in text.lines() {
        let line_chars = line.chars().count() + 1;
        if current_chars > 0 && current_chars + line_chars > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        current.push_str(line);
        current.push('\n');
        current_chars += line_chars;
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::tracker::RETRY_WINDOW_HOURS;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Scripted extractor: counts calls and replays canned responses.
    struct StubExtractor {
        calls: Arc<AtomicUsize>,
        response: String,
        fail: bool,
    }

    #[async_trait]
    impl Extractor for StubExtractor {
        async fn extract(&self, _system_prompt: &str, _input: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(MemoryError::ServiceUnavailable("stub down".into()))
            } else {
                Ok(self.response.clone())
            }
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    const GOOD_EXTRACT: &str = "\
ONE SENTENCE SUMMARY

Worked through the indexing bug.

MAIN IDEAS

- Keep triggers and base rows in lockstep
";

    fn pipeline_with(
        dir: &TempDir,
        extractor: StubExtractor,
        chunk_threshold: usize,
        chunk_size: usize,
    ) -> ExtractionPipeline {
        ExtractionPipeline::with_extractors(
            vec![Box::new(extractor)],
            MemoryOutputs::new(dir.path().join("MEMORY"), 10, 500),
            dir.path().join("MEMORY/.extraction_tracker.json"),
            Duration::from_secs(5),
            Duration::from_secs(10),
            chunk_threshold,
            chunk_size,
        )
    }

    fn write_transcript(dir: &TempDir, name: &str, turns: usize, turn_len: usize) -> PathBuf {
        let path = dir.path().join(name);
        let body: String = (0..turns)
            .map(|i| {
                format!(
                    r#"{{"sessionId":"sess-{name}","cwd":"/tmp","message":{{"role":"user","content":"turn {i} {}"}}}}"#,
                    "x".repeat(turn_len)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn quality_gate_failure_schedules_retry() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = pipeline_with(
            &dir,
            StubExtractor {
                calls: Arc::clone(&calls),
                response: "hello".into(),
                fail: false,
            },
            120_000,
            80_000,
        );
        let transcript = write_transcript(&dir, "bad.jsonl", 3, 40);

        let before = Utc::now();
        let outcome = pipeline.run_file(&transcript, None, false).await.unwrap();
        assert!(matches!(outcome, ExtractionOutcome::Failed(_)));

        let tracker = ExtractionTracker::load(&dir.path().join("MEMORY/.extraction_tracker.json"));
        let record = tracker.record(&transcript).unwrap();
        assert!(record.failed_at.is_some());
        let retry_after = record.retry_after.unwrap();
        let expected = before + ChronoDuration::hours(RETRY_WINDOW_HOURS);
        assert!((retry_after - expected).num_minutes().abs() <= 1);

        // No archive entry was written.
        assert!(!pipeline.outputs().distilled_path().exists());
    }

    #[tokio::test]
    async fn successful_extraction_persists_and_marks() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = pipeline_with(
            &dir,
            StubExtractor {
                calls: Arc::clone(&calls),
                response: GOOD_EXTRACT.into(),
                fail: false,
            },
            120_000,
            80_000,
        );
        let transcript = write_transcript(&dir, "good.jsonl", 3, 40);

        let outcome = pipeline.run_file(&transcript, None, false).await.unwrap();
        assert_eq!(
            outcome,
            ExtractionOutcome::Extracted {
                chunks: 1,
                merged: false
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(pipeline.outputs().distilled_path().exists());

        // Second run skips: the tracker remembers.
        let outcome = pipeline.run_file(&transcript, None, false).await.unwrap();
        assert_eq!(
            outcome,
            ExtractionOutcome::Skipped(SkipReason::AlreadyExtracted)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oversize_transcript_chunks_then_merges() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        // Threshold 2,000 / chunk 1,000: ~2.6k chars of turns → 3 chunks.
        let pipeline = pipeline_with(
            &dir,
            StubExtractor {
                calls: Arc::clone(&calls),
                response: GOOD_EXTRACT.into(),
                fail: false,
            },
            2_000,
            1_000,
        );
        let transcript = write_transcript(&dir, "long.jsonl", 9, 280);

        let outcome = pipeline.run_file(&transcript, None, false).await.unwrap();
        let ExtractionOutcome::Extracted { chunks, merged } = outcome else {
            panic!("expected extraction, got {outcome:?}");
        };
        assert_eq!(chunks, 3);
        assert!(merged);
        // Three chunk calls plus one merge call.
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        // Exactly one archive entry.
        let archive = std::fs::read_to_string(pipeline.outputs().distilled_path()).unwrap();
        assert_eq!(archive.matches("## ").count(), 1);
    }

    #[tokio::test]
    async fn extractor_outage_fails_and_cools_down() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_with(
            &dir,
            StubExtractor {
                calls: Arc::new(AtomicUsize::new(0)),
                response: String::new(),
                fail: true,
            },
            120_000,
            80_000,
        );
        let transcript = write_transcript(&dir, "down.jsonl", 3, 40);

        let outcome = pipeline.run_file(&transcript, None, false).await.unwrap();
        assert!(matches!(outcome, ExtractionOutcome::Failed(_)));

        let outcome = pipeline.run_file(&transcript, None, false).await.unwrap();
        assert_eq!(outcome, ExtractionOutcome::Skipped(SkipReason::CoolingDown));
    }

    #[test]
    fn chunking_triggers_strictly_above_threshold() {
        let exactly = "a".repeat(100);
        assert_eq!(split_into_chunks(&exactly, 200).len(), 1);

        let lines: String = (0..10).map(|_| "b".repeat(50) + "\n").collect();
        let chunks = split_into_chunks(&lines, 102);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 102);
        }
        // Nothing lost.
        assert_eq!(chunks.concat(), lines);
    }

    #[test]
    fn quality_gate_needs_both_headings() {
        assert!(passes_quality_gate(GOOD_EXTRACT));
        assert!(!passes_quality_gate("MAIN IDEAS\n- only one heading"));
        assert!(!passes_quality_gate("ONE SENTENCE SUMMARY\nonly the other"));
        assert!(!passes_quality_gate("hello"));
    }
}
