//! Per-transcript extraction state.
//!
//! One JSON file maps absolute transcript paths to their pipeline state and
//! drives deduplication, growth detection, and retry scheduling:
//!
//! ```text
//!    (absent)
//!       | begin
//!       v
//!   extracting --success--> extracted --grew>50%--> extracting
//!       |                      ^
//!     failure                  | retry_after reached
//!       v                      |
//!    cooldown -----------------+
//! ```
//!
//! The whole file is rewritten on each update (write-temp-then-rename), which
//! keeps it readable by the shell hooks that share it.

use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Cooldown after a failed extraction.
pub const RETRY_WINDOW_HOURS: i64 = 24;

/// How much a transcript must grow before an already-extracted file is
/// picked up again (50%).
const REEXTRACT_GROWTH_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRecord {
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<DateTime<Utc>>,
}

/// Why a transcript was or wasn't selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionDecision {
    Proceed,
    /// Already extracted and the file hasn't grown enough.
    SkipFresh,
    /// A recent failure is still cooling down.
    SkipCooldown,
}

pub struct ExtractionTracker {
    path: PathBuf,
    records: HashMap<String, ExtractionRecord>,
}

impl ExtractionTracker {
    /// Load the state file, tolerating a missing or corrupt one (a corrupt
    /// tracker means re-extraction, not data loss).
    pub fn load(path: &Path) -> Self {
        let records = match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(records) => records,
                Err(e) => {
                    warn!("Extraction tracker at {} is corrupt ({}), starting fresh", path.display(), e);
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self {
            path: path.to_path_buf(),
            records,
        }
    }

    pub fn record(&self, transcript: &Path) -> Option<&ExtractionRecord> {
        self.records.get(&key_for(transcript))
    }

    /// Apply the dedup/scheduling rules for one transcript.
    pub fn decision(
        &self,
        transcript: &Path,
        current_size: u64,
        force: bool,
        now: DateTime<Utc>,
    ) -> ExtractionDecision {
        if force {
            return ExtractionDecision::Proceed;
        }
        let Some(record) = self.record(transcript) else {
            return ExtractionDecision::Proceed;
        };

        if let Some(retry_after) = record.retry_after {
            if record.failed_at.is_some() && now < retry_after {
                return ExtractionDecision::SkipCooldown;
            }
        }

        if record.extracted_at.is_some() {
            let grown_past =
                (record.size as f64 * REEXTRACT_GROWTH_FACTOR).ceil() as u64;
            if current_size <= grown_past.max(record.size) {
                return ExtractionDecision::SkipFresh;
            }
        }

        ExtractionDecision::Proceed
    }

    pub fn mark_extracted(&mut self, transcript: &Path, size: u64, now: DateTime<Utc>) {
        let record = self.records.entry(key_for(transcript)).or_default();
        record.size = size;
        record.extracted_at = Some(now);
        record.failed_at = None;
        record.retry_after = None;
        debug!("Tracker: {} extracted at {} bytes", transcript.display(), size);
    }

    pub fn mark_failed(&mut self, transcript: &Path, now: DateTime<Utc>) {
        let record = self.records.entry(key_for(transcript)).or_default();
        record.failed_at = Some(now);
        record.retry_after = Some(now + Duration::hours(RETRY_WINDOW_HOURS));
        debug!(
            "Tracker: {} failed, retry after {:?}",
            transcript.display(),
            record.retry_after
        );
    }

    /// Rewrite the state file atomically.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&self.records)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn key_for(transcript: &Path) -> String {
    transcript.to_string_lossy().into_owned()
}
