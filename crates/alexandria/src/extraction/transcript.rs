//! Transcript parsing and normalization.
//!
//! Transcripts are newline-delimited JSON; each line may carry a user or
//! assistant message plus session metadata. `content` arrives as a plain
//! string, a list of typed blocks, or an object with a `text` field - the
//! `Content` variant covers all three. Tool-use, tool-result, and thinking
//! blocks are ignored.

use crate::config::MESSAGE_TRUNCATE_CHARS;
use crate::error::Result;
use crate::memory_db::Role;
use crate::utils::truncate_with_ellipsis;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// Messages shorter than this after flattening carry no memory value.
const MIN_MESSAGE_CHARS: usize = 10;

#[derive(Debug, Deserialize)]
struct TranscriptLine {
    message: Option<RawMessage>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    timestamp: Option<String>,
    cwd: Option<String>,
    #[serde(rename = "gitBranch")]
    git_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    role: Option<String>,
    content: Option<Content>,
    model: Option<String>,
}

/// The three shapes `message.content` shows up in.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Blocks(Vec<ContentBlock>),
    Object(serde_json::Value),
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub text: Option<String>,
}

/// Extract the plain text out of any content shape. Non-text blocks vanish.
pub fn flatten_content(content: &Content) -> String {
    match content {
        Content::Text(text) => text.clone(),
        Content::Blocks(blocks) => blocks
            .iter()
            .filter(|block| matches!(block.kind.as_deref(), Some("text") | None))
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n"),
        Content::Object(value) => value
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string(),
    }
}

/// One user or assistant turn.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub ts: Option<DateTime<Utc>>,
    pub content: String,
}

/// A fully parsed transcript file.
#[derive(Debug, Default)]
pub struct ParsedTranscript {
    pub session_id: Option<String>,
    pub cwd: Option<String>,
    pub branch: Option<String>,
    pub model: Option<String>,
    pub first_ts: Option<DateTime<Utc>>,
    pub last_ts: Option<DateTime<Utc>>,
    pub turns: Vec<Turn>,
}

/// Whether a flattened turn survives normalization. Tiny fragments and
/// tool-result payloads are dropped.
pub fn keep_turn(content: &str) -> bool {
    let trimmed = content.trim();
    trimmed.chars().count() >= MIN_MESSAGE_CHARS
        && !trimmed.starts_with("[{")
        && !trimmed.starts_with("{\"tool_use_id\"")
}

/// Parse a transcript file end-to-end.
pub fn parse_transcript_file(path: &Path) -> Result<ParsedTranscript> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_transcript_str(&text))
}

/// Parse newline-delimited transcript JSON. Undecodable lines and
/// non-message records are skipped, never fatal.
pub fn parse_transcript_str(text: &str) -> ParsedTranscript {
    let mut parsed = ParsedTranscript::default();
    let mut skipped_lines = 0usize;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: TranscriptLine = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(_) => {
                skipped_lines += 1;
                continue;
            }
        };

        if parsed.session_id.is_none() {
            parsed.session_id = record.session_id;
        }
        if parsed.cwd.is_none() {
            parsed.cwd = record.cwd;
        }
        if parsed.branch.is_none() {
            parsed.branch = record.git_branch;
        }

        let ts = record
            .timestamp
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc));
        if let Some(ts) = ts {
            if parsed.first_ts.map_or(true, |first| ts < first) {
                parsed.first_ts = Some(ts);
            }
            if parsed.last_ts.map_or(true, |last| ts > last) {
                parsed.last_ts = Some(ts);
            }
        }

        let Some(message) = record.message else {
            continue;
        };
        let role = match message.role.as_deref() {
            Some("user") => Role::User,
            Some("assistant") => Role::Assistant,
            _ => continue,
        };
        if parsed.model.is_none() && role == Role::Assistant {
            parsed.model = message.model;
        }
        let Some(content) = message.content else {
            continue;
        };
        let flattened = flatten_content(&content);
        if !keep_turn(&flattened) {
            continue;
        }
        parsed.turns.push(Turn {
            role,
            ts,
            content: flattened,
        });
    }

    if skipped_lines > 0 {
        debug!("Skipped {} undecodable transcript lines", skipped_lines);
    }
    parsed
}

/// Flatten turns into the single text document the extractor consumes:
/// `[ROLE]: text` turns separated by blank lines, each turn truncated.
pub fn normalize_turns(turns: &[Turn]) -> String {
    turns
        .iter()
        .filter(|turn| keep_turn(&turn.content))
        .map(|turn| {
            format!(
                "[{}]: {}",
                turn.role.label(),
                truncate_with_ellipsis(turn.content.trim(), MESSAGE_TRUNCATE_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(role: &str, content: &str) -> String {
        format!(
            r#"{{"sessionId":"s-abc","timestamp":"2026-01-05T10:00:00Z","cwd":"/home/dev/proj","gitBranch":"main","message":{{"role":"{role}","content":{content}}}}}"#
        )
    }

    #[test]
    fn parses_string_and_block_content() {
        let text = [
            line("user", r#""please fix the flaky test""#),
            line(
                "assistant",
                r#"[{"type":"thinking","text":"hidden"},{"type":"text","text":"the fixture leaks a tempdir"},{"type":"tool_use","text":"ignored"}]"#,
            ),
            r#"{"summaryOnly":true}"#.to_string(),
            "not json".to_string(),
        ]
        .join("\n");

        let parsed = parse_transcript_str(&text);
        assert_eq!(parsed.session_id.as_deref(), Some("s-abc"));
        assert_eq!(parsed.cwd.as_deref(), Some("/home/dev/proj"));
        assert_eq!(parsed.branch.as_deref(), Some("main"));
        assert_eq!(parsed.turns.len(), 2);
        assert_eq!(parsed.turns[0].role, Role::User);
        assert_eq!(parsed.turns[1].content, "the fixture leaks a tempdir");
    }

    #[test]
    fn short_and_tool_payload_turns_are_dropped() {
        let text = [
            line("user", r#""ok""#),
            line("user", r#""[{\"tool\":\"output\"}]""#),
            line("user", r#""{\"tool_use_id\":\"t1\",\"content\":\"...\"}""#),
            line("user", r#""a genuinely useful message""#),
        ]
        .join("\n");

        let parsed = parse_transcript_str(&text);
        assert_eq!(parsed.turns.len(), 1);
        assert!(parsed.turns[0].content.starts_with("a genuinely"));
    }

    #[test]
    fn normalization_prefixes_roles_and_truncates() {
        let long = "x".repeat(MESSAGE_TRUNCATE_CHARS + 50);
        let turns = vec![
            Turn {
                role: Role::User,
                ts: None,
                content: "what changed here?".into(),
            },
            Turn {
                role: Role::Assistant,
                ts: None,
                content: long,
            },
        ];

        let normalized = normalize_turns(&turns);
        let parts: Vec<&str> = normalized.split("\n\n").collect();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].starts_with("[USER]: what changed"));
        assert!(parts[1].starts_with("[ASSISTANT]: x"));
        assert!(parts[1].ends_with('…'));
        assert!(parts[1].chars().count() <= MESSAGE_TRUNCATE_CHARS + "[ASSISTANT]: …".len());
    }

    #[test]
    fn object_content_uses_text_field() {
        let content = Content::Object(serde_json::json!({"text": "from the object", "extra": 1}));
        assert_eq!(flatten_content(&content), "from the object");
    }

    #[test]
    fn round_trip_modulo_dropped_blocks() {
        let text = line(
            "assistant",
            r#"[{"type":"text","text":"kept part one"},{"type":"tool_result","text":"dropped"},{"type":"text","text":"kept part two"}]"#,
        );
        let parsed = parse_transcript_str(&text);
        assert_eq!(parsed.turns[0].content, "kept part one\nkept part two");
    }
}
