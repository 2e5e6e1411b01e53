//! LLM extractor invocations.
//!
//! The pipeline talks to extractors through one trait: a system prompt plus
//! the normalized transcript in, free-form text out. The primary
//! implementation shells out to a configured command (transcript on stdin,
//! system prompt as the final argument); the fallback posts to an
//! Ollama-contract generate endpoint. Neither runs inside a database
//! transaction.

use crate::error::{MemoryError, Result};
use crate::utils::truncate_with_ellipsis;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, system_prompt: &str, input: &str) -> Result<String>;

    /// Short label for logs.
    fn name(&self) -> &str;
}

/// Subprocess extractor, e.g. `claude -p`. The transcript is piped on stdin
/// and the system prompt goes last on the argv.
#[derive(Debug)]
pub struct CommandExtractor {
    program: PathBuf,
    base_args: Vec<String>,
    timeout: Duration,
    label: String,
}

impl CommandExtractor {
    /// Build from a whitespace-separated command line. The program must be
    /// resolvable on PATH.
    pub fn from_command_line(command_line: &str, timeout: Duration) -> Result<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| MemoryError::InvalidInput("extractor command is empty".into()))?;
        let resolved = which::which(program).map_err(|e| {
            MemoryError::ServiceUnavailable(format!("extractor '{program}' not found: {e}"))
        })?;
        Ok(Self {
            program: resolved,
            base_args: parts.map(str::to_string).collect(),
            timeout,
            label: program.to_string(),
        })
    }
}

#[async_trait]
impl Extractor for CommandExtractor {
    async fn extract(&self, system_prompt: &str, input: &str) -> Result<String> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.base_args)
            .arg(system_prompt)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                MemoryError::ServiceUnavailable(format!(
                    "failed to spawn {}: {e}",
                    self.program.display()
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await?;
            // Closing stdin signals end-of-input.
            drop(stdin);
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                MemoryError::ServiceUnavailable(format!(
                    "extractor {} timed out after {:?}",
                    self.label, self.timeout
                ))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MemoryError::ServiceUnavailable(format!(
                "extractor {} exited with {}: {}",
                self.label,
                output.status,
                truncate_with_ellipsis(stderr.trim(), 300)
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!("Extractor {} returned {} bytes", self.label, text.len());
        Ok(text)
    }

    fn name(&self) -> &str {
        &self.label
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// HTTP fallback extractor against an Ollama-contract `/api/generate`
/// endpoint.
pub struct OllamaExtractor {
    base_url: String,
    model: String,
    http_client: reqwest::Client,
}

impl OllamaExtractor {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Extractor for OllamaExtractor {
    async fn extract(&self, system_prompt: &str, input: &str) -> Result<String> {
        let request = GenerateRequest {
            model: &self.model,
            system: system_prompt,
            prompt: input,
            stream: false,
        };
        let response = self
            .http_client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| MemoryError::ServiceUnavailable(format!("generate request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Generate endpoint returned {}: {}", status, body);
            return Err(MemoryError::ServiceUnavailable(format!(
                "generate endpoint returned {status}"
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| MemoryError::Protocol(format!("bad generate response: {e}")))?;
        Ok(parsed.response)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn command_extractor_pipes_stdin() {
        // `sh -c cat <prompt>` runs cat with $0 bound to the prompt, echoing
        // stdin back.
        let extractor =
            CommandExtractor::from_command_line("sh -c cat", Duration::from_secs(5)).unwrap();
        let output = extractor
            .extract("ignored system prompt", "transcript body")
            .await
            .unwrap();
        assert_eq!(output, "transcript body");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_extractor_surfaces_nonzero_exit() {
        let extractor =
            CommandExtractor::from_command_line("false", Duration::from_secs(5)).unwrap();
        let err = extractor.extract("sys", "input").await.unwrap_err();
        assert!(matches!(err, MemoryError::ServiceUnavailable(_)));
    }

    #[test]
    fn unknown_program_is_unavailable() {
        let err = CommandExtractor::from_command_line(
            "definitely-not-a-real-binary-9c1",
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, MemoryError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn ollama_extractor_round_trip() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/generate")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"model":"llama3.1","stream":false}"#.into(),
            ))
            .with_status(200)
            .with_body(r#"{"response":"ONE SENTENCE SUMMARY\n..."}"#)
            .create_async()
            .await;

        let extractor = OllamaExtractor::new(server.url(), "llama3.1", Duration::from_secs(2));
        let output = extractor.extract("sys", "body").await.unwrap();
        assert!(output.starts_with("ONE SENTENCE SUMMARY"));
    }

    #[tokio::test]
    async fn ollama_extractor_maps_transport_errors() {
        let extractor =
            OllamaExtractor::new("http://127.0.0.1:1", "llama3.1", Duration::from_millis(200));
        let err = extractor.extract("sys", "body").await.unwrap_err();
        assert!(matches!(err, MemoryError::ServiceUnavailable(_)));
    }
}
