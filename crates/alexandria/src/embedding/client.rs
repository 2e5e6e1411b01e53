//! HTTP client for the embedding service (Ollama wire contract).
//!
//! `POST {url}/api/embeddings` with `{model, prompt}` returns
//! `{embedding: [f32]}`; `GET {url}/api/tags` lists available models and
//! backs the health check. Inputs are truncated to a fixed character ceiling
//! to stay inside the model's context.

use crate::config::{Config, EMBED_INPUT_CEILING};
use crate::error::{MemoryError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

/// A successful embedding call.
#[derive(Debug, Clone)]
pub struct EmbeddingVector {
    pub vector: Vec<f32>,
    pub model: String,
    pub dimensions: usize,
}

#[derive(Debug, Clone)]
pub struct EmbeddingHealth {
    pub available: bool,
    pub model: String,
    pub url: String,
}

pub struct EmbeddingClient {
    base_url: String,
    model: String,
    http_client: reqwest::Client,
}

impl EmbeddingClient {
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

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.ollama_url.clone(),
            config.embedding_model.clone(),
            config.embed_timeout,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn embeddings_url(&self) -> String {
        format!("{}/api/embeddings", self.base_url)
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }

    /// Embed one text. Transport errors and non-2xx map to
    /// `ServiceUnavailable`; a well-formed HTTP response with a malformed or
    /// empty body maps to `Protocol`.
    pub async fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        let prompt = truncate_chars(text, EMBED_INPUT_CEILING);
        if prompt.len() < text.len() {
            debug!(
                "Truncated embedding input from {} to {} bytes",
                text.len(),
                prompt.len()
            );
        }

        let request = EmbeddingRequest {
            model: &self.model,
            prompt,
        };
        let response = self
            .http_client
            .post(self.embeddings_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| MemoryError::ServiceUnavailable(format!("embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MemoryError::ServiceUnavailable(format!(
                "embedding endpoint returned {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| MemoryError::Protocol(format!("bad embedding response: {e}")))?;
        if parsed.embedding.is_empty() {
            return Err(MemoryError::Protocol("embedding response was empty".into()));
        }

        let dimensions = parsed.embedding.len();
        debug!("Embedded {} chars into {} dims", prompt.len(), dimensions);
        Ok(EmbeddingVector {
            vector: parsed.embedding,
            model: self.model.clone(),
            dimensions,
        })
    }

    /// Check that the service answers and lists the configured model. Never
    /// fails; unavailability is a state, not an error.
    pub async fn health(&self) -> EmbeddingHealth {
        let available = match self.http_client.get(self.tags_url()).send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<TagsResponse>().await {
                    Ok(tags) => tags
                        .models
                        .iter()
                        .any(|m| m.name == self.model || m.name.starts_with(&format!("{}:", self.model))),
                    Err(e) => {
                        warn!("Embedding service tags response malformed: {}", e);
                        false
                    }
                }
            }
            Ok(response) => {
                warn!("Embedding service health returned {}", response.status());
                false
            }
            Err(e) => {
                debug!("Embedding service unreachable: {}", e);
                false
            }
        };
        EmbeddingHealth {
            available,
            model: self.model.clone(),
            url: self.base_url.clone(),
        }
    }
}

/// Cut at a char boundary after at most `max_chars` characters.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(server: &mockito::ServerGuard) -> EmbeddingClient {
        EmbeddingClient::new(server.url(), "nomic-embed-text", Duration::from_secs(2))
    }

    #[tokio::test]
    async fn embed_parses_vector() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/embeddings")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"model":"nomic-embed-text"}"#.into(),
            ))
            .with_status(200)
            .with_body(r#"{"embedding":[0.1,0.2,0.3]}"#)
            .create_async()
            .await;

        let result = client_for(&server).embed("hello world").await.unwrap();
        assert_eq!(result.dimensions, 3);
        assert_eq!(result.vector, vec![0.1, 0.2, 0.3]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_2xx_is_service_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/embeddings")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let err = client_for(&server).embed("hello").await.unwrap_err();
        assert!(matches!(err, MemoryError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn malformed_body_is_protocol_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/embeddings")
            .with_status(200)
            .with_body("not json at all")
            .create_async()
            .await;

        let err = client_for(&server).embed("hello").await.unwrap_err();
        assert!(matches!(err, MemoryError::Protocol(_)));
    }

    #[tokio::test]
    async fn health_requires_the_configured_model() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(r#"{"models":[{"name":"nomic-embed-text:latest"},{"name":"llama3.1"}]}"#)
            .create_async()
            .await;

        let health = client_for(&server).health().await;
        assert!(health.available);
        assert_eq!(health.model, "nomic-embed-text");
    }

    #[tokio::test]
    async fn health_is_false_when_model_missing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(r#"{"models":[{"name":"some-other-model"}]}"#)
            .create_async()
            .await;

        let health = client_for(&server).health().await;
        assert!(!health.available);
    }

    #[tokio::test]
    async fn health_is_false_when_unreachable() {
        let client =
            EmbeddingClient::new("http://127.0.0.1:1", "nomic-embed-text", Duration::from_millis(200));
        let health = client.health().await;
        assert!(!health.available);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "héllo".repeat(10);
        let cut = truncate_chars(&text, 7);
        assert_eq!(cut.chars().count(), 7);
        assert!(text.starts_with(cut));
        assert_eq!(truncate_chars("short", 100), "short");
    }
}
