//! Outbound embedding service integration.

pub mod client;

pub use client::{EmbeddingClient, EmbeddingHealth, EmbeddingVector};
