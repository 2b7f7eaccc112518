//! AI enrichment interfaces and implementations.
//!
//! The pipeline consumes two narrow interfaces: [`Summarizer`] and
//! [`Embedder`]. Concrete model backends stay behind an HTTP JSON contract;
//! the `disabled` implementations let a deployment run without AI at all.
//!
//! Also provides the vector utilities shared with the vector index:
//! [`vec_to_blob`], [`blob_to_vec`], and [`cosine_similarity`].
//!
//! # Retry Strategy
//!
//! The HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail permanently
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::config::AiConfig;

/// Enrichment failure, split by how the pipeline should react.
#[derive(Debug, Error)]
pub enum AiError {
    /// Worth retrying: timeout, rate limit, backend 5xx.
    #[error("transient ai error: {0}")]
    Transient(String),
    /// Not worth retrying: misconfiguration, rejected input.
    #[error("permanent ai error: {0}")]
    Permanent(String),
}

/// Result of one summarize call.
#[derive(Debug, Clone, Deserialize)]
pub struct SummaryOutput {
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub suggested_status: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub tokens_used: i64,
}

/// The `SummarizeFn` interface.
#[async_trait]
pub trait Summarizer: Send + Sync {
    fn model_id(&self) -> &str;
    async fn summarize(
        &self,
        title: &str,
        doc_type: &str,
        content: &str,
    ) -> Result<SummaryOutput, AiError>;
}

/// One embedded chunk returned by the `EmbedFn` interface.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub index: i64,
    pub start_pos: i64,
    pub end_pos: i64,
    pub text: String,
    pub vector: Vec<f32>,
}

/// Result of one embed call.
#[derive(Debug, Clone)]
pub struct EmbedOutput {
    pub model: String,
    pub dimensions: usize,
    /// Document-level vector (mean of chunk vectors for the HTTP backend).
    pub content_vector: Vec<f32>,
    pub chunks: Vec<EmbeddedChunk>,
}

/// The `EmbedFn` interface.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;
    fn dimensions(&self) -> usize;
    /// Embed the document content, chunking with the given size/overlap.
    async fn embed(
        &self,
        content: &str,
        chunk_bytes: usize,
        overlap_bytes: usize,
    ) -> Result<EmbedOutput, AiError>;
}

// ============ Disabled providers ============

/// Summarizer used when no backend is configured; always fails permanently
/// so the pipeline skips the stage instead of retrying.
pub struct DisabledSummarizer;

#[async_trait]
impl Summarizer for DisabledSummarizer {
    fn model_id(&self) -> &str {
        "disabled"
    }

    async fn summarize(
        &self,
        _title: &str,
        _doc_type: &str,
        _content: &str,
    ) -> Result<SummaryOutput, AiError> {
        Err(AiError::Permanent("summarize provider is disabled".into()))
    }
}

/// Embedder used when no backend is configured.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_id(&self) -> &str {
        "disabled"
    }

    fn dimensions(&self) -> usize {
        0
    }

    async fn embed(
        &self,
        _content: &str,
        _chunk_bytes: usize,
        _overlap_bytes: usize,
    ) -> Result<EmbedOutput, AiError> {
        Err(AiError::Permanent("embed provider is disabled".into()))
    }
}

// ============ HTTP providers ============

/// Summarizer calling a JSON HTTP endpoint.
///
/// Request: `{"model", "title", "doc_type", "content"}`.
/// Response: the [`SummaryOutput`] shape plus optional `tokens_used`.
pub struct HttpSummarizer {
    endpoint: String,
    model: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl HttpSummarizer {
    pub fn new(config: &AiConfig) -> Result<Self, AiError> {
        let endpoint = config
            .summarize_endpoint
            .clone()
            .ok_or_else(|| AiError::Permanent("ai.summarize_endpoint required".into()))?;
        let model = config
            .summarize_model
            .clone()
            .ok_or_else(|| AiError::Permanent("ai.summarize_model required".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AiError::Permanent(format!("http client: {}", e)))?;
        Ok(Self {
            endpoint,
            model,
            client,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Summarizer for HttpSummarizer {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn summarize(
        &self,
        title: &str,
        doc_type: &str,
        content: &str,
    ) -> Result<SummaryOutput, AiError> {
        let body = serde_json::json!({
            "model": self.model,
            "title": title,
            "doc_type": doc_type,
            "content": content,
        });

        let response =
            post_with_backoff(&self.client, &self.endpoint, &body, self.max_retries).await?;
        response
            .json::<SummaryOutput>()
            .await
            .map_err(|e| AiError::Transient(format!("summarize response body: {}", e)))
    }
}

/// Embedder calling a JSON HTTP endpoint.
///
/// Request: `{"model", "input": [texts]}`.
/// Response: `{"data": [{"embedding": [..]}, ...]}` in input order.
pub struct HttpEmbedder {
    endpoint: String,
    model: String,
    dims: usize,
    client: reqwest::Client,
    max_retries: u32,
}

impl HttpEmbedder {
    pub fn new(config: &AiConfig) -> Result<Self, AiError> {
        let endpoint = config
            .embed_endpoint
            .clone()
            .ok_or_else(|| AiError::Permanent("ai.embed_endpoint required".into()))?;
        let model = config
            .embed_model
            .clone()
            .ok_or_else(|| AiError::Permanent("ai.embed_model required".into()))?;
        let dims = config
            .embed_dims
            .ok_or_else(|| AiError::Permanent("ai.embed_dims required".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AiError::Permanent(format!("http client: {}", e)))?;
        Ok(Self {
            endpoint,
            model,
            dims,
            client,
            max_retries: config.max_retries,
        })
    }
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDatum>,
}

#[derive(Deserialize)]
struct EmbedDatum {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(
        &self,
        content: &str,
        chunk_bytes: usize,
        overlap_bytes: usize,
    ) -> Result<EmbedOutput, AiError> {
        let chunks = crate::chunk::chunk_text(content, chunk_bytes, overlap_bytes);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let response =
            post_with_backoff(&self.client, &self.endpoint, &body, self.max_retries).await?;
        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| AiError::Transient(format!("embed response body: {}", e)))?;

        if parsed.data.len() != chunks.len() {
            return Err(AiError::Permanent(format!(
                "embed backend returned {} vectors for {} chunks",
                parsed.data.len(),
                chunks.len()
            )));
        }

        let mut embedded = Vec::with_capacity(chunks.len());
        for (chunk, datum) in chunks.iter().zip(parsed.data.into_iter()) {
            if datum.embedding.len() != self.dims {
                return Err(AiError::Permanent(format!(
                    "embed backend returned {} dims, expected {}",
                    datum.embedding.len(),
                    self.dims
                )));
            }
            embedded.push(EmbeddedChunk {
                index: chunk.index,
                start_pos: chunk.start_pos,
                end_pos: chunk.end_pos,
                text: chunk.text.clone(),
                vector: datum.embedding,
            });
        }

        let content_vector = mean_vector(&embedded, self.dims);
        Ok(EmbedOutput {
            model: self.model.clone(),
            dimensions: self.dims,
            content_vector,
            chunks: embedded,
        })
    }
}

/// POST JSON with exponential backoff on 429/5xx/network errors.
async fn post_with_backoff(
    client: &reqwest::Client,
    endpoint: &str,
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<reqwest::Response, AiError> {
    let mut last_err: Option<AiError> = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        match client.post(endpoint).json(body).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }
                let retryable = status.as_u16() == 429 || status.is_server_error();
                let body_text = response.text().await.unwrap_or_default();
                let message = format!("ai backend {}: {}", status, body_text);
                if retryable {
                    last_err = Some(AiError::Transient(message));
                    continue;
                }
                return Err(AiError::Permanent(message));
            }
            Err(e) => {
                last_err = Some(AiError::Transient(format!("ai backend: {}", e)));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| AiError::Transient("ai call failed after retries".into())))
}

fn mean_vector(chunks: &[EmbeddedChunk], dims: usize) -> Vec<f32> {
    if chunks.is_empty() || dims == 0 {
        return vec![0.0; dims];
    }
    let mut acc = vec![0.0f32; dims];
    for chunk in chunks {
        for (a, v) in acc.iter_mut().zip(chunk.vector.iter()) {
            *a += v;
        }
    }
    let n = chunks.len() as f32;
    for a in &mut acc {
        *a /= n;
    }
    acc
}

// ============ Factories ============

pub fn create_summarizer(config: &AiConfig) -> Result<Box<dyn Summarizer>, AiError> {
    match config.summarize_provider.as_str() {
        "disabled" => Ok(Box::new(DisabledSummarizer)),
        "http" => Ok(Box::new(HttpSummarizer::new(config)?)),
        other => Err(AiError::Permanent(format!(
            "unknown summarize provider: {}",
            other
        ))),
    }
}

pub fn create_embedder(config: &AiConfig) -> Result<Box<dyn Embedder>, AiError> {
    match config.embed_provider.as_str() {
        "disabled" => Ok(Box::new(DisabledEmbedder)),
        "http" => Ok(Box::new(HttpEmbedder::new(config)?)),
        other => Err(AiError::Permanent(format!(
            "unknown embed provider: {}",
            other
        ))),
    }
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched
/// vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_mean_vector() {
        let chunks = vec![
            EmbeddedChunk {
                index: 0,
                start_pos: 0,
                end_pos: 1,
                text: "a".into(),
                vector: vec![1.0, 3.0],
            },
            EmbeddedChunk {
                index: 1,
                start_pos: 1,
                end_pos: 2,
                text: "b".into(),
                vector: vec![3.0, 5.0],
            },
        ];
        assert_eq!(mean_vector(&chunks, 2), vec![2.0, 4.0]);
    }

    #[tokio::test]
    async fn test_disabled_providers_fail_permanently() {
        let s = DisabledSummarizer;
        assert!(matches!(
            s.summarize("t", "RFC", "body").await,
            Err(AiError::Permanent(_))
        ));
        let e = DisabledEmbedder;
        assert!(matches!(
            e.embed("body", 100, 0).await,
            Err(AiError::Permanent(_))
        ));
    }
}
