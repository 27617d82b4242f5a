//! Embedding service trait and implementations.
//!
//! - `HttpEmbeddingService` calls an OpenAI-compatible `/v1/embeddings`
//!   endpoint that distinguishes query and passage inputs (NVIDIA NIM
//!   retrievers). This is the production embedding backend.
//! - `MockEmbedding` provides deterministic hash-based vectors for testing.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use murmur_core::config::EmbeddingConfig;

use crate::error::VectorError;

/// Which side of an asymmetric retrieval model the text is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedMode {
    /// A search query.
    Query,
    /// A document being indexed.
    Passage,
}

impl EmbedMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbedMode::Query => "query",
            EmbedMode::Passage => "passage",
        }
    }
}

/// Service for generating text embeddings.
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(
        &self,
        text: &str,
        mode: EmbedMode,
    ) -> impl std::future::Future<Output = Result<Vec<f32>, VectorError>> + Send;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// Because `EmbeddingService::embed` returns `impl Future` it is not
/// object-safe. This trait uses a boxed future instead, allowing
/// `Arc<dyn DynEmbeddingService>` to be shared between the router and the
/// retrieval composer.
pub trait DynEmbeddingService: Send + Sync {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
        mode: EmbedMode,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>, VectorError>> + Send + 'a>>;

    fn dimensions(&self) -> usize;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
        mode: EmbedMode,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>, VectorError>> + Send + 'a>>
    {
        Box::pin(self.embed(text, mode))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }
}

// ---------------------------------------------------------------------------
// HttpEmbeddingService - remote OpenAI-compatible embeddings
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: [&'a str; 1],
    model: &'a str,
    input_type: &'static str,
    encoding_format: &'static str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Embedding service backed by an OpenAI-compatible HTTP endpoint.
///
/// Vectors longer than `dimensions` are truncated, which is how Matryoshka
/// models are shortened to the index dimension.
#[derive(Debug, Clone)]
pub struct HttpEmbeddingService {
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
    http_client: reqwest::Client,
}

impl HttpEmbeddingService {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            dimensions,
            http_client: reqwest::Client::new(),
        }
    }

    /// Build from configuration, optionally routing through a proxy.
    pub fn from_config(config: &EmbeddingConfig, proxy: Option<&str>) -> Result<Self, VectorError> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(30));
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        let mut service = Self::new(
            config.base_url.clone(),
            config.api_key.clone(),
            config.model.clone(),
            config.dimensions,
        );
        service.http_client = builder.build()?;
        Ok(service)
    }
}

impl EmbeddingService for HttpEmbeddingService {
    async fn embed(&self, text: &str, mode: EmbedMode) -> Result<Vec<f32>, VectorError> {
        if text.trim().is_empty() {
            return Err(VectorError::EmptyInput);
        }

        let url = format!("{}/v1/embeddings", self.base_url);
        let body = EmbeddingRequest {
            input: [text],
            model: &self.model,
            input_type: mode.as_str(),
            encoding_format: "float",
        };

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VectorError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| VectorError::MalformedResponse(e.to_string()))?;

        let mut embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| VectorError::MalformedResponse("no embedding data".to_string()))?;

        if self.dimensions > 0 && embedding.len() > self.dimensions {
            embedding.truncate(self.dimensions);
        }
        debug!(mode = mode.as_str(), dims = embedding.len(), "Embedded text");
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic hash-based vectors for testing
// ---------------------------------------------------------------------------

/// Mock embedding service that returns deterministic unit vectors.
///
/// The output is derived from a hash of the input text only, so a query and
/// a passage with identical text embed identically.
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimensions: usize,
}

impl MockEmbedding {
    pub fn new() -> Self {
        Self::with_dimensions(64)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(self.dimensions);
        for i in 0..self.dimensions {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }

        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }
        result
    }
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed(&self, text: &str, _mode: EmbedMode) -> Result<Vec<f32>, VectorError> {
        if text.is_empty() {
            return Err(VectorError::EmptyInput);
        }
        Ok(self.hash_to_vector(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
