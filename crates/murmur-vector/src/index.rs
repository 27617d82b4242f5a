//! Namespaced vector similarity search.
//!
//! [`VectorNamespaces`] is the contract the memory pipeline needs from a
//! vector service: upsert into a named namespace and ask a namespace for its
//! top-k matches, optionally restricted by metadata equality.
//! [`InMemoryNamespaces`] is a brute-force cosine implementation suitable for
//! tests and single-process deployments.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::VectorError;

/// Vector metadata, also used as an equality filter on queries.
pub type Metadata = serde_json::Map<String, Value>;

/// A single match from a namespace query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    /// Cosine similarity; higher is closer.
    pub score: f32,
}

#[async_trait]
pub trait VectorNamespaces: Send + Sync {
    /// Insert or overwrite `id` in `namespace`.
    async fn upsert(
        &self,
        namespace: &str,
        id: &str,
        values: Vec<f32>,
        metadata: Metadata,
    ) -> Result<(), VectorError>;

    /// Up to `top_k` matches in `namespace`, by descending score.
    async fn query_top_k(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<VectorMatch>, VectorError>;
}

#[derive(Debug, Clone)]
struct VectorEntry {
    embedding: Vec<f32>,
    metadata: Metadata,
}

/// In-memory namespaced index using brute-force cosine similarity.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNamespaces {
    namespaces: Arc<RwLock<HashMap<String, HashMap<String, VectorEntry>>>>,
}

impl InMemoryNamespaces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of vectors stored in `namespace`.
    pub fn len(&self, namespace: &str) -> usize {
        self.namespaces
            .read()
            .map(|ns| ns.get(namespace).map_or(0, |e| e.len()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, namespace: &str) -> bool {
        self.len(namespace) == 0
    }

    /// Whether `id` exists in `namespace`.
    pub fn contains(&self, namespace: &str, id: &str) -> bool {
        self.namespaces
            .read()
            .map(|ns| ns.get(namespace).is_some_and(|e| e.contains_key(id)))
            .unwrap_or(false)
    }

    /// Stored metadata for `id` in `namespace`.
    pub fn metadata(&self, namespace: &str, id: &str) -> Option<Metadata> {
        self.namespaces
            .read()
            .ok()?
            .get(namespace)?
            .get(id)
            .map(|e| e.metadata.clone())
    }
}

#[async_trait]
impl VectorNamespaces for InMemoryNamespaces {
    async fn upsert(
        &self,
        namespace: &str,
        id: &str,
        values: Vec<f32>,
        metadata: Metadata,
    ) -> Result<(), VectorError> {
        let mut namespaces = self
            .namespaces
            .write()
            .map_err(|e| VectorError::Index(format!("Lock poisoned: {}", e)))?;
        namespaces.entry(namespace.to_string()).or_default().insert(
            id.to_string(),
            VectorEntry {
                embedding: values,
                metadata,
            },
        );
        Ok(())
    }

    async fn query_top_k(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<VectorMatch>, VectorError> {
        let namespaces = self
            .namespaces
            .read()
            .map_err(|e| VectorError::Index(format!("Lock poisoned: {}", e)))?;
        let Some(entries) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<VectorMatch> = entries
            .iter()
            .filter(|(_, entry)| filter.map_or(true, |f| matches_filter(&entry.metadata, f)))
            .map(|(id, entry)| VectorMatch {
                id: id.clone(),
                score: cosine_similarity(vector, &entry.embedding) as f32,
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(top_k);
        Ok(scored)
    }
}

fn matches_filter(metadata: &Metadata, filter: &Metadata) -> bool {
    filter
        .iter()
        .all(|(key, expected)| metadata.get(key) == Some(expected))
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude or the lengths differ.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}
