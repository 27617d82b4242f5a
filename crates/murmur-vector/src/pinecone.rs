//! Pinecone data-plane client.
//!
//! Talks to an index host's REST API directly (`/vectors/upsert`, `/query`)
//! with the namespace carried in the request body.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::VectorError;
use crate::index::{Metadata, VectorMatch, VectorNamespaces};

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: [UpsertVector<'a>; 1],
    namespace: &'a str,
}

#[derive(Serialize)]
struct UpsertVector<'a> {
    id: &'a str,
    values: Vec<f32>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    metadata: Metadata,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    namespace: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<&'a Metadata>,
    include_values: bool,
    include_metadata: bool,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<VectorMatch>,
}

/// [`VectorNamespaces`] over a hosted Pinecone index.
#[derive(Debug, Clone)]
pub struct PineconeNamespaces {
    host: String,
    api_key: String,
    http_client: reqwest::Client,
}

impl PineconeNamespaces {
    /// `host` is the index host, with or without scheme.
    pub fn new(host: &str, api_key: impl Into<String>) -> Result<Self, VectorError> {
        let host = host.trim_end_matches('/');
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{host}")
        };
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            host,
            api_key: api_key.into(),
            http_client,
        })
    }

    async fn post<B: Serialize>(&self, route: &str, body: &B) -> Result<reqwest::Response, VectorError> {
        let response = self
            .http_client
            .post(format!("{}{}", self.host, route))
            .header("Api-Key", &self.api_key)
            .json(body)
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
        Ok(response)
    }
}

#[async_trait]
impl VectorNamespaces for PineconeNamespaces {
    async fn upsert(
        &self,
        namespace: &str,
        id: &str,
        values: Vec<f32>,
        metadata: Metadata,
    ) -> Result<(), VectorError> {
        let body = UpsertRequest {
            vectors: [UpsertVector {
                id,
                values,
                metadata,
            }],
            namespace,
        };
        self.post("/vectors/upsert", &body).await?;
        debug!(namespace, id, "Upserted vector");
        Ok(())
    }

    async fn query_top_k(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<VectorMatch>, VectorError> {
        let body = QueryRequest {
            vector,
            top_k,
            namespace,
            filter: filter.filter(|f| !f.is_empty()),
            include_values: false,
            include_metadata: false,
        };
        let response: QueryResponse = self
            .post("/query", &body)
            .await?
            .json()
            .await
            .map_err(|e| VectorError::MalformedResponse(e.to_string()))?;
        Ok(response.matches)
    }
}
