//! Error types for embedding and vector services.

use murmur_core::error::MurmurError;

#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    #[error("Cannot embed empty text")]
    EmptyInput,
    #[error("Request failed: {0}")]
    Request(String),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error("Index error: {0}")]
    Index(String),
}

impl From<reqwest::Error> for VectorError {
    fn from(err: reqwest::Error) -> Self {
        VectorError::Request(err.to_string())
    }
}

impl From<VectorError> for MurmurError {
    fn from(err: VectorError) -> Self {
        MurmurError::Vector(err.to_string())
    }
}
