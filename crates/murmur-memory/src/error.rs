//! Error types for the memory pipeline.

use murmur_core::error::MurmurError;
use murmur_scheduler::SchedulerError;
use murmur_storage::StoreError;
use murmur_vector::VectorError;

/// Errors from the completion service.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Completion request failed: {0}")]
    Request(String),
    #[error("Completion API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Malformed completion response: {0}")]
    MalformedResponse(String),
    #[error("Completion was empty")]
    EmptyCompletion,
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Request(err.to_string())
    }
}

/// Errors from routing and archiving a message.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("Raw message could not be archived: {0}")]
    RawPersistence(String),
    #[error("Embedding failed: {0}")]
    Embedding(String),
    #[error("Vector write failed: {0}")]
    Vector(String),
    #[error("Temporary cache write failed: {0}")]
    Cache(String),
    #[error("Association record failed: {0}")]
    Association(String),
    #[error("Follow-up scheduling failed: {0}")]
    Scheduling(String),
    #[error("Storage call timed out after {0}s")]
    Timeout(u64),
}

impl From<StoreError> for MemoryError {
    fn from(err: StoreError) -> Self {
        MemoryError::Cache(err.to_string())
    }
}

impl From<SchedulerError> for MemoryError {
    fn from(err: SchedulerError) -> Self {
        MemoryError::Scheduling(err.to_string())
    }
}

impl From<VectorError> for MemoryError {
    fn from(err: VectorError) -> Self {
        MemoryError::Vector(err.to_string())
    }
}

impl From<MemoryError> for MurmurError {
    fn from(err: MemoryError) -> Self {
        MurmurError::Memory(err.to_string())
    }
}
