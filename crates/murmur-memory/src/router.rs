//! Memory router.
//!
//! Sends a classified utterance to its store: temporary memories to the TTL
//! cache, long-term memories to their vector namespace plus an association
//! record for hydration. A proactive signal schedules a one-shot follow-up
//! regardless of tier. Failures are logged and reported in the
//! [`RouteOutcome`], never returned.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use murmur_core::clock::SharedClock;
use murmur_core::config::MemoryConfig;
use murmur_core::types::{InboundMessage, MemoryTier};
use murmur_scheduler::types::PROACTIVE_ID_PREFIX;
use murmur_scheduler::{FollowUpPayload, ScheduledTask, TaskStore};
use murmur_storage::{MessageRef, MessageStore, SharedStore};
use murmur_vector::{DynEmbeddingService, EmbedMode, Metadata, VectorNamespaces};

use crate::classifier::Classification;
use crate::error::MemoryError;
use crate::temporary::TemporaryMemory;

/// Collaborators shared by the router, the retrieval composer, and the pipeline.
#[derive(Clone)]
pub struct MemoryBackends {
    pub store: SharedStore,
    pub embedder: Arc<dyn DynEmbeddingService>,
    pub namespaces: Arc<dyn VectorNamespaces>,
    pub messages: Arc<dyn MessageStore>,
    pub tasks: Arc<TaskStore>,
    pub clock: SharedClock,
}

/// An utterance that has been written to the raw archive.
#[derive(Debug, Clone)]
pub struct ArchivedMessage {
    pub message_ref: MessageRef,
    pub message: InboundMessage,
}

/// What routing did with one utterance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteOutcome {
    /// Cache key or vector id the content was written under.
    pub stored_as: Option<String>,
    /// Id of the scheduled follow-up task.
    pub follow_up: Option<String>,
    pub errors: Vec<String>,
}

pub struct MemoryRouter {
    backends: MemoryBackends,
    temporary: TemporaryMemory,
    proactive_delay_secs: i64,
    storage_timeout: Duration,
}

impl MemoryRouter {
    pub fn new(backends: MemoryBackends, config: &MemoryConfig) -> Self {
        let temporary = TemporaryMemory::new(
            Arc::clone(&backends.store),
            Duration::from_secs(config.temporary_ttl_secs),
        );
        Self {
            backends,
            temporary,
            proactive_delay_secs: config.proactive_delay_secs,
            storage_timeout: Duration::from_secs(config.storage_timeout_secs),
        }
    }

    pub fn temporary(&self) -> &TemporaryMemory {
        &self.temporary
    }

    /// Store the utterance by tier and, when asked for and allowed,
    /// schedule its follow-up.
    pub async fn route(
        &self,
        classification: &Classification,
        archived: &ArchivedMessage,
        follow_up_allowed: bool,
    ) -> RouteOutcome {
        let reason = classification
            .proactive_reason()
            .filter(|_| follow_up_allowed);

        let (stored, follow_up) = tokio::join!(
            self.bounded(self.store(classification.tier(), archived)),
            async {
                match reason {
                    Some(reason) => Some(self.bounded(self.schedule_follow_up(reason, archived)).await),
                    None => None,
                }
            }
        );

        let mut outcome = RouteOutcome::default();
        match stored {
            Ok(key) => outcome.stored_as = Some(key),
            Err(e) => {
                warn!(
                    message_ref = archived.message_ref,
                    tier = %classification.tier(),
                    error = %e,
                    "Failed to store memory"
                );
                outcome.errors.push(e.to_string());
            }
        }
        match follow_up {
            Some(Ok(task_id)) => outcome.follow_up = Some(task_id),
            Some(Err(e)) => {
                warn!(message_ref = archived.message_ref, error = %e, "Failed to schedule follow-up");
                outcome.errors.push(e.to_string());
            }
            None => {}
        }
        outcome
    }

    async fn store(&self, tier: MemoryTier, archived: &ArchivedMessage) -> Result<String, MemoryError> {
        let message = &archived.message;
        let Some(namespace) = tier.namespace() else {
            let key = self
                .temporary
                .save(
                    message.group_id,
                    &message.user_ref,
                    archived.message_ref,
                    &message.content,
                )
                .await?;
            info!(message_ref = archived.message_ref, "Archived to temporary cache");
            return Ok(key);
        };

        let vector = self
            .backends
            .embedder
            .embed_boxed(&message.content, EmbedMode::Passage)
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;

        let vector_id = vector_id(archived.message_ref);
        let mut metadata = Metadata::new();
        metadata.insert("group_id".to_string(), json!(message.group_id));
        metadata.insert("user_id".to_string(), json!(message.user_id()));
        metadata.insert(
            "created_at".to_string(),
            json!(self.backends.clock.timestamp().0),
        );

        self.backends
            .namespaces
            .upsert(namespace, &vector_id, vector, metadata)
            .await?;
        self.backends
            .messages
            .link_vector(&vector_id, archived.message_ref, &message.content)
            .map_err(|e| MemoryError::Association(e.to_string()))?;

        info!(
            message_ref = archived.message_ref,
            namespace,
            vector_id = %vector_id,
            "Archived to vector namespace"
        );
        Ok(vector_id)
    }

    async fn schedule_follow_up(
        &self,
        reason: &str,
        archived: &ArchivedMessage,
    ) -> Result<String, MemoryError> {
        let payload = FollowUpPayload {
            reason: reason.to_string(),
            original: archived.message.content.clone(),
        };
        let target_at = self
            .backends
            .clock
            .timestamp()
            .plus_secs(self.proactive_delay_secs);
        let task = ScheduledTask::once(payload.encode(), archived.message.destination(), target_at)
            .with_id(format!("{PROACTIVE_ID_PREFIX}{}", Uuid::new_v4().simple()));

        let stored = self.backends.tasks.add_task(task).await?;
        info!(task_id = %stored.id, reason, target_at = target_at.0, "Proactive follow-up scheduled");
        Ok(stored.id)
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, MemoryError>>,
    ) -> Result<T, MemoryError> {
        tokio::time::timeout(self.storage_timeout, fut)
            .await
            .unwrap_or(Err(MemoryError::Timeout(self.storage_timeout.as_secs())))
    }
}

pub fn vector_id(message_ref: MessageRef) -> String {
    format!("msg_{message_ref}")
}
