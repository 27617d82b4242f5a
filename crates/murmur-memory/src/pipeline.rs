//! Per-message memory pipeline.
//!
//! Runs once per inbound utterance in its own task: gate, archive the raw
//! message, classify, route. Only a failed raw archive stops the pipeline;
//! everything after it degrades.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use murmur_core::config::MemoryConfig;
use murmur_core::types::InboundMessage;
use murmur_storage::{GroupSettings, GroupSettingsRepository, MessageRef, MessageStore};

use crate::classifier::{Classification, MemoryClassifier};
use crate::error::MemoryError;
use crate::llm::CompletionService;
use crate::router::{ArchivedMessage, MemoryBackends, MemoryRouter, RouteOutcome};

/// Why a message was not archived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    TooShort,
    Command,
    ArchivalDisabled,
}

#[derive(Debug)]
pub enum PipelineOutcome {
    Skipped(SkipReason),
    /// The raw message could not be archived; nothing else was attempted.
    Failed(MemoryError),
    Routed {
        message_ref: MessageRef,
        classification: Classification,
        route: RouteOutcome,
    },
}

impl PipelineOutcome {
    pub fn route(&self) -> Option<&RouteOutcome> {
        match self {
            PipelineOutcome::Routed { route, .. } => Some(route),
            _ => None,
        }
    }
}

pub struct MemoryPipeline {
    classifier: MemoryClassifier,
    router: MemoryRouter,
    messages: Arc<dyn MessageStore>,
    settings: Arc<GroupSettingsRepository>,
    min_content_chars: usize,
    command_prefix: String,
}

impl MemoryPipeline {
    pub fn new(
        backends: MemoryBackends,
        settings: Arc<GroupSettingsRepository>,
        completion: Arc<dyn CompletionService>,
        config: &MemoryConfig,
    ) -> Self {
        let classifier = MemoryClassifier::new(
            completion,
            Duration::from_secs(config.classify_timeout_secs),
        );
        let messages = Arc::clone(&backends.messages);
        Self {
            classifier,
            router: MemoryRouter::new(backends, config),
            messages,
            settings,
            min_content_chars: config.min_content_chars,
            command_prefix: config.command_prefix.clone(),
        }
    }

    pub fn router(&self) -> &MemoryRouter {
        &self.router
    }

    /// Process `message` in the background. The caller may drop the handle.
    pub fn classify_and_route(self: &Arc<Self>, message: InboundMessage) -> JoinHandle<PipelineOutcome> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move { pipeline.process(message).await })
    }

    pub async fn process(&self, message: InboundMessage) -> PipelineOutcome {
        let settings = self.group_settings(message.group_id);
        if let Some(reason) = self.gate(&message, settings) {
            debug!(group_id = message.group_id, reason = ?reason, "Message not archived");
            return PipelineOutcome::Skipped(reason);
        }

        let message_ref = match self.messages.save_raw_message(&message) {
            Ok(message_ref) => message_ref,
            Err(e) => {
                warn!(group_id = message.group_id, error = %e, "Failed to archive raw message");
                return PipelineOutcome::Failed(MemoryError::RawPersistence(e.to_string()));
            }
        };

        let classification = self.classifier.classify(&message.content).await;
        if classification.proactive_reason().is_some() && !settings.is_active {
            debug!(group_id = message.group_id, "Group inactive; follow-up suppressed");
        }

        let archived = ArchivedMessage {
            message_ref,
            message,
        };
        let route = self
            .router
            .route(&classification, &archived, settings.is_active)
            .await;

        info!(
            message_ref,
            tier = %classification.tier(),
            fallback = classification.is_fallback(),
            follow_up = route.follow_up.is_some(),
            errors = route.errors.len(),
            "Message routed"
        );
        PipelineOutcome::Routed {
            message_ref,
            classification,
            route,
        }
    }

    fn gate(&self, message: &InboundMessage, settings: GroupSettings) -> Option<SkipReason> {
        let content = message.content.trim();
        if !self.command_prefix.is_empty() && content.starts_with(&self.command_prefix) {
            return Some(SkipReason::Command);
        }
        if content.chars().count() < self.min_content_chars {
            return Some(SkipReason::TooShort);
        }
        if !settings.rag_enabled {
            return Some(SkipReason::ArchivalDisabled);
        }
        None
    }

    fn group_settings(&self, group_id: i64) -> GroupSettings {
        self.settings.get(group_id).unwrap_or_else(|e| {
            warn!(group_id, error = %e, "Failed to read group settings; using defaults");
            GroupSettings::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedCompletion;
    use murmur_core::clock::ManualClock;
    use murmur_scheduler::{CronEngine, PeriodicRegistry, RecordingNotifier, TaskFilter, TaskStore};
    use murmur_storage::{Database, MemoryStore, SqliteMessageStore};
    use murmur_vector::{InMemoryNamespaces, MockEmbedding};

    struct Fixture {
        pipeline: Arc<MemoryPipeline>,
        messages: Arc<SqliteMessageStore>,
        settings: Arc<GroupSettingsRepository>,
        tasks: Arc<TaskStore>,
    }

    fn fixture(reply: &str) -> Fixture {
        let db = Arc::new(Database::in_memory().unwrap());
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::at_timestamp(1_700_000_000));
        let messages = Arc::new(SqliteMessageStore::new(Arc::clone(&db)));
        let settings = Arc::new(GroupSettingsRepository::new(db));
        let tasks = Arc::new(TaskStore::new(
            store.clone(),
            Arc::new(PeriodicRegistry::new(Arc::new(CronEngine::new()))),
            Arc::new(RecordingNotifier::new()),
            clock.clone(),
            "",
        ));
        let backends = MemoryBackends {
            store,
            embedder: Arc::new(MockEmbedding::new()),
            namespaces: Arc::new(InMemoryNamespaces::new()),
            messages: messages.clone(),
            tasks: Arc::clone(&tasks),
            clock,
        };
        let pipeline = MemoryPipeline::new(
            backends,
            Arc::clone(&settings),
            Arc::new(ScriptedCompletion::replying(reply)),
            &MemoryConfig::default(),
        );
        Fixture {
            pipeline: Arc::new(pipeline),
            messages,
            settings,
            tasks,
        }
    }

    fn message(content: &str) -> InboundMessage {
        InboundMessage {
            group_id: 1001,
            user_ref: "42".to_string(),
            nickname: "小明".to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_gate_skips_short_and_commands() {
        let f = fixture("chat|false|");
        let short = f.pipeline.process(message("  好的 ")).await;
        assert!(matches!(short, PipelineOutcome::Skipped(SkipReason::TooShort)));

        let command = f.pipeline.process(message("/remind 明天开会")).await;
        assert!(matches!(command, PipelineOutcome::Skipped(SkipReason::Command)));

        assert_eq!(f.messages.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_archival_disabled_group_is_skipped() {
        let f = fixture("chat|false|");
        let switches = crate::switches::GroupSwitches::new(Arc::clone(&f.settings));
        assert!(switches.set_rag_enabled(1001, false).success);
        let outcome = f.pipeline.process(message("今天加班到很晚了")).await;
        assert!(matches!(outcome, PipelineOutcome::Skipped(SkipReason::ArchivalDisabled)));
        assert_eq!(f.messages.count().unwrap(), 0);

        assert!(switches.set_rag_enabled(1001, true).success);
        let outcome = f.pipeline.process(message("今天加班到很晚了")).await;
        assert!(outcome.route().is_some());
        assert_eq!(f.messages.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_personal_message_is_archived_and_indexed() {
        let f = fixture("personal|false|");
        let outcome = f
            .pipeline
            .classify_and_route(message("我是一名护士，经常上夜班"))
            .await
            .unwrap();

        let PipelineOutcome::Routed {
            message_ref,
            classification,
            route,
        } = outcome
        else {
            panic!("expected routed outcome");
        };
        assert_eq!(classification.tier(), murmur_core::types::MemoryTier::Personal);
        assert_eq!(route.stored_as, Some(format!("msg_{message_ref}")));
        assert_eq!(
            f.messages.find_content(message_ref).unwrap().as_deref(),
            Some("我是一名护士，经常上夜班")
        );
    }

    #[tokio::test]
    async fn test_inactive_group_suppresses_follow_up() {
        let f = fixture("temporary|true|考试紧张");
        f.settings.set_active(1001, false).unwrap();
        let outcome = f.pipeline.process(message("明天考试好紧张啊")).await;

        let route = outcome.route().unwrap();
        assert!(route.follow_up.is_none());
        assert!(route.stored_as.is_some());
        assert!(f.tasks.list_tasks(TaskFilter::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_active_group_schedules_follow_up() {
        let f = fixture("temporary|true|考试紧张");
        let outcome = f.pipeline.process(message("明天考试好紧张啊")).await;
        assert!(outcome.route().unwrap().follow_up.is_some());
        assert_eq!(f.tasks.list_tasks(TaskFilter::all()).await.unwrap().len(), 1);
    }
}
