//! Retrieval composer.
//!
//! Answers a live query from the long-term namespaces: both are searched in
//! parallel, hits are hydrated back to text, merged by score and annotated
//! with confidence and scene hints for the reply prompt. Any failure along
//! the way yields fewer memories, never an error.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use murmur_core::config::RetrievalConfig;
use murmur_core::types::{MemoryTier, Timestamp};
use murmur_vector::{EmbedMode, Metadata, VectorMatch};

use crate::router::MemoryBackends;

/// Equality filter applied to both namespace queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetrievalFilter {
    pub group_id: Option<i64>,
    pub user_id: Option<i64>,
}

impl RetrievalFilter {
    pub fn group(group_id: i64) -> Self {
        Self {
            group_id: Some(group_id),
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    fn to_metadata(self) -> Option<Metadata> {
        let mut metadata = Metadata::new();
        if let Some(group_id) = self.group_id {
            metadata.insert("group_id".to_string(), json!(group_id));
        }
        if let Some(user_id) = self.user_id {
            metadata.insert("user_id".to_string(), json!(user_id));
        }
        (!metadata.is_empty()).then_some(metadata)
    }
}

/// One recalled long-term memory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Memory {
    pub namespace: &'static str,
    pub vector_id: String,
    pub score: f32,
    pub content: String,
    pub created_at: Timestamp,
    /// "刚刚", "3小时", "2024-05-01" and so on.
    pub age_label: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SceneHints {
    /// Recalled text mentions code or errors.
    pub technical: bool,
    /// A strongly matching personal memory was recalled.
    pub personal: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Retrieval {
    /// Highest score first.
    pub memories: Vec<Memory>,
    pub high_confidence: bool,
    pub low_confidence: bool,
    pub scene: SceneHints,
}

impl Retrieval {
    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }

    pub fn max_score(&self) -> Option<f32> {
        self.memories.first().map(|m| m.score)
    }

    /// Memories as prompt lines, e.g. `- [personal, 3天前] 我是医生`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for memory in &self.memories {
            let age = if memory.age_label == "刚刚" || memory.age_label.contains('-') {
                memory.age_label.clone()
            } else {
                format!("{}前", memory.age_label)
            };
            let _ = writeln!(out, "- [{}, {}] {}", memory.namespace, age, memory.content);
        }
        out
    }
}

pub struct RetrievalComposer {
    backends: MemoryBackends,
    config: RetrievalConfig,
}

impl RetrievalComposer {
    pub fn new(backends: MemoryBackends, config: RetrievalConfig) -> Self {
        Self { backends, config }
    }

    pub async fn retrieve(&self, query: &str, filter: RetrievalFilter) -> Retrieval {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        match tokio::time::timeout(timeout, self.gather(query, filter)).await {
            Ok(retrieval) => retrieval,
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "Retrieval timed out");
                Retrieval::default()
            }
        }
    }

    async fn gather(&self, query: &str, filter: RetrievalFilter) -> Retrieval {
        if query.trim().is_empty() {
            return Retrieval::default();
        }
        let vector = match self
            .backends
            .embedder
            .embed_boxed(query, EmbedMode::Query)
            .await
        {
            Ok(vector) => vector,
            Err(e) => {
                warn!(error = %e, "Query embedding failed");
                return Retrieval::default();
            }
        };

        let metadata = filter.to_metadata();
        let [personal, chat] = MemoryTier::LONG_TERM.map(|tier| tier.namespace().unwrap_or_default());
        let (personal_hits, chat_hits) = tokio::join!(
            self.search(personal, &vector, metadata.as_ref()),
            self.search(chat, &vector, metadata.as_ref()),
        );

        let hits: Vec<(&'static str, VectorMatch)> = personal_hits
            .into_iter()
            .map(|hit| (personal, hit))
            .chain(chat_hits.into_iter().map(|hit| (chat, hit)))
            .collect();
        let memories = self.hydrate(hits);
        self.compose(memories)
    }

    async fn search(
        &self,
        namespace: &'static str,
        vector: &[f32],
        filter: Option<&Metadata>,
    ) -> Vec<VectorMatch> {
        match self
            .backends
            .namespaces
            .query_top_k(namespace, vector, self.config.top_k, filter)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(namespace, error = %e, "Namespace query failed");
                Vec::new()
            }
        }
    }

    fn hydrate(&self, hits: Vec<(&'static str, VectorMatch)>) -> Vec<Memory> {
        if hits.is_empty() {
            return Vec::new();
        }
        let ids: Vec<String> = hits.iter().map(|(_, hit)| hit.id.clone()).collect();
        let stored = match self.backends.messages.find_by_vector_ids(&ids) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Memory hydration failed");
                return Vec::new();
            }
        };
        let by_id: HashMap<String, _> = stored
            .into_iter()
            .map(|memory| (memory.vector_id.clone(), memory))
            .collect();

        let now = self.backends.clock.timestamp();
        hits.into_iter()
            .filter_map(|(namespace, hit)| {
                let stored = by_id.get(&hit.id)?;
                Some(Memory {
                    namespace,
                    vector_id: hit.id,
                    score: hit.score,
                    content: stored.content.clone(),
                    created_at: stored.created_at,
                    age_label: format_relative_age(stored.created_at, now),
                })
            })
            .collect()
    }

    fn compose(&self, mut memories: Vec<Memory>) -> Retrieval {
        // Stable: equal scores keep personal ahead of chat.
        memories.sort_by(|a, b| b.score.total_cmp(&a.score));
        memories.truncate(self.config.top_k);

        let max = memories.first().map(|m| m.score).unwrap_or(0.0);
        let technical = memories.iter().any(|memory| {
            let content = memory.content.to_lowercase();
            self.config
                .technical_keywords
                .iter()
                .any(|keyword| content.contains(keyword.as_str()))
        });
        let personal_namespace = MemoryTier::Personal.namespace();
        let personal = memories.iter().any(|memory| {
            Some(memory.namespace) == personal_namespace && memory.score > self.config.personal_scene
        });

        let retrieval = Retrieval {
            high_confidence: max > self.config.high_confidence,
            low_confidence: max > 0.0 && max < self.config.low_confidence,
            scene: SceneHints {
                technical,
                personal,
            },
            memories,
        };
        debug!(
            count = retrieval.memories.len(),
            max_score = max,
            high_confidence = retrieval.high_confidence,
            low_confidence = retrieval.low_confidence,
            "Retrieval composed"
        );
        retrieval
    }
}

/// Human label for how long ago `created` was.
pub fn format_relative_age(created: Timestamp, now: Timestamp) -> String {
    let age = created.age_secs(now);
    match age {
        a if a < 60 => "刚刚".to_string(),
        a if a < 3600 => format!("{}分钟", a / 60),
        a if a < 86_400 => format!("{}小时", a / 3600),
        a if a < 30 * 86_400 => format!("{}天", a / 86_400),
        _ => created
            .to_datetime()
            .with_timezone(&Local)
            .format("%Y-%m-%d")
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use murmur_core::clock::ManualClock;
    use murmur_core::types::InboundMessage;
    use murmur_scheduler::{CronEngine, PeriodicRegistry, RecordingNotifier, TaskStore};
    use murmur_storage::{Database, MemoryStore, MessageStore, SqliteMessageStore};
    use murmur_vector::{MockEmbedding, VectorError, VectorNamespaces};

    const NOW: i64 = 1_700_000_000;

    /// Returns canned hits per namespace whatever the query vector.
    struct FixedNamespaces {
        hits: HashMap<&'static str, Vec<VectorMatch>>,
        failing: bool,
    }

    #[async_trait]
    impl VectorNamespaces for FixedNamespaces {
        async fn upsert(
            &self,
            _namespace: &str,
            _id: &str,
            _values: Vec<f32>,
            _metadata: Metadata,
        ) -> Result<(), VectorError> {
            Ok(())
        }

        async fn query_top_k(
            &self,
            namespace: &str,
            _vector: &[f32],
            top_k: usize,
            _filter: Option<&Metadata>,
        ) -> Result<Vec<VectorMatch>, VectorError> {
            if self.failing && namespace == "chat" {
                return Err(VectorError::Index("chat index offline".to_string()));
            }
            let mut hits = self.hits.get(namespace).cloned().unwrap_or_default();
            hits.truncate(top_k);
            Ok(hits)
        }
    }

    fn hit(id: &str, score: f32) -> VectorMatch {
        VectorMatch {
            id: id.to_string(),
            score,
        }
    }

    /// Archives `contents` and links each to `msg_{ref}`; returns the ids.
    fn seed(messages: &SqliteMessageStore, contents: &[&str]) -> Vec<String> {
        contents
            .iter()
            .map(|content| {
                let message = InboundMessage {
                    group_id: 1001,
                    user_ref: "42".to_string(),
                    nickname: "小明".to_string(),
                    content: content.to_string(),
                };
                let message_ref = messages.save_raw_message(&message).unwrap();
                let vector_id = format!("msg_{message_ref}");
                messages.link_vector(&vector_id, message_ref, content).unwrap();
                vector_id
            })
            .collect()
    }

    fn composer(
        messages: Arc<SqliteMessageStore>,
        namespaces: FixedNamespaces,
        top_k: usize,
    ) -> RetrievalComposer {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::at_timestamp(NOW));
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
            namespaces: Arc::new(namespaces),
            messages,
            tasks,
            clock,
        };
        let config = RetrievalConfig {
            top_k,
            ..RetrievalConfig::default()
        };
        RetrievalComposer::new(backends, config)
    }

    fn messages() -> Arc<SqliteMessageStore> {
        Arc::new(SqliteMessageStore::new(Arc::new(Database::in_memory().unwrap())))
    }

    #[tokio::test]
    async fn test_merge_keeps_top_k_across_namespaces() {
        let messages = messages();
        let ids = seed(&messages, &["我是医生", "我养了猫", "昨天聊了电影", "周末去爬山"]);
        let namespaces = FixedNamespaces {
            hits: HashMap::from([
                ("personal", vec![hit(&ids[0], 0.9), hit(&ids[1], 0.6)]),
                ("chat", vec![hit(&ids[2], 0.95), hit(&ids[3], 0.5)]),
            ]),
            failing: false,
        };
        let retrieval = composer(messages, namespaces, 2)
            .retrieve("你还记得我吗", RetrievalFilter::group(1001))
            .await;

        let scores: Vec<f32> = retrieval.memories.iter().map(|m| m.score).collect();
        assert_eq!(scores, vec![0.95, 0.9]);
        assert_eq!(retrieval.memories[0].namespace, "chat");
        assert_eq!(retrieval.memories[0].content, "昨天聊了电影");
        assert_eq!(retrieval.memories[1].namespace, "personal");
        assert!(retrieval.high_confidence);
        assert!(!retrieval.low_confidence);
        assert!(retrieval.scene.personal);
    }

    #[tokio::test]
    async fn test_equal_scores_keep_personal_first() {
        let messages = messages();
        let ids = seed(&messages, &["个人", "闲聊"]);
        let namespaces = FixedNamespaces {
            hits: HashMap::from([
                ("personal", vec![hit(&ids[0], 0.8)]),
                ("chat", vec![hit(&ids[1], 0.8)]),
            ]),
            failing: false,
        };
        let retrieval = composer(messages, namespaces, 3)
            .retrieve("q", RetrievalFilter::default())
            .await;
        assert_eq!(retrieval.memories[0].namespace, "personal");
        assert_eq!(retrieval.memories[1].namespace, "chat");
    }

    #[tokio::test]
    async fn test_unknown_ids_are_dropped() {
        let messages = messages();
        let ids = seed(&messages, &["留下的"]);
        let namespaces = FixedNamespaces {
            hits: HashMap::from([("personal", vec![hit("msg_999", 0.99), hit(&ids[0], 0.4)])]),
            failing: false,
        };
        let retrieval = composer(messages, namespaces, 3)
            .retrieve("q", RetrievalFilter::default())
            .await;
        assert_eq!(retrieval.memories.len(), 1);
        assert_eq!(retrieval.memories[0].content, "留下的");
        assert!(retrieval.low_confidence);
        assert!(!retrieval.scene.personal);
    }

    #[tokio::test]
    async fn test_failed_namespace_degrades() {
        let messages = messages();
        let ids = seed(&messages, &["The API returned an ERR code"]);
        let namespaces = FixedNamespaces {
            hits: HashMap::from([
                ("personal", vec![hit(&ids[0], 0.7)]),
                ("chat", vec![hit("msg_1", 0.99)]),
            ]),
            failing: true,
        };
        let retrieval = composer(messages, namespaces, 3)
            .retrieve("q", RetrievalFilter::default())
            .await;
        assert_eq!(retrieval.memories.len(), 1);
        assert!(retrieval.scene.technical);
        // Exactly at the threshold is not a personal scene.
        assert!(!retrieval.scene.personal);
    }

    #[tokio::test]
    async fn test_empty_query_returns_nothing() {
        let namespaces = FixedNamespaces {
            hits: HashMap::new(),
            failing: false,
        };
        let retrieval = composer(messages(), namespaces, 3)
            .retrieve("   ", RetrievalFilter::default())
            .await;
        assert!(retrieval.is_empty());
        assert!(!retrieval.high_confidence);
        assert!(!retrieval.low_confidence);
    }

    #[test]
    fn test_filter_metadata() {
        assert!(RetrievalFilter::default().to_metadata().is_none());
        let metadata = RetrievalFilter::group(7).with_user(42).to_metadata().unwrap();
        assert_eq!(metadata["group_id"], json!(7));
        assert_eq!(metadata["user_id"], json!(42));
    }

    #[test]
    fn test_relative_age_labels() {
        let now = Timestamp(NOW);
        assert_eq!(format_relative_age(Timestamp(NOW - 30), now), "刚刚");
        assert_eq!(format_relative_age(Timestamp(NOW + 30), now), "刚刚");
        assert_eq!(format_relative_age(Timestamp(NOW - 5 * 60), now), "5分钟");
        assert_eq!(format_relative_age(Timestamp(NOW - 3 * 3600 - 59), now), "3小时");
        assert_eq!(format_relative_age(Timestamp(NOW - 29 * 86_400), now), "29天");

        let old = format_relative_age(Timestamp(NOW - 400 * 86_400), now);
        assert_eq!(old.len(), 10);
        assert!(old.starts_with("2022-"));
    }

    #[test]
    fn test_render_lines() {
        let memory = |label: &str| Memory {
            namespace: "personal",
            vector_id: "msg_1".to_string(),
            score: 0.9,
            content: "我是医生".to_string(),
            created_at: Timestamp(NOW),
            age_label: label.to_string(),
        };
        let retrieval = Retrieval {
            memories: vec![memory("3天"), memory("刚刚"), memory("2022-10-10")],
            ..Retrieval::default()
        };
        assert_eq!(
            retrieval.render(),
            "- [personal, 3天前] 我是医生\n- [personal, 刚刚] 我是医生\n- [personal, 2022-10-10] 我是医生\n"
        );
    }
}
