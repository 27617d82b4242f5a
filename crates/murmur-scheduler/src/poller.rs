//! One-shot poller.
//!
//! Every tick reads the ids whose target time has passed from the due-index,
//! delivers each, and then deletes its index entry and content whatever the
//! delivery outcome was. Proactive follow-ups have their text regenerated
//! through a [`FollowUpComposer`] at delivery time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use murmur_core::clock::SharedClock;
use murmur_core::types::Destination;
use murmur_storage::SharedStore;

use crate::error::SchedulerError;
use crate::notifier::Notifier;
use crate::task::{parse_task, ONESHOT_DATA_KEY, ONESHOT_INDEX_KEY};
use crate::types::ScheduledTask;

/// Stored content of a proactive task: `reason|original message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowUpPayload {
    pub reason: String,
    pub original: String,
}

impl FollowUpPayload {
    pub fn parse(content: &str) -> Self {
        match content.split_once('|') {
            Some((reason, original)) => Self {
                reason: reason.to_string(),
                original: original.to_string(),
            },
            None => Self {
                reason: String::new(),
                original: content.to_string(),
            },
        }
    }

    pub fn encode(&self) -> String {
        format!("{}|{}", self.reason, self.original)
    }
}

/// Writes the text of a proactive follow-up when it comes due.
#[async_trait]
pub trait FollowUpComposer: Send + Sync {
    async fn compose_follow_up(
        &self,
        payload: &FollowUpPayload,
        destination: Destination,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>>;
}

/// Counts from one poll tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub delivered: usize,
    pub failed: usize,
    /// Index entries whose content was already gone.
    pub stale: usize,
    /// Content that could not be decoded.
    pub malformed: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct OneShotPoller {
    store: SharedStore,
    notifier: Arc<dyn Notifier>,
    composer: Option<Arc<dyn FollowUpComposer>>,
    clock: SharedClock,
    interval: Duration,
    fallback_message: String,
    follow_up_timeout: Duration,
    shutdown: Arc<Notify>,
}

impl OneShotPoller {
    pub fn new(
        store: SharedStore,
        notifier: Arc<dyn Notifier>,
        clock: SharedClock,
        interval: Duration,
        fallback_message: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            composer: None,
            clock,
            interval,
            fallback_message: fallback_message.into(),
            follow_up_timeout: Duration::from_secs(30),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn with_composer(mut self, composer: Arc<dyn FollowUpComposer>) -> Self {
        self.composer = Some(composer);
        self
    }

    pub fn with_follow_up_timeout(mut self, timeout: Duration) -> Self {
        self.follow_up_timeout = timeout;
        self
    }

    /// Handle for stopping [`OneShotPoller::run`].
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Poll until the shutdown handle is notified.
    pub async fn run(&self) {
        info!(interval_secs = self.interval.as_secs(), "One-shot poller started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(report) if !report.is_empty() => {
                            info!(
                                delivered = report.delivered,
                                failed = report.failed,
                                stale = report.stale,
                                malformed = report.malformed,
                                "One-shot sweep finished"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "One-shot sweep failed"),
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("One-shot poller shutting down");
                    break;
                }
            }
        }
    }

    /// Deliver everything due at the clock's current time.
    ///
    /// Each task is claimed by removing its index entry before anything is
    /// sent. A task whose claim is lost to another poller is skipped, and a
    /// store failure after the claim drops the task rather than risk sending
    /// it twice.
    pub async fn sweep(&self) -> Result<SweepReport, SchedulerError> {
        let now = self.clock.timestamp();
        let due = self
            .store
            .zrange_by_score(ONESHOT_INDEX_KEY, i64::MIN, now.0)
            .await?;
        let mut report = SweepReport::default();

        for task_id in due {
            match self.store.zrem(ONESHOT_INDEX_KEY, &task_id).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(task_id = %task_id, "Due entry already claimed");
                    continue;
                }
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "Could not claim due one-shot task");
                    report.failed += 1;
                    continue;
                }
            }

            let raw = match self.store.hget(ONESHOT_DATA_KEY, &task_id).await {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    debug!(task_id = %task_id, "Due entry has no content, dropping");
                    report.stale += 1;
                    continue;
                }
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "Claimed one-shot task unreadable, dropping");
                    report.failed += 1;
                    continue;
                }
            };
            if let Err(e) = self.store.hdel(ONESHOT_DATA_KEY, &task_id).await {
                warn!(task_id = %task_id, error = %e, "Could not delete one-shot content");
            }

            let Some(task) = parse_task(&task_id, &raw) else {
                report.malformed += 1;
                continue;
            };
            let text = self.resolve_text(&task).await;
            match self.notifier.deliver(task.destination, &text).await {
                Ok(()) => {
                    info!(task_id = %task_id, destination = %task.destination, "One-shot reminder delivered");
                    report.delivered += 1;
                }
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "One-shot reminder delivery failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn resolve_text(&self, task: &ScheduledTask) -> String {
        if !task.is_proactive() {
            return task.content.clone();
        }
        let Some(composer) = &self.composer else {
            return self.fallback_message.clone();
        };

        let payload = FollowUpPayload::parse(&task.content);
        let composed = tokio::time::timeout(
            self.follow_up_timeout,
            composer.compose_follow_up(&payload, task.destination),
        )
        .await;
        match composed {
            Ok(Ok(text)) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(Ok(_)) => {
                warn!(task_id = %task.id, "Follow-up composer returned nothing, using fallback");
                self.fallback_message.clone()
            }
            Ok(Err(e)) => {
                warn!(task_id = %task.id, error = %e, "Follow-up composition failed, using fallback");
                self.fallback_message.clone()
            }
            Err(_) => {
                warn!(task_id = %task.id, "Follow-up composition timed out, using fallback");
                self.fallback_message.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotifyError;
    use crate::notifier::RecordingNotifier;
    use murmur_core::clock::ManualClock;
    use murmur_core::types::Timestamp;
    use murmur_storage::{DurableStore, MemoryStore};

    const FALLBACK: &str = "记得你说今天有事，一切还顺利吗？";

    struct EchoComposer;

    #[async_trait]
    impl FollowUpComposer for EchoComposer {
        async fn compose_follow_up(
            &self,
            payload: &FollowUpPayload,
            _destination: Destination,
        ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
            Ok(format!("关于{}：{}", payload.reason, payload.original))
        }
    }

    struct BrokenComposer;

    #[async_trait]
    impl FollowUpComposer for BrokenComposer {
        async fn compose_follow_up(
            &self,
            _payload: &FollowUpPayload,
            _destination: Destination,
        ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
            Err("model unavailable".into())
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryStore::new()),
                notifier: Arc::new(RecordingNotifier::new()),
                clock: Arc::new(ManualClock::at_timestamp(1_000)),
            }
        }

        fn poller(&self) -> OneShotPoller {
            OneShotPoller::new(
                self.store.clone(),
                self.notifier.clone(),
                self.clock.clone(),
                Duration::from_secs(5),
                FALLBACK,
            )
        }

        async fn put(&self, task: &ScheduledTask) {
            let json = serde_json::to_string(task).unwrap();
            self.store.hset(ONESHOT_DATA_KEY, &task.id, &json).await.unwrap();
            self.store
                .zadd(ONESHOT_INDEX_KEY, &task.id, task.target_at().unwrap().0)
                .await
                .unwrap();
        }
    }

    #[test]
    fn test_payload_parse() {
        let payload = FollowUpPayload::parse("面试|明天下午两点面试");
        assert_eq!(payload.reason, "面试");
        assert_eq!(payload.original, "明天下午两点面试");
        assert_eq!(payload.encode(), "面试|明天下午两点面试");

        let payload = FollowUpPayload::parse("a|b|c");
        assert_eq!(payload.original, "b|c");

        let payload = FollowUpPayload::parse("没有分隔符");
        assert!(payload.reason.is_empty());
        assert_eq!(payload.original, "没有分隔符");
    }

    #[tokio::test]
    async fn test_sweep_delivers_only_due_tasks() {
        let f = Fixture::new();
        let due = ScheduledTask::once("该喝水了", Destination::new(1001, 42), Timestamp(1_000))
            .with_id("task_1_42");
        let later = ScheduledTask::once("还没到", Destination::new(1001, 42), Timestamp(1_001))
            .with_id("task_2_42");
        f.put(&due).await;
        f.put(&later).await;

        let report = f.poller().sweep().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(
            f.notifier.sent(),
            vec![(Destination::new(1001, 42), "该喝水了".to_string())]
        );
        assert!(f.store.hget(ONESHOT_DATA_KEY, "task_1_42").await.unwrap().is_none());
        assert!(f.store.hget(ONESHOT_DATA_KEY, "task_2_42").await.unwrap().is_some());

        f.clock.advance(chrono::Duration::seconds(1));
        let report = f.poller().sweep().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(f.notifier.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_delivery_still_removes_task() {
        let f = Fixture::new();
        f.put(&ScheduledTask::once("x", Destination::new(1, 2), Timestamp(10)).with_id("t1"))
            .await;
        f.notifier.set_failing(true);

        let report = f.poller().sweep().await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(f.store.zrange_by_score(ONESHOT_INDEX_KEY, 0, i64::MAX).await.unwrap().is_empty());
        assert!(f.store.hgetall(ONESHOT_DATA_KEY).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_and_malformed_entries_are_dropped() {
        let f = Fixture::new();
        f.store.zadd(ONESHOT_INDEX_KEY, "ghost", 5).await.unwrap();
        f.store.zadd(ONESHOT_INDEX_KEY, "junk", 6).await.unwrap();
        f.store.hset(ONESHOT_DATA_KEY, "junk", "not json").await.unwrap();

        let report = f.poller().sweep().await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                delivered: 0,
                failed: 0,
                stale: 1,
                malformed: 1
            }
        );
        assert!(f.notifier.sent().is_empty());
        assert!(f.store.zrange_by_score(ONESHOT_INDEX_KEY, 0, i64::MAX).await.unwrap().is_empty());
        assert!(f.store.hgetall(ONESHOT_DATA_KEY).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_proactive_uses_composer() {
        let f = Fixture::new();
        f.put(
            &ScheduledTask::once("面试|明天面试", Destination::new(1001, 42), Timestamp(1))
                .with_id("proactive_1"),
        )
        .await;

        let poller = f.poller().with_composer(Arc::new(EchoComposer));
        poller.sweep().await.unwrap();
        assert_eq!(f.notifier.sent()[0].1, "关于面试：明天面试");
    }

    #[tokio::test]
    async fn test_proactive_falls_back_on_composer_error() {
        let f = Fixture::new();
        f.put(
            &ScheduledTask::once("面试|明天面试", Destination::new(1001, 42), Timestamp(1))
                .with_id("proactive_2"),
        )
        .await;

        let poller = f.poller().with_composer(Arc::new(BrokenComposer));
        poller.sweep().await.unwrap();
        assert_eq!(f.notifier.sent()[0].1, FALLBACK);
    }

    #[tokio::test]
    async fn test_proactive_without_composer_uses_fallback() {
        let f = Fixture::new();
        f.put(
            &ScheduledTask::once("r|c", Destination::new(1, 2), Timestamp(1)).with_id("proactive_3"),
        )
        .await;
        f.poller().sweep().await.unwrap();
        assert_eq!(f.notifier.sent()[0].1, FALLBACK);
    }

    #[tokio::test]
    async fn test_sweep_with_store_down_errors() {
        let f = Fixture::new();
        f.store.set_online(false);
        assert!(matches!(
            f.poller().sweep().await,
            Err(SchedulerError::StoreUnavailable(_))
        ));
    }

    /// Records a delivery, then takes the store offline.
    struct OutageAfterDelivery {
        store: Arc<MemoryStore>,
        inner: RecordingNotifier,
    }

    #[async_trait]
    impl Notifier for OutageAfterDelivery {
        async fn deliver(&self, destination: Destination, text: &str) -> Result<(), NotifyError> {
            self.inner.deliver(destination, text).await?;
            self.store.set_online(false);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_store_outage_after_delivery_does_not_redeliver() {
        let f = Fixture::new();
        f.put(&ScheduledTask::once("开会", Destination::new(1001, 42), Timestamp(900)).with_id("t1"))
            .await;
        let notifier = Arc::new(OutageAfterDelivery {
            store: f.store.clone(),
            inner: RecordingNotifier::new(),
        });
        let poller = OneShotPoller::new(
            f.store.clone(),
            notifier.clone(),
            f.clock.clone(),
            Duration::from_secs(5),
            FALLBACK,
        );

        let report = poller.sweep().await.unwrap();
        assert_eq!(report.delivered, 1);

        f.store.set_online(true);
        f.clock.advance(chrono::Duration::seconds(5));
        let report = poller.sweep().await.unwrap();
        assert!(report.is_empty());
        assert_eq!(notifier.inner.sent().len(), 1);
        assert!(f.store.hgetall(ONESHOT_DATA_KEY).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_picks_up_negative_scores() {
        let f = Fixture::new();
        f.store.zadd(ONESHOT_INDEX_KEY, "old", -30).await.unwrap();
        f.store
            .hset(
                ONESHOT_DATA_KEY,
                "old",
                &serde_json::to_string(
                    &ScheduledTask::once("很久以前", Destination::new(1, 2), Timestamp(-30))
                        .with_id("old"),
                )
                .unwrap(),
            )
            .await
            .unwrap();

        let report = f.poller().sweep().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert!(f
            .store
            .zrange_by_score(ONESHOT_INDEX_KEY, i64::MIN, i64::MAX)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = Fixture::new();
        let poller = Arc::new(f.poller());
        let shutdown = poller.shutdown_handle();
        let runner = Arc::clone(&poller);
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.notify_one();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("poller should stop")
            .unwrap();
    }
}
