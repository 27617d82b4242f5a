//! Durable task store.
//!
//! Layout in the durable store:
//!
//! - `tasks:oneshot:schedule`: sorted set of one-shot ids scored by target time
//! - `tasks:oneshot:data`: hash of one-shot id to task JSON
//! - `tasks:periodic:data`: hash of periodic id to task JSON
//!
//! One-shot tasks are delivered by the [`OneShotPoller`](crate::poller::OneShotPoller).
//! Periodic tasks are additionally registered with the cron engine, which
//! is rebuilt from the periodic hash by [`TaskStore::reload_periodic_tasks`].

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use murmur_core::clock::SharedClock;
use murmur_core::types::Destination;
use murmur_storage::SharedStore;

use crate::cron::CronSchedule;
use crate::error::SchedulerError;
use crate::notifier::Notifier;
use crate::registry::PeriodicRegistry;
use crate::types::{Schedule, ScheduledTask, TaskFilter};

pub const ONESHOT_INDEX_KEY: &str = "tasks:oneshot:schedule";
pub const ONESHOT_DATA_KEY: &str = "tasks:oneshot:data";
pub const PERIODIC_DATA_KEY: &str = "tasks:periodic:data";

/// Outcome of rebuilding the periodic registry from the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadReport {
    pub loaded: usize,
    pub skipped: usize,
}

pub struct TaskStore {
    store: SharedStore,
    registry: Arc<PeriodicRegistry>,
    notifier: Arc<dyn Notifier>,
    clock: SharedClock,
    periodic_prefix: String,
    last_id_nanos: AtomicI64,
}

impl TaskStore {
    pub fn new(
        store: SharedStore,
        registry: Arc<PeriodicRegistry>,
        notifier: Arc<dyn Notifier>,
        clock: SharedClock,
        periodic_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            notifier,
            clock,
            periodic_prefix: periodic_prefix.into(),
            last_id_nanos: AtomicI64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<PeriodicRegistry> {
        &self.registry
    }

    /// Persist a task and make it live. Returns the stored task with its id.
    ///
    /// A periodic task is registered only after it has been persisted; an
    /// invalid expression or a store failure leaves nothing behind.
    pub async fn add_task(&self, mut task: ScheduledTask) -> Result<ScheduledTask, SchedulerError> {
        if task.content.trim().is_empty() {
            return Err(SchedulerError::InvalidTask("content is empty".to_string()));
        }
        if task.id.is_empty() {
            task.id = self.next_task_id(task.destination.user_id);
        }

        match task.schedule.clone() {
            Schedule::Once { target_at } => {
                if target_at.0 < 0 {
                    return Err(SchedulerError::InvalidTask(format!(
                        "target time {} is before the epoch",
                        target_at.0
                    )));
                }
                let json = serde_json::to_string(&task)?;
                self.store.hset(ONESHOT_DATA_KEY, &task.id, &json).await?;
                self.store
                    .zadd(ONESHOT_INDEX_KEY, &task.id, target_at.0)
                    .await?;
                info!(task_id = %task.id, target_at = target_at.0, "One-shot task scheduled");
            }
            Schedule::Periodic { time_expr } => {
                let schedule = CronSchedule::parse(&time_expr)?;
                let json = serde_json::to_string(&task)?;

                let mut edit = self.registry.edit().await;
                self.store.hset(PERIODIC_DATA_KEY, &task.id, &json).await?;
                edit.register(&task.id, schedule, self.periodic_job(&task));
                info!(task_id = %task.id, expr = %time_expr, "Periodic task registered");
            }
        }
        Ok(task)
    }

    /// Tasks matching `filter`: one-shot first, then periodic, each sorted by id.
    /// Entries that fail to parse are skipped.
    pub async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<ScheduledTask>, SchedulerError> {
        let mut tasks = Vec::new();
        for key in [ONESHOT_DATA_KEY, PERIODIC_DATA_KEY] {
            let mut group: Vec<ScheduledTask> = self
                .store
                .hgetall(key)
                .await?
                .into_iter()
                .filter_map(|(id, raw)| parse_task(&id, &raw))
                .filter(|task| filter.matches(task))
                .collect();
            group.sort_by(|a, b| a.id.cmp(&b.id));
            tasks.extend(group);
        }
        Ok(tasks)
    }

    /// Delete a task of either kind. Removing an unknown id succeeds.
    pub async fn remove_task(&self, task_id: &str) -> Result<(), SchedulerError> {
        let mut edit = self.registry.edit().await;

        self.store.hdel(PERIODIC_DATA_KEY, task_id).await?;
        let was_periodic = edit.unregister(task_id);
        drop(edit);

        if !was_periodic {
            self.store.zrem(ONESHOT_INDEX_KEY, task_id).await?;
            self.store.hdel(ONESHOT_DATA_KEY, task_id).await?;
        }
        info!(task_id, was_periodic, "Task removed");
        Ok(())
    }

    /// Replace every registered periodic entry with what the store holds.
    ///
    /// If the store cannot be read the registry is left untouched.
    pub async fn reload_periodic_tasks(&self) -> Result<ReloadReport, SchedulerError> {
        let mut edit = self.registry.edit().await;
        let mut stored: Vec<(String, String)> =
            self.store.hgetall(PERIODIC_DATA_KEY).await?.into_iter().collect();
        stored.sort();

        let cleared = edit.clear();
        let mut report = ReloadReport::default();
        for (id, raw) in stored {
            let Some(task) = parse_task(&id, &raw) else {
                report.skipped += 1;
                continue;
            };
            let Schedule::Periodic { time_expr } = &task.schedule else {
                warn!(task_id = %id, "One-shot task found in periodic hash, skipping");
                report.skipped += 1;
                continue;
            };
            match CronSchedule::parse(time_expr) {
                Ok(schedule) => {
                    edit.register(&id, schedule, self.periodic_job(&task));
                    report.loaded += 1;
                }
                Err(e) => {
                    warn!(task_id = %id, error = %e, "Skipping periodic task with bad schedule");
                    report.skipped += 1;
                }
            }
        }
        info!(
            cleared,
            loaded = report.loaded,
            skipped = report.skipped,
            "Periodic tasks reloaded"
        );
        Ok(report)
    }

    /// Unique id of the form `task_{unix_nanos}_{user_id}`.
    fn next_task_id(&self, user_id: i64) -> String {
        let now = self
            .clock
            .now()
            .timestamp_nanos_opt()
            .unwrap_or_else(|| self.clock.timestamp().0.saturating_mul(1_000_000_000));
        let mut prev = self.last_id_nanos.load(Ordering::SeqCst);
        let nanos = loop {
            let candidate = now.max(prev + 1);
            match self.last_id_nanos.compare_exchange(
                prev,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break candidate,
                Err(actual) => prev = actual,
            }
        };
        format!("task_{nanos}_{user_id}")
    }

    fn periodic_job(
        &self,
        task: &ScheduledTask,
    ) -> impl Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync + 'static {
        let notifier = Arc::clone(&self.notifier);
        let destination: Destination = task.destination;
        let task_id = task.id.clone();
        let text = format!("{}{}", self.periodic_prefix, task.content);
        move || {
            let notifier = Arc::clone(&notifier);
            let task_id = task_id.clone();
            let text = text.clone();
            Box::pin(async move {
                match notifier.deliver(destination, &text).await {
                    Ok(()) => debug!(task_id = %task_id, "Periodic reminder delivered"),
                    Err(e) => {
                        warn!(task_id = %task_id, error = %e, "Periodic reminder delivery failed")
                    }
                }
            })
        }
    }
}

/// Decode a stored task, keyed by its hash field.
pub(crate) fn parse_task(id: &str, raw: &str) -> Option<ScheduledTask> {
    match serde_json::from_str::<ScheduledTask>(raw) {
        Ok(mut task) => {
            if task.id != id {
                task.id = id.to_string();
            }
            Some(task)
        }
        Err(e) => {
            warn!(task_id = %id, error = %e, "Skipping malformed task record");
            None
        }
    }
}
