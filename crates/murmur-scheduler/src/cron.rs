//! In-process cron engine for periodic tasks.
//!
//! Expressions are six-field with a leading seconds field and are evaluated
//! in the host's local time zone. Each entry keeps its next fire time; the
//! run loop sleeps until the earliest one, spawns every due job, and
//! recomputes the next fire from the current instant. Fires missed while
//! the process was down or the loop was late are skipped, not replayed.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use croner::Cron;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::SchedulerError;

/// Opaque handle of an engine entry.
pub type EntryId = u64;

type BoxedJob = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Sleep used when no entries are registered.
const IDLE_WAIT: Duration = Duration::from_secs(60);

/// A parsed, validated cron expression.
#[derive(Clone)]
pub struct CronSchedule {
    expr: String,
    cron: Cron,
}

impl CronSchedule {
    /// Parse a six-field expression (`sec min hour dom month dow`).
    pub fn parse(expr: &str) -> Result<Self, SchedulerError> {
        let trimmed = expr.trim();
        let cron = Cron::new(trimmed)
            .with_seconds_required()
            .parse()
            .map_err(|e| SchedulerError::InvalidSchedule {
                expr: expr.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            expr: trimmed.to_string(),
            cron,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// First match strictly after `after`.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        self.cron.find_next_occurrence(after, false).ok()
    }
}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronSchedule").field(&self.expr).finish()
    }
}

struct Entry {
    schedule: CronSchedule,
    next: Option<DateTime<Local>>,
    job: BoxedJob,
}

/// Runs registered jobs on their cron schedules.
pub struct CronEngine {
    entries: Mutex<BTreeMap<EntryId, Entry>>,
    next_id: AtomicU64,
    wake: Notify,
    shutdown: Notify,
    stopped: AtomicBool,
}

impl CronEngine {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            wake: Notify::new(),
            shutdown: Notify::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Register `job` to run on every match of `schedule`.
    pub fn add<F, Fut>(&self, schedule: CronSchedule, job: F) -> EntryId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let next = schedule.next_after(&Local::now());
        if next.is_none() {
            warn!(expr = %schedule.expr(), "Cron expression has no future occurrence");
        }
        let job: BoxedJob = Arc::new(move || -> Pin<Box<dyn Future<Output = ()> + Send>> {
            Box::pin(job())
        });
        self.lock_entries().insert(
            id,
            Entry {
                schedule,
                next,
                job,
            },
        );
        self.wake.notify_one();
        id
    }

    /// Unregister an entry. Returns whether it existed.
    pub fn remove(&self, id: EntryId) -> bool {
        let removed = self.lock_entries().remove(&id).is_some();
        if removed {
            self.wake.notify_one();
        }
        removed
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.lock_entries().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next scheduled fire of an entry.
    pub fn next_fire(&self, id: EntryId) -> Option<DateTime<Local>> {
        self.lock_entries().get(&id).and_then(|e| e.next)
    }

    /// Run until [`CronEngine::shutdown`] is called.
    pub async fn run(&self) {
        info!("Cron engine started");
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }

            let fired = self.fire_due(Local::now());
            if fired > 0 {
                debug!(fired, "Spawned periodic jobs");
            }

            let wait = self
                .earliest_next()
                .map(|next| (next - Local::now()).to_std().unwrap_or(Duration::ZERO))
                .unwrap_or(IDLE_WAIT);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.wake.notified() => {}
                _ = self.shutdown.notified() => break,
            }
        }
        info!("Cron engine stopped");
    }

    /// Signal the run loop to exit. Running jobs are not cancelled.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    /// Spawn every job due at `now` and advance it past `now`.
    fn fire_due(&self, now: DateTime<Local>) -> usize {
        let mut due = Vec::new();
        {
            let mut entries = self.lock_entries();
            for entry in entries.values_mut() {
                if entry.next.is_some_and(|next| next <= now) {
                    due.push(Arc::clone(&entry.job));
                    entry.next = entry.schedule.next_after(&now);
                }
            }
        }
        let count = due.len();
        for job in due {
            tokio::spawn(job());
        }
        count
    }

    fn earliest_next(&self) -> Option<DateTime<Local>> {
        self.lock_entries().values().filter_map(|e| e.next).min()
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<EntryId, Entry>> {
        // Jobs run outside the lock.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for CronEngine {
    fn default() -> Self {
        Self::new()
    }
}
