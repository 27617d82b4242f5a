//! Scheduler lifecycle.
//!
//! Owns the cron engine, the periodic registry, the task store, and the
//! one-shot poller. `init` starts both loops and rebuilds periodic entries
//! from the store; `shutdown` stops the loops and waits for them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use murmur_core::clock::SharedClock;
use murmur_core::config::SchedulerConfig;
use murmur_storage::SharedStore;

use crate::cron::CronEngine;
use crate::error::SchedulerError;
use crate::notifier::Notifier;
use crate::poller::{FollowUpComposer, OneShotPoller};
use crate::registry::PeriodicRegistry;
use crate::reminder::ReminderService;
use crate::task::{ReloadReport, TaskStore};

pub struct Scheduler {
    engine: Arc<CronEngine>,
    tasks: Arc<TaskStore>,
    poller: Arc<OneShotPoller>,
    clock: SharedClock,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        store: SharedStore,
        notifier: Arc<dyn Notifier>,
        composer: Option<Arc<dyn FollowUpComposer>>,
        clock: SharedClock,
        config: &SchedulerConfig,
    ) -> Self {
        let engine = Arc::new(CronEngine::new());
        let registry = Arc::new(PeriodicRegistry::new(Arc::clone(&engine)));
        let tasks = Arc::new(TaskStore::new(
            Arc::clone(&store),
            registry,
            Arc::clone(&notifier),
            Arc::clone(&clock),
            config.periodic_prefix.clone(),
        ));

        let mut poller = OneShotPoller::new(
            store,
            notifier,
            Arc::clone(&clock),
            Duration::from_secs(config.poll_interval_secs.max(1)),
            config.proactive_fallback_message.clone(),
        )
        .with_follow_up_timeout(Duration::from_secs(config.follow_up_timeout_secs));
        if let Some(composer) = composer {
            poller = poller.with_composer(composer);
        }

        Self {
            engine,
            tasks,
            poller: Arc::new(poller),
            clock,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn tasks(&self) -> Arc<TaskStore> {
        Arc::clone(&self.tasks)
    }

    pub fn poller(&self) -> Arc<OneShotPoller> {
        Arc::clone(&self.poller)
    }

    pub fn reminders(&self) -> ReminderService {
        ReminderService::new(self.tasks(), Arc::clone(&self.clock))
    }

    /// Start the cron engine and the poller, then load periodic tasks.
    ///
    /// The loops keep running if the reload fails; call
    /// [`Scheduler::reload`] once the store is reachable.
    pub async fn init(&self) -> Result<ReloadReport, SchedulerError> {
        {
            let mut handles = self.handles.lock().await;
            if handles.is_empty() {
                let engine = Arc::clone(&self.engine);
                handles.push(tokio::spawn(async move { engine.run().await }));
                let poller = Arc::clone(&self.poller);
                handles.push(tokio::spawn(async move { poller.run().await }));
                info!("Scheduler loops started");
            }
        }

        match self.reload().await {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!(error = %e, "Periodic reload failed during init");
                Err(e)
            }
        }
    }

    pub async fn reload(&self) -> Result<ReloadReport, SchedulerError> {
        self.tasks.reload_periodic_tasks().await
    }

    /// Stop both loops and wait for them to exit.
    pub async fn shutdown(&self) {
        self.engine.shutdown();
        self.poller.shutdown_handle().notify_one();

        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Scheduler loop ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }
}
