//! Hybrid task scheduler for Murmur.
//!
//! One-shot reminders live in a durable due-index polled on a fixed
//! interval; recurring reminders are persisted and materialised into an
//! in-process cron engine on every start. Both deliver through a
//! [`Notifier`].

pub mod cron;
pub mod error;
pub mod notifier;
pub mod poller;
pub mod registry;
pub mod reminder;
pub mod scheduler;
pub mod task;
pub mod types;

pub use cron::{CronEngine, CronSchedule, EntryId};
pub use error::{NotifyError, SchedulerError};
pub use notifier::{LogNotifier, Notifier, RecordingNotifier, WebhookNotifier};
pub use poller::{FollowUpComposer, FollowUpPayload, OneShotPoller, SweepReport};
pub use registry::PeriodicRegistry;
pub use reminder::{ReminderRequest, ReminderService, ToolReply};
pub use scheduler::Scheduler;
pub use task::{ReloadReport, TaskStore};
pub use types::{Schedule, ScheduledTask, TaskFilter, TaskKind};
