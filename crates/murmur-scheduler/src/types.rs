//! Core types for scheduled notification tasks.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use murmur_core::types::{Destination, Timestamp};

use crate::error::SchedulerError;

/// Prefix of task ids created by the proactive follow-up path.
pub const PROACTIVE_ID_PREFIX: &str = "proactive_";

/// Discriminator of a task's schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Once,
    Periodic,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Once => write!(f, "once"),
            TaskKind::Periodic => write!(f, "periodic"),
        }
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(TaskKind::Once),
            "periodic" => Ok(TaskKind::Periodic),
            other => Err(format!("unknown task type: {other}")),
        }
    }
}

/// When a task fires. Exactly one of a target time or an expression exists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Schedule {
    /// Fire once at or after `target_at`.
    Once { target_at: Timestamp },
    /// Fire on every match of a seconds-resolution cron expression.
    Periodic { time_expr: String },
}

impl Schedule {
    pub fn kind(&self) -> TaskKind {
        match self {
            Schedule::Once { .. } => TaskKind::Once,
            Schedule::Periodic { .. } => TaskKind::Periodic,
        }
    }
}

/// A persisted notification task.
///
/// Serialized in the flat layout
/// `{"id","type","content","group_id","user_id","time_expr","target_at"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "TaskRecord", try_from = "TaskRecord")]
pub struct ScheduledTask {
    /// Empty until the task store assigns one.
    pub id: String,
    pub content: String,
    pub destination: Destination,
    pub schedule: Schedule,
}

impl ScheduledTask {
    pub fn once(content: impl Into<String>, destination: Destination, target_at: Timestamp) -> Self {
        Self {
            id: String::new(),
            content: content.into(),
            destination,
            schedule: Schedule::Once { target_at },
        }
    }

    pub fn periodic(
        content: impl Into<String>,
        destination: Destination,
        time_expr: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            content: content.into(),
            destination,
            schedule: Schedule::Periodic {
                time_expr: time_expr.into(),
            },
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn kind(&self) -> TaskKind {
        self.schedule.kind()
    }

    pub fn is_proactive(&self) -> bool {
        self.id.starts_with(PROACTIVE_ID_PREFIX)
    }

    pub fn target_at(&self) -> Option<Timestamp> {
        match &self.schedule {
            Schedule::Once { target_at } => Some(*target_at),
            Schedule::Periodic { .. } => None,
        }
    }

    pub fn time_expr(&self) -> Option<&str> {
        match &self.schedule {
            Schedule::Periodic { time_expr } => Some(time_expr),
            Schedule::Once { .. } => None,
        }
    }
}

/// Wire form of [`ScheduledTask`].
#[derive(Serialize, Deserialize)]
struct TaskRecord {
    #[serde(default)]
    id: String,
    #[serde(rename = "type")]
    kind: TaskKind,
    #[serde(default)]
    content: String,
    #[serde(default)]
    group_id: i64,
    #[serde(default)]
    user_id: i64,
    #[serde(default)]
    time_expr: String,
    #[serde(default)]
    target_at: i64,
}

impl From<ScheduledTask> for TaskRecord {
    fn from(task: ScheduledTask) -> Self {
        let (kind, time_expr, target_at) = match task.schedule {
            Schedule::Once { target_at } => (TaskKind::Once, String::new(), target_at.0),
            Schedule::Periodic { time_expr } => (TaskKind::Periodic, time_expr, 0),
        };
        TaskRecord {
            id: task.id,
            kind,
            content: task.content,
            group_id: task.destination.group_id,
            user_id: task.destination.user_id,
            time_expr,
            target_at,
        }
    }
}

impl TryFrom<TaskRecord> for ScheduledTask {
    type Error = SchedulerError;

    fn try_from(record: TaskRecord) -> Result<Self, Self::Error> {
        let schedule = match record.kind {
            TaskKind::Once => Schedule::Once {
                target_at: Timestamp(record.target_at),
            },
            TaskKind::Periodic => {
                if record.time_expr.trim().is_empty() {
                    return Err(SchedulerError::InvalidTask(
                        "periodic task without time_expr".to_string(),
                    ));
                }
                Schedule::Periodic {
                    time_expr: record.time_expr,
                }
            }
        };
        Ok(ScheduledTask {
            id: record.id,
            content: record.content,
            destination: Destination::new(record.group_id, record.user_id),
            schedule,
        })
    }
}

/// Scope of a task listing. `None` matches every value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub group_id: Option<i64>,
    pub user_id: Option<i64>,
}

impl TaskFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Build from raw ids where 0 means "any".
    pub fn from_sentinels(group_id: i64, user_id: i64) -> Self {
        Self {
            group_id: (group_id != 0).then_some(group_id),
            user_id: (user_id != 0).then_some(user_id),
        }
    }

    pub fn matches(&self, task: &ScheduledTask) -> bool {
        self.group_id.map_or(true, |g| task.destination.group_id == g)
            && self.user_id.map_or(true, |u| task.destination.user_id == u)
    }
}
