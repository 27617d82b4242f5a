//! Reminder requests as issued by the chat agent's tool calls.
//!
//! Arguments arrive as loose JSON (`type`, `content`, `delay_seconds`,
//! `cron_expr`, `id`); replies are short user-facing messages.

use std::fmt::Display;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use murmur_core::clock::SharedClock;
use murmur_core::types::{Destination, Timestamp};

use crate::error::SchedulerError;
use crate::task::TaskStore;
use crate::types::{Schedule, ScheduledTask, TaskFilter, TaskKind};

const MISSING_DELAY: &str = "单次任务需要提供有效的 delay_seconds";
const MISSING_CRON: &str = "周期任务需要提供有效的 cron_expr";
const MISSING_ID: &str = "移除失败：请提供有效的任务 ID";

/// Result of a reminder operation, shown to the user as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolReply {
    pub success: bool,
    pub message: String,
}

impl ToolReply {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Arguments of a "set a reminder" call.
#[derive(Debug, Clone, Deserialize)]
pub struct ReminderRequest {
    #[serde(rename = "type")]
    pub kind: TaskKind,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub delay_seconds: Option<f64>,
    #[serde(default)]
    pub cron_expr: Option<String>,
}

impl ReminderRequest {
    pub fn from_args(args: &Value) -> Result<Self, SchedulerError> {
        Self::deserialize(args).map_err(|e| SchedulerError::InvalidTask(e.to_string()))
    }

    /// Build the task for `destination`, resolving delays against `now`.
    pub fn into_task(
        self,
        destination: Destination,
        now: Timestamp,
    ) -> Result<ScheduledTask, SchedulerError> {
        let schedule = match self.kind {
            TaskKind::Once => {
                let delay = self
                    .delay_seconds
                    .filter(|d| d.is_finite() && *d >= 0.0)
                    .ok_or_else(|| SchedulerError::InvalidTask(MISSING_DELAY.to_string()))?;
                Schedule::Once {
                    target_at: now.plus_secs(delay as i64),
                }
            }
            TaskKind::Periodic => {
                let expr = self
                    .cron_expr
                    .filter(|e| !e.trim().is_empty())
                    .ok_or_else(|| SchedulerError::InvalidTask(MISSING_CRON.to_string()))?;
                Schedule::Periodic { time_expr: expr }
            }
        };
        Ok(ScheduledTask {
            id: String::new(),
            content: self.content,
            destination,
            schedule,
        })
    }
}

/// Set, list, and cancel reminders on behalf of a chat user.
pub struct ReminderService {
    tasks: Arc<TaskStore>,
    clock: SharedClock,
}

impl ReminderService {
    pub fn new(tasks: Arc<TaskStore>, clock: SharedClock) -> Self {
        Self { tasks, clock }
    }

    pub async fn set(&self, args: &Value, destination: Destination) -> ToolReply {
        let task = match ReminderRequest::from_args(args)
            .and_then(|request| request.into_task(destination, self.clock.timestamp()))
        {
            Ok(task) => task,
            Err(SchedulerError::InvalidTask(reason)) => return ToolReply::failure(reason),
            Err(e) => return ToolReply::failure(format!("设置提醒失败: {e}")),
        };

        match self.tasks.add_task(task).await {
            Ok(stored) => ToolReply::success(format!("设置成功！到时间我会提醒你的~ ID: {}", stored.id)),
            Err(e) => {
                warn!(destination = %destination, error = %e, "Failed to set reminder");
                ToolReply::failure(format!("设置提醒失败: {e}"))
            }
        }
    }

    /// The caller's tasks in this group, or every user's when `operator` is set.
    pub async fn list(&self, destination: Destination, operator: bool) -> ToolReply {
        let user_id = if operator { 0 } else { destination.user_id };
        let filter = TaskFilter::from_sentinels(destination.group_id, user_id);
        match self.tasks.list_tasks(filter).await {
            Ok(tasks) => ToolReply::success(format_task_list(&tasks, operator, &chrono::Local)),
            Err(e) => {
                warn!(destination = %destination, error = %e, "Failed to list reminders");
                ToolReply::failure(format!("查询任务失败: {e}"))
            }
        }
    }

    pub async fn cancel(&self, args: &Value) -> ToolReply {
        let Some(id) = args
            .get("id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
        else {
            return ToolReply::failure(MISSING_ID);
        };

        match self.tasks.remove_task(id).await {
            Ok(()) => ToolReply::success("成功取消了该任务！"),
            Err(e) => ToolReply::failure(format!("取消任务失败: {e}")),
        }
    }
}

/// Render tasks as the user-facing list, with one-shot times in `tz`.
pub fn format_task_list<Tz>(tasks: &[ScheduledTask], operator: bool, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    if tasks.is_empty() {
        return "目前没有设置任何活跃的任务哦。".to_string();
    }

    let mut out = if operator {
        "本群当前活跃的定时任务如下（超级用户视图）：\n".to_string()
    } else {
        "你当前的定时任务如下：\n".to_string()
    };

    for task in tasks {
        let when = match &task.schedule {
            Schedule::Once { target_at } => Utc
                .timestamp_opt(target_at.0, 0)
                .single()
                .map(|t| t.with_timezone(tz).format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| target_at.0.to_string()),
            Schedule::Periodic { time_expr } => format!("周期性: {time_expr}"),
        };
        let user_label = if operator {
            format!(" [用户:{}]", task.destination.user_id)
        } else {
            String::new()
        };
        out.push_str(&format!(
            "- [{}] {} ({}){}\n",
            task.id, task.content, when, user_label
        ));
    }
    out
}
