//! Per-group on/off switches as operator-facing commands.
//!
//! The pipeline reads these flags on every message; this is the only
//! production path that changes them.

use std::sync::Arc;

use tracing::{info, warn};

use murmur_scheduler::ToolReply;
use murmur_storage::GroupSettingsRepository;

pub struct GroupSwitches {
    repo: Arc<GroupSettingsRepository>,
}

impl GroupSwitches {
    pub fn new(repo: Arc<GroupSettingsRepository>) -> Self {
        Self { repo }
    }

    /// Turn the bot on or off in a group.
    pub fn set_active(&self, group_id: i64, active: bool) -> ToolReply {
        if let Err(e) = self.repo.set_active(group_id, active) {
            warn!(group_id, error = %e, "Failed to toggle bot");
            return ToolReply::failure(format!("保存失败: {}", e));
        }
        info!(group_id, active, "Bot switch updated");
        ToolReply::success(if active { "机器人已开启" } else { "机器人已关闭" })
    }

    /// Turn memory archival on or off in a group.
    pub fn set_rag_enabled(&self, group_id: i64, enabled: bool) -> ToolReply {
        if let Err(e) = self.repo.set_rag_enabled(group_id, enabled) {
            warn!(group_id, error = %e, "Failed to toggle memory");
            return ToolReply::failure(format!("保存失败: {}", e));
        }
        info!(group_id, enabled, "Memory switch updated");
        ToolReply::success(if enabled {
            "记忆功能已开启"
        } else {
            "记忆功能已关闭"
        })
    }

    pub fn bot_status(&self, group_id: i64) -> ToolReply {
        match self.repo.get(group_id) {
            Ok(settings) if settings.is_active => ToolReply::success("机器人当前是开启状态"),
            Ok(_) => ToolReply::success("机器人当前是关闭状态"),
            Err(e) => ToolReply::failure(format!("数据库错误: {}", e)),
        }
    }

    pub fn rag_status(&self, group_id: i64) -> ToolReply {
        match self.repo.get(group_id) {
            Ok(settings) if settings.rag_enabled => ToolReply::success("记忆功能当前是开启状态"),
            Ok(_) => ToolReply::success("记忆功能当前是关闭状态"),
            Err(e) => ToolReply::failure(format!("数据库错误: {}", e)),
        }
    }
}
