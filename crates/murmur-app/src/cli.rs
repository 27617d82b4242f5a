//! CLI argument definitions for the murmur binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Murmur: memory and reminders for a group-chat agent.
#[derive(Parser, Debug)]
#[command(name = "murmur", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Run the scheduler and archive inbound messages read from stdin (default).
    Serve,
    /// Manage reminders in the durable store.
    Tasks {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Print the memories recalled for a query as JSON.
    Recall {
        query: String,
        #[arg(long)]
        group: Option<i64>,
        #[arg(long)]
        user: Option<i64>,
    },
    /// Show or change a group's bot and memory switches.
    Groups {
        group: i64,
        /// Whether the bot takes part in the group.
        #[arg(long, value_enum)]
        active: Option<Switch>,
        /// Whether the group's messages are archived into memory.
        #[arg(long, value_enum)]
        rag: Option<Switch>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn is_on(self) -> bool {
        self == Switch::On
    }
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum TaskAction {
    /// List a group's tasks. Without --user, lists every member's tasks.
    List {
        #[arg(long)]
        group: i64,
        #[arg(long)]
        user: Option<i64>,
    },
    /// Add a one-shot (--delay) or recurring (--cron) reminder.
    Add {
        #[arg(long)]
        group: i64,
        #[arg(long)]
        user: i64,
        content: String,
        /// Seconds from now.
        #[arg(long, conflicts_with = "cron", required_unless_present = "cron")]
        delay: Option<f64>,
        /// Six-field cron expression (seconds first).
        #[arg(long)]
        cron: Option<String>,
    },
    /// Remove a task by id.
    Remove { id: String },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > MURMUR_CONFIG env var > ~/.murmur/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("MURMUR_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the log level: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".murmur").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".murmur").join("config.toml");
    }
    PathBuf::from("config.toml")
}
