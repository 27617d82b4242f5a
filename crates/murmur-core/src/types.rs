use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Enums
// =============================================================================

/// Retention tier assigned to an utterance by the classifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    /// Short-lived state ("off to shower", "starving"). Kept in the TTL cache.
    Temporary,
    /// Durable facts about a person (job, hobbies, identity).
    Personal,
    /// Ordinary conversation worth recalling later.
    Chat,
}

impl MemoryTier {
    pub const LONG_TERM: [MemoryTier; 2] = [MemoryTier::Personal, MemoryTier::Chat];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryTier::Temporary => "temporary",
            MemoryTier::Personal => "personal",
            MemoryTier::Chat => "chat",
        }
    }

    /// Vector namespace for long-term tiers. Temporary memories never
    /// reach the vector service.
    pub fn namespace(&self) -> Option<&'static str> {
        match self {
            MemoryTier::Temporary => None,
            MemoryTier::Personal => Some("personal"),
            MemoryTier::Chat => Some("chat"),
        }
    }

    pub fn is_long_term(&self) -> bool {
        self.namespace().is_some()
    }
}

impl fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "temporary" => Ok(MemoryTier::Temporary),
            "personal" => Ok(MemoryTier::Personal),
            "chat" => Ok(MemoryTier::Chat),
            other => Err(format!("unknown memory tier: {other}")),
        }
    }
}

// =============================================================================
// Newtype Wrappers - Temporal
// =============================================================================

/// Unix timestamp in seconds since epoch.
///
/// Compared by value. Two Timestamps with the same inner value are equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0, 0).unwrap_or_default()
    }

    pub fn plus_secs(&self, secs: i64) -> Self {
        Self(self.0.saturating_add(secs))
    }

    /// Seconds elapsed between `self` and `now`, clamped at zero.
    pub fn age_secs(&self, now: Timestamp) -> i64 {
        (now.0 - self.0).max(0)
    }
}

// =============================================================================
// Addressing
// =============================================================================

/// Where a notification goes.
///
/// Zero is the "unset" sentinel for both fields; a zero `group_id` means
/// the message is delivered privately to `user_id`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    #[serde(default)]
    pub group_id: i64,
    #[serde(default)]
    pub user_id: i64,
}

impl Destination {
    pub fn new(group_id: i64, user_id: i64) -> Self {
        Self { group_id, user_id }
    }

    pub fn is_private(&self) -> bool {
        self.group_id == 0
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_private() {
            write!(f, "private:{}", self.user_id)
        } else {
            write!(f, "group:{}/user:{}", self.group_id, self.user_id)
        }
    }
}

/// An inbound chat utterance as handed to the memory pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub group_id: i64,
    /// External user reference (the chat platform's account id).
    pub user_ref: String,
    #[serde(default)]
    pub nickname: String,
    pub content: String,
}

impl InboundMessage {
    /// Numeric user id for notifications; non-numeric refs map to 0.
    pub fn user_id(&self) -> i64 {
        self.user_ref.trim().parse().unwrap_or(0)
    }

    pub fn destination(&self) -> Destination {
        Destination::new(self.group_id, self.user_id())
    }
}
