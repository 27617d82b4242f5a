//! Memory classifier.
//!
//! Asks a lightweight completion model for a one-line verdict of the form
//! `tier|triggered|reason`. When the model is unreachable, slow, or silent
//! the classifier degrades to a fixed set of first-person disclosure
//! patterns, which never raise a proactive signal.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use murmur_core::types::MemoryTier;

use crate::error::LlmError;
use crate::llm::CompletionService;

pub const CLASSIFIER_MAX_TOKENS: u32 = 64;
pub const CLASSIFIER_TEMPERATURE: f32 = 0.1;

static DISCLOSURE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"我(喜欢|爱|讨厌|不喜欢|偏好)",
        r"我(是|叫|名字)",
        r"我的(爱好|兴趣|习惯|工作|职业|年龄|生日)",
        r"(我今年|我属|我住在|我来自)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid disclosure regex"))
    .collect()
});

/// Whether the utterance warrants a delayed follow-up, and why.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProactiveSignal {
    pub triggered: bool,
    pub reason: String,
}

impl ProactiveSignal {
    pub fn none() -> Self {
        Self::default()
    }
}

/// Why the model verdict was not used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackCause {
    ServiceError,
    Timeout,
    EmptyCompletion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Verdict parsed from the model's reply.
    Model {
        tier: MemoryTier,
        signal: ProactiveSignal,
    },
    /// Pattern-based verdict. Never triggers a follow-up.
    Fallback {
        tier: MemoryTier,
        cause: FallbackCause,
    },
}

impl Classification {
    pub fn tier(&self) -> MemoryTier {
        match self {
            Classification::Model { tier, .. } | Classification::Fallback { tier, .. } => *tier,
        }
    }

    /// The follow-up reason, when a follow-up was requested.
    pub fn proactive_reason(&self) -> Option<&str> {
        match self {
            Classification::Model { signal, .. } if signal.triggered => Some(&signal.reason),
            _ => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Classification::Fallback { .. })
    }
}

pub struct MemoryClassifier {
    completion: Arc<dyn CompletionService>,
    timeout: Duration,
}

impl MemoryClassifier {
    pub fn new(completion: Arc<dyn CompletionService>, timeout: Duration) -> Self {
        Self {
            completion,
            timeout,
        }
    }

    pub async fn classify(&self, content: &str) -> Classification {
        let prompt = build_prompt(content);
        let reply = tokio::time::timeout(
            self.timeout,
            self.completion
                .complete(&prompt, CLASSIFIER_MAX_TOKENS, CLASSIFIER_TEMPERATURE),
        )
        .await;

        let cause = match reply {
            Ok(Ok(raw)) => match parse_verdict(&raw) {
                Some((tier, signal)) => {
                    debug!(tier = %tier, triggered = signal.triggered, "Classified by model");
                    return Classification::Model { tier, signal };
                }
                None => FallbackCause::EmptyCompletion,
            },
            Ok(Err(LlmError::EmptyCompletion)) => FallbackCause::EmptyCompletion,
            Ok(Err(e)) => {
                warn!(error = %e, "Classifier request failed");
                FallbackCause::ServiceError
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Classifier request timed out");
                FallbackCause::Timeout
            }
        };

        let tier = classify_with_patterns(content);
        debug!(tier = %tier, cause = ?cause, "Classified by fallback patterns");
        Classification::Fallback { tier, cause }
    }
}

/// The rubric sent to the classifier model.
pub fn build_prompt(content: &str) -> String {
    format!(
        r#"你是一个深度社交观察员。分析以下群聊消息并给出分类。

### 分类规则：
- personal: 持久性个人信息（职业、爱好、身份、性格特征）。
- temporary: 临时状态（饿了、去洗澡、在忙、困了、即时情绪）。
- chat: 普通闲聊或讨论话题。

### 主动性探测 (Proactive)：
如果消息包含以下特征，请标记为触发主动关怀：
1. 强烈的负面情绪（极度焦虑、悲伤、受挫）。
2. 明确的短期重大计划（明天面试、下午相亲、要去赶飞机）。
3. 寻求帮助但未明确@机器人。

回复格式必须为："类型|是否触发(true/false)|原因描述"
示例："personal|false|普通爱好描述" 或 "temporary|true|用户表达了极度焦虑"

消息：{content}"#
    )
}

/// Parse `tier|triggered|reason`. Returns `None` only for a blank reply.
pub fn parse_verdict(raw: &str) -> Option<(MemoryTier, ProactiveSignal)> {
    let line = raw
        .lines()
        .map(trim_decoration)
        .find(|line| !line.is_empty())?;
    let line = line.replace('｜', "|");

    let mut parts = line.splitn(3, '|');
    let tier = parts
        .next()
        .map(trim_decoration)
        .and_then(|t| t.parse::<MemoryTier>().ok())
        .unwrap_or(MemoryTier::Chat);
    let triggered = parts
        .next()
        .map(trim_decoration)
        .is_some_and(|t| t.eq_ignore_ascii_case("true"));
    let reason = parts
        .next()
        .map(|r| trim_decoration(r).to_string())
        .unwrap_or_default();

    Some((tier, ProactiveSignal { triggered, reason }))
}

/// Deterministic tier from first-person disclosure phrasings.
pub fn classify_with_patterns(content: &str) -> MemoryTier {
    if DISCLOSURE_PATTERNS.iter().any(|re| re.is_match(content)) {
        MemoryTier::Personal
    } else {
        MemoryTier::Chat
    }
}

fn trim_decoration(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '`' | '“' | '”' | '‘' | '’'))
}
