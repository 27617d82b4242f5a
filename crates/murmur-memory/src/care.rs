//! Proactive care replies.
//!
//! When a follow-up scheduled by the router comes due, the poller asks a
//! [`FollowUpComposer`] for fresh text. This one writes it with the
//! completion service from the stored reason and the original message.

use std::sync::Arc;

use async_trait::async_trait;

use murmur_core::types::Destination;
use murmur_scheduler::{FollowUpComposer, FollowUpPayload};

use crate::llm::CompletionService;

const CARE_MAX_TOKENS: u32 = 120;
const CARE_TEMPERATURE: f32 = 0.8;

pub struct CareReplyComposer {
    completion: Arc<dyn CompletionService>,
}

impl CareReplyComposer {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self { completion }
    }
}

pub fn build_care_prompt(payload: &FollowUpPayload) -> String {
    let reason = if payload.reason.trim().is_empty() {
        "对方提到了一件让人在意的事"
    } else {
        payload.reason.trim()
    };
    format!(
        "你是群聊里一位温暖、自然的朋友。几个小时前，群友说了这样一句话：\n\
         「{original}」\n\
         当时你注意到：{reason}。\n\
         现在请你主动发一句简短的关心，问问后来怎么样了。\n\
         要求：口语化，不超过40个字，不要复述原话，不要带引号，只输出这句话本身。",
        original = payload.original.trim(),
        reason = reason,
    )
}

#[async_trait]
impl FollowUpComposer for CareReplyComposer {
    async fn compose_follow_up(
        &self,
        payload: &FollowUpPayload,
        _destination: Destination,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let prompt = build_care_prompt(payload);
        let reply = self
            .completion
            .complete(&prompt, CARE_MAX_TOKENS, CARE_TEMPERATURE)
            .await?;
        Ok(reply.trim().trim_matches(['"', '“', '”']).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedCompletion;

    fn payload(reason: &str) -> FollowUpPayload {
        FollowUpPayload {
            reason: reason.to_string(),
            original: "明天要去面试，好紧张".to_string(),
        }
    }

    #[test]
    fn test_prompt_carries_reason_and_original() {
        let prompt = build_care_prompt(&payload("面试焦虑"));
        assert!(prompt.contains("「明天要去面试，好紧张」"));
        assert!(prompt.contains("当时你注意到：面试焦虑。"));
    }

    #[test]
    fn test_prompt_without_reason() {
        let prompt = build_care_prompt(&payload(" "));
        assert!(prompt.contains("对方提到了一件让人在意的事"));
    }

    #[tokio::test]
    async fn test_compose_strips_quotes() {
        let completion = Arc::new(ScriptedCompletion::replying("“面试还顺利吗？”"));
        let composer = CareReplyComposer::new(completion.clone());
        let text = composer
            .compose_follow_up(&payload("面试焦虑"), Destination::new(1, 2))
            .await
            .unwrap();
        assert_eq!(text, "面试还顺利吗？");
        assert_eq!(completion.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_compose_propagates_failure() {
        let composer = CareReplyComposer::new(Arc::new(ScriptedCompletion::failing("down")));
        assert!(composer
            .compose_follow_up(&payload("x"), Destination::new(1, 2))
            .await
            .is_err());
    }
}
