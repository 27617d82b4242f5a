//! Chat-completion client.
//!
//! The classifier and the proactive care reply only need single-turn
//! completions: one user prompt in, the first choice's text out.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use murmur_core::config::LlmConfig;

use crate::error::LlmError;

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, LlmError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `/v1/chat/completions` client.
#[derive(Debug, Clone)]
pub struct HttpCompletionService {
    base_url: String,
    api_key: String,
    model: String,
    http_client: reqwest::Client,
}

impl HttpCompletionService {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            http_client: reqwest::Client::new(),
        }
    }

    /// Build from configuration for `model`, honouring the configured proxy.
    pub fn from_config(config: &LlmConfig, model: &str) -> Result<Self, LlmError> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(60));
        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        let mut service = Self::new(config.base_url.clone(), config.api_key.clone(), model);
        service.http_client = builder.build()?;
        Ok(service)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionService for HttpCompletionService {
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens,
            temperature,
        };

        let mut request = self.http_client.post(&url).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(LlmError::EmptyCompletion);
        }
        debug!(model = %self.model, chars = content.chars().count(), "Completion received");
        Ok(content)
    }
}

/// Completion service that replays queued replies, then a default.
///
/// Records every prompt it receives. Useful wherever a deterministic
/// model is needed.
#[derive(Debug)]
pub struct ScriptedCompletion {
    queued: Mutex<VecDeque<Result<String, String>>>,
    default: Result<String, String>,
    delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    /// Always answer `reply`.
    pub fn replying(reply: impl Into<String>) -> Self {
        Self::with_default(Ok(reply.into()))
    }

    /// Always fail with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_default(Err(message.into()))
    }

    fn with_default(default: Result<String, String>) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            default,
            delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Wait this long before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answer `reply` once before falling back to the default.
    pub fn then_reply(self, reply: impl Into<String>) -> Self {
        if let Ok(mut queued) = self.queued.lock() {
            queued.push_back(Ok(reply.into()));
        }
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(
        &self,
        prompt: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<String, LlmError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .queued
            .lock()
            .ok()
            .and_then(|mut queued| queued.pop_front())
            .unwrap_or_else(|| self.default.clone());
        match next {
            Ok(reply) if reply.trim().is_empty() => Err(LlmError::EmptyCompletion),
            Ok(reply) => Ok(reply),
            Err(message) => Err(LlmError::Request(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_http_completion_sends_openai_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer nv-key"))
            .and(body_partial_json(json!({
                "model": "classifier",
                "messages": [{"role": "user", "content": "hello"}],
                "max_tokens": 64
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "  chat|false|闲聊 \n"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let service = HttpCompletionService::new(server.uri(), "nv-key", "classifier");
        let reply = service.complete("hello", 64, 0.1).await.unwrap();
        assert_eq!(reply, "chat|false|闲聊");
    }

    #[tokio::test]
    async fn test_http_completion_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let service = HttpCompletionService::new(server.uri(), "k", "m");
        let err = service.complete("x", 8, 0.0).await.unwrap_err();
        assert!(matches!(err, LlmError::Api { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_http_completion_without_choices_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let service = HttpCompletionService::new(server.uri(), "k", "m");
        assert!(matches!(
            service.complete("x", 8, 0.0).await,
            Err(LlmError::EmptyCompletion)
        ));
    }

    #[tokio::test]
    async fn test_http_completion_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let service = HttpCompletionService::new(server.uri(), "k", "m");
        assert!(matches!(
            service.complete("x", 8, 0.0).await,
            Err(LlmError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_scripted_completion_queue_then_default() {
        let service = ScriptedCompletion::replying("default").then_reply("first");
        assert_eq!(service.complete("a", 1, 0.0).await.unwrap(), "first");
        assert_eq!(service.complete("b", 1, 0.0).await.unwrap(), "default");
        assert_eq!(service.prompts(), vec!["a", "b"]);

        let failing = ScriptedCompletion::failing("down");
        assert!(matches!(
            failing.complete("x", 1, 0.0).await,
            Err(LlmError::Request(_))
        ));
    }
}
