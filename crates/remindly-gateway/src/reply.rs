use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::CollaboratorError;

/// Turns a user's text message into a reply.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, message: &str) -> Result<String, CollaboratorError>;
}

const SYSTEM_PROMPT: &str =
    "You are a friendly AI assistant. Reply to the user's message briefly and kindly.";

#[derive(Debug, Clone)]
pub struct ReplyConfig {
    pub api_key: Option<String>,
    /// e.g. `https://open.bigmodel.cn/api/paas/v4`, without trailing slash.
    pub api_base: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://open.bigmodel.cn/api/paas/v4".to_string(),
            model: "GLM-4.5-AirX".to_string(),
            temperature: 0.7,
            max_tokens: 1000,
        }
    }
}

/// OpenAI-compatible chat-completions client.
pub struct ChatCompletionReplier {
    client: Client,
    config: ReplyConfig,
}

impl ChatCompletionReplier {
    pub fn new(client: Client, config: ReplyConfig) -> Self {
        Self { client, config }
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl ReplyGenerator for ChatCompletionReplier {
    async fn generate(&self, message: &str) -> Result<String, CollaboratorError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(CollaboratorError::NotConfigured)?;

        let url = format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'));
        let body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": message },
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        debug!("Chat completion request to {} with model {}", url, self.config.model);

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::Parse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| CollaboratorError::Parse("response has no message content".into()))
    }
}
