use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the provider for a JSON object when it supports a response format.
    pub json_output: bool,
}

impl CompletionConfig {
    pub fn json(model: impl Into<String>, max_tokens: u32) -> Self {
        Self { model: model.into(), temperature: 0.0, max_tokens, json_output: true }
    }
}

/// Completion transport. Failures are expected and handled by the caller.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, config: &CompletionConfig, messages: &[ChatMessage])
        -> Result<String>;
}

/// Pulls the first JSON object out of a completion, tolerating code fences and chatter.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}
