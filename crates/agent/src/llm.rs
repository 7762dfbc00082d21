use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::gateway::{GatewayError, ToolGateway};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_REPLY_TOKENS: u32 = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("gateway transport selected but the gateway is not enabled")]
    GatewayDisabled,
    #[error("model request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("model response was malformed: {0}")]
    MalformedResponse(String),
}

/// Sends an ordered role-tagged message sequence to a language model and
/// returns plain reply text.
///
/// Implementations hold no mutable state across calls; one client is
/// shared freely between concurrent turns. No retries happen at this
/// layer; retry policy belongs to the caller or infra configuration.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String, ModelError>;
}

/// Flattens a message sequence into the shape the gateway (and the direct
/// provider API) accept: every system entry concatenated, in order, into a
/// single system string; all other entries preserved in order.
pub(crate) fn flatten_system(messages: &[ChatMessage]) -> (Option<String>, Vec<&ChatMessage>) {
    let mut system_parts = Vec::new();
    let mut turns = Vec::new();

    for message in messages {
        match message.role {
            Role::System => {
                if !message.content.is_empty() {
                    system_parts.push(message.content.as_str());
                }
            }
            Role::User | Role::Assistant => turns.push(message),
        }
    }

    let system = if system_parts.is_empty() { None } else { Some(system_parts.join("\n\n")) };
    (system, turns)
}

/// Direct transport: the provider's Messages API over HTTPS.
pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
}

impl AnthropicClient {
    pub fn new(
        api_key: SecretString,
        base_url: Option<String>,
        model: String,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.unwrap_or_else(|| ANTHROPIC_BASE_URL.to_string()),
            api_key,
            model,
        })
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        let (system, turns) = flatten_system(messages);
        let body = json!({
            "model": self.model,
            "max_tokens": MAX_REPLY_TOKENS,
            "system": system,
            "messages": turns,
        });

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status { status: status.as_u16(), body });
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|err| ModelError::MalformedResponse(err.to_string()))?;

        let text = parsed
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            return Err(ModelError::MalformedResponse("no text content blocks".to_string()));
        }
        Ok(text)
    }
}

/// Indirect transport: the tool-invocation gateway's `call_model` tool.
pub struct GatewayModelClient {
    gateway: ToolGateway,
    model: String,
    enabled: bool,
}

impl GatewayModelClient {
    pub fn new(gateway: ToolGateway, model: String, enabled: bool) -> Self {
        Self { gateway, model, enabled }
    }
}

#[async_trait]
impl ModelClient for GatewayModelClient {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        if !self.enabled {
            return Err(ModelError::GatewayDisabled);
        }

        let (system, turns) = flatten_system(messages);
        let result = self
            .gateway
            .call_tool(
                "call_model",
                json!({
                    "messages": turns,
                    "system": system,
                    "model": self.model,
                }),
            )
            .await?;

        result
            .get("content")
            .and_then(|value| value.as_str())
            .map(|text| text.to_string())
            .ok_or_else(|| {
                ModelError::MalformedResponse("gateway result is missing `content`".to_string())
            })
    }
}
