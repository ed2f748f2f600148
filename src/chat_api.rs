use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::state::Message;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const CHAT_PATH: &str = "/api/chat";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
}

/// Reply body. Both fields are optional; the reference backend answers with
/// `reply`, other backends with `content`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatReply {
    content: Option<String>,
    reply: Option<String>,
}

impl ChatReply {
    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            reply: None,
        }
    }

    /// Read a reply out of any JSON body. Only string fields count; a field
    /// of another type, or a body that is not an object, reads as absent.
    pub fn from_value(body: &Value) -> Self {
        let field = |name: &str| body.get(name).and_then(Value::as_str).map(str::to_string);
        Self {
            content: field("content"),
            reply: field("reply"),
        }
    }

    /// Parse a response body. Fails only when the body is not JSON.
    pub fn from_body(body: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(body)?;
        Ok(Self::from_value(&value))
    }

    /// The reply text, if the backend produced a non-empty one
    pub fn text(&self) -> Option<&str> {
        self.content
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.reply.as_deref().filter(|s| !s.is_empty()))
    }
}

#[async_trait]
pub trait ChatEndpoint: Send + Sync {
    async fn send(&self, request: &ChatRequest) -> Result<ChatReply>;
}

#[derive(Clone)]
pub struct HttpChatEndpoint {
    client: Client,
    base_url: String,
}

impl HttpChatEndpoint {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self) -> String {
        format!("{}{}", self.base_url, CHAT_PATH)
    }
}

#[async_trait]
impl ChatEndpoint for HttpChatEndpoint {
    async fn send(&self, request: &ChatRequest) -> Result<ChatReply> {
        let url = self.url();
        debug!(%url, messages = request.messages.len(), "sending chat request");

        let response = self.client.post(&url).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            // The body is still read; a missing reply field falls back later.
            warn!(%status, "chat endpoint answered with a non-success status");
        }

        let body = response.text().await?;
        ChatReply::from_body(&body)
            .map_err(|e| anyhow!("Chat endpoint returned an unreadable body ({}): {}", status, e))
    }
}
