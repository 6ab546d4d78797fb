use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{
    ChatMessage, ChunkReceiver, LineBuffer, LlmClient, STREAM_BUFFER, classify_transport,
    split_system, truncate_for_error,
};
use crate::errors::LlmError;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

/// Anthropic Messages API binding.
#[derive(Debug, Clone)]
pub struct ClaudeClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl ClaudeClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(
        &self,
        system: &str,
        history: &[ChatMessage],
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let (system, turns) = split_system(system, history);
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system: &system,
            messages: turns
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream,
        };

        let resp = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::from_status(
                status.as_u16(),
                truncate_for_error(&text, 500),
            ));
        }
        Ok(resp)
    }
}

#[async_trait]
impl LlmClient for ClaudeClient {
    fn name(&self) -> &str {
        "claude"
    }

    async fn complete(&self, system: &str, history: &[ChatMessage]) -> Result<String, LlmError> {
        let resp = self.send(system, history, false).await?;
        let parsed: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Provider {
                status: 200,
                message: format!("Unreadable response body: {}", e),
            })?;
        let text: String = parsed
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text)
            .collect();
        debug!(model = %self.model, chars = text.len(), "Claude completion received");
        Ok(text)
    }

    async fn stream(&self, system: &str, history: &[ChatMessage]) -> Result<ChunkReceiver, LlmError> {
        let mut resp = self.send(system, history, true).await?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            let mut buffer = LineBuffer::default();
            loop {
                match resp.chunk().await {
                    Ok(Some(chunk)) => buffer.push(&chunk),
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Claude stream interrupted");
                        let _ = tx.send(Err(classify_transport(&e))).await;
                        return;
                    }
                }
                while let Some(line) = buffer.next_line() {
                    if let Some(text) = parse_sse_delta(&line)
                        && tx.send(Ok(text)).await.is_err()
                    {
                        return;
                    }
                }
            }
            if let Some(text) = buffer.finish().as_deref().and_then(parse_sse_delta) {
                let _ = tx.send(Ok(text)).await;
            }
        });

        Ok(rx)
    }
}

/// Extract the text of a `content_block_delta` server-sent event line.
fn parse_sse_delta(line: &str) -> Option<String> {
    let data = line.strip_prefix("data:")?.trim();
    let event: Value = serde_json::from_str(data).ok()?;
    if event.get("type")?.as_str()? != "content_block_delta" {
        return None;
    }
    event
        .get("delta")?
        .get("text")?
        .as_str()
        .map(str::to_string)
}
