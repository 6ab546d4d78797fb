//! Language model collaborators.
//!
//! The workflow only sees [`LlmClient`]. Concrete providers are thin HTTP
//! bindings; [`RetryingLlmClient`] wraps any of them with bounded backoff for
//! transient failures.

pub mod claude;
pub mod openai;
pub mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::LlmError;
use crate::session::{Message, Role};

pub use claude::ClaudeClient;
pub use openai::OpenAiClient;
pub use retry::{RetryPolicy, RetryingLlmClient};

/// Capacity of the channel returned by [`LlmClient::stream`].
pub const STREAM_BUFFER: usize = 64;

/// Text chunks of a streamed reply. An `Err` item ends the stream early; a
/// stream that closes without one is complete.
pub type ChunkReceiver = mpsc::Receiver<Result<String, LlmError>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        Self::new(message.role, message.content.clone())
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn name(&self) -> &str;

    /// Send a system prompt and ordered history, returning the full reply.
    async fn complete(&self, system: &str, history: &[ChatMessage]) -> Result<String, LlmError>;

    /// Stream the reply as text chunks.
    ///
    /// The default sends the complete reply as a single chunk.
    async fn stream(&self, system: &str, history: &[ChatMessage]) -> Result<ChunkReceiver, LlmError> {
        let text = self.complete(system, history).await?;
        let (tx, rx) = mpsc::channel(1);
        // Receiver is still held locally, so this cannot fail.
        let _ = tx.send(Ok(text)).await;
        Ok(rx)
    }
}

/// Collect every chunk of a stream into one string, failing on the first
/// error item.
pub async fn collect_stream(mut rx: ChunkReceiver) -> Result<String, LlmError> {
    let mut out = String::new();
    while let Some(chunk) = rx.recv().await {
        out.push_str(&chunk?);
    }
    Ok(out)
}

/// Accumulates raw response bytes and hands out complete lines.
///
/// Decoding happens per line, so a multi-byte character split across network
/// chunks is reassembled before it is decoded.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Next complete line without its `\n` or `\r\n` terminator.
    pub(crate) fn next_line(&mut self) -> Option<String> {
        let pos = self.bytes.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.bytes.drain(..=pos).collect();
        let line = line.strip_suffix(b"\n").unwrap_or(&line);
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        Some(String::from_utf8_lossy(line).into_owned())
    }

    /// Whatever is left once the body has ended.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.bytes.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.bytes);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Split a history into provider roles. System messages from the history are
/// appended to the system prompt because both providers take it separately.
pub(crate) fn split_system(system: &str, history: &[ChatMessage]) -> (String, Vec<ChatMessage>) {
    let mut prompt = system.to_string();
    let mut turns = Vec::with_capacity(history.len());
    for message in history {
        if message.role == Role::System {
            if !prompt.is_empty() {
                prompt.push_str("\n\n");
            }
            prompt.push_str(&message.content);
        } else {
            turns.push(message.clone());
        }
    }
    (prompt, turns)
}

/// Map a transport-level reqwest error into the retry classification.
pub(crate) fn classify_transport(error: &reqwest::Error) -> LlmError {
    if error.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Network(error.to_string())
    }
}

/// Keep provider error bodies short in messages.
pub(crate) fn truncate_for_error(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
