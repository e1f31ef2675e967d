pub mod schema;

pub use schema::OpenAiChatSchema;

use serde::Deserialize;
use serde_json::Value;

/// Logical event kinds of the chat-completions stream. The stream has no
/// named vocabulary, so kinds come from payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatEventKind {
    Chunk,
    Error,
}

/// A `chat.completion.chunk` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiStreamChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub created: Option<u64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_fingerprint: Option<String>,
    #[serde(default)]
    pub service_tier: Option<String>,
    #[serde(default)]
    pub choices: Option<Vec<OpenAiStreamChoice>>,
    #[serde(default)]
    pub usage: Option<Value>,
}

/// A choice within a stream chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiStreamChoice {
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub delta: Option<OpenAiDelta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub logprobs: Option<OpenAiStreamLogprobs>,
}

/// Delta content within a stream choice.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub refusal: Option<String>,
    /// Reasoning text as emitted by DeepSeek-style backends.
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

/// A tool call delta in streaming.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiStreamToolCall {
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub type_: Option<String>,
    #[serde(default)]
    pub function: Option<OpenAiStreamToolCallFunction>,
}

/// Function delta within a streaming tool call.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiStreamToolCallFunction {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Per-token log probabilities attached to a chunk's choice.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiStreamLogprobs {
    #[serde(default)]
    pub content: Option<Vec<Value>>,
    #[serde(default)]
    pub refusal: Option<Vec<Value>>,
}

/// Error object sent in place of a chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiStreamError {
    pub error: Value,
}
