pub mod schema;

pub use schema::AnthropicSchema;

use serde::Deserialize;
use serde_json::{Map, Value};

/// Logical event kinds of the Anthropic Messages stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnthropicEventKind {
    MessageStart,
    ContentBlockStart,
    ContentBlockDelta,
    MessageDelta,
    Error,
    /// `ping`, `content_block_stop`, `message_stop`.
    Ignored,
}

/// `message_start`: the envelope snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageStartEvent {
    #[serde(default)]
    pub message: Option<Map<String, Value>>,
}

/// `content_block_start`.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlockStartEvent {
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub content_block: Option<Map<String, Value>>,
}

/// `content_block_delta`.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlockDeltaEvent {
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub delta: Option<AnthropicDelta>,
}

/// Delta variants for content block deltas.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum AnthropicDelta {
    #[serde(rename = "text_delta")]
    TextDelta {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "thinking_delta")]
    ThinkingDelta {
        #[serde(default)]
        thinking: String,
    },
    #[serde(rename = "signature_delta")]
    SignatureDelta {
        #[serde(default)]
        signature: String,
    },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta {
        #[serde(default)]
        partial_json: String,
    },
    #[serde(rename = "citations_delta")]
    CitationsDelta { citation: Value },
    #[serde(other)]
    Other,
}

/// `message_delta`: stop reason, stop sequence and cumulative usage.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageDeltaEvent {
    #[serde(default)]
    pub delta: Option<Map<String, Value>>,
    #[serde(default)]
    pub usage: Option<Map<String, Value>>,
}

/// In-stream `error` event.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicErrorEvent {
    pub error: Value,
}
