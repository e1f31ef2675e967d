pub mod schema;

pub use schema::OpenAiResponsesSchema;

use serde::Deserialize;
use serde_json::{Map, Value};

/// Logical event kinds of the `OpenAI` Responses stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsesEventKind {
    /// `response.created` / `in_progress` / `completed` / `queued` /
    /// `failed` / `incomplete`: full envelope snapshot.
    Snapshot,
    OutputItem { done: bool },
    ContentPart { done: bool },
    PartText { field: PartTextField, done: bool },
    SummaryPart { done: bool },
    SummaryText { done: bool },
    ItemText { field: ItemTextField, done: bool },
    Error,
    /// Recognized progress notification with nothing to merge.
    Progress,
}

/// Concatenative string living inside a content part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartTextField {
    OutputText,
    Refusal,
    ReasoningText,
}

/// Concatenative string living directly on an output item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemTextField {
    FunctionCallArguments,
    CustomToolCallInput,
    McpCallArguments,
    CodeInterpreterCode,
}

/// `response.created` and the other lifecycle snapshots.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseSnapshotEvent {
    #[serde(default)]
    pub response: Option<Map<String, Value>>,
}

/// `response.output_item.added` / `.done`.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputItemEvent {
    #[serde(default)]
    pub output_index: Option<usize>,
    #[serde(default)]
    pub item: Option<Map<String, Value>>,
}

/// `response.content_part.added` / `.done`.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentPartEvent {
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub output_index: Option<usize>,
    #[serde(default)]
    pub content_index: Option<usize>,
    #[serde(default)]
    pub part: Option<Map<String, Value>>,
}

/// `response.output_text.delta`, `response.refusal.delta`,
/// `response.reasoning_text.delta`.
#[derive(Debug, Clone, Deserialize)]
pub struct PartTextDeltaEvent {
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub output_index: Option<usize>,
    #[serde(default)]
    pub content_index: Option<usize>,
    #[serde(default)]
    pub delta: String,
}

/// Done counterpart of [`PartTextDeltaEvent`]. The refusal stream names its
/// final string `refusal`.
#[derive(Debug, Clone, Deserialize)]
pub struct PartTextDoneEvent {
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub output_index: Option<usize>,
    #[serde(default)]
    pub content_index: Option<usize>,
    #[serde(default, alias = "refusal")]
    pub text: Option<String>,
    #[serde(default)]
    pub logprobs: Option<Vec<Value>>,
}

/// `response.reasoning_summary_part.added` / `.done`.
#[derive(Debug, Clone, Deserialize)]
pub struct SummaryPartEvent {
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub output_index: Option<usize>,
    #[serde(default)]
    pub summary_index: Option<usize>,
    #[serde(default)]
    pub part: Option<Map<String, Value>>,
}

/// `response.reasoning_summary_text.delta` / `.done`.
#[derive(Debug, Clone, Deserialize)]
pub struct SummaryTextEvent {
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub output_index: Option<usize>,
    #[serde(default)]
    pub summary_index: Option<usize>,
    #[serde(default)]
    pub delta: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// Argument/input/code streams of tool-call items. Done events carry the
/// final string under the item field's own name.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemTextEvent {
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub output_index: Option<usize>,
    #[serde(default)]
    pub delta: Option<String>,
    #[serde(default, alias = "arguments", alias = "input", alias = "code")]
    pub value: Option<String>,
}

/// Stream-level `error` event.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponsesErrorEvent {
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub param: Option<Value>,
}
