pub mod anthropic;
pub mod gemini;
pub mod openai_chat;
pub mod openai_responses;

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::aggregate::engine::MergeOps;
use crate::error::CanonicalError;

pub use anthropic::AnthropicSchema;
pub use gemini::GeminiSchema;
pub use openai_chat::OpenAiChatSchema;
pub use openai_responses::OpenAiResponsesSchema;

/// Wire dialect of an event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    #[serde(rename = "openai-chat", alias = "chat")]
    OpenAiChat,
    #[serde(rename = "openai-responses", alias = "responses")]
    OpenAiResponses,
    #[serde(rename = "anthropic", alias = "claude")]
    Anthropic,
    #[serde(rename = "gemini")]
    Gemini,
}

impl Dialect {
    pub const ALL: [Dialect; 4] = [
        Dialect::OpenAiChat,
        Dialect::OpenAiResponses,
        Dialect::Anthropic,
        Dialect::Gemini,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::OpenAiChat => "openai-chat",
            Dialect::OpenAiResponses => "openai-responses",
            Dialect::Anthropic => "anthropic",
            Dialect::Gemini => "gemini",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = CanonicalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai-chat" | "openai_chat" | "chat" => Ok(Dialect::OpenAiChat),
            "openai-responses" | "openai_responses" | "responses" => Ok(Dialect::OpenAiResponses),
            "anthropic" | "claude" => Ok(Dialect::Anthropic),
            "gemini" => Ok(Dialect::Gemini),
            _ => Err(CanonicalError::UnsupportedDialect(s.to_string())),
        }
    }
}

/// Result of classifying one decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified<K> {
    Known(K),
    /// Named, but not part of the dialect's vocabulary.
    Unknown(String),
    /// Neither a name nor a recognizable shape.
    Untyped,
}

/// One provider's streaming vocabulary.
///
/// `classify` maps a payload to a logical event kind and `lower` turns the
/// payload into generic merge operations. The finishing hooks shape slots and
/// the envelope into the dialect's non-streaming response.
pub trait DialectSchema {
    type Kind: Copy + fmt::Debug;

    fn dialect(&self) -> Dialect;

    /// Envelope key holding the positional list (`output`, `choices`, ...).
    fn output_field(&self) -> &'static str;

    fn classify(&self, event_name: Option<&str>, payload: &Value) -> Classified<Self::Kind>;

    fn lower(&self, kind: Self::Kind, payload: Value, ops: &mut MergeOps);

    /// Initial fields of a slot created at `index`.
    fn new_slot(&self, index: usize, id: Option<&str>) -> Map<String, Value> {
        let _ = (index, id);
        Map::new()
    }

    fn finish_slot(&self, index: usize, slot: Map<String, Value>) -> Value {
        let _ = index;
        Value::Object(slot)
    }

    fn finish_envelope(&self, envelope: &mut Map<String, Value>) {
        let _ = envelope;
    }
}

/// Logical event name: the explicit `event:` name wins over the payload's
/// `type` field.
pub(crate) fn event_type<'a>(event_name: Option<&'a str>, payload: &'a Value) -> Option<&'a str> {
    event_name
        .filter(|name| !name.is_empty())
        .or_else(|| payload.get("type").and_then(Value::as_str))
}

/// Classification fallback for shape-typed dialects once no known shape
/// matched: an `error` object, else unknown under its name.
pub(crate) fn classify_by_name<K>(
    event_name: Option<&str>,
    payload: &Value,
    error_kind: K,
) -> Classified<K> {
    if payload.get("error").is_some_and(Value::is_object)
        || event_type(event_name, payload) == Some("error")
    {
        return Classified::Known(error_kind);
    }
    match event_type(event_name, payload) {
        Some(name) => Classified::Unknown(name.to_owned()),
        None => Classified::Untyped,
    }
}

/// Decode a classified payload into its typed form. A payload that does not
/// fit its kind's shape is dropped.
pub(crate) fn typed<T: DeserializeOwned>(kind: impl fmt::Debug, payload: Value) -> Option<T> {
    match serde_json::from_value(payload) {
        Ok(typed) => Some(typed),
        Err(err) => {
            debug!(?kind, error = %err, "payload does not match its event shape, dropping");
            None
        }
    }
}
