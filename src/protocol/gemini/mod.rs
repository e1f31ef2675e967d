pub mod schema;

pub use schema::GeminiSchema;

use serde::Deserialize;
use serde_json::Value;

/// Logical event kinds of the Gemini stream, resolved from payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeminiEventKind {
    Chunk,
    Error,
}

/// One `GenerateContentResponse` chunk.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiStreamChunk {
    #[serde(default)]
    pub candidates: Option<Vec<GeminiCandidate>>,
    #[serde(default)]
    pub usage_metadata: Option<Value>,
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default)]
    pub response_id: Option<String>,
    #[serde(default)]
    pub prompt_feedback: Option<Value>,
    #[serde(default)]
    pub create_time: Option<String>,
}

/// A candidate within a chunk.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiCandidate {
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub content: Option<GeminiContent>,
    #[serde(default)]
    pub finish_reason: Option<Value>,
    #[serde(default)]
    pub safety_ratings: Option<Value>,
    #[serde(default)]
    pub citation_metadata: Option<Value>,
    #[serde(default)]
    pub grounding_metadata: Option<Value>,
    #[serde(default)]
    pub token_count: Option<Value>,
    #[serde(default)]
    pub avg_logprobs: Option<Value>,
    #[serde(default)]
    pub finish_message: Option<Value>,
}

/// Gemini content (role + parts).
#[derive(Debug, Clone, Deserialize)]
pub struct GeminiContent {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Option<Vec<Value>>,
}

/// Error object sent in place of a chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct GeminiStreamError {
    pub error: Value,
}

/// Whether `body` is an internal Code Assist wrapper: an object carrying
/// `wrapper` as an object and lacking the top-level `marker` key.
#[must_use]
pub fn is_wrapped(body: &Value, wrapper: &str, marker: &str) -> bool {
    body.get(marker).is_none() && body.get(wrapper).is_some_and(Value::is_object)
}

/// Peel the `{"response": {...}}` wrapper used by the internal Code Assist
/// endpoints. Payloads that already carry `candidates` are returned as-is.
#[must_use]
pub fn unwrap_response(payload: Value) -> Value {
    peel(payload, "response", "candidates")
}

/// Borrowing counterpart of [`unwrap_response`].
#[must_use]
pub fn response_view(payload: &Value) -> &Value {
    match payload.get("response") {
        Some(inner) if is_wrapped(payload, "response", "candidates") => inner,
        _ => payload,
    }
}

/// Peel the `{"request": {...}}` wrapper of internal request bodies.
/// Bodies that already carry `contents` are returned as-is.
#[must_use]
pub fn unwrap_request(body: Value) -> Value {
    peel(body, "request", "contents")
}

fn peel(body: Value, wrapper: &str, marker: &str) -> Value {
    if !is_wrapped(&body, wrapper, marker) {
        return body;
    }
    match body {
        Value::Object(mut map) => map.remove(wrapper).unwrap_or(Value::Null),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unwrap_response_only_without_candidates() {
        assert_eq!(
            unwrap_response(json!({"response": {"candidates": []}, "traceId": "t"})),
            json!({"candidates": []})
        );
        let direct = json!({"candidates": [], "response": {"x": 1}});
        assert_eq!(unwrap_response(direct.clone()), direct);
        assert_eq!(unwrap_response(json!({"response": "text"})), json!({"response": "text"}));
    }

    #[test]
    fn test_response_view_matches_unwrap() {
        let wrapped = json!({"response": {"modelVersion": "gemini-2.5-pro"}});
        assert_eq!(response_view(&wrapped), &json!({"modelVersion": "gemini-2.5-pro"}));
    }

    #[test]
    fn test_unwrap_request() {
        assert_eq!(
            unwrap_request(json!({"model": "m", "request": {"contents": []}})),
            json!({"contents": []})
        );
        let direct = json!({"contents": [], "request": {}});
        assert_eq!(unwrap_request(direct.clone()), direct);
    }
}
