//! Dialect detection from captured request metadata.

use serde_json::Value;

use crate::protocol::Dialect;
use crate::transfer::TransferKind;

/// Guess the dialect of a captured exchange from its request path.
///
/// Chat completions are checked before the legacy Anthropic `/v1/complete`
/// prefix, which every `/v1/completions` path also contains.
#[must_use]
pub fn detect_dialect(request_path: &str) -> Option<Dialect> {
    let path = strip_query(request_path);
    if is_chat_path(path) {
        return Some(Dialect::OpenAiChat);
    }

    let lowered = path.to_ascii_lowercase();
    if is_responses_path(&lowered) {
        Some(Dialect::OpenAiResponses)
    } else if is_anthropic_path(&lowered) {
        Some(Dialect::Anthropic)
    } else if is_gemini_path(&lowered) {
        Some(Dialect::Gemini)
    } else {
        None
    }
}

/// Judge the dialect of one captured body from its request path, the
/// response `Content-Type` and the shape of the decoded body.
///
/// Streams are judged by path alone. A request must carry its dialect's
/// request fields (`model` with `messages`/`prompt`, Gemini `contents`); a
/// JSON response must carry its dialect's output list. Without a
/// `Content-Type` the body shape decides. `body` is `None` when the captured
/// text is not JSON.
#[must_use]
pub fn judge_dialect(
    kind: TransferKind,
    request_path: &str,
    content_type: Option<&str>,
    body: Option<&Value>,
) -> Option<Dialect> {
    let streamed = kind == TransferKind::Sse
        || (kind == TransferKind::Response && content_type.is_some_and(is_event_stream));
    if streamed {
        return detect_dialect(request_path);
    }

    let path = strip_query(request_path);
    let lowered = path.to_ascii_lowercase();
    let body = body?;
    match kind {
        TransferKind::Request => judge_request(path, &lowered, body),
        _ => judge_response(path, &lowered, content_type.map_or(true, is_json), body),
    }
}

fn judge_request(path: &str, lowered: &str, body: &Value) -> Option<Dialect> {
    let has_model = body.get("model").is_some_and(|model| !model.is_null());
    let has_prompt = body.get("messages").is_some_and(Value::is_array)
        || body.get("prompt").is_some_and(|prompt| !prompt.is_null());

    if is_chat_path(path) {
        return (has_model && has_prompt).then_some(Dialect::OpenAiChat);
    }
    if is_responses_path(lowered) {
        return (has_model && body.get("input").is_some()).then_some(Dialect::OpenAiResponses);
    }
    if is_anthropic_path(lowered) && has_model && has_prompt {
        return Some(Dialect::Anthropic);
    }
    (is_gemini_path(lowered) || has_gemini_contents(body)).then_some(Dialect::Gemini)
}

fn judge_response(path: &str, lowered: &str, json: bool, body: &Value) -> Option<Dialect> {
    if is_chat_path(path) {
        let shaped = body.get("model").is_some() && body.get("choices").is_some_and(Value::is_array);
        return (json && shaped).then_some(Dialect::OpenAiChat);
    }
    if is_responses_path(lowered) {
        let shaped = body.get("output").is_some_and(Value::is_array)
            || body.get("object").and_then(Value::as_str) == Some("response");
        return (json && shaped).then_some(Dialect::OpenAiResponses);
    }
    if is_anthropic_path(lowered) {
        let shaped = body.get("type").and_then(Value::as_str) == Some("message")
            || body.get("completion").is_some_and(|completion| !completion.is_null());
        return (json && shaped).then_some(Dialect::Anthropic);
    }
    is_gemini_path(lowered).then_some(Dialect::Gemini)
}

/// Gemini request bodies carry a `contents` list whose entries have `parts`
/// or a `role`.
fn has_gemini_contents(body: &Value) -> bool {
    body.get("contents")
        .and_then(Value::as_array)
        .is_some_and(|contents| {
            contents.is_empty()
                || contents
                    .iter()
                    .any(|entry| entry.get("parts").is_some() || entry.get("role").is_some())
        })
}

fn is_chat_path(path: &str) -> bool {
    path.ends_with("/completions") || path.contains("/chat/completions")
}

fn is_responses_path(lowered: &str) -> bool {
    lowered.contains("/v1/response")
}

fn is_anthropic_path(lowered: &str) -> bool {
    lowered.contains("/v1/messages") || lowered.contains("/v1/complete")
}

fn is_gemini_path(lowered: &str) -> bool {
    lowered.contains(":generatecontent")
        || lowered.contains(":streamgeneratecontent")
        || lowered.contains("gemini")
}

/// Whether a response `Content-Type` announces an event stream.
#[must_use]
pub fn is_event_stream(content_type: &str) -> bool {
    contains_ignore_case(content_type, "text/event-stream")
}

#[must_use]
pub fn is_json(content_type: &str) -> bool {
    contains_ignore_case(content_type, "application/json")
}

fn strip_query(path: &str) -> &str {
    path.split_once('?').map_or(path, |(path, _)| path)
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack
        .as_bytes()
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
}
