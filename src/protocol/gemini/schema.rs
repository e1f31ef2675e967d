//! Rule table of the Gemini `streamGenerateContent` stream.
//!
//! Candidates are slots keyed by their `index` (0 when absent). Parts are
//! appended in arrival order and adjacent text parts of the same kind are
//! joined into one.

use serde_json::{json, Map, Value};

use super::{response_view, unwrap_response, GeminiEventKind, GeminiStreamChunk, GeminiStreamError};
use crate::aggregate::engine::{FieldMode, MergeOp, MergeOps, SlotRef, Target};
use crate::protocol::{classify_by_name, typed, Classified, Dialect, DialectSchema};
use crate::util::FieldPath;

const PARTS: FieldPath = &["content", "parts"];
const ROLE: FieldPath = &["content", "role"];

#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiSchema;

fn is_chunk(payload: &Value) -> bool {
    let payload = response_view(payload);
    ["candidates", "usageMetadata", "promptFeedback", "modelVersion", "responseId"]
        .iter()
        .any(|key| payload.get(*key).is_some_and(|value| !value.is_null()))
}

fn is_thought(part: &Value) -> bool {
    part.get("thought").and_then(Value::as_bool).unwrap_or(false)
}

/// Join `incoming` into `last` when both are text parts with the same
/// `thought` flag. Other keys of `incoming` (e.g. `thoughtSignature`) are
/// carried over.
fn coalesce_text(last: &mut Value, incoming: &Value) -> bool {
    let Some(more) = incoming.get("text").and_then(Value::as_str) else {
        return false;
    };
    if is_thought(last) != is_thought(incoming) {
        return false;
    }
    let Some(last) = last.as_object_mut() else {
        return false;
    };
    let Some(Value::String(text)) = last.get_mut("text") else {
        return false;
    };
    text.push_str(more);
    if let Some(incoming) = incoming.as_object() {
        for (key, value) in incoming {
            if key != "text" {
                last.insert(key.clone(), value.clone());
            }
        }
    }
    true
}

impl DialectSchema for GeminiSchema {
    type Kind = GeminiEventKind;

    fn dialect(&self) -> Dialect {
        Dialect::Gemini
    }

    fn output_field(&self) -> &'static str {
        "candidates"
    }

    fn classify(&self, event_name: Option<&str>, payload: &Value) -> Classified<Self::Kind> {
        if is_chunk(payload) {
            return Classified::Known(GeminiEventKind::Chunk);
        }
        classify_by_name(event_name, payload, GeminiEventKind::Error)
    }

    fn lower(&self, kind: Self::Kind, payload: Value, ops: &mut MergeOps) {
        match kind {
            GeminiEventKind::Chunk => {
                let Some(chunk) = typed::<GeminiStreamChunk>(kind, unwrap_response(payload)) else {
                    return;
                };

                let mut patch = Map::new();
                // Reserves the key's position; finalize fills it.
                patch.insert("candidates".to_owned(), Value::Array(Vec::new()));
                let metadata = [
                    ("usageMetadata", chunk.usage_metadata),
                    ("modelVersion", chunk.model_version.map(Value::String)),
                    ("responseId", chunk.response_id.map(Value::String)),
                    ("promptFeedback", chunk.prompt_feedback),
                    ("createTime", chunk.create_time.map(Value::String)),
                ];
                for (key, value) in metadata {
                    if let Some(value) = value {
                        patch.insert(key.to_owned(), value);
                    }
                }
                ops.push(MergeOp::PatchEnvelope(patch));

                for candidate in chunk.candidates.unwrap_or_default() {
                    let slot = SlotRef::Index(candidate.index.unwrap_or(0));
                    ops.push(MergeOp::MergeSlot {
                        slot: slot.clone(),
                        id: None,
                        fields: Map::new(),
                        sparse: &[],
                        mode: FieldMode::KeepExisting,
                    });
                    if let Some(content) = candidate.content {
                        if let Some(role) = content.role {
                            ops.push(MergeOp::Assign {
                                slot: slot.clone(),
                                target: Target::Field(ROLE),
                                value: Value::String(role),
                            });
                        }
                        for part in content.parts.unwrap_or_default() {
                            ops.push(MergeOp::AppendPart {
                                slot: slot.clone(),
                                array: PARTS,
                                value: part,
                                coalesce: Some(coalesce_text),
                            });
                        }
                    }
                    let metadata: [(FieldPath, Option<Value>); 7] = [
                        (&["finishReason"], candidate.finish_reason),
                        (&["safetyRatings"], candidate.safety_ratings),
                        (&["citationMetadata"], candidate.citation_metadata),
                        (&["groundingMetadata"], candidate.grounding_metadata),
                        (&["tokenCount"], candidate.token_count),
                        (&["avgLogprobs"], candidate.avg_logprobs),
                        (&["finishMessage"], candidate.finish_message),
                    ];
                    for (path, value) in metadata {
                        if let Some(value) = value.filter(|value| !value.is_null()) {
                            ops.push(MergeOp::Assign {
                                slot: slot.clone(),
                                target: Target::Field(path),
                                value,
                            });
                        }
                    }
                }
            }
            GeminiEventKind::Error => {
                let Some(event) = typed::<GeminiStreamError>(kind, unwrap_response(payload)) else {
                    return;
                };
                let mut patch = Map::new();
                patch.insert("error".to_owned(), event.error);
                ops.push(MergeOp::PatchEnvelope(patch));
            }
        }
    }

    fn new_slot(&self, index: usize, _id: Option<&str>) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("content".to_owned(), json!({"parts": [], "role": "model"}));
        fields.insert("index".to_owned(), json!(index));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate_gemini;

    fn sse(chunks: &[Value]) -> String {
        let mut out = String::new();
        for chunk in chunks {
            out.push_str(&format!("data: {chunk}\r\n\r\n"));
        }
        out
    }

    #[test]
    fn test_text_parts_coalesce() {
        let raw = sse(&[
            json!({"candidates": [{"content": {"parts": [{"text": "Hel"}], "role": "model"}, "index": 0}], "modelVersion": "gemini-2.5-flash", "responseId": "r1"}),
            json!({"candidates": [{"content": {"parts": [{"text": "lo"}], "role": "model"}, "index": 0}]}),
            json!({"candidates": [{"content": {"parts": [{"text": "!"}], "role": "model"}, "finishReason": "STOP", "index": 0}],
                   "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 3, "totalTokenCount": 7}}),
        ]);
        let result = aggregate_gemini(&raw);
        assert_eq!(
            result.response,
            json!({
                "candidates": [{
                    "content": {"parts": [{"text": "Hello!"}], "role": "model"},
                    "index": 0,
                    "finishReason": "STOP"
                }],
                "modelVersion": "gemini-2.5-flash",
                "responseId": "r1",
                "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 3, "totalTokenCount": 7}
            })
        );
    }

    #[test]
    fn test_thought_parts_stay_separate_from_answer() {
        let raw = sse(&[
            json!({"candidates": [{"content": {"parts": [{"text": "plan ", "thought": true}]}}]}),
            json!({"candidates": [{"content": {"parts": [{"text": "more", "thought": true}]}}]}),
            json!({"candidates": [{"content": {"parts": [{"text": "Answer", "thoughtSignature": "c2ln"}]}}]}),
            json!({"candidates": [{"content": {"parts": [{"functionCall": {"name": "f", "args": {}}}]}}]}),
            json!({"candidates": [{"content": {"parts": [{"text": "after"}]}}]}),
        ]);
        let result = aggregate_gemini(&raw);
        assert_eq!(
            result.response["candidates"][0]["content"]["parts"],
            json!([
                {"text": "plan more", "thought": true},
                {"text": "Answer", "thoughtSignature": "c2ln"},
                {"functionCall": {"name": "f", "args": {}}},
                {"text": "after"}
            ])
        );
        assert_eq!(result.response["candidates"][0]["content"]["role"], json!("model"));
    }

    #[test]
    fn test_wrapped_internal_chunks_are_unwrapped() {
        let raw = sse(&[
            json!({"response": {"candidates": [{"content": {"parts": [{"text": "wrapped"}]}}], "modelVersion": "m"}, "traceId": "x"}),
        ]);
        let result = aggregate_gemini(&raw);
        assert_eq!(
            result.response["candidates"][0]["content"]["parts"][0]["text"],
            json!("wrapped")
        );
        assert_eq!(result.response["modelVersion"], json!("m"));
        assert!(result.response.get("traceId").is_none());
    }

    #[test]
    fn test_candidates_ordered_by_index_and_metadata_last_write_wins() {
        let raw = sse(&[
            json!({"candidates": [{"index": 1, "content": {"parts": [{"text": "b"}]}, "safetyRatings": [{"probability": "LOW"}]}]}),
            json!({"candidates": [{"index": 0, "content": {"parts": [{"text": "a"}]}}]}),
            json!({"candidates": [{"index": 1, "safetyRatings": [{"probability": "NEGLIGIBLE"}], "finishReason": "STOP"}]}),
        ]);
        let result = aggregate_gemini(&raw);
        let candidates = result.response["candidates"].as_array().expect("candidates");
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0]["content"]["parts"], json!([{"text": "a"}]));
        assert_eq!(candidates[1]["safetyRatings"], json!([{"probability": "NEGLIGIBLE"}]));
        assert_eq!(candidates[1]["finishReason"], json!("STOP"));
        assert!(candidates[0].get("finishReason").is_none());
    }

    #[test]
    fn test_prompt_feedback_only_chunk() {
        let raw = sse(&[json!({"promptFeedback": {"blockReason": "SAFETY"}})]);
        let result = aggregate_gemini(&raw);
        assert_eq!(
            result.response,
            json!({"candidates": [], "promptFeedback": {"blockReason": "SAFETY"}})
        );
    }

    #[test]
    fn test_coalesce_requires_text_on_both_sides() {
        let mut last = json!({"inlineData": {"mimeType": "image/png"}});
        assert!(!coalesce_text(&mut last, &json!({"text": "x"})));
        let mut last = json!({"text": "a"});
        assert!(!coalesce_text(&mut last, &json!({"inlineData": {}})));
        assert!(coalesce_text(&mut last, &json!({"text": "b"})));
        assert_eq!(last, json!({"text": "ab"}));
    }
}
