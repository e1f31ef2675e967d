//! Rule table of the chat-completions stream.
//!
//! One slot per choice index. Message text fields concatenate, tool calls
//! form a sparse array keyed by the tool-call index, and chunk metadata is
//! patched into the envelope.

use serde_json::{json, Map, Value};

use super::{ChatEventKind, OpenAiStreamChoice, OpenAiStreamChunk, OpenAiStreamError};
use crate::aggregate::engine::{FieldMode, MergeOp, MergeOps, PartRef, SlotRef, Target};
use crate::protocol::{classify_by_name, typed, Classified, Dialect, DialectSchema};
use crate::util::{insert_absent, FieldPath};

const ROLE: FieldPath = &["message", "role"];
const CONTENT: FieldPath = &["message", "content"];
const REFUSAL: FieldPath = &["message", "refusal"];
const REASONING_CONTENT: FieldPath = &["message", "reasoning_content"];
const REASONING: FieldPath = &["message", "reasoning"];
const TOOL_CALLS: FieldPath = &["message", "tool_calls"];
const FINISH_REASON: FieldPath = &["finish_reason"];
const LOGPROBS_CONTENT: FieldPath = &["logprobs", "content"];
const LOGPROBS_REFUSAL: FieldPath = &["logprobs", "refusal"];

const TOOL_ID: FieldPath = &["id"];
const TOOL_TYPE: FieldPath = &["type"];
const TOOL_NAME: FieldPath = &["function", "name"];
const TOOL_ARGUMENTS: FieldPath = &["function", "arguments"];

fn tool_call_placeholder() -> Value {
    json!({"id": "", "type": "function", "function": {"name": "", "arguments": ""}})
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiChatSchema;

fn is_chunk(payload: &Value) -> bool {
    payload.get("choices").is_some_and(Value::is_array)
        || payload.get("usage").is_some_and(Value::is_object)
        || payload.get("object").and_then(Value::as_str) == Some("chat.completion.chunk")
}

fn push_text(ops: &mut MergeOps, slot: &SlotRef, path: FieldPath, text: Option<String>) {
    if let Some(delta) = text {
        ops.push(MergeOp::AppendText {
            slot: slot.clone(),
            target: Target::Field(path),
            delta,
        });
    }
}

fn lower_choice(choice: OpenAiStreamChoice, ops: &mut MergeOps) {
    let slot = SlotRef::Index(choice.index.unwrap_or(0));
    ops.push(MergeOp::MergeSlot {
        slot: slot.clone(),
        id: None,
        fields: Map::new(),
        sparse: &[],
        mode: FieldMode::KeepExisting,
    });

    if let Some(delta) = choice.delta {
        if let Some(role) = delta.role {
            ops.push(MergeOp::Assign {
                slot: slot.clone(),
                target: Target::Field(ROLE),
                value: Value::String(role),
            });
        }
        push_text(ops, &slot, CONTENT, delta.content);
        push_text(ops, &slot, REFUSAL, delta.refusal);
        push_text(ops, &slot, REASONING_CONTENT, delta.reasoning_content);
        push_text(ops, &slot, REASONING, delta.reasoning);

        for (position, call) in delta.tool_calls.unwrap_or_default().into_iter().enumerate() {
            let part = PartRef {
                array: TOOL_CALLS,
                index: call.index.unwrap_or(position),
                placeholder: tool_call_placeholder,
            };
            let function = call.function;
            let (name, arguments) = match function {
                Some(function) => (function.name, function.arguments),
                None => (None, None),
            };
            let assignments = [(TOOL_ID, call.id), (TOOL_TYPE, call.type_), (TOOL_NAME, name)];
            for (field, value) in assignments {
                if let Some(value) = value {
                    ops.push(MergeOp::Assign {
                        slot: slot.clone(),
                        target: Target::Part { part, field },
                        value: Value::String(value),
                    });
                }
            }
            ops.push(MergeOp::AppendText {
                slot: slot.clone(),
                target: Target::Part {
                    part,
                    field: TOOL_ARGUMENTS,
                },
                delta: arguments.unwrap_or_default(),
            });
        }
    }

    if let Some(logprobs) = choice.logprobs {
        for (array, entries) in [
            (LOGPROBS_CONTENT, logprobs.content),
            (LOGPROBS_REFUSAL, logprobs.refusal),
        ] {
            for value in entries.unwrap_or_default() {
                ops.push(MergeOp::AppendPart {
                    slot: slot.clone(),
                    array,
                    value,
                    coalesce: None,
                });
            }
        }
    }

    if let Some(reason) = choice.finish_reason {
        ops.push(MergeOp::Assign {
            slot,
            target: Target::Field(FINISH_REASON),
            value: Value::String(reason),
        });
    }
}

impl DialectSchema for OpenAiChatSchema {
    type Kind = ChatEventKind;

    fn dialect(&self) -> Dialect {
        Dialect::OpenAiChat
    }

    fn output_field(&self) -> &'static str {
        "choices"
    }

    fn classify(&self, event_name: Option<&str>, payload: &Value) -> Classified<Self::Kind> {
        if is_chunk(payload) {
            return Classified::Known(ChatEventKind::Chunk);
        }
        classify_by_name(event_name, payload, ChatEventKind::Error)
    }

    fn lower(&self, kind: Self::Kind, payload: Value, ops: &mut MergeOps) {
        match kind {
            ChatEventKind::Chunk => {
                let Some(chunk) = typed::<OpenAiStreamChunk>(kind, payload) else {
                    return;
                };
                let mut patch = Map::new();
                if let Some(id) = chunk.id {
                    patch.insert("id".to_owned(), Value::String(id));
                }
                patch.insert("object".to_owned(), json!("chat.completion"));
                if let Some(created) = chunk.created {
                    patch.insert("created".to_owned(), json!(created));
                }
                if let Some(model) = chunk.model {
                    patch.insert("model".to_owned(), Value::String(model));
                }
                if let Some(fingerprint) = chunk.system_fingerprint {
                    patch.insert("system_fingerprint".to_owned(), Value::String(fingerprint));
                }
                if let Some(tier) = chunk.service_tier {
                    patch.insert("service_tier".to_owned(), Value::String(tier));
                }
                // Reserves the key's position ahead of `usage`; finalize fills it.
                patch.insert("choices".to_owned(), Value::Array(Vec::new()));
                if let Some(usage) = chunk.usage {
                    patch.insert("usage".to_owned(), usage);
                }
                ops.push(MergeOp::PatchEnvelope(patch));

                for choice in chunk.choices.unwrap_or_default() {
                    lower_choice(choice, ops);
                }
            }
            ChatEventKind::Error => {
                let Some(event) = typed::<OpenAiStreamError>(kind, payload) else {
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
        fields.insert("index".to_owned(), json!(index));
        fields.insert(
            "message".to_owned(),
            json!({"role": "assistant", "content": null}),
        );
        fields
    }

    fn finish_slot(&self, _index: usize, mut slot: Map<String, Value>) -> Value {
        insert_absent(&mut slot, "finish_reason", || Value::Null);
        insert_absent(&mut slot, "logprobs", || Value::Null);
        Value::Object(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate_openai_chat;

    fn sse(chunks: &[Value]) -> String {
        let mut out = String::new();
        for chunk in chunks {
            out.push_str(&format!("data: {chunk}\n\n"));
        }
        out.push_str("data: [DONE]\n\n");
        out
    }

    fn chunk(choices: Value) -> Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "created": 1_700_000_000,
            "model": "gpt-4o-mini",
            "choices": choices
        })
    }

    #[test]
    fn test_classify_by_shape() {
        let schema = OpenAiChatSchema;
        assert_eq!(
            schema.classify(None, &json!({"choices": []})),
            Classified::Known(ChatEventKind::Chunk)
        );
        assert_eq!(
            schema.classify(None, &json!({"usage": {"total_tokens": 1}, "choices": null})),
            Classified::Known(ChatEventKind::Chunk)
        );
        assert_eq!(
            schema.classify(None, &json!({"error": {"message": "rate limited"}})),
            Classified::Known(ChatEventKind::Error)
        );
        assert_eq!(
            schema.classify(None, &json!({"type": "keepalive"})),
            Classified::Unknown("keepalive".to_owned())
        );
        assert_eq!(schema.classify(None, &json!({"x": 1})), Classified::Untyped);
    }

    #[test]
    fn test_text_stream_reassembles_message() {
        let raw = sse(&[
            chunk(json!([{"index": 0, "delta": {"role": "assistant", "content": ""}}])),
            chunk(json!([{"index": 0, "delta": {"content": "Hel"}}])),
            chunk(json!([{"index": 0, "delta": {"content": "lo"}, "finish_reason": "stop"}])),
            json!({"id": "chatcmpl-1", "object": "chat.completion.chunk", "choices": [], "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}}),
        ]);
        let result = aggregate_openai_chat(&raw);
        assert_eq!(
            result.response,
            json!({
                "id": "chatcmpl-1",
                "object": "chat.completion",
                "created": 1_700_000_000,
                "model": "gpt-4o-mini",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "Hello"},
                    "finish_reason": "stop",
                    "logprobs": null
                }],
                "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
            })
        );
        assert_eq!(result.meta.event_count, 4);
    }

    #[test]
    fn test_tool_call_fragments_merge_by_index() {
        let raw = sse(&[
            chunk(json!([{"index": 0, "delta": {"role": "assistant", "tool_calls": [
                {"index": 0, "id": "call_a", "type": "function", "function": {"name": "get_weather", "arguments": ""}}
            ]}}])),
            chunk(json!([{"index": 0, "delta": {"tool_calls": [{"index": 0, "function": {"arguments": "{\"city\":"}}]}}])),
            chunk(json!([{"index": 0, "delta": {"tool_calls": [{"index": 1, "id": "call_b", "function": {"name": "get_time", "arguments": "{}"}}]}}])),
            chunk(json!([{"index": 0, "delta": {"tool_calls": [{"index": 0, "function": {"arguments": "\"Paris\"}"}}]}, "finish_reason": "tool_calls"}])),
        ]);
        let result = aggregate_openai_chat(&raw);
        let choice = &result.response["choices"][0];
        assert_eq!(choice["finish_reason"], json!("tool_calls"));
        assert_eq!(choice["message"]["content"], Value::Null);
        assert_eq!(
            choice["message"]["tool_calls"],
            json!([
                {"id": "call_a", "type": "function", "function": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}},
                {"id": "call_b", "type": "function", "function": {"name": "get_time", "arguments": "{}"}}
            ])
        );
    }

    #[test]
    fn test_tool_call_gap_is_filled_with_placeholder() {
        let raw = sse(&[chunk(json!([{"index": 0, "delta": {"tool_calls": [
            {"index": 1, "id": "call_b", "function": {"name": "late", "arguments": "{}"}}
        ]}}]))]);
        let result = aggregate_openai_chat(&raw);
        let calls = result.response["choices"][0]["message"]["tool_calls"]
            .as_array()
            .expect("tool calls");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], tool_call_placeholder());
        assert_eq!(calls[1]["id"], json!("call_b"));
    }

    #[test]
    fn test_multiple_choices_sorted_by_index() {
        let raw = sse(&[
            chunk(json!([{"index": 1, "delta": {"content": "second"}}])),
            chunk(json!([{"index": 0, "delta": {"content": "first"}}])),
        ]);
        let result = aggregate_openai_chat(&raw);
        let choices = result.response["choices"].as_array().expect("choices");
        assert_eq!(choices[0]["message"]["content"], json!("first"));
        assert_eq!(choices[1]["message"]["content"], json!("second"));
        assert_eq!(choices[1]["index"], json!(1));
        assert_eq!(choices[0]["finish_reason"], Value::Null);
    }

    #[test]
    fn test_every_choice_has_finish_reason_and_logprobs() {
        let raw = sse(&[
            chunk(json!([{"index": 0, "delta": {"content": "a"}, "logprobs": {"content": [{"token": "a"}]}}])),
            chunk(json!([{"index": 1, "delta": {"content": "b"}}])),
        ]);
        let result = aggregate_openai_chat(&raw);
        let choices = result.response["choices"].as_array().expect("choices");
        assert_eq!(choices[0]["logprobs"], json!({"content": [{"token": "a"}]}));
        for choice in choices {
            let fields = choice.as_object().expect("choice object");
            assert!(fields.contains_key("finish_reason"));
            assert!(fields.contains_key("logprobs"));
        }
        assert_eq!(choices[1]["logprobs"], Value::Null);
        assert_eq!(choices[1]["finish_reason"], Value::Null);
    }

    #[test]
    fn test_reasoning_refusal_and_logprobs() {
        let raw = sse(&[
            chunk(json!([{"index": 0, "delta": {"reasoning_content": "think "}}])),
            chunk(json!([{"index": 0, "delta": {"reasoning_content": "more", "refusal": "no"}, "logprobs": {"content": [{"token": "a"}]}}])),
            chunk(json!([{"index": 0, "delta": {}, "logprobs": {"content": [{"token": "b"}]}}])),
        ]);
        let result = aggregate_openai_chat(&raw);
        let choice = &result.response["choices"][0];
        assert_eq!(choice["message"]["reasoning_content"], json!("think more"));
        assert_eq!(choice["message"]["refusal"], json!("no"));
        assert_eq!(
            choice["logprobs"],
            json!({"content": [{"token": "a"}, {"token": "b"}]})
        );
    }

    #[test]
    fn test_error_payload_patches_envelope() {
        let raw = sse(&[
            chunk(json!([{"index": 0, "delta": {"content": "partial"}}])),
            json!({"error": {"message": "upstream reset", "type": "server_error"}}),
        ]);
        let result = aggregate_openai_chat(&raw);
        assert_eq!(
            result.response["error"],
            json!({"message": "upstream reset", "type": "server_error"})
        );
        assert_eq!(
            result.response["choices"][0]["message"]["content"],
            json!("partial")
        );
    }
}
