//! Rule table of the Anthropic Messages stream.
//!
//! Content blocks are slots keyed by the block `index`. Tool input arrives
//! as partial JSON text and is parsed once the stream is finished.

use serde_json::{json, Map, Value};
use tracing::debug;

use super::{
    AnthropicDelta, AnthropicErrorEvent, AnthropicEventKind, ContentBlockDeltaEvent,
    ContentBlockStartEvent, MessageDeltaEvent, MessageStartEvent,
};
use crate::aggregate::engine::{FieldMode, MergeOp, MergeOps, SlotRef, Target};
use crate::protocol::{event_type, typed, Classified, Dialect, DialectSchema};
use crate::util::{insert_absent, FieldPath};

const TEXT: FieldPath = &["text"];
const THINKING: FieldPath = &["thinking"];
const SIGNATURE: FieldPath = &["signature"];
const INPUT: FieldPath = &["input"];
const CITATIONS: FieldPath = &["citations"];

#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicSchema;

/// Block type implied by a delta, written only when the block was never
/// started.
fn implied_type(slot: &SlotRef, block_type: &str, ops: &mut MergeOps) {
    let mut fields = Map::new();
    fields.insert("type".to_owned(), Value::String(block_type.to_owned()));
    ops.push(MergeOp::MergeSlot {
        slot: slot.clone(),
        id: None,
        fields,
        sparse: &[],
        mode: FieldMode::KeepExisting,
    });
}

fn append(slot: SlotRef, path: FieldPath, delta: String, ops: &mut MergeOps) {
    ops.push(MergeOp::AppendText {
        slot,
        target: Target::Field(path),
        delta,
    });
}

/// Parse accumulated tool input text. Empty input is an empty object;
/// text that never became valid JSON is kept verbatim.
fn parse_tool_input(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Map::new());
    }
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            debug!(error = %err, "tool input is not valid JSON, keeping raw text");
            Value::String(raw.to_owned())
        }
    }
}

impl DialectSchema for AnthropicSchema {
    type Kind = AnthropicEventKind;

    fn dialect(&self) -> Dialect {
        Dialect::Anthropic
    }

    fn output_field(&self) -> &'static str {
        "content"
    }

    fn classify(&self, event_name: Option<&str>, payload: &Value) -> Classified<Self::Kind> {
        let Some(name) = event_type(event_name, payload) else {
            return Classified::Untyped;
        };
        let kind = match name {
            "message_start" => AnthropicEventKind::MessageStart,
            "content_block_start" => AnthropicEventKind::ContentBlockStart,
            "content_block_delta" => AnthropicEventKind::ContentBlockDelta,
            "message_delta" => AnthropicEventKind::MessageDelta,
            "error" => AnthropicEventKind::Error,
            "ping" | "content_block_stop" | "message_stop" => AnthropicEventKind::Ignored,
            other => return Classified::Unknown(other.to_owned()),
        };
        Classified::Known(kind)
    }

    fn lower(&self, kind: Self::Kind, payload: Value, ops: &mut MergeOps) {
        match kind {
            AnthropicEventKind::MessageStart => {
                let Some(event) = typed::<MessageStartEvent>(kind, payload) else {
                    return;
                };
                match event.message {
                    Some(message) => ops.push(MergeOp::ReplaceEnvelope(message)),
                    None => debug!("message_start without message, dropping"),
                }
            }
            AnthropicEventKind::ContentBlockStart => {
                let Some(event) = typed::<ContentBlockStartEvent>(kind, payload) else {
                    return;
                };
                let Some(index) = event.index else {
                    debug!("content_block_start without index, dropping");
                    return;
                };
                ops.push(MergeOp::MergeSlot {
                    slot: SlotRef::Index(index),
                    id: None,
                    fields: event.content_block.unwrap_or_default(),
                    sparse: &[],
                    mode: FieldMode::Overwrite,
                });
            }
            AnthropicEventKind::ContentBlockDelta => {
                let Some(event) = typed::<ContentBlockDeltaEvent>(kind, payload) else {
                    return;
                };
                let (Some(index), Some(delta)) = (event.index, event.delta) else {
                    debug!("content_block_delta without index or delta, dropping");
                    return;
                };
                let slot = SlotRef::Index(index);
                match delta {
                    AnthropicDelta::TextDelta { text } => {
                        implied_type(&slot, "text", ops);
                        append(slot, TEXT, text, ops);
                    }
                    AnthropicDelta::ThinkingDelta { thinking } => {
                        implied_type(&slot, "thinking", ops);
                        append(slot, THINKING, thinking, ops);
                    }
                    AnthropicDelta::SignatureDelta { signature } => {
                        implied_type(&slot, "thinking", ops);
                        append(slot, SIGNATURE, signature, ops);
                    }
                    AnthropicDelta::InputJsonDelta { partial_json } => {
                        implied_type(&slot, "tool_use", ops);
                        append(slot, INPUT, partial_json, ops);
                    }
                    AnthropicDelta::CitationsDelta { citation } => {
                        implied_type(&slot, "text", ops);
                        ops.push(MergeOp::AppendPart {
                            slot,
                            array: CITATIONS,
                            value: citation,
                            coalesce: None,
                        });
                    }
                    AnthropicDelta::Other => debug!(index, "unsupported delta type, dropping"),
                }
            }
            AnthropicEventKind::MessageDelta => {
                let Some(event) = typed::<MessageDeltaEvent>(kind, payload) else {
                    return;
                };
                let mut patch = event.delta.unwrap_or_default();
                if let Some(usage) = event.usage {
                    patch.insert("usage".to_owned(), Value::Object(usage));
                }
                ops.push(MergeOp::PatchEnvelope(patch));
            }
            AnthropicEventKind::Error => {
                let Some(event) = typed::<AnthropicErrorEvent>(kind, payload) else {
                    return;
                };
                let mut patch = Map::new();
                patch.insert("error".to_owned(), event.error);
                ops.push(MergeOp::PatchEnvelope(patch));
            }
            AnthropicEventKind::Ignored => {}
        }
    }

    fn finish_slot(&self, _index: usize, mut slot: Map<String, Value>) -> Value {
        if let Some(parsed) = slot.get("input").and_then(Value::as_str).map(parse_tool_input) {
            slot.insert("input".to_owned(), parsed);
        }
        Value::Object(slot)
    }

    fn finish_envelope(&self, envelope: &mut Map<String, Value>) {
        insert_absent(envelope, "type", || json!("message"));
        insert_absent(envelope, "role", || json!("assistant"));
    }
}
