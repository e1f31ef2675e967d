//! Rule table of the `OpenAI` Responses stream.
//!
//! Items are addressed by `output_index`; sub-parts and text streams by
//! `item_id` with `output_index` as a hint. The envelope comes from the
//! lifecycle snapshots, the `output` list is always rebuilt from slots.

use serde_json::{json, Map, Value};
use tracing::debug;

use super::{
    ContentPartEvent, ItemTextEvent, ItemTextField, OutputItemEvent, PartTextDeltaEvent,
    PartTextDoneEvent, PartTextField, ResponseSnapshotEvent, ResponsesErrorEvent,
    ResponsesEventKind, SummaryPartEvent, SummaryTextEvent,
};
use crate::aggregate::engine::{
    FieldMode, MergeOp, MergeOps, PartRef, SlotRef, SparseField, Target,
};
use crate::aggregate::state::Placeholder;
use crate::protocol::{event_type, typed, Classified, Dialect, DialectSchema};
use crate::util::FieldPath;

const CONTENT: FieldPath = &["content"];
const SUMMARY: FieldPath = &["summary"];
const TEXT: FieldPath = &["text"];
const REFUSAL: FieldPath = &["refusal"];
const LOGPROBS: FieldPath = &["logprobs"];

const ITEM_LISTS: &[SparseField] = &[
    SparseField {
        path: CONTENT,
        placeholder: empty_part,
    },
    SparseField {
        path: SUMMARY,
        placeholder: summary_text_part,
    },
];

const PROGRESS_SUFFIXES: &[&str] = &[
    ".in_progress",
    ".searching",
    ".completed",
    ".generating",
    ".interpreting",
    ".partial_image",
    ".failed",
];

fn empty_part() -> Value {
    Value::Object(Map::new())
}

fn output_text_part() -> Value {
    json!({"type": "output_text", "text": "", "annotations": [], "logprobs": []})
}

fn refusal_part() -> Value {
    json!({"type": "refusal", "refusal": ""})
}

fn reasoning_text_part() -> Value {
    json!({"type": "reasoning_text", "text": ""})
}

fn summary_text_part() -> Value {
    json!({"type": "summary_text", "text": ""})
}

impl PartTextField {
    fn field(self) -> FieldPath {
        match self {
            PartTextField::OutputText | PartTextField::ReasoningText => TEXT,
            PartTextField::Refusal => REFUSAL,
        }
    }

    fn placeholder(self) -> Placeholder {
        match self {
            PartTextField::OutputText => output_text_part,
            PartTextField::Refusal => refusal_part,
            PartTextField::ReasoningText => reasoning_text_part,
        }
    }
}

impl ItemTextField {
    fn field(self) -> FieldPath {
        match self {
            ItemTextField::FunctionCallArguments | ItemTextField::McpCallArguments => {
                &["arguments"]
            }
            ItemTextField::CustomToolCallInput => &["input"],
            ItemTextField::CodeInterpreterCode => &["code"],
        }
    }
}

/// Owning item of a sub-part or text stream: identifier first (with the
/// index as hint), bare index otherwise.
fn item_slot(item_id: Option<String>, output_index: Option<usize>) -> Option<SlotRef> {
    match (item_id, output_index) {
        (Some(id), hint) => Some(SlotRef::Id { id, hint }),
        (None, Some(index)) => Some(SlotRef::Index(index)),
        (None, None) => None,
    }
}

fn dropped(kind: ResponsesEventKind, reason: &'static str) {
    debug!(?kind, reason, "dropping event without addressing");
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiResponsesSchema;

impl OpenAiResponsesSchema {
    fn classify_name(name: &str) -> Option<ResponsesEventKind> {
        use ResponsesEventKind as K;
        let kind = match name {
            "response.created" | "response.in_progress" | "response.completed"
            | "response.queued" | "response.failed" | "response.incomplete" => K::Snapshot,
            "response.output_item.added" => K::OutputItem { done: false },
            "response.output_item.done" => K::OutputItem { done: true },
            "response.content_part.added" => K::ContentPart { done: false },
            "response.content_part.done" => K::ContentPart { done: true },
            "response.output_text.delta" => K::PartText {
                field: PartTextField::OutputText,
                done: false,
            },
            "response.output_text.done" => K::PartText {
                field: PartTextField::OutputText,
                done: true,
            },
            "response.refusal.delta" => K::PartText {
                field: PartTextField::Refusal,
                done: false,
            },
            "response.refusal.done" => K::PartText {
                field: PartTextField::Refusal,
                done: true,
            },
            "response.reasoning_text.delta" => K::PartText {
                field: PartTextField::ReasoningText,
                done: false,
            },
            "response.reasoning_text.done" => K::PartText {
                field: PartTextField::ReasoningText,
                done: true,
            },
            "response.reasoning_summary_part.added" => K::SummaryPart { done: false },
            "response.reasoning_summary_part.done" => K::SummaryPart { done: true },
            "response.reasoning_summary_text.delta" => K::SummaryText { done: false },
            "response.reasoning_summary_text.done" => K::SummaryText { done: true },
            "error" => K::Error,
            "response.output_text.annotation.added" => K::Progress,
            _ => return Self::classify_item_text(name).or_else(|| Self::classify_progress(name)),
        };
        Some(kind)
    }

    fn classify_item_text(name: &str) -> Option<ResponsesEventKind> {
        let (stream, suffix) = name.strip_prefix("response.")?.rsplit_once('.')?;
        let field = match stream {
            "function_call_arguments" => ItemTextField::FunctionCallArguments,
            "custom_tool_call_input" => ItemTextField::CustomToolCallInput,
            "mcp_call_arguments" => ItemTextField::McpCallArguments,
            "code_interpreter_call_code" => ItemTextField::CodeInterpreterCode,
            _ => return None,
        };
        let done = match suffix {
            "delta" => false,
            "done" => true,
            _ => return None,
        };
        Some(ResponsesEventKind::ItemText { field, done })
    }

    fn classify_progress(name: &str) -> Option<ResponsesEventKind> {
        (name.starts_with("response.")
            && PROGRESS_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)))
        .then_some(ResponsesEventKind::Progress)
    }
}

impl DialectSchema for OpenAiResponsesSchema {
    type Kind = ResponsesEventKind;

    fn dialect(&self) -> Dialect {
        Dialect::OpenAiResponses
    }

    fn output_field(&self) -> &'static str {
        "output"
    }

    fn classify(&self, event_name: Option<&str>, payload: &Value) -> Classified<Self::Kind> {
        match event_type(event_name, payload) {
            Some(name) => match Self::classify_name(name) {
                Some(kind) => Classified::Known(kind),
                None => Classified::Unknown(name.to_owned()),
            },
            None => Classified::Untyped,
        }
    }

    fn lower(&self, kind: Self::Kind, payload: Value, ops: &mut MergeOps) {
        use ResponsesEventKind as K;
        match kind {
            K::Snapshot => {
                let Some(event) = typed::<ResponseSnapshotEvent>(kind, payload) else {
                    return;
                };
                match event.response {
                    Some(response) => ops.push(MergeOp::ReplaceEnvelope(response)),
                    None => dropped(kind, "snapshot without response object"),
                }
            }
            K::OutputItem { .. } => {
                let Some(event) = typed::<OutputItemEvent>(kind, payload) else {
                    return;
                };
                let Some(item) = event.item else {
                    return dropped(kind, "missing item");
                };
                let id = item.get("id").and_then(Value::as_str).map(str::to_owned);
                let slot = match (event.output_index, &id) {
                    (Some(index), _) => SlotRef::Index(index),
                    (None, Some(id)) => SlotRef::Id {
                        id: id.clone(),
                        hint: None,
                    },
                    (None, None) => SlotRef::Next,
                };
                ops.push(MergeOp::MergeSlot {
                    slot,
                    id,
                    fields: item,
                    sparse: ITEM_LISTS,
                    mode: FieldMode::Overwrite,
                });
            }
            K::ContentPart { done } => {
                let Some(event) = typed::<ContentPartEvent>(kind, payload) else {
                    return;
                };
                let (Some(slot), Some(index)) = (
                    item_slot(event.item_id, event.output_index),
                    event.content_index,
                ) else {
                    return dropped(kind, "missing item_id or content_index");
                };
                ops.push(MergeOp::MergePart {
                    slot,
                    part: PartRef {
                        array: CONTENT,
                        index,
                        placeholder: empty_part,
                    },
                    value: event.part.unwrap_or_default(),
                    replace: done,
                });
            }
            K::PartText { field, done: false } => {
                let Some(event) = typed::<PartTextDeltaEvent>(kind, payload) else {
                    return;
                };
                let (Some(slot), Some(index)) = (
                    item_slot(event.item_id, event.output_index),
                    event.content_index,
                ) else {
                    return dropped(kind, "missing item_id or content_index");
                };
                ops.push(MergeOp::AppendText {
                    slot,
                    target: Target::Part {
                        part: PartRef {
                            array: CONTENT,
                            index,
                            placeholder: field.placeholder(),
                        },
                        field: field.field(),
                    },
                    delta: event.delta,
                });
            }
            K::PartText { field, done: true } => {
                let Some(event) = typed::<PartTextDoneEvent>(kind, payload) else {
                    return;
                };
                let (Some(slot), Some(index)) = (
                    item_slot(event.item_id, event.output_index),
                    event.content_index,
                ) else {
                    return dropped(kind, "missing item_id or content_index");
                };
                let part = PartRef {
                    array: CONTENT,
                    index,
                    placeholder: field.placeholder(),
                };
                if let Some(logprobs) = event.logprobs.filter(|_| field == PartTextField::OutputText) {
                    ops.push(MergeOp::Assign {
                        slot: slot.clone(),
                        target: Target::Part {
                            part,
                            field: LOGPROBS,
                        },
                        value: Value::Array(logprobs),
                    });
                }
                match event.text {
                    Some(text) => ops.push(MergeOp::Assign {
                        slot,
                        target: Target::Part {
                            part,
                            field: field.field(),
                        },
                        value: Value::String(text),
                    }),
                    None => ops.push(MergeOp::MergePart {
                        slot,
                        part,
                        value: Map::new(),
                        replace: false,
                    }),
                }
            }
            K::SummaryPart { done } => {
                let Some(event) = typed::<SummaryPartEvent>(kind, payload) else {
                    return;
                };
                let (Some(slot), Some(index)) = (
                    item_slot(event.item_id, event.output_index),
                    event.summary_index,
                ) else {
                    return dropped(kind, "missing item_id or summary_index");
                };
                let replace = done && event.part.is_some();
                ops.push(MergeOp::MergePart {
                    slot,
                    part: PartRef {
                        array: SUMMARY,
                        index,
                        placeholder: summary_text_part,
                    },
                    value: event.part.unwrap_or_default(),
                    replace,
                });
            }
            K::SummaryText { done } => {
                let Some(event) = typed::<SummaryTextEvent>(kind, payload) else {
                    return;
                };
                let (Some(slot), Some(index)) = (
                    item_slot(event.item_id, event.output_index),
                    event.summary_index,
                ) else {
                    return dropped(kind, "missing item_id or summary_index");
                };
                let part = PartRef {
                    array: SUMMARY,
                    index,
                    placeholder: summary_text_part,
                };
                let target = Target::Part { part, field: TEXT };
                let op = match (done, event.delta, event.text) {
                    (false, delta, _) => MergeOp::AppendText {
                        slot,
                        target,
                        delta: delta.unwrap_or_default(),
                    },
                    (true, _, Some(text)) => MergeOp::Assign {
                        slot,
                        target,
                        value: Value::String(text),
                    },
                    (true, _, None) => MergeOp::MergePart {
                        slot,
                        part,
                        value: Map::new(),
                        replace: false,
                    },
                };
                ops.push(op);
            }
            K::ItemText { field, done } => {
                let Some(event) = typed::<ItemTextEvent>(kind, payload) else {
                    return;
                };
                let Some(slot) = item_slot(event.item_id, event.output_index) else {
                    return dropped(kind, "missing item_id");
                };
                let target = Target::Field(field.field());
                if !done {
                    ops.push(MergeOp::AppendText {
                        slot,
                        target,
                        delta: event.delta.unwrap_or_default(),
                    });
                } else if let Some(value) = event.value {
                    ops.push(MergeOp::Assign {
                        slot,
                        target,
                        value: Value::String(value),
                    });
                }
            }
            K::Error => {
                let Some(event) = typed::<ResponsesErrorEvent>(kind, payload) else {
                    return;
                };
                let mut error = Map::new();
                if let Some(code) = event.code {
                    error.insert("code".to_owned(), code);
                }
                if let Some(message) = event.message {
                    error.insert("message".to_owned(), Value::String(message));
                }
                if let Some(param) = event.param {
                    error.insert("param".to_owned(), param);
                }
                let mut patch = Map::new();
                patch.insert("error".to_owned(), Value::Object(error));
                ops.push(MergeOp::PatchEnvelope(patch));
            }
            K::Progress => {}
        }
    }

    fn new_slot(&self, index: usize, id: Option<&str>) -> Map<String, Value> {
        let mut fields = Map::new();
        let id = id.map_or_else(|| format!("item_{index}"), str::to_owned);
        fields.insert("id".to_owned(), Value::String(id));
        fields
    }
}
