//! Dialect-agnostic merge engine.
//!
//! A dialect schema lowers every classified payload into a short list of
//! [`MergeOp`]s; this module applies them to the [`AggregationState`]. The
//! engine knows nothing about any provider's field names: every path,
//! placeholder and coalescing rule arrives inside the operation.

use serde_json::{Map, Value};
use smallvec::SmallVec;
use tracing::{debug, trace};

use super::decode::decode_frame;
use super::state::{AggregationState, Placeholder, Slot, MAX_INDEX};
use crate::protocol::{Classified, DialectSchema};
use crate::stream::Frame;
use crate::util::{
    deep_merge_non_null, force_object, push_str_value, shallow_merge, take_at_path,
    value_at_path_mut, FieldPath,
};

/// Decides whether `incoming` can be folded into the last element of an
/// append-only array. Returns `true` when it was absorbed.
pub type Coalesce = fn(&mut Value, &Value) -> bool;

/// Operations emitted by one lowered payload. Most payloads lower to one or
/// two operations.
pub type MergeOps = SmallVec<[MergeOp; 4]>;

/// How a payload addresses its slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotRef {
    Index(usize),
    /// Highest existing slot key + 1.
    Next,
    /// Registered identifier. An explicit `hint` index always wins over the
    /// registered binding.
    Id { id: String, hint: Option<usize> },
}

impl SlotRef {
    fn id(&self) -> Option<&str> {
        match self {
            Self::Id { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// Element of a sparse array inside a slot.
#[derive(Debug, Clone, Copy)]
pub struct PartRef {
    pub array: FieldPath,
    pub index: usize,
    pub placeholder: Placeholder,
}

/// Location of a scalar inside a slot.
#[derive(Debug, Clone, Copy)]
pub enum Target {
    Field(FieldPath),
    Part { part: PartRef, field: FieldPath },
}

/// List-typed item field merged element-wise into a sparse array.
#[derive(Debug, Clone, Copy)]
pub struct SparseField {
    pub path: FieldPath,
    pub placeholder: Placeholder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMode {
    Overwrite,
    /// Only fill keys the slot does not have yet.
    KeepExisting,
}

#[derive(Debug)]
pub enum MergeOp {
    /// Snapshot: replace the envelope wholesale.
    ReplaceEnvelope(Map<String, Value>),
    /// Deep-merge non-null fields into the envelope.
    PatchEnvelope(Map<String, Value>),
    /// Item added/done: resolve or create the slot and merge `fields` into
    /// it. Elements of the `sparse` list fields replace the accumulated
    /// element at the same index. `id`, when present, is registered for the
    /// resolved index.
    MergeSlot {
        slot: SlotRef,
        id: Option<String>,
        fields: Map<String, Value>,
        sparse: &'static [SparseField],
        mode: FieldMode,
    },
    /// Sub-part added (`replace == false`, element-merge) or done
    /// (`replace == true`, element-replace).
    MergePart {
        slot: SlotRef,
        part: PartRef,
        value: Map<String, Value>,
        replace: bool,
    },
    AppendPart {
        slot: SlotRef,
        array: FieldPath,
        value: Value,
        coalesce: Option<Coalesce>,
    },
    /// Delta: concatenate onto the accumulated string.
    AppendText {
        slot: SlotRef,
        target: Target,
        delta: String,
    },
    /// Last write wins; also used for the authoritative text of done events.
    Assign {
        slot: SlotRef,
        target: Target,
        value: Value,
    },
}

/// Fold one frame into `state`: decode, classify, lower, apply.
pub(crate) fn fold_frame<S: DialectSchema>(schema: &S, state: &mut AggregationState, frame: &Frame) {
    for payload in decode_frame(frame, &mut state.counters) {
        fold_payload(schema, state, frame.event.as_deref(), payload);
    }
}

pub(crate) fn fold_payload<S: DialectSchema>(
    schema: &S,
    state: &mut AggregationState,
    event_name: Option<&str>,
    payload: Value,
) {
    match schema.classify(event_name, &payload) {
        Classified::Known(kind) => {
            state.counters.event_count += 1;
            let mut ops = MergeOps::new();
            schema.lower(kind, payload, &mut ops);
            trace!(?kind, ops = ops.len(), "folding payload");
            let mut out_of_range = false;
            for op in ops {
                out_of_range |= !apply(schema, state, op);
            }
            if out_of_range {
                state.counters.out_of_range_count += 1;
                debug!(?kind, max = MAX_INDEX, "dropping operation addressing an index out of range");
            }
        }
        Classified::Unknown(name) => {
            state.counters.event_count += 1;
            if state.record_unknown(&name) {
                debug!(event_type = %name, "unrecognized event type");
            }
        }
        Classified::Untyped => {
            debug!(
                event = event_name.unwrap_or(""),
                "dropping payload without a type or a known shape"
            );
        }
    }
}

fn resolve_index(state: &AggregationState, slot: &SlotRef) -> usize {
    match slot {
        SlotRef::Index(index) => *index,
        SlotRef::Next => state.next_index(),
        SlotRef::Id { id, hint } => hint
            .or_else(|| state.index_of(id))
            .unwrap_or_else(|| state.next_index()),
    }
}

/// Resolve `slot`, creating it when absent. `None` when the resolved index
/// exceeds [`MAX_INDEX`]; nothing is registered in that case.
fn open_slot<'a, S: DialectSchema>(
    schema: &S,
    state: &'a mut AggregationState,
    slot: &SlotRef,
    id: Option<&str>,
) -> Option<&'a mut Slot> {
    let index = resolve_index(state, slot);
    if index > MAX_INDEX {
        return None;
    }
    let id = id.or_else(|| slot.id());
    if let Some(id) = id {
        state.register_id(id, index);
    }
    Some(state.slot_mut(index, || schema.new_slot(index, id)))
}

fn target_in_range(target: &Target) -> bool {
    match target {
        Target::Field(_) => true,
        Target::Part { part, .. } => part.index <= MAX_INDEX,
    }
}

/// Element-merge: objects merge shallowly, anything else is replaced.
fn merge_element(existing: &mut Value, incoming: Value) {
    match (existing, incoming) {
        (Value::Object(target), Value::Object(patch)) => shallow_merge(target, patch),
        (existing, incoming) => *existing = incoming,
    }
}

fn target_mut<'a>(slot: &'a mut Slot, target: &Target) -> &'a mut Value {
    match target {
        Target::Field(path) => value_at_path_mut(&mut slot.fields, path),
        Target::Part { part, field } => {
            let element = slot.array_mut(part.array).ensure(part.index, part.placeholder);
            value_at_path_mut(force_object(element), field)
        }
    }
}

fn merge_fields(
    slot: &mut Slot,
    mut fields: Map<String, Value>,
    sparse: &[SparseField],
    mode: FieldMode,
) {
    for field in sparse {
        match take_at_path(&mut fields, field.path) {
            Some(Value::Array(elements)) => {
                let array = slot.array_mut(field.path);
                for (index, element) in elements.into_iter().enumerate().take(MAX_INDEX + 1) {
                    array.set(index, element, field.placeholder);
                }
            }
            Some(Value::Null) | None => {}
            Some(_) => {
                debug!(path = ?field.path, "list field carried a non-list value, ignoring");
            }
        }
    }
    match mode {
        FieldMode::Overwrite => shallow_merge(&mut slot.fields, fields),
        FieldMode::KeepExisting => {
            for (key, value) in fields {
                slot.fields.entry(key).or_insert(value);
            }
        }
    }
}

/// Apply one operation. Returns `false` when it addressed an index beyond
/// [`MAX_INDEX`] and was dropped.
fn apply<S: DialectSchema>(schema: &S, state: &mut AggregationState, op: MergeOp) -> bool {
    match op {
        MergeOp::ReplaceEnvelope(envelope) => state.envelope = Some(envelope),
        MergeOp::PatchEnvelope(patch) => deep_merge_non_null(state.envelope_mut(), patch),
        MergeOp::MergeSlot {
            slot,
            id,
            fields,
            sparse,
            mode,
        } => {
            let Some(target) = open_slot(schema, state, &slot, id.as_deref()) else {
                return false;
            };
            merge_fields(target, fields, sparse, mode);
        }
        MergeOp::MergePart {
            slot,
            part,
            value,
            replace,
        } => {
            if part.index > MAX_INDEX {
                return false;
            }
            let Some(slot) = open_slot(schema, state, &slot, None) else {
                return false;
            };
            let array = slot.array_mut(part.array);
            if replace {
                array.set(part.index, Value::Object(value), part.placeholder);
            } else {
                merge_element(array.ensure(part.index, part.placeholder), Value::Object(value));
            }
        }
        MergeOp::AppendPart {
            slot,
            array,
            value,
            coalesce,
        } => {
            let Some(slot) = open_slot(schema, state, &slot, None) else {
                return false;
            };
            let array = slot.array_mut(array);
            if let (Some(coalesce), Some(last)) = (coalesce, array.last_mut()) {
                if coalesce(last, &value) {
                    return true;
                }
            }
            array.push(value);
        }
        MergeOp::AppendText {
            slot,
            target,
            delta,
        } => {
            if !target_in_range(&target) {
                return false;
            }
            let Some(slot) = open_slot(schema, state, &slot, None) else {
                return false;
            };
            push_str_value(target_mut(slot, &target), &delta);
        }
        MergeOp::Assign {
            slot,
            target,
            value,
        } => {
            if !target_in_range(&target) {
                return false;
            }
            let Some(slot) = open_slot(schema, state, &slot, None) else {
                return false;
            };
            *target_mut(slot, &target) = value;
        }
    }
    true
}
