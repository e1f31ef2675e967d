//! Mutable per-stream aggregation state.
//!
//! Slots live in a hash map keyed by their positional index; the finalizer
//! sorts the keys explicitly, so nothing here depends on iteration order.

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use smallvec::SmallVec;

use crate::util::{insert_at_path, FieldPath};

/// Builds the element written into a sparse-array gap.
pub type Placeholder = fn() -> Value;

/// Highest slot or sub-part index a payload may address. Operations naming a
/// larger index are dropped and counted in [`Counters::out_of_range_count`].
pub const MAX_INDEX: usize = 4095;

/// Ordered map from index to element with fill-on-demand.
///
/// Writing index `k` first fills every missing index below `k` with the
/// caller's placeholder, so the array is always dense from zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseArray {
    elems: BTreeMap<usize, Value>,
}

impl SparseArray {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of elements, i.e. highest written index + 1.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elems
            .last_key_value()
            .map_or(0, |(index, _)| index.saturating_add(1))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.elems.get(&index)
    }

    fn fill_below(&mut self, index: usize, placeholder: Placeholder) {
        for gap in self.len()..index {
            self.elems.insert(gap, placeholder());
        }
    }

    /// Element at `index`, created from `placeholder` (together with every
    /// missing lower index) when absent.
    pub fn ensure(&mut self, index: usize, placeholder: Placeholder) -> &mut Value {
        self.fill_below(index, placeholder);
        self.elems.entry(index).or_insert_with(placeholder)
    }

    /// Overwrite the element at `index`, filling the gap below it.
    pub fn set(&mut self, index: usize, value: Value, placeholder: Placeholder) {
        self.fill_below(index, placeholder);
        self.elems.insert(index, value);
    }

    pub fn push(&mut self, value: Value) {
        let next = self.len();
        self.elems.insert(next, value);
    }

    pub fn last_mut(&mut self) -> Option<&mut Value> {
        self.elems.last_entry().map(|entry| entry.into_mut())
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<Value> {
        self.elems.into_values().collect()
    }
}

/// One positional entry of the response (output item, choice, content block,
/// candidate).
#[derive(Debug, Clone, Default)]
pub struct Slot {
    pub fields: Map<String, Value>,
    arrays: SmallVec<[(FieldPath, SparseArray); 2]>,
}

impl Slot {
    #[must_use]
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            arrays: SmallVec::new(),
        }
    }

    /// Sparse array stored at `path`, created empty on first use.
    pub fn array_mut(&mut self, path: FieldPath) -> &mut SparseArray {
        let pos = match self.arrays.iter().position(|(p, _)| *p == path) {
            Some(pos) => pos,
            None => {
                self.arrays.push((path, SparseArray::new()));
                self.arrays.len() - 1
            }
        };
        &mut self.arrays[pos].1
    }

    #[must_use]
    pub fn array(&self, path: FieldPath) -> Option<&SparseArray> {
        self.arrays
            .iter()
            .find_map(|(p, array)| (*p == path).then_some(array))
    }

    /// Plain field map with every sparse array written back at its path.
    #[must_use]
    pub fn into_fields(self) -> Map<String, Value> {
        let mut fields = self.fields;
        for (path, array) in self.arrays {
            insert_at_path(&mut fields, path, Value::Array(array.into_vec()));
        }
        fields
    }
}

#[derive(Debug, Clone, Default)]
pub struct Counters {
    /// Payloads that carried a type name or a recognized shape.
    pub event_count: u64,
    pub parse_error_count: u64,
    /// Payloads with at least one operation beyond [`MAX_INDEX`].
    pub out_of_range_count: u64,
    pub unknown_event_types: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct AggregationState {
    pub envelope: Option<Map<String, Value>>,
    pub slots: FxHashMap<usize, Slot>,
    id_to_index: FxHashMap<String, usize>,
    pub counters: Counters,
}

impl AggregationState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest existing slot key + 1, or 0 when there are no slots.
    #[must_use]
    pub fn next_index(&self) -> usize {
        self.slots
            .keys()
            .max()
            .map_or(0, |max| max.saturating_add(1))
    }

    #[must_use]
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.id_to_index.get(id).copied()
    }

    /// Bind `id` to `index` unless it is already bound. Identifiers never
    /// migrate.
    pub fn register_id(&mut self, id: &str, index: usize) {
        if !self.id_to_index.contains_key(id) {
            self.id_to_index.insert(id.to_owned(), index);
        }
    }

    /// Slot at `index`, created from `init` when absent.
    pub fn slot_mut(&mut self, index: usize, init: impl FnOnce() -> Map<String, Value>) -> &mut Slot {
        self.slots
            .entry(index)
            .or_insert_with(|| Slot::new(init()))
    }

    pub fn envelope_mut(&mut self) -> &mut Map<String, Value> {
        self.envelope.get_or_insert_with(Map::new)
    }

    pub fn record_unknown(&mut self, name: &str) -> bool {
        if self.counters.unknown_event_types.contains(name) {
            return false;
        }
        self.counters.unknown_event_types.insert(name.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn empty_part() -> Value {
        json!({})
    }

    const CONTENT: FieldPath = &["content"];

    #[test]
    fn test_sparse_array_fill_on_write() {
        let mut array = SparseArray::new();
        array.set(3, json!({"k": 3}), empty_part);
        assert_eq!(array.len(), 4);
        assert_eq!(
            array.into_vec(),
            vec![json!({}), json!({}), json!({}), json!({"k": 3})]
        );
    }

    #[test]
    fn test_sparse_array_ensure_keeps_existing() {
        let mut array = SparseArray::new();
        array.set(0, json!("a"), empty_part);
        *array.ensure(0, empty_part) = json!("b");
        array.ensure(2, empty_part);
        assert_eq!(array.into_vec(), vec![json!("b"), json!({}), json!({})]);
    }

    #[test]
    fn test_sparse_array_push_and_last() {
        let mut array = SparseArray::new();
        assert!(array.last_mut().is_none());
        array.push(json!(1));
        array.push(json!(2));
        *array.last_mut().expect("last") = json!(3);
        assert_eq!(array.into_vec(), vec![json!(1), json!(3)]);
    }

    #[test]
    fn test_slot_into_fields_writes_arrays_at_path() {
        let mut slot = Slot::new(json!({"index": 0, "message": {"role": "assistant"}})
            .as_object()
            .cloned()
            .expect("object"));
        slot.array_mut(&["message", "tool_calls"])
            .push(json!({"id": "call_1"}));
        slot.array_mut(CONTENT).push(json!("x"));
        assert!(slot.array(CONTENT).is_some());
        assert_eq!(
            Value::Object(slot.into_fields()),
            json!({
                "index": 0,
                "message": {"role": "assistant", "tool_calls": [{"id": "call_1"}]},
                "content": ["x"]
            })
        );
    }

    #[test]
    fn test_next_index_is_highest_key_plus_one() {
        let mut state = AggregationState::new();
        assert_eq!(state.next_index(), 0);
        state.slot_mut(4, Map::new);
        assert_eq!(state.next_index(), 5);
        state.slot_mut(1, Map::new);
        assert_eq!(state.next_index(), 5);
    }

    #[test]
    fn test_index_arithmetic_saturates() {
        let mut state = AggregationState::new();
        state.slot_mut(usize::MAX, Map::new);
        assert_eq!(state.next_index(), usize::MAX);

        let mut array = SparseArray::new();
        array.push(json!(0));
        assert_eq!(array.len(), 1);
    }

    #[test]
    fn test_register_id_is_append_only() {
        let mut state = AggregationState::new();
        state.register_id("item_a", 0);
        state.register_id("item_a", 3);
        assert_eq!(state.index_of("item_a"), Some(0));
        assert_eq!(state.index_of("item_b"), None);
    }

    #[test]
    fn test_record_unknown_once() {
        let mut state = AggregationState::new();
        assert!(state.record_unknown("mystery"));
        assert!(!state.record_unknown("mystery"));
        assert_eq!(state.counters.unknown_event_types.len(), 1);
    }
}
