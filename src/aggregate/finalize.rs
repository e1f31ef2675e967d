use serde_json::Value;
use tracing::debug;

use super::state::AggregationState;
use super::{AggregateMeta, Aggregated};
use crate::protocol::DialectSchema;

/// Turn the aggregation state into the dialect's non-streaming response.
///
/// Slot keys are sorted explicitly; the positional list is always written,
/// empty when no slot was ever referenced.
pub(crate) fn finalize<S: DialectSchema>(schema: &S, state: AggregationState) -> Aggregated {
    let AggregationState {
        envelope,
        mut slots,
        counters,
        ..
    } = state;

    let mut keys: Vec<usize> = slots.keys().copied().collect();
    keys.sort_unstable();
    let output: Vec<Value> = keys
        .into_iter()
        .filter_map(|index| {
            slots
                .remove(&index)
                .map(|slot| schema.finish_slot(index, slot.into_fields()))
        })
        .collect();

    let mut envelope = envelope.unwrap_or_default();
    let slot_count = output.len();
    envelope.insert(schema.output_field().to_owned(), Value::Array(output));
    schema.finish_envelope(&mut envelope);

    let meta = AggregateMeta {
        event_count: counters.event_count,
        parse_error_count: counters.parse_error_count,
        unknown_event_types: counters.unknown_event_types.into_iter().collect(),
        out_of_range_count: counters.out_of_range_count,
    };
    debug!(
        dialect = %schema.dialect(),
        slots = slot_count,
        events = meta.event_count,
        parse_errors = meta.parse_error_count,
        unknown_types = meta.unknown_event_types.len(),
        out_of_range = meta.out_of_range_count,
        "stream aggregated"
    );

    Aggregated {
        response: Value::Object(envelope),
        meta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OpenAiResponsesSchema;
    use serde_json::{json, Map};

    #[test]
    fn test_finalize_empty_state() {
        let result = finalize(&OpenAiResponsesSchema, AggregationState::new());
        assert_eq!(result.response, json!({"output": []}));
        assert_eq!(result.meta, AggregateMeta::default());
    }

    #[test]
    fn test_finalize_sorts_slots_and_overrides_snapshot_output() {
        let mut state = AggregationState::new();
        let mut envelope = Map::new();
        envelope.insert("id".to_owned(), json!("resp"));
        envelope.insert("output".to_owned(), json!([{"stale": true}]));
        state.envelope = Some(envelope);
        for index in [7, 2, 5] {
            state.slot_mut(index, || {
                let mut fields = Map::new();
                fields.insert("n".to_owned(), json!(index));
                fields
            });
        }
        state.counters.unknown_event_types.insert("z".to_owned());
        state.counters.unknown_event_types.insert("a".to_owned());

        let result = finalize(&OpenAiResponsesSchema, state);
        assert_eq!(
            result.response,
            json!({"id": "resp", "output": [{"n": 2}, {"n": 5}, {"n": 7}]})
        );
        assert_eq!(result.meta.unknown_event_types, vec!["a", "z"]);
    }
}
