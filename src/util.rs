use serde_json::{Map, Value};

/// Path of nested object keys, outermost first.
pub type FieldPath = &'static [&'static str];

/// Walk `path` inside `map`, creating intermediate objects as needed, and
/// return the (possibly freshly inserted `null`) leaf.
///
/// An intermediate value that is not an object is replaced by an empty one.
pub(crate) fn value_at_path_mut<'a>(map: &'a mut Map<String, Value>, path: &[&str]) -> &'a mut Value {
    let Some((leaf, parents)) = path.split_last() else {
        unreachable!("field paths are never empty");
    };
    let mut current = map;
    for key in parents {
        let slot = current
            .entry((*key).to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        current = force_object(slot);
    }
    current.entry((*leaf).to_owned()).or_insert(Value::Null)
}

/// Borrow `value` as an object, replacing it with an empty one first when it
/// is anything else.
pub(crate) fn force_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just made an object"),
    }
}

/// Remove and return the value at `path`, leaving parents in place.
pub(crate) fn take_at_path(map: &mut Map<String, Value>, path: &[&str]) -> Option<Value> {
    let (leaf, parents) = path.split_last()?;
    let mut current = map;
    for key in parents {
        current = current.get_mut(*key)?.as_object_mut()?;
    }
    current.shift_remove(*leaf)
}

pub(crate) fn insert_at_path(map: &mut Map<String, Value>, path: &[&str], value: Value) {
    *value_at_path_mut(map, path) = value;
}

/// Append `delta` to a string value. Anything that is not a string yet
/// (absent, `null`, a number) starts over from the empty string.
#[inline]
pub(crate) fn push_str_value(target: &mut Value, delta: &str) {
    match target {
        Value::String(existing) => existing.push_str(delta),
        other => *other = Value::String(delta.to_owned()),
    }
}

/// Deep-merge `patch` into `target`, skipping `null` values.
///
/// Objects merge recursively; every other value overwrites.
pub(crate) fn deep_merge_non_null(target: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        match value {
            Value::Null => {}
            Value::Object(inner) => match target.get_mut(&key) {
                Some(Value::Object(existing)) => deep_merge_non_null(existing, inner),
                _ => {
                    let mut fresh = Map::new();
                    deep_merge_non_null(&mut fresh, inner);
                    target.insert(key, Value::Object(fresh));
                }
            },
            other => {
                target.insert(key, other);
            }
        }
    }
}

/// Shallow merge: every key of `patch` overwrites the one in `target`.
#[inline]
pub(crate) fn shallow_merge(target: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        target.insert(key, value);
    }
}

/// Insert `key` only when it is absent.
#[inline]
pub(crate) fn insert_absent(map: &mut Map<String, Value>, key: &str, value: impl FnOnce() -> Value) {
    if !map.contains_key(key) {
        map.insert(key.to_owned(), value());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_value_at_path_mut_creates_intermediates() {
        let mut map = Map::new();
        *value_at_path_mut(&mut map, &["message", "content"]) = json!("hi");
        assert_eq!(Value::Object(map), json!({"message": {"content": "hi"}}));
    }

    #[test]
    fn test_value_at_path_mut_replaces_non_object_parent() {
        let mut map = obj(json!({"message": "oops"}));
        insert_at_path(&mut map, &["message", "role"], json!("assistant"));
        assert_eq!(Value::Object(map), json!({"message": {"role": "assistant"}}));
    }

    #[test]
    fn test_take_at_path_removes_leaf_only() {
        let mut map = obj(json!({"message": {"tool_calls": [1], "role": "assistant"}}));
        assert_eq!(take_at_path(&mut map, &["message", "tool_calls"]), Some(json!([1])));
        assert_eq!(take_at_path(&mut map, &["message", "tool_calls"]), None);
        assert_eq!(Value::Object(map), json!({"message": {"role": "assistant"}}));
    }

    #[test]
    fn test_push_str_value_resets_non_string() {
        let mut value = json!(3);
        push_str_value(&mut value, "a");
        push_str_value(&mut value, "b");
        assert_eq!(value, json!("ab"));
    }

    #[test]
    fn test_deep_merge_skips_null_and_recurses() {
        let mut target = obj(json!({"usage": {"input_tokens": 5}, "stop_reason": "x"}));
        deep_merge_non_null(
            &mut target,
            obj(json!({"usage": {"output_tokens": 9}, "stop_reason": null, "id": "m1"})),
        );
        assert_eq!(
            Value::Object(target),
            json!({"usage": {"input_tokens": 5, "output_tokens": 9}, "stop_reason": "x", "id": "m1"})
        );
    }

    #[test]
    fn test_deep_merge_drops_nested_nulls_in_new_objects() {
        let mut target = Map::new();
        deep_merge_non_null(&mut target, obj(json!({"delta": {"a": null, "b": 1}})));
        assert_eq!(Value::Object(target), json!({"delta": {"b": 1}}));
    }

    #[test]
    fn test_insert_absent_keeps_existing() {
        let mut map = obj(json!({"role": "user"}));
        insert_absent(&mut map, "role", || json!("assistant"));
        insert_absent(&mut map, "type", || json!("message"));
        assert_eq!(Value::Object(map), json!({"role": "user", "type": "message"}));
    }
}
