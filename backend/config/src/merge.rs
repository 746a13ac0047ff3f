//! Map merging used by the composition pipeline.

use serde_json::{Map, Value};

/// Deep-merge `src` into `dst`. Nested maps merge key by key; any other
/// value in `src` replaces what `dst` held.
pub fn merge_into(dst: &mut Map<String, Value>, src: Map<String, Value>) {
    for (key, value) in src {
        match (dst.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_into(existing, incoming);
            }
            (_, value) => {
                dst.insert(key, value);
            }
        }
    }
}

/// Assign `value` at `path`, creating intermediate maps and replacing any
/// scalar that sits where a map is needed.
pub fn set_path(map: &mut Map<String, Value>, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut cursor = map;
    for segment in parents {
        let slot = cursor
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        cursor = match slot {
            Value::Object(inner) => inner,
            _ => unreachable!("slot was just made an object"),
        };
    }
    cursor.insert(last.to_string(), value);
}

/// Expand delimiter-joined keys into nested maps. Keys are processed in
/// map order, so a deeper key wins over a scalar at its prefix.
pub fn unflatten(flat: Map<String, Value>, delimiter: &str) -> Map<String, Value> {
    if delimiter.is_empty() {
        return flat;
    }
    let mut out = Map::new();
    for (key, value) in flat {
        let parts: Vec<&str> = key.split(delimiter).collect();
        set_path(&mut out, &parts, value);
    }
    out
}
