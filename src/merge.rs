use serde_json::{Map, Value};

use crate::frames::merge_frames;

const NESTED_SECTIONS: [&str; 4] = ["request", "response", "timing", "meta"];

/// Stream context recorded under `meta.stream` when a merge comes from a
/// streamed update.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamMeta {
    pub event_type: String,
    pub event_time: Option<String>,
}

/// Folds `incoming` into `current`.
///
/// Top-level fields of `incoming` win. The `request`, `response`, `timing`
/// and `meta` sections are merged recursively, and `response.event_frames`
/// is unioned instead of replaced. A non-object `incoming` leaves `current`
/// as it is.
pub fn merge_operation_details(
    current: Option<&Value>,
    incoming: &Value,
    id: &str,
    stream: Option<&StreamMeta>,
) -> Option<Value> {
    let Value::Object(incoming) = incoming else {
        return current.cloned();
    };

    let mut merged = match current {
        Some(Value::Object(base)) => base.clone(),
        _ => Map::new(),
    };

    for (key, value) in incoming {
        match merged.get_mut(key) {
            Some(existing) if NESTED_SECTIONS.contains(&key.as_str()) => {
                deep_merge(existing, value);
            }
            _ => {
                merged.insert(key.clone(), value.clone());
            }
        }
    }

    let incoming_frames = incoming
        .get("response")
        .and_then(|response| response.get("event_frames"))
        .and_then(Value::as_array);
    if let Some(incoming_frames) = incoming_frames {
        let existing = event_frames(current).map(Vec::as_slice).unwrap_or_default();
        if let Some(Value::Object(response)) = merged.get_mut("response") {
            response.insert(
                "event_frames".to_string(),
                Value::Array(merge_frames(existing, incoming_frames)),
            );
        }
    }

    merged.insert("id".to_string(), Value::String(id.to_string()));

    if let Some(stream) = stream {
        let meta = merged
            .entry("meta")
            .or_insert_with(|| Value::Object(Map::new()));
        if !meta.is_object() {
            *meta = Value::Object(Map::new());
        }
        if let Value::Object(meta) = meta {
            meta.insert(
                "stream".to_string(),
                serde_json::json!({
                    "last_event": stream.event_type,
                    "last_event_at": stream.event_time,
                }),
            );
        }
    }

    Some(Value::Object(merged))
}

fn event_frames(record: Option<&Value>) -> Option<&Vec<Value>> {
    record?.get("response")?.get("event_frames")?.as_array()
}

/// Objects merge key by key; any other incoming value replaces the target.
fn deep_merge(target: &mut Value, incoming: &Value) {
    match (target, incoming) {
        (Value::Object(target), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match target.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, incoming) => *target = incoming.clone(),
    }
}
