use chrono::DateTime;
use indexmap::IndexMap;
use serde_json::Value;

/// Identity of an event frame: `id|event|timestamp`, missing parts empty.
pub fn frame_key(frame: &Value) -> String {
    let part = |name: &str| match frame.get(name) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    format!("{}|{}|{}", part("id"), part("event"), part("timestamp"))
}

/// Frame timestamp in epoch milliseconds. Accepts RFC 3339 strings and
/// numeric milliseconds; anything else is 0.
pub fn frame_timestamp_millis(frame: &Value) -> i64 {
    match frame.get("timestamp") {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.timestamp_millis())
            .or_else(|_| s.trim().parse::<i64>())
            .unwrap_or(0),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        _ => 0,
    }
}

/// Unions two frame lists by [`frame_key`] and sorts the result by timestamp.
///
/// Incoming frames replace existing frames with the same key in place; new
/// keys are appended before sorting. The sort is stable, so frames sharing a
/// timestamp keep arrival order. Non-object entries are dropped.
pub fn merge_frames(existing: &[Value], incoming: &[Value]) -> Vec<Value> {
    let mut merged: IndexMap<String, Value> = IndexMap::new();
    for frame in existing.iter().chain(incoming).filter(|f| f.is_object()) {
        merged.insert(frame_key(frame), frame.clone());
    }

    let mut frames: Vec<Value> = merged.into_values().collect();
    frames.sort_by_key(frame_timestamp_millis);
    frames
}
