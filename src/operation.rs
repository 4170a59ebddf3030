use std::fmt::Display;

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{frames::frame_timestamp_millis, method::Method};

/// One unit of a streamed (SSE-style) response body.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct EventFrame {
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: Value,
}

impl EventFrame {
    pub fn timestamp_millis(&self) -> i64 {
        frame_timestamp_millis(&serde_json::json!({ "timestamp": self.timestamp }))
    }
}

/// Frame ids arrive as strings or numbers; both become strings.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(de::Error::custom(format!(
            "frame id must be a string or number, got {}",
            other
        ))),
    }
}

/// Read-only digest of an operation record.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct OperationSummary {
    pub id: String,
    pub method: Option<Method>,
    pub path: Option<String>,
    pub status: Option<u16>,
    pub frames: usize,
    pub duration_ms: Option<f64>,
}

impl OperationSummary {
    pub fn from_record(record: &Value) -> Self {
        let request = record.get("request");
        let response = record.get("response");

        Self {
            id: record
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            method: request
                .and_then(|r| r.get("method"))
                .and_then(Value::as_str)
                .and_then(|m| Method::try_from(m).ok()),
            path: request
                .and_then(|r| r.get("path"))
                .and_then(Value::as_str)
                .map(str::to_string),
            status: response
                .and_then(|r| r.get("status"))
                .and_then(Value::as_u64)
                .and_then(|s| u16::try_from(s).ok()),
            frames: response
                .and_then(|r| r.get("event_frames"))
                .and_then(Value::as_array)
                .map_or(0, |frames| frames.iter().filter(|f| f.is_object()).count()),
            duration_ms: record
                .get("timing")
                .and_then(|t| t.get("duration"))
                .and_then(Value::as_f64),
        }
    }
}

impl Display for OperationSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let method = self.method.map(|m| m.to_string()).unwrap_or("-".to_string());
        let status = self.status.map(|s| s.to_string()).unwrap_or("-".to_string());
        write!(
            f,
            "{} {} {} -> {} ({} frames",
            self.id,
            method,
            self.path.as_deref().unwrap_or("-"),
            status,
            self.frames
        )?;
        match self.duration_ms {
            Some(duration) => write!(f, ", {}ms)", duration),
            None => write!(f, ")"),
        }
    }
}

/// Typed view of `response.event_frames`; entries that do not decode are
/// skipped.
pub fn event_frames(record: &Value) -> Vec<EventFrame> {
    record
        .get("response")
        .and_then(|r| r.get("event_frames"))
        .and_then(Value::as_array)
        .map(|frames| {
            frames
                .iter()
                .filter_map(|frame| serde_json::from_value(frame.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn summary_of_full_record() {
        let record = json!({
            "id": "op-1",
            "request": {"method": "post", "path": "/v1/chat"},
            "response": {
                "status": 200,
                "event_frames": [
                    {"id": "1", "event": "message", "data": "a", "timestamp": "2024-01-01T00:00:01Z"},
                    {"event": "done", "data": null, "timestamp": 1704067202000_i64}
                ]
            },
            "timing": {"duration": 12.5}
        });

        let summary = OperationSummary::from_record(&record);

        assert_eq!(
            OperationSummary {
                id: "op-1".to_string(),
                method: Some(Method::Post),
                path: Some("/v1/chat".to_string()),
                status: Some(200),
                frames: 2,
                duration_ms: Some(12.5),
            },
            summary
        );
        assert_eq!("op-1 POST /v1/chat -> 200 (2 frames, 12.5ms)", summary.to_string());
    }

    #[test]
    fn summary_counts_every_object_frame() {
        let record = json!({
            "id": "op-3",
            "response": {"event_frames": [{"id": 1, "event": "message"}, {"id": 2}, {"id": [3]}, "x"]}
        });

        assert_eq!(3, OperationSummary::from_record(&record).frames);
    }

    #[test]
    fn summary_of_partial_record() {
        let summary = OperationSummary::from_record(&json!({"id": "op-2"}));

        assert_eq!("op-2 - - -> - (0 frames)", summary.to_string());
    }

    #[test]
    fn typed_frames() {
        let record = json!({"response": {"event_frames": [
            {"id": "1", "event": "message", "data": {"delta": "hi"}, "timestamp": "1970-01-01T00:00:02Z"},
            {"id": 5},
            {"id": ["bad"]}
        ]}});

        let frames = event_frames(&record);

        assert_eq!(
            vec![
                EventFrame {
                    id: Some("1".to_string()),
                    event: Some("message".to_string()),
                    data: json!({"delta": "hi"}),
                    timestamp: json!("1970-01-01T00:00:02Z"),
                },
                EventFrame {
                    id: Some("5".to_string()),
                    ..EventFrame::default()
                },
            ],
            frames
        );
        assert_eq!(2000, frames[0].timestamp_millis());
    }
}
