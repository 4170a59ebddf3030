use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::merge::StreamMeta;

pub const DEFAULT_COMPLETED_EVENTS: [&str; 2] = ["operation.completed", "response.completed"];

/// One streamed update for an operation, as delivered by the host's event
/// stream.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamUpdate {
    pub operation_id: String,
    pub event_type: String,
    #[serde(default)]
    pub event_time: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl StreamUpdate {
    pub fn stream_meta(&self) -> StreamMeta {
        StreamMeta {
            event_type: self.event_type.clone(),
            event_time: self.event_time.clone(),
        }
    }

    /// `payload.response.status`, accepting numbers and numeric strings.
    pub fn response_status(&self) -> Option<u64> {
        match self.payload.get("response")?.get("status")? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Decides when an update means no further updates are expected.
#[derive(Clone, Debug, PartialEq)]
pub struct TerminalPolicy {
    pub completed_events: Vec<String>,
}

impl Default for TerminalPolicy {
    fn default() -> Self {
        Self {
            completed_events: DEFAULT_COMPLETED_EVENTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl TerminalPolicy {
    pub fn is_terminal(&self, update: &StreamUpdate) -> bool {
        self.completed_events
            .iter()
            .any(|event| event == &update.event_type)
            || update.event_type.contains(".error")
            || update.response_status().is_some_and(|status| status >= 400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    fn update(event_type: &str, payload: Value) -> StreamUpdate {
        StreamUpdate {
            operation_id: "op-1".to_string(),
            event_type: event_type.to_string(),
            event_time: None,
            payload,
        }
    }

    #[rstest]
    #[case("operation.completed", json!({}), true)]
    #[case("response.completed", json!({}), true)]
    #[case("response.error", json!({}), true)]
    #[case("upstream.error.timeout", json!({}), true)]
    #[case("response.chunk", json!({"response": {"status": 500}}), true)]
    #[case("response.chunk", json!({"response": {"status": "404"}}), true)]
    #[case("response.chunk", json!({"response": {"status": 400}}), true)]
    #[case("response.chunk", json!({"response": {"status": 399}}), false)]
    #[case("response.chunk", json!({"response": {"status": "n/a"}}), false)]
    #[case("response.chunk", json!({"status": 500}), false)]
    #[case("operation.started", json!(null), false)]
    #[case("errors", json!({}), false)]
    fn default_policy(#[case] event_type: &str, #[case] payload: Value, #[case] expected: bool) {
        assert_eq!(
            expected,
            TerminalPolicy::default().is_terminal(&update(event_type, payload))
        );
    }

    #[test]
    fn custom_completed_events() {
        let policy = TerminalPolicy {
            completed_events: vec!["done".to_string()],
        };

        assert!(policy.is_terminal(&update("done", json!({}))));
        assert!(!policy.is_terminal(&update("operation.completed", json!({}))));
    }

    #[test]
    fn deserializes_host_event_detail() {
        let detail = json!({
            "operationId": "op-1",
            "eventType": "response.chunk",
            "eventTime": "2024-01-01T00:00:00Z",
            "payload": {"response": {"status": 200}}
        });

        let update: StreamUpdate = serde_json::from_value(detail).unwrap();

        assert_eq!(
            StreamUpdate {
                operation_id: "op-1".to_string(),
                event_type: "response.chunk".to_string(),
                event_time: Some("2024-01-01T00:00:00Z".to_string()),
                payload: json!({"response": {"status": 200}}),
            },
            update
        );
        assert_eq!(Some(200), update.response_status());
    }
}
