use serde::Serialize;
use tokio::sync::broadcast;

use crate::stream::StreamUpdate;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// User-visible notice, rendered by the host as a toast.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    pub sub_message: Option<String>,
}

impl Notification {
    pub fn error(message: impl ToString, sub_message: impl ToString) -> Self {
        Self {
            level: NotificationLevel::Error,
            message: message.to_string(),
            sub_message: Some(sub_message.to_string()),
        }
    }
}

/// Messages exchanged between dashboard components.
#[derive(Clone, Debug, PartialEq)]
pub enum Signal {
    OperationStreamUpdate(StreamUpdate),
    OpenRequestHeaders { operation_id: String },
    Notify(Notification),
}

impl Signal {
    /// Event name used by hosts that still bridge to named browser events.
    pub fn name(&self) -> &'static str {
        match self {
            Signal::OperationStreamUpdate(_) => "inspectr:operation-stream-update",
            Signal::OpenRequestHeaders { .. } => "inspectr:openRequestHeaders",
            Signal::Notify(_) => "inspectr:notification",
        }
    }
}

/// Broadcast channel shared by everything that lives in one dashboard
/// context.
#[derive(Clone)]
pub struct SignalBus {
    tx: broadcast::Sender<Signal>,
}

impl SignalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns how many subscribers received the signal.
    pub fn publish(&self, signal: Signal) -> usize {
        tracing::trace!(signal = signal.name(), "publish");
        self.tx.send(signal).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.tx.subscribe()
    }

    pub fn notify(&self, notification: Notification) -> usize {
        self.publish(Signal::Notify(notification))
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(Signal::OpenRequestHeaders { operation_id: "op-1".to_string() }, "inspectr:openRequestHeaders")]
    #[case(Signal::Notify(Notification::error("a", "b")), "inspectr:notification")]
    #[case(
        Signal::OperationStreamUpdate(StreamUpdate {
            operation_id: "op-1".to_string(),
            event_type: "response.chunk".to_string(),
            event_time: None,
            payload: json!({}),
        }),
        "inspectr:operation-stream-update"
    )]
    fn names(#[case] signal: Signal, #[case] expected: &str) {
        assert_eq!(expected, signal.name());
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let bus = SignalBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        let signal = Signal::OpenRequestHeaders {
            operation_id: "op-1".to_string(),
        };

        assert_eq!(2, bus.publish(signal.clone()));
        assert_eq!(signal, first.recv().await.unwrap());
        assert_eq!(signal, second.recv().await.unwrap());
    }

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let bus = SignalBus::new(0);

        assert_eq!(0, bus.notify(Notification::error("failed", "boom")));
    }
}
