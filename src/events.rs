//! Diagnostic events for external monitors.
//!
//! Every event is logged through `tracing` and also published on a broadcast
//! channel. Publishing never blocks; with no subscribers the event is simply
//! dropped after logging.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    CircuitOpened { failure_count: u32 },
    CircuitReopened { failure_count: u32 },
    CircuitClosed,
    ProviderExhausted { label: String, error: String },
    AllProvidersFailed { label: String, error: String },
}

impl EventKind {
    pub fn severity(&self) -> Severity {
        match self {
            EventKind::CircuitClosed => Severity::Info,
            EventKind::CircuitReopened { .. } | EventKind::ProviderExhausted { .. } => {
                Severity::Warning
            }
            EventKind::CircuitOpened { .. } => Severity::High,
            EventKind::AllProvidersFailed { .. } => Severity::Critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticEvent {
    pub severity: Severity,
    pub network: String,
    /// `None` for network-wide events.
    pub provider: Option<String>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone)]
pub(crate) struct EventHub {
    sender: broadcast::Sender<DiagnosticEvent>,
}

impl EventHub {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<DiagnosticEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn emit(&self, network: &str, provider: Option<&str>, kind: EventKind) {
        let event = DiagnosticEvent {
            severity: kind.severity(),
            network: network.to_string(),
            provider: provider.map(str::to_string),
            kind,
        };

        match event.severity {
            Severity::Info => info!(network, ?provider, event = ?event.kind, "provider event"),
            Severity::Warning => warn!(network, ?provider, event = ?event.kind, "provider event"),
            Severity::High | Severity::Critical => error!(
                network,
                ?provider,
                severity = ?event.severity,
                event = ?event.kind,
                "provider event"
            ),
        }

        // no subscribers is fine
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe();

        hub.emit("ethereum", Some("primary"), EventKind::CircuitOpened { failure_count: 5 });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.severity, Severity::High);
        assert_eq!(event.network, "ethereum");
        assert_eq!(event.provider.as_deref(), Some("primary"));
    }

    #[test]
    fn emitting_without_subscribers_does_not_fail() {
        let hub = EventHub::new();
        hub.emit(
            "polygon",
            None,
            EventKind::AllProvidersFailed {
                label: "get_balance".into(),
                error: "timeout".into(),
            },
        );
    }

    #[test]
    fn severity_mapping() {
        assert_eq!(EventKind::CircuitClosed.severity(), Severity::Info);
        assert_eq!(
            EventKind::CircuitReopened { failure_count: 6 }.severity(),
            Severity::Warning
        );
        assert!(Severity::Critical > Severity::High);
    }
}
