//! Notification sink for write outcomes.

use chrono::{DateTime, Utc};
use std::fmt;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::mutation::MutationKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error { message: String },
}

impl Outcome {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Receives one call per completed write.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, entity_label: &str, operation: MutationKind, outcome: &Outcome);
}

/// Writes outcomes to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, entity_label: &str, operation: MutationKind, outcome: &Outcome) {
        match outcome {
            Outcome::Success => info!(
                entity = entity_label,
                operation = operation.verb(),
                "{} {}",
                entity_label,
                operation.past_tense()
            ),
            Outcome::Error { message } => warn!(
                entity = entity_label,
                operation = operation.verb(),
                error = %message,
                "failed to {} {}",
                operation.verb(),
                entity_label
            ),
        }
    }
}

/// A write outcome as delivered by [`ChannelSink`].
#[derive(Debug, Clone)]
pub struct Notification {
    pub entity_label: String,
    pub operation: MutationKind,
    pub outcome: Outcome,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(entity_label: impl Into<String>, operation: MutationKind, outcome: Outcome) -> Self {
        Self {
            entity_label: entity_label.into(),
            operation,
            outcome,
            created_at: Utc::now(),
        }
    }

    /// One-line, human-readable message.
    pub fn summary(&self) -> String {
        match &self.outcome {
            Outcome::Success => format!("{} {}", self.entity_label, self.operation.past_tense()),
            Outcome::Error { message } => format!(
                "Failed to {} {}: {}",
                self.operation.verb(),
                self.entity_label,
                message
            ),
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Forwards outcomes over a bounded channel.
///
/// Never blocks the writer: when the receiver lags or is gone the
/// notification is dropped and a warning is logged.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Notification>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Notification>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, entity_label: &str, operation: MutationKind, outcome: &Outcome) {
        let notification = Notification::new(entity_label, operation, outcome.clone());
        if let Err(e) = self.tx.try_send(notification) {
            warn!(entity = entity_label, error = %e, "dropped notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary() {
        let ok = Notification::new("Client", MutationKind::Create, Outcome::Success);
        assert_eq!(ok.summary(), "Client created");

        let failed = Notification::new("Product", MutationKind::Delete, Outcome::error("in use"));
        assert_eq!(failed.summary(), "Failed to delete Product: in use");
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::channel(4);
        sink.notify("Service", MutationKind::Restore, &Outcome::Success);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.entity_label, "Service");
        assert_eq!(received.operation, MutationKind::Restore);
        assert!(received.outcome.is_success());
    }

    #[test]
    fn test_channel_sink_drops_when_full() {
        let (sink, mut rx) = ChannelSink::channel(1);
        sink.notify("Client", MutationKind::Update, &Outcome::Success);
        sink.notify("Client", MutationKind::Update, &Outcome::error("lost"));

        assert!(rx.try_recv().unwrap().outcome.is_success());
        assert!(rx.try_recv().is_err());
    }
}
