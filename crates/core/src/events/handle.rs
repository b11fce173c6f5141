use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::DomainEvent;

/// Envelope wrapping a domain event with metadata
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: DomainEvent,
}

/// Handle for emitting domain events
///
/// This is cheaply cloneable and can be shared across tasks.
/// Events are sent through an async channel to the EventDispatcher.
#[derive(Clone)]
pub struct EventHandle {
    tx: mpsc::Sender<EventEnvelope>,
}

impl EventHandle {
    pub fn new(tx: mpsc::Sender<EventEnvelope>) -> Self {
        Self { tx }
    }

    /// Emit an event, waiting for channel capacity.
    ///
    /// If the channel is closed the error is logged; the caller is never failed.
    pub async fn emit(&self, event: DomainEvent) {
        let envelope = EventEnvelope {
            timestamp: Utc::now(),
            event,
        };
        if let Err(e) = self.tx.send(envelope).await {
            tracing::error!("Failed to emit domain event: {}", e);
        }
    }

    /// Emit without waiting. Returns false if the channel is full or closed.
    pub fn try_emit(&self, event: DomainEvent) -> bool {
        let envelope = EventEnvelope {
            timestamp: Utc::now(),
            event,
        };
        match self.tx.try_send(envelope) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to emit domain event: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> DomainEvent {
        DomainEvent::ServiceStarted {
            version: "0.1.0".to_string(),
        }
    }

    #[tokio::test]
    async fn test_emit_event() {
        let (tx, mut rx) = mpsc::channel(10);
        let handle = EventHandle::new(tx);

        handle.emit(started()).await;

        let envelope = rx.recv().await.expect("Should receive event");
        assert!(matches!(envelope.event, DomainEvent::ServiceStarted { .. }));
    }

    #[test]
    fn test_try_emit_full_channel() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = EventHandle::new(tx);

        assert!(handle.try_emit(started()));
        // Channel full
        assert!(!handle.try_emit(DomainEvent::ServiceStopped {
            reason: "test".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_emit_closed_channel() {
        let (tx, rx) = mpsc::channel::<EventEnvelope>(10);
        let handle = EventHandle::new(tx);
        drop(rx);

        // Logged, not a panic
        handle.emit(started()).await;
    }

    #[test]
    fn test_envelope_has_timestamp() {
        let (tx, mut rx) = mpsc::channel(10);
        let handle = EventHandle::new(tx);

        let before = Utc::now();
        handle.try_emit(started());
        let after = Utc::now();

        let envelope = rx.try_recv().expect("Should receive event");
        assert!(envelope.timestamp >= before);
        assert!(envelope.timestamp <= after);
    }
}
