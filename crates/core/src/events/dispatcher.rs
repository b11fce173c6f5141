use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{EventEnvelope, EventHandle, EventLog, EventRecord};

/// A named consumer of domain events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Handle one event. Errors are logged by the dispatcher and do not stop it.
    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()>;
}

/// Background task that receives events and fans them out to handlers
pub struct EventDispatcher {
    rx: mpsc::Receiver<EventEnvelope>,
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new(rx: mpsc::Receiver<EventEnvelope>) -> Self {
        Self {
            rx,
            handlers: Vec::new(),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Register a handler after construction.
    ///
    /// Needed when a handler depends on services that themselves hold the
    /// [`EventHandle`] returned alongside this dispatcher.
    pub fn add_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn handler_names(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.name().to_string()).collect()
    }

    /// Run the dispatcher, consuming events until every handle is dropped
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        tracing::info!(handlers = ?self.handler_names(), "Event dispatcher started");

        while let Some(envelope) = self.rx.recv().await {
            for handler in &self.handlers {
                if let Err(e) = handler.handle(&envelope).await {
                    tracing::error!(
                        handler = handler.name(),
                        event_type = envelope.event.event_type(),
                        "Event handler failed: {:#}",
                        e
                    );
                }
            }
        }

        tracing::info!("Event dispatcher shutting down");
    }
}

/// Persists every event to the event log.
pub struct EventLogWriter {
    log: Arc<dyn EventLog>,
}

impl EventLogWriter {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl EventHandler for EventLogWriter {
    fn name(&self) -> &str {
        "event_log_writer"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        let record = EventRecord {
            id: 0, // Will be set by database
            timestamp: envelope.timestamp,
            event_type: envelope.event.event_type().to_string(),
            brand_id: envelope.event.brand_id().map(String::from),
            pipeline_id: envelope.event.pipeline_id().map(String::from),
            data: envelope.event.clone(),
        };
        self.log.append(&record)?;
        Ok(())
    }
}

/// Create the event channel
///
/// Returns:
/// - `EventHandle` - for emitting events (clone this to share across tasks)
/// - `EventDispatcher` - register handlers, then spawn with `tokio::spawn(dispatcher.run())`
pub fn create_event_system(buffer_size: usize) -> (EventHandle, EventDispatcher) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EventHandle::new(tx), EventDispatcher::new(rx))
}
