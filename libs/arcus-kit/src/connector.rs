//! Connector lifecycle and the sink connectors push inbound events into.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::ModuleEntry;
use crate::contracts::Connector;
use crate::events::{Event, OutboundMessage, Reply};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    Unconnected,
    Connected,
    Listening,
    Disconnected,
}

/// Handle a connector's `listen` loop uses to hand events to the runtime.
///
/// Emitted events are stamped with the connector's name and, unless they already carry one, a
/// reply capability pointing back at the same connector and target.
#[derive(Clone)]
pub struct EventSink {
    name: Arc<str>,
    connector: Arc<dyn Connector>,
    tx: mpsc::Sender<Event>,
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl EventSink {
    #[must_use]
    pub fn new(name: &str, connector: Arc<dyn Connector>, tx: mpsc::Sender<Event>) -> Self {
        Self {
            name: Arc::from(name),
            connector,
            tx,
        }
    }

    #[must_use]
    pub fn connector_name(&self) -> &str {
        &self.name
    }

    /// Hand an event to the runtime.
    ///
    /// # Errors
    /// Fails once the runtime has stopped accepting events.
    pub async fn emit(&self, mut event: Event) -> anyhow::Result<()> {
        event.connector = Some((*self.name).to_owned());
        if event.reply.is_none() {
            event.reply = Some(Reply::Connector {
                connector: Arc::clone(&self.connector),
                target: event.reply_target(),
            });
        }
        self.tx
            .send(event)
            .await
            .map_err(|_| anyhow::anyhow!("runtime no longer accepts events from '{}'", self.name))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One active connector of the unit.
pub struct ConnectorInstance {
    name: String,
    config: Arc<ModuleEntry>,
    connector: Arc<dyn Connector>,
    state: Mutex<ConnectorState>,
}

impl std::fmt::Debug for ConnectorInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorInstance")
            .field("name", &self.name)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl ConnectorInstance {
    #[must_use]
    pub fn new(name: impl Into<String>, config: Arc<ModuleEntry>, connector: Arc<dyn Connector>) -> Self {
        Self {
            name: name.into(),
            config,
            connector,
            state: Mutex::new(ConnectorState::Unconnected),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &ModuleEntry {
        &self.config
    }

    #[must_use]
    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::clone(&self.connector)
    }

    #[must_use]
    pub fn state(&self) -> ConnectorState {
        *self.state.lock()
    }

    /// # Errors
    /// Propagates the transport's connect error.
    pub async fn connect(&self) -> anyhow::Result<()> {
        self.connector.connect().await?;
        *self.state.lock() = ConnectorState::Connected;
        Ok(())
    }

    /// Mark the instance as listening. Only a connected instance may listen.
    ///
    /// # Errors
    /// Fails when the instance is not `Connected`.
    pub fn begin_listen(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if *state != ConnectorState::Connected {
            anyhow::bail!("connector '{}' must be connected before it listens", self.name);
        }
        *state = ConnectorState::Listening;
        Ok(())
    }

    /// # Errors
    /// Propagates the transport's send error.
    pub async fn send(&self, message: &OutboundMessage) -> anyhow::Result<()> {
        self.connector.send(message).await
    }

    /// Release the transport. The instance is `Disconnected` afterwards whatever the result.
    ///
    /// # Errors
    /// Propagates the transport's disconnect error.
    pub async fn disconnect(&self) -> anyhow::Result<()> {
        let result = self.connector.disconnect().await;
        *self.state.lock() = ConnectorState::Disconnected;
        result
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<OutboundMessage>>,
    }

    #[async_trait]
    impl Connector for Recorder {
        async fn connect(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn listen(&self, _sink: EventSink, cancel: CancellationToken) -> anyhow::Result<()> {
            cancel.cancelled().await;
            Ok(())
        }
        async fn send(&self, message: &OutboundMessage) -> anyhow::Result<()> {
            self.sent.lock().push(message.clone());
            Ok(())
        }
        async fn disconnect(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn listen_requires_connect() {
        let instance = ConnectorInstance::new(
            "shell",
            Arc::new(ModuleEntry::new("shell")),
            Arc::new(Recorder::default()),
        );
        assert!(instance.begin_listen().is_err());
        instance.connect().await.unwrap();
        instance.begin_listen().unwrap();
        assert_eq!(instance.state(), ConnectorState::Listening);
        instance.disconnect().await.unwrap();
        assert_eq!(instance.state(), ConnectorState::Disconnected);
        assert!(instance.begin_listen().is_err());
    }

    #[tokio::test]
    async fn sink_attaches_reply_to_origin() {
        let recorder = Arc::new(Recorder::default());
        let (tx, mut rx) = mpsc::channel(4);
        let sink = EventSink::new("chat", recorder.clone(), tx);

        sink.emit(Event::message("ping").from_user("ann").in_room("ops"))
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.connector.as_deref(), Some("chat"));

        event.respond("pong").await.unwrap();
        let sent = recorder.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "pong");
        assert_eq!(sent[0].target.as_deref(), Some("ops"));
        assert_eq!(sent[0].in_reply_to, Some(event.id));
    }

    #[tokio::test]
    async fn emit_fails_after_runtime_stops() {
        let (tx, rx) = mpsc::channel(1);
        let sink = EventSink::new("chat", Arc::new(Recorder::default()), tx);
        drop(rx);
        assert!(sink.is_closed());
        assert!(sink.emit(Event::message("late")).await.is_err());
    }
}
