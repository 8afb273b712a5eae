//! Inbound events, matchers and the reply capability handlers use to answer.

use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::contracts::Connector;

/// Event type tag carried by chat messages.
pub const MESSAGE_EVENT: &str = "message";
/// Event type tag carried by webhook calls.
pub const WEBHOOK_EVENT: &str = "webhook";

/// Routing tag declared by a service handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// Matches on the event type (`message`, `webhook` or a custom type).
    EventType(String),
    /// Matches a webhook call by its name.
    Webhook(String),
    /// Matches a message by the service type it is addressed to. The empty string is the
    /// default route for messages that are not addressed to any service type.
    ServiceType(String),
}

impl Matcher {
    pub fn event_type(t: impl Into<String>) -> Self {
        Self::EventType(t.into())
    }

    pub fn webhook(name: impl Into<String>) -> Self {
        Self::Webhook(name.into())
    }

    pub fn service(t: impl Into<String>) -> Self {
        Self::ServiceType(t.into())
    }

    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Self::EventType(t) => event.event_type() == t,
            Self::Webhook(name) => event.webhook_name() == Some(name.as_str()),
            Self::ServiceType(t) => {
                matches!(event.kind, EventKind::Message { .. })
                    && event.service_type.as_deref().unwrap_or_default() == t
            }
        }
    }
}

/// What an event carries.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Message {
        text: String,
        user: Option<String>,
        target: Option<String>,
    },
    Webhook {
        name: String,
        payload: Value,
    },
    Custom {
        event_type: String,
        payload: Value,
    },
}

/// Outbound message handed to a connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
    /// Room, channel or user the connector should deliver to.
    pub target: Option<String>,
    pub in_reply_to: Option<Uuid>,
}

impl OutboundMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            target: None,
            in_reply_to: None,
        }
    }

    #[must_use]
    pub fn to(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// Reply capability attached to an inbound event.
#[derive(Clone)]
pub enum Reply {
    /// Answer back through the connector the event came from.
    Connector {
        connector: Arc<dyn Connector>,
        target: Option<String>,
    },
    /// Answer into the pending HTTP response of a webhook call.
    Webhook(mpsc::UnboundedSender<Value>),
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connector { target, .. } => f
                .debug_struct("Connector")
                .field("target", target)
                .finish_non_exhaustive(),
            Self::Webhook(_) => f.write_str("Webhook"),
        }
    }
}

/// An inbound event routed through the runtime.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: Uuid,
    pub kind: EventKind,
    /// Service type the event is addressed to, if any.
    pub service_type: Option<String>,
    /// Name of the connector that produced the event.
    pub connector: Option<String>,
    pub reply: Option<Reply>,
}

impl Event {
    fn with_kind(kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            service_type: None,
            connector: None,
            reply: None,
        }
    }

    pub fn message(text: impl Into<String>) -> Self {
        Self::with_kind(EventKind::Message {
            text: text.into(),
            user: None,
            target: None,
        })
    }

    pub fn webhook(name: impl Into<String>, payload: Value) -> Self {
        Self::with_kind(EventKind::Webhook {
            name: name.into(),
            payload,
        })
    }

    pub fn custom(event_type: impl Into<String>, payload: Value) -> Self {
        Self::with_kind(EventKind::Custom {
            event_type: event_type.into(),
            payload,
        })
    }

    #[must_use]
    pub fn from_user(mut self, who: impl Into<String>) -> Self {
        if let EventKind::Message { user, .. } = &mut self.kind {
            *user = Some(who.into());
        }
        self
    }

    #[must_use]
    pub fn in_room(mut self, room: impl Into<String>) -> Self {
        if let EventKind::Message { target, .. } = &mut self.kind {
            *target = Some(room.into());
        }
        self
    }

    #[must_use]
    pub fn for_service(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = Some(service_type.into());
        self
    }

    #[must_use]
    pub fn with_reply(mut self, reply: Reply) -> Self {
        self.reply = Some(reply);
        self
    }

    #[must_use]
    pub fn event_type(&self) -> &str {
        match &self.kind {
            EventKind::Message { .. } => MESSAGE_EVENT,
            EventKind::Webhook { .. } => WEBHOOK_EVENT,
            EventKind::Custom { event_type, .. } => event_type,
        }
    }

    #[must_use]
    pub fn webhook_name(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Webhook { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Message text, if this is a message event.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Message { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Payload of webhook and custom events.
    #[must_use]
    pub fn payload(&self) -> Option<&Value> {
        match &self.kind {
            EventKind::Webhook { payload, .. } | EventKind::Custom { payload, .. } => {
                Some(payload)
            }
            EventKind::Message { .. } => None,
        }
    }

    /// Room or user a reply to this event should go to.
    #[must_use]
    pub fn reply_target(&self) -> Option<String> {
        match &self.kind {
            EventKind::Message { target, user, .. } => target.clone().or_else(|| user.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn can_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Send a text reply through the event's reply capability.
    ///
    /// # Errors
    /// Fails when the event has no reply capability or the delivery fails.
    pub async fn respond(&self, text: &str) -> anyhow::Result<()> {
        match &self.reply {
            Some(Reply::Connector { connector, target }) => {
                let message = OutboundMessage {
                    text: text.to_owned(),
                    target: target.clone(),
                    in_reply_to: Some(self.id),
                };
                connector.send(&message).await
            }
            Some(Reply::Webhook(tx)) => tx
                .send(json!({ "text": text }))
                .map_err(|_| anyhow::anyhow!("webhook caller is gone")),
            None => anyhow::bail!("event {} has no reply channel", self.id),
        }
    }

    /// Send a structured reply. Connectors receive the value rendered as text.
    ///
    /// # Errors
    /// Fails when the event has no reply capability or the delivery fails.
    pub async fn respond_json(&self, value: Value) -> anyhow::Result<()> {
        match &self.reply {
            Some(Reply::Webhook(tx)) => tx
                .send(value)
                .map_err(|_| anyhow::anyhow!("webhook caller is gone")),
            Some(Reply::Connector { .. }) => self.respond(&value.to_string()).await,
            None => anyhow::bail!("event {} has no reply channel", self.id),
        }
    }
}
