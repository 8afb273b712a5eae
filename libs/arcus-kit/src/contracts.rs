use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::events::{Event, OutboundMessage};
use crate::memory::Memory;
use crate::connector::EventSink;
use crate::runtime::ModuleCtx;

/// Future returned by a bound service handler.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Type-erased service handler.
pub type HandlerFn = Arc<dyn Fn(Event, ModuleCtx) -> HandlerFuture + Send + Sync>;

/// A capability a service exposes: the tags it accepts and the callable that handles them.
#[derive(Clone)]
pub struct HandlerSpec {
    pub name: &'static str,
    pub matchers: Vec<crate::events::Matcher>,
    pub(crate) call: HandlerFn,
}

impl HandlerSpec {
    pub fn new<F, Fut>(name: &'static str, matchers: Vec<crate::events::Matcher>, f: F) -> Self
    where
        F: Fn(Event, ModuleCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name,
            matchers,
            call: Arc::new(move |event, ctx| Box::pin(f(event, ctx))),
        }
    }
}

impl std::fmt::Debug for HandlerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerSpec")
            .field("name", &self.name)
            .field("matchers", &self.matchers)
            .finish_non_exhaustive()
    }
}

/// Service module: exposes tagged handlers the runtime routes events to.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Runs once during load, before any connector is started.
    async fn setup(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    /// Declared capabilities, in priority order.
    fn handlers(self: Arc<Self>) -> Vec<HandlerSpec>;
}

/// Transport integration.
///
/// The runtime calls `connect` on every connector before it starts any `listen` task, and
/// `disconnect` exactly once during unload.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> anyhow::Result<()>;

    /// Run until the transport closes or `cancel` fires, pushing inbound events into `sink`.
    async fn listen(&self, sink: EventSink, cancel: CancellationToken) -> anyhow::Result<()>;

    /// Best-effort outbound delivery.
    async fn send(&self, message: &OutboundMessage) -> anyhow::Result<()>;

    async fn disconnect(&self) -> anyhow::Result<()>;
}

/// Persistence backend owned by [`Memory`].
#[async_trait]
pub trait Database: Send + Sync + 'static {
    async fn connect(&self) -> anyhow::Result<()>;

    async fn disconnect(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn put(&self, collection: &str, key: &str, data: &Value) -> anyhow::Result<()>;

    async fn get(&self, collection: &str, key: &str) -> anyhow::Result<Option<Value>>;

    async fn get_keys(&self, collection: &str) -> anyhow::Result<Vec<String>>;
}

/// Language-understanding engine, consumed as a black box.
#[async_trait]
pub trait LanguageEngine: Send + Sync + 'static {
    /// Prepare the engine from whatever it finds in memory.
    async fn train(&self, memory: &Memory) -> anyhow::Result<()>;

    /// Classify an utterance.
    async fn parse_text(&self, text: &str) -> anyhow::Result<Value>;

    /// Produce the next dialogue response for a request.
    async fn get_response(&self, request: &Value) -> anyhow::Result<Value>;

    async fn generic_action(&self, request: &Value) -> anyhow::Result<Value> {
        let _ = request;
        anyhow::bail!("generic actions are not supported by this engine")
    }
}
