use std::sync::Arc;

use crate::config::ModuleEntry;
use crate::contracts::{HandlerSpec, Service};
use crate::events::{Event, Matcher};
use crate::registry::BuildContext;
use crate::runtime::ModuleCtx;

/// Default handler: takes every message that is not addressed to a service type and echoes it.
#[derive(Debug, Default)]
pub struct DummyService;

/// # Errors
/// Never fails.
pub fn build(_entry: &ModuleEntry, _ctx: &BuildContext<'_>) -> anyhow::Result<Arc<dyn Service>> {
    Ok(Arc::new(DummyService))
}

impl DummyService {
    async fn echo(event: Event, ctx: ModuleCtx) -> anyhow::Result<()> {
        tracing::info!(unit = %ctx.unit(), event = %event.id, connector = ?event.connector, "Dummy service received event");
        match event.text() {
            Some(text) if event.can_reply() => event.respond(text).await,
            _ => Ok(()),
        }
    }
}

impl Service for DummyService {
    fn handlers(self: Arc<Self>) -> Vec<HandlerSpec> {
        vec![HandlerSpec::new("echo", vec![Matcher::service("")], Self::echo)]
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::events::Reply;
    use crate::runtime::{ServiceHandle, run_service};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn echoes_unaddressed_messages() {
        let handlers = Arc::new(DummyService).handlers();
        assert_eq!(handlers.len(), 1);
        let event = Event::message("hello");
        assert!(handlers[0].matchers.iter().any(|m| m.matches(&event)));
        assert!(
            !handlers[0]
                .matchers
                .iter()
                .any(|m| m.matches(&Event::message("hello").for_service("billing")))
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let event = event.with_reply(Reply::Webhook(tx));
        let ctx = ModuleCtx::standalone("dummy", ModuleEntry::new("dummy"));
        let handle = ServiceHandle::new(Arc::new(ModuleEntry::new("dummy")), handlers[0].clone());
        run_service(handle, event, ctx).await;
        assert_eq!(rx.recv().await, Some(serde_json::json!({"text": "hello"})));
    }
}
