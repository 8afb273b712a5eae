//! Routing of inbound events to service handlers.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::config::ModuleEntry;
use crate::contracts::HandlerSpec;
use crate::events::Event;
use crate::runtime::context::{ModuleCtx, RuntimeShared};

/// First fallback reply after a handler failure.
pub const ERROR_REPLY: &str = "Whoops there has been an error";
/// Second fallback reply after a handler failure.
pub const ERROR_HINT: &str = "Check the log for details";

/// A handler bound to the service that declared it.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    /// Declared name of the owning service entry.
    pub service: String,
    pub config: Arc<ModuleEntry>,
    pub spec: HandlerSpec,
}

impl ServiceHandle {
    #[must_use]
    pub fn new(config: Arc<ModuleEntry>, spec: HandlerSpec) -> Self {
        Self {
            service: config.name.clone(),
            config,
            spec,
        }
    }

    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        self.spec.matchers.iter().any(|m| m.matches(event))
    }
}

/// Count the event and start the first matching handler as a background task.
///
/// Returns `false` when no handler accepts the event.
#[must_use]
pub fn dispatch(shared: &Arc<RuntimeShared>, event: Event) -> bool {
    shared.stats.record_event(event.webhook_name().is_some());

    let handle = shared
        .services
        .read()
        .iter()
        .find(|h| h.matches(&event))
        .cloned();
    let Some(handle) = handle else {
        tracing::debug!(event = %event.id, event_type = event.event_type(), "No handler accepts event");
        return false;
    };

    tracing::trace!(event = %event.id, service = %handle.service, handler = handle.spec.name, "Dispatching event");
    let ctx = ModuleCtx::new(Arc::clone(shared), Arc::clone(&handle.config));
    shared.spawn(run_service(handle, event, ctx));
    true
}

/// Invoke one handler. Errors and panics are logged and, when the event can be answered,
/// turned into the two fallback replies.
pub async fn run_service(handle: ServiceHandle, event: Event, ctx: ModuleCtx) {
    let call = Arc::clone(&handle.spec.call);
    let outcome = AssertUnwindSafe(call(event.clone(), ctx.clone()))
        .catch_unwind()
        .await;

    let error = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(e)) => format!("{e:#}"),
        Err(panic) => format!("handler panicked: {}", panic_message(panic.as_ref())),
    };

    ctx.shared().stats.record_handler_error();
    tracing::error!(
        service = %handle.service,
        handler = handle.spec.name,
        event = %event.id,
        error = %error,
        "Exception when running service"
    );

    if event.can_reply() {
        for text in [ERROR_REPLY, ERROR_HINT] {
            if let Err(e) = event.respond(text).await {
                tracing::warn!(service = %handle.service, error = %e, "Failed to send error reply");
                break;
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::events::{Matcher, Reply};
    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    fn handle(name: &'static str, spec: HandlerSpec) -> ServiceHandle {
        ServiceHandle::new(Arc::new(ModuleEntry::new(name)), spec)
    }

    fn explode() -> anyhow::Result<()> {
        panic!("index out of range")
    }

    fn failing() -> HandlerSpec {
        HandlerSpec::new("fail", vec![Matcher::webhook("boom")], |_, _| async {
            Err::<(), _>(anyhow::anyhow!("ledger unavailable"))
        })
    }

    fn panicking() -> HandlerSpec {
        HandlerSpec::new("panic", vec![Matcher::webhook("boom")], |_, _| async { explode() })
    }

    async fn replies_for(spec: HandlerSpec) -> Vec<Value> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let event = Event::webhook("boom", Value::Null).with_reply(Reply::Webhook(tx));
        let ctx = ModuleCtx::standalone("test", ModuleEntry::new("billing"));
        let stats = Arc::clone(ctx.shared());
        run_service(handle("billing", spec), event, ctx).await;
        assert_eq!(stats.stats().handler_errors, 1);
        let mut out = Vec::new();
        while let Ok(v) = rx.try_recv() {
            out.push(v);
        }
        out
    }

    #[tokio::test]
    async fn handler_error_sends_fallback_replies() {
        let replies = replies_for(failing()).await;
        assert_eq!(
            replies,
            vec![json!({"text": ERROR_REPLY}), json!({"text": ERROR_HINT})]
        );
    }

    #[tokio::test]
    async fn handler_panic_is_contained() {
        let replies = replies_for(panicking()).await;
        assert_eq!(replies.len(), 2);
    }

    #[tokio::test]
    async fn failure_without_reply_is_only_logged() {
        let ctx = ModuleCtx::standalone("test", ModuleEntry::new("billing"));
        run_service(handle("billing", failing()), Event::webhook("boom", Value::Null), ctx.clone()).await;
        assert_eq!(ctx.shared().stats().handler_errors, 1);
    }

    #[tokio::test]
    async fn first_matching_handle_wins() {
        let ctx = ModuleCtx::standalone("test", ModuleEntry::new("x"));
        let shared = Arc::clone(ctx.shared());
        let (tx, mut rx) = mpsc::unbounded_channel::<&'static str>();
        let first = tx.clone();
        let second = tx;
        *shared.services.write() = vec![
            handle(
                "a",
                HandlerSpec::new("a", vec![Matcher::service("")], move |_, _| {
                    let tx = first.clone();
                    async move {
                        tx.send("a")?;
                        Ok::<(), anyhow::Error>(())
                    }
                }),
            ),
            handle(
                "b",
                HandlerSpec::new("b", vec![Matcher::event_type("message")], move |_, _| {
                    let tx = second.clone();
                    async move {
                        tx.send("b")?;
                        Ok::<(), anyhow::Error>(())
                    }
                }),
            ),
        ];

        assert!(dispatch(&shared, Event::message("hi")));
        assert_eq!(rx.recv().await, Some("a"));
        assert!(!dispatch(&shared, Event::webhook("unknown", Value::Null)));
        assert_eq!(shared.stats().messages_parsed, 2);
        assert_eq!(shared.stats().webhooks_called, 1);
    }
}
