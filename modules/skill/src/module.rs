use std::sync::Arc;

use arcus_kit::{BuildContext, Event, HandlerSpec, LanguageEngine, Matcher, ModuleCtx, ModuleEntry, Service};
use serde_json::{Value, json};

use crate::config::SkillConfig;

#[derive(Debug)]
pub struct SkillService {
    cfg: SkillConfig,
}

/// # Errors
/// Fails when `skill-id` is missing or the settings are invalid.
pub fn build(entry: &ModuleEntry, _ctx: &BuildContext<'_>) -> anyhow::Result<Arc<dyn Service>> {
    Ok(Arc::new(SkillService::new(entry.settings()?)))
}

fn engine(ctx: &ModuleCtx) -> anyhow::Result<Arc<dyn LanguageEngine>> {
    ctx.language_engines()
        .into_iter()
        .next()
        .map(|named| named.engine)
        .ok_or_else(|| anyhow::anyhow!("unit '{}' has no trained language engine", ctx.unit()))
}

fn body(event: &Event) -> Value {
    event.payload().cloned().unwrap_or(Value::Null)
}

impl SkillService {
    #[must_use]
    pub fn new(cfg: SkillConfig) -> Self {
        Self { cfg }
    }

    #[must_use]
    pub fn config(&self) -> &SkillConfig {
        &self.cfg
    }

    async fn parse(event: Event, ctx: ModuleCtx) -> anyhow::Result<()> {
        let request = body(&event);
        let Some(text) = request.get("text").and_then(Value::as_str) else {
            anyhow::bail!("parse request needs a 'text' field");
        };
        let parsed = engine(&ctx)?.parse_text(text).await?;
        event.respond_json(parsed).await
    }

    async fn next_step(event: Event, ctx: ModuleCtx) -> anyhow::Result<()> {
        let response = engine(&ctx)?.get_response(&body(&event)).await?;
        event.respond_json(response).await
    }

    async fn generic_action(event: Event, ctx: ModuleCtx) -> anyhow::Result<()> {
        let result = engine(&ctx)?.generic_action(&body(&event)).await?;
        event.respond_json(result).await
    }

    async fn converse(&self, event: Event, ctx: ModuleCtx) -> anyhow::Result<()> {
        let Some(text) = event.text() else {
            return Ok(());
        };
        let response = engine(&ctx)?.get_response(&json!({ "text": text })).await?;
        match response.get("text").and_then(Value::as_str) {
            Some(reply) => event.respond(reply).await,
            None => {
                tracing::debug!(skill = %self.cfg.skill_id, "No response for message");
                Ok(())
            }
        }
    }
}

impl Service for SkillService {
    fn handlers(self: Arc<Self>) -> Vec<HandlerSpec> {
        let addressed = Matcher::service(self.cfg.skill_id.as_str());
        vec![
            HandlerSpec::new("parse", vec![Matcher::webhook("parse")], Self::parse),
            HandlerSpec::new("next_step", vec![Matcher::webhook("next_step")], Self::next_step),
            HandlerSpec::new(
                "generic_action",
                vec![Matcher::webhook("generic_action")],
                Self::generic_action,
            ),
            HandlerSpec::new("converse", vec![addressed], move |event, ctx| {
                let this = Arc::clone(&self);
                async move { this.converse(event, ctx).await }
            }),
        ]
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use arcus_kit::builtin::keyword::KeywordEngine;
    use arcus_kit::builtin::memory_db::MemoryDatabase;
    use arcus_kit::runtime::{ERROR_REPLY, ServiceHandle, run_service};
    use arcus_kit::{DatabaseInstance, Memory, Reply};
    use tokio::sync::mpsc;

    async fn billing_ctx() -> ModuleCtx {
        let memory = Memory::new();
        let db = DatabaseInstance::new("memory", Arc::new(MemoryDatabase::default()));
        db.connect().await.unwrap();
        memory.add(db);
        memory
            .put(
                "billing_intents",
                "pay_bill",
                &json!({ "examples": ["pay my bill"], "function": "pay", "responses": { "default": ["Paying."] } }),
            )
            .await
            .unwrap();
        let engine = KeywordEngine::new("billing");
        engine.train(&memory).await.unwrap();

        let ctx = ModuleCtx::standalone("skill-billing", ModuleEntry::new("skill"));
        ctx.shared().add_language_engine("keyword", Arc::new(engine));
        ctx
    }

    fn skill() -> Arc<SkillService> {
        Arc::new(SkillService::new(SkillConfig {
            skill_id: "billing".to_owned(),
            language: "en".to_owned(),
        }))
    }

    async fn call(name: &str, event: Event, ctx: ModuleCtx) -> Value {
        let handler = skill()
            .handlers()
            .into_iter()
            .find(|h| h.name == name)
            .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ServiceHandle::new(Arc::new(ModuleEntry::new("skill")), handler);
        run_service(handle, event.with_reply(Reply::Webhook(tx)), ctx).await;
        rx.recv().await.unwrap()
    }

    #[tokio::test]
    async fn parse_webhook_classifies() {
        let ctx = billing_ctx().await;
        let reply = call("parse", Event::webhook("parse", json!({ "text": "pay my bill" })), ctx).await;
        assert_eq!(reply["intent"], "pay_bill");
        assert_eq!(reply["function"], "pay");
    }

    #[tokio::test]
    async fn next_step_webhook_responds() {
        let ctx = billing_ctx().await;
        let reply = call(
            "next_step",
            Event::webhook("next_step", json!({ "intent": "pay_bill" })),
            ctx,
        )
        .await;
        assert_eq!(reply, json!({ "intent": "pay_bill", "text": "Paying." }));
    }

    #[tokio::test]
    async fn unsupported_action_becomes_error_reply() {
        let ctx = billing_ctx().await;
        let reply = call("generic_action", Event::webhook("generic_action", json!({})), ctx).await;
        assert_eq!(reply["text"], ERROR_REPLY);
    }

    #[tokio::test]
    async fn addressed_messages_get_text_answers() {
        let ctx = billing_ctx().await;
        let handlers = skill().handlers();
        let converse = handlers.iter().find(|h| h.name == "converse").unwrap();
        assert!(converse.matchers[0].matches(&Event::message("x").for_service("billing")));
        assert!(!converse.matchers[0].matches(&Event::message("x")));

        let reply = call("converse", Event::message("pay my bill").for_service("billing"), ctx).await;
        assert_eq!(reply, json!({ "text": "Paying." }));
    }
}
