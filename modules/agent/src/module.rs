use std::sync::Arc;

use arcus_kit::{BuildContext, Event, HandlerSpec, Matcher, ModuleCtx, ModuleEntry, Service};
use serde_json::{Value, json};

use crate::config::AgentConfig;

#[derive(Debug)]
pub struct AgentService {
    cfg: AgentConfig,
}

/// # Errors
/// Fails on invalid agent settings.
pub fn build(entry: &ModuleEntry, _ctx: &BuildContext<'_>) -> anyhow::Result<Arc<dyn Service>> {
    Ok(Arc::new(AgentService::new(entry.settings()?)))
}

impl AgentService {
    #[must_use]
    pub fn new(cfg: AgentConfig) -> Self {
        Self { cfg }
    }

    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.cfg
    }

    /// First engine that produces a textual response wins.
    async fn answer(&self, text: &str, ctx: &ModuleCtx) -> String {
        for named in ctx.language_engines() {
            match named.engine.get_response(&json!({ "text": text })).await {
                Ok(response) => {
                    if let Some(reply) = response.get("text").and_then(Value::as_str) {
                        return reply.to_owned();
                    }
                }
                Err(e) => {
                    tracing::warn!(agent = %self.cfg.agent_name, engine = %named.name, error = %e, "Language engine failed");
                }
            }
        }
        self.cfg.fallback.clone()
    }

    async fn converse(&self, event: Event, ctx: ModuleCtx) -> anyhow::Result<()> {
        let Some(text) = event.text() else {
            return Ok(());
        };
        tracing::debug!(agent = %self.cfg.agent_name, event = %event.id, "Agent received message");
        let reply = self.answer(text, &ctx).await;
        event.respond(&reply).await
    }

    async fn skills(&self, event: Event) -> anyhow::Result<()> {
        event
            .respond_json(json!({ "agent": self.cfg.agent_name, "skills": self.cfg.skills }))
            .await
    }
}

impl Service for AgentService {
    fn handlers(self: Arc<Self>) -> Vec<HandlerSpec> {
        let converse = Arc::clone(&self);
        let skills = self;
        vec![
            HandlerSpec::new("skills", vec![Matcher::webhook("skills")], move |event, _ctx| {
                let this = Arc::clone(&skills);
                async move { this.skills(event).await }
            }),
            HandlerSpec::new("converse", vec![Matcher::service("")], move |event, ctx| {
                let this = Arc::clone(&converse);
                async move { this.converse(event, ctx).await }
            }),
        ]
    }
}
