use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use arcus_kit::{
    AppConfig, BuildContext, Event, HandlerSpec, Matcher, Memory, ModuleCtx, ModuleEntry, Service,
};
use arcus_operator::{Manifest, ManifestError, Operator, OperatorSettings, RolloutReport};
use arcus_spawner::{ContainerRuntime, DockerCliRuntime};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;

type ReportSlot = Arc<RwLock<Option<RolloutReport>>>;

pub struct OperatorService {
    settings: OperatorSettings,
    runtime: Arc<dyn ContainerRuntime>,
    report: ReportSlot,
}

impl std::fmt::Debug for OperatorService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorService")
            .field("settings", &self.settings)
            .field("report", &*self.report.read())
            .finish_non_exhaustive()
    }
}

/// # Errors
/// Fails when the entry carries invalid operator settings.
pub fn build(entry: &ModuleEntry, _ctx: &BuildContext<'_>) -> anyhow::Result<Arc<dyn Service>> {
    let settings: OperatorSettings = entry.settings()?;
    Ok(Arc::new(OperatorService::new(
        settings,
        Arc::new(DockerCliRuntime::default()),
    )))
}

impl OperatorService {
    #[must_use]
    pub fn new(settings: OperatorSettings, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            settings,
            runtime,
            report: Arc::new(RwLock::new(None)),
        }
    }

    /// Report of the last finished rollout.
    #[must_use]
    pub fn last_report(&self) -> Option<RolloutReport> {
        self.report.read().clone()
    }

    async fn status(&self, event: Event) -> anyhow::Result<()> {
        let report = self.last_report();
        let body = match report {
            Some(report) => json!({ "state": "done", "report": report }),
            None => json!({ "state": "pending" }),
        };
        event.respond_json(body).await
    }

    async fn note(&self, event: Event, ctx: ModuleCtx) -> anyhow::Result<()> {
        tracing::info!(unit = %ctx.unit(), event = %event.id, "Operator service received event");
        if !event.can_reply() {
            return Ok(());
        }
        let text = match self.last_report() {
            Some(report) => format!(
                "Rollout done: {} changed, {} failed",
                report.changed.len(),
                report.failed.len()
            ),
            None => "Rollout in progress".to_owned(),
        };
        event.respond(&text).await
    }
}

async fn rollout(
    runtime: Arc<dyn ContainerRuntime>,
    memory: Arc<Memory>,
    settings: OperatorSettings,
    app: Arc<AppConfig>,
    manifest_path: &Path,
) -> anyhow::Result<RolloutReport> {
    let manifest = match Manifest::load(manifest_path).await {
        Ok(manifest) => manifest,
        Err(ManifestError::Read { source, .. }) if source.kind() == ErrorKind::NotFound => {
            tracing::warn!(path = %manifest_path.display(), "No platform manifest, deploying agents only");
            Manifest::default()
        }
        Err(e) => return Err(e.into()),
    };
    let operator = Operator::connect(runtime, memory, settings, app).await?;
    Ok(operator.deploy_platform(&manifest).await)
}

#[async_trait]
impl Service for OperatorService {
    async fn setup(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let manifest_path = self.settings.manifest_path(&ctx.app().config_dir);
        let settings = self.settings.clone();
        let runtime = Arc::clone(&self.runtime);
        let memory = Arc::clone(ctx.shared().memory());
        let app = Arc::new(ctx.app().clone());
        let report = Arc::clone(&self.report);
        let cancel = ctx.cancellation_token();

        tracing::info!(manifest = %manifest_path.display(), "Scheduling platform rollout");
        ctx.spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => tracing::info!("Platform rollout cancelled"),
                outcome = rollout(runtime, memory, settings, app, &manifest_path) => match outcome {
                    Ok(done) => {
                        tracing::info!(changed = ?done.changed, failed = ?done.failed, "Platform rollout complete");
                        *report.write() = Some(done);
                    }
                    Err(e) => tracing::error!(error = %e, "Platform rollout aborted"),
                },
            }
        });
        Ok(())
    }

    fn handlers(self: Arc<Self>) -> Vec<HandlerSpec> {
        let status = Arc::clone(&self);
        let note = self;
        vec![
            HandlerSpec::new("status", vec![Matcher::webhook("status")], move |event, _ctx| {
                let this = Arc::clone(&status);
                async move { this.status(event).await }
            }),
            HandlerSpec::new("note", vec![Matcher::service("")], move |event, ctx| {
                let this = Arc::clone(&note);
                async move { this.note(event, ctx).await }
            }),
        ]
    }
}
