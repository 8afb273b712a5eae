//! Platform rollout: infrastructure units, then the operator's own configuration, then agents
//! and their skills.

use arcus_kit::{AppConfig, Memory, UnitConfig};
use arcus_spawner::{ContainerRuntime, ContainerStatus, DeployAction, DeploySpec, RuntimeApiError, Spawner};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::distribute::{ConfigDistributor, distributor_for};
use crate::env::{process_env, resolve_env};
use crate::generate::{OPERATOR_UNIT, agent_config, operator_config, skill_config, skill_unit, unit_container};
use crate::manifest::{AgentSpec, ExternalService, Manifest};
use crate::settings::OperatorSettings;
use crate::skills::{SkillDefinition, import_skill};

/// Outcome of a rollout pass. Units are listed by container name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RolloutReport {
    /// Units created or started by this pass.
    pub changed: Vec<String>,
    /// Units that could not be brought up; the pass continued past them.
    pub failed: Vec<String>,
    pub agents: Vec<String>,
    pub skills: Vec<String>,
}

impl RolloutReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, unit: &str, action: Option<DeployAction>) -> bool {
        match action {
            Some(action) => {
                if action.changed() {
                    self.changed.push(unit.to_owned());
                }
                true
            }
            None => {
                self.failed.push(unit.to_owned());
                false
            }
        }
    }
}

pub struct Operator {
    spawner: Spawner,
    distributor: Arc<dyn ConfigDistributor>,
    memory: Arc<Memory>,
    settings: OperatorSettings,
    app: Arc<AppConfig>,
}

impl std::fmt::Debug for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operator")
            .field("spawner", &self.spawner)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Operator {
    pub fn new(
        spawner: Spawner,
        distributor: Arc<dyn ConfigDistributor>,
        memory: Arc<Memory>,
        settings: OperatorSettings,
        app: Arc<AppConfig>,
    ) -> Self {
        Self {
            spawner,
            distributor,
            memory,
            settings,
            app,
        }
    }

    /// Bind to `runtime` on the configured network, distributing the way `settings` selects.
    ///
    /// # Errors
    /// Fails when the network cannot be inspected or created.
    pub async fn connect(
        runtime: Arc<dyn ContainerRuntime>,
        memory: Arc<Memory>,
        settings: OperatorSettings,
        app: Arc<AppConfig>,
    ) -> Result<Self, RuntimeApiError> {
        let spawner = Spawner::connect(runtime, settings.network.as_str()).await?;
        let distributor = distributor_for(&settings, &app);
        Ok(Self::new(spawner, distributor, memory, settings, app))
    }

    #[must_use]
    pub fn settings(&self) -> &OperatorSettings {
        &self.settings
    }

    #[must_use]
    pub fn spawner(&self) -> &Spawner {
        &self.spawner
    }

    /// Bring the whole platform up. Failures are logged, recorded in the report and skipped.
    pub async fn deploy_platform(&self, manifest: &Manifest) -> RolloutReport {
        let mut report = RolloutReport::default();
        tracing::info!(
            services = manifest.external_services.len(),
            agents = manifest.agents.len(),
            "Deploying platform"
        );

        for service in &manifest.external_services {
            self.deploy_external(service, &mut report).await;
        }

        if !report.changed.is_empty() {
            let not_ready = self
                .settings
                .readiness
                .wait_until_ready(&self.spawner, &report.changed)
                .await;
            if not_ready.is_empty() {
                tracing::info!(units = ?report.changed, "Infrastructure units ready");
            }
        }

        if let Err(e) = self
            .distributor
            .distribute(OPERATOR_UNIT, &operator_config(&self.settings))
            .await
        {
            tracing::error!(unit = OPERATOR_UNIT, error = %e, "Failed to distribute operator configuration");
            report.failed.push(OPERATOR_UNIT.to_owned());
        }

        let mut seen = BTreeSet::new();
        for agent in manifest.agents.iter().chain(&self.settings.agents) {
            if seen.insert(agent.name.as_str()) {
                self.deploy_agent_into(agent, &mut report).await;
            }
        }

        tracing::info!(
            changed = report.changed.len(),
            failed = report.failed.len(),
            "Platform rollout finished"
        );
        report
    }

    /// Deploy one agent unit and every skill it declares.
    pub async fn deploy_agent(&self, agent: &AgentSpec) -> RolloutReport {
        let mut report = RolloutReport::default();
        self.deploy_agent_into(agent, &mut report).await;
        report
    }

    /// Deploy the unit of `skill`, importing its definition first when the unit is new.
    pub async fn deploy_skill(&self, skill: &str, language: &str) -> RolloutReport {
        let mut report = RolloutReport::default();
        self.deploy_skill_into(skill, language, &mut report).await;
        report
    }

    async fn deploy_external(&self, service: &ExternalService, report: &mut RolloutReport) {
        let name = service.name.as_str();
        let Some(status) = self.status(name, report).await else {
            return;
        };
        let spec = match status {
            ContainerStatus::Running => {
                tracing::debug!(unit = name, "Infrastructure unit already running");
                return;
            }
            ContainerStatus::Stopped => DeploySpec::new(name, service.image.as_str()),
            ContainerStatus::Absent => match resolve_env(service, process_env) {
                Ok(env) => external_spec(service, env),
                Err(e) => {
                    tracing::error!(unit = name, error = %e, "Skipping unit with unresolved environment");
                    report.failed.push(name.to_owned());
                    return;
                }
            },
        };
        let action = self.spawner.deploy_action(&spec).await;
        report.record(name, action);
    }

    /// Skill units are deployed even when the agent unit itself fails.
    async fn deploy_agent_into(&self, agent: &AgentSpec, report: &mut RolloutReport) {
        let name = agent.name.as_str();
        let deployed = match self.status(name, report).await {
            Some(ContainerStatus::Running) => true,
            Some(ContainerStatus::Stopped) => self.start_unit(name, report).await,
            Some(ContainerStatus::Absent) => self.create_unit(name, &agent_config(agent), report).await,
            None => false,
        };
        if deployed {
            report.agents.push(name.to_owned());
        }
        for skill in &agent.skills {
            self.deploy_skill_into(skill, &agent.language, report).await;
        }
    }

    async fn deploy_skill_into(&self, skill: &str, language: &str, report: &mut RolloutReport) {
        let unit = skill_unit(skill);
        let Some(status) = self.status(&unit, report).await else {
            return;
        };
        let deployed = match status {
            ContainerStatus::Running => true,
            ContainerStatus::Stopped => self.start_unit(&unit, report).await,
            ContainerStatus::Absent => {
                self.import_definition(skill).await;
                self.create_unit(&unit, &skill_config(&self.settings, skill, language), report)
                    .await
            }
        };
        if deployed {
            report.skills.push(skill.to_owned());
        }
    }

    /// A missing or broken definition leaves the skill unit to train on whatever memory holds.
    async fn import_definition(&self, skill: &str) {
        match SkillDefinition::load(&self.settings.data_dir, skill).await {
            Ok(Some(definition)) => {
                if let Err(e) = import_skill(&self.memory, skill, &definition).await {
                    tracing::error!(skill, error = %e, "Failed to import skill definition");
                }
            }
            Ok(None) => tracing::debug!(skill, "No skill definition file, nothing to import"),
            Err(e) => tracing::error!(skill, error = %e, "Failed to load skill definition"),
        }
    }

    async fn status(&self, unit: &str, report: &mut RolloutReport) -> Option<ContainerStatus> {
        match self.spawner.status(unit).await {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::error!(unit, error = %e, "Failed to inspect unit");
                report.failed.push(unit.to_owned());
                None
            }
        }
    }

    async fn start_unit(&self, unit: &str, report: &mut RolloutReport) -> bool {
        let spec = DeploySpec::new(unit, self.settings.unit_image.as_str());
        let action = self.spawner.deploy_action(&spec).await;
        report.record(unit, action)
    }

    async fn create_unit(&self, unit: &str, config: &UnitConfig, report: &mut RolloutReport) -> bool {
        if let Err(e) = self.distributor.distribute(unit, config).await {
            tracing::error!(unit, error = %e, "Failed to distribute unit configuration");
            report.failed.push(unit.to_owned());
            return false;
        }
        let spec = self
            .distributor
            .attach(unit, unit_container(&self.settings, &self.app, unit));
        let action = self.spawner.deploy_action(&spec).await;
        report.record(unit, action)
    }
}

fn external_spec(service: &ExternalService, env: BTreeMap<String, String>) -> DeploySpec {
    let mut spec = DeploySpec::new(service.name.as_str(), service.image.as_str());
    spec.command.clone_from(&service.command);
    spec.env = env;
    spec.volumes.clone_from(&service.volumes);
    spec.ports = service.port_bindings();
    spec
}
