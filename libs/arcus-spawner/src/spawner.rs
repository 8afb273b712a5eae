use std::sync::Arc;

use crate::error::RuntimeApiError;
use crate::runtime::ContainerRuntime;
use crate::types::{ContainerInfo, ContainerStatus, DeploySpec, SecretInfo};

/// What a deploy had to do to reach the running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployAction {
    Unchanged,
    Started,
    Created,
}

impl DeployAction {
    #[must_use]
    pub fn changed(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Idempotent deployer of named containers on one network.
///
/// The create-or-start decision is check-then-act against the runtime; callers serialize
/// concurrent deployments of the same name.
pub struct Spawner {
    runtime: Arc<dyn ContainerRuntime>,
    network: String,
}

impl std::fmt::Debug for Spawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spawner")
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

impl Spawner {
    /// Bind to `runtime`, creating `network` when it is missing.
    ///
    /// # Errors
    /// Propagates the runtime error when the network cannot be inspected or created.
    pub async fn connect(
        runtime: Arc<dyn ContainerRuntime>,
        network: impl Into<String>,
    ) -> Result<Self, RuntimeApiError> {
        let network = network.into();
        runtime.ensure_network(&network).await?;
        Ok(Self { runtime, network })
    }

    #[must_use]
    pub fn network(&self) -> &str {
        &self.network
    }

    /// # Errors
    /// Runtime failures other than "not found".
    pub async fn exists(&self, name: &str) -> Result<bool, RuntimeApiError> {
        Ok(self.get_container(name).await?.is_some())
    }

    /// # Errors
    /// Runtime failures other than "not found".
    pub async fn status(&self, name: &str) -> Result<ContainerStatus, RuntimeApiError> {
        Ok(self
            .get_container(name)
            .await?
            .map_or(ContainerStatus::Absent, |c| c.status()))
    }

    /// Running and, when the image declares a health check, healthy. Errors count as not ready.
    pub async fn is_ready(&self, name: &str) -> bool {
        match self.runtime.inspect(name).await {
            Ok(info) => info.is_ready(),
            Err(e) => {
                tracing::debug!(unit = name, error = %e, "Readiness probe failed");
                false
            }
        }
    }

    /// Bring `spec.name` to the running state with as few runtime calls as possible.
    ///
    /// # Errors
    /// The first runtime failure encountered.
    pub async fn apply(&self, spec: &DeploySpec) -> Result<DeployAction, RuntimeApiError> {
        match self.status(&spec.name).await? {
            ContainerStatus::Running => Ok(DeployAction::Unchanged),
            ContainerStatus::Stopped => {
                self.runtime.start(&spec.name).await?;
                Ok(DeployAction::Started)
            }
            ContainerStatus::Absent => {
                let id = self.runtime.create(spec, &self.network).await?;
                tracing::debug!(unit = %spec.name, id = %id, "Container created");
                Ok(DeployAction::Created)
            }
        }
    }

    /// [`apply`](Self::apply) with every failure kind logged and absorbed.
    pub async fn deploy_action(&self, spec: &DeploySpec) -> Option<DeployAction> {
        match self.apply(spec).await {
            Ok(action) => {
                tracing::info!(unit = %spec.name, action = ?action, "Unit deployed");
                Some(action)
            }
            Err(RuntimeApiError::NotFound(what)) => {
                tracing::error!(unit = %spec.name, missing = %what, "Error deploying unit: object vanished");
                None
            }
            Err(RuntimeApiError::ImageNotFound(image)) => {
                tracing::error!(unit = %spec.name, image = %image, "Error deploying unit: image not found");
                None
            }
            Err(RuntimeApiError::Api(message)) => {
                tracing::error!(unit = %spec.name, error = %message, "Error deploying unit: runtime rejected request");
                None
            }
            Err(RuntimeApiError::Io(e)) => {
                tracing::error!(unit = %spec.name, error = %e, "Error deploying unit: runtime unreachable");
                None
            }
        }
    }

    /// `true` when the unit is running afterwards.
    pub async fn deploy(&self, spec: &DeploySpec) -> bool {
        self.deploy_action(spec).await.is_some()
    }

    /// # Errors
    /// Runtime failures other than "not found".
    pub async fn get_container(&self, name: &str) -> Result<Option<ContainerInfo>, RuntimeApiError> {
        match self.runtime.inspect(name).await {
            Ok(info) => Ok(Some(info)),
            Err(RuntimeApiError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// # Errors
    /// Runtime failures other than "not found".
    pub async fn get_secret(&self, name: &str) -> Result<Option<SecretInfo>, RuntimeApiError> {
        match self.runtime.secret(name).await {
            Ok(info) => Ok(Some(info)),
            Err(RuntimeApiError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// # Errors
    /// Propagates the runtime error.
    pub async fn create_secret(&self, name: &str, data: &[u8]) -> Result<String, RuntimeApiError> {
        self.runtime.create_secret(name, data).await
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::testing::RecordingRuntime;
    use crate::types::{DEFAULT_NETWORK, VolumeBinding};
    use tracing_test::traced_test;

    async fn spawner(runtime: &Arc<RecordingRuntime>) -> Spawner {
        Spawner::connect(Arc::clone(runtime) as Arc<dyn ContainerRuntime>, DEFAULT_NETWORK)
            .await
            .unwrap()
    }

    fn broker() -> DeploySpec {
        DeploySpec::new("broker", "broker:latest")
            .env("BROKER_PORT", "1234")
            .volume(VolumeBinding::new("/srv/broker", "/data").read_only())
            .port(1883, 1234)
    }

    #[tokio::test]
    async fn running_unit_needs_no_calls() {
        let runtime = Arc::new(RecordingRuntime::new().with_running("broker", "broker:latest"));
        let spawner = spawner(&runtime).await;
        assert_eq!(spawner.deploy_action(&broker()).await, Some(DeployAction::Unchanged));
        assert_eq!(runtime.create_count(), 0);
        assert_eq!(runtime.start_count(), 0);
    }

    #[tokio::test]
    async fn stopped_unit_is_started_once() {
        let runtime = Arc::new(RecordingRuntime::new().with_stopped("broker", "broker:latest"));
        let spawner = spawner(&runtime).await;
        assert!(spawner.deploy(&broker()).await);
        assert_eq!(runtime.start_calls(), vec!["broker".to_owned()]);
        assert_eq!(runtime.create_count(), 0);
        assert_eq!(spawner.status("broker").await.unwrap(), ContainerStatus::Running);
    }

    #[tokio::test]
    async fn absent_unit_is_created_with_the_exact_spec() {
        let runtime = Arc::new(RecordingRuntime::new());
        let spawner = spawner(&runtime).await;
        assert!(!spawner.exists("broker").await.unwrap());
        assert_eq!(spawner.deploy_action(&broker()).await, Some(DeployAction::Created));
        assert_eq!(runtime.create_calls(), vec![(broker(), DEFAULT_NETWORK.to_owned())]);
        assert_eq!(runtime.start_count(), 0);
        assert!(spawner.exists("broker").await.unwrap());
    }

    #[tokio::test]
    #[traced_test]
    async fn failures_become_false() {
        let runtime = Arc::new(RecordingRuntime::new().with_missing_image("broker:latest"));
        let spawner = spawner(&runtime).await;
        assert!(!spawner.deploy(&broker()).await);
        assert_eq!(spawner.status("broker").await.unwrap(), ContainerStatus::Absent);
        assert!(logs_contain("Error deploying unit: image not found"));

        let rejected = Arc::new(RecordingRuntime::new().with_rejected("broker"));
        let spawner = Spawner::connect(rejected, "arcus").await.unwrap();
        assert!(!spawner.deploy(&broker()).await);
    }

    #[tokio::test]
    async fn network_is_ensured_on_connect() {
        let runtime = Arc::new(RecordingRuntime::new());
        let spawner = spawner(&runtime).await;
        assert_eq!(spawner.network(), "arcus");
        assert_eq!(runtime.networks(), vec!["arcus".to_owned()]);
    }

    #[tokio::test]
    async fn readiness_follows_health() {
        let runtime = Arc::new(
            RecordingRuntime::new()
                .with_running("broker", "broker:latest")
                .with_starting_for("broker", 2),
        );
        let spawner = spawner(&runtime).await;
        assert!(!spawner.is_ready("broker").await);
        assert!(!spawner.is_ready("broker").await);
        assert!(spawner.is_ready("broker").await);
        assert!(!spawner.is_ready("ghost").await);
    }

    #[tokio::test]
    async fn secrets_pass_through() {
        let runtime = Arc::new(RecordingRuntime::new());
        let spawner = spawner(&runtime).await;
        assert_eq!(spawner.get_secret("db-password").await.unwrap(), None);
        let id = spawner.create_secret("db-password", b"s3cret").await.unwrap();
        let found = spawner.get_secret("db-password").await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.name, "db-password");
    }
}
