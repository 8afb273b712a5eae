use async_trait::async_trait;

use crate::error::RuntimeApiError;
use crate::types::{ContainerInfo, DeploySpec, SecretInfo};

/// The primitives the spawner needs from a container runtime.
///
/// Lookups of missing objects fail with [`RuntimeApiError::NotFound`].
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn inspect(&self, name: &str) -> Result<ContainerInfo, RuntimeApiError>;

    /// Create and start a detached container attached to `network`. Returns its id.
    async fn create(&self, spec: &DeploySpec, network: &str) -> Result<String, RuntimeApiError>;

    async fn start(&self, name: &str) -> Result<(), RuntimeApiError>;

    /// Create `network` unless it exists.
    async fn ensure_network(&self, network: &str) -> Result<(), RuntimeApiError>;

    async fn secret(&self, name: &str) -> Result<SecretInfo, RuntimeApiError>;

    /// Returns the id of the new secret.
    async fn create_secret(&self, name: &str, data: &[u8]) -> Result<String, RuntimeApiError>;
}
