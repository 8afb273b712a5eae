#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Idempotent deployment of named containers.
//!
//! [`Spawner`] turns "make sure unit X runs with this spec" into the minimal set of container
//! runtime calls: nothing when X is running, a start when it is stopped, a create when it is
//! absent. Runtime failures are reported as a closed set of [`RuntimeApiError`] kinds.

pub mod docker;
pub mod error;
pub mod runtime;
pub mod spawner;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use docker::DockerCliRuntime;
pub use error::RuntimeApiError;
pub use runtime::ContainerRuntime;
pub use spawner::{DeployAction, Spawner};
pub use types::{
    ContainerInfo, ContainerStatus, DEFAULT_NETWORK, DeploySpec, HealthState, PortBinding,
    SecretInfo, VolumeBinding,
};
