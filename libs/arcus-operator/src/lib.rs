#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Fleet operator.
//!
//! Reads the platform manifest, keeps every infrastructure unit deployed and running, waits for
//! changed units to become ready, then writes the generated configuration of each Arcus unit
//! (the operator itself, agents and their skills) and deploys them through the
//! [`arcus_spawner::Spawner`].

pub mod distribute;
pub mod env;
pub mod error;
pub mod generate;
pub mod manifest;
pub mod operator;
pub mod readiness;
pub mod settings;
pub mod skills;

pub use distribute::{BlobStoreDistributor, ConfigDistributor, MountedFileDistributor, distributor_for};
pub use env::{ENVVAR_PREFIX, resolve_env};
pub use error::{EnvError, ManifestError, SkillError};
pub use manifest::{AgentSpec, ExternalService, Manifest};
pub use operator::{Operator, RolloutReport};
pub use readiness::ReadinessPolicy;
pub use settings::{Distribution, OperatorSettings};
pub use skills::{SkillDefinition, import_skill};
