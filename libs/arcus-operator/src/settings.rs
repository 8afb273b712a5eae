//! Operator settings, read from the `operator` section of the layered process configuration.

use arcus_kit::ModuleEntry;
use figment::Figment;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::manifest::AgentSpec;
use crate::readiness::ReadinessPolicy;

/// Manifest file looked up in the unit's configuration directory.
pub const PLATFORM_MANIFEST: &str = "platform.yml";

/// How generated unit configurations reach their units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Distribution {
    /// One file per unit, bind-mounted into the unit container.
    #[default]
    MountedFile,
    /// One object per unit in the shared blob store.
    Blob,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct OperatorSettings {
    /// Platform manifest; `<config_dir>/platform.yml` when unset.
    pub manifest_path: Option<PathBuf>,
    /// Directory holding skill definition files (`<skill>.yml`).
    pub data_dir: PathBuf,
    pub unit_image: String,
    pub network: String,
    pub distribution: Distribution,
    /// Where generated unit configurations are written in mounted-file mode.
    pub config_dir: PathBuf,
    /// The same directory as seen by the container runtime's host, when the operator itself
    /// runs in a container.
    pub host_config_dir: Option<PathBuf>,
    /// Shared database entry placed into operator and skill unit configs.
    pub database: ModuleEntry,
    /// Connectors placed into operator and skill unit configs.
    pub connectors: Vec<ModuleEntry>,
    /// Named volume shared by all Arcus units, mounted at [`DATA_MOUNT`].
    pub data_volume: String,
    /// Named volume holding the blob store in blob distribution mode.
    pub blob_volume: String,
    pub readiness: ReadinessPolicy,
    /// Agents deployed after the manifest rollout, in addition to the manifest's own.
    pub agents: Vec<AgentSpec>,
}

/// Mount point of the shared data volume inside unit containers.
pub const DATA_MOUNT: &str = "/opt/arcus/data";

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            manifest_path: None,
            data_dir: PathBuf::from("/opt/arcus/skills"),
            unit_image: "eternius/arcusservice:latest".to_owned(),
            network: arcus_spawner::DEFAULT_NETWORK.to_owned(),
            distribution: Distribution::MountedFile,
            config_dir: PathBuf::from("/opt/arcus/conf"),
            host_config_dir: None,
            database: ModuleEntry::new("fs").with("root", DATA_MOUNT),
            connectors: vec![ModuleEntry::new("websocket")],
            data_volume: "arcus-data".to_owned(),
            blob_volume: "arcus-blobs".to_owned(),
            readiness: ReadinessPolicy::default(),
            agents: Vec::new(),
        }
    }
}

impl OperatorSettings {
    /// Extract the `operator` section; absent keys keep their defaults.
    ///
    /// # Errors
    /// Returns an error if the section has unknown keys or invalid values.
    pub fn from_figment(figment: &Figment) -> anyhow::Result<Self> {
        if !figment.contains("operator") {
            return Ok(Self::default());
        }
        figment
            .focus("operator")
            .extract()
            .map_err(|e| anyhow::anyhow!("invalid operator settings: {e}"))
    }

    /// The manifest path, falling back to `platform.yml` in `unit_config_dir`.
    #[must_use]
    pub fn manifest_path(&self, unit_config_dir: &Path) -> PathBuf {
        self.manifest_path
            .clone()
            .unwrap_or_else(|| unit_config_dir.join(PLATFORM_MANIFEST))
    }
}
