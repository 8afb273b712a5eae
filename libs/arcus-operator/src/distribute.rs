//! Delivery of generated unit configurations.
//!
//! A distributor writes the configuration somewhere addressable by the unit name and adjusts the
//! unit's container spec so the unit finds it on start. Repeated writes for the same unit
//! overwrite.

use arcus_kit::{AppConfig, BlobStore, FsBlobStore, UNIT_CONFIG_KEY, UnitConfig, unit_bucket};
use arcus_spawner::{DeploySpec, VolumeBinding};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::settings::{Distribution, OperatorSettings};

/// Path units read their mounted configuration from.
pub const MOUNTED_CONFIG_PATH: &str = "/opt/arcus/conf/config.yml";

#[async_trait]
pub trait ConfigDistributor: Send + Sync {
    /// Write `config` for `unit`, replacing any previous version.
    async fn distribute(&self, unit: &str, config: &UnitConfig) -> anyhow::Result<()>;

    /// Point the container of `unit` at its distributed configuration.
    fn attach(&self, unit: &str, spec: DeploySpec) -> DeploySpec;
}

/// One `<unit>.yml` file per unit, bind-mounted read-only into the unit container.
#[derive(Debug, Clone)]
pub struct MountedFileDistributor {
    dir: PathBuf,
    host_dir: Option<PathBuf>,
}

impl MountedFileDistributor {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            host_dir: None,
        }
    }

    /// Mount from `host_dir` instead of `dir`, for an operator whose `dir` is itself a mount.
    #[must_use]
    pub fn with_host_dir(mut self, host_dir: Option<PathBuf>) -> Self {
        self.host_dir = host_dir;
        self
    }

    #[must_use]
    pub fn path_for(&self, unit: &str) -> PathBuf {
        self.dir.join(format!("{unit}.yml"))
    }

    fn mount_source(&self, unit: &str) -> PathBuf {
        self.host_dir
            .as_deref()
            .unwrap_or(&self.dir)
            .join(format!("{unit}.yml"))
    }
}

async fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let staging = path.with_extension("yml.partial");
    tokio::fs::write(&staging, content).await?;
    tokio::fs::rename(&staging, path).await
}

#[async_trait]
impl ConfigDistributor for MountedFileDistributor {
    async fn distribute(&self, unit: &str, config: &UnitConfig) -> anyhow::Result<()> {
        let path = self.path_for(unit);
        write_atomic(&path, config.to_yaml()?.as_bytes()).await?;
        tracing::info!(unit, path = %path.display(), "Unit configuration written");
        Ok(())
    }

    fn attach(&self, unit: &str, spec: DeploySpec) -> DeploySpec {
        spec.volume(
            VolumeBinding::new(self.mount_source(unit).display().to_string(), MOUNTED_CONFIG_PATH)
                .read_only(),
        )
    }
}

/// One `config.yml` object per unit in the `services-<unit>` bucket of a shared blob store.
#[derive(Clone)]
pub struct BlobStoreDistributor {
    store: Arc<dyn BlobStore>,
    volume: Option<VolumeBinding>,
}

impl std::fmt::Debug for BlobStoreDistributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStoreDistributor")
            .field("volume", &self.volume)
            .finish_non_exhaustive()
    }
}

impl BlobStoreDistributor {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store, volume: None }
    }

    /// Volume that exposes the store to unit containers.
    #[must_use]
    pub fn with_volume(mut self, volume: VolumeBinding) -> Self {
        self.volume = Some(volume);
        self
    }
}

#[async_trait]
impl ConfigDistributor for BlobStoreDistributor {
    async fn distribute(&self, unit: &str, config: &UnitConfig) -> anyhow::Result<()> {
        let bucket = unit_bucket(unit);
        self.store.ensure_bucket(&bucket).await?;
        self.store
            .put(&bucket, UNIT_CONFIG_KEY, config.to_yaml()?.as_bytes())
            .await?;
        tracing::info!(unit, bucket = %bucket, "Unit configuration stored");
        Ok(())
    }

    fn attach(&self, _unit: &str, spec: DeploySpec) -> DeploySpec {
        let spec = spec.env("ARCUS__CONFIG_SOURCE", "blob");
        match &self.volume {
            Some(volume) => spec.volume(volume.clone()),
            None => spec,
        }
    }
}

/// The distributor selected by `settings.distribution`.
///
/// Blob mode stores objects under the operator's own `blob_root` and mounts `blob_volume` at the
/// same path in unit containers.
#[must_use]
pub fn distributor_for(settings: &OperatorSettings, app: &AppConfig) -> Arc<dyn ConfigDistributor> {
    match settings.distribution {
        Distribution::MountedFile => Arc::new(
            MountedFileDistributor::new(settings.config_dir.as_path())
                .with_host_dir(settings.host_config_dir.clone()),
        ),
        Distribution::Blob => {
            let root = app.blob_root.display().to_string();
            Arc::new(
                BlobStoreDistributor::new(Arc::new(FsBlobStore::new(&app.blob_root)))
                    .with_volume(VolumeBinding::new(settings.blob_volume.as_str(), root)),
            )
        }
    }
}
