//! Bucket/key object storage used to hand generated unit configurations to units.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::config::{ConfigError, UnitConfig};

/// Key of a unit's configuration object inside its bucket.
pub const UNIT_CONFIG_KEY: &str = "config.yml";

/// Bucket that holds the configuration of `unit`.
#[must_use]
pub fn unit_bucket(unit: &str) -> String {
    format!("services-{unit}")
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create `bucket` unless it already exists.
    async fn ensure_bucket(&self, bucket: &str) -> anyhow::Result<()>;

    /// Write `data`, replacing any existing object.
    async fn put(&self, bucket: &str, key: &str, data: &[u8]) -> anyhow::Result<()>;

    async fn get(&self, bucket: &str, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
}

/// Buckets are directories under `root`, objects are files.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_path(&self, bucket: &str) -> anyhow::Result<PathBuf> {
        check_component(bucket)?;
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> anyhow::Result<PathBuf> {
        check_component(key)?;
        Ok(self.bucket_path(bucket)?.join(key))
    }
}

fn check_component(part: &str) -> anyhow::Result<()> {
    if part.is_empty() || part.contains(['/', '\\']) || part == ".." || part == "." {
        anyhow::bail!("invalid blob path component '{part}'");
    }
    Ok(())
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn ensure_bucket(&self, bucket: &str) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(self.bucket_path(bucket)?).await?;
        Ok(())
    }

    async fn put(&self, bucket: &str, key: &str, data: &[u8]) -> anyhow::Result<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write-then-rename so a reader never sees a half-written object.
        let staging = path.with_extension("partial");
        tokio::fs::write(&staging, data).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl UnitConfig {
    /// Fetch the configuration object of `unit` from a blob store.
    ///
    /// # Errors
    /// `ConfigError::NotFound` when the object is missing, `ConfigError::Blob` when the store
    /// fails, and the parse errors of [`UnitConfig::from_yaml`].
    pub async fn load_from_blob(store: &dyn BlobStore, unit: &str) -> Result<Self, ConfigError> {
        let bucket = unit_bucket(unit);
        let bytes = store
            .get(&bucket, UNIT_CONFIG_KEY)
            .await
            .map_err(ConfigError::Blob)?
            .ok_or_else(|| ConfigError::NotFound {
                unit: unit.to_owned(),
                searched: format!("blob {bucket}/{UNIT_CONFIG_KEY}"),
            })?;
        let content = String::from_utf8_lossy(&bytes);
        Self::from_yaml(&content, &format!("{bucket}/{UNIT_CONFIG_KEY}"))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn objects_roundtrip_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        store.ensure_bucket("services-abot").await.unwrap();
        store.ensure_bucket("services-abot").await.unwrap();
        store.put("services-abot", "config.yml", b"one").await.unwrap();
        store.put("services-abot", "config.yml", b"two").await.unwrap();
        assert_eq!(
            store.get("services-abot", "config.yml").await.unwrap(),
            Some(b"two".to_vec())
        );
        assert_eq!(store.get("services-abot", "other.yml").await.unwrap(), None);
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert!(store.put("..", "config.yml", b"x").await.is_err());
        assert!(store.get("services-a", "../../etc").await.is_err());
    }

    #[tokio::test]
    async fn unit_config_from_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let missing = UnitConfig::load_from_blob(&store, "abot").await.unwrap_err();
        assert!(matches!(missing, ConfigError::NotFound { .. }));

        store
            .put(&unit_bucket("abot"), UNIT_CONFIG_KEY, b"services:\n  - dummy\nconnectors:\n  - shell\n")
            .await
            .unwrap();
        let cfg = UnitConfig::load_from_blob(&store, "abot").await.unwrap();
        assert_eq!(cfg.services[0].name, "dummy");
        assert_eq!(cfg.connectors[0].name, "shell");
    }
}
