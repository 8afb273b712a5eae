use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::ModuleEntry;
use crate::contracts::Database;
use crate::registry::BuildContext;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FsDatabaseConfig {
    /// Directory holding one sub-directory per collection.
    pub root: PathBuf,
}

impl Default for FsDatabaseConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/opt/arcus/data"),
        }
    }
}

/// JSON documents on disk: `<root>/<collection>/<key>.json`.
#[derive(Debug)]
pub struct FsDatabase {
    root: PathBuf,
}

/// # Errors
/// Fails when the entry's settings are not a valid [`FsDatabaseConfig`].
pub fn build(entry: &ModuleEntry, _ctx: &BuildContext<'_>) -> anyhow::Result<Arc<dyn Database>> {
    let cfg: FsDatabaseConfig = entry.settings()?;
    Ok(Arc::new(FsDatabase::new(cfg.root)))
}

impl FsDatabase {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn collection_dir(&self, collection: &str) -> anyhow::Result<PathBuf> {
        valid_name(collection)?;
        Ok(self.root.join(collection))
    }

    fn document(&self, collection: &str, key: &str) -> anyhow::Result<PathBuf> {
        valid_name(key)?;
        Ok(self.collection_dir(collection)?.join(format!("{key}.json")))
    }
}

fn valid_name(name: &str) -> anyhow::Result<()> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        anyhow::bail!("'{name}' is not a valid collection or key name");
    }
    Ok(())
}

#[async_trait]
impl Database for FsDatabase {
    async fn connect(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| anyhow::anyhow!("cannot open data directory '{}': {e}", self.root.display()))
    }

    async fn put(&self, collection: &str, key: &str, data: &Value) -> anyhow::Result<()> {
        let path = self.document(collection, key)?;
        tokio::fs::create_dir_all(self.collection_dir(collection)?).await?;
        let staging = path.with_extension("json.partial");
        tokio::fs::write(&staging, serde_json::to_vec_pretty(data)?).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> anyhow::Result<Option<Value>> {
        let path = self.document(collection, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_keys(&self, collection: &str) -> anyhow::Result<Vec<String>> {
        let dir = self.collection_dir(collection)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(key) = name.to_str().and_then(|n| n.strip_suffix(".json")) {
                keys.push(key.to_owned());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn documents_persist_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let db = FsDatabase::new(dir.path().join("data"));
        db.connect().await.unwrap();
        db.put("billing_intents", "pay", &json!({"examples": ["pay my bill"]}))
            .await
            .unwrap();
        db.put("billing_intents", "balance", &json!({"examples": []}))
            .await
            .unwrap();

        let reopened = FsDatabase::new(dir.path().join("data"));
        assert_eq!(
            reopened.get("billing_intents", "pay").await.unwrap(),
            Some(json!({"examples": ["pay my bill"]}))
        );
        assert_eq!(
            reopened.get_keys("billing_intents").await.unwrap(),
            vec!["balance".to_owned(), "pay".to_owned()]
        );
        assert_eq!(reopened.get("billing_intents", "refund").await.unwrap(), None);
        assert!(reopened.get_keys("unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_escaping_names() {
        let dir = tempfile::tempdir().unwrap();
        let db = FsDatabase::new(dir.path());
        assert!(db.put("../x", "k", &json!(1)).await.is_err());
        assert!(db.get("c", "..").await.is_err());
    }

    #[test]
    fn settings_default_root() {
        let cfg: FsDatabaseConfig = ModuleEntry::new("fs").settings().unwrap();
        assert_eq!(cfg.root, PathBuf::from("/opt/arcus/data"));
        let bad = ModuleEntry::new("fs").with("rooot", "/tmp");
        assert!(bad.settings::<FsDatabaseConfig>().is_err());
    }
}
