use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::config::ModuleEntry;
use crate::contracts::Database;
use crate::registry::BuildContext;

type Collection = BTreeMap<String, Value>;

/// In-process store. Contents live as long as the unit.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    collections: RwLock<HashMap<String, Collection>>,
}

/// # Errors
/// Never fails.
pub fn build(_entry: &ModuleEntry, _ctx: &BuildContext<'_>) -> anyhow::Result<Arc<dyn Database>> {
    Ok(Arc::new(MemoryDatabase::default()))
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn connect(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.collections.write().clear();
        Ok(())
    }

    async fn put(&self, collection: &str, key: &str, data: &Value) -> anyhow::Result<()> {
        self.collections
            .write()
            .entry(collection.to_owned())
            .or_default()
            .insert(key.to_owned(), data.clone());
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.get(key))
            .cloned())
    }

    async fn get_keys(&self, collection: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default())
    }
}
