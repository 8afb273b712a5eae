//! Persistence fan-out.
//!
//! [`Memory`] owns the unit's database instances in configuration order. Writes go to every
//! backend; reads ask every backend and keep the first value. Nothing is atomic across backends.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

use crate::contracts::Database;
use crate::error::MemoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbState {
    Unconnected,
    Connected,
    Disconnected,
}

/// One configured backend and its lifecycle state.
pub struct DatabaseInstance {
    name: String,
    backend: Arc<dyn Database>,
    state: Mutex<DbState>,
}

impl std::fmt::Debug for DatabaseInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseInstance")
            .field("name", &self.name)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl DatabaseInstance {
    pub fn new(name: impl Into<String>, backend: Arc<dyn Database>) -> Self {
        Self {
            name: name.into(),
            backend,
            state: Mutex::new(DbState::Unconnected),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn state(&self) -> DbState {
        *self.state.lock()
    }

    /// # Errors
    /// Propagates the backend's connect error; the instance stays `Unconnected`.
    pub async fn connect(&self) -> anyhow::Result<()> {
        self.backend.connect().await?;
        *self.state.lock() = DbState::Connected;
        Ok(())
    }

    /// Best-effort; the instance is `Disconnected` afterwards whatever the backend reports.
    ///
    /// # Errors
    /// Propagates the backend's disconnect error.
    pub async fn disconnect(&self) -> anyhow::Result<()> {
        let result = self.backend.disconnect().await;
        *self.state.lock() = DbState::Disconnected;
        result
    }
}

/// Fan-out over the connected databases of a unit.
#[derive(Debug, Default)]
pub struct Memory {
    databases: Mutex<Vec<Arc<DatabaseInstance>>>,
}

impl Memory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a connected instance. Registration order is query and shutdown order.
    pub fn add(&self, instance: DatabaseInstance) {
        self.databases.lock().push(Arc::new(instance));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.databases.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.databases.lock().is_empty()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.databases
            .lock()
            .iter()
            .map(|db| db.name().to_owned())
            .collect()
    }

    fn snapshot(&self) -> Vec<Arc<DatabaseInstance>> {
        self.databases.lock().clone()
    }

    /// Value stored under `collection/key` by the first backend that has one.
    ///
    /// Every backend is queried; a backend error is logged and treated as "not found".
    pub async fn get(&self, collection: &str, key: &str) -> Option<Value> {
        let mut found = None;
        for db in self.snapshot() {
            match db.backend.get(collection, key).await {
                Ok(Some(value)) if found.is_none() => found = Some(value),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(database = %db.name, collection, key, error = %e, "Database get failed");
                }
            }
        }
        found
    }

    /// Keys of `collection` from the first backend that returns a non-empty list.
    pub async fn get_keys(&self, collection: &str) -> Vec<String> {
        let mut found: Option<Vec<String>> = None;
        for db in self.snapshot() {
            match db.backend.get_keys(collection).await {
                Ok(keys) if found.is_none() && !keys.is_empty() => found = Some(keys),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(database = %db.name, collection, error = %e, "Database get_keys failed");
                }
            }
        }
        found.unwrap_or_default()
    }

    /// Write to every backend.
    ///
    /// # Errors
    /// `MemoryError::PartialWrite` naming the backends that rejected the write. The other
    /// backends keep the value; nothing is rolled back or retried.
    pub async fn put(&self, collection: &str, key: &str, data: &Value) -> Result<(), MemoryError> {
        let mut failed = Vec::new();
        for db in self.snapshot() {
            if let Err(e) = db.backend.put(collection, key, data).await {
                tracing::error!(database = %db.name, collection, key, error = %e, "Database put failed");
                failed.push(db.name.clone());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(MemoryError::PartialWrite {
                collection: collection.to_owned(),
                key: key.to_owned(),
                failed,
            })
        }
    }

    /// Disconnect and remove every instance in registration order. Failures are logged.
    ///
    /// Returns the names of the instances that were released.
    pub async fn disconnect_all(&self) -> Vec<String> {
        let mut released = Vec::new();
        loop {
            let next = {
                let mut dbs = self.databases.lock();
                if dbs.is_empty() {
                    None
                } else {
                    Some(dbs.remove(0))
                }
            };
            let Some(db) = next else { break };
            if let Err(e) = db.disconnect().await {
                tracing::warn!(database = %db.name, error = %e, "Database disconnect failed");
            }
            tracing::debug!(database = %db.name, "Database released");
            released.push(db.name.clone());
        }
        released
    }
}
