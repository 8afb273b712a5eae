use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::bootstrap::AppConfig;
use crate::config::{ConfigError, ModuleEntry};
use crate::connector::ConnectorInstance;
use crate::contracts::LanguageEngine;
use crate::events::OutboundMessage;
use crate::memory::Memory;
use crate::runtime::dispatch::ServiceHandle;
use crate::runtime::stats::{RuntimeStats, StatsSnapshot};

/// A trained language engine and the name it was configured under.
#[derive(Clone)]
pub struct NamedEngine {
    pub name: String,
    pub engine: Arc<dyn LanguageEngine>,
}

/// State shared by the manager, the dispatcher, the web surface and module contexts.
pub struct RuntimeShared {
    unit: String,
    app: Arc<AppConfig>,
    pub(crate) services: RwLock<Vec<ServiceHandle>>,
    pub(crate) connectors: RwLock<Vec<Arc<ConnectorInstance>>>,
    memory: Arc<Memory>,
    pub(crate) engines: RwLock<Vec<NamedEngine>>,
    pub(crate) stats: RuntimeStats,
    tasks: Mutex<JoinSet<()>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for RuntimeShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeShared")
            .field("unit", &self.unit)
            .field("services", &self.services.read().len())
            .field("connectors", &self.connector_names())
            .field("databases", &self.memory.names())
            .finish_non_exhaustive()
    }
}

impl RuntimeShared {
    #[must_use]
    pub fn new(unit: impl Into<String>, app: Arc<AppConfig>) -> Arc<Self> {
        Arc::new(Self {
            unit: unit.into(),
            app,
            services: RwLock::new(Vec::new()),
            connectors: RwLock::new(Vec::new()),
            memory: Arc::new(Memory::new()),
            engines: RwLock::new(Vec::new()),
            stats: RuntimeStats::default(),
            tasks: Mutex::new(JoinSet::new()),
            cancel: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    #[must_use]
    pub fn app(&self) -> &AppConfig {
        &self.app
    }

    #[must_use]
    pub fn memory(&self) -> &Arc<Memory> {
        &self.memory
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Root token; cancelled when the unit starts shutting down.
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Make a trained engine available to services.
    pub fn add_language_engine(&self, name: impl Into<String>, engine: Arc<dyn LanguageEngine>) {
        self.engines.write().push(NamedEngine {
            name: name.into(),
            engine,
        });
    }

    #[must_use]
    pub fn connector_names(&self) -> Vec<String> {
        self.connectors
            .read()
            .iter()
            .map(|c| c.name().to_owned())
            .collect()
    }

    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.services.read().len()
    }

    /// Run `fut` as a tracked background task. Unload aborts whatever is still pending.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(fut);
    }

    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Abort every tracked task and wait until each has been dropped.
    pub(crate) async fn abort_tasks(&self) -> usize {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let pending = tasks.len();
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        pending
    }
}

/// What a module sees of the runtime.
#[derive(Clone)]
pub struct ModuleCtx {
    shared: Arc<RuntimeShared>,
    entry: Arc<ModuleEntry>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ModuleCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCtx")
            .field("unit", &self.shared.unit)
            .field("module", &self.entry.name)
            .finish_non_exhaustive()
    }
}

impl ModuleCtx {
    #[must_use]
    pub fn new(shared: Arc<RuntimeShared>, entry: Arc<ModuleEntry>) -> Self {
        let cancel = shared.cancel.child_token();
        Self {
            shared,
            entry,
            cancel,
        }
    }

    /// A context over a fresh runtime that has no connectors or databases. Handy for exercising a
    /// service in isolation.
    #[must_use]
    pub fn standalone(unit: &str, entry: ModuleEntry) -> Self {
        let app = AppConfig {
            unit: unit.to_owned(),
            ..AppConfig::default()
        };
        Self::new(RuntimeShared::new(unit, Arc::new(app)), Arc::new(entry))
    }

    #[must_use]
    pub fn unit(&self) -> &str {
        &self.shared.unit
    }

    #[must_use]
    pub fn module_name(&self) -> &str {
        &self.entry.name
    }

    #[must_use]
    pub fn entry(&self) -> &ModuleEntry {
        &self.entry
    }

    /// Typed settings of this module.
    ///
    /// # Errors
    /// `ConfigError::InvalidSettings` when the entry does not match `T`.
    pub fn config<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        self.entry.settings()
    }

    #[must_use]
    pub fn memory(&self) -> &Memory {
        &self.shared.memory
    }

    #[must_use]
    pub fn app(&self) -> &AppConfig {
        &self.shared.app
    }

    #[must_use]
    pub fn shared(&self) -> &Arc<RuntimeShared> {
        &self.shared
    }

    #[must_use]
    pub fn language_engines(&self) -> Vec<NamedEngine> {
        self.shared.engines.read().clone()
    }

    #[must_use]
    pub fn language_engine(&self, name: &str) -> Option<Arc<dyn LanguageEngine>> {
        self.shared
            .engines
            .read()
            .iter()
            .find(|e| e.name == name)
            .map(|e| Arc::clone(&e.engine))
    }

    /// Send through the first active connector.
    ///
    /// # Errors
    /// Fails when the unit has no connector or the delivery fails.
    pub async fn send(&self, message: &OutboundMessage) -> anyhow::Result<()> {
        let connector = self.shared.connectors.read().first().cloned();
        match connector {
            Some(connector) => connector.send(message).await,
            None => anyhow::bail!("unit '{}' has no active connector", self.shared.unit),
        }
    }

    /// Send through the connector named `name`.
    ///
    /// # Errors
    /// Fails when no such connector is active or the delivery fails.
    pub async fn send_via(&self, name: &str, message: &OutboundMessage) -> anyhow::Result<()> {
        let connector = self
            .shared
            .connectors
            .read()
            .iter()
            .find(|c| c.name() == name)
            .cloned();
        match connector {
            Some(connector) => connector.send(message).await,
            None => anyhow::bail!("no active connector named '{name}'"),
        }
    }

    /// Child of the unit's shutdown token.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run `fut` as a tracked background task of the unit.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.shared.spawn(fut);
    }
}
