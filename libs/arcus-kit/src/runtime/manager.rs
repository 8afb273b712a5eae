//! Unit lifecycle: `UNINITIALIZED -> LOADED -> RUNNING -> UNLOADING -> STOPPED`.
//!
//! Load activates services, databases, language engines and connectors in that order and fails
//! only on the [`FatalError`] conditions. Shutdown is a single supervising future: [`run`]
//! waits for the unit's shutdown token and then performs [`unload`].
//!
//! [`run`]: ServiceManager::run
//! [`unload`]: ServiceManager::unload

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::blob::FsBlobStore;
use crate::bootstrap::{AppConfig, ConfigSource};
use crate::config::{ModuleEntry, UnitConfig};
use crate::connector::{ConnectorInstance, EventSink};
use crate::error::{EXIT_OK, FatalError};
use crate::events::Event;
use crate::loader::{LoadedModule, Loader};
use crate::memory::DatabaseInstance;
use crate::registry::{BuildContext, Category, ModuleRegistry};
use crate::runtime::context::{ModuleCtx, NamedEngine, RuntimeShared};
use crate::runtime::dispatch::{ServiceHandle, dispatch};
use crate::runtime::slot::{ContextGuard, RuntimeSlot};
use crate::runtime::stats::StatsSnapshot;
use crate::web::{self, WebServer};

/// Capacity of the channel connectors push inbound events into.
const EVENT_QUEUE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Uninitialized,
    Loaded,
    Running,
    Unloading,
    Stopped,
}

/// The single active runtime of a unit.
pub struct ServiceManager {
    slot: RuntimeSlot,
    guard: Mutex<Option<ContextGuard>>,
    registry: ModuleRegistry,
    shared: Arc<RuntimeShared>,
    state: Mutex<RuntimeState>,
    running: AtomicBool,
    exit_status: AtomicI32,
    config: Mutex<Option<UnitConfig>>,
    web: Mutex<Option<WebServer>>,
    cron: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for ServiceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceManager")
            .field("unit", &self.shared.unit())
            .field("state", &*self.state.lock())
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ServiceManager {
    /// A manager bound to the process-wide slot.
    #[must_use]
    pub fn new(app: AppConfig, registry: ModuleRegistry) -> Self {
        Self::with_slot(app, registry, RuntimeSlot::process())
    }

    #[must_use]
    pub fn with_slot(app: AppConfig, registry: ModuleRegistry, slot: RuntimeSlot) -> Self {
        let unit = app.unit.clone();
        Self {
            slot,
            guard: Mutex::new(None),
            registry,
            shared: RuntimeShared::new(unit, Arc::new(app)),
            state: Mutex::new(RuntimeState::Uninitialized),
            running: AtomicBool::new(false),
            exit_status: AtomicI32::new(EXIT_OK),
            config: Mutex::new(None),
            web: Mutex::new(None),
            cron: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn shared(&self) -> &Arc<RuntimeShared> {
        &self.shared
    }

    #[must_use]
    pub fn state(&self) -> RuntimeState {
        *self.state.lock()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn exit_status(&self) -> i32 {
        self.exit_status.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats()
    }

    /// Root shutdown token. Cancelling it makes [`run`](Self::run) unload the unit.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown_token().clone()
    }

    /// Configuration the unit was loaded with.
    #[must_use]
    pub fn unit_config(&self) -> Option<UnitConfig> {
        self.config.lock().clone()
    }

    /// Address of the web surface, once started.
    #[must_use]
    pub fn web_addr(&self) -> Option<std::net::SocketAddr> {
        self.web.lock().as_ref().map(|w| w.local_addr)
    }

    /// Become the active runtime of this process.
    ///
    /// # Errors
    /// `FatalError::AlreadyActive` when another manager holds the slot; that manager keeps it.
    pub fn enter(&self) -> Result<(), FatalError> {
        let mut guard = self.guard.lock();
        if guard.is_some() {
            return Ok(());
        }
        *guard = Some(self.slot.enter()?);
        tracing::debug!(unit = %self.shared.unit(), "Runtime entered");
        Ok(())
    }

    /// Read the unit configuration from the configured source.
    ///
    /// # Errors
    /// `FatalError::Config` when it cannot be found or parsed.
    pub async fn read_unit_config(&self) -> Result<UnitConfig, FatalError> {
        let app = self.shared.app();
        let unit = self.shared.unit();
        match app.config_source {
            ConfigSource::File => {
                let (config, path) = UnitConfig::load(&app.config_dir, unit)?;
                tracing::info!(unit, path = %path.display(), "Loaded unit configuration");
                Ok(config)
            }
            ConfigSource::Blob => {
                let store = FsBlobStore::new(&app.blob_root);
                let config = UnitConfig::load_from_blob(&store, unit).await?;
                tracing::info!(unit, "Loaded unit configuration from blob store");
                Ok(config)
            }
        }
    }

    /// Read the unit configuration and activate it.
    ///
    /// # Errors
    /// Any [`FatalError`] condition.
    pub async fn load(&self) -> Result<(), FatalError> {
        let config = self.read_unit_config().await?;
        self.load_with(config).await
    }

    /// Activate `config`.
    ///
    /// A fatal condition after the runtime was entered unloads whatever was already activated
    /// and releases the slot.
    ///
    /// # Errors
    /// Any [`FatalError`] condition. The unit must not be used after an error.
    pub async fn load_with(&self, config: UnitConfig) -> Result<(), FatalError> {
        tracing::info!(unit = %self.shared.unit(), "Phase: load");
        self.enter()?;
        if let Err(e) = self.activate(config).await {
            tracing::warn!(unit = %self.shared.unit(), error = %e, "Load failed, releasing activated modules");
            self.unload().await;
            return Err(e);
        }
        Ok(())
    }

    async fn activate(&self, config: UnitConfig) -> Result<(), FatalError> {
        if config.services.is_empty() {
            return Err(FatalError::NoServices);
        }

        let loader = Loader::new(
            &self.registry,
            BuildContext {
                unit: self.shared.unit(),
                app: self.shared.app(),
            },
        );

        let services = loader.load(&config.services, Category::Service);
        if services.is_empty() {
            return Err(FatalError::NoServices);
        }

        self.activate_databases(&loader, &config.databases).await?;
        self.activate_services(services).await?;
        self.activate_language_engines(&loader, &config.nlp).await?;
        self.activate_connectors(&loader, &config.connectors).await?;
        self.start_web().await;
        self.start_cron();

        *self.config.lock() = Some(config);
        *self.state.lock() = RuntimeState::Loaded;
        tracing::info!(
            unit = %self.shared.unit(),
            handlers = self.shared.handler_count(),
            connectors = ?self.shared.connector_names(),
            databases = ?self.shared.memory().names(),
            "Unit loaded"
        );
        Ok(())
    }

    async fn activate_databases(&self, loader: &Loader<'_>, entries: &[ModuleEntry]) -> Result<(), FatalError> {
        if entries.is_empty() {
            return Ok(());
        }
        for module in loader.load(entries, Category::Database) {
            let name = module.descriptor.name.clone();
            let Some(backend) = module.instance.into_database() else {
                continue;
            };
            let instance = DatabaseInstance::new(name.as_str(), backend);
            match instance.connect().await {
                Ok(()) => {
                    tracing::info!(database = %name, "Connected to database");
                    self.shared.memory().add(instance);
                }
                Err(e) => tracing::error!(database = %name, error = %e, "Unable to connect to database"),
            }
        }
        if self.shared.memory().is_empty() {
            return Err(FatalError::DatabasesUnavailable);
        }
        Ok(())
    }

    /// Run each service's setup in order and bind the handlers of those that succeed.
    async fn activate_services(&self, services: Vec<LoadedModule>) -> Result<(), FatalError> {
        let mut handles = Vec::new();
        for module in services {
            let config = Arc::clone(&module.descriptor.config);
            let Some(service) = module.instance.into_service() else {
                continue;
            };
            let ctx = ModuleCtx::new(Arc::clone(&self.shared), Arc::clone(&config));
            if let Err(e) = service.setup(&ctx).await {
                tracing::error!(service = %config.name, error = %e, "Service setup failed, skipping");
                continue;
            }
            let specs = Arc::clone(&service).handlers();
            tracing::debug!(service = %config.name, handlers = specs.len(), "Service activated");
            handles.extend(
                specs
                    .into_iter()
                    .map(|spec| ServiceHandle::new(Arc::clone(&config), spec)),
            );
        }
        if handles.is_empty() {
            return Err(FatalError::NoServiceHandlers);
        }
        *self.shared.services.write() = handles;
        Ok(())
    }

    async fn activate_language_engines(
        &self,
        loader: &Loader<'_>,
        entries: &[ModuleEntry],
    ) -> Result<(), FatalError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut trained = Vec::new();
        for module in loader.load(entries, Category::LanguageEngine) {
            let name = module.descriptor.name.clone();
            let Some(engine) = module.instance.into_language_engine() else {
                continue;
            };
            match engine.train(self.shared.memory()).await {
                Ok(()) => {
                    tracing::info!(engine = %name, "Language engine trained");
                    trained.push(NamedEngine { name, engine });
                }
                Err(e) => tracing::error!(engine = %name, error = %e, "Language engine failed to train"),
            }
        }
        if trained.is_empty() {
            return Err(FatalError::LanguageEnginesUnavailable);
        }
        *self.shared.engines.write() = trained;
        Ok(())
    }

    /// Instantiate all connectors, connect all, then start one listen task per connector.
    async fn activate_connectors(&self, loader: &Loader<'_>, entries: &[ModuleEntry]) -> Result<(), FatalError> {
        let instances: Vec<Arc<ConnectorInstance>> = loader
            .load(entries, Category::Connector)
            .into_iter()
            .filter_map(|module| {
                let config = Arc::clone(&module.descriptor.config);
                let name = module.descriptor.name.clone();
                module
                    .instance
                    .into_connector()
                    .map(|c| Arc::new(ConnectorInstance::new(name, config, c)))
            })
            .collect();
        if instances.is_empty() {
            return Err(FatalError::NoConnectors);
        }

        let mut connected = Vec::with_capacity(instances.len());
        for instance in instances {
            match instance.connect().await {
                Ok(()) => {
                    tracing::info!(connector = %instance.name(), "Connector connected");
                    connected.push(instance);
                }
                Err(e) => {
                    tracing::error!(connector = %instance.name(), error = %e, "Connector failed to connect");
                }
            }
        }
        if connected.is_empty() {
            return Err(FatalError::NoConnectors);
        }
        self.shared.connectors.write().clone_from(&connected);

        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        self.spawn_pump(rx);
        for instance in connected {
            self.spawn_listener(instance, tx.clone());
        }
        Ok(())
    }

    fn spawn_pump(&self, mut rx: mpsc::Receiver<Event>) {
        let shared = Arc::clone(&self.shared);
        let cancel = self.shared.shutdown_token().clone();
        self.shared.spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(event) => {
                            let handled = dispatch(&shared, event);
                            tracing::trace!(handled, "Event routed");
                        }
                        None => break,
                    },
                }
            }
            tracing::debug!("Event pump stopped");
        });
    }

    fn spawn_listener(&self, instance: Arc<ConnectorInstance>, tx: mpsc::Sender<Event>) {
        if let Err(e) = instance.begin_listen() {
            tracing::error!(connector = %instance.name(), error = %e, "Connector not listening");
            return;
        }
        let sink = EventSink::new(instance.name(), instance.connector(), tx);
        let cancel = self.shared.shutdown_token().child_token();
        self.shared.spawn(async move {
            match instance.connector().listen(sink, cancel).await {
                Ok(()) => tracing::debug!(connector = %instance.name(), "Connector stopped listening"),
                Err(e) => tracing::error!(connector = %instance.name(), error = %e, "Connector listen failed"),
            }
        });
    }

    async fn start_web(&self) {
        let cfg = &self.shared.app().web;
        if !cfg.enabled {
            return;
        }
        match web::start(&self.shared, cfg).await {
            Ok(server) => *self.web.lock() = Some(server),
            Err(e) => tracing::error!(error = %e, "Web surface unavailable, continuing without it"),
        }
    }

    fn start_cron(&self) {
        let Some(period) = self.shared.app().heartbeat_interval else {
            return;
        };
        let token = CancellationToken::new();
        let stop = token.clone();
        let shared = Arc::clone(&self.shared);
        self.shared.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let stats = shared.stats();
                        tracing::info!(
                            unit = %shared.unit(),
                            messages_parsed = stats.messages_parsed,
                            webhooks_called = stats.webhooks_called,
                            handler_errors = stats.handler_errors,
                            "Heartbeat"
                        );
                    }
                }
            }
        });
        *self.cron.lock() = Some(token);
    }

    /// Supervise the unit until its shutdown token fires, then unload.
    ///
    /// Returns the exit status. A second concurrent call logs an error and returns immediately.
    pub async fn run(&self) -> i32 {
        if self.running.swap(true, Ordering::AcqRel) {
            tracing::error!(unit = %self.shared.unit(), "Service manager is already running");
            return self.exit_status();
        }
        {
            let mut state = self.state.lock();
            if *state == RuntimeState::Loaded {
                *state = RuntimeState::Running;
            }
        }
        tracing::info!(unit = %self.shared.unit(), "Phase: run");

        self.shared.shutdown_token().cancelled().await;
        self.running.store(false, Ordering::Release);
        self.unload().await;
        self.exit_status()
    }

    /// Ask the supervising [`run`](Self::run) to shut the unit down.
    pub fn handle_signal(&self) {
        tracing::info!(unit = %self.shared.unit(), "Stopping unit");
        self.running.store(false, Ordering::Release);
        self.shared.shutdown_token().cancel();
    }

    /// Ordered, best-effort teardown. Runs at most once.
    pub async fn unload(&self) {
        {
            let mut state = self.state.lock();
            if matches!(*state, RuntimeState::Unloading | RuntimeState::Stopped) {
                return;
            }
            *state = RuntimeState::Unloading;
        }
        tracing::info!(unit = %self.shared.unit(), "Phase: unload");

        let handles = std::mem::take(&mut *self.shared.services.write());
        tracing::debug!(handlers = handles.len(), "Removed service handlers");
        drop(handles);

        loop {
            let next = {
                let mut connectors = self.shared.connectors.write();
                if connectors.is_empty() {
                    None
                } else {
                    Some(connectors.remove(0))
                }
            };
            let Some(connector) = next else { break };
            if let Err(e) = connector.disconnect().await {
                tracing::warn!(connector = %connector.name(), error = %e, "Connector disconnect failed");
            }
            tracing::debug!(connector = %connector.name(), "Removed connector");
        }

        let released = self.shared.memory().disconnect_all().await;
        tracing::debug!(databases = ?released, "Released databases");
        self.shared.engines.write().clear();

        if let Some(server) = self.web.lock().take() {
            server.stop();
            tracing::debug!("Stopped web surface");
        }

        if let Some(cron) = self.cron.lock().take() {
            cron.cancel();
            tracing::debug!("Stopped cron task");
        }

        self.shared.shutdown_token().cancel();
        let aborted = self.shared.abort_tasks().await;
        tracing::debug!(aborted, "Cancelled pending tasks");

        *self.state.lock() = RuntimeState::Stopped;
        drop(self.guard.lock().take());
        tracing::info!(unit = %self.shared.unit(), "Unit stopped");
    }

    /// Terminate the process with the stored exit status.
    pub fn exit(&self) -> ! {
        let status = self.exit_status();
        tracing::info!(status, "Exiting");
        std::process::exit(status)
    }

    /// Log a fatal condition at critical severity and terminate with its exit status.
    pub fn critical(&self, error: &FatalError) -> ! {
        tracing::error!(critical = true, unit = %self.shared.unit(), error = %error, "Fatal startup condition");
        self.exit_status.store(error.exit_code(), Ordering::Release);
        self.exit()
    }
}
