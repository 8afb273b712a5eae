#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Unit lifecycle against scripted modules.
//!
//! Every probe module appends to a journal selected by its `journal` setting, so tests running in
//! parallel never see each other's entries.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use arcus_kit::bootstrap::WebConfig;
use arcus_kit::builtin::memory_db::MemoryDatabase;
use arcus_kit::{
    AppConfig, BuildContext, Connector, Database, EXIT_OK, Event, EventSink, FatalError,
    HandlerSpec, Matcher, ModuleCtx, ModuleEntry, ModuleRegistration, ModuleRegistry,
    OutboundMessage, RuntimeSlot, RuntimeState, Service, ServiceManager, UnitConfig,
};

type Journal = Arc<Mutex<Vec<String>>>;

static JOURNALS: LazyLock<Mutex<HashMap<String, Journal>>> = LazyLock::new(Mutex::default);

fn journal(id: &str) -> Journal {
    Arc::clone(JOURNALS.lock().entry(id.to_owned()).or_default())
}

fn journal_of(entry: &ModuleEntry) -> Journal {
    journal(entry.get("journal").and_then(Value::as_str).unwrap_or("shared"))
}

fn flag(entry: &ModuleEntry, key: &str) -> bool {
    entry.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn new_journal() -> String {
    uuid::Uuid::new_v4().to_string()
}

// --- probe modules ---

struct ProbeService {
    fail_setup: bool,
    linger: bool,
}

/// Records in the journal when the task owning it is dropped.
struct DropMark(Journal);

impl Drop for DropMark {
    fn drop(&mut self) {
        self.0.lock().push("linger-dropped".to_owned());
    }
}

impl ProbeService {
    async fn handle(event: Event, ctx: ModuleCtx) -> anyhow::Result<()> {
        let text = event.text().unwrap_or_default().to_owned();
        journal_of(ctx.entry()).lock().push(format!("handled:{text}"));
        event.respond(&format!("ack {text}")).await
    }
}

#[async_trait]
impl Service for ProbeService {
    async fn setup(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        journal_of(ctx.entry()).lock().push(format!("setup:{}", ctx.module_name()));
        if self.fail_setup {
            anyhow::bail!("setup refused");
        }
        if self.linger {
            let mark = DropMark(journal_of(ctx.entry()));
            ctx.spawn(async move {
                std::future::pending::<()>().await;
                drop(mark);
            });
        }
        Ok(())
    }

    fn handlers(self: Arc<Self>) -> Vec<HandlerSpec> {
        vec![HandlerSpec::new("probe", vec![Matcher::service("")], Self::handle)]
    }
}

fn probe_service(entry: &ModuleEntry, _: &BuildContext<'_>) -> anyhow::Result<Arc<dyn Service>> {
    Ok(Arc::new(ProbeService {
        fail_setup: flag(entry, "fail-setup"),
        linger: flag(entry, "linger"),
    }))
}

struct ProbeConnector {
    name: String,
    journal: Journal,
    fail: bool,
    greet: Option<String>,
}

#[async_trait]
impl Connector for ProbeConnector {
    async fn connect(&self) -> anyhow::Result<()> {
        self.journal.lock().push(format!("connect:{}", self.name));
        if self.fail {
            anyhow::bail!("transport unreachable");
        }
        Ok(())
    }

    async fn listen(&self, sink: EventSink, cancel: CancellationToken) -> anyhow::Result<()> {
        if let Some(text) = &self.greet {
            sink.emit(Event::message(text.as_str()).from_user("tester")).await?;
        }
        cancel.cancelled().await;
        Ok(())
    }

    async fn send(&self, message: &OutboundMessage) -> anyhow::Result<()> {
        self.journal
            .lock()
            .push(format!("send:{}:{}", self.name, message.text));
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.journal.lock().push(format!("disconnect:{}", self.name));
        Ok(())
    }
}

fn probe_connector(entry: &ModuleEntry, _: &BuildContext<'_>) -> anyhow::Result<Arc<dyn Connector>> {
    Ok(Arc::new(ProbeConnector {
        name: entry.name.clone(),
        journal: journal_of(entry),
        fail: flag(entry, "fail"),
        greet: entry.get("greet").and_then(Value::as_str).map(str::to_owned),
    }))
}

struct ProbeDatabase {
    name: String,
    journal: Journal,
    fail: bool,
    inner: MemoryDatabase,
}

#[async_trait]
impl Database for ProbeDatabase {
    async fn connect(&self) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("database unreachable");
        }
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.journal.lock().push(format!("db-disconnect:{}", self.name));
        Ok(())
    }

    async fn put(&self, collection: &str, key: &str, data: &Value) -> anyhow::Result<()> {
        self.inner.put(collection, key, data).await
    }

    async fn get(&self, collection: &str, key: &str) -> anyhow::Result<Option<Value>> {
        self.inner.get(collection, key).await
    }

    async fn get_keys(&self, collection: &str) -> anyhow::Result<Vec<String>> {
        self.inner.get_keys(collection).await
    }
}

fn probe_database(entry: &ModuleEntry, _: &BuildContext<'_>) -> anyhow::Result<Arc<dyn Database>> {
    Ok(Arc::new(ProbeDatabase {
        name: entry.name.clone(),
        journal: journal_of(entry),
        fail: flag(entry, "fail"),
        inner: MemoryDatabase::default(),
    }))
}

// --- fixtures ---

fn registry() -> ModuleRegistry {
    ModuleRegistry::builtin()
        .with_external(ModuleRegistration::service("probe-svc", probe_service))
        .with_external(ModuleRegistration::connector("probe", probe_connector))
        .with_external(ModuleRegistration::database("probe-db", probe_database))
}

fn app(unit: &str) -> AppConfig {
    AppConfig {
        unit: unit.to_owned(),
        web: WebConfig {
            enabled: false,
            ..WebConfig::default()
        },
        ..AppConfig::default()
    }
}

fn manager(unit: &str) -> ServiceManager {
    ServiceManager::with_slot(app(unit), registry(), RuntimeSlot::new())
}

fn probe(name: &str, module: &str, journal: &str) -> ModuleEntry {
    let mut entry = ModuleEntry::new(name).with("journal", journal);
    entry.module = Some(module.to_owned());
    entry
}

fn basic_config(journal: &str) -> UnitConfig {
    UnitConfig {
        services: vec![probe("svc", "probe-svc", journal)],
        connectors: vec![probe("conn", "probe", journal)],
        ..UnitConfig::default()
    }
}

async fn wait_for(journal: &Journal, entry: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if journal.lock().iter().any(|e| e == entry) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("journal never recorded '{entry}'"));
}

// --- fatal load conditions ---

#[tokio::test]
async fn empty_services_are_fatal() {
    let manager = manager("empty");
    let err = manager.load_with(UnitConfig::default()).await.unwrap_err();
    assert!(matches!(err, FatalError::NoServices));
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn unknown_services_are_fatal() {
    let id = new_journal();
    let mut config = basic_config(&id);
    config.services = vec![ModuleEntry::new("does-not-exist")];
    let err = manager("unknown").load_with(config).await.unwrap_err();
    assert!(matches!(err, FatalError::NoServices));
}

#[tokio::test]
async fn failed_setup_everywhere_leaves_no_handlers() {
    let id = new_journal();
    let mut config = basic_config(&id);
    config.services = vec![probe("svc", "probe-svc", &id).with("fail-setup", true)];
    let err = manager("setup").load_with(config).await.unwrap_err();
    assert!(matches!(err, FatalError::NoServiceHandlers));
    assert_eq!(*journal(&id).lock(), vec!["setup:svc".to_owned()]);
}

#[tokio::test]
async fn unreachable_databases_are_fatal() {
    let id = new_journal();
    let mut config = basic_config(&id);
    config.databases = vec![probe("db", "probe-db", &id).with("fail", true)];
    let err = manager("dbs").load_with(config).await.unwrap_err();
    assert!(matches!(err, FatalError::DatabasesUnavailable));
}

#[tokio::test]
async fn untrainable_language_engines_are_fatal() {
    let id = new_journal();
    let mut config = basic_config(&id);
    config.databases = vec![ModuleEntry::new("memory")];
    config.nlp = vec![ModuleEntry::new("keyword").with("skill-id", "nothing-stored")];
    let err = manager("nlp").load_with(config).await.unwrap_err();
    assert!(matches!(err, FatalError::LanguageEnginesUnavailable));
}

#[tokio::test]
async fn missing_connectors_are_fatal() {
    let id = new_journal();
    let mut config = basic_config(&id);
    config.connectors.clear();
    let err = manager("no-conn").load_with(config).await.unwrap_err();
    assert!(matches!(err, FatalError::NoConnectors));
}

#[tokio::test]
async fn connectors_that_never_connect_are_fatal() {
    let id = new_journal();
    let mut config = basic_config(&id);
    config.connectors = vec![probe("conn", "probe", &id).with("fail", true)];
    let err = manager("dead-conn").load_with(config).await.unwrap_err();
    assert!(matches!(err, FatalError::NoConnectors));
}

#[tokio::test]
async fn fatal_load_releases_what_was_activated() {
    let id = new_journal();
    let mut config = basic_config(&id);
    config.services = vec![probe("svc", "probe-svc", &id).with("linger", true)];
    config.databases = vec![probe("db", "probe-db", &id)];
    config.connectors = vec![probe("conn", "probe", &id).with("fail", true)];

    let slot = RuntimeSlot::new();
    let manager = ServiceManager::with_slot(app("leaky"), registry(), slot.clone());
    let err = manager.load_with(config).await.unwrap_err();
    assert!(matches!(err, FatalError::NoConnectors));

    let log = journal(&id);
    assert!(log.lock().iter().any(|e| e == "db-disconnect:db"));
    assert!(log.lock().iter().any(|e| e == "linger-dropped"));
    assert!(manager.shared().memory().is_empty());
    assert_eq!(manager.shared().pending_tasks(), 0);
    assert_eq!(manager.state(), RuntimeState::Stopped);
    assert!(!slot.is_occupied());
}

// --- happy path ---

#[tokio::test]
async fn partial_connector_failure_keeps_the_rest() {
    let id = new_journal();
    let mut config = basic_config(&id);
    config.connectors = vec![
        probe("broken", "probe", &id).with("fail", true),
        probe("good", "probe", &id),
    ];
    let manager = manager("partial");
    manager.load_with(config).await.unwrap();
    assert_eq!(manager.state(), RuntimeState::Loaded);
    assert_eq!(manager.shared().connector_names(), vec!["good".to_owned()]);
    manager.unload().await;
}

#[tokio::test]
async fn events_flow_then_unload_releases_in_order() {
    let id = new_journal();
    let log = journal(&id);
    let config = UnitConfig {
        services: vec![probe("svc", "probe-svc", &id).with("linger", true)],
        databases: vec![probe("db-a", "probe-db", &id), probe("db-b", "probe-db", &id)],
        connectors: vec![
            probe("conn-a", "probe", &id).with("greet", "hello"),
            probe("conn-b", "probe", &id),
        ],
        nlp: Vec::new(),
    };

    let slot = RuntimeSlot::new();
    let manager = Arc::new(ServiceManager::with_slot(app("flow"), registry(), slot.clone()));
    manager.load_with(config).await.unwrap();
    assert!(slot.is_occupied());
    assert_eq!(manager.shared().memory().names(), vec!["db-a", "db-b"]);

    let runner = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.run().await })
    };

    wait_for(&log, "send:conn-a:ack hello").await;
    assert!(log.lock().iter().any(|e| e == "handled:hello"));
    assert_eq!(manager.stats().messages_parsed, 1);
    assert_eq!(manager.stats().handler_errors, 0);

    assert!(manager.shared().pending_tasks() >= 1);

    manager.handle_signal();
    let status = runner.await.unwrap();
    assert_eq!(status, EXIT_OK);
    assert_eq!(manager.shared().pending_tasks(), 0);
    assert!(log.lock().iter().any(|e| e == "linger-dropped"));
    assert_eq!(manager.state(), RuntimeState::Stopped);
    assert!(!manager.is_running());
    assert!(!slot.is_occupied());

    let releases = |log: &Journal| -> Vec<String> {
        log.lock()
            .iter()
            .filter(|e| e.starts_with("disconnect:") || e.starts_with("db-disconnect:"))
            .cloned()
            .collect()
    };
    let expected = vec![
        "disconnect:conn-a".to_owned(),
        "disconnect:conn-b".to_owned(),
        "db-disconnect:db-a".to_owned(),
        "db-disconnect:db-b".to_owned(),
    ];
    assert_eq!(releases(&log), expected);
    assert!(manager.shared().connector_names().is_empty());
    assert!(manager.shared().memory().is_empty());
    assert_eq!(manager.shared().handler_count(), 0);

    // A second unload is a no-op.
    manager.unload().await;
    assert_eq!(releases(&log), expected);
}

#[tokio::test]
async fn second_run_returns_immediately() {
    let id = new_journal();
    let manager = Arc::new(manager("twice"));
    manager.load_with(basic_config(&id)).await.unwrap();

    let first = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.run().await })
    };
    tokio::time::timeout(Duration::from_secs(5), async {
        while manager.state() != RuntimeState::Running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(manager.is_running());

    let second = tokio::time::timeout(Duration::from_secs(1), manager.run()).await;
    assert_eq!(second.unwrap(), EXIT_OK);
    assert_eq!(manager.state(), RuntimeState::Running);

    manager.handle_signal();
    assert_eq!(first.await.unwrap(), EXIT_OK);
    assert_eq!(manager.state(), RuntimeState::Stopped);
}

// --- singleton ---

#[tokio::test]
async fn only_one_runtime_per_slot() {
    let id = new_journal();
    let slot = RuntimeSlot::new();
    let first = ServiceManager::with_slot(app("first"), registry(), slot.clone());
    let second = ServiceManager::with_slot(app("second"), registry(), slot.clone());

    first.load_with(basic_config(&id)).await.unwrap();
    let err = second.load_with(basic_config(&id)).await.unwrap_err();
    assert!(matches!(err, FatalError::AlreadyActive));
    assert_eq!(first.state(), RuntimeState::Loaded);
    assert_eq!(second.state(), RuntimeState::Uninitialized);

    first.unload().await;
    assert!(!slot.is_occupied());
    second.enter().unwrap();
    assert!(slot.is_occupied());
}
