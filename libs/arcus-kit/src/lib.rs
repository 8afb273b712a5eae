#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Arcus runtime core.
//!
//! A unit is one process running a [`ServiceManager`]: it reads the unit configuration, resolves
//! every declared module through the [`ModuleRegistry`], activates services, databases, language
//! engines and connectors, routes inbound events to service handlers and tears everything down in
//! a fixed order on shutdown.
//!
//! Modules outside this crate register themselves with [`submit_module!`]:
//!
//! ```ignore
//! use arcus_kit::registry::ModuleRegistration;
//!
//! arcus_kit::submit_module!(ModuleRegistration::service("agent", AgentService::build));
//! ```

pub use inventory;

pub mod blob;
pub mod bootstrap;
pub mod builtin;
pub mod config;
pub mod connector;
pub mod contracts;
pub mod error;
pub mod events;
pub mod humantime_serde;
pub mod loader;
pub mod memory;
pub mod registry;
pub mod runtime;
pub mod secret;
pub mod web;

pub use blob::{BlobStore, FsBlobStore, UNIT_CONFIG_KEY, unit_bucket};
pub use bootstrap::AppConfig;
pub use config::{ConfigError, ModuleEntry, UnitConfig};
pub use connector::{ConnectorInstance, ConnectorState, EventSink};
pub use contracts::{Connector, Database, HandlerSpec, LanguageEngine, Service};
pub use error::{EXIT_FATAL, EXIT_OK, FatalError, LoadError, MemoryError};
pub use events::{Event, EventKind, Matcher, OutboundMessage, Reply};
pub use memory::{DatabaseInstance, DbState, Memory};
pub use registry::{BuildContext, Category, ModuleRegistration, ModuleRegistry};
pub use runtime::{ModuleCtx, RuntimeSlot, RuntimeState, ServiceManager};
pub use secret::Secret;
