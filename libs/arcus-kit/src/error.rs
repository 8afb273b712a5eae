use crate::config::ConfigError;

/// Exit status of a normal shutdown.
pub const EXIT_OK: i32 = 0;
/// Exit status after any fatal startup condition.
pub const EXIT_FATAL: i32 = 1;

/// Startup conditions that terminate the unit.
///
/// Everything else (a failing handler, a connector that will not disconnect, a module that does
/// not resolve) is logged and absorbed by the component that hit it.
#[derive(thiserror::Error, Debug)]
pub enum FatalError {
    #[error("a service manager is already active in this process")]
    AlreadyActive,
    #[error("unit configuration could not be loaded")]
    Config(#[from] ConfigError),
    #[error("no services in configuration, at least 1 required")]
    NoServices,
    #[error("no service handlers could be activated")]
    NoServiceHandlers,
    #[error("all configured databases failed to connect")]
    DatabasesUnavailable,
    #[error("all configured language engines failed to train")]
    LanguageEnginesUnavailable,
    #[error("all connectors failed to load")]
    NoConnectors,
}

impl FatalError {
    /// Process exit status for this condition.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::AlreadyActive
            | Self::Config(_)
            | Self::NoServices
            | Self::NoServiceHandlers
            | Self::DatabasesUnavailable
            | Self::LanguageEnginesUnavailable
            | Self::NoConnectors => EXIT_FATAL,
        }
    }
}

/// Per-module failure raised by the loader; logged and the module dropped.
#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("no {category} module named '{name}' is registered")]
    Unknown {
        category: crate::registry::Category,
        name: String,
    },
    #[error("failed to construct {category} module '{name}'")]
    Construct {
        category: crate::registry::Category,
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// A fan-out write that at least one backend rejected. All backends were attempted.
#[derive(thiserror::Error, Debug)]
pub enum MemoryError {
    #[error("write to '{collection}/{key}' failed on: {}", .failed.join(", "))]
    PartialWrite {
        collection: String,
        key: String,
        failed: Vec<String>,
    },
}
