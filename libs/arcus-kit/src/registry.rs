//! Module registration.
//!
//! Every loadable module is described by a [`ModuleRegistration`]: its category, the name a unit
//! configuration refers to it by, and a typed constructor. Built-in modules come from a static
//! table; external crates submit theirs with [`submit_module!`](crate::submit_module) and are
//! collected through `inventory` at startup. External registrations win over built-ins of the same
//! category and name.

use std::fmt;
use std::sync::Arc;

use crate::bootstrap::AppConfig;
use crate::config::ModuleEntry;
use crate::contracts::{Connector, Database, LanguageEngine, Service};

/// Module category, as named by the unit configuration sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Service,
    Connector,
    Database,
    LanguageEngine,
}

impl Category {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Connector => "connector",
            Self::Database => "database",
            Self::LanguageEngine => "nlp",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a constructor may read while building a module instance.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub unit: &'a str,
    pub app: &'a AppConfig,
}

pub type ServiceCtor = fn(&ModuleEntry, &BuildContext<'_>) -> anyhow::Result<Arc<dyn Service>>;
pub type ConnectorCtor = fn(&ModuleEntry, &BuildContext<'_>) -> anyhow::Result<Arc<dyn Connector>>;
pub type DatabaseCtor = fn(&ModuleEntry, &BuildContext<'_>) -> anyhow::Result<Arc<dyn Database>>;
pub type LanguageEngineCtor =
    fn(&ModuleEntry, &BuildContext<'_>) -> anyhow::Result<Arc<dyn LanguageEngine>>;

/// Typed constructor; the variant fixes the module category.
#[derive(Clone, Copy)]
pub enum Constructor {
    Service(ServiceCtor),
    Connector(ConnectorCtor),
    Database(DatabaseCtor),
    LanguageEngine(LanguageEngineCtor),
}

/// A constructed module instance.
#[derive(Clone)]
pub enum ModuleInstance {
    Service(Arc<dyn Service>),
    Connector(Arc<dyn Connector>),
    Database(Arc<dyn Database>),
    LanguageEngine(Arc<dyn LanguageEngine>),
}

impl ModuleInstance {
    #[must_use]
    pub fn into_service(self) -> Option<Arc<dyn Service>> {
        match self {
            Self::Service(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_connector(self) -> Option<Arc<dyn Connector>> {
        match self {
            Self::Connector(c) => Some(c),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_database(self) -> Option<Arc<dyn Database>> {
        match self {
            Self::Database(d) => Some(d),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_language_engine(self) -> Option<Arc<dyn LanguageEngine>> {
        match self {
            Self::LanguageEngine(e) => Some(e),
            _ => None,
        }
    }
}

impl Constructor {
    #[must_use]
    pub const fn category(&self) -> Category {
        match self {
            Self::Service(_) => Category::Service,
            Self::Connector(_) => Category::Connector,
            Self::Database(_) => Category::Database,
            Self::LanguageEngine(_) => Category::LanguageEngine,
        }
    }

    /// Run the constructor.
    ///
    /// # Errors
    /// Whatever the module's constructor reports, typically invalid settings.
    pub fn build(&self, entry: &ModuleEntry, ctx: &BuildContext<'_>) -> anyhow::Result<ModuleInstance> {
        Ok(match self {
            Self::Service(f) => ModuleInstance::Service(f(entry, ctx)?),
            Self::Connector(f) => ModuleInstance::Connector(f(entry, ctx)?),
            Self::Database(f) => ModuleInstance::Database(f(entry, ctx)?),
            Self::LanguageEngine(f) => ModuleInstance::LanguageEngine(f(entry, ctx)?),
        })
    }
}

/// Registration descriptor a module hands to the runtime.
#[derive(Clone, Copy)]
pub struct ModuleRegistration {
    pub name: &'static str,
    pub constructor: Constructor,
    /// Rust module path of the crate that submitted the registration.
    pub origin: Option<&'static str>,
}

impl ModuleRegistration {
    #[must_use]
    pub const fn service(name: &'static str, ctor: ServiceCtor) -> Self {
        Self::new(name, Constructor::Service(ctor))
    }

    #[must_use]
    pub const fn connector(name: &'static str, ctor: ConnectorCtor) -> Self {
        Self::new(name, Constructor::Connector(ctor))
    }

    #[must_use]
    pub const fn database(name: &'static str, ctor: DatabaseCtor) -> Self {
        Self::new(name, Constructor::Database(ctor))
    }

    #[must_use]
    pub const fn language_engine(name: &'static str, ctor: LanguageEngineCtor) -> Self {
        Self::new(name, Constructor::LanguageEngine(ctor))
    }

    const fn new(name: &'static str, constructor: Constructor) -> Self {
        Self {
            name,
            constructor,
            origin: None,
        }
    }

    #[must_use]
    pub const fn with_origin(self, origin: &'static str) -> Self {
        Self {
            origin: Some(origin),
            ..self
        }
    }

    #[must_use]
    pub const fn category(&self) -> Category {
        self.constructor.category()
    }
}

impl fmt::Debug for ModuleRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistration")
            .field("name", &self.name)
            .field("category", &self.category())
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

inventory::collect!(ModuleRegistration);

/// Register an external module.
///
/// ```ignore
/// arcus_kit::submit_module!(ModuleRegistration::service("agent", AgentService::build));
/// ```
#[macro_export]
macro_rules! submit_module {
    ($registration:expr) => {
        $crate::inventory::submit! {
            $crate::registry::ModuleRegistration::with_origin($registration, ::core::module_path!())
        }
    };
}

/// Result of resolving a module reference.
#[derive(Debug, Clone, Copy)]
pub struct Resolved {
    pub registration: ModuleRegistration,
    pub builtin: bool,
}

/// Lookup table of every registration known to the process.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    external: Vec<ModuleRegistration>,
    builtin: Vec<ModuleRegistration>,
}

impl ModuleRegistry {
    /// Built-ins plus everything submitted through `inventory`.
    #[must_use]
    pub fn discover() -> Self {
        let external: Vec<ModuleRegistration> = inventory::iter::<ModuleRegistration>
            .into_iter()
            .copied()
            .collect();
        tracing::debug!(external = external.len(), "Discovered module registrations");
        Self {
            external,
            builtin: crate::builtin::REGISTRATIONS.to_vec(),
        }
    }

    /// Built-ins only; external registrations are added explicitly.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            external: Vec::new(),
            builtin: crate::builtin::REGISTRATIONS.to_vec(),
        }
    }

    #[must_use]
    pub fn with_external(mut self, registration: ModuleRegistration) -> Self {
        self.external.push(registration);
        self
    }

    /// Find the module `name` of `category`, preferring an external registration.
    #[must_use]
    pub fn resolve(&self, category: Category, name: &str) -> Option<Resolved> {
        let matches = |r: &&ModuleRegistration| r.category() == category && r.name == name;
        if let Some(registration) = self.external.iter().find(matches) {
            return Some(Resolved {
                registration: *registration,
                builtin: false,
            });
        }
        self.builtin.iter().find(matches).map(|registration| Resolved {
            registration: *registration,
            builtin: true,
        })
    }

    /// Names known for `category`, externals first.
    #[must_use]
    pub fn names(&self, category: Category) -> Vec<&'static str> {
        self.external
            .iter()
            .chain(&self.builtin)
            .filter(|r| r.category() == category)
            .map(|r| r.name)
            .collect()
    }
}
