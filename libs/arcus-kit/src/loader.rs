//! Module loader: turns unit configuration entries into constructed module instances.

use std::sync::Arc;

use crate::config::ModuleEntry;
use crate::error::LoadError;
use crate::registry::{BuildContext, Category, ModuleInstance, ModuleRegistry};

/// Immutable description of one resolved configuration entry.
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    pub category: Category,
    /// Name declared in the configuration entry.
    pub name: String,
    pub config: Arc<ModuleEntry>,
    /// Canonical locator, `arcus.<category>.<module>`.
    pub locator: String,
    pub builtin: bool,
    /// Rust module path of the external registration, when not a built-in.
    pub entrypoint: Option<&'static str>,
}

/// A descriptor bound to its constructed instance.
#[derive(Clone)]
pub struct LoadedModule {
    pub descriptor: ModuleDescriptor,
    pub instance: ModuleInstance,
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

#[must_use]
pub fn locator(category: Category, module: &str) -> String {
    format!("arcus.{category}.{module}")
}

pub struct Loader<'a> {
    registry: &'a ModuleRegistry,
    ctx: BuildContext<'a>,
}

impl<'a> Loader<'a> {
    #[must_use]
    pub fn new(registry: &'a ModuleRegistry, ctx: BuildContext<'a>) -> Self {
        Self { registry, ctx }
    }

    /// Load every entry of one category, in order.
    ///
    /// Entries that fail to resolve or construct are logged and dropped; the rest of the batch
    /// still loads.
    #[must_use]
    pub fn load(&self, entries: &[ModuleEntry], category: Category) -> Vec<LoadedModule> {
        let mut loaded = Vec::with_capacity(entries.len());
        for entry in entries {
            match self.load_one(entry, category) {
                Ok(module) => {
                    tracing::debug!(
                        module = %module.descriptor.name,
                        locator = %module.descriptor.locator,
                        builtin = module.descriptor.builtin,
                        "Loaded {category}"
                    );
                    loaded.push(module);
                }
                Err(e) => {
                    tracing::error!(module = %entry.name, error = ?anyhow::Error::from(e), "Failed to load {category}");
                }
            }
        }
        loaded
    }

    /// Resolve and construct a single entry.
    ///
    /// # Errors
    /// `LoadError::Unknown` when no registration matches, `LoadError::Construct` when the
    /// constructor rejects the entry.
    pub fn load_one(&self, entry: &ModuleEntry, category: Category) -> Result<LoadedModule, LoadError> {
        let module = entry.module_name();
        let resolved = self
            .registry
            .resolve(category, module)
            .ok_or_else(|| LoadError::Unknown {
                category,
                name: module.to_owned(),
            })?;

        let instance = resolved
            .registration
            .constructor
            .build(entry, &self.ctx)
            .map_err(|source| LoadError::Construct {
                category,
                name: entry.name.clone(),
                source,
            })?;

        Ok(LoadedModule {
            descriptor: ModuleDescriptor {
                category,
                name: entry.name.clone(),
                config: Arc::new(entry.clone()),
                locator: locator(category, module),
                builtin: resolved.builtin,
                entrypoint: resolved.registration.origin,
            },
            instance,
        })
    }
}
