//! Unit configuration: the `{services, databases, connectors, nlp}` document a unit loads at start.
//!
//! Entries are accepted either as a bare module name (`- dummy`) or as a mapping
//! `{name, module?, ...}`. Everything besides `name` and `module` is kept as the module's raw
//! settings and is only deserialised into a typed structure when the module is activated, so an
//! invalid section fails that one module instead of the whole document.

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// File name a unit looks for first inside its configuration directory.
pub const UNIT_CONFIG_FILE: &str = "config.yml";

/// Configuration error for unit config operations
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("no configuration found for unit '{unit}' (searched: {searched})")]
    NotFound { unit: String, searched: String },
    #[error("failed to read '{}'", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration from '{origin}'")]
    Parse {
        origin: String,
        #[source]
        source: serde_saphyr::Error,
    },
    #[error("configuration from '{origin}' has an invalid structure")]
    Structure {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid settings for module '{module}'")]
    InvalidSettings {
        module: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to render configuration: {0}")]
    Render(String),
    #[error("blob store error")]
    Blob(#[source] anyhow::Error),
}

/// One declared module: its name, an optional module override and its raw settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawModuleEntry")]
pub struct ModuleEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawModuleEntry {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        module: Option<String>,
        #[serde(flatten)]
        settings: Map<String, Value>,
    },
}

impl From<RawModuleEntry> for ModuleEntry {
    fn from(raw: RawModuleEntry) -> Self {
        match raw {
            RawModuleEntry::Name(name) => Self::new(name),
            RawModuleEntry::Full {
                name,
                module,
                settings,
            } => Self {
                name,
                module,
                settings,
            },
        }
    }
}

impl ModuleEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: None,
            settings: Map::new(),
        }
    }

    /// Add a settings field.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// The name used to resolve the module: `module` when given and non-empty, otherwise `name`.
    #[must_use]
    pub fn module_name(&self) -> &str {
        self.module
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.name)
    }

    /// Raw settings field by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    /// Deserialize the module settings into a typed structure.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidSettings` if the settings do not match `T`.
    pub fn settings<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        serde_json::from_value(Value::Object(self.settings.clone())).map_err(|source| {
            ConfigError::InvalidSettings {
                module: self.name.clone(),
                source,
            }
        })
    }
}

/// The per-unit configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitConfig {
    #[serde(default, deserialize_with = "nullable_list")]
    pub services: Vec<ModuleEntry>,
    #[serde(default, deserialize_with = "nullable_list")]
    pub databases: Vec<ModuleEntry>,
    #[serde(default, deserialize_with = "nullable_list")]
    pub connectors: Vec<ModuleEntry>,
    #[serde(default, deserialize_with = "nullable_list", skip_serializing_if = "Vec::is_empty")]
    pub nlp: Vec<ModuleEntry>,
}

fn nullable_list<'de, D>(deserializer: D) -> Result<Vec<ModuleEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<ModuleEntry>>::deserialize(deserializer)?.unwrap_or_default())
}

impl UnitConfig {
    /// Parse a YAML document. `origin` only labels errors.
    ///
    /// # Errors
    /// Returns `ConfigError::Parse` for malformed YAML and `ConfigError::Structure` when the
    /// document does not have the expected shape.
    pub fn from_yaml(content: &str, origin: &str) -> Result<Self, ConfigError> {
        // An empty document parses as null; treat it like an empty mapping.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: Value = serde_saphyr::from_str(content).map_err(|source| ConfigError::Parse {
            origin: origin.to_owned(),
            source,
        })?;
        if raw.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(raw).map_err(|source| ConfigError::Structure {
            origin: origin.to_owned(),
            source,
        })
    }

    /// Render as YAML.
    ///
    /// # Errors
    /// Returns `ConfigError::Render` if serialization fails.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_saphyr::to_string(self).map_err(|e| ConfigError::Render(e.to_string()))
    }

    /// Candidate files for `unit` inside `config_dir`, in lookup order.
    #[must_use]
    pub fn candidates(config_dir: &Path, unit: &str) -> Vec<PathBuf> {
        vec![
            config_dir.join(UNIT_CONFIG_FILE),
            config_dir.join(format!("{unit}.yml")),
        ]
    }

    /// Load the configuration of `unit` from `config_dir`.
    ///
    /// Looks for `config.yml` first and falls back to `<unit>.yml`.
    ///
    /// # Errors
    /// Returns `ConfigError::NotFound` when no candidate exists, or a read/parse error for the
    /// first candidate that does.
    pub fn load(config_dir: &Path, unit: &str) -> Result<(Self, PathBuf), ConfigError> {
        let candidates = Self::candidates(config_dir, unit);
        let Some(path) = candidates.iter().find(|p| p.is_file()) else {
            return Err(ConfigError::NotFound {
                unit: unit.to_owned(),
                searched: candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        };

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        tracing::info!(unit = %unit, path = %path.display(), "Loaded unit configuration");
        let config = Self::from_yaml(&content, &path.display().to_string())?;
        Ok((config, path.clone()))
    }
}
