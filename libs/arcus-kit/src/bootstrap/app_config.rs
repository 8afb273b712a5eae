//! Process-level configuration.
//!
//! Layers, lowest priority first:
//! 1. serde defaults
//! 2. YAML file (`--config`), if given
//! 3. `ARCUS__*` environment (`__` separates nesting, e.g. `ARCUS__WEB__BIND`)
//! 4. the flat variables units are started with (`ARCUS_SERVICE`, `MQTT_HOST`, ...)

use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use figment::value::Uncased;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::secret::Secret;

/// Default unit name when `ARCUS_SERVICE` is not set.
pub const DEFAULT_UNIT: &str = "dummy";
/// Default credential used across the platform images.
pub const DEFAULT_CREDENTIAL: &str = "arcusarcus";

/// Flat environment variables and the config path each one feeds.
const UNIT_ENV: &[(&str, &str)] = &[
    ("ARCUS_SERVICE", "unit"),
    ("ARCUS_CONFIG_DIR", "config_dir"),
    ("ARANGO_ROOT_PASSWORD", "credentials.database_password"),
    ("MINIO_ACCESS_KEY", "credentials.blob_access_key"),
    ("MINIO_SECRET_KEY", "credentials.blob_secret_key"),
    ("MQTT_HOST", "transport.host"),
    ("MQTT_USER", "transport.user"),
    ("MQTT_PASSWORD", "transport.password"),
];

/// Where a unit reads its unit configuration from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    #[default]
    File,
    Blob,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base filter directive; `RUST_LOG` overrides it when set.
    pub level: String,
    pub format: LogFormat,
    pub ansi: bool,
    /// Extra filter directives, e.g. `hyper=warn`.
    pub directives: Vec<String>,
    /// Write to daily-rotated files in this directory instead of stderr.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Text,
            ansi: true,
            directives: Vec::new(),
            directory: None,
        }
    }
}

/// Auxiliary HTTP surface of a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub bind: String,
    /// How long a webhook call waits for its handler's reply.
    #[serde(with = "crate::humantime_serde")]
    pub reply_timeout: Duration,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:8080".to_owned(),
            reply_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub database_password: Secret,
    pub blob_access_key: Secret,
    pub blob_secret_key: Secret,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            database_password: Secret::new(DEFAULT_CREDENTIAL),
            blob_access_key: Secret::new(DEFAULT_CREDENTIAL),
            blob_secret_key: Secret::new(DEFAULT_CREDENTIAL),
        }
    }
}

/// Message transport the unit's connectors talk to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "mqtt".to_owned(),
            port: 8000,
            user: "arcus".to_owned(),
            password: Secret::new(DEFAULT_CREDENTIAL),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Unit identity; selects the unit configuration to load.
    pub unit: String,
    pub config_dir: PathBuf,
    pub config_source: ConfigSource,
    /// Root of the filesystem blob store used when `config_source` is `blob`.
    pub blob_root: PathBuf,
    pub logging: LoggingConfig,
    pub web: WebConfig,
    /// Period of the stats heartbeat task; disabled when unset.
    #[serde(with = "crate::humantime_serde::option")]
    pub heartbeat_interval: Option<Duration>,
    pub credentials: Credentials,
    pub transport: TransportConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            unit: DEFAULT_UNIT.to_owned(),
            config_dir: PathBuf::from("/opt/arcus/conf"),
            config_source: ConfigSource::File,
            blob_root: PathBuf::from("/opt/arcus/blobs"),
            logging: LoggingConfig::default(),
            web: WebConfig::default(),
            heartbeat_interval: None,
            credentials: Credentials::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl AppConfig {
    /// Build the layered figment. Other crates extract their own sections from it.
    #[must_use]
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment
            .merge(Env::prefixed("ARCUS__").split("__"))
            .merge(Env::raw().filter_map(|key| {
                UNIT_ENV
                    .iter()
                    .find(|(var, _)| key == *var)
                    .map(|(_, path)| Uncased::from(*path))
            }))
    }

    /// Load the layered configuration.
    ///
    /// # Errors
    /// Returns an error if the file is unreadable or a layer has an invalid value.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        Self::from_figment(&Self::figment(path))
    }

    /// # Errors
    /// Returns an error if the figment cannot be extracted into `AppConfig`.
    pub fn from_figment(figment: &Figment) -> anyhow::Result<Self> {
        figment
            .extract()
            .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))
    }

    /// Raise the log level from `-v` flags (`-v` info, `-vv` debug, `-vvv` trace).
    pub fn apply_verbosity(&mut self, verbose: u8) {
        let level = match verbose {
            0 => return,
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        level.clone_into(&mut self.logging.level);
    }

    /// Render the effective configuration with secrets redacted.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        serde_saphyr::to_string(self).map_err(|e| anyhow::anyhow!("failed to render config: {e}"))
    }
}
