//! The platform manifest: infrastructure units plus the agents to run on top of them.
//!
//! ```yaml
//! external-services:
//!   - name: broker
//!     image: broker:latest
//!     envvars:
//!       - PORT: 1234
//!     env:
//!       - BROKER_PORT: envvar:PORT
//!     ports:
//!       - 1883: 1234
//! agents:
//!   - name: abot
//!     language: en
//!     skills: [billing]
//! ```

use arcus_kit::ModuleEntry;
use arcus_spawner::{PortBinding, VolumeBinding};
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::ManifestError;

/// A scalar manifest value read as text, whatever YAML type it was written as.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Scalar(pub String);

impl Scalar {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ScalarVisitor;

        impl Visitor<'_> for ScalarVisitor {
            type Value = Scalar;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string, number or boolean")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Scalar, E> {
                Ok(Scalar(v.to_owned()))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Scalar, E> {
                Ok(Scalar(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Scalar, E> {
                Ok(Scalar(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Scalar, E> {
                Ok(Scalar(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Scalar, E> {
                Ok(Scalar(v.to_string()))
            }
        }

        deserializer.deserialize_any(ScalarVisitor)
    }
}

/// An infrastructure unit the platform needs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExternalService {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: Option<String>,
    /// Defaults, overridable from the operator's environment.
    #[serde(default)]
    pub envvars: Vec<BTreeMap<String, Scalar>>,
    /// What the container receives: literals or `envvar:<KEY>` references.
    #[serde(default)]
    pub env: Vec<BTreeMap<String, Scalar>>,
    #[serde(default)]
    pub volumes: Vec<VolumeBinding>,
    /// `{host port: container port}` pairs.
    #[serde(default)]
    pub ports: Vec<BTreeMap<u16, u16>>,
}

impl ExternalService {
    #[must_use]
    pub fn port_bindings(&self) -> Vec<PortBinding> {
        self.ports
            .iter()
            .flat_map(BTreeMap::iter)
            .map(|(host, container)| PortBinding {
                host: *host,
                container: *container,
            })
            .collect()
    }
}

fn default_language() -> String {
    "en".to_owned()
}

/// An agent unit and the skills it fronts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSpec {
    pub name: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub skills: Vec<String>,
    /// Connectors of the agent unit; a websocket connector named after the agent when absent.
    #[serde(default)]
    pub connectors: Option<Vec<ModuleEntry>>,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            language: default_language(),
            skills: Vec::new(),
            connectors: None,
        }
    }

    #[must_use]
    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills = skills.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Manifest {
    pub external_services: Vec<ExternalService>,
    pub agents: Vec<AgentSpec>,
}

impl Manifest {
    /// # Errors
    /// `ManifestError::Parse` for malformed YAML, `ManifestError::Structure` for unknown keys or
    /// wrongly typed fields.
    pub fn from_yaml(content: &str, origin: &str) -> Result<Self, ManifestError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: Value = serde_saphyr::from_str(content).map_err(|source| ManifestError::Parse {
            origin: origin.to_owned(),
            source,
        })?;
        if raw.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(raw).map_err(|source| ManifestError::Structure {
            origin: origin.to_owned(),
            source,
        })
    }

    /// # Errors
    /// Read and parse errors of the file at `path`.
    pub async fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ManifestError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_yaml(&content, &path.display().to_string())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    const PLATFORM: &str = r"
external-services:
  - name: broker
    image: broker:latest
    command: serve --verbose
    envvars:
      - PORT: 1234
      - DEBUG: false
    env:
      - BROKER_PORT: envvar:PORT
      - MODE: cluster
    volumes:
      - src: arcus-data
        dst: /data
        mode: ro
    ports:
      - 1883: 1234
  - name: database
    image: db:3
agents:
  - name: abot
    skills: [billing, weather]
";

    #[test]
    fn parses_platform_manifest() {
        let manifest = Manifest::from_yaml(PLATFORM, "platform.yml").unwrap();
        assert_eq!(manifest.external_services.len(), 2);

        let broker = &manifest.external_services[0];
        assert_eq!(broker.command.as_deref(), Some("serve --verbose"));
        assert_eq!(broker.envvars[0]["PORT"].as_str(), "1234");
        assert_eq!(broker.envvars[1]["DEBUG"].as_str(), "false");
        assert_eq!(broker.env[0]["BROKER_PORT"].as_str(), "envvar:PORT");
        assert_eq!(broker.volumes[0].mode, "ro");
        assert_eq!(
            broker.port_bindings(),
            vec![PortBinding {
                host: 1883,
                container: 1234
            }]
        );

        let database = &manifest.external_services[1];
        assert!(database.env.is_empty());
        assert!(database.port_bindings().is_empty());

        let abot = &manifest.agents[0];
        assert_eq!(abot.language, "en");
        assert_eq!(abot.skills, vec!["billing", "weather"]);
        assert_eq!(abot.connectors, None);
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = Manifest::from_yaml("external-services: []\nextras: 1\n", "bad.yml").unwrap_err();
        assert!(matches!(err, ManifestError::Structure { .. }));

        let err = Manifest::from_yaml("agents:\n  - name: a\n    colour: red\n", "bad.yml").unwrap_err();
        assert!(matches!(err, ManifestError::Structure { .. }));
    }

    #[test]
    fn empty_manifest_is_empty() {
        assert_eq!(Manifest::from_yaml("", "empty.yml").unwrap(), Manifest::default());
        assert_eq!(Manifest::from_yaml("~\n", "null.yml").unwrap(), Manifest::default());
    }
}
