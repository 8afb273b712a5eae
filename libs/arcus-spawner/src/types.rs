use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Network every spawned unit joins.
pub const DEFAULT_NETWORK: &str = "arcus";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Absent,
    Stopped,
    Running,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Absent => "absent",
            Self::Stopped => "stopped",
            Self::Running => "running",
        })
    }
}

/// Health reported by an image that declares a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Starting,
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub running: bool,
    /// `None` when the image has no health check.
    pub health: Option<HealthState>,
}

impl ContainerInfo {
    #[must_use]
    pub fn status(&self) -> ContainerStatus {
        if self.running {
            ContainerStatus::Running
        } else {
            ContainerStatus::Stopped
        }
    }

    /// Running, and healthy when a health check exists.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.running && matches!(self.health, None | Some(HealthState::Healthy))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretInfo {
    pub id: String,
    pub name: String,
}

fn default_mode() -> String {
    "rw".to_owned()
}

/// Host path or named volume mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeBinding {
    pub src: String,
    pub dst: String,
    #[serde(default = "default_mode")]
    pub mode: String,
}

impl VolumeBinding {
    pub fn new(src: impl Into<String>, dst: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            mode: default_mode(),
        }
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        "ro".clone_into(&mut self.mode);
        self
    }
}

impl fmt::Display for VolumeBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.src, self.dst, self.mode)
    }
}

/// Host port published for a container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub host: u16,
    pub container: u16,
}

impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}

/// Everything needed to create a unit's container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploySpec {
    pub name: String,
    pub image: String,
    pub command: Option<String>,
    pub env: BTreeMap<String, String>,
    pub volumes: Vec<VolumeBinding>,
    pub ports: Vec<PortBinding>,
}

impl DeploySpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            command: None,
            env: BTreeMap::new(),
            volumes: Vec::new(),
            ports: Vec::new(),
        }
    }

    #[must_use]
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn volume(mut self, binding: VolumeBinding) -> Self {
        self.volumes.push(binding);
        self
    }

    #[must_use]
    pub fn port(mut self, host: u16, container: u16) -> Self {
        self.ports.push(PortBinding { host, container });
        self
    }
}
