//! [`ContainerRuntime`] backed by the `docker` command line client.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::RuntimeApiError;
use crate::runtime::ContainerRuntime;
use crate::types::{ContainerInfo, DeploySpec, HealthState, SecretInfo};

/// Substrings (lowercase) the docker CLI prints when an image cannot be resolved.
const IMAGE_MISSING: &[&str] = &[
    "unable to find image",
    "pull access denied",
    "manifest unknown",
    "repository does not exist",
    "no such image",
];

#[derive(Debug, Clone)]
pub struct DockerCliRuntime {
    program: PathBuf,
    timeout: Duration,
}

impl Default for DockerCliRuntime {
    fn default() -> Self {
        Self {
            program: PathBuf::from("docker"),
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedContainer {
    id: String,
    name: String,
    state: InspectedState,
    config: InspectedConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedState {
    running: bool,
    #[serde(default)]
    health: Option<InspectedHealth>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedHealth {
    status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedConfig {
    image: String,
}

#[derive(Deserialize)]
struct InspectedSecret {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Spec")]
    spec: InspectedSecretSpec,
}

#[derive(Deserialize)]
struct InspectedSecretSpec {
    #[serde(rename = "Name")]
    name: String,
}

impl DockerCliRuntime {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn exec(&self, args: &[String], input: Option<&[u8]>) -> Result<Output, RuntimeApiError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        tracing::trace!(program = %self.program.display(), args = ?args, "Invoking container runtime");

        let mut child = cmd.spawn()?;
        if let (Some(data), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(data).await?;
        }
        let verb = args.first().map_or("", String::as_str);
        tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| RuntimeApiError::Api(format!("docker {verb} timed out")))?
            .map_err(RuntimeApiError::from)
    }

    async fn run(&self, args: &[String], subject: &str, image: Option<&str>) -> Result<String, RuntimeApiError> {
        let output = self.exec(args, None).await?;
        checked(&output, subject, image)
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| (*a).to_owned()).collect()
}

fn checked(output: &Output, subject: &str, image: Option<&str>) -> Result<String, RuntimeApiError> {
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned());
    }
    Err(classify(&String::from_utf8_lossy(&output.stderr), subject, image))
}

/// Map CLI stderr onto the runtime error kinds.
fn classify(stderr: &str, subject: &str, image: Option<&str>) -> RuntimeApiError {
    let message = stderr.trim();
    let lower = message.to_ascii_lowercase();
    if let Some(image) = image
        && IMAGE_MISSING.iter().any(|m| lower.contains(m))
    {
        return RuntimeApiError::ImageNotFound(image.to_owned());
    }
    if lower.contains("no such") || lower.contains("not found") {
        return RuntimeApiError::NotFound(subject.to_owned());
    }
    RuntimeApiError::Api(message.to_owned())
}

fn run_args(spec: &DeploySpec, network: &str) -> Vec<String> {
    let mut args = strings(&["run", "-d", "--name", spec.name.as_str(), "--network", network]);
    for (key, value) in &spec.env {
        args.push("-e".to_owned());
        args.push(format!("{key}={value}"));
    }
    for volume in &spec.volumes {
        args.push("-v".to_owned());
        args.push(volume.to_string());
    }
    for port in &spec.ports {
        args.push("-p".to_owned());
        args.push(port.to_string());
    }
    args.push(spec.image.clone());
    if let Some(command) = &spec.command {
        args.extend(command.split_whitespace().map(str::to_owned));
    }
    args
}

fn parse_health(status: &str) -> Option<HealthState> {
    match status {
        "healthy" => Some(HealthState::Healthy),
        "unhealthy" => Some(HealthState::Unhealthy),
        "starting" => Some(HealthState::Starting),
        _ => None,
    }
}

fn parse_inspect(raw: &str, subject: &str) -> Result<ContainerInfo, RuntimeApiError> {
    let mut found: Vec<InspectedContainer> = serde_json::from_str(raw)
        .map_err(|e| RuntimeApiError::Api(format!("unreadable inspect output: {e}")))?;
    let Some(container) = found.pop() else {
        return Err(RuntimeApiError::NotFound(subject.to_owned()));
    };
    Ok(ContainerInfo {
        id: container.id,
        name: container.name.trim_start_matches('/').to_owned(),
        image: container.config.image,
        running: container.state.running,
        health: container
            .state
            .health
            .and_then(|h| parse_health(&h.status)),
    })
}

#[async_trait]
impl ContainerRuntime for DockerCliRuntime {
    async fn inspect(&self, name: &str) -> Result<ContainerInfo, RuntimeApiError> {
        let raw = self
            .run(&strings(&["container", "inspect", name]), name, None)
            .await?;
        parse_inspect(&raw, name)
    }

    async fn create(&self, spec: &DeploySpec, network: &str) -> Result<String, RuntimeApiError> {
        self.run(&run_args(spec, network), &spec.name, Some(&spec.image))
            .await
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeApiError> {
        self.run(&strings(&["start", name]), name, None).await?;
        Ok(())
    }

    async fn ensure_network(&self, network: &str) -> Result<(), RuntimeApiError> {
        match self
            .run(&strings(&["network", "inspect", network]), network, None)
            .await
        {
            Ok(_) => Ok(()),
            Err(RuntimeApiError::NotFound(_)) => {
                tracing::info!(network, "Creating container network");
                self.run(&strings(&["network", "create", network]), network, None)
                    .await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn secret(&self, name: &str) -> Result<SecretInfo, RuntimeApiError> {
        let raw = self
            .run(&strings(&["secret", "inspect", name]), name, None)
            .await?;
        let mut found: Vec<InspectedSecret> = serde_json::from_str(&raw)
            .map_err(|e| RuntimeApiError::Api(format!("unreadable secret output: {e}")))?;
        let secret = found
            .pop()
            .ok_or_else(|| RuntimeApiError::NotFound(name.to_owned()))?;
        Ok(SecretInfo {
            id: secret.id,
            name: secret.spec.name,
        })
    }

    async fn create_secret(&self, name: &str, data: &[u8]) -> Result<String, RuntimeApiError> {
        let output = self
            .exec(&strings(&["secret", "create", name, "-"]), Some(data))
            .await?;
        checked(&output, name, None)
    }
}
