//! Scripted in-memory [`ContainerRuntime`] that records every mutating call.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

use crate::error::RuntimeApiError;
use crate::runtime::ContainerRuntime;
use crate::types::{ContainerInfo, DeploySpec, HealthState, SecretInfo};

#[derive(Debug, Default)]
struct State {
    containers: HashMap<String, ContainerInfo>,
    starting_for: HashMap<String, usize>,
    missing_images: HashSet<String>,
    rejected: HashSet<String>,
    created: Vec<(DeploySpec, String)>,
    started: Vec<String>,
    networks: Vec<String>,
    secrets: HashMap<String, SecretInfo>,
    next_id: usize,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn check(&self, name: &str) -> Result<(), RuntimeApiError> {
        if self.rejected.contains(name) {
            return Err(RuntimeApiError::Api(format!("request for '{name}' rejected")));
        }
        Ok(())
    }
}

/// Containers exist only in this struct. Created containers come up running.
#[derive(Debug, Default)]
pub struct RecordingRuntime {
    state: Mutex<State>,
}

impl RecordingRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_container(self, name: &str, image: &str, running: bool) -> Self {
        {
            let mut state = self.state.lock();
            let id = state.next_id("ctr");
            state.containers.insert(
                name.to_owned(),
                ContainerInfo {
                    id,
                    name: name.to_owned(),
                    image: image.to_owned(),
                    running,
                    health: None,
                },
            );
        }
        self
    }

    #[must_use]
    pub fn with_running(self, name: &str, image: &str) -> Self {
        self.with_container(name, image, true)
    }

    #[must_use]
    pub fn with_stopped(self, name: &str, image: &str) -> Self {
        self.with_container(name, image, false)
    }

    /// Report `name` as health-starting for its next `polls` inspections, healthy afterwards.
    #[must_use]
    pub fn with_starting_for(self, name: &str, polls: usize) -> Self {
        self.state.lock().starting_for.insert(name.to_owned(), polls);
        self
    }

    /// Creating a container from `image` fails with `ImageNotFound`.
    #[must_use]
    pub fn with_missing_image(self, image: &str) -> Self {
        self.state.lock().missing_images.insert(image.to_owned());
        self
    }

    /// Every call naming `name` fails with `Api`.
    #[must_use]
    pub fn with_rejected(self, name: &str) -> Self {
        self.state.lock().rejected.insert(name.to_owned());
        self
    }

    /// Stop a container, as if it exited.
    pub fn stop(&self, name: &str) {
        if let Some(c) = self.state.lock().containers.get_mut(name) {
            c.running = false;
        }
    }

    #[must_use]
    pub fn create_calls(&self) -> Vec<(DeploySpec, String)> {
        self.state.lock().created.clone()
    }

    #[must_use]
    pub fn create_count(&self) -> usize {
        self.state.lock().created.len()
    }

    #[must_use]
    pub fn start_calls(&self) -> Vec<String> {
        self.state.lock().started.clone()
    }

    #[must_use]
    pub fn start_count(&self) -> usize {
        self.state.lock().started.len()
    }

    #[must_use]
    pub fn networks(&self) -> Vec<String> {
        self.state.lock().networks.clone()
    }
}

#[async_trait]
impl ContainerRuntime for RecordingRuntime {
    async fn inspect(&self, name: &str) -> Result<ContainerInfo, RuntimeApiError> {
        let mut state = self.state.lock();
        state.check(name)?;
        let mut info = state
            .containers
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeApiError::NotFound(name.to_owned()))?;
        if let Some(remaining) = state.starting_for.get_mut(name) {
            if *remaining > 0 {
                *remaining -= 1;
                info.health = Some(HealthState::Starting);
            } else {
                info.health = Some(HealthState::Healthy);
            }
        }
        Ok(info)
    }

    async fn create(&self, spec: &DeploySpec, network: &str) -> Result<String, RuntimeApiError> {
        let mut state = self.state.lock();
        state.check(&spec.name)?;
        state.created.push((spec.clone(), network.to_owned()));
        if state.missing_images.contains(&spec.image) {
            return Err(RuntimeApiError::ImageNotFound(spec.image.clone()));
        }
        if state.containers.contains_key(&spec.name) {
            return Err(RuntimeApiError::Api(format!("name '{}' already in use", spec.name)));
        }
        let id = state.next_id("ctr");
        state.containers.insert(
            spec.name.clone(),
            ContainerInfo {
                id: id.clone(),
                name: spec.name.clone(),
                image: spec.image.clone(),
                running: true,
                health: None,
            },
        );
        Ok(id)
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeApiError> {
        let mut state = self.state.lock();
        state.check(name)?;
        state.started.push(name.to_owned());
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| RuntimeApiError::NotFound(name.to_owned()))?;
        container.running = true;
        Ok(())
    }

    async fn ensure_network(&self, network: &str) -> Result<(), RuntimeApiError> {
        let mut state = self.state.lock();
        if !state.networks.iter().any(|n| n == network) {
            state.networks.push(network.to_owned());
        }
        Ok(())
    }

    async fn secret(&self, name: &str) -> Result<SecretInfo, RuntimeApiError> {
        let state = self.state.lock();
        state.check(name)?;
        state
            .secrets
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeApiError::NotFound(name.to_owned()))
    }

    async fn create_secret(&self, name: &str, data: &[u8]) -> Result<String, RuntimeApiError> {
        let mut state = self.state.lock();
        state.check(name)?;
        if data.is_empty() {
            return Err(RuntimeApiError::Api("secret data is empty".to_owned()));
        }
        let id = state.next_id("sec");
        state.secrets.insert(
            name.to_owned(),
            SecretInfo {
                id: id.clone(),
                name: name.to_owned(),
            },
        );
        Ok(id)
    }
}
