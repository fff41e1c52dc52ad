#![cfg(test)]
//! In-memory runtime and route registry used by the rollout tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use configs::DeployConfig;

use crate::container::{ContainerSpec, ContainerState};
use crate::errors::DeployError;
use crate::registry::RouteRegistry;
use crate::routing::{validate_routes, RouteEntry};
use crate::runtime::{CommandOutput, ContainerRuntime, LogOptions, ReadinessCheck, RegistryLogin};

pub fn descriptor(toml: &str) -> DeployConfig {
    configs::parse(toml).expect("valid test descriptor")
}

#[derive(Default)]
struct RuntimeState {
    containers: BTreeMap<(String, String), ContainerState>,
    events: Vec<String>,
    never_ready: BTreeSet<String>,
    probes: BTreeMap<String, u32>,
    fail_login: bool,
}

/// Records every call as `"<op> <host> <subject>"`.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    /// Probes of this container name or health URL never succeed.
    pub fn never_ready(&self, key: &str) {
        self.state.lock().unwrap().never_ready.insert(key.to_string());
    }

    pub fn fail_login(&self) {
        self.state.lock().unwrap().fail_login = true;
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    /// `"<host> <container>"` for each start, in order.
    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_prefix("start ").map(str::to_string))
            .collect()
    }

    pub fn probes(&self, key: &str) -> u32 {
        self.state.lock().unwrap().probes.get(key).copied().unwrap_or(0)
    }

    pub fn container(&self, host: &str, name: &str) -> Option<ContainerState> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(&(host.to_string(), name.to_string()))
            .cloned()
    }

    fn record(&self, event: String) {
        self.state.lock().unwrap().events.push(event);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn check(&self, host: &str) -> Result<String, DeployError> {
        self.record(format!("check {host}"));
        Ok("27.0.0-fake".into())
    }

    async fn login(&self, host: &str, registry: &RegistryLogin) -> Result<(), DeployError> {
        self.record(format!("login {host} {}", registry.server));
        if self.state.lock().unwrap().fail_login {
            return Err(DeployError::RegistryAuth {
                registry: registry.server.clone(),
                reason: "unauthorized".into(),
            });
        }
        Ok(())
    }

    async fn prepare_dirs(&self, host: &str, dirs: &[String]) -> Result<(), DeployError> {
        self.record(format!("dirs {host} {}", dirs.join(" ")));
        Ok(())
    }

    async fn inspect(&self, host: &str, name: &str) -> Result<Option<ContainerState>, DeployError> {
        Ok(self.container(host, name))
    }

    async fn start(&self, host: &str, spec: &ContainerSpec) -> Result<(), DeployError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("start {host} {}", spec.name));
        state.containers.insert(
            (host.to_string(), spec.name.clone()),
            ContainerState {
                name: spec.name.clone(),
                image: spec.image.clone(),
                running: true,
                status: "running".into(),
                fingerprint: Some(spec.fingerprint()),
                health: None,
            },
        );
        Ok(())
    }

    async fn remove(&self, host: &str, name: &str) -> Result<bool, DeployError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("remove {host} {name}"));
        Ok(state.containers.remove(&(host.to_string(), name.to_string())).is_some())
    }

    async fn probe(&self, host: &str, check: &ReadinessCheck) -> Result<bool, DeployError> {
        let key = match check {
            ReadinessCheck::Running { container } | ReadinessCheck::Exec { container, .. } => container.clone(),
            ReadinessCheck::Http { url } => url.clone(),
        };
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("probe {host} {key}"));
        *state.probes.entry(key.clone()).or_default() += 1;
        if state.never_ready.contains(&key) {
            return Ok(false);
        }
        Ok(match check {
            ReadinessCheck::Http { .. } => true,
            _ => state
                .containers
                .get(&(host.to_string(), key))
                .map_or(false, |c| c.running),
        })
    }

    async fn exec(&self, host: &str, container: &str, cmd: &str) -> Result<CommandOutput, DeployError> {
        self.record(format!("exec {host} {container} {cmd}"));
        if self.container(host, container).is_none() {
            return Ok(CommandOutput { status: 1, stderr: format!("No such container: {container}"), ..Default::default() });
        }
        Ok(CommandOutput { status: 0, stdout: format!("{cmd}\n"), ..Default::default() })
    }

    async fn logs(&self, host: &str, container: &str, opts: &LogOptions) -> Result<CommandOutput, DeployError> {
        self.record(format!("logs {host} {container}"));
        let n = opts.lines.unwrap_or(3);
        let stdout = (1..=n).map(|i| format!("{container} line {i}\n")).collect();
        Ok(CommandOutput { status: 0, stdout, ..Default::default() })
    }
}

/// Route registry applying the ingress's conflict rules in memory.
#[derive(Default)]
pub struct FakeRegistry {
    routes: Mutex<BTreeMap<String, BTreeMap<String, RouteEntry>>>,
    writes: Mutex<u32>,
}

impl FakeRegistry {
    pub fn seed(&self, ingress: &str, service: &str, entry: RouteEntry) {
        self.routes
            .lock()
            .unwrap()
            .entry(ingress.to_string())
            .or_default()
            .insert(service.to_string(), entry.normalized());
    }

    /// Number of registrations or removals that changed state.
    pub fn writes(&self) -> u32 {
        *self.writes.lock().unwrap()
    }

    pub fn route(&self, ingress: &str, service: &str) -> Option<RouteEntry> {
        self.routes.lock().unwrap().get(ingress).and_then(|m| m.get(service)).cloned()
    }
}

#[async_trait]
impl RouteRegistry for FakeRegistry {
    async fn routes(&self, ingress: &str) -> Result<Vec<(String, RouteEntry)>, DeployError> {
        Ok(self
            .routes
            .lock()
            .unwrap()
            .get(ingress)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn register(&self, ingress: &str, service: &str, entry: &RouteEntry) -> Result<bool, DeployError> {
        let entry = entry.clone().normalized();
        let mut all = self.routes.lock().unwrap();
        let table = all.entry(ingress.to_string()).or_default();
        validate_routes(table.iter().map(|(s, r)| (s.as_str(), r)).chain([(service, &entry)]))?;
        if table.get(service) == Some(&entry) {
            return Ok(false);
        }
        table.insert(service.to_string(), entry);
        *self.writes.lock().unwrap() += 1;
        Ok(true)
    }

    async fn deregister(&self, ingress: &str, service: &str) -> Result<bool, DeployError> {
        let removed = self
            .routes
            .lock()
            .unwrap()
            .get_mut(ingress)
            .and_then(|m| m.remove(service))
            .is_some();
        if removed {
            *self.writes.lock().unwrap() += 1;
        }
        Ok(removed)
    }
}
