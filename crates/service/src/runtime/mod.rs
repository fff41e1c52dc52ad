//! Container runtime seam.
//!
//! The rollout logic talks to hosts only through [`ContainerRuntime`]; the
//! production implementation drives the Docker CLI, locally or over ssh.

use std::fmt;

use async_trait::async_trait;

use crate::container::{ContainerSpec, ContainerState};
use crate::errors::DeployError;

pub mod docker;

pub use docker::DockerCli;

/// How to decide that a container is ready to serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessCheck {
    /// Running, and healthy if the image defines a HEALTHCHECK.
    Running { container: String },
    /// Command exits 0 inside the container.
    Exec { container: String, cmd: String },
    /// HTTP GET answers with a 2xx status.
    Http { url: String },
}

#[derive(Clone, PartialEq, Eq)]
pub struct RegistryLogin {
    pub server: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for RegistryLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryLogin")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogOptions {
    pub lines: Option<u32>,
    /// Stream to the terminal until interrupted instead of capturing.
    pub follow: bool,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Verify the runtime is reachable on `host`; returns its version.
    async fn check(&self, host: &str) -> Result<String, DeployError>;
    /// Authenticate against an image registry. Failures are fatal.
    async fn login(&self, host: &str, registry: &RegistryLogin) -> Result<(), DeployError>;
    /// Create host directories used as volumes.
    async fn prepare_dirs(&self, host: &str, dirs: &[String]) -> Result<(), DeployError>;
    async fn inspect(&self, host: &str, name: &str) -> Result<Option<ContainerState>, DeployError>;
    /// Pull the image and (re)create the container from `spec`.
    async fn start(&self, host: &str, spec: &ContainerSpec) -> Result<(), DeployError>;
    /// Stop and remove; returns whether a container existed.
    async fn remove(&self, host: &str, name: &str) -> Result<bool, DeployError>;
    async fn probe(&self, host: &str, check: &ReadinessCheck) -> Result<bool, DeployError>;
    async fn exec(&self, host: &str, container: &str, cmd: &str) -> Result<CommandOutput, DeployError>;
    async fn logs(&self, host: &str, container: &str, opts: &LogOptions) -> Result<CommandOutput, DeployError>;
}
