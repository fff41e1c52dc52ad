use thiserror::Error;

/// Failures of rollout operations.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("secrets file error: {0}")]
    Secrets(String),
    #[error("secret `{name}` is declared but missing from the secrets file")]
    MissingSecret { name: String },
    #[error("route conflict on {host}{}: `{first}` and `{second}` overlap", .prefix.as_deref().unwrap_or(""))]
    RouteConflict {
        host: String,
        prefix: Option<String>,
        first: String,
        second: String,
    },
    #[error("service `{service}` depends on undeclared accessory `{accessory}`")]
    UnknownAccessory { service: String, accessory: String },
    #[error("accessory `{accessory}` for `{service}` not ready after {attempts} attempts")]
    DependencyTimeout {
        service: String,
        accessory: String,
        attempts: u32,
    },
    #[error("service `{service}` on {host} failed its health check after {attempts} attempts")]
    Unhealthy {
        service: String,
        host: String,
        attempts: u32,
    },
    #[error("registry login to {registry} failed: {reason}")]
    RegistryAuth { registry: String, reason: String },
    #[error("runtime error on {host}: {reason}")]
    Runtime { host: String, reason: String },
    #[error("target `{target}` is locked by {holder} since {since}")]
    LockHeld {
        target: String,
        holder: String,
        since: String,
    },
    #[error("ingress registry error: {0}")]
    Registry(String),
    #[error("store error: {0}")]
    Store(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DeployError {
    pub fn runtime(host: &str, reason: impl Into<String>) -> Self {
        Self::Runtime { host: host.to_string(), reason: reason.into() }
    }

    /// Stable numeric code for external mapping/logging
    pub fn code(&self) -> u16 {
        match self {
            DeployError::Config(_) => 1001,
            DeployError::Secrets(_) => 1002,
            DeployError::MissingSecret { .. } => 1003,
            DeployError::RouteConflict { .. } => 1004,
            DeployError::UnknownAccessory { .. } => 1005,
            DeployError::DependencyTimeout { .. } => 1101,
            DeployError::Unhealthy { .. } => 1102,
            DeployError::RegistryAuth { .. } => 1103,
            DeployError::Runtime { .. } => 1104,
            DeployError::LockHeld { .. } => 1201,
            DeployError::Registry(_) => 1202,
            DeployError::Store(_) => 1203,
            DeployError::Io(_) => 1204,
        }
    }
}
