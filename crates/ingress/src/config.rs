use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const CONFIG_ENV: &str = "INGRESS_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "ingress.json";
pub const ADMIN_TOKEN_ENV: &str = "INGRESS_ADMIN_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngressConfig {
    /// Public listener for proxied traffic.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Admin API: route registration, health, metrics.
    #[serde(default = "default_admin_listen")]
    pub admin_listen: String,
    /// JSON file holding registered routes.
    #[serde(default = "default_routes_path")]
    pub routes_path: String,
    #[serde(default)]
    pub timeout: TimeoutConfig,
    /// Bearer token for route changes; `INGRESS_ADMIN_TOKEN` takes precedence.
    #[serde(default, skip_serializing)]
    pub admin_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutConfig {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { connect_timeout_secs: 5, read_timeout_secs: 60 }
    }
}

fn default_listen() -> String { "0.0.0.0:80".to_string() }
fn default_admin_listen() -> String { "0.0.0.0:9188".to_string() }
fn default_routes_path() -> String { "ingress-routes.json".to_string() }

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            admin_listen: default_admin_listen(),
            routes_path: default_routes_path(),
            timeout: TimeoutConfig::default(),
            admin_token: None,
        }
    }
}

impl IngressConfig {
    pub fn load_from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: IngressConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Path from `INGRESS_CONFIG`, else `ingress.json`.
    pub fn path_from_env() -> String {
        common::env::non_empty_var(CONFIG_ENV).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
    }

    pub fn admin_token(&self) -> Option<String> {
        common::env::non_empty_var(ADMIN_TOKEN_ENV)
            .or_else(|| self.admin_token.clone())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.read_timeout_secs)
    }
}
