use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_ENV: &str = "DEPLOY_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/deploy.toml";
/// Searched for `deploy.*.toml` when `DEFAULT_CONFIG_PATH` is absent.
pub const DEFAULT_CONFIG_DIR: &str = "config";
pub const DEFAULT_TARGET: &str = "production";
pub const DEFAULT_INGRESS_ADMIN_PORT: u16 = 9188;
/// Public port the ingress listens on; no app may publish it on the ingress host.
pub const DEFAULT_INGRESS_HTTP_PORT: u16 = 80;
pub const DEFAULT_APP_PORT: u16 = 3000;

/// One service's deployment descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeployConfig {
    pub service: String,
    pub image: String,
    pub servers: Vec<String>,
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default = "default_target")]
    pub target: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub registry: Option<RegistryConfig>,
    #[serde(default)]
    pub env: EnvConfig,
    #[serde(default)]
    pub accessories: BTreeMap<String, AccessoryConfig>,
    #[serde(default)]
    pub readiness: PollConfig,
    #[serde(default)]
    pub health: PollConfig,
}

/// Routing rule registered on the shared ingress.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxyConfig {
    pub host: String,
    #[serde(default)]
    pub path_prefix: Option<String>,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default = "default_app_port")]
    pub app_port: u16,
    #[serde(default = "default_healthcheck_path")]
    pub healthcheck_path: String,
    #[serde(default)]
    pub strip_prefix: bool,
    /// Admin URL of the ingress, e.g. `http://10.0.0.5:9188`.
    #[serde(default)]
    pub ingress: Option<String>,
    /// Name of the secret holding the ingress admin token.
    #[serde(default)]
    pub ingress_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistryConfig {
    pub server: String,
    pub username: String,
    /// Name of the secret holding the registry password.
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EnvConfig {
    #[serde(default)]
    pub clear: BTreeMap<String, String>,
    #[serde(default)]
    pub secret: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessoryConfig {
    pub image: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub env: EnvConfig,
    /// `"<host-subdir>:<container-path>"` pairs.
    #[serde(default)]
    pub directories: Vec<String>,
    /// Command run inside the container; exit status 0 means ready.
    #[serde(default)]
    pub ready_cmd: Option<String>,
}

/// Bounded polling: `max_attempts` probes spaced by a fixed interval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PollConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { max_attempts: default_max_attempts(), interval_secs: default_interval_secs() }
    }
}

fn default_target() -> String { DEFAULT_TARGET.to_string() }
fn default_app_port() -> u16 { DEFAULT_APP_PORT }
fn default_healthcheck_path() -> String { "/up".to_string() }
fn default_max_attempts() -> u32 { 30 }
fn default_interval_secs() -> u64 { 2 }

/// Descriptor paths from `DEPLOY_CONFIG` (comma separated), else [`default_config_paths`] under `.`.
pub fn config_paths_from_env() -> Vec<String> {
    match std::env::var(CONFIG_ENV) {
        Ok(v) if !v.trim().is_empty() => v
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        _ => default_config_paths(std::path::Path::new(".")),
    }
}

/// `config/deploy.toml` if it exists, otherwise every `config/deploy.*.toml`
/// sorted by file name. Falls back to `config/deploy.toml` so the error names it.
pub fn default_config_paths(root: &std::path::Path) -> Vec<String> {
    let single = root.join(DEFAULT_CONFIG_PATH);
    if single.is_file() {
        return vec![single.display().to_string()];
    }
    let mut found: Vec<std::path::PathBuf> = std::fs::read_dir(root.join(DEFAULT_CONFIG_DIR))
        .map(|entries| {
            entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| {
                    p.is_file()
                        && p.file_name().and_then(|n| n.to_str()).is_some_and(|n| {
                            n.starts_with("deploy.") && n.ends_with(".toml") && n.len() > "deploy..toml".len()
                        })
                })
                .collect()
        })
        .unwrap_or_default();
    if found.is_empty() {
        return vec![single.display().to_string()];
    }
    found.sort();
    found.into_iter().map(|p| p.display().to_string()).collect()
}

pub fn load_from_file(path: &str) -> Result<DeployConfig> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    parse(&content).with_context(|| format!("invalid descriptor {path}"))
}

/// Parse, normalize and validate a descriptor from TOML text.
pub fn parse(content: &str) -> Result<DeployConfig> {
    let mut cfg: DeployConfig = toml::from_str(content)?;
    cfg.normalize_and_validate()?;
    Ok(cfg)
}

/// Load several descriptors, preserving the given order; service names must be unique.
pub fn load_many<S: AsRef<str>>(paths: &[S]) -> Result<Vec<DeployConfig>> {
    let mut out: Vec<DeployConfig> = Vec::with_capacity(paths.len());
    for path in paths {
        let cfg = load_from_file(path.as_ref())?;
        if out.iter().any(|c| c.service == cfg.service) {
            return Err(anyhow!("service `{}` is declared more than once", cfg.service));
        }
        out.push(cfg);
    }
    Ok(out)
}

/// Normalize a path prefix: leading `/`, no trailing `/`; empty or `/` means no prefix.
pub fn normalize_path_prefix(prefix: Option<&str>) -> Option<String> {
    let p = prefix?.trim().trim_end_matches('/');
    if p.is_empty() {
        return None;
    }
    if p.starts_with('/') {
        Some(p.to_string())
    } else {
        Some(format!("/{p}"))
    }
}

fn validate_name(kind: &str, name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-');
    if ok {
        Ok(())
    } else {
        Err(anyhow!("{kind} name `{name}` must match [a-z0-9-]+ and not start with '-'"))
    }
}

fn validate_env_key(key: &str) -> Result<()> {
    let ok = !key.is_empty()
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !key.starts_with(|c: char| c.is_ascii_digit());
    if ok { Ok(()) } else { Err(anyhow!("invalid environment variable name `{key}`")) }
}

impl DeployConfig {
    pub fn normalize_and_validate(&mut self) -> Result<()> {
        self.service = self.service.trim().to_string();
        validate_name("service", &self.service)?;

        self.image = self.image.trim().to_string();
        if self.image.is_empty() {
            return Err(anyhow!("image must not be empty"));
        }

        self.servers = self
            .servers
            .iter()
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        if self.servers.is_empty() {
            return Err(anyhow!("servers must list at least one host"));
        }

        self.target = self.target.trim().to_string();
        if self.target.is_empty() {
            self.target = default_target();
        }
        validate_name("target", &self.target)?;

        self.cmd = self.cmd.take().map(|c| c.trim().to_string()).filter(|c| !c.is_empty());

        let first_server = self.servers[0].clone();
        self.proxy.normalize(&first_server)?;
        self.env.validate()?;

        if let Some(registry) = &mut self.registry {
            registry.server = registry.server.trim().to_string();
            registry.username = registry.username.trim().to_string();
            registry.password = registry.password.trim().to_string();
            if registry.server.is_empty() || registry.username.is_empty() {
                return Err(anyhow!("registry.server and registry.username are required"));
            }
            validate_env_key(&registry.password)
                .map_err(|_| anyhow!("registry.password must name a secret, got `{}`", registry.password))?;
        }

        for (name, acc) in self.accessories.iter_mut() {
            validate_name("accessory", name)?;
            if name == &self.service {
                return Err(anyhow!("accessory `{name}` has the same name as the service"));
            }
            acc.normalize().with_context(|| format!("accessories.{name}"))?;
        }

        for dep in &self.depends_on {
            validate_name("accessory", dep)?;
        }

        for poll in [&self.readiness, &self.health] {
            if poll.max_attempts == 0 {
                return Err(anyhow!("max_attempts must be >= 1"));
            }
        }
        Ok(())
    }

    /// Every secret name this descriptor needs resolved: app env, registry password, accessory env.
    pub fn secret_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.env.secret.clone();
        if let Some(registry) = &self.registry {
            names.push(registry.password.clone());
        }
        if let Some(token) = &self.proxy.ingress_token {
            names.push(token.clone());
        }
        for acc in self.accessories.values() {
            names.extend(acc.env.secret.iter().cloned());
        }
        names.sort();
        names.dedup();
        names
    }

    pub fn ingress_url(&self) -> &str {
        self.proxy.ingress.as_deref().unwrap_or_default()
    }

    /// Host and admin port of the ingress URL.
    pub fn ingress_addr(&self) -> Option<(String, u16)> {
        let url = self.ingress_url();
        let (rest, default_port) = match url.strip_prefix("https://") {
            Some(rest) => (rest, 443),
            None => (url.strip_prefix("http://")?, 80),
        };
        let authority = rest.split('/').next()?;
        if let Some(v6) = authority.strip_prefix('[') {
            let (host, tail) = v6.split_once(']')?;
            let port = match tail.strip_prefix(':') {
                Some(p) => p.parse().ok()?,
                None => default_port,
            };
            return Some((host.to_ascii_lowercase(), port));
        }
        match authority.rsplit_once(':') {
            Some((host, port)) => Some((host.to_ascii_lowercase(), port.parse().ok()?)),
            None => Some((authority.to_ascii_lowercase(), default_port)),
        }
    }
}

impl ProxyConfig {
    fn normalize(&mut self, first_server: &str) -> Result<()> {
        self.host = self.host.trim().trim_end_matches('.').to_ascii_lowercase();
        if self.host.is_empty() {
            return Err(anyhow!("proxy.host must not be empty"));
        }
        if self.host.contains('/') || self.host.contains(':') {
            return Err(anyhow!("proxy.host `{}` must be a bare host name", self.host));
        }
        self.path_prefix = normalize_path_prefix(self.path_prefix.as_deref());
        if self.app_port == 0 {
            return Err(anyhow!("proxy.app_port must be in 1..=65535"));
        }
        if !self.healthcheck_path.starts_with('/') {
            self.healthcheck_path = format!("/{}", self.healthcheck_path);
        }
        if self.strip_prefix && self.path_prefix.is_none() {
            // 无前缀时 strip_prefix 没有意义
            self.strip_prefix = false;
        }
        let ingress = self
            .ingress
            .take()
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| format!("http://{first_server}:{DEFAULT_INGRESS_ADMIN_PORT}"));
        if !(ingress.starts_with("http://") || ingress.starts_with("https://")) {
            return Err(anyhow!("proxy.ingress must start with http:// or https://"));
        }
        self.ingress = Some(ingress);
        self.ingress_token = self.ingress_token.take().map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        if let Some(token) = &self.ingress_token {
            validate_env_key(token)
                .map_err(|_| anyhow!("proxy.ingress_token must name a secret, got `{token}`"))?;
        }
        Ok(())
    }
}

impl EnvConfig {
    fn validate(&self) -> Result<()> {
        for key in self.clear.keys().chain(self.secret.iter()) {
            validate_env_key(key)?;
        }
        if let Some(dup) = self.secret.iter().find(|k| self.clear.contains_key(*k)) {
            return Err(anyhow!("`{dup}` is declared both clear and secret"));
        }
        Ok(())
    }
}

impl AccessoryConfig {
    fn normalize(&mut self) -> Result<()> {
        self.image = self.image.trim().to_string();
        if self.image.is_empty() {
            return Err(anyhow!("image must not be empty"));
        }
        self.host = self.host.trim().to_ascii_lowercase();
        if self.host.is_empty() {
            return Err(anyhow!("host must not be empty"));
        }
        self.cmd = self.cmd.take().map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
        self.ready_cmd = self.ready_cmd.take().map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
        self.env.validate()?;
        self.volumes()?;
        Ok(())
    }

    /// Parsed `directories` as `(host_subdir, container_path)`.
    pub fn volumes(&self) -> Result<Vec<(String, String)>> {
        self.directories
            .iter()
            .map(|d| {
                let (host, container) = d
                    .split_once(':')
                    .ok_or_else(|| anyhow!("directory `{d}` must be <host-subdir>:<container-path>"))?;
                let host = host.trim().trim_matches('/');
                let container = container.trim();
                if host.is_empty() || host.split('/').any(|seg| seg == "..") {
                    return Err(anyhow!("directory `{d}` has an invalid host part"));
                }
                if !container.starts_with('/') {
                    return Err(anyhow!("directory `{d}` container path must be absolute"));
                }
                Ok((host.to_string(), container.to_string()))
            })
            .collect()
    }
}
