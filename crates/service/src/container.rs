//! Container specs derived from descriptors.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use configs::{AccessoryConfig, DeployConfig, EnvConfig};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::errors::DeployError;
use crate::secrets::Secrets;

pub const LABEL_SERVICE: &str = "deploy.service";
pub const LABEL_ROLE: &str = "deploy.role";
pub const LABEL_FINGERPRINT: &str = "deploy.fingerprint";

/// Host directory under which accessory `directories` are created.
pub const ACCESSORY_DATA_ROOT: &str = "/var/lib/deploy";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    App,
    Accessory,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::App => "app",
            Role::Accessory => "accessory",
        }
    }
}

/// Everything needed to start one container. Two specs with the same
/// fingerprint describe the same container.
#[derive(Clone, PartialEq, Serialize)]
pub struct ContainerSpec {
    pub name: String,
    pub service: String,
    pub role: Role,
    pub image: String,
    pub cmd: Option<String>,
    pub env: BTreeMap<String, String>,
    #[serde(skip)]
    pub secret_keys: BTreeSet<String>,
    /// `(host_port, container_port)`
    pub ports: Vec<(u16, u16)>,
    /// `(host_path, container_path)`
    pub volumes: Vec<(String, String)>,
    /// Keys the fingerprint so labels reveal nothing about secret values.
    #[serde(skip)]
    pub fingerprint_key: Vec<u8>,
}

impl fmt::Debug for ContainerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env: BTreeMap<&str, &str> = self
            .env
            .iter()
            .map(|(k, v)| {
                let shown = if self.secret_keys.contains(k) { "[redacted]" } else { v.as_str() };
                (k.as_str(), shown)
            })
            .collect();
        f.debug_struct("ContainerSpec")
            .field("name", &self.name)
            .field("service", &self.service)
            .field("role", &self.role)
            .field("image", &self.image)
            .field("cmd", &self.cmd)
            .field("env", &env)
            .field("ports", &self.ports)
            .field("volumes", &self.volumes)
            .finish()
    }
}

impl ContainerSpec {
    /// HMAC-SHA256 of the spec under `fingerprint_key`, secret values included.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let mut mac = match Hmac::<Sha256>::new_from_slice(&self.fingerprint_key) {
            Ok(mac) => mac,
            Err(_) => return String::new(),
        };
        mac.update(&bytes);
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn labels(&self) -> Vec<(String, String)> {
        vec![
            (LABEL_SERVICE.to_string(), self.service.clone()),
            (LABEL_ROLE.to_string(), self.role.as_str().to_string()),
            (LABEL_FINGERPRINT.to_string(), self.fingerprint()),
        ]
    }
}

pub fn app_container_name(service: &str) -> String {
    format!("{service}-app")
}

fn resolve_env(
    env: &EnvConfig,
    secrets: &Secrets,
) -> Result<(BTreeMap<String, String>, BTreeSet<String>), DeployError> {
    let mut out = env.clear.clone();
    let mut secret_keys = BTreeSet::new();
    for (key, value) in secrets.resolve(&env.secret)? {
        secret_keys.insert(key.clone());
        out.insert(key, value);
    }
    Ok((out, secret_keys))
}

pub fn app_container(cfg: &DeployConfig, secrets: &Secrets) -> Result<ContainerSpec, DeployError> {
    let (env, secret_keys) = resolve_env(&cfg.env, secrets)?;
    Ok(ContainerSpec {
        name: app_container_name(&cfg.service),
        service: cfg.service.clone(),
        role: Role::App,
        image: cfg.image.clone(),
        cmd: cfg.cmd.clone(),
        env,
        secret_keys,
        ports: vec![(cfg.proxy.app_port, cfg.proxy.app_port)],
        volumes: Vec::new(),
        fingerprint_key: secrets.fingerprint_key().to_vec(),
    })
}

/// Accessories are labelled with their own name so a definition shared by
/// several descriptors yields one fingerprint.
pub fn accessory_container(
    name: &str,
    acc: &AccessoryConfig,
    secrets: &Secrets,
) -> Result<ContainerSpec, DeployError> {
    let (env, secret_keys) = resolve_env(&acc.env, secrets)?;
    let volumes = acc
        .volumes()
        .map_err(|e| DeployError::Config(format!("accessories.{name}: {e}")))?
        .into_iter()
        .map(|(host, container)| (format!("{ACCESSORY_DATA_ROOT}/{name}/{host}"), container))
        .collect();
    Ok(ContainerSpec {
        name: name.to_string(),
        service: name.to_string(),
        role: Role::Accessory,
        image: acc.image.clone(),
        cmd: acc.cmd.clone(),
        env,
        secret_keys,
        ports: acc.port.map(|p| vec![(p, p)]).unwrap_or_default(),
        volumes,
        fingerprint_key: secrets.fingerprint_key().to_vec(),
    })
}

/// Observed state of a container on a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerState {
    pub name: String,
    pub image: String,
    pub running: bool,
    pub status: String,
    #[serde(default)]
    pub fingerprint: Option<String>,
    /// Docker health status when the image defines a HEALTHCHECK.
    #[serde(default)]
    pub health: Option<String>,
}

impl ContainerState {
    /// Running and built from exactly this spec.
    pub fn matches(&self, spec: &ContainerSpec) -> bool {
        self.running && self.fingerprint.as_deref() == Some(spec.fingerprint().as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> DeployConfig {
        configs::parse(
            r#"
service = "api"
image = "acme/api:1"
servers = ["h1"]
[proxy]
host = "app.example.com"
app_port = 3000
[env]
clear = { APP_ENV = "production" }
secret = ["DATABASE_URL"]
[accessories.db]
image = "postgres:16"
host = "h1"
port = 5432
directories = ["data:/var/lib/postgresql/data"]
"#,
        )
        .unwrap()
    }

    #[test]
    fn fingerprint_tracks_secret_values() {
        let cfg = cfg();
        let a = app_container(&cfg, &Secrets::from_pairs([("DATABASE_URL", "one")])).unwrap();
        let b = app_container(&cfg, &Secrets::from_pairs([("DATABASE_URL", "one")])).unwrap();
        let c = app_container(&cfg, &Secrets::from_pairs([("DATABASE_URL", "two")])).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.name, "api-app");
        assert_eq!(a.ports, vec![(3000, 3000)]);
    }

    #[test]
    fn fingerprint_depends_on_key() {
        let cfg = cfg();
        let pairs = [("DATABASE_URL", "postgres://short")];
        let a = app_container(&cfg, &Secrets::from_pairs(pairs).with_local_key("one".into())).unwrap();
        let b = app_container(&cfg, &Secrets::from_pairs(pairs).with_local_key("two".into())).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        // without the key, a guessed secret value cannot be confirmed against the label
        let mut guess = a.clone();
        guess.fingerprint_key = Vec::new();
        assert_ne!(guess.fingerprint(), a.fingerprint());
    }

    #[test]
    fn debug_redacts_secret_env() {
        let a = app_container(&cfg(), &Secrets::from_pairs([("DATABASE_URL", "postgres://secret")])).unwrap();
        let dbg = format!("{a:?}");
        assert!(dbg.contains("production"));
        assert!(!dbg.contains("postgres://secret"));
    }

    #[test]
    fn accessory_volumes_live_under_data_root() {
        let cfg = cfg();
        let db = accessory_container("db", &cfg.accessories["db"], &Secrets::default()).unwrap();
        assert_eq!(db.volumes, vec![("/var/lib/deploy/db/data".to_string(), "/var/lib/postgresql/data".to_string())]);
        assert_eq!(db.role, Role::Accessory);
    }

    #[test]
    fn state_matches_only_when_running_with_same_fingerprint() {
        let spec = app_container(&cfg(), &Secrets::from_pairs([("DATABASE_URL", "x")])).unwrap();
        let mut state = ContainerState {
            name: spec.name.clone(),
            image: spec.image.clone(),
            running: true,
            status: "running".into(),
            fingerprint: Some(spec.fingerprint()),
            health: None,
        };
        assert!(state.matches(&spec));
        state.running = false;
        assert!(!state.matches(&spec));
    }
}
