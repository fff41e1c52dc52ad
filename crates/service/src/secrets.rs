//! Secrets file handling.
//!
//! The file holds one `KEY=VALUE` pair per line. Blank lines and `#` comments
//! are skipped, an `export ` prefix is allowed and one pair of surrounding
//! quotes is removed. Values are otherwise taken literally: `$VAR` is never
//! expanded. Values are only ever handed to the container runtime; `Debug`
//! output is redacted.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use configs::DeployConfig;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::DeployError;

pub const SECRETS_ENV: &str = "DEPLOY_SECRETS";
pub const DEFAULT_SECRETS_PATH: &str = ".secrets";
/// Secret keying container fingerprints; shared by everyone who deploys the same targets.
pub const FINGERPRINT_KEY_SECRET: &str = "DEPLOY_FINGERPRINT_KEY";
const FINGERPRINT_KEY_FILE: &str = "fingerprint.key";

#[derive(Clone, Default, PartialEq)]
pub struct Secrets {
    values: BTreeMap<String, String>,
    /// Used when the file has no `DEPLOY_FINGERPRINT_KEY`.
    local_key: Option<String>,
}

fn valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !key.starts_with(|c: char| c.is_ascii_digit())
}

fn unquote(raw: &str) -> String {
    let quoted = |q: char| raw.len() >= 2 && raw.starts_with(q) && raw.ends_with(q);
    if quoted('\'') {
        return raw[1..raw.len() - 1].to_string();
    }
    if !quoted('"') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw[1..raw.len() - 1].chars();
    while let Some(c) = chars.next() {
        match (c, chars.clone().next()) {
            ('\\', Some(next @ ('"' | '\\'))) => {
                out.push(next);
                chars.next();
            }
            _ => out.push(c),
        }
    }
    out
}

fn parse_line(number: usize, line: &str) -> Result<Option<(String, String)>, DeployError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);
    let (key, value) = line
        .split_once('=')
        .ok_or_else(|| DeployError::Secrets(format!("line {number}: expected KEY=VALUE")))?;
    let key = key.trim();
    if !valid_key(key) {
        return Err(DeployError::Secrets(format!("line {number}: invalid key `{key}`")));
    }
    Ok(Some((key.to_string(), unquote(value.trim()))))
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Secrets {
    pub fn parse(content: &str) -> Result<Self, DeployError> {
        let mut values = BTreeMap::new();
        for (i, line) in content.lines().enumerate() {
            if let Some((key, value)) = parse_line(i + 1, line)? {
                values.insert(key, value);
            }
        }
        Ok(Self { values, local_key: None })
    }

    /// Load from a file; a missing file yields an empty set so descriptors
    /// without secrets work without one.
    pub async fn load(path: &Path) -> Result<Self, DeployError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let secrets = Self::parse(&content)?;
                debug!(path = %path.display(), count = secrets.values.len(), "secrets loaded");
                Ok(secrets)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self { values: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(), local_key: None }
    }

    pub fn with_local_key(mut self, key: String) -> Self {
        self.local_key = Some(key);
        self
    }

    /// Key for container fingerprints: `DEPLOY_FINGERPRINT_KEY` from the file, else the local key.
    pub fn fingerprint_key(&self) -> &[u8] {
        self.values
            .get(FINGERPRINT_KEY_SECRET)
            .or(self.local_key.as_ref())
            .map(|k| k.as_bytes())
            .unwrap_or_default()
    }

    pub fn get(&self, name: &str) -> Result<&str, DeployError> {
        self.values
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| DeployError::MissingSecret { name: name.to_string() })
    }

    /// Check that every secret a descriptor declares resolves; reports the first missing name.
    pub fn ensure_declared(&self, cfg: &DeployConfig) -> Result<(), DeployError> {
        cfg.secret_names().iter().try_for_each(|name| self.get(name).map(|_| ()))
    }

    /// Resolve the given secret names into `(name, value)` pairs.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<(String, String)>, DeployError> {
        names
            .iter()
            .map(|n| self.get(n).map(|v| (n.clone(), v.to_string())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Read `<state_dir>/fingerprint.key`, creating it with a random key on first use.
pub async fn local_fingerprint_key(state_dir: &Path) -> Result<String, DeployError> {
    let path = state_dir.join(FINGERPRINT_KEY_FILE);
    tokio::fs::create_dir_all(state_dir).await?;
    let key = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    match tokio::fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
        Ok(mut file) => {
            file.write_all(key.as_bytes()).await?;
            file.flush().await?;
            info!(path = %path.display(), "fingerprint key created");
            Ok(key)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            let existing = tokio::fs::read_to_string(&path).await?;
            let existing = existing.trim();
            if existing.is_empty() {
                return Err(DeployError::Secrets(format!("{} is empty", path.display())));
            }
            Ok(existing.to_string())
        }
        Err(e) => Err(e.into()),
    }
}
