//! Host/path routing rules.
//!
//! Exactly one service may own a host's root (no prefix). Any number of
//! services may share the host with prefixes that do not overlap on a
//! path-segment boundary. The same rules are applied by the rollout
//! validation and by the ingress when a route is registered.

use serde::{Deserialize, Serialize};

use configs::{normalize_path_prefix, DeployConfig};

use crate::errors::DeployError;

/// Route registered on the ingress for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub host: String,
    #[serde(default)]
    pub path_prefix: Option<String>,
    /// `host:port` pairs the ingress forwards to.
    pub upstreams: Vec<String>,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub strip_prefix: bool,
}

impl RouteEntry {
    pub fn from_config(cfg: &DeployConfig) -> Self {
        Self {
            host: cfg.proxy.host.clone(),
            path_prefix: cfg.proxy.path_prefix.clone(),
            upstreams: cfg
                .servers
                .iter()
                .map(|s| format!("{s}:{}", cfg.proxy.app_port))
                .collect(),
            tls: cfg.proxy.ssl,
            strip_prefix: cfg.proxy.strip_prefix,
        }
    }

    /// Lowercase the host and normalize the prefix so comparisons are exact.
    pub fn normalized(mut self) -> Self {
        self.host = normalize_host(&self.host);
        self.path_prefix = normalize_path_prefix(self.path_prefix.as_deref());
        if self.path_prefix.is_none() {
            self.strip_prefix = false;
        }
        self
    }

    pub fn display_route(&self) -> String {
        format!("{}{}", self.host, self.path_prefix.as_deref().unwrap_or("/"))
    }
}

/// Lowercase, drop any `:port` suffix and trailing dot.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let host = if let Some(end) = host.strip_prefix('[').and_then(|h| h.find(']')) {
        &host[..end + 2]
    } else {
        match host.rsplit_once(':') {
            Some((h, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => h,
            _ => host,
        }
    };
    host.trim_end_matches('.').to_ascii_lowercase()
}

/// `true` when `path` lies under `prefix` on a segment boundary.
pub fn prefix_matches(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'),
        None => false,
    }
}

/// Two prefixes on the same host overlap when equal, when both are the root,
/// or when one contains the other on a segment boundary. A root route never
/// overlaps a prefixed one.
pub fn prefixes_overlap(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => prefix_matches(a, b) || prefix_matches(b, a),
        _ => false,
    }
}

/// Check a set of `(service, route)` claims; the first overlapping pair is reported.
pub fn validate_routes<'a, I>(claims: I) -> Result<(), DeployError>
where
    I: IntoIterator<Item = (&'a str, &'a RouteEntry)>,
{
    let mut seen: Vec<(&str, &RouteEntry)> = Vec::new();
    for (service, route) in claims {
        for (other, existing) in &seen {
            if *other == service {
                continue;
            }
            if existing.host == route.host
                && prefixes_overlap(existing.path_prefix.as_deref(), route.path_prefix.as_deref())
            {
                return Err(DeployError::RouteConflict {
                    host: route.host.clone(),
                    prefix: route.path_prefix.clone(),
                    first: other.to_string(),
                    second: service.to_string(),
                });
            }
        }
        seen.push((service, route));
    }
    Ok(())
}

/// Resolved routing table keyed by service.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    entries: Vec<(String, RouteEntry)>,
}

impl RouteTable {
    /// Build from entries, rejecting overlaps.
    pub fn build<I>(entries: I) -> Result<Self, DeployError>
    where
        I: IntoIterator<Item = (String, RouteEntry)>,
    {
        let entries: Vec<(String, RouteEntry)> =
            entries.into_iter().map(|(s, r)| (s, r.normalized())).collect();
        validate_routes(entries.iter().map(|(s, r)| (s.as_str(), r)))?;
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(String, RouteEntry)] {
        &self.entries
    }

    /// Longest matching prefix on the request host wins; the host's root route is the fallback.
    pub fn resolve(&self, host: &str, path: &str) -> Option<(&str, &RouteEntry)> {
        let host = normalize_host(host);
        let mut root = None;
        let mut best: Option<(&str, &RouteEntry, usize)> = None;
        for (service, route) in &self.entries {
            if route.host != host {
                continue;
            }
            match route.path_prefix.as_deref() {
                None => root = Some((service.as_str(), route)),
                Some(prefix) if prefix_matches(prefix, path) => {
                    if best.map_or(true, |(_, _, len)| prefix.len() > len) {
                        best = Some((service.as_str(), route, prefix.len()));
                    }
                }
                Some(_) => {}
            }
        }
        best.map(|(s, r, _)| (s, r)).or(root)
    }
}
