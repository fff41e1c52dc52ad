//! Pre-deploy check that each route host resolves to one of its servers.

use std::collections::BTreeSet;
use std::net::IpAddr;

use configs::DeployConfig;
use tracing::{debug, warn};

async fn resolve(name: &str) -> BTreeSet<IpAddr> {
    match tokio::net::lookup_host((name, 0)).await {
        Ok(addrs) => addrs.map(|a| a.ip()).collect(),
        Err(e) => {
            debug!(%name, error = %e, "lookup failed");
            BTreeSet::new()
        }
    }
}

/// `true` when `host` resolves to an address shared with any of `servers`.
pub async fn points_at_servers(host: &str, servers: &[String]) -> bool {
    let wanted = resolve(host).await;
    if wanted.is_empty() {
        return false;
    }
    for server in servers {
        let addrs = match server.parse::<IpAddr>() {
            Ok(ip) => BTreeSet::from([ip]),
            Err(_) => resolve(server).await,
        };
        if !wanted.is_disjoint(&addrs) {
            return true;
        }
    }
    false
}

/// Warn for every descriptor whose route host does not point at its servers.
/// Never fails: DNS is often managed elsewhere and may lag.
pub async fn check_domains(cfgs: &[DeployConfig]) -> Vec<String> {
    let mut mismatched = Vec::new();
    for cfg in cfgs {
        if points_at_servers(&cfg.proxy.host, &cfg.servers).await {
            debug!(service = %cfg.service, host = %cfg.proxy.host, "domain points at servers");
        } else {
            warn!(
                service = %cfg.service,
                host = %cfg.proxy.host,
                servers = ?cfg.servers,
                "domain does not resolve to any of the service's servers"
            );
            mismatched.push(cfg.proxy.host.clone());
        }
    }
    mismatched
}
