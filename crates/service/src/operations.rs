//! Per-service operations other than the rollout itself.

use std::collections::BTreeSet;

use configs::DeployConfig;
use serde::Serialize;
use tracing::{info, warn};

use crate::container::{app_container, app_container_name, ContainerState};
use crate::errors::DeployError;
use crate::routing::RouteEntry;
use crate::runtime::{CommandOutput, LogOptions};
use crate::sequencer::{Deployer, RolloutFailure, RolloutReport};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeCheck {
    pub host: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetupReport {
    pub runtimes: Vec<RuntimeCheck>,
    pub rollout: RolloutReport,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RemoveReport {
    pub route_removed: bool,
    /// `(host, container existed)`
    pub containers: Vec<(String, bool)>,
    pub accessories: Vec<(String, bool)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostStatus {
    pub host: String,
    pub container: String,
    pub state: Option<ContainerState>,
    /// Running and built from the current descriptor and secrets.
    pub current: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceDetails {
    pub service: String,
    pub hosts: Vec<HostStatus>,
    pub accessories: Vec<HostStatus>,
    pub route: Option<RouteEntry>,
    /// Set when the ingress could not be queried.
    pub route_error: Option<String>,
}

/// Every host a rollout of `cfgs` touches.
pub fn all_hosts(cfgs: &[DeployConfig]) -> BTreeSet<String> {
    cfgs.iter()
        .flat_map(|c| c.servers.iter().cloned().chain(c.accessories.values().map(|a| a.host.clone())))
        .collect()
}

impl Deployer<'_> {
    /// Verify the runtime on every host, then roll out. Accessory directories
    /// are created as part of booting each accessory.
    pub async fn setup(&self, cfgs: &[DeployConfig]) -> Result<SetupReport, RolloutFailure> {
        self.validate(cfgs).await?;
        let mut runtimes = Vec::new();
        for host in all_hosts(cfgs) {
            let version = self.runtime.check(&host).await?;
            info!(%host, %version, "container runtime available");
            runtimes.push(RuntimeCheck { host, version });
        }
        let rollout = self.run(cfgs).await?;
        Ok(SetupReport { runtimes, rollout })
    }

    /// Deregister the route, then remove the service's containers; optionally its accessories too.
    pub async fn remove(&self, cfg: &DeployConfig, with_accessories: bool) -> Result<RemoveReport, DeployError> {
        let mut report = RemoveReport {
            route_removed: self.registry.deregister(cfg.ingress_url(), &cfg.service).await?,
            ..Default::default()
        };
        let name = app_container_name(&cfg.service);
        for host in &cfg.servers {
            let existed = self.runtime.remove(host, &name).await?;
            report.containers.push((host.clone(), existed));
        }
        if with_accessories {
            for (acc_name, acc) in &cfg.accessories {
                let existed = self.runtime.remove(&acc.host, acc_name).await?;
                report.accessories.push((acc_name.clone(), existed));
            }
        }
        info!(service = %cfg.service, route_removed = report.route_removed, "service removed");
        Ok(report)
    }

    pub async fn remove_accessory(&self, cfg: &DeployConfig, name: &str) -> Result<bool, DeployError> {
        let acc = cfg.accessories.get(name).ok_or_else(|| DeployError::UnknownAccessory {
            service: cfg.service.clone(),
            accessory: name.to_string(),
        })?;
        let existed = self.runtime.remove(&acc.host, name).await?;
        if existed {
            info!(accessory = %name, host = %acc.host, "accessory removed");
        }
        Ok(existed)
    }

    /// Container state per server and accessory, plus the route the ingress holds.
    pub async fn details(&self, cfg: &DeployConfig) -> Result<ServiceDetails, DeployError> {
        let spec = app_container(cfg, self.secrets)?;
        let mut hosts = Vec::new();
        for host in &cfg.servers {
            let state = self.runtime.inspect(host, &spec.name).await?;
            let current = state.as_ref().map_or(false, |s| s.matches(&spec));
            hosts.push(HostStatus { host: host.clone(), container: spec.name.clone(), state, current });
        }

        let mut accessories = Vec::new();
        for (name, acc) in &cfg.accessories {
            let acc_spec = crate::container::accessory_container(name, acc, self.secrets)?;
            let state = self.runtime.inspect(&acc.host, name).await?;
            let current = state.as_ref().map_or(false, |s| s.matches(&acc_spec));
            accessories.push(HostStatus { host: acc.host.clone(), container: name.clone(), state, current });
        }

        let (route, route_error) = match self.registry.routes(cfg.ingress_url()).await {
            Ok(routes) => (routes.into_iter().find(|(s, _)| *s == cfg.service).map(|(_, r)| r), None),
            Err(e) => {
                warn!(service = %cfg.service, error = %e, "could not query ingress");
                (None, Some(e.to_string()))
            }
        };
        Ok(ServiceDetails { service: cfg.service.clone(), hosts, accessories, route, route_error })
    }

    pub async fn logs(
        &self,
        cfg: &DeployConfig,
        host: Option<&str>,
        opts: &LogOptions,
    ) -> Result<Vec<(String, CommandOutput)>, DeployError> {
        let name = app_container_name(&cfg.service);
        let mut out = Vec::new();
        for host in select_hosts(cfg, host)? {
            out.push((host.clone(), self.runtime.logs(&host, &name, opts).await?));
        }
        Ok(out)
    }

    /// Run `cmd` in the service container on each selected server. A non-zero
    /// exit status is returned, not raised.
    pub async fn exec(
        &self,
        cfg: &DeployConfig,
        host: Option<&str>,
        cmd: &str,
    ) -> Result<Vec<(String, CommandOutput)>, DeployError> {
        let name = app_container_name(&cfg.service);
        let mut out = Vec::new();
        for host in select_hosts(cfg, host)? {
            out.push((host.clone(), self.runtime.exec(&host, &name, cmd).await?));
        }
        Ok(out)
    }
}

fn select_hosts(cfg: &DeployConfig, host: Option<&str>) -> Result<Vec<String>, DeployError> {
    match host {
        None => Ok(cfg.servers.clone()),
        Some(h) => {
            let h = h.trim().to_ascii_lowercase();
            if cfg.servers.contains(&h) {
                Ok(vec![h])
            } else {
                Err(DeployError::Config(format!("`{h}` is not a server of `{}`", cfg.service)))
            }
        }
    }
}
