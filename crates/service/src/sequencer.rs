//! Rollout sequencer.
//!
//! Services are brought up strictly in input order. Before a service's
//! container starts, each accessory it depends on is started (unless already
//! running from the same spec) and polled until ready. Route claims are
//! validated before any host is touched. A failed step stops the rollout;
//! what already ran stays in place.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use configs::{AccessoryConfig, DeployConfig, PollConfig, DEFAULT_INGRESS_HTTP_PORT};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::container::{accessory_container, app_container};
use crate::errors::DeployError;
use crate::readiness::{poll_until_ready, PollError};
use crate::registry::RouteRegistry;
use crate::retry::RetryPolicy;
use crate::routing::{validate_routes, RouteEntry};
use crate::runtime::{ContainerRuntime, ReadinessCheck, RegistryLogin};
use crate::secrets::Secrets;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Change {
    /// No container existed.
    Started,
    /// A stopped or outdated container was recreated.
    Replaced,
    Unchanged,
}

impl Change {
    pub fn as_str(&self) -> &'static str {
        match self {
            Change::Started => "started",
            Change::Replaced => "replaced",
            Change::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessoryOutcome {
    pub name: String,
    pub host: String,
    pub change: Change,
    /// Readiness probes needed.
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostOutcome {
    pub host: String,
    pub change: Change,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceOutcome {
    pub service: String,
    pub hosts: Vec<HostOutcome>,
    pub route_changed: bool,
}

impl ServiceOutcome {
    pub fn is_unchanged(&self) -> bool {
        !self.route_changed && self.hosts.iter().all(|h| h.change == Change::Unchanged)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RolloutReport {
    pub accessories: Vec<AccessoryOutcome>,
    pub services: Vec<ServiceOutcome>,
}

impl RolloutReport {
    pub fn is_unchanged(&self) -> bool {
        self.accessories.iter().all(|a| a.change == Change::Unchanged)
            && self.services.iter().all(ServiceOutcome::is_unchanged)
    }

    fn fail(self, service: &str, error: DeployError) -> RolloutFailure {
        RolloutFailure {
            service: Some(service.to_string()),
            completed: self.services,
            accessories: self.accessories,
            error,
        }
    }
}

/// A stopped rollout: which service failed, why, and what completed before it.
#[derive(Debug)]
pub struct RolloutFailure {
    /// `None` when validation failed and nothing was touched.
    pub service: Option<String>,
    pub completed: Vec<ServiceOutcome>,
    pub accessories: Vec<AccessoryOutcome>,
    pub error: DeployError,
}

impl From<DeployError> for RolloutFailure {
    fn from(error: DeployError) -> Self {
        Self { service: None, completed: Vec::new(), accessories: Vec::new(), error }
    }
}

impl fmt::Display for RolloutFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.service {
            Some(service) => write!(
                f,
                "rollout stopped at `{service}`: {} ({} service(s) completed)",
                self.error,
                self.completed.len()
            ),
            None => write!(f, "rollout rejected before any change: {}", self.error),
        }
    }
}

impl std::error::Error for RolloutFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Accessory resolved from the first descriptor that depends on it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedAccessory {
    pub name: String,
    pub host: String,
    pub config: AccessoryConfig,
    pub readiness: PollConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedService {
    pub config: DeployConfig,
    /// Accessories first needed by this service, booted right before it.
    pub boots: Vec<String>,
    pub route: RouteEntry,
    pub ingress: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RolloutPlan {
    pub services: Vec<PlannedService>,
    pub accessories: BTreeMap<String, PlannedAccessory>,
}

/// Order and validate a rollout without touching any host.
///
/// Rejects duplicate services, `depends_on` entries with no matching
/// accessory, shared accessories declared differently, overlapping routes
/// and two owners for one published port on a host.
pub fn plan(cfgs: &[DeployConfig]) -> Result<RolloutPlan, DeployError> {
    let mut plan = RolloutPlan::default();
    let mut services = BTreeSet::new();
    let mut declared: BTreeMap<&str, (&str, &AccessoryConfig)> = BTreeMap::new();

    for cfg in cfgs {
        if !services.insert(cfg.service.as_str()) {
            return Err(DeployError::Config(format!("service `{}` appears twice in the rollout", cfg.service)));
        }
        for (name, acc) in &cfg.accessories {
            match declared.get(name.as_str()) {
                Some((owner, existing)) if *existing != acc => {
                    return Err(DeployError::Config(format!(
                        "accessory `{name}` is declared differently by `{owner}` and `{}`",
                        cfg.service
                    )));
                }
                Some(_) => {}
                None => {
                    declared.insert(name.as_str(), (cfg.service.as_str(), acc));
                }
            }
        }

        let mut boots = Vec::new();
        for dep in &cfg.depends_on {
            let acc = cfg.accessories.get(dep).ok_or_else(|| DeployError::UnknownAccessory {
                service: cfg.service.clone(),
                accessory: dep.clone(),
            })?;
            if !plan.accessories.contains_key(dep) {
                plan.accessories.insert(
                    dep.clone(),
                    PlannedAccessory {
                        name: dep.clone(),
                        host: acc.host.clone(),
                        config: acc.clone(),
                        readiness: cfg.readiness,
                    },
                );
                boots.push(dep.clone());
            }
        }

        plan.services.push(PlannedService {
            config: cfg.clone(),
            boots,
            route: RouteEntry::from_config(cfg).normalized(),
            ingress: cfg.ingress_url().to_string(),
        });
    }

    validate_routes(plan.services.iter().map(|s| (s.config.service.as_str(), &s.route)))?;
    check_ports(&plan)?;
    Ok(plan)
}

/// Apps and accessories may not share a published port on a host, nor take
/// the ingress's public or admin port on the ingress host.
fn check_ports(plan: &RolloutPlan) -> Result<(), DeployError> {
    let mut claims: BTreeMap<(String, u16), String> = BTreeMap::new();
    let ingresses = plan.services.iter().filter_map(|s| s.config.ingress_addr()).flat_map(|(host, admin)| {
        [
            (host.clone(), DEFAULT_INGRESS_HTTP_PORT, "ingress".to_string()),
            (host, admin, "ingress".to_string()),
        ]
    });
    let apps = plan.services.iter().flat_map(|s| {
        s.config
            .servers
            .iter()
            .map(move |host| (host.clone(), s.config.proxy.app_port, s.config.service.clone()))
    });
    let accessories = plan
        .accessories
        .values()
        .filter_map(|a| a.config.port.map(|p| (a.host.clone(), p, a.name.clone())));
    for (host, port, owner) in ingresses.chain(apps).chain(accessories) {
        if let Some(other) = claims.insert((host.clone(), port), owner.clone()) {
            if other != owner {
                return Err(DeployError::Config(format!(
                    "port {port} on {host} is published by both `{other}` and `{owner}`"
                )));
            }
        }
    }
    Ok(())
}

/// Drives rollouts against a container runtime and an ingress route registry.
pub struct Deployer<'a> {
    pub(crate) runtime: &'a dyn ContainerRuntime,
    pub(crate) registry: &'a dyn RouteRegistry,
    pub(crate) secrets: &'a Secrets,
}

impl<'a> Deployer<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime, registry: &'a dyn RouteRegistry, secrets: &'a Secrets) -> Self {
        Self { runtime, registry, secrets }
    }

    /// Full pre-flight: [`plan`], secrets, and routes other services already
    /// hold on each ingress.
    pub async fn validate(&self, cfgs: &[DeployConfig]) -> Result<RolloutPlan, DeployError> {
        for cfg in cfgs {
            self.secrets.ensure_declared(cfg)?;
        }
        let plan = plan(cfgs)?;
        self.check_registered_routes(&plan).await?;
        Ok(plan)
    }

    async fn check_registered_routes(&self, plan: &RolloutPlan) -> Result<(), DeployError> {
        let ours: BTreeSet<&str> = plan.services.iter().map(|s| s.config.service.as_str()).collect();
        let ingresses: BTreeSet<&str> = plan.services.iter().map(|s| s.ingress.as_str()).collect();
        for ingress in ingresses {
            let existing: Vec<(String, RouteEntry)> = self
                .registry
                .routes(ingress)
                .await?
                .into_iter()
                .filter(|(service, _)| !ours.contains(service.as_str()))
                .map(|(service, route)| (service, route.normalized()))
                .collect();
            let claims = existing.iter().map(|(s, r)| (s.as_str(), r)).chain(
                plan.services
                    .iter()
                    .filter(|s| s.ingress == ingress)
                    .map(|s| (s.config.service.as_str(), &s.route)),
            );
            validate_routes(claims)?;
        }
        Ok(())
    }

    /// Validate, then bring every service up in order.
    pub async fn run(&self, cfgs: &[DeployConfig]) -> Result<RolloutReport, RolloutFailure> {
        let plan = self.validate(cfgs).await?;
        self.execute(&plan).await
    }

    pub async fn execute(&self, plan: &RolloutPlan) -> Result<RolloutReport, RolloutFailure> {
        let mut report = RolloutReport::default();
        let mut logged_in = HashSet::new();

        for planned in &plan.services {
            let service = planned.config.service.as_str();
            for name in &planned.boots {
                let outcome = match plan.accessories.get(name) {
                    Some(acc) => self.ensure_accessory(service, acc).await,
                    None => Err(DeployError::UnknownAccessory {
                        service: service.to_string(),
                        accessory: name.clone(),
                    }),
                };
                match outcome {
                    Ok(outcome) => report.accessories.push(outcome),
                    Err(error) => return Err(report.fail(service, error)),
                }
            }

            match self.deploy_service(planned, &mut logged_in).await {
                Ok(outcome) => report.services.push(outcome),
                Err(error) => {
                    warn!(%service, code = error.code(), %error, "service rollout failed");
                    return Err(report.fail(service, error));
                }
            }
        }
        Ok(report)
    }

    /// Start one accessory of `cfg` on its own, outside a rollout.
    pub async fn boot_accessory(&self, cfg: &DeployConfig, name: &str) -> Result<AccessoryOutcome, DeployError> {
        let acc = cfg.accessories.get(name).ok_or_else(|| DeployError::UnknownAccessory {
            service: cfg.service.clone(),
            accessory: name.to_string(),
        })?;
        let planned = PlannedAccessory {
            name: name.to_string(),
            host: acc.host.clone(),
            config: acc.clone(),
            readiness: cfg.readiness,
        };
        self.ensure_accessory(&cfg.service, &planned).await
    }

    async fn ensure_accessory(&self, service: &str, acc: &PlannedAccessory) -> Result<AccessoryOutcome, DeployError> {
        let spec = accessory_container(&acc.name, &acc.config, self.secrets)?;
        let host = acc.host.as_str();
        let change = match self.runtime.inspect(host, &spec.name).await? {
            Some(state) if state.matches(&spec) => Change::Unchanged,
            Some(_) => Change::Replaced,
            None => Change::Started,
        };
        if change != Change::Unchanged {
            let dirs: Vec<String> = spec.volumes.iter().map(|(h, _)| h.clone()).collect();
            if !dirs.is_empty() {
                self.runtime.prepare_dirs(host, &dirs).await?;
            }
            self.runtime.start(host, &spec).await?;
            info!(accessory = %acc.name, %host, change = change.as_str(), "accessory started");
        }

        let check = match &acc.config.ready_cmd {
            Some(cmd) => ReadinessCheck::Exec { container: spec.name.clone(), cmd: cmd.clone() },
            None => ReadinessCheck::Running { container: spec.name.clone() },
        };
        let policy = RetryPolicy::from_poll(&acc.readiness);
        let attempts = match poll_until_ready(&policy, || self.runtime.probe(host, &check)).await {
            Ok(attempts) => attempts,
            Err(PollError::Exhausted { attempts }) => {
                warn!(accessory = %acc.name, %service, attempts, "accessory never became ready");
                return Err(DeployError::DependencyTimeout {
                    service: service.to_string(),
                    accessory: acc.name.clone(),
                    attempts,
                });
            }
            Err(PollError::Failed(e)) => return Err(e),
        };
        debug!(accessory = %acc.name, attempts, "accessory ready");
        Ok(AccessoryOutcome { name: acc.name.clone(), host: host.to_string(), change, attempts })
    }

    fn registry_login(&self, cfg: &DeployConfig) -> Result<Option<RegistryLogin>, DeployError> {
        cfg.registry
            .as_ref()
            .map(|r| {
                Ok(RegistryLogin {
                    server: r.server.clone(),
                    username: r.username.clone(),
                    password: self.secrets.get(&r.password)?.to_string(),
                })
            })
            .transpose()
    }

    async fn deploy_service(
        &self,
        planned: &PlannedService,
        logged_in: &mut HashSet<(String, String)>,
    ) -> Result<ServiceOutcome, DeployError> {
        let cfg = &planned.config;
        let spec = app_container(cfg, self.secrets)?;
        let login = self.registry_login(cfg)?;
        let health = RetryPolicy::from_poll(&cfg.health);
        let mut hosts = Vec::with_capacity(cfg.servers.len());

        for host in &cfg.servers {
            let change = match self.runtime.inspect(host, &spec.name).await? {
                Some(state) if state.matches(&spec) => Change::Unchanged,
                Some(_) => Change::Replaced,
                None => Change::Started,
            };
            if change == Change::Unchanged {
                debug!(service = %cfg.service, %host, "container unchanged");
                hosts.push(HostOutcome { host: host.clone(), change });
                continue;
            }

            if let Some(login) = &login {
                if !logged_in.contains(&(host.clone(), login.server.clone())) {
                    self.runtime.login(host, login).await?;
                    logged_in.insert((host.clone(), login.server.clone()));
                }
            }
            self.runtime.start(host, &spec).await?;

            let check = ReadinessCheck::Http {
                url: format!("http://{host}:{}{}", cfg.proxy.app_port, cfg.proxy.healthcheck_path),
            };
            match poll_until_ready(&health, || self.runtime.probe(host, &check)).await {
                Ok(attempts) => {
                    info!(service = %cfg.service, %host, attempts, change = change.as_str(), "service healthy")
                }
                Err(PollError::Exhausted { attempts }) => {
                    return Err(DeployError::Unhealthy { service: cfg.service.clone(), host: host.clone(), attempts })
                }
                Err(PollError::Failed(e)) => return Err(e),
            }
            hosts.push(HostOutcome { host: host.clone(), change });
        }

        let route_changed = self.registry.register(&planned.ingress, &cfg.service, &planned.route).await?;
        Ok(ServiceOutcome { service: cfg.service.clone(), hosts, route_changed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{descriptor, FakeRegistry, FakeRuntime};

    fn secrets() -> Secrets {
        Secrets::from_pairs([("DATABASE_URL", "postgres://db/app"), ("REGISTRY_PASSWORD", "hunter2")])
    }

    fn api() -> DeployConfig {
        descriptor(
            r#"
service = "api"
image = "acme/api:1"
servers = ["h1"]
depends_on = ["db"]
[proxy]
host = "app.example.com"
path_prefix = "/api"
app_port = 3000
[env]
secret = ["DATABASE_URL"]
[accessories.db]
image = "postgres:16"
host = "h1"
port = 5432
directories = ["data:/var/lib/postgresql/data"]
ready_cmd = "pg_isready"
[readiness]
max_attempts = 3
interval_secs = 0
[health]
max_attempts = 2
interval_secs = 0
"#,
        )
    }

    fn web() -> DeployConfig {
        descriptor(
            r#"
service = "web"
image = "acme/web:1"
servers = ["h1"]
[proxy]
host = "app.example.com"
app_port = 8080
[health]
max_attempts = 2
interval_secs = 0
"#,
        )
    }

    #[tokio::test]
    async fn without_accessories_order_is_input_order() {
        let runtime = FakeRuntime::default();
        let registry = FakeRegistry::default();
        let secrets = secrets();
        let mut other = web();
        other.service = "admin".into();
        other.proxy.path_prefix = Some("/admin".into());
        other.proxy.app_port = 8081;
        let cfgs = vec![web(), other];

        let report = Deployer::new(&runtime, &registry, &secrets).run(&cfgs).await.unwrap();
        let order: Vec<&str> = report.services.iter().map(|s| s.service.as_str()).collect();
        assert_eq!(order, ["web", "admin"]);
        assert_eq!(runtime.started(), ["h1 web-app", "h1 admin-app"]);
    }

    #[tokio::test]
    async fn accessory_is_ready_before_dependent_starts() {
        let runtime = FakeRuntime::default();
        let registry = FakeRegistry::default();
        let secrets = secrets();

        let report = Deployer::new(&runtime, &registry, &secrets).run(&[api()]).await.unwrap();
        assert_eq!(report.accessories[0].change, Change::Started);

        let events = runtime.events();
        let db_ready = events.iter().position(|e| e == "probe h1 db").unwrap();
        let api_start = events.iter().position(|e| e == "start h1 api-app").unwrap();
        assert!(db_ready < api_start, "{events:?}");
        assert!(events.contains(&"dirs h1 /var/lib/deploy/db/data".to_string()));
    }

    #[tokio::test]
    async fn two_bare_host_claims_fail_before_any_start() {
        let runtime = FakeRuntime::default();
        let registry = FakeRegistry::default();
        let secrets = secrets();
        let mut other = web();
        other.service = "landing".into();
        other.proxy.app_port = 8081;

        let failure = Deployer::new(&runtime, &registry, &secrets)
            .run(&[web(), other])
            .await
            .unwrap_err();
        assert!(matches!(failure.error, DeployError::RouteConflict { .. }));
        assert!(failure.service.is_none());
        assert!(runtime.events().is_empty());
        assert_eq!(registry.writes(), 0);
    }

    #[tokio::test]
    async fn route_held_by_other_service_on_ingress_conflicts() {
        let runtime = FakeRuntime::default();
        let registry = FakeRegistry::default();
        let secrets = secrets();
        let mut landing = web();
        landing.service = "landing".into();
        registry.seed("http://h1:9188", "landing", RouteEntry::from_config(&landing));

        let failure = Deployer::new(&runtime, &registry, &secrets).run(&[web()]).await.unwrap_err();
        assert!(
            matches!(failure.error, DeployError::RouteConflict { ref first, ref second, .. } if first == "landing" && second == "web")
        );
        assert!(runtime.events().is_empty());
    }

    #[tokio::test]
    async fn accessory_never_ready_times_out_and_dependent_is_not_started() {
        let runtime = FakeRuntime::default();
        runtime.never_ready("db");
        let registry = FakeRegistry::default();
        let secrets = secrets();

        let failure = Deployer::new(&runtime, &registry, &secrets)
            .run(&[web(), api()])
            .await
            .unwrap_err();
        assert!(matches!(
            failure.error,
            DeployError::DependencyTimeout { ref service, ref accessory, attempts: 3 } if service == "api" && accessory == "db"
        ));
        assert_eq!(failure.service.as_deref(), Some("api"));
        // no rollback: web stays deployed and is reported as completed
        assert_eq!(failure.completed.len(), 1);
        assert_eq!(failure.completed[0].service, "web");
        assert_eq!(runtime.started(), ["h1 web-app", "h1 db"]);
        assert_eq!(runtime.probes("db"), 3);
    }

    #[tokio::test]
    async fn rerun_of_unchanged_set_changes_nothing() {
        let runtime = FakeRuntime::default();
        let registry = FakeRegistry::default();
        let secrets = secrets();
        let cfgs = vec![api(), web()];
        let deployer = Deployer::new(&runtime, &registry, &secrets);

        let first = deployer.run(&cfgs).await.unwrap();
        assert!(!first.is_unchanged());
        let starts = runtime.started().len();
        let writes = registry.writes();

        let second = deployer.run(&cfgs).await.unwrap();
        assert!(second.is_unchanged(), "{second:?}");
        assert_eq!(runtime.started().len(), starts);
        assert_eq!(registry.writes(), writes);
    }

    #[tokio::test]
    async fn changed_secret_replaces_container() {
        let runtime = FakeRuntime::default();
        let registry = FakeRegistry::default();
        let first = secrets();
        Deployer::new(&runtime, &registry, &first).run(&[api()]).await.unwrap();

        let rotated = Secrets::from_pairs([("DATABASE_URL", "postgres://db/other")]);
        let report = Deployer::new(&runtime, &registry, &rotated).run(&[api()]).await.unwrap();
        assert_eq!(report.services[0].hosts[0].change, Change::Replaced);
        assert_eq!(report.accessories[0].change, Change::Unchanged);
        assert!(!report.services[0].route_changed);
    }

    #[tokio::test]
    async fn unhealthy_service_is_reported_and_route_not_registered() {
        let runtime = FakeRuntime::default();
        runtime.never_ready("http://h1:8080/up");
        let registry = FakeRegistry::default();
        let secrets = secrets();

        let failure = Deployer::new(&runtime, &registry, &secrets).run(&[web()]).await.unwrap_err();
        assert!(matches!(failure.error, DeployError::Unhealthy { attempts: 2, .. }));
        assert_eq!(registry.writes(), 0);
    }

    #[tokio::test]
    async fn registry_login_failure_is_fatal_without_retry() {
        let runtime = FakeRuntime::default();
        runtime.fail_login();
        let registry = FakeRegistry::default();
        let secrets = secrets();
        let mut cfg = web();
        cfg.registry = Some(configs::RegistryConfig {
            server: "ghcr.io".into(),
            username: "acme".into(),
            password: "REGISTRY_PASSWORD".into(),
        });

        let failure = Deployer::new(&runtime, &registry, &secrets).run(&[cfg]).await.unwrap_err();
        assert!(matches!(failure.error, DeployError::RegistryAuth { .. }));
        assert_eq!(runtime.events().iter().filter(|e| e.starts_with("login")).count(), 1);
        assert!(runtime.started().is_empty());
    }

    #[test]
    fn plan_rejects_unknown_and_conflicting_accessories() {
        let mut cfg = api();
        cfg.depends_on.push("cache".into());
        assert!(matches!(plan(&[cfg]), Err(DeployError::UnknownAccessory { ref accessory, .. }) if accessory == "cache"));

        let mut worker = api();
        worker.service = "worker".into();
        worker.proxy.path_prefix = Some("/jobs".into());
        worker.proxy.app_port = 3001;
        let shared = plan(&[api(), worker.clone()]).unwrap();
        assert_eq!(shared.accessories.len(), 1);
        assert_eq!(shared.services[0].boots, ["db"]);
        assert!(shared.services[1].boots.is_empty());

        if let Some(db) = worker.accessories.get_mut("db") {
            db.image = "postgres:15".into();
        }
        assert!(matches!(plan(&[api(), worker]), Err(DeployError::Config(_))));
    }

    #[test]
    fn plan_rejects_port_clash_on_shared_server() {
        let mut other = web();
        other.service = "admin".into();
        other.proxy.path_prefix = Some("/admin".into());
        let err = plan(&[web(), other]).unwrap_err();
        assert!(err.to_string().contains("port 8080"), "{err}");
    }

    #[test]
    fn plan_keeps_ingress_ports_free_on_the_ingress_host() {
        let mut on_admin_port = web();
        on_admin_port.proxy.app_port = 9188;
        let err = plan(&[on_admin_port]).unwrap_err();
        assert!(err.to_string().contains("`ingress` and `web`"), "{err}");

        let mut on_http_port = web();
        on_http_port.proxy.app_port = 80;
        assert!(plan(&[on_http_port.clone()]).is_err());

        // another host is free to use it
        on_http_port.proxy.ingress = Some("http://edge:9188".into());
        assert!(plan(&[on_http_port]).is_ok());
    }

    #[tokio::test]
    async fn missing_secret_fails_validation() {
        let runtime = FakeRuntime::default();
        let registry = FakeRegistry::default();
        let empty = Secrets::default();
        let failure = Deployer::new(&runtime, &registry, &empty).run(&[api()]).await.unwrap_err();
        assert!(matches!(failure.error, DeployError::MissingSecret { ref name } if name == "DATABASE_URL"));
        assert!(runtime.events().is_empty());
    }
}
