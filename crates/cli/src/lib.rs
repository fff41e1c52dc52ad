//! `deploy` command dispatch.

pub mod args;
pub mod output;
pub mod templates;

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context as _, Result};
use configs::DeployConfig;
use service::errors::DeployError;
use service::lock::{self, DeployLock};
use service::registry::HttpRouteRegistry;
use service::runtime::{DockerCli, LogOptions};
use service::secrets::{self, Secrets, DEFAULT_SECRETS_PATH, SECRETS_ENV};
use service::sequencer::{self, Deployer, RolloutFailure};
use tracing::{error, info, warn};

use crate::args::{AccessoryCommand, Command, GlobalOptions, Invocation, LockCommand};

pub const STATE_DIR_ENV: &str = "DEPLOY_STATE_DIR";
pub const SSH_USER_ENV: &str = "DEPLOY_SSH_USER";
pub const DEFAULT_STATE_DIR: &str = ".deploy";

/// Everything a descriptor-scoped command needs.
struct Context {
    configs: Vec<DeployConfig>,
    secrets: Secrets,
    lock_dir: PathBuf,
    runtime: DockerCli,
    registry: HttpRouteRegistry,
}

impl Context {
    async fn load(global: &GlobalOptions) -> Result<Self> {
        let paths = if global.configs.is_empty() { configs::config_paths_from_env() } else { global.configs.clone() };
        let all = configs::load_many(&paths)?;
        let configs = select_services(all, &global.services)?;

        let secrets_path = global
            .secrets
            .clone()
            .or_else(|| common::env::non_empty_var(SECRETS_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SECRETS_PATH));
        let state_dir = global
            .state_dir
            .clone()
            .or_else(|| common::env::non_empty_var(STATE_DIR_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
        let lock_dir = common::env::ensure_state_dir(&state_dir).await?;

        let secrets = Secrets::load(&secrets_path)
            .await
            .with_context(|| format!("loading secrets from {}", secrets_path.display()))?
            .with_local_key(secrets::local_fingerprint_key(&state_dir).await?);
        let registry = registry_for(&configs, &secrets)?;

        let ssh_user = global.ssh_user.clone().or_else(|| common::env::non_empty_var(SSH_USER_ENV));
        info!(services = configs.len(), secrets = secrets.len(), "descriptors loaded");
        Ok(Self {
            configs,
            secrets,
            lock_dir,
            runtime: DockerCli::new(ssh_user),
            registry,
        })
    }

    fn deployer(&self) -> Deployer<'_> {
        Deployer::new(&self.runtime, &self.registry, &self.secrets)
    }

    /// Distinct targets of the selected descriptors, sorted so every process locks in the same order.
    fn targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = self.configs.iter().map(|c| c.target.clone()).collect();
        targets.sort();
        targets.dedup();
        targets
    }

    fn single(&self, what: &str) -> Result<&DeployConfig> {
        match self.configs.as_slice() {
            [one] => Ok(one),
            [] => bail!("no descriptor selected"),
            many => bail!(
                "{what} works on one service; pick one of {} with --service",
                many.iter().map(|c| c.service.as_str()).collect::<Vec<_>>().join(", ")
            ),
        }
    }
}

/// Registry client carrying each ingress's admin token. A token secret that is
/// missing is left out here and reported by validation.
fn registry_for(cfgs: &[DeployConfig], secrets: &Secrets) -> Result<HttpRouteRegistry> {
    let mut registry = HttpRouteRegistry::default();
    let mut seen: Vec<(&str, &str)> = Vec::new();
    for cfg in cfgs {
        let Some(name) = cfg.proxy.ingress_token.as_deref() else { continue };
        let Ok(token) = secrets.get(name) else { continue };
        let ingress = cfg.ingress_url();
        if let Some((_, other)) = seen.iter().find(|(url, n)| *url == ingress && *n != name) {
            if secrets.get(other).ok() != Some(token) {
                bail!("descriptors give {ingress} two different tokens (`{other}` and `{name}`)");
            }
        }
        seen.push((ingress, name));
        registry = registry.with_token(ingress, token);
    }
    Ok(registry)
}

/// Keep `all` in descriptor order, restricted to `services` when given.
pub fn select_services(all: Vec<DeployConfig>, services: &[String]) -> Result<Vec<DeployConfig>> {
    if services.is_empty() {
        return Ok(all);
    }
    if let Some(missing) = services.iter().find(|s| !all.iter().any(|c| &c.service == *s)) {
        bail!("no descriptor for service `{missing}`");
    }
    Ok(all.into_iter().filter(|c| services.contains(&c.service)).collect())
}

/// Hold every target lock while `work` runs. Locks are released on success,
/// on failure, and when the operator interrupts with Ctrl+C.
async fn with_locks<T, F>(lock_dir: &Path, targets: &[String], message: &str, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let holder = lock::current_holder();
    let mut held = Vec::new();
    for target in targets {
        match DeployLock::acquire(lock_dir, target, &holder, Some(message.to_string())).await {
            Ok(l) => held.push(l),
            Err(e) => {
                release_all(held).await;
                return Err(e.into());
            }
        }
    }

    let outcome = tokio::select! {
        res = work => res,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; releasing lock");
            Err(anyhow!("interrupted by operator"))
        }
    };
    release_all(held).await;
    outcome
}

async fn release_all(held: Vec<DeployLock>) {
    for l in held {
        let target = l.info().target.clone();
        if let Err(e) = l.release().await {
            warn!(lock_target = %target, error = %e, "failed to release lock");
        }
    }
}

/// Exit status 2 when the rollout was rejected before touching a host, 1 otherwise.
fn rollout_failed(failure: &RolloutFailure) -> i32 {
    print!("{}", output::failure(failure));
    error!(service = ?failure.service, code = failure.error.code(), error = %failure.error, "rollout failed");
    if failure.service.is_none() {
        2
    } else {
        1
    }
}

/// Run one invocation; the returned value is the process exit status.
pub async fn run(argv: &[String]) -> Result<i32> {
    let Invocation { global, command } = match args::parse(argv) {
        Ok(invocation) => invocation,
        Err(e) if !e.use_stderr() => {
            // --help, --version and a bare `deploy`
            e.print()?;
            return Ok(0);
        }
        Err(e) => return Err(anyhow!(e.render().to_string().trim_end().to_string())),
    };
    if let Command::Init { dir } = &command {
        for (path, written) in templates::write_all(dir).await? {
            println!("{} {}", if written { "created" } else { "exists " }, path.display());
        }
        return Ok(0);
    }

    let ctx = Context::load(&global).await?;
    if command.needs_lock() {
        let targets = ctx.targets();
        let message = format!("{command:?}");
        with_locks(&ctx.lock_dir, &targets, &message, dispatch(&ctx, &command)).await
    } else {
        dispatch(&ctx, &command).await
    }
}

async fn dispatch(ctx: &Context, command: &Command) -> Result<i32> {
    let deployer = ctx.deployer();
    match command {
        Command::Plan => {
            let plan = match deployer.validate(&ctx.configs).await {
                Ok(plan) => plan,
                Err(DeployError::Registry(e)) => {
                    warn!(error = %e, "ingress unreachable; registered routes not checked");
                    sequencer::plan(&ctx.configs)?
                }
                Err(e) => return Err(e.into()),
            };
            print!("{}", output::plan(&plan));
            Ok(0)
        }
        Command::Deploy => {
            service::dns::check_domains(&ctx.configs).await;
            match deployer.run(&ctx.configs).await {
                Ok(report) => {
                    print!("{}", output::report(&report));
                    Ok(0)
                }
                Err(failure) => Ok(rollout_failed(&failure)),
            }
        }
        Command::Setup => {
            service::dns::check_domains(&ctx.configs).await;
            match deployer.setup(&ctx.configs).await {
                Ok(report) => {
                    print!("{}", output::setup(&report));
                    Ok(0)
                }
                Err(failure) => Ok(rollout_failed(&failure)),
            }
        }
        Command::Remove { accessories } => {
            // reverse order so dependents go before what they were started after
            for cfg in ctx.configs.iter().rev() {
                let report = deployer.remove(cfg, *accessories).await?;
                print!("{}", output::removed(&cfg.service, &report));
            }
            Ok(0)
        }
        Command::Details => {
            for cfg in &ctx.configs {
                print!("{}", output::details(&deployer.details(cfg).await?));
            }
            Ok(0)
        }
        Command::Logs { lines, follow, host } => {
            let cfg = ctx.single("logs")?;
            let opts = LogOptions { lines: *lines, follow: *follow };
            for (host, out) in deployer.logs(cfg, host.as_deref(), &opts).await? {
                for line in out.stdout.lines().chain(out.stderr.lines()) {
                    println!("{host} | {line}");
                }
            }
            Ok(0)
        }
        Command::Exec { host, cmd } => {
            let cfg = ctx.single("exec")?;
            let cmd = cmd.join(" ");
            let mut status = 0;
            for (host, out) in deployer.exec(cfg, host.as_deref(), &cmd).await? {
                println!("== {host} (exit {})", out.status);
                print!("{}", out.stdout);
                eprint!("{}", out.stderr);
                if !out.success() {
                    status = out.status.max(1);
                }
            }
            Ok(status)
        }
        Command::Config => {
            for cfg in &ctx.configs {
                println!("# {}", cfg.service);
                print!("{}", toml::to_string_pretty(cfg)?);
                let missing: Vec<String> =
                    cfg.secret_names().into_iter().filter(|n| ctx.secrets.get(n).is_err()).collect();
                if !missing.is_empty() {
                    println!("# missing secrets: {}", missing.join(", "));
                }
                println!();
            }
            Ok(0)
        }
        Command::Lock(lock_cmd) => {
            for target in ctx.targets() {
                match lock_cmd {
                    LockCommand::Status => {
                        let info = lock::status(&ctx.lock_dir, &target).await?;
                        print!("{}", output::lock(&target, info.as_ref()));
                    }
                    LockCommand::Acquire { message } => {
                        // kept until `lock release`
                        let held = DeployLock::acquire(&ctx.lock_dir, &target, &lock::current_holder(), message.clone()).await?;
                        print!("{}", output::lock(&target, Some(held.info())));
                    }
                    LockCommand::Release => match lock::force_release(&ctx.lock_dir, &target).await? {
                        Some(info) => println!("{target}: released lock held by {}", info.holder),
                        None => println!("{target}: was not locked"),
                    },
                }
            }
            Ok(0)
        }
        Command::Accessory(AccessoryCommand::Boot { name }) => {
            let cfg = owner_of(&ctx.configs, name)?;
            let outcome = deployer.boot_accessory(cfg, name).await?;
            println!("{name} on {}: {} (ready after {} probe(s))", outcome.host, outcome.change.as_str(), outcome.attempts);
            Ok(0)
        }
        Command::Accessory(AccessoryCommand::Remove { name }) => {
            let cfg = owner_of(&ctx.configs, name)?;
            let existed = deployer.remove_accessory(cfg, name).await?;
            println!("{name}: {}", if existed { "removed" } else { "absent" });
            Ok(0)
        }
        Command::Init { .. } => Ok(0),
    }
}

/// First selected descriptor declaring accessory `name`.
fn owner_of<'a>(cfgs: &'a [DeployConfig], name: &str) -> Result<&'a DeployConfig> {
    cfgs.iter()
        .find(|c| c.accessories.contains_key(name))
        .ok_or_else(|| anyhow!("no selected descriptor declares accessory `{name}`"))
}
