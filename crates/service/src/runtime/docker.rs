use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{CommandOutput, ContainerRuntime, LogOptions, ReadinessCheck, RegistryLogin};
use crate::container::{ContainerSpec, ContainerState, LABEL_FINGERPRINT};
use crate::errors::DeployError;

/// Docker CLI driver. Local hosts run `docker` directly; other hosts go through `ssh`.
#[derive(Debug, Clone)]
pub struct DockerCli {
    ssh_user: Option<String>,
    docker_bin: String,
    http: reqwest::Client,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new(None)
    }
}

fn is_local(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1" | "local")
}

/// Quote for a POSIX shell unless the word is plainly safe.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Arguments for `docker run` that create `spec` detached. Secret env is
/// read from stdin, see [`secret_env_file`], and never appears on the argv.
pub fn run_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "run".into(),
        "--detach".into(),
        "--name".into(),
        spec.name.clone(),
        "--restart".into(),
        "unless-stopped".into(),
    ];
    for (k, v) in spec.labels() {
        args.push("--label".into());
        args.push(format!("{k}={v}"));
    }
    for (k, v) in spec.env.iter().filter(|(k, _)| !spec.secret_keys.contains(*k)) {
        args.push("--env".into());
        args.push(format!("{k}={v}"));
    }
    if spec.secret_keys.iter().any(|k| spec.env.contains_key(k)) {
        args.push("--env-file".into());
        args.push("/dev/stdin".into());
    }
    for (host, container) in &spec.ports {
        args.push("--publish".into());
        args.push(format!("{host}:{container}"));
    }
    for (host, container) in &spec.volumes {
        args.push("--volume".into());
        args.push(format!("{host}:{container}"));
    }
    args.push(spec.image.clone());
    if let Some(cmd) = &spec.cmd {
        args.extend(cmd.split_whitespace().map(str::to_string));
    }
    args
}

/// Env-file body with the spec's secret env, fed to `docker run` on stdin.
pub fn secret_env_file(spec: &ContainerSpec) -> Result<Option<String>, DeployError> {
    let mut body = String::new();
    for key in &spec.secret_keys {
        let Some(value) = spec.env.get(key) else { continue };
        if value.contains('\n') || value.contains('\r') {
            return Err(DeployError::Secrets(format!("secret `{key}` spans several lines")));
        }
        body.push_str(&format!("{key}={value}\n"));
    }
    Ok((!body.is_empty()).then_some(body))
}

/// Parse one `docker inspect --format '{{json .}}'` document.
pub fn parse_inspect(raw: &str) -> Result<ContainerState, DeployError> {
    let v: Value = serde_json::from_str(raw.trim())
        .map_err(|e| DeployError::runtime("inspect", format!("unexpected inspect output: {e}")))?;
    let str_at = |ptr: &str| v.pointer(ptr).and_then(Value::as_str).map(str::to_string);
    let label_ptr = format!("/Config/Labels/{}", LABEL_FINGERPRINT.replace('~', "~0").replace('/', "~1"));
    Ok(ContainerState {
        name: str_at("/Name").unwrap_or_default().trim_start_matches('/').to_string(),
        image: str_at("/Config/Image").unwrap_or_default(),
        running: v.pointer("/State/Running").and_then(Value::as_bool).unwrap_or(false),
        status: str_at("/State/Status").unwrap_or_else(|| "unknown".into()),
        fingerprint: str_at(&label_ptr),
        health: str_at("/State/Health/Status"),
    })
}

impl DockerCli {
    pub fn new(ssh_user: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { ssh_user, docker_bin: "docker".into(), http }
    }

    /// Program and arguments that run `program args..` on `host`.
    pub fn command_line(&self, host: &str, program: &str, args: &[String]) -> (String, Vec<String>) {
        if is_local(host) {
            return (program.to_string(), args.to_vec());
        }
        let dest = match &self.ssh_user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        };
        let mut remote = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            dest,
            "--".to_string(),
            shell_quote(program),
        ];
        remote.extend(args.iter().map(|a| shell_quote(a)));
        ("ssh".to_string(), remote)
    }

    async fn run(
        &self,
        host: &str,
        program: &str,
        args: &[String],
        stdin: Option<&str>,
        redact: &[&str],
    ) -> Result<CommandOutput, DeployError> {
        let (bin, argv) = self.command_line(host, program, args);
        let mut shown = format!("{bin} {}", argv.join(" "));
        for secret in redact.iter().filter(|s| !s.is_empty()) {
            shown = shown.replace(secret, "[redacted]");
        }
        debug!(%host, command = %shown, "running");

        let mut cmd = Command::new(&bin);
        cmd.args(&argv)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd
            .spawn()
            .map_err(|e| DeployError::runtime(host, format!("failed to spawn {bin}: {e}")))?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
            drop(pipe);
        }
        let output = child.wait_with_output().await?;
        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn docker(&self, host: &str, args: &[String]) -> Result<CommandOutput, DeployError> {
        let bin = self.docker_bin.clone();
        self.run(host, &bin, args, None, &[]).await
    }

    async fn docker_ok(
        &self,
        host: &str,
        args: &[String],
        stdin: Option<&str>,
        redact: &[&str],
    ) -> Result<CommandOutput, DeployError> {
        let bin = self.docker_bin.clone();
        let out = self.run(host, &bin, args, stdin, redact).await?;
        if out.success() {
            Ok(out)
        } else {
            let mut reason = format!("docker {} exited with {}: {}", args.first().map(String::as_str).unwrap_or(""), out.status, out.stderr.trim());
            for secret in redact.iter().filter(|s| !s.is_empty()) {
                reason = reason.replace(secret, "[redacted]");
            }
            Err(DeployError::runtime(host, reason))
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn check(&self, host: &str) -> Result<String, DeployError> {
        let out = self
            .docker_ok(host, &strings(&["version", "--format", "{{.Server.Version}}"]), None, &[])
            .await?;
        Ok(out.stdout.trim().to_string())
    }

    async fn login(&self, host: &str, registry: &RegistryLogin) -> Result<(), DeployError> {
        let args = strings(&["login", registry.server.as_str(), "--username", registry.username.as_str(), "--password-stdin"]);
        let bin = self.docker_bin.clone();
        let out = self
            .run(host, &bin, &args, Some(registry.password.as_str()), &[registry.password.as_str()])
            .await?;
        if out.success() {
            info!(%host, registry = %registry.server, "registry login ok");
            Ok(())
        } else {
            Err(DeployError::RegistryAuth {
                registry: registry.server.clone(),
                reason: out.stderr.trim().replace(&registry.password, "[redacted]"),
            })
        }
    }

    async fn prepare_dirs(&self, host: &str, dirs: &[String]) -> Result<(), DeployError> {
        if dirs.is_empty() {
            return Ok(());
        }
        if is_local(host) {
            for d in dirs {
                tokio::fs::create_dir_all(d).await?;
            }
            return Ok(());
        }
        let mut args = vec!["-p".to_string()];
        args.extend(dirs.iter().cloned());
        let out = self.run(host, "mkdir", &args, None, &[]).await?;
        if out.success() {
            Ok(())
        } else {
            Err(DeployError::runtime(host, format!("mkdir failed: {}", out.stderr.trim())))
        }
    }

    async fn inspect(&self, host: &str, name: &str) -> Result<Option<ContainerState>, DeployError> {
        let out = self
            .docker(host, &strings(&["inspect", "--type", "container", "--format", "{{json .}}", name]))
            .await?;
        if out.success() {
            return parse_inspect(&out.stdout).map(Some);
        }
        if out.stderr.contains("No such") {
            Ok(None)
        } else {
            Err(DeployError::runtime(host, format!("inspect {name}: {}", out.stderr.trim())))
        }
    }

    async fn start(&self, host: &str, spec: &ContainerSpec) -> Result<(), DeployError> {
        let secrets: Vec<&str> = spec
            .secret_keys
            .iter()
            .filter_map(|k| spec.env.get(k).map(String::as_str))
            .collect();
        let env_file = secret_env_file(spec)?;
        self.docker_ok(host, &strings(&["pull", spec.image.as_str()]), None, &[]).await?;
        self.remove(host, &spec.name).await?;
        self.docker_ok(host, &run_args(spec), env_file.as_deref(), &secrets).await?;
        info!(%host, container = %spec.name, image = %spec.image, "container started");
        Ok(())
    }

    async fn remove(&self, host: &str, name: &str) -> Result<bool, DeployError> {
        let out = self.docker(host, &strings(&["rm", "--force", name])).await?;
        if out.success() {
            return Ok(true);
        }
        if out.stderr.contains("No such") {
            Ok(false)
        } else {
            Err(DeployError::runtime(host, format!("rm {name}: {}", out.stderr.trim())))
        }
    }

    async fn probe(&self, host: &str, check: &ReadinessCheck) -> Result<bool, DeployError> {
        match check {
            ReadinessCheck::Running { container } => Ok(self
                .inspect(host, container)
                .await?
                .map(|s| s.running && s.health.as_deref().map_or(true, |h| h == "healthy"))
                .unwrap_or(false)),
            ReadinessCheck::Exec { container, cmd } => {
                let out = self.exec(host, container, cmd).await?;
                Ok(out.success())
            }
            ReadinessCheck::Http { url } => match self.http.get(url).send().await {
                Ok(resp) => Ok(resp.status().is_success()),
                Err(e) => {
                    debug!(%url, error = %e, "health probe failed");
                    Ok(false)
                }
            },
        }
    }

    async fn exec(&self, host: &str, container: &str, cmd: &str) -> Result<CommandOutput, DeployError> {
        self.docker(host, &strings(&["exec", container, "sh", "-c", cmd])).await
    }

    async fn logs(&self, host: &str, container: &str, opts: &LogOptions) -> Result<CommandOutput, DeployError> {
        let mut args = strings(&["logs", "--timestamps"]);
        if let Some(n) = opts.lines {
            args.push("--tail".into());
            args.push(n.to_string());
        }
        if !opts.follow {
            args.push(container.to_string());
            return self.docker(host, &args).await;
        }
        args.push("--follow".into());
        args.push(container.to_string());
        let bin = self.docker_bin.clone();
        let (program, argv) = self.command_line(host, &bin, &args);
        let status = Command::new(&program)
            .args(&argv)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| DeployError::runtime(host, format!("failed to spawn {program}: {e}")))?;
        if !status.success() {
            warn!(%host, %container, "log stream ended with {status}");
        }
        Ok(CommandOutput { status: status.code().unwrap_or(-1), ..Default::default() })
    }
}
