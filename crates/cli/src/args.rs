//! Command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

/// Options accepted before or after the command.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalOptions {
    /// Descriptor file, repeatable; order is kept (env DEPLOY_CONFIG)
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true, action = ArgAction::Append)]
    pub configs: Vec<String>,
    /// Secrets file (env DEPLOY_SECRETS, default .secrets)
    #[arg(long, value_name = "PATH", global = true)]
    pub secrets: Option<PathBuf>,
    /// Local state directory (env DEPLOY_STATE_DIR, default .deploy)
    #[arg(long, value_name = "PATH", global = true)]
    pub state_dir: Option<PathBuf>,
    /// ssh user for remote hosts (env DEPLOY_SSH_USER)
    #[arg(long, value_name = "USER", global = true)]
    pub ssh_user: Option<String>,
    /// Restrict to these services, repeatable or comma separated
    #[arg(
        short = 's',
        long = "service",
        value_name = "NAME",
        global = true,
        action = ArgAction::Append,
        value_delimiter = ','
    )]
    pub services: Vec<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum LockCommand {
    /// Show who holds the target lock
    Status,
    /// Hold the target lock until `lock release`
    Acquire {
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Clear the target lock whoever holds it
    Release,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum AccessoryCommand {
    Boot { name: String },
    Remove { name: String },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Write example descriptors and a .secrets.example
    Init {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
    /// Check hosts, boot accessories, then deploy
    Setup,
    /// Roll out services in order
    Deploy,
    /// Show rollout order, accessories and routes
    Plan,
    /// Deregister routes and remove containers
    Remove {
        #[arg(long)]
        accessories: bool,
    },
    /// Container state and registered route
    Details,
    /// Service container logs
    Logs {
        #[arg(short = 'n', long)]
        lines: Option<u32>,
        #[arg(short, long)]
        follow: bool,
        #[arg(long)]
        host: Option<String>,
    },
    /// Run a command in the service container: `deploy exec -- bin/migrate`
    Exec {
        #[arg(long)]
        host: Option<String>,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        cmd: Vec<String>,
    },
    /// Print resolved descriptors
    Config,
    #[command(subcommand)]
    Lock(LockCommand),
    #[command(subcommand)]
    Accessory(AccessoryCommand),
}

impl Command {
    /// Commands that change hosts or the ingress and therefore hold the target lock.
    pub fn needs_lock(&self) -> bool {
        matches!(
            self,
            Command::Setup
                | Command::Deploy
                | Command::Remove { .. }
                | Command::Accessory(_)
        )
    }
}

/// Multi-service rollouts behind a shared ingress.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "deploy", version, arg_required_else_help = true)]
pub struct Invocation {
    #[command(flatten)]
    pub global: GlobalOptions,
    #[command(subcommand)]
    pub command: Command,
}

/// Parse the arguments after the program name.
pub fn parse(args: &[String]) -> Result<Invocation, clap::Error> {
    Invocation::try_parse_from(std::iter::once("deploy").chain(args.iter().map(String::as_str)))
}
