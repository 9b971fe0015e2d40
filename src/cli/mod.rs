mod config;
mod create;
mod delete;
mod exec;
mod inspect;
mod kill;
mod list;
mod start;
mod state;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use runtime::RuntimeConfig;

use crate::error::Result;

/// Trait every verb handler implements, executed synchronously to
/// completion.
pub trait Handler {
    fn handler(&self, runtime: &RuntimeConfig) -> Result<()>;
}

#[derive(Parser, Debug)]
#[clap(version, author)]
pub struct Cli {
    /// Verbosity; repeat for more detail.
    #[clap(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Runtime store root directory.
    #[clap(long, env = "LXCRI_ROOT")]
    pub root: Option<PathBuf>,

    /// Directory holding the monitor/init/start helper binaries.
    #[clap(long, env = "LXCRI_LIBEXEC")]
    pub libexec: Option<PathBuf>,

    /// Runtime's own log file; defaults to stderr.
    #[clap(long, env = "LXCRI_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Runtime's own log level.
    #[clap(long, env = "LXCRI_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Per-container log file, passed through to the monitor.
    #[clap(long, env = "LXCRI_CONTAINER_LOG_FILE")]
    pub container_log_file: Option<PathBuf>,

    /// Per-container log level, passed through to the monitor.
    #[clap(long, env = "LXCRI_CONTAINER_LOG_LEVEL")]
    pub container_log_level: Option<String>,

    #[clap(long, env = "LXCRI_SECCOMP")]
    pub seccomp: Option<bool>,

    #[clap(long, env = "LXCRI_CAPABILITIES")]
    pub capabilities: Option<bool>,

    #[clap(long, env = "LXCRI_APPARMOR")]
    pub apparmor: Option<bool>,

    #[clap(long, env = "LXCRI_CGROUP_DEVICES")]
    pub cgroup_devices: Option<bool>,

    /// Override the `create` verb's deadline, in seconds.
    #[clap(long, env = "LXCRI_CREATE_TIMEOUT")]
    pub create_timeout: Option<u64>,

    /// Override the `start` verb's deadline, in seconds.
    #[clap(long, env = "LXCRI_START_TIMEOUT")]
    pub start_timeout: Option<u64>,

    /// Override the `kill` verb's deadline, in seconds.
    #[clap(long, env = "LXCRI_KILL_TIMEOUT")]
    pub kill_timeout: Option<u64>,

    /// Override the `delete` verb's deadline, in seconds.
    #[clap(long, env = "LXCRI_DELETE_TIMEOUT")]
    pub delete_timeout: Option<u64>,

    #[clap(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Build the effective [`RuntimeConfig`] by overlaying the config
    /// file, then these CLI/env flags, onto the library defaults.
    pub fn runtime_config(&self) -> Result<RuntimeConfig> {
        let mut config = crate::config_file::load_overlay(RuntimeConfig::default())?;

        if let Some(root) = &self.root {
            config.set_root(root.clone());
        }
        if let Some(libexec) = &self.libexec {
            config.set_libexec(libexec.clone());
        }
        if let Some(log_file) = &self.log_file {
            config.set_log_file(Some(log_file.clone()));
        }
        if let Some(log_level) = &self.log_level {
            config.set_log_level(log_level.clone());
        }

        let mut features = config.features();
        if let Some(v) = self.seccomp {
            features.seccomp = v;
        }
        if let Some(v) = self.capabilities {
            features.capabilities = v;
        }
        if let Some(v) = self.apparmor {
            features.apparmor = v;
        }
        if let Some(v) = self.cgroup_devices {
            features.cgroup_devices = v;
        }
        config.set_features(features);

        let mut timeouts = config.timeouts();
        if let Some(secs) = self.create_timeout {
            timeouts.create = std::time::Duration::from_secs(secs);
        }
        if let Some(secs) = self.start_timeout {
            timeouts.start = std::time::Duration::from_secs(secs);
        }
        if let Some(secs) = self.kill_timeout {
            timeouts.kill = std::time::Duration::from_secs(secs);
        }
        if let Some(secs) = self.delete_timeout {
            timeouts.delete = std::time::Duration::from_secs(secs);
        }
        config.set_timeouts(timeouts);

        Ok(config)
    }

    pub fn handler(&self) -> &dyn Handler {
        match &self.command {
            Command::Create(cmd) => cmd,
            Command::Start(cmd) => cmd,
            Command::State(cmd) => cmd,
            Command::Kill(cmd) => cmd,
            Command::Delete(cmd) => cmd,
            Command::Exec(cmd) => cmd,
            Command::List(cmd) => cmd,
            Command::Inspect(cmd) => cmd,
            Command::Config(cmd) => cmd,
        }
    }
}

/// The OCI-compatible verb set.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a container from a bundle.
    Create(create::CreateCommand),
    /// Start a created container.
    Start(start::StartCommand),
    /// Report a container's current state.
    State(state::StateCommand),
    /// Send a signal to a container's init process.
    Kill(kill::KillCommand),
    /// Delete a stopped (or, with --force, any) container.
    Delete(delete::DeleteCommand),
    /// Execute an additional process in a running container.
    Exec(exec::ExecCommand),
    /// List known containers.
    List(list::ListCommand),
    /// Show a container's full persisted state.
    Inspect(inspect::InspectCommand),
    /// View or update the effective runtime configuration.
    Config(config::ConfigCommand),
}
