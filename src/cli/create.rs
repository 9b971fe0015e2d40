use std::path::PathBuf;

use clap::Args;
use oci_spec::runtime::Spec;
use runtime::{ContainerConfig, Lifecycle, RuntimeConfig};

use super::Handler;
use crate::error::Result;

const BUNDLE_CONFIG: &str = "config.json";

/// `create <id> --bundle <dir> [--console-socket <path>] [--pid-file <path>]`
#[derive(Debug, Args)]
pub struct CreateCommand {
    /// The container id.
    id: String,

    /// Path to the OCI bundle directory containing `config.json`.
    #[clap(short, long)]
    bundle: PathBuf,

    /// Path to a unix socket the monitor will send the container's PTY
    /// master fd over, for interactive containers.
    #[clap(long)]
    console_socket: Option<PathBuf>,

    /// Write the container's init pid to this file on success.
    #[clap(long)]
    pid_file: Option<PathBuf>,
}

impl Handler for CreateCommand {
    fn handler(&self, runtime: &RuntimeConfig) -> Result<()> {
        let spec = Spec::load(self.bundle.join(BUNDLE_CONFIG))?;
        let mut cfg = ContainerConfig::new(self.id.clone(), self.bundle.clone(), spec)?;
        cfg.set_console_socket(self.console_socket.clone());

        let lifecycle = Lifecycle::new(runtime.clone())?;
        let container = lifecycle.create(cfg)?;

        if let Some(pid_file) = &self.pid_file {
            if let Some(pid) = container.init_pid() {
                std::fs::write(pid_file, pid.to_string())?;
            }
        }

        Ok(())
    }
}
