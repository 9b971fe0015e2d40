use std::str::FromStr;

use clap::Args;
use nix::sys::signal::Signal;
use runtime::{Lifecycle, RuntimeConfig};

use super::Handler;
use crate::error::{Error, Result};

/// `kill <id> <signal>`
#[derive(Debug, Args)]
pub struct KillCommand {
    id: String,

    /// Signal name (e.g. `SIGTERM`, `TERM`) or number.
    signal: String,
}

impl Handler for KillCommand {
    fn handler(&self, runtime: &RuntimeConfig) -> Result<()> {
        let signal = parse_signal(&self.signal)?;
        let lifecycle = Lifecycle::new(runtime.clone())?;
        lifecycle.kill(&self.id, signal)?;
        Ok(())
    }
}

fn parse_signal(raw: &str) -> Result<Signal> {
    if let Ok(number) = raw.parse::<i32>() {
        return Signal::try_from(number).map_err(|_| Error::UnknownSignal(raw.to_string()));
    }
    let normalized = if raw.to_uppercase().starts_with("SIG") {
        raw.to_uppercase()
    } else {
        format!("SIG{}", raw.to_uppercase())
    };
    Signal::from_str(&normalized).map_err(|_| Error::UnknownSignal(raw.to_string()))
}
