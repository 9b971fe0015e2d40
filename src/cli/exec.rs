use clap::Args;
use runtime::{Error as RuntimeError, Lifecycle, RuntimeConfig, Status};

use super::Handler;
use crate::error::Result;

/// `exec <id> <cmd...>`
///
/// Joining a running container's namespaces to execute an additional
/// process is the engine's job, not this crate's; this verb only
/// validates preconditions and reports that the actual attach must go
/// through the engine binary directly.
#[derive(Debug, Args)]
pub struct ExecCommand {
    id: String,

    #[clap(trailing_var_arg = true, required = true)]
    cmd: Vec<String>,
}

impl Handler for ExecCommand {
    fn handler(&self, runtime: &RuntimeConfig) -> Result<()> {
        let lifecycle = Lifecycle::new(runtime.clone())?;
        let container = lifecycle.state(&self.id)?;
        if container.status() != Status::Running {
            return Err(RuntimeError::InvalidState(format!(
                "exec requires state 'running', container '{}' is '{}'",
                self.id,
                container.status().as_str()
            ))
            .into());
        }
        Err(RuntimeError::EngineError(format!(
            "exec of '{}' into container '{}' requires attaching through the engine, which this crate does not implement",
            self.cmd.join(" "),
            self.id
        ))
        .into())
    }
}
