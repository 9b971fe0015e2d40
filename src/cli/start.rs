use clap::Args;
use runtime::{Lifecycle, RuntimeConfig};

use super::Handler;
use crate::error::Result;

/// `start <id>`
#[derive(Debug, Args)]
pub struct StartCommand {
    id: String,
}

impl Handler for StartCommand {
    fn handler(&self, runtime: &RuntimeConfig) -> Result<()> {
        let lifecycle = Lifecycle::new(runtime.clone())?;
        lifecycle.start(&self.id)?;
        Ok(())
    }
}
