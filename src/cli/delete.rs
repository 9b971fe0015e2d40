use clap::Args;
use runtime::{Lifecycle, RuntimeConfig};

use super::Handler;
use crate::error::Result;

/// `delete <id> [--force]`
#[derive(Debug, Args)]
pub struct DeleteCommand {
    id: String,

    /// Delete the container even if it isn't stopped.
    #[clap(short, long)]
    force: bool,
}

impl Handler for DeleteCommand {
    fn handler(&self, runtime: &RuntimeConfig) -> Result<()> {
        let lifecycle = Lifecycle::new(runtime.clone())?;
        lifecycle.delete(&self.id, self.force)?;
        Ok(())
    }
}
