use clap::Args;
use runtime::{Lifecycle, RuntimeConfig};

use super::Handler;
use crate::error::Result;

/// `inspect <id>...`
#[derive(Debug, Args)]
pub struct InspectCommand {
    #[clap(required = true)]
    ids: Vec<String>,
}

impl Handler for InspectCommand {
    fn handler(&self, runtime: &RuntimeConfig) -> Result<()> {
        let lifecycle = Lifecycle::new(runtime.clone())?;
        for id in &self.ids {
            let container = lifecycle.state(id)?;
            println!("{}", serde_json::to_string_pretty(&container)?);
        }
        Ok(())
    }
}
