use clap::Args;
use runtime::{Lifecycle, RuntimeConfig};

use super::Handler;
use crate::error::Result;

/// `state <id>`
#[derive(Debug, Args)]
pub struct StateCommand {
    id: String,
}

impl Handler for StateCommand {
    fn handler(&self, runtime: &RuntimeConfig) -> Result<()> {
        let lifecycle = Lifecycle::new(runtime.clone())?;
        let container = lifecycle.state(&self.id)?;

        let doc = serde_json::json!({
            "ociVersion": "1.0.2",
            "id": container.id(),
            "status": container.status().as_str(),
            "pid": container.init_pid(),
            "bundle": container.bundle(),
            "annotations": container.annotations(),
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        Ok(())
    }
}
