use clap::Args;
use runtime::{Lifecycle, RuntimeConfig};

use super::Handler;
use crate::error::Result;

/// `list`
#[derive(Debug, Args)]
pub struct ListCommand {}

impl Handler for ListCommand {
    fn handler(&self, runtime: &RuntimeConfig) -> Result<()> {
        let lifecycle = Lifecycle::new(runtime.clone())?;
        let mut ids = lifecycle.list_ids()?;
        ids.sort();
        for id in ids {
            match lifecycle.state(&id) {
                Ok(container) => println!("{}\t{}", container.id(), container.status().as_str()),
                Err(e) => log::warn!("skipping '{id}': {e}"),
            }
        }
        Ok(())
    }
}
