use std::path::PathBuf;

use clap::Args;
use runtime::RuntimeConfig;
use serde::Serialize;

use super::Handler;
use crate::error::Result;

/// `config [--update|--out <path>]`
#[derive(Debug, Args)]
pub struct ConfigCommand {
    /// Persist the effective configuration back to the config file that
    /// was loaded (or the default user config path if none was).
    #[clap(long)]
    update: bool,

    /// Write the effective configuration to this path instead of stdout.
    #[clap(long)]
    out: Option<PathBuf>,
}

#[derive(Serialize)]
struct EffectiveConfig<'a> {
    root: &'a PathBuf,
    libexec: &'a PathBuf,
    log_file: &'a Option<PathBuf>,
    log_level: &'a str,
    seccomp: bool,
    capabilities: bool,
    apparmor: bool,
    cgroup_devices: bool,
}

impl Handler for ConfigCommand {
    fn handler(&self, runtime: &RuntimeConfig) -> Result<()> {
        let features = runtime.features();
        let effective = EffectiveConfig {
            root: runtime.root(),
            libexec: runtime.libexec(),
            log_file: runtime.log_file(),
            log_level: runtime.log_level(),
            seccomp: features.seccomp,
            capabilities: features.capabilities,
            apparmor: features.apparmor,
            cgroup_devices: features.cgroup_devices,
        };
        let yaml = serde_yaml::to_string(&effective)?;

        let out_path = if self.update {
            Some(crate::config_file::locate().unwrap_or_else(default_user_config_path))
        } else {
            self.out.clone()
        };

        match out_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, yaml)?;
            }
            None => print!("{yaml}"),
        }
        Ok(())
    }
}

fn default_user_config_path() -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
    home.join(".config/lxcri.yaml")
}
