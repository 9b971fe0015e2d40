//! YAML config file overlay: loads from `LXCRI_CONFIG`, then
//! `$HOME/.config/lxcri.yaml`, then `/etc/lxcri/lxcri.yaml`, and overlays
//! onto [`RuntimeConfig::default`]. CLI flags, applied afterwards by the
//! caller, take final precedence.

use std::path::PathBuf;

use runtime::RuntimeConfig;
use serde::Deserialize;

use crate::error::Result;

/// The subset of [`RuntimeConfig`] a YAML file is allowed to override.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFileOverlay {
    root: Option<PathBuf>,
    libexec: Option<PathBuf>,
    log_file: Option<PathBuf>,
    log_level: Option<String>,
    seccomp: Option<bool>,
    capabilities: Option<bool>,
    apparmor: Option<bool>,
    cgroup_devices: Option<bool>,
}

impl ConfigFileOverlay {
    pub fn apply(self, mut config: RuntimeConfig) -> RuntimeConfig {
        if let Some(root) = self.root {
            config.set_root(root);
        }
        if let Some(libexec) = self.libexec {
            config.set_libexec(libexec);
        }
        if let Some(log_file) = self.log_file {
            config.set_log_file(Some(log_file));
        }
        if let Some(log_level) = self.log_level {
            config.set_log_level(log_level);
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
        config
    }
}

/// Locate the first config file that exists, in precedence order, or
/// `None` if none of the candidates are present.
pub fn locate() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("LXCRI_CONFIG") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }
    if let Some(home) = std::env::var_os("HOME") {
        let path = PathBuf::from(home).join(".config/lxcri.yaml");
        if path.exists() {
            return Some(path);
        }
    }
    let system = PathBuf::from("/etc/lxcri/lxcri.yaml");
    if system.exists() {
        return Some(system);
    }
    None
}

/// Load and overlay the config file found by [`locate`], if any, onto
/// `base`.
pub fn load_overlay(base: RuntimeConfig) -> Result<RuntimeConfig> {
    match locate() {
        Some(path) => {
            let contents = std::fs::read_to_string(&path)?;
            let overlay: ConfigFileOverlay = serde_yaml::from_str(&contents)?;
            Ok(overlay.apply(base))
        }
        None => Ok(base),
    }
}
