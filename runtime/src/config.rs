use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use getset::{CopyGetters, Getters, Setters};
use oci_spec::runtime::{LinuxNamespaceType, Spec};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Feature toggles the runtime can be compiled/run with.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Features {
    pub seccomp: bool,
    pub capabilities: bool,
    pub apparmor: bool,
    pub cgroup_devices: bool,
}

impl Features {
    /// The feature set a full, unrestricted runtime is expected to run with.
    pub fn all_enabled() -> Self {
        Features {
            seccomp: true,
            capabilities: true,
            apparmor: true,
            cgroup_devices: true,
        }
    }
}

/// Per-verb timeouts, all individually overridable by a single call.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Timeouts {
    pub create: Duration,
    pub start: Duration,
    pub kill: Duration,
    pub delete: Duration,
    pub hook: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            create: Duration::from_secs(60),
            start: Duration::from_secs(30),
            kill: Duration::from_secs(10),
            delete: Duration::from_secs(30),
            hook: Duration::from_secs(30),
        }
    }
}

/// Process-wide runtime configuration, set once before any verb is invoked.
///
/// Threaded explicitly through every verb rather than read from a process
/// singleton, so concurrent `lxcri` invocations never contend on shared
/// global state.
#[derive(Clone, Debug, Getters, CopyGetters, Setters, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Directory under which every container's runtime store lives.
    #[getset(get = "pub", set = "pub")]
    root: PathBuf,

    /// Directory holding the monitor, init, and hook-runner helper binaries.
    #[getset(get = "pub", set = "pub")]
    libexec: PathBuf,

    /// Cgroup path the monitor process itself is placed under.
    #[getset(get = "pub", set = "pub")]
    monitor_cgroup: PathBuf,

    /// Default cgroup path new payload containers are placed under absent an
    /// explicit `linux.cgroups_path` in their spec.
    #[getset(get = "pub", set = "pub")]
    payload_cgroup: PathBuf,

    #[getset(get_copy = "pub", set = "pub")]
    features: Features,

    /// Environment variable names that are allowed to pass from the runtime
    /// process into hook invocations and the init process.
    #[getset(get = "pub", set = "pub")]
    env_allowlist: Vec<String>,

    /// Path to the runtime's own log file; `None` logs to stderr.
    #[getset(get = "pub", set = "pub")]
    log_file: Option<PathBuf>,

    #[getset(get = "pub", set = "pub")]
    log_level: String,

    #[getset(get_copy = "pub", set = "pub")]
    timeouts: Timeouts,

    /// True when the runtime process is itself already running inside a
    /// pre-configured user namespace.
    #[getset(get_copy = "pub", set = "pub")]
    in_user_namespace: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            root: PathBuf::from("/run/lxcri"),
            libexec: PathBuf::from("/usr/libexec/lxcri"),
            monitor_cgroup: PathBuf::from("lxcri-monitor.scope"),
            payload_cgroup: PathBuf::from("lxcri-payload.scope"),
            features: Features::all_enabled(),
            env_allowlist: vec!["HOME".into(), "PATH".into(), "TERM".into()],
            log_file: None,
            log_level: "info".into(),
            timeouts: Timeouts::default(),
            in_user_namespace: false,
        }
    }
}

const MIN_ENGINE_VERSION: (u32, u32) = (3, 1);

impl RuntimeConfig {
    /// Validate that the configured paths exist, are appropriately
    /// permissioned, and that the process environment is runnable, before
    /// any verb runs.
    pub fn validate(&self) -> Result<()> {
        if !self.root.exists() {
            return Err(Error::InvalidSpec(format!(
                "runtime root {} does not exist",
                self.root.display()
            )));
        }
        let root_mode = fs::metadata(&self.root)?.permissions().mode() & 0o777;
        if root_mode & !0o711 != 0 {
            return Err(Error::InvalidSpec(format!(
                "runtime root {} must be mode 0711 or tighter, found {:o}",
                self.root.display(),
                root_mode
            )));
        }
        for helper in ["lxcri-monitor", "lxcri-init", "lxcri-start"] {
            let path = self.libexec.join(helper);
            let metadata = fs::metadata(&path).map_err(|_| {
                Error::InvalidSpec(format!("libexec helper {} is missing", path.display()))
            })?;
            if metadata.permissions().mode() & 0o111 == 0 {
                return Err(Error::InvalidSpec(format!(
                    "libexec helper {} is not executable",
                    path.display()
                )));
            }
        }
        if !Path::new("/proc/self").exists() {
            return Err(Error::InvalidSpec("/proc is not mounted".into()));
        }
        Ok(())
    }

    /// Returns the engine's minimum supported version, for diagnostics.
    pub fn min_engine_version() -> (u32, u32) {
        MIN_ENGINE_VERSION
    }

    /// Path to a container's runtime store directory.
    pub fn container_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }
}

/// Per-container configuration supplied to `create`.
#[derive(Getters, Setters)]
pub struct ContainerConfig {
    #[getset(get = "pub")]
    id: String,

    #[getset(get = "pub")]
    bundle: PathBuf,

    #[getset(get = "pub", set = "pub")]
    spec: Spec,

    #[getset(get = "pub", set = "pub")]
    console_socket: Option<PathBuf>,

    #[getset(get = "pub", set = "pub")]
    log_file: Option<PathBuf>,

    #[getset(get = "pub", set = "pub")]
    log_level: String,

    #[getset(get_copy = "pub", set = "pub")]
    systemd_cgroup: bool,
}

impl ContainerConfig {
    pub fn new(id: impl Into<String>, bundle: impl Into<PathBuf>, mut spec: Spec) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidSpec("container id must not be empty".into()));
        }

        if spec.process().as_ref().map_or(true, |p| {
            p.args().as_ref().map_or(true, |a| a.is_empty())
        }) {
            return Err(Error::InvalidSpec("spec.process.args must not be empty".into()));
        }

        let root_path = spec
            .root()
            .as_ref()
            .map(|r| r.path().clone())
            .unwrap_or_default();
        if root_path.as_os_str().is_empty() {
            return Err(Error::InvalidSpec("spec.root.path must not be empty".into()));
        }

        let has_mount_namespace = spec
            .linux()
            .as_ref()
            .and_then(|l| l.namespaces().as_ref())
            .map_or(false, |namespaces| {
                namespaces.iter().any(|n| *n.typ() == LinuxNamespaceType::Mount)
            });
        if !has_mount_namespace {
            return Err(Error::InvalidSpec(
                "mount namespace shared with runtime".into(),
            ));
        }

        // `spec.process.cwd` is defaulted to `/` when `config.json` is
        // written (`spec_utils::with_default_cwd`) rather than mutated
        // here, so `ContainerConfig::spec` always reflects exactly what
        // the caller supplied.
        Ok(ContainerConfig {
            id,
            bundle: bundle.into(),
            spec,
            console_socket: None,
            log_file: None,
            log_level: "info".into(),
            systemd_cgroup: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec_utils::default_spec;
    use tempfile::tempdir;

    fn make_helper(path: &std::path::Path, executable: bool) {
        fs::write(path, b"").unwrap();
        let mode = if executable { 0o755 } else { 0o644 };
        fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap();
    }

    fn valid_runtime(root: &std::path::Path, libexec: &std::path::Path) -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.set_root(root.to_path_buf());
        config.set_libexec(libexec.to_path_buf());
        config
    }

    #[test]
    fn validate_rejects_world_writable_root() {
        let root = tempdir().unwrap();
        fs::set_permissions(root.path(), std::fs::Permissions::from_mode(0o777)).unwrap();
        let libexec = tempdir().unwrap();
        for helper in ["lxcri-monitor", "lxcri-init", "lxcri-start"] {
            make_helper(&libexec.path().join(helper), true);
        }

        let config = valid_runtime(root.path(), libexec.path());
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidSpec(_)));
    }

    #[test]
    fn validate_rejects_non_executable_helper() {
        let root = tempdir().unwrap();
        fs::set_permissions(root.path(), std::fs::Permissions::from_mode(0o700)).unwrap();
        let libexec = tempdir().unwrap();
        make_helper(&libexec.path().join("lxcri-monitor"), false);
        make_helper(&libexec.path().join("lxcri-init"), true);
        make_helper(&libexec.path().join("lxcri-start"), true);

        let config = valid_runtime(root.path(), libexec.path());
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidSpec(_)));
    }

    #[test]
    fn validate_accepts_tight_root_and_executable_helpers() {
        let root = tempdir().unwrap();
        fs::set_permissions(root.path(), std::fs::Permissions::from_mode(0o700)).unwrap();
        let libexec = tempdir().unwrap();
        for helper in ["lxcri-monitor", "lxcri-init", "lxcri-start"] {
            make_helper(&libexec.path().join(helper), true);
        }

        let config = valid_runtime(root.path(), libexec.path());
        config.validate().unwrap();
    }

    #[test]
    fn new_rejects_spec_with_no_mount_namespace() {
        let mut spec = default_spec().unwrap();
        spec.set_linux(None);
        let err = ContainerConfig::new("c1", "/bundle", spec).unwrap_err();
        assert!(matches!(err, Error::InvalidSpec(_)));
    }

    #[test]
    fn new_accepts_spec_with_mount_namespace() {
        let spec = default_spec().unwrap();
        ContainerConfig::new("c1", "/bundle", spec).unwrap();
    }
}
