//! The lifecycle controller: implements `create`/`start`/`kill`/`delete`/
//! `state` by orchestrating the translator, mount resolver, monitor
//! driver, hook dispatcher, and cgroup helper against the store.
//!
//! Builds on a `Created` → `Running` → `Stopped` container state
//! machine persisted via `serde_json`, turning what was once a single
//! in-process status flag into the on-disk, cross-process state machine
//! the OCI runtime verbs require. Namespace and exec setup are the
//! engine's job, not this crate's; this controller only ever shells out
//! to the monitor and init helper binaries.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::PathBuf;
use std::time::Instant;

use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::cgroup;
use crate::config::{ContainerConfig, RuntimeConfig};
use crate::container::{Container, Status};
use crate::error::{Error, Result};
use crate::hooks::{self, Phase};
use crate::monitor::{self, MonitorArgs};
use crate::spec_utils;
use crate::store::Store;
use crate::translator;

/// The well-known marker `state`'s `running` check looks for in the init
/// process's environment once it has passed the sync FIFO barrier.
const INIT_READY_MARKER: &str = "LXCRI_INIT_READY=1";

pub struct Lifecycle {
    runtime: RuntimeConfig,
    store: Store,
}

impl Lifecycle {
    pub fn new(runtime: RuntimeConfig) -> Result<Self> {
        runtime.validate()?;
        crate::store::ensure_root(runtime.root())?;
        let store = Store::new(runtime.root().clone());
        Ok(Lifecycle { runtime, store })
    }

    /// List every container id currently in the store.
    pub fn list_ids(&self) -> Result<Vec<String>> {
        self.store.list_ids()
    }

    /// Create a container: translate the spec, materialize the runtime
    /// directory, spawn the monitor, and wait for `created`.
    pub fn create(&self, cfg: ContainerConfig) -> Result<Container> {
        let deadline = Instant::now() + self.runtime.timeouts().create;
        let id = cfg.id().to_string();

        let dir = self.store.create_dir(&id)?;
        match self.create_inner(&cfg, &dir, deadline) {
            Ok(container) => Ok(container),
            Err(e) => {
                // Any failure removes the partial runtime directory so a
                // retry with the same id isn't blocked by debris from the
                // failed attempt.
                let _ = self.store.remove_dir(&id);
                Err(e)
            }
        }
    }

    fn create_inner(
        &self,
        cfg: &ContainerConfig,
        dir: &std::path::Path,
        deadline: Instant,
    ) -> Result<Container> {
        let rootfs = cfg
            .spec()
            .root()
            .as_ref()
            .map(|r| cfg.bundle().join(r.path()))
            .ok_or_else(|| Error::InvalidSpec("spec.root is required".into()))?;

        let cgroup_dir = cfg
            .spec()
            .linux()
            .as_ref()
            .and_then(|l| l.cgroups_path().clone())
            .map(|p| {
                let stripped: PathBuf = p.strip_prefix("/").unwrap_or(&p).to_path_buf();
                PathBuf::from("/sys/fs/cgroup").join(stripped)
            })
            .unwrap_or_else(|| {
                PathBuf::from("/sys/fs/cgroup")
                    .join(self.runtime.payload_cgroup())
                    .join(cfg.id())
            });
        self.reject_duplicate_cgroup(&cgroup_dir, cfg.id())?;

        let mut translation = translator::translate(&self.runtime, cfg, &rootfs)?;

        let (pty_master, pty_slave) = match cfg.console_socket() {
            Some(_) => {
                let (master, slave_path) = monitor::allocate_pty()?;
                translation.entries.push(("console.path".to_string(), slave_path.clone()));
                let slave_file = OpenOptions::new().read(true).write(true).open(&slave_path)?;
                (Some(master), Some(std::os::fd::OwnedFd::from(slave_file)))
            }
            None => (None, None),
        };

        let config_path = dir.join("config");
        write_engine_config(&config_path, &translation.entries)?;

        let mut normalized_spec = spec_utils::with_default_cwd(cfg.spec());
        spec_utils::merge_essential_devices(&mut normalized_spec)?;
        if translation.dev_is_tmpfs {
            spec_utils::clear_devices(&mut normalized_spec);
        }
        fs::write(dir.join("config.json"), serde_json::to_vec_pretty(&normalized_spec)?)?;
        fs::write(
            dir.join("hooks.json"),
            serde_json::to_vec_pretty(&effective_hooks(&normalized_spec))?,
        )?;
        fs::write(
            dir.join("lxcri-init"),
            // Zero-byte anchor the runtime later bind-mounts the real init
            // binary over.
            b"",
        )?;

        if let Some(profile) = &translation.seccomp_profile {
            fs::write(dir.join("seccomp.conf"), profile)?;
        }

        let sync_fifo_path = dir.join("syncfifo");
        create_sync_fifo(&sync_fifo_path, !self.runtime.in_user_namespace())?;

        let mut container = Container::new(
            cfg.id(),
            cfg.bundle().clone(),
            rootfs,
            cgroup_dir,
            sync_fifo_path.clone(),
            Default::default(),
        );
        fs::write(
            dir.join("state.json"),
            serde_json::to_vec_pretty(&state_document(&container))?,
        )?;

        let args = MonitorArgs {
            container_id: cfg.id().to_string(),
            lxc_root: dir.to_path_buf(),
            config_path,
        };
        let monitor_bin = self.runtime.libexec().join("lxcri-monitor");
        let child = monitor::spawn(&monitor_bin, &args, pty_slave)?;
        container.set_monitor_pid(Some(child.id() as i32));

        if let (Some(console_socket), Some(master)) = (cfg.console_socket(), pty_master.as_ref()) {
            monitor::send_pty_over_console_socket(console_socket, master, deadline)?;
        }

        let sentinel = dir.join("created");
        let init_pid = monitor::wait_for_ready(&sentinel, deadline)?;
        container.set_init_pid(init_pid);

        let runtime_hooks: Vec<oci_spec::runtime::Hook> = vec![];
        let spec_hooks = cfg
            .spec()
            .hooks()
            .as_ref()
            .and_then(|h| h.create_runtime().clone())
            .unwrap_or_default();
        let state_json = serde_json::to_vec(&state_document(&container))?;
        hooks::run_phase(
            Phase::CreateRuntime,
            &runtime_hooks,
            &spec_hooks,
            &state_json,
            self.runtime.timeouts().hook,
            self.runtime.env_allowlist(),
        )?;

        container.transition(Status::Created)?;
        self.store.write_state(cfg.id(), &container)?;
        Ok(container)
    }

    /// Start a created container: unblock init via the sync FIFO, then run
    /// `poststart` hooks against the refreshed state.
    pub fn start(&self, id: &str) -> Result<Container> {
        let mut container: Container = self.store.load_state(id)?;
        if container.status() != Status::Created {
            return Err(Error::InvalidState(format!(
                "start requires state 'created', container '{}' is '{}'",
                id,
                container.status().as_str()
            )));
        }

        let mut fifo = OpenOptions::new().write(true).open(container.sync_fifo_path())?;
        fifo.write_all(&[0u8])?;

        container.transition(Status::Running)?;
        self.store.write_state(id, &container)?;

        let spec = self.load_bundle_spec(&container)?;
        let spec_hooks = spec
            .hooks()
            .as_ref()
            .and_then(|h| h.poststart().clone())
            .unwrap_or_default();
        let state_json = serde_json::to_vec(&state_document(&container))?;
        hooks::run_phase(
            Phase::Poststart,
            &[],
            &spec_hooks,
            &state_json,
            self.runtime.timeouts().hook,
            self.runtime.env_allowlist(),
        )?;

        Ok(container)
    }

    /// Report the container's current OCI state.
    pub fn state(&self, id: &str) -> Result<Container> {
        let mut container: Container = self.store.load_state(id)?;
        let mut changed = false;

        if container.status() == Status::Created && self.init_has_passed_barrier(&container)? {
            container.set_status(Status::Running);
            changed = true;
        }
        if container.status() == Status::Running && !self.init_is_alive(&container) {
            container.set_status(Status::Stopped);
            changed = true;
        }

        if changed {
            self.store.write_state(id, &container)?;
        }
        Ok(container)
    }

    /// Whether the container's init process is still alive, used by
    /// `state` to detect the `running` → `stopped` transition the engine
    /// itself doesn't report back to this controller directly.
    fn init_is_alive(&self, container: &Container) -> bool {
        match container.init_pid() {
            Some(pid) => PathBuf::from(format!("/proc/{pid}")).exists(),
            None => false,
        }
    }

    fn init_has_passed_barrier(&self, container: &Container) -> Result<bool> {
        let pid = match container.init_pid() {
            Some(pid) => pid,
            None => return Ok(false),
        };
        let environ_path = format!("/proc/{pid}/environ");
        let mut contents = String::new();
        match File::open(&environ_path) {
            Ok(mut f) => {
                f.read_to_string(&mut contents)?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        Ok(contents.split('\0').any(|var| var == INIT_READY_MARKER))
    }

    /// Send `signal` to the container's init process.
    pub fn kill(&self, id: &str, signal: Signal) -> Result<()> {
        let container: Container = self.store.load_state(id)?;
        if container.status() == Status::Stopped {
            return Err(Error::InvalidState(format!("container '{id}' is already stopped")));
        }
        let pid = container
            .init_pid()
            .ok_or_else(|| Error::InvalidState(format!("container '{id}' has no init pid recorded")))?;
        nix::sys::signal::kill(Pid::from_raw(pid), signal)?;
        Ok(())
    }

    /// Delete a container: optionally force-kill, wait for the monitor to
    /// exit and the cgroup to empty, run `poststop` hooks, and remove the
    /// runtime directory.
    pub fn delete(&self, id: &str, force: bool) -> Result<()> {
        let deadline = Instant::now() + self.runtime.timeouts().delete;
        let container: Container = self.store.load_state(id)?;

        if container.status() != Status::Stopped {
            if !force {
                return Err(Error::InvalidState(format!(
                    "container '{id}' is not stopped; use force to delete anyway"
                )));
            }
            if let Some(pid) = container.init_pid() {
                let _ = nix::sys::signal::kill(Pid::from_raw(pid), Signal::SIGKILL);
            }
        }

        if let Some(monitor_pid) = container.monitor_pid() {
            wait_for_exit(monitor_pid, deadline)?;
        }

        // rootfs.managed=0 means the engine leaves payload resources in
        // place; only the cgroup and runtime directory are this crate's to
        // clean up.
        match cgroup::wait_until_unpopulated(container.cgroup_dir(), deadline) {
            Ok(()) => {}
            Err(e) if matches!(e, Error::Timeout(_)) => {
                log::warn!("cgroup '{}' did not empty before deadline", container.cgroup_dir().display());
            }
            Err(e) => return Err(e),
        }
        cgroup::delete_cgroup(container.cgroup_dir())?;

        let spec = self.load_bundle_spec(&container)?;
        let spec_hooks = spec
            .hooks()
            .as_ref()
            .and_then(|h| h.poststop().clone())
            .unwrap_or_default();
        let state_json = serde_json::to_vec(&state_document(&container))?;
        if let Err(e) = hooks::run_phase(
            Phase::Poststop,
            &[],
            &spec_hooks,
            &state_json,
            self.runtime.timeouts().hook,
            self.runtime.env_allowlist(),
        ) {
            log::warn!("poststop hook error tolerated during delete: {e}");
        }

        self.store.remove_dir(id)?;
        Ok(())
    }

    /// Reload a container's spec from its bundle, for verbs that only
    /// receive an id and need hook definitions from the original spec.
    fn load_bundle_spec(&self, container: &Container) -> Result<oci_spec::runtime::Spec> {
        let path = container.bundle().join("config.json");
        oci_spec::runtime::Spec::load(path).map_err(Error::from)
    }

    /// Fail `create` if another live (not-yet-deleted) container already
    /// occupies `cgroup_dir`, matching the requirement that two containers
    /// sharing `linux.cgroups_path` cannot coexist.
    fn reject_duplicate_cgroup(&self, cgroup_dir: &std::path::Path, new_id: &str) -> Result<()> {
        for id in self.store.list_ids()? {
            if id == new_id {
                continue;
            }
            if let Ok(existing) = self.store.load_state::<Container>(&id) {
                if existing.cgroup_dir() == cgroup_dir {
                    return Err(Error::InvalidSpec(format!(
                        "cgroup path '{}' is already in use by container '{}'",
                        cgroup_dir.display(),
                        id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// The effective hooks map (runtime-prepended hooks, currently none, plus
/// the spec's own hooks by phase) persisted as `hooks.json` for inspection
/// and for hook re-dispatch by verbs that only receive a container id.
fn effective_hooks(spec: &oci_spec::runtime::Spec) -> serde_json::Value {
    serde_json::to_value(spec.hooks().clone().unwrap_or_default()).unwrap_or(serde_json::Value::Null)
}

fn wait_for_exit(pid: i32, deadline: Instant) -> Result<()> {
    let proc_path = PathBuf::from(format!("/proc/{pid}"));
    while proc_path.exists() {
        if Instant::now() >= deadline {
            return Err(Error::Timeout(deadline.saturating_duration_since(Instant::now())));
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
    Ok(())
}

fn create_sync_fifo(path: &std::path::Path, init_is_runtime_uid: bool) -> Result<()> {
    let mode = if init_is_runtime_uid { 0o600 } else { 0o666 };
    nix::unistd::mkfifo(path, nix::sys::stat::Mode::from_bits_truncate(mode))?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

fn write_engine_config(path: &std::path::Path, entries: &translator::Entries) -> Result<()> {
    let mut out = String::new();
    for (key, value) in entries {
        out.push_str(key);
        out.push_str(" = ");
        out.push_str(value);
        out.push('\n');
    }
    fs::write(path, out)?;
    Ok(())
}

/// The minimal OCI state document handed to hooks on stdin; the `state`
/// verb's own return value is the richer [`Container`] record.
fn state_document(container: &Container) -> serde_json::Value {
    serde_json::json!({
        "ociVersion": "1.0.2",
        "id": container.id(),
        "status": container.status().as_str(),
        "pid": container.init_pid(),
        "bundle": container.bundle(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_ready_marker_constant_matches_protocol() {
        assert_eq!(INIT_READY_MARKER, "LXCRI_INIT_READY=1");
    }

    #[test]
    fn duplicate_cgroup_path_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let store = Store::new(root.path());
        let lifecycle = Lifecycle {
            runtime: RuntimeConfig::default(),
            store: store.clone(),
        };

        let cgroup_dir = PathBuf::from("/sys/fs/cgroup/shared.slice");
        store.create_dir("c1").unwrap();
        store
            .write_state(
                "c1",
                &Container::new(
                    "c1",
                    PathBuf::from("/bundle"),
                    PathBuf::from("/bundle/rootfs"),
                    cgroup_dir.clone(),
                    PathBuf::from("/run/lxcri/c1/syncfifo"),
                    Default::default(),
                ),
            )
            .unwrap();

        lifecycle
            .reject_duplicate_cgroup(&cgroup_dir, "c1")
            .expect("a container must not conflict with itself");

        let err = lifecycle
            .reject_duplicate_cgroup(&cgroup_dir, "c2")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSpec(_)));
    }

    #[test]
    fn state_document_reports_container_fields() {
        let container = Container::new(
            "c1",
            PathBuf::from("/bundle"),
            PathBuf::from("/bundle/rootfs"),
            PathBuf::from("/sys/fs/cgroup/lxcri-payload.scope/c1"),
            PathBuf::from("/run/lxcri/c1/syncfifo"),
            Default::default(),
        );
        let doc = state_document(&container);
        assert_eq!(doc["id"], "c1");
        assert_eq!(doc["status"], "creating");
    }
}
