//! The in-memory/on-disk `Container` handle: a container's id, its resolved
//! runtime paths, the monitor process's pid, its cgroup directory, and its
//! current lifecycle status, persisted as `lxcri.json` in its store
//! directory.

use std::path::PathBuf;
use std::time::SystemTime;

use getset::{CopyGetters, Getters, Setters};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lifecycle status of a container, per the OCI runtime state machine.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Creating,
    Created,
    Running,
    Stopped,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Creating => "creating",
            Status::Created => "created",
            Status::Running => "running",
            Status::Stopped => "stopped",
        }
    }

    /// Verbs valid from this status, used by the lifecycle controller to
    /// enforce preconditions.
    pub fn can_transition_to(&self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Creating, Status::Created)
                | (Status::Created, Status::Running)
                | (Status::Created, Status::Stopped)
                | (Status::Running, Status::Stopped)
        )
    }
}

/// Persisted container record: everything needed to act on a container
/// across separate `lxcri` process invocations.
#[derive(Clone, Debug, Serialize, Deserialize, Getters, CopyGetters, Setters)]
pub struct Container {
    #[getset(get = "pub")]
    id: String,

    #[getset(get = "pub")]
    bundle: PathBuf,

    #[getset(get = "pub")]
    rootfs: PathBuf,

    #[getset(get_copy = "pub", set = "pub")]
    status: Status,

    /// Pid of the monitor process driving this container's engine instance,
    /// `None` before `create` has spawned it.
    #[getset(get_copy = "pub", set = "pub")]
    monitor_pid: Option<i32>,

    /// Pid of the container's own init process, once known (reported by
    /// the engine after `start`).
    #[getset(get_copy = "pub", set = "pub")]
    init_pid: Option<i32>,

    #[getset(get = "pub")]
    cgroup_dir: PathBuf,

    #[getset(get = "pub")]
    sync_fifo_path: PathBuf,

    #[getset(get_copy = "pub")]
    created_at: SystemTime,

    #[getset(get = "pub", set = "pub")]
    owner: Option<String>,

    /// Opaque key/value annotations carried through from the OCI spec,
    /// returned verbatim by `state`.
    #[getset(get = "pub")]
    annotations: std::collections::HashMap<String, String>,
}

impl Container {
    pub fn new(
        id: impl Into<String>,
        bundle: PathBuf,
        rootfs: PathBuf,
        cgroup_dir: PathBuf,
        sync_fifo_path: PathBuf,
        annotations: std::collections::HashMap<String, String>,
    ) -> Self {
        Container {
            id: id.into(),
            bundle,
            rootfs,
            status: Status::Creating,
            monitor_pid: None,
            init_pid: None,
            cgroup_dir,
            sync_fifo_path,
            created_at: SystemTime::now(),
            owner: None,
            annotations,
        }
    }

    /// Transition to `next`, enforcing the state machine's allowed edges.
    pub fn transition(&mut self, next: Status) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidState(format!(
                "cannot transition container '{}' from {} to {}",
                self.id,
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Container {
        Container::new(
            "c1",
            PathBuf::from("/bundle"),
            PathBuf::from("/bundle/rootfs"),
            PathBuf::from("/sys/fs/cgroup/lxcri-payload.scope/c1"),
            PathBuf::from("/run/lxcri/c1/syncfifo"),
            Default::default(),
        )
    }

    #[test]
    fn creating_to_created_is_allowed() {
        let mut c = fresh();
        c.transition(Status::Created).unwrap();
        assert_eq!(c.status(), Status::Created);
    }

    #[test]
    fn creating_to_running_is_rejected() {
        let mut c = fresh();
        let err = c.transition(Status::Running).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn full_lifecycle_transitions_succeed_in_order() {
        let mut c = fresh();
        c.transition(Status::Created).unwrap();
        c.transition(Status::Running).unwrap();
        c.transition(Status::Stopped).unwrap();
        assert_eq!(c.status(), Status::Stopped);
    }
}
