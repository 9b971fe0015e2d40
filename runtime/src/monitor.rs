//! Monitor driver: spawns the native monitor binary, wires up the
//! console-socket PTY transfer when a terminal was requested, and waits
//! for the init process's readiness sentinel.
//!
//! The monitor binary's own internals are out of scope here — this
//! module only spawns it and talks to it over the console socket and the
//! sentinel file.

use std::os::fd::{AsFd, AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use nix::fcntl::OFlag;
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt};
use nix::sys::socket::{sendmsg, ControlMessage, MsgFlags};
use nix::sys::uio::IoSlice;

use crate::error::{Error, Result};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(20);
const CONSOLE_DIAL_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Arguments passed to the monitor binary, rendered as the three
/// positional arguments its contract documents: `<container-name>
/// <lxc-root> <config-file>`.
pub struct MonitorArgs {
    pub container_id: String,
    pub lxc_root: PathBuf,
    pub config_path: PathBuf,
}

impl MonitorArgs {
    fn to_cli_args(&self) -> Vec<String> {
        vec![
            self.container_id.clone(),
            self.lxc_root.display().to_string(),
            self.config_path.display().to_string(),
        ]
    }
}

/// Spawn the monitor binary at `monitor_bin` with `args`. Non-PTY path:
/// stdio is inherited from the runtime process. PTY path: `pty_slave` is
/// wired up as the monitor's stdin/stdout/stderr (each via its own dup,
/// since `Stdio` takes ownership of the fd) and the caller is responsible
/// for handing the matching master fd to the console socket peer.
pub fn spawn(monitor_bin: &Path, args: &MonitorArgs, pty_slave: Option<OwnedFd>) -> Result<Child> {
    let mut command = Command::new(monitor_bin);
    command.args(args.to_cli_args());

    match pty_slave {
        Some(slave) => {
            command.stdin(duplicate(&slave)?);
            command.stdout(duplicate(&slave)?);
            command.stderr(Stdio::from(slave));
        }
        None => {
            command
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        }
    }

    Ok(command.spawn()?)
}

fn duplicate(fd: &OwnedFd) -> Result<Stdio> {
    let raw = nix::unistd::dup(fd.as_raw_fd())?;
    Ok(Stdio::from(unsafe { OwnedFd::from_raw_fd(raw) }))
}

/// Allocate a fresh pseudo-terminal pair, returning the master fd (handed
/// to the console-socket peer) and the slave's device path (written into
/// the engine config's `console.path` entry and wired to the monitor's
/// own stdio).
pub fn allocate_pty() -> Result<(OwnedFd, String)> {
    let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY)?;
    grantpt(&master)?;
    unlockpt(&master)?;
    let slave_path = ptsname_r(&master)?;
    let master = unsafe { OwnedFd::from_raw_fd(master.into_raw_fd()) };
    Ok((master, slave_path))
}

/// Send `pty_master` to a process listening on `console_socket`, using the
/// `"terminal"` SCM_RIGHTS protocol. Dialing retries until the socket is
/// accepting connections or `deadline` passes, since the peer may not have
/// started listening yet.
pub fn send_pty_over_console_socket(
    console_socket: &Path,
    pty_master: &OwnedFd,
    deadline: Instant,
) -> Result<()> {
    let stream = loop {
        match UnixStream::connect(console_socket) {
            Ok(stream) => break stream,
            Err(e) if Instant::now() >= deadline => return Err(e.into()),
            Err(_) => std::thread::sleep(CONSOLE_DIAL_RETRY_INTERVAL),
        }
    };
    let raw_fd: RawFd = stream.as_fd().as_raw_fd();

    let body = b"terminal";
    let iov = [IoSlice::new(body)];
    let fds = [pty_master.as_raw_fd()];
    let cmsg = [ControlMessage::ScmRights(&fds)];

    sendmsg::<()>(raw_fd, &iov, &cmsg, MsgFlags::empty(), None)?;
    Ok(())
}

/// Block until the init process signals readiness by creating `sentinel`,
/// or until `deadline` passes. The monitor writes the init process's pid
/// as decimal text into the sentinel file as its last act before it
/// becomes visible, which this returns for the caller to record.
pub fn wait_for_ready(sentinel: &Path, deadline: Instant) -> Result<Option<i32>> {
    loop {
        if sentinel.exists() {
            let contents = std::fs::read_to_string(sentinel).unwrap_or_default();
            return Ok(contents.trim().parse::<i32>().ok());
        }
        if Instant::now() >= deadline {
            return Err(Error::Timeout(deadline.saturating_duration_since(Instant::now())));
        }
        std::thread::sleep(READY_POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn wait_for_ready_succeeds_once_sentinel_exists() {
        let dir = tempdir().unwrap();
        let sentinel = dir.path().join("ready");
        std::fs::write(&sentinel, b"4242").unwrap();

        let deadline = Instant::now() + Duration::from_secs(1);
        assert_eq!(wait_for_ready(&sentinel, deadline).unwrap(), Some(4242));
    }

    #[test]
    fn wait_for_ready_times_out_when_sentinel_never_appears() {
        let dir = tempdir().unwrap();
        let sentinel = dir.path().join("never");

        let deadline = Instant::now() + Duration::from_millis(50);
        let err = wait_for_ready(&sentinel, deadline).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn monitor_args_render_three_positionals_in_order() {
        let args = MonitorArgs {
            container_id: "c1".to_string(),
            lxc_root: PathBuf::from("/run/lxcri/c1"),
            config_path: PathBuf::from("/run/lxcri/c1/config"),
        };
        assert_eq!(
            args.to_cli_args(),
            vec![
                "c1".to_string(),
                "/run/lxcri/c1".to_string(),
                "/run/lxcri/c1/config".to_string(),
            ]
        );
    }

    #[test]
    fn allocate_pty_returns_a_resolvable_slave_path() {
        let (_master, slave_path) = allocate_pty().unwrap();
        assert!(slave_path.starts_with("/dev/pts/"));
    }

    #[test]
    fn send_pty_over_console_socket_times_out_when_nothing_listens() {
        let dir = tempdir().unwrap();
        let console_socket = dir.path().join("console.sock");
        let (master, _slave_path) = allocate_pty().unwrap();

        let deadline = Instant::now() + Duration::from_millis(50);
        let err = send_pty_over_console_socket(&console_socket, &master, deadline).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
