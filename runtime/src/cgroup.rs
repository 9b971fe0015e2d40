//! Cgroup v2 helper: detecting when a container's cgroup has been
//! vacated by watching `cgroup.events`, and best-effort removal of the
//! cgroup directory once it has.
//!
//! This is strictly the stop-detection and cleanup half of cgroup handling
//! — resource-limit management (cpu/memory/pids controllers) belongs to the
//! engine and has no counterpart here. Watching `cgroup.events` via
//! `nix::poll`'s `PollFlags::POLLPRI` is the standard way to catch
//! edge-triggered `populated` transitions without busy-polling.

use std::fs::{self, File};
use std::io::Read;
use std::os::fd::AsFd;
use std::path::Path;
use std::time::{Duration, Instant};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::error::{Error, Result};

/// Block until `cgroup_dir`'s `cgroup.events` reports `populated 0`, or
/// until `deadline` passes.
pub fn wait_until_unpopulated(cgroup_dir: &Path, deadline: Instant) -> Result<()> {
    let events_path = cgroup_dir.join("cgroup.events");

    loop {
        if !is_populated(&events_path)? {
            return Ok(());
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::Timeout(Duration::ZERO));
        }

        let file = File::open(&events_path)?;
        let mut poll_fd = PollFd::new(file.as_fd(), PollFlags::POLLPRI);
        let timeout = PollTimeout::try_from(remaining.as_millis().min(u32::MAX as u128) as u32)
            .unwrap_or(PollTimeout::MAX);
        poll(std::slice::from_mut(&mut poll_fd), timeout)?;
        // A spurious or timed-out wakeup just loops back around to re-check
        // `is_populated` against the deadline.
    }
}

fn is_populated(events_path: &Path) -> Result<bool> {
    let mut contents = String::new();
    File::open(events_path)?.read_to_string(&mut contents)?;
    for line in contents.lines() {
        if let Some(value) = line.strip_prefix("populated ") {
            return Ok(value.trim() != "0");
        }
    }
    // No `populated` line is unexpected but not fatal; assume vacated so
    // `delete` isn't blocked forever on a malformed cgroupfs entry.
    Ok(false)
}

/// Remove the cgroup directory, tolerating it already being gone so
/// `delete` never fails solely because the cgroup is already vacated.
pub fn delete_cgroup(cgroup_dir: &Path) -> Result<()> {
    match fs::remove_dir(cgroup_dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn is_populated_parses_zero_as_unpopulated() {
        let dir = tempdir().unwrap();
        let events = dir.path().join("cgroup.events");
        fs::write(&events, "populated 0\nfrozen 0\n").unwrap();
        assert!(!is_populated(&events).unwrap());
    }

    #[test]
    fn is_populated_parses_one_as_populated() {
        let dir = tempdir().unwrap();
        let events = dir.path().join("cgroup.events");
        fs::write(&events, "populated 1\nfrozen 0\n").unwrap();
        assert!(is_populated(&events).unwrap());
    }

    #[test]
    fn wait_until_unpopulated_returns_immediately_when_already_zero() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("cgroup.events"), "populated 0\n").unwrap();
        wait_until_unpopulated(dir.path(), Instant::now() + Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn delete_cgroup_tolerates_missing_directory() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("already-gone");
        delete_cgroup(&missing).unwrap();
    }
}
