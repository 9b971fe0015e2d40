//! Hook phase dispatch.
//!
//! Hooks are represented as a map from phase tag to an ordered list of
//! invocations rather than an inheritance hierarchy, so adding a phase
//! never requires touching the others. Runtime-level hooks run before spec
//! hooks within a phase. Failure semantics differ by phase: CreateRuntime,
//! CreateContainer, StartContainer, and Prestart abort the calling verb on
//! failure; Poststart and Poststop failures are logged and tolerated.

use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use oci_spec::runtime::Hook;

use crate::error::{Error, Result};

/// The six points in a container's lifecycle at which hooks can run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Prestart,
    CreateRuntime,
    CreateContainer,
    StartContainer,
    Poststart,
    Poststop,
}

impl Phase {
    /// Whether a hook failure in this phase aborts the calling verb.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Phase::Poststart | Phase::Poststop)
    }
}

/// Run every hook in `phase`, in order, against `state_json` (the container
/// state document piped to each hook's stdin per the OCI hook protocol).
///
/// `runtime_hooks` are prepended to `spec_hooks` within the phase, per the
/// ordering contract. Returns on the first failure in a fatal phase;
/// collects and logs (but doesn't fail on) failures in a non-fatal phase.
///
/// Each hook's process environment is cleared and rebuilt from only the
/// names in `env_allowlist`, plus whatever `hook.env()` itself sets, so a
/// hook never inherits the runtime process's full environment.
pub fn run_phase(
    phase: Phase,
    runtime_hooks: &[Hook],
    spec_hooks: &[Hook],
    state_json: &[u8],
    hook_timeout: Duration,
    env_allowlist: &[String],
) -> Result<()> {
    for hook in runtime_hooks.iter().chain(spec_hooks.iter()) {
        let deadline = Instant::now() + hook.timeout().map(|t| Duration::from_secs(t as u64)).unwrap_or(hook_timeout);
        match run_one(hook, state_json, deadline, env_allowlist) {
            Ok(()) => {}
            Err(e) => {
                if phase.is_fatal() {
                    return Err(e);
                } else {
                    log::warn!("hook '{}' in non-fatal phase failed: {e}", hook.path().display());
                }
            }
        }
    }
    Ok(())
}

fn run_one(hook: &Hook, state_json: &[u8], deadline: Instant, env_allowlist: &[String]) -> Result<()> {
    let mut command = Command::new(hook.path());
    if let Some(args) = hook.args() {
        if args.len() > 1 {
            command.args(&args[1..]);
        }
    }

    command.env_clear();
    for name in env_allowlist {
        if let Ok(value) = std::env::var(name) {
            command.env(name, value);
        }
    }
    if let Some(env) = hook.env() {
        command.envs(env.iter().filter_map(|e| e.split_once('=')));
    }

    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(state_json)?;
    }

    loop {
        if let Some(status) = child.try_wait()? {
            return if status.success() {
                Ok(())
            } else {
                Err(Error::HookFailed(
                    hook.path().display().to_string(),
                    format!("exited with {status}"),
                ))
            };
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            return Err(Error::HookFailed(
                hook.path().display().to_string(),
                "timed out".to_string(),
            ));
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_phases_are_identified_correctly() {
        assert!(Phase::Prestart.is_fatal());
        assert!(Phase::CreateRuntime.is_fatal());
        assert!(Phase::CreateContainer.is_fatal());
        assert!(Phase::StartContainer.is_fatal());
        assert!(!Phase::Poststart.is_fatal());
        assert!(!Phase::Poststop.is_fatal());
    }

    #[test]
    fn successful_hook_in_fatal_phase_does_not_abort() {
        let hook = oci_spec::runtime::HookBuilder::default()
            .path("/bin/true")
            .build()
            .unwrap();
        run_phase(
            Phase::Prestart,
            &[hook],
            &[],
            b"{}",
            Duration::from_secs(5),
            &[],
        )
        .unwrap();
    }

    #[test]
    fn failing_hook_in_fatal_phase_aborts() {
        let hook = oci_spec::runtime::HookBuilder::default()
            .path("/bin/false")
            .build()
            .unwrap();
        let err = run_phase(
            Phase::CreateRuntime,
            &[hook],
            &[],
            b"{}",
            Duration::from_secs(5),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, Error::HookFailed(_, _)));
    }

    #[test]
    fn failing_hook_in_non_fatal_phase_is_tolerated() {
        let hook = oci_spec::runtime::HookBuilder::default()
            .path("/bin/false")
            .build()
            .unwrap();
        run_phase(
            Phase::Poststop,
            &[hook],
            &[],
            b"{}",
            Duration::from_secs(5),
            &[],
        )
        .unwrap();
    }

    #[test]
    fn allowlisted_var_reaches_the_hook_process() {
        std::env::set_var("LXCRI_TEST_ALLOWED", "yes");
        let hook = oci_spec::runtime::HookBuilder::default()
            .path("/bin/sh")
            .args(vec!["sh".into(), "-c".into(), "test \"$LXCRI_TEST_ALLOWED\" = yes".into()])
            .build()
            .unwrap();
        run_phase(
            Phase::Prestart,
            &[hook],
            &[],
            b"{}",
            Duration::from_secs(5),
            &["LXCRI_TEST_ALLOWED".to_string()],
        )
        .unwrap();
        std::env::remove_var("LXCRI_TEST_ALLOWED");
    }

    #[test]
    fn non_allowlisted_var_is_stripped_from_the_hook_process() {
        std::env::set_var("LXCRI_TEST_DENIED", "leaked");
        let hook = oci_spec::runtime::HookBuilder::default()
            .path("/bin/sh")
            .args(vec!["sh".into(), "-c".into(), "test -z \"$LXCRI_TEST_DENIED\"".into()])
            .build()
            .unwrap();
        run_phase(
            Phase::Prestart,
            &[hook],
            &[],
            b"{}",
            Duration::from_secs(5),
            &[],
        )
        .unwrap();
        std::env::remove_var("LXCRI_TEST_DENIED");
    }
}
