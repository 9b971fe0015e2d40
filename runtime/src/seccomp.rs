//! Rendering an OCI `LinuxSeccomp` policy into the engine's text seccomp
//! profile format: one header line with the policy version and default
//! action, then one line per allowed syscall.
//!
//! Only the profile text is produced here; loading it into the kernel's
//! seccomp filter is the engine's job once it receives the rendered file.

use oci_spec::runtime::{LinuxSeccomp, LinuxSeccompAction};

const PROFILE_VERSION: u32 = 2;

/// Render `policy` into the engine's seccomp profile text format.
pub fn render_profile(policy: &LinuxSeccomp) -> String {
    let default_action = action_name(*policy.default_action());

    let mut out = format!("{PROFILE_VERSION}\n{default_action}\n");

    if let Some(syscalls) = policy.syscalls() {
        for rule in syscalls {
            // Only allowlist-style rules (action != default) are rendered as
            // explicit lines; rules matching the default action are implied.
            if action_name(*rule.action()) == default_action {
                continue;
            }
            for name in rule.names() {
                out.push_str(name);
                out.push('\n');
            }
        }
    }

    out
}

fn action_name(action: LinuxSeccompAction) -> &'static str {
    match action {
        LinuxSeccompAction::ScmpActKill => "kill",
        LinuxSeccompAction::ScmpActKillProcess => "kill_process",
        LinuxSeccompAction::ScmpActTrap => "trap",
        LinuxSeccompAction::ScmpActErrno => "errno",
        LinuxSeccompAction::ScmpActTrace => "trace",
        LinuxSeccompAction::ScmpActAllow => "allow",
        LinuxSeccompAction::ScmpActLog => "log",
        LinuxSeccompAction::ScmpActNotify => "notify",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oci_spec::runtime::{LinuxSeccompBuilder, LinuxSyscallBuilder};

    #[test]
    fn renders_header_and_allowed_syscalls() {
        let policy = LinuxSeccompBuilder::default()
            .default_action(LinuxSeccompAction::ScmpActErrno)
            .syscalls(vec![LinuxSyscallBuilder::default()
                .names(vec!["read".to_string(), "write".to_string()])
                .action(LinuxSeccompAction::ScmpActAllow)
                .build()
                .unwrap()])
            .build()
            .unwrap();

        let rendered = render_profile(&policy);
        assert!(rendered.starts_with("2\nerrno\n"));
        assert!(rendered.contains("read\n"));
        assert!(rendered.contains("write\n"));
    }
}
