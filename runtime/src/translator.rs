//! The config translator: turns a validated OCI spec into the
//! engine's ordered key/value entries and, when a seccomp policy is
//! present, the engine's rendered seccomp profile text.
//!
//! This is the only component that knows the engine's key names; every
//! other module deals exclusively in OCI spec types.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use oci_spec::runtime::{LinuxNamespaceType, Spec};

use crate::config::{ContainerConfig, RuntimeConfig};
use crate::error::{Error, Result};
use crate::mount_resolver;
use crate::seccomp;
use crate::spec_utils;

/// One `key = value` assignment destined for the engine's config file, in
/// emission order.
pub type Entries = Vec<(String, String)>;

/// The product of a translation pass: the ordered entries plus, if a
/// seccomp policy was present and enabled, its rendered profile text (the
/// caller writes this to `seccomp.conf` and points `seccomp.profile` at it).
pub struct Translation {
    pub entries: Entries,
    pub seccomp_profile: Option<String>,
    /// Set when `/dev` is a tmpfs mount and every device in
    /// `spec.linux.devices` was bind-mounted over it instead of left for the
    /// engine to `mknod`: the caller must clear the persisted spec's device
    /// list so the engine doesn't also try to create them.
    pub dev_is_tmpfs: bool,
}

/// Translate `container`'s spec into engine entries, given the resolved
/// rootfs path and the process-wide runtime configuration.
pub fn translate(
    runtime: &RuntimeConfig,
    container: &ContainerConfig,
    rootfs: &Path,
) -> Result<Translation> {
    let spec = container.spec();
    let mut entries = Entries::new();
    let mut seccomp_profile = None;

    translate_rootfs(spec, rootfs, &mut entries)?;
    translate_hostname(spec, &mut entries);
    translate_user_namespace(runtime, spec, &mut entries)?;
    translate_init_process(runtime, spec, &mut entries)?;
    translate_oom_and_privs(spec, &mut entries);
    translate_apparmor(runtime, spec, &mut entries);
    translate_seccomp(runtime, spec, &mut entries, &mut seccomp_profile);
    translate_capabilities(runtime, spec, &mut entries);
    let dev_is_tmpfs = translate_mounts(spec, rootfs, &mut entries)?;
    translate_sysctls_and_rlimits(spec, &mut entries)?;
    translate_hooks(runtime, spec, &mut entries);
    translate_environment(spec, &mut entries);

    // The runtime manages mounts explicitly; the engine must not also try
    // to auto-mount anything from its own defaults.
    entries.push(("mount.auto".to_string(), "".to_string()));
    entries.push(("autodev".to_string(), "0".to_string()));

    Ok(Translation {
        entries,
        seccomp_profile,
        dev_is_tmpfs,
    })
}

fn translate_rootfs(spec: &Spec, rootfs: &Path, entries: &mut Entries) -> Result<()> {
    let root = spec
        .root()
        .as_ref()
        .ok_or_else(|| Error::InvalidSpec("spec.root is required".into()))?;

    entries.push(("rootfs.path".to_string(), rootfs.display().to_string()));
    entries.push(("rootfs.mount".to_string(), "/mnt/rootfs".to_string()));
    entries.push(("rootfs.managed".to_string(), "0".to_string()));
    entries.push(("rootfs.ephemeral".to_string(), "0".to_string()));

    let propagation = spec
        .linux()
        .as_ref()
        .and_then(|l| l.rootfs_propagation().clone())
        .unwrap_or_default();
    let mut options = vec![propagation];
    if root.readonly().unwrap_or(false) {
        options.push("ro".to_string());
    }
    entries.push(("rootfs.options".to_string(), options.join(",")));

    if nix::unistd::geteuid() != nix::unistd::Uid::from_raw(0) {
        entries.push(("rootfs.mode".to_string(), "0777".to_string()));
    }

    Ok(())
}

fn translate_hostname(spec: &Spec, entries: &mut Entries) {
    let hostname = spec.hostname().clone().unwrap_or_default();
    if !hostname.is_empty() {
        entries.push(("uts.name".to_string(), hostname));
    }
}

fn translate_user_namespace(
    runtime: &RuntimeConfig,
    spec: &Spec,
    entries: &mut Entries,
) -> Result<()> {
    if runtime.in_user_namespace() {
        // The runtime's own user namespace already covers the container;
        // any spec-level user namespace entry would be redundant and is
        // stripped rather than passed through.
        return Ok(());
    }

    let linux = spec.linux().as_ref();
    let has_userns = linux
        .map(|l| {
            l.namespaces().as_ref().map_or(false, |namespaces| {
                namespaces
                    .iter()
                    .any(|n| *n.typ() == LinuxNamespaceType::User)
            })
        })
        .unwrap_or(false);

    if has_userns {
        if let Some(uid_mappings) = linux.and_then(|l| l.uid_mappings().as_ref()) {
            for mapping in uid_mappings {
                entries.push(("idmap".to_string(), spec_utils::render_idmap_entry('u', mapping)));
            }
        }
        if let Some(gid_mappings) = linux.and_then(|l| l.gid_mappings().as_ref()) {
            for mapping in gid_mappings {
                entries.push(("idmap".to_string(), spec_utils::render_idmap_entry('g', mapping)));
            }
        }
    } else if nix::unistd::geteuid() != nix::unistd::Uid::from_raw(0) {
        let euid = nix::unistd::geteuid().as_raw();
        let mapping = spec_utils::synthesize_single_range_mapping(euid, 65536);
        entries.push(("idmap".to_string(), spec_utils::render_idmap_entry('u', &mapping)));
        entries.push(("idmap".to_string(), spec_utils::render_idmap_entry('g', &mapping)));
    }

    Ok(())
}

fn translate_init_process(
    runtime: &RuntimeConfig,
    spec: &Spec,
    entries: &mut Entries,
) -> Result<()> {
    entries.push((
        "mount.entry".to_string(),
        format!(
            "{} .lxcri none bind,ro,create=dir 0 0",
            runtime.libexec().display()
        ),
    ));
    entries.push((
        "mount.entry".to_string(),
        format!(
            "{} .lxcri/lxcri-init none bind,create=file 0 0",
            runtime.libexec().join("lxcri-init").display()
        ),
    ));
    entries.push(("init.cwd".to_string(), "/.lxcri".to_string()));
    entries.push(("init.cmd".to_string(), "/.lxcri/lxcri-init".to_string()));

    if let Some(user) = spec.process().as_ref().map(|p| p.user()) {
        entries.push(("init.uid".to_string(), user.uid().to_string()));
        entries.push(("init.gid".to_string(), user.gid().to_string()));
        if let Some(groups) = user.additional_gids() {
            if !groups.is_empty() {
                let rendered = groups
                    .iter()
                    .map(|g| g.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                entries.push(("init.groups".to_string(), rendered));
            }
        }
    }

    Ok(())
}

fn translate_oom_and_privs(spec: &Spec, entries: &mut Entries) {
    if let Some(process) = spec.process().as_ref() {
        if let Some(score) = process.oom_score_adj() {
            entries.push(("proc.oom_score_adj".to_string(), score.to_string()));
        }
        if process.no_new_privileges().unwrap_or(false) {
            entries.push(("no_new_privs".to_string(), "1".to_string()));
        }
    }
}

fn translate_apparmor(runtime: &RuntimeConfig, spec: &Spec, entries: &mut Entries) {
    if !runtime.features().apparmor {
        log::warn!("apparmor feature disabled; container will run unconfined");
        return;
    }
    let profile = spec
        .process()
        .as_ref()
        .and_then(|p| p.apparmor_profile().clone())
        .unwrap_or_else(|| "unconfined".to_string());
    entries.push(("apparmor.profile".to_string(), profile));
}

fn translate_seccomp(
    runtime: &RuntimeConfig,
    spec: &Spec,
    entries: &mut Entries,
    seccomp_profile: &mut Option<String>,
) {
    if !runtime.features().seccomp {
        return;
    }
    if let Some(policy) = spec.linux().as_ref().and_then(|l| l.seccomp().as_ref()) {
        let rendered = seccomp::render_profile(policy);
        entries.push(("seccomp.profile".to_string(), "seccomp.conf".to_string()));
        *seccomp_profile = Some(rendered);
    }
}

fn translate_capabilities(runtime: &RuntimeConfig, spec: &Spec, entries: &mut Entries) {
    if !runtime.features().capabilities {
        return;
    }
    let permitted = spec
        .process()
        .as_ref()
        .and_then(|p| p.capabilities().as_ref())
        .and_then(|c| c.permitted().clone());

    let rendered = match permitted {
        Some(caps) if !caps.is_empty() => {
            let mut names: Vec<String> = caps.iter().map(capability_name).collect();
            names.sort();
            names.join(" ")
        }
        _ => "none".to_string(),
    };
    entries.push(("cap.keep".to_string(), rendered));
}

fn capability_name(cap: &oci_spec::runtime::Capability) -> String {
    cap.to_string()
        .trim_start_matches("CAP_")
        .to_lowercase()
}

fn translate_mounts(spec: &Spec, rootfs: &Path, entries: &mut Entries) -> Result<bool> {
    let mut mounts = spec.mounts().clone().unwrap_or_default();
    let mut devices = spec
        .linux()
        .as_ref()
        .and_then(|l| l.devices().clone())
        .unwrap_or_default();
    spec_utils::ensure_essential_devices(&mut devices)?;

    mounts.sort_by(|a, b| a.destination().cmp(b.destination()));

    let dev_is_tmpfs = mounts
        .iter()
        .any(|m| m.destination() == Path::new("/dev") && m.typ().as_deref() == Some("tmpfs"));

    for mount in &mounts {
        let destination = mount_resolver::resolve(rootfs, mount.destination())?;
        let mut typ = mount.typ().clone().unwrap_or_else(|| "none".to_string());
        let mut options = mount.options().clone().unwrap_or_default();

        if typ == "cgroup" || typ == "cgroup2" {
            typ = "cgroup2".to_string();
            if !options.iter().any(|o| o == "optional") {
                options.push("optional".to_string());
            }
        }
        if typ == "tmpfs" {
            options.retain(|o| o != "tmpcopyup");
        }

        let source = mount
            .source()
            .clone()
            .unwrap_or_else(|| PathBuf::from("none"));
        entries.push((
            "mount.entry".to_string(),
            format!(
                "{} {} {} {}",
                source.display(),
                destination.display(),
                typ,
                options.join(",")
            ),
        ));
    }

    if dev_is_tmpfs {
        std::fs::create_dir_all(rootfs.join("dev"))?;
        for device in &devices {
            entries.push((
                "mount.entry".to_string(),
                format!(
                    "{} dev/{} none bind,create=file 0 0",
                    device.path().display(),
                    device
                        .path()
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("device"),
                ),
            ));
        }
    }

    if let Some(linux) = spec.linux().as_ref() {
        if let Some(readonly_paths) = linux.readonly_paths() {
            for path in readonly_paths {
                let destination = mount_resolver::resolve(rootfs, Path::new(path))?;
                entries.push((
                    "mount.entry".to_string(),
                    format!(
                        "{} {} none bind,ro,optional 0 0",
                        destination.display(),
                        destination.display()
                    ),
                ));
            }
        }
    }

    Ok(dev_is_tmpfs)
}

fn translate_sysctls_and_rlimits(spec: &Spec, entries: &mut Entries) -> Result<()> {
    if let Some(sysctls) = spec.linux().as_ref().and_then(|l| l.sysctl().as_ref()) {
        for (key, value) in sysctls {
            entries.push((format!("sysctl.{key}"), value.clone()));
        }
    }

    if let Some(rlimits) = spec.process().as_ref().and_then(|p| p.rlimits().as_ref()) {
        let mut seen = HashSet::new();
        for rlimit in rlimits {
            let name = rlimit.typ().to_string();
            if !seen.insert(name.clone()) {
                return Err(Error::InvalidSpec(format!("duplicate rlimit '{name}'")));
            }
            entries.push((
                format!("prlimit.{}", name.trim_start_matches("RLIMIT_").to_lowercase()),
                format!("{}:{}", rlimit.soft(), rlimit.hard()),
            ));
        }
    }

    Ok(())
}

fn translate_hooks(runtime: &RuntimeConfig, spec: &Spec, entries: &mut Entries) {
    entries.push(("hook.version".to_string(), "1".to_string()));

    let hooks = spec.hooks().as_ref();
    let hook_runner = runtime.libexec().join("lxcri-hook-runner");

    let has = |select: fn(&oci_spec::runtime::Hooks) -> &Option<Vec<oci_spec::runtime::Hook>>| {
        hooks.map_or(false, |h| {
            select(h).as_ref().map_or(false, |v| !v.is_empty())
        })
    };

    if has(|h| h.prestart()) || has(|h| h.create_runtime()) {
        entries.push((
            "hook.pre-mount".to_string(),
            hook_runner.display().to_string(),
        ));
    }
    if has(|h| h.create_container()) {
        entries.push(("hook.mount".to_string(), hook_runner.display().to_string()));
    }
    if has(|h| h.start_container()) {
        entries.push(("hook.start".to_string(), hook_runner.display().to_string()));
    }
}

fn translate_environment(spec: &Spec, entries: &mut Entries) {
    let env = spec
        .process()
        .as_ref()
        .and_then(|p| p.env().clone())
        .unwrap_or_default();

    let mut seen = HashSet::new();
    for entry in env {
        let key = entry.split('=').next().unwrap_or(&entry).to_string();
        if seen.insert(key) {
            entries.push(("init.env".to_string(), entry));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::spec_utils::default_spec;
    use tempfile::tempdir;

    fn test_container(rootfs: &Path) -> ContainerConfig {
        let mut spec = default_spec().unwrap();
        spec.set_root(Some(
            oci_spec::runtime::RootBuilder::default()
                .path(rootfs.to_path_buf())
                .build()
                .unwrap(),
        ));
        ContainerConfig::new("c1", "/bundle", spec).unwrap()
    }

    #[test]
    fn translate_emits_rootfs_and_autodev_entries() {
        let rootfs = tempdir().unwrap();
        let runtime = RuntimeConfig::default();
        let container = test_container(rootfs.path());

        let translation = translate(&runtime, &container, rootfs.path()).unwrap();
        let keys: Vec<&str> = translation
            .entries
            .iter()
            .map(|(k, _)| k.as_str())
            .collect();
        assert!(keys.contains(&"rootfs.path"));
        assert!(keys.contains(&"autodev"));
        assert!(keys.contains(&"hook.version"));
    }

    #[test]
    fn duplicate_rlimits_are_rejected() {
        let rootfs = tempdir().unwrap();
        let runtime = RuntimeConfig::default();
        let mut container = test_container(rootfs.path());

        let mut spec = container.spec().clone();
        let mut process = spec.process().clone().unwrap();
        process.set_rlimits(Some(vec![
            oci_spec::runtime::POSIXRlimitBuilder::default()
                .typ(oci_spec::runtime::LinuxRlimitType::RlimitNofile)
                .soft(1024u64)
                .hard(2048u64)
                .build()
                .unwrap(),
            oci_spec::runtime::POSIXRlimitBuilder::default()
                .typ(oci_spec::runtime::LinuxRlimitType::RlimitNofile)
                .soft(512u64)
                .hard(1024u64)
                .build()
                .unwrap(),
        ]));
        spec.set_process(Some(process));
        container.set_spec(spec);

        let err = translate(&runtime, &container, rootfs.path()).unwrap_err();
        assert!(matches!(err, Error::InvalidSpec(_)));
    }
}
