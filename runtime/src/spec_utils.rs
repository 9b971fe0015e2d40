//! OCI spec helper functions shared by the translator and the lifecycle
//! controller: id un/mapping, the essential device list, and a default spec
//! builder for the `lxcri spec` CLI verb.
//!
//! Building a full runtime spec out of an OCI *image* config is out of
//! scope here; `default_spec` only produces the bare bundle scaffold that
//! `runc spec`-style tooling generates.

use oci_spec::runtime::{
    LinuxBuilder, LinuxDevice, LinuxDeviceBuilder, LinuxDeviceType, LinuxIdMapping,
    LinuxNamespace, LinuxNamespaceType, ProcessBuilder, RootBuilder, Spec, SpecBuilder,
};

use crate::error::Result;

/// Devices every container needs regardless of what the spec declares.
pub const ESSENTIAL_DEVICES: &[(&str, LinuxDeviceType, i64, i64)] = &[
    ("/dev/null", LinuxDeviceType::C, 1, 3),
    ("/dev/zero", LinuxDeviceType::C, 1, 5),
    ("/dev/full", LinuxDeviceType::C, 1, 7),
    ("/dev/random", LinuxDeviceType::C, 1, 8),
    ("/dev/urandom", LinuxDeviceType::C, 1, 9),
    ("/dev/tty", LinuxDeviceType::C, 5, 0),
];

/// Ensure every device in [`ESSENTIAL_DEVICES`] is present in `devices`,
/// appending any that are missing. Matching is by device path.
pub fn ensure_essential_devices(devices: &mut Vec<LinuxDevice>) -> Result<()> {
    for (path, typ, major, minor) in ESSENTIAL_DEVICES {
        let present = devices.iter().any(|d| d.path().to_str() == Some(path));
        if !present {
            let device = LinuxDeviceBuilder::default()
                .path(*path)
                .typ(*typ)
                .major(*major)
                .minor(*minor)
                .file_mode(0o666u32)
                .build()
                .map_err(|e| crate::error::Error::InvalidSpec(e.to_string()))?;
            devices.push(device);
        }
    }
    Ok(())
}

/// Apply the one spec-wide default the requirements call out explicitly:
/// an empty `process.cwd` becomes `/`. Returns a clone so the caller's
/// original spec (as supplied by the bundle) is never mutated in place.
pub fn with_default_cwd(spec: &Spec) -> Spec {
    let mut spec = spec.clone();
    if let Some(mut process) = spec.process().clone() {
        if process.cwd().as_os_str().is_empty() {
            process.set_cwd(std::path::PathBuf::from("/"));
            spec.set_process(Some(process));
        }
    }
    spec
}

/// Merge the essential device set into `spec.linux.devices` in place, so the
/// persisted spec always carries `{null, zero, full, random, urandom, tty}`
/// before the translator runs, not just the translator's own throwaway copy.
pub fn merge_essential_devices(spec: &mut Spec) -> Result<()> {
    let mut linux = spec.linux().clone().unwrap_or_default();
    let mut devices = linux.devices().clone().unwrap_or_default();
    ensure_essential_devices(&mut devices)?;
    linux.set_devices(Some(devices));
    spec.set_linux(Some(linux));
    Ok(())
}

/// Clear `spec.linux.devices`, for the case where every device has already
/// been bind-mounted over a tmpfs `/dev` by the translator: the engine must
/// not also try to `mknod` them from the spec's own device list.
pub fn clear_devices(spec: &mut Spec) {
    if let Some(mut linux) = spec.linux().clone() {
        linux.set_devices(Some(Vec::new()));
        spec.set_linux(Some(linux));
    }
}

/// Render a single `LinuxIdMapping` as the engine's `idmap` entry value,
/// e.g. `u 0 100000 65536`.
pub fn render_idmap_entry(kind: char, mapping: &LinuxIdMapping) -> String {
    format!(
        "{} {} {} {}",
        kind,
        mapping.container_id(),
        mapping.host_id(),
        mapping.size()
    )
}

/// Resolve the container id corresponding to a host id under a set of
/// mappings, used when the lifecycle controller needs to reason about which
/// container-side uid/gid a host uid maps to (id un-mapping).
pub fn unmap_host_id(mappings: &[LinuxIdMapping], host_id: u32) -> Option<u32> {
    mappings.iter().find_map(|m| {
        if host_id >= m.host_id() && host_id < m.host_id() + m.size() {
            Some(m.container_id() + (host_id - m.host_id()))
        } else {
            None
        }
    })
}

/// A single-range identity mapping covering `size` ids starting at 0,
/// used to synthesise a user namespace for a non-root, unprivileged runtime
/// invocation that has none configured.
///
/// This single-range mapping is a placeholder pending loading the invoking
/// user's actual subuid/subgid ranges; see DESIGN.md for the rationale.
pub fn synthesize_single_range_mapping(host_id: u32, size: u32) -> LinuxIdMapping {
    oci_spec::runtime::LinuxIdMappingBuilder::default()
        .container_id(0u32)
        .host_id(host_id)
        .size(size)
        .build()
        .expect("all required idmap fields are set")
}

/// Build the namespace set a generated default spec is expected to have:
/// every namespace except `user`, which is only added when the caller is
/// unprivileged.
pub fn default_namespaces() -> Vec<LinuxNamespace> {
    [
        LinuxNamespaceType::Pid,
        LinuxNamespaceType::Network,
        LinuxNamespaceType::Ipc,
        LinuxNamespaceType::Uts,
        LinuxNamespaceType::Mount,
        LinuxNamespaceType::Cgroup,
    ]
    .into_iter()
    .map(|typ| {
        oci_spec::runtime::LinuxNamespaceBuilder::default()
            .typ(typ)
            .build()
            .expect("namespace type is always set")
    })
    .collect()
}

/// Generate a minimal default runtime spec for the `lxcri spec` CLI verb,
/// equivalent to `runc spec`'s bare bundle scaffold.
pub fn default_spec() -> Result<Spec> {
    let process = ProcessBuilder::default()
        .terminal(true)
        .cwd("/")
        .args(vec!["sh".to_string()])
        .env(vec![
            "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string(),
            "TERM=xterm".to_string(),
        ])
        .build()
        .map_err(|e| crate::error::Error::InvalidSpec(e.to_string()))?;

    let root = RootBuilder::default()
        .path("rootfs")
        .readonly(false)
        .build()
        .map_err(|e| crate::error::Error::InvalidSpec(e.to_string()))?;

    let linux = LinuxBuilder::default()
        .namespaces(default_namespaces())
        .build()
        .map_err(|e| crate::error::Error::InvalidSpec(e.to_string()))?;

    Ok(SpecBuilder::default()
        .version("1.0.2")
        .process(process)
        .root(root)
        .hostname("lxcri")
        .linux(linux)
        .build()
        .map_err(|e| crate::error::Error::InvalidSpec(e.to_string()))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oci_spec::runtime::LinuxIdMappingBuilder;

    #[test]
    fn essential_devices_are_appended_once() {
        let mut devices = vec![];
        ensure_essential_devices(&mut devices).unwrap();
        assert_eq!(devices.len(), ESSENTIAL_DEVICES.len());

        // Calling it again must not duplicate entries already present.
        ensure_essential_devices(&mut devices).unwrap();
        assert_eq!(devices.len(), ESSENTIAL_DEVICES.len());
    }

    #[test]
    fn with_default_cwd_fills_in_empty_cwd() {
        let mut spec = default_spec().unwrap();
        let mut process = spec.process().clone().unwrap();
        process.set_cwd(std::path::PathBuf::new());
        spec.set_process(Some(process));

        let normalized = with_default_cwd(&spec);
        assert_eq!(normalized.process().as_ref().unwrap().cwd(), &std::path::PathBuf::from("/"));
        // The original, as supplied by the caller, is left untouched.
        assert!(spec.process().as_ref().unwrap().cwd().as_os_str().is_empty());
    }

    #[test]
    fn with_default_cwd_leaves_non_empty_cwd_alone() {
        let mut spec = default_spec().unwrap();
        let mut process = spec.process().clone().unwrap();
        process.set_cwd(std::path::PathBuf::from("/srv"));
        spec.set_process(Some(process));

        let normalized = with_default_cwd(&spec);
        assert_eq!(normalized.process().as_ref().unwrap().cwd(), &std::path::PathBuf::from("/srv"));
    }

    #[test]
    fn merge_essential_devices_reaches_the_spec() {
        let mut spec = default_spec().unwrap();
        merge_essential_devices(&mut spec).unwrap();
        let devices = spec.linux().as_ref().unwrap().devices().clone().unwrap();
        assert_eq!(devices.len(), ESSENTIAL_DEVICES.len());
    }

    #[test]
    fn clear_devices_empties_an_existing_list() {
        let mut spec = default_spec().unwrap();
        merge_essential_devices(&mut spec).unwrap();
        clear_devices(&mut spec);
        let devices = spec.linux().as_ref().unwrap().devices().clone().unwrap();
        assert!(devices.is_empty());
    }

    #[test]
    fn idmap_entry_renders_lxc_style() {
        let mapping = LinuxIdMappingBuilder::default()
            .container_id(0u32)
            .host_id(100000u32)
            .size(65536u32)
            .build()
            .unwrap();
        assert_eq!(render_idmap_entry('u', &mapping), "u 0 100000 65536");
    }

    #[test]
    fn unmap_host_id_finds_containing_range() {
        let mappings = vec![LinuxIdMappingBuilder::default()
            .container_id(0u32)
            .host_id(100000u32)
            .size(65536u32)
            .build()
            .unwrap()];
        assert_eq!(unmap_host_id(&mappings, 100005), Some(5));
        assert_eq!(unmap_host_id(&mappings, 99999), None);
    }

    #[test]
    fn default_spec_has_non_empty_args() {
        let spec = default_spec().unwrap();
        assert!(spec.process().as_ref().unwrap().args().as_ref().unwrap().len() > 0);
    }
}
