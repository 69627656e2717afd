//! Foreign-architecture emulation probe.
//!
//! Run steps for a platform other than the host's need a registered
//! binfmt_misc handler or a `qemu-<arch>-static` binary. A missing handler is
//! only worth a warning: remote builders bring their own.

use std::path::{Path, PathBuf};

use layerfix_core::types::Platform;

const BINFMT_DIR: &str = "/proc/sys/fs/binfmt_misc";

/// QEMU name for an OCI architecture.
pub fn qemu_arch(platform: &Platform) -> Option<&'static str> {
    let p = platform.normalized();
    Some(match p.architecture.as_str() {
        "amd64" => "x86_64",
        "386" => "i386",
        "arm64" => "aarch64",
        "arm" => "arm",
        "ppc64le" => "ppc64le",
        "s390x" => "s390x",
        "riscv64" => "riscv64",
        "mips64le" => "mips64el",
        "loong64" => "loongarch64",
        _ => return None,
    })
}

/// OCI architecture of the running host.
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        "powerpc64" => "ppc64le",
        other => other,
    }
}

/// Where to look for emulators.
#[derive(Debug, Clone)]
pub struct EmulationProbe {
    pub binfmt_dir: PathBuf,
    pub path_dirs: Vec<PathBuf>,
}

impl Default for EmulationProbe {
    fn default() -> Self {
        Self {
            binfmt_dir: PathBuf::from(BINFMT_DIR),
            path_dirs: std::env::var_os("PATH")
                .map(|p| std::env::split_paths(&p).collect())
                .unwrap_or_default(),
        }
    }
}

impl EmulationProbe {
    /// Whether steps for `platform` can run on a host of `host` architecture.
    pub fn available(&self, platform: &Platform, host: &str) -> bool {
        if platform.normalized().architecture == host {
            return true;
        }
        let Some(arch) = qemu_arch(platform) else {
            return false;
        };
        self.has_binfmt_handler(arch) || self.has_static_binary(arch)
    }

    fn has_binfmt_handler(&self, arch: &str) -> bool {
        let Ok(entries) = std::fs::read_dir(&self.binfmt_dir) else {
            return false;
        };
        let wanted = format!("qemu-{arch}");
        entries.flatten().any(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with(&wanted) && handler_enabled(&entry.path())
        })
    }

    fn has_static_binary(&self, arch: &str) -> bool {
        let binary = format!("qemu-{arch}-static");
        self.path_dirs.iter().any(|dir| dir.join(&binary).is_file())
    }
}

fn handler_enabled(path: &Path) -> bool {
    std::fs::read_to_string(path)
        .map(|s| s.lines().next() == Some("enabled") && s.contains("interpreter"))
        .unwrap_or(false)
}

/// Probes the host. Always true off Linux, where builds run in a VM anyway.
pub fn emulation_available(platform: &Platform) -> bool {
    if !cfg!(target_os = "linux") {
        return true;
    }
    EmulationProbe::default().available(platform, host_arch())
}
