//! Host platform detection
//!
//! Maps the host OS and machine type to the identifiers used in miner
//! release asset names.

use super::UpdateError;

/// Operating system identifier used in asset names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsId {
    Win,
    Mac,
    Linux,
}

impl OsId {
    pub fn as_str(&self) -> &'static str {
        match self {
            OsId::Win => "win",
            OsId::Mac => "mac",
            OsId::Linux => "linux",
        }
    }

    /// Executable file extension for this OS
    pub fn exe_extension(&self) -> &'static str {
        match self {
            OsId::Win => ".exe",
            OsId::Mac | OsId::Linux => "",
        }
    }
}

/// CPU architecture identifier used in asset names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchId {
    Amd64,
    I386,
    Arm64,
    Armv6,
    Armv7,
}

impl ArchId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchId::Amd64 => "amd64",
            ArchId::I386 => "386",
            ArchId::Arm64 => "arm64",
            ArchId::Armv6 => "armv6",
            ArchId::Armv7 => "armv7",
        }
    }
}

/// The resolved OS/architecture pair for this host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlatformTarget {
    pub os: OsId,
    pub arch: ArchId,
}

impl PlatformTarget {
    pub fn exe_extension(&self) -> &'static str {
        self.os.exe_extension()
    }

    /// Build the release asset name for `binary` at `version`.
    ///
    /// `version` must already have any leading `v` removed.
    pub fn asset_name(&self, binary: &str, version: &str) -> String {
        format!(
            "{}_{}_{}_{}{}",
            binary,
            self.os.as_str(),
            self.arch.as_str(),
            version,
            self.exe_extension()
        )
    }
}

impl std::fmt::Display for PlatformTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os.as_str(), self.arch.as_str())
    }
}

/// Resolve the platform of the running host
pub fn resolve_platform() -> Result<PlatformTarget, UpdateError> {
    let machine = sysinfo::System::cpu_arch()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| std::env::consts::ARCH.to_string());

    tracing::debug!(
        "Host platform: os={} machine={} pointer_bits={}",
        std::env::consts::OS,
        machine,
        usize::BITS
    );

    resolve_platform_from(std::env::consts::OS, &machine, usize::BITS)
}

/// Resolve a platform from raw host identification.
///
/// A 64-bit x86 machine reporting 32-bit pointers resolves to `386`: that is a
/// 32-bit build running on 64-bit hardware and needs the 32-bit miner.
pub fn resolve_platform_from(
    os_name: &str,
    machine: &str,
    pointer_bits: u32,
) -> Result<PlatformTarget, UpdateError> {
    let os_lower = os_name.trim().to_lowercase();
    let os = if os_lower.starts_with("win") {
        OsId::Win
    } else if os_lower == "darwin" || os_lower == "macos" {
        OsId::Mac
    } else {
        OsId::Linux
    };

    let mach = machine.trim().to_lowercase();
    let arch = match mach.as_str() {
        "x86_64" | "amd64" => {
            if pointer_bits == 64 {
                ArchId::Amd64
            } else {
                ArchId::I386
            }
        }
        "i386" | "i686" | "x86" => ArchId::I386,
        "arm64" | "aarch64" => ArchId::Arm64,
        m if m.starts_with("armv6") => ArchId::Armv6,
        m if m.starts_with("armv7") => ArchId::Armv7,
        _ => return Err(UpdateError::UnsupportedPlatform(machine.to_string())),
    };

    Ok(PlatformTarget { os, arch })
}
