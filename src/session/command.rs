//! Miner command construction
//!
//! Executable path resolution and the argument vector passed to the miner.

use std::path::{Path, PathBuf};

use crate::settings::MinerConfig;

/// File names checked next to the launcher, in order
pub const LOCAL_CANDIDATES: [&str; 4] = [
    "hhc_miner.exe",
    "hhc_miner",
    "faucet_miner.exe",
    "faucet_miner",
];

/// Interval in seconds between progress reports from the miner
pub const PROGRESS_INTERVAL_SECS: u32 = 2;

/// Name looked up on PATH when nothing else matched
pub fn default_binary_name() -> &'static str {
    if cfg!(windows) {
        "hhc_miner.exe"
    } else {
        "hhc_miner"
    }
}

/// Build the miner arguments.
///
/// Boolean flags are passed as `-name=value`: the miner's flag parser stops
/// at the first positional token, so `-progress true` would silently drop
/// every flag after it, `-extreme` included.
pub fn build_miner_args(config: &MinerConfig) -> Vec<String> {
    let mut args = vec![
        "-url".to_string(),
        config.api_url.clone(),
        "-key".to_string(),
        config.credential.clone(),
        "-workers".to_string(),
        config.workers.to_string(),
        "-progress=true".to_string(),
        format!("-progress-interval={}", PROGRESS_INTERVAL_SECS),
    ];
    if config.extreme {
        args.push("-extreme".to_string());
    }
    args
}

/// First local candidate present in `launcher_dir`
pub fn local_candidate(launcher_dir: Option<&Path>) -> Option<PathBuf> {
    let dir = launcher_dir?;
    LOCAL_CANDIDATES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Resolve the executable to launch.
///
/// Order: explicit path, local candidate, downloaded binary, PATH lookup.
/// Relative explicit paths are tried next to the launcher, then on PATH.
/// Falls back to the bare name so the spawn reports the failure.
pub fn resolve_executable(
    explicit: Option<&Path>,
    launcher_dir: Option<&Path>,
    downloaded: Option<&Path>,
) -> PathBuf {
    if let Some(path) = explicit {
        return resolve_relative(path, launcher_dir);
    }

    if let Some(local) = local_candidate(launcher_dir) {
        return local;
    }

    if let Some(path) = downloaded {
        return path.to_path_buf();
    }

    resolve_relative(Path::new(default_binary_name()), launcher_dir)
}

fn resolve_relative(path: &Path, launcher_dir: Option<&Path>) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }

    if let Some(dir) = launcher_dir {
        let candidate = dir.join(path);
        if candidate.exists() {
            return candidate;
        }
    }

    which::which(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Directory containing the running launcher binary
pub fn launcher_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}
