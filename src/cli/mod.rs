//! Command-line interface
//!
//! `hcc-miner mine` runs the miner with live output; the other commands
//! manage profiles and the cached miner binary.

pub mod mine;
pub mod profiles;
pub mod update;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::settings::{Profile, Settings, SettingsError, DEFAULT_PROFILE};

pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const UNEXPECTED_FAILURE: i32 = 1;
    pub const MINER_MISSING: i32 = 2;
    pub const CONFIG_ERROR: i32 = 3;
}

#[derive(Debug, Parser)]
#[command(
    name = "hcc-miner",
    version,
    about = "Launch and supervise the Hashcash Credits proof-of-work miner"
)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_output: bool,

    /// Profiles file (defaults to the per-user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start mining and stream the miner output (Ctrl-C stops)
    Mine(mine::MineArgs),
    /// Download the latest miner for this host without mining
    Update(update::UpdateArgs),
    /// Show the detected platform and expected asset name
    Platform,
    /// List or save profiles
    Profiles(profiles::ProfilesArgs),
}

/// Per-invocation overrides on top of a stored profile
#[derive(Debug, Clone, Default, Args)]
pub struct ProfileOverrides {
    /// Faucet API base URL
    #[arg(long, value_name = "URL")]
    pub url: Option<String>,

    /// Private key from the web faucet
    #[arg(long, env = "HCC_MINER_KEY", hide_env_values = true)]
    pub key: Option<String>,

    /// Worker threads (0 = auto-detect CPU cores)
    #[arg(long)]
    pub workers: Option<u32>,

    /// Miner executable to use instead of resolving one
    #[arg(long, value_name = "PATH")]
    pub miner_path: Option<PathBuf>,

    /// EXTREME mode: higher difficulty, no cooldown, higher daily cap
    #[arg(long)]
    pub extreme: bool,

    /// Do not download the latest miner from GitHub releases
    #[arg(long)]
    pub no_auto_download: bool,
}

impl ProfileOverrides {
    pub fn apply(&self, profile: &mut Profile) {
        if let Some(url) = &self.url {
            profile.api_url = url.clone();
        }
        if let Some(key) = &self.key {
            profile.private_key = key.clone();
        }
        if let Some(workers) = self.workers {
            profile.threads = workers.to_string();
        }
        if let Some(path) = &self.miner_path {
            profile.miner_path = path.display().to_string();
        }
        if self.extreme {
            profile.extreme = true;
        }
        if self.no_auto_download {
            profile.auto_download = false;
        }
    }
}

/// Profile name argument shared by subcommands
#[derive(Debug, Clone, Args)]
pub struct ProfileSelector {
    /// Profile to use
    #[arg(long, default_value = DEFAULT_PROFILE)]
    pub profile: String,
}

impl Default for ProfileSelector {
    fn default() -> Self {
        Self {
            profile: DEFAULT_PROFILE.to_string(),
        }
    }
}

/// Load the profile store from `--config` or the default location
pub fn load_settings(config: Option<&PathBuf>) -> Result<Settings, SettingsError> {
    let path = match config {
        Some(path) => path.clone(),
        None => Settings::default_path()?,
    };
    Settings::load(path)
}
