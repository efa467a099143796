//! Miner profiles
//!
//! Named profiles persisted as JSON (`{"Profile": {"<name>": {...}}}`). The
//! session core only sees the resolved [`MinerConfig`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PROFILE: &str = "Default";
pub const DEFAULT_API_URL: &str = "https://hashcash-pow-faucet.dynv6.net/api";
const CONFIG_FILE_NAME: &str = "hcc_miner_config.json";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to access settings file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Invalid settings file {0}: {1}")]
    Parse(PathBuf, #[source] serde_json::Error),

    #[error("Profile name cannot be empty")]
    EmptyProfileName,

    #[error("No config directory available on this system")]
    NoConfigDir,
}

/// One stored profile, field names as they appear on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub api_url: String,
    pub miner_path: String,
    pub private_key: String,
    /// Worker count as entered; "0" lets the miner pick
    pub threads: String,
    pub auto_download: bool,
    pub extreme: bool,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            miner_path: String::new(),
            private_key: String::new(),
            threads: "0".to_string(),
            auto_download: true,
            extreme: false,
        }
    }
}

impl Profile {
    /// Resolve into the configuration the session consumes
    pub fn to_config(&self) -> MinerConfig {
        let miner_path = self.miner_path.trim();
        MinerConfig {
            api_url: self.api_url.trim().to_string(),
            miner_path: (!miner_path.is_empty()).then(|| PathBuf::from(miner_path)),
            credential: self.private_key.trim().to_string(),
            workers: self.threads.trim().parse().unwrap_or(0),
            auto_download: self.auto_download,
            extreme: self.extreme,
        }
    }
}

/// Every option a mining session recognizes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerConfig {
    pub api_url: String,
    /// Explicit executable; `None` means resolve automatically
    pub miner_path: Option<PathBuf>,
    pub credential: String,
    /// 0 = auto-detect CPU cores in the miner
    pub workers: u32,
    pub auto_download: bool,
    pub extreme: bool,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Profile::default().to_config()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(rename = "Profile", default)]
    profiles: BTreeMap<String, Profile>,
}

/// Profile store backed by a JSON file
#[derive(Debug, Clone)]
pub struct Settings {
    path: PathBuf,
    profiles: BTreeMap<String, Profile>,
}

impl Settings {
    /// Default settings file location
    pub fn default_path() -> Result<PathBuf, SettingsError> {
        dirs::config_dir()
            .map(|dir| dir.join("hcc-miner").join(CONFIG_FILE_NAME))
            .ok_or(SettingsError::NoConfigDir)
    }

    /// Load from `path`, creating it with a default profile if missing
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let file: SettingsFile = serde_json::from_str(&content)
                    .map_err(|e| SettingsError::Parse(path.clone(), e))?;
                tracing::debug!(
                    "Loaded {} profiles from {}",
                    file.profiles.len(),
                    path.display()
                );
                Ok(Self {
                    path,
                    profiles: file.profiles,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut profiles = BTreeMap::new();
                profiles.insert(DEFAULT_PROFILE.to_string(), Profile::default());
                let settings = Self { path, profiles };
                settings.save()?;
                tracing::info!("Created settings file {}", settings.path.display());
                Ok(settings)
            }
            Err(e) => Err(SettingsError::Io(path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Profile by name, or the default profile values for unknown names
    pub fn profile(&self, name: &str) -> Profile {
        self.profiles.get(name).cloned().unwrap_or_default()
    }

    pub fn profile_names(&self) -> Vec<String> {
        if self.profiles.is_empty() {
            return vec![DEFAULT_PROFILE.to_string()];
        }
        self.profiles.keys().cloned().collect()
    }

    /// Store `profile` under `name` and persist
    pub fn save_profile(&mut self, name: &str, profile: Profile) -> Result<(), SettingsError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SettingsError::EmptyProfileName);
        }
        self.profiles.insert(name.to_string(), profile);
        self.save()
    }

    pub fn save(&self) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SettingsError::Io(self.path.clone(), e))?;
        }

        let file = SettingsFile {
            profiles: self.profiles.clone(),
        };
        let content = serde_json::to_string_pretty(&file)
            .map_err(|e| SettingsError::Parse(self.path.clone(), e))?;
        std::fs::write(&self.path, content).map_err(|e| SettingsError::Io(self.path.clone(), e))
    }
}
