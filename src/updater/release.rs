//! Release feed access
//!
//! Queries the GitHub releases API for the latest miner build and picks
//! the asset matching this host.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use super::platform::PlatformTarget;
use super::UpdateError;

const GITHUB_OWNER: &str = "Hashcash-PoW-Faucet";
const GITHUB_REPO: &str = "HCC-CLI-Miner";

/// Base name of the miner binary in release assets
pub const MINER_BINARY_NAME: &str = "hhc_miner";

const FEED_TIMEOUT: Duration = Duration::from_secs(10);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// One downloadable artifact of a release
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    #[serde(rename = "browser_download_url", default)]
    pub download_url: String,
    /// Declared size; absent in the feed means no size check
    #[serde(rename = "size", default)]
    pub size_bytes: Option<u64>,
}

/// A tagged release and its assets
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Release {
    #[serde(rename = "tag_name", default)]
    pub tag: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

impl Release {
    /// Version string derived from the tag (leading `v` removed)
    pub fn version(&self) -> &str {
        version_from_tag(&self.tag)
    }
}

/// Strip a single leading literal `v` from a release tag
pub fn version_from_tag(tag: &str) -> &str {
    tag.strip_prefix('v').unwrap_or(tag)
}

/// Expected asset name for `release` on `platform`
pub fn expected_asset_name(release: &Release, platform: &PlatformTarget) -> String {
    platform.asset_name(MINER_BINARY_NAME, release.version())
}

/// Find the asset whose name matches exactly. No fallback.
pub fn select_asset<'a>(
    release: &'a Release,
    platform: &PlatformTarget,
) -> Result<&'a ReleaseAsset, UpdateError> {
    let asset_name = expected_asset_name(release, platform);
    let asset = release
        .assets
        .iter()
        .find(|a| a.name == asset_name)
        .ok_or_else(|| UpdateError::AssetNotFound(asset_name.clone()))?;

    if asset.download_url.is_empty() {
        return Err(UpdateError::MissingDownloadUrl(asset_name));
    }

    Ok(asset)
}

/// Source of release metadata and asset bytes
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Fetch metadata for the latest release
    async fn latest_release(&self) -> Result<Release, UpdateError>;

    /// Download `asset` into `dest`, returning the number of bytes written
    async fn download_to(&self, asset: &ReleaseAsset, dest: &Path) -> Result<u64, UpdateError>;
}

/// GitHub releases API backed source
pub struct GitHubReleaseSource {
    client: reqwest::Client,
    latest_url: String,
}

impl GitHubReleaseSource {
    pub fn new() -> Result<Self, UpdateError> {
        let url = format!(
            "https://api.github.com/repos/{}/{}/releases/latest",
            GITHUB_OWNER, GITHUB_REPO
        );
        Self::with_url(url)
    }

    /// Use a custom "latest release" endpoint
    pub fn with_url(latest_url: impl Into<String>) -> Result<Self, UpdateError> {
        let client = reqwest::Client::builder()
            .user_agent("hcc-miner")
            .build()
            .map_err(|e| UpdateError::Network(e.to_string()))?;

        Ok(Self {
            client,
            latest_url: latest_url.into(),
        })
    }
}

#[async_trait]
impl ReleaseSource for GitHubReleaseSource {
    async fn latest_release(&self) -> Result<Release, UpdateError> {
        let response = self
            .client
            .get(&self.latest_url)
            .timeout(FEED_TIMEOUT)
            .send()
            .await
            .map_err(|e| UpdateError::Network(e.to_string()))?;

        if !response.status().is_success() {
            tracing::debug!("Release feed returned status: {}", response.status());
            return Err(UpdateError::Http(response.status().as_u16()));
        }

        response
            .json::<Release>()
            .await
            .map_err(|e| UpdateError::Network(format!("invalid release JSON: {}", e)))
    }

    async fn download_to(&self, asset: &ReleaseAsset, dest: &Path) -> Result<u64, UpdateError> {
        let mut response = self
            .client
            .get(&asset.download_url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .map_err(|e| UpdateError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(UpdateError::Http(response.status().as_u16()));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| UpdateError::Network(e.to_string()))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        Ok(written)
    }
}
