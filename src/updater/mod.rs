//! Miner auto-update
//! Resolves the latest miner release for this host and keeps a local copy

pub mod cache;
pub mod platform;
pub mod release;

use thiserror::Error;

pub use cache::{BinaryCache, CachedBinary};
pub use platform::resolve_platform;
pub use release::GitHubReleaseSource;

/// Errors from release resolution and binary provisioning.
///
/// All of these are recoverable: the session falls back to manual path resolution.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("Unsupported architecture: {0}")]
    UnsupportedPlatform(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Release feed returned HTTP {0}")]
    Http(u16),

    #[error("No matching asset in latest release: {0}")]
    AssetNotFound(String),

    #[error("Missing download URL for asset {0}")]
    MissingDownloadUrl(String),

    #[error("Downloaded {actual} bytes, release declares {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fetch the latest release and return a cached binary for this host.
pub async fn ensure_latest_miner(
    cache: &BinaryCache,
    log: &(dyn Fn(String) + Send + Sync),
) -> Result<CachedBinary, UpdateError> {
    let release = cache.source().latest_release().await?;
    tracing::debug!(
        "Latest miner release {} with {} assets",
        release.tag,
        release.assets.len()
    );

    let platform = resolve_platform()?;
    cache.get(&release, &platform, log).await
}
