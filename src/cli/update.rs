//! `update` and `platform` commands

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;

use crate::updater::release::MINER_BINARY_NAME;
use crate::updater::{self, resolve_platform, BinaryCache, GitHubReleaseSource};

#[derive(Debug, Clone, Default, Args)]
pub struct UpdateArgs {
    /// Directory for downloaded miner binaries
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
}

/// Download the latest miner into the cache, or confirm the cached copy
pub async fn run(args: UpdateArgs) -> anyhow::Result<()> {
    let source = Arc::new(GitHubReleaseSource::new()?);
    let cache = match args.cache_dir {
        Some(dir) => BinaryCache::new(dir, source),
        None => BinaryCache::with_default_root(source)
            .context("No data directory for the miner cache; pass --cache-dir")?,
    };

    tracing::debug!("Miner cache root {}", cache.root().display());
    let log = |msg: String| println!("{}", msg);
    let cached = updater::ensure_latest_miner(&cache, &log).await?;
    tracing::info!(
        "Miner {} ({} bytes) at {}",
        cached.version_tag,
        cached.size_bytes,
        cached.path.display()
    );
    println!("{}", cached.path.display());
    Ok(())
}

/// Print the detected platform and the asset name pattern it selects
pub fn platform() -> anyhow::Result<()> {
    let target = resolve_platform()?;
    println!("Platform: {}", target);
    println!(
        "Asset:    {}",
        target.asset_name(MINER_BINARY_NAME, "<version>")
    );
    Ok(())
}
