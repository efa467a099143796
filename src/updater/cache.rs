//! Per-version on-disk cache of downloaded miner binaries
//!
//! Layout is `<root>/bin/<release tag>/<asset name>`. Entries are validated by
//! the declared size on every reuse and replaced through a temp file + rename.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use super::platform::PlatformTarget;
use super::release::{select_asset, Release, ReleaseSource};
use super::UpdateError;

/// A miner binary present in the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBinary {
    pub path: PathBuf,
    pub version_tag: String,
    pub size_bytes: u64,
    /// SHA-256, logged for troubleshooting only
    pub digest: Option<String>,
}

/// Binary cache rooted at a per-user data directory
pub struct BinaryCache {
    root: PathBuf,
    source: Arc<dyn ReleaseSource>,
}

impl BinaryCache {
    pub fn new(root: impl Into<PathBuf>, source: Arc<dyn ReleaseSource>) -> Self {
        Self {
            root: root.into(),
            source,
        }
    }

    /// Cache rooted at the default application data directory
    pub fn with_default_root(source: Arc<dyn ReleaseSource>) -> Option<Self> {
        default_cache_root().map(|root| Self::new(root, source))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source(&self) -> &Arc<dyn ReleaseSource> {
        &self.source
    }

    /// Directory holding binaries for one release tag
    pub fn version_dir(&self, tag: &str) -> PathBuf {
        self.root.join("bin").join(tag)
    }

    /// Return the cached binary for `release`, downloading it if absent or invalid.
    pub async fn get(
        &self,
        release: &Release,
        platform: &PlatformTarget,
        log: &(dyn Fn(String) + Send + Sync),
    ) -> Result<CachedBinary, UpdateError> {
        let asset = select_asset(release, platform)?;

        let bin_dir = self.version_dir(&release.tag);
        tokio::fs::create_dir_all(&bin_dir).await?;
        let local_path = bin_dir.join(&asset.name);

        if let Ok(meta) = tokio::fs::metadata(&local_path).await {
            let local_size = meta.len();
            let expected = asset.size_bytes.unwrap_or(local_size);
            if local_size == expected {
                let digest = digest_of(&local_path).await;
                if let Some(ref h) = digest {
                    log(format!("[*] Cached miner SHA256: {}", h));
                }
                log(format!("[*] Using cached miner: {}", local_path.display()));
                return Ok(CachedBinary {
                    path: local_path,
                    version_tag: release.tag.clone(),
                    size_bytes: local_size,
                    digest,
                });
            }

            tracing::warn!(
                "Cached miner {} has {} bytes, release declares {}",
                local_path.display(),
                local_size,
                expected
            );
            log(format!(
                "[!] Cached miner size mismatch (local={} bytes, expected={} bytes). Re-downloading...",
                local_size, expected
            ));
        }

        log(format!("[*] Downloading latest miner: {}", asset.name));
        let tmp_path = bin_dir.join(format!("{}.tmp", asset.name));

        let written = match self.source.download_to(asset, &tmp_path).await {
            Ok(n) => n,
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(e);
            }
        };

        if let Some(expected) = asset.size_bytes.filter(|&n| n != written) {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(UpdateError::SizeMismatch {
                expected,
                actual: written,
            });
        }

        if let Err(e) = install(&tmp_path, &local_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        tracing::info!("Installed {} ({} bytes)", local_path.display(), written);

        let digest = digest_of(&local_path).await;
        if let Some(ref h) = digest {
            log(format!("[*] Downloaded miner SHA256: {}", h));
        }
        log(format!("[+] Miner ready: {}", local_path.display()));

        Ok(CachedBinary {
            path: local_path,
            version_tag: release.tag.clone(),
            size_bytes: written,
            digest,
        })
    }
}

/// Make the temp file executable and move it over the final path.
async fn install(tmp_path: &Path, final_path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut perms = tokio::fs::metadata(tmp_path).await?.permissions();
        perms.set_mode(perms.mode() | 0o100);
        tokio::fs::set_permissions(tmp_path, perms).await?;
    }

    tokio::fs::rename(tmp_path, final_path).await
}

async fn digest_of(path: &Path) -> Option<String> {
    let path = path.to_path_buf();
    match tokio::task::spawn_blocking(move || sha256_file(&path)).await {
        Ok(Ok(h)) => Some(h),
        Ok(Err(e)) => {
            tracing::debug!("Could not hash miner binary: {}", e);
            None
        }
        Err(_) => None,
    }
}

/// Hex SHA-256 of a file's contents
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Per-user data directory for cached miners
pub fn default_cache_root() -> Option<PathBuf> {
    let base = dirs::data_local_dir()?;
    if cfg!(any(target_os = "windows", target_os = "macos")) {
        Some(base.join("HashcashMiner"))
    } else {
        Some(base.join("hashcashminer"))
    }
}
