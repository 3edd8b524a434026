//! Local host filesystem operations on volume directories

use crate::domain::ports::HostVolumeOps;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

/// [`HostVolumeOps`] against the filesystem this process sees
#[derive(Debug, Clone, Default)]
pub struct LocalHost;

impl LocalHost {
    pub fn new() -> Self {
        Self
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("blocking task failed: {}", e)))?
}

#[async_trait]
impl HostVolumeOps for LocalHost {
    async fn unmount(&self, path: &Path) -> Result<()> {
        let target = path.to_path_buf();
        blocking(move || Ok(nix::mount::umount(&target)?)).await?;
        debug!(path = %path.display(), "Unmounted");
        Ok(())
    }

    async fn remove_tree(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_dir_all(path).await?;
        debug!(path = %path.display(), "Removed directory tree");
        Ok(())
    }

    async fn available_bytes(&self, path: &Path) -> Result<u64> {
        let target = path.to_path_buf();
        let stat = blocking(move || Ok(nix::sys::statvfs::statvfs(&target)?)).await?;
        #[allow(clippy::unnecessary_cast)]
        let bytes = (stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64);
        Ok(bytes)
    }
}
