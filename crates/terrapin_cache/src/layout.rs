//! Where cached providers live on disk.

use std::path::{Path, PathBuf};

use terrapin_registry::Provider;

use crate::CacheError;

/// The directory layout of the cache.
///
/// Unpacked packages and downloaded archives live under two distinct roots:
/// the engine treats every file below the unpacked root as a provider
/// binary, so an archive must never land there.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    cache_dir: PathBuf,
    archive_dir: PathBuf,
    user_cache_dir: Option<PathBuf>,
}

impl CacheLayout {
    /// Creates a layout rooted at `cache_dir` (unpacked packages) and
    /// `archive_dir` (downloaded archives and their lock files). Fails when
    /// the two roots coincide.
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        archive_dir: impl Into<PathBuf>,
        user_cache_dir: Option<PathBuf>,
    ) -> Result<Self, CacheError> {
        let cache_dir = cache_dir.into();
        let archive_dir = archive_dir.into();
        if cache_dir == archive_dir {
            return Err(CacheError::Config(format!(
                "the provider cache directory and the archive directory must differ, both are '{}'",
                cache_dir.display()
            )));
        }
        Ok(Self {
            cache_dir,
            archive_dir,
            user_cache_dir,
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// The final unpacked location of a provider:
    /// `<cache_dir>/<registry>/<namespace>/<name>/<version>/<os>_<arch>`.
    pub fn package_dir(&self, provider: &Provider) -> PathBuf {
        self.cache_dir.join(provider.package_rel_path())
    }

    /// The same layout below the engine's per-user plug-in cache, when one
    /// is configured.
    pub fn user_package_dir(&self, provider: &Provider) -> Option<PathBuf> {
        self.user_cache_dir
            .as_ref()
            .map(|root| root.join(provider.package_rel_path()))
    }

    /// Scratch location for the downloaded archive. The extension is taken
    /// from the remote file name.
    pub fn archive_path(&self, provider: &Provider, extension: &str) -> PathBuf {
        self.archive_dir
            .join(format!("{}.{}", provider.archive_stem(), extension))
    }

    /// The advisory lock file guarding materialization of a provider across
    /// processes.
    pub fn lock_path(&self, provider: &Provider) -> PathBuf {
        self.archive_dir
            .join(format!("{}.lock", provider.archive_stem()))
    }
}
