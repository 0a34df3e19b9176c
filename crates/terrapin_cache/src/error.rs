use std::{
    fmt,
    fmt::{Display, Formatter},
    path::PathBuf,
    sync::Arc,
};

use terrapin_lockfile::LockfileError;
use terrapin_verify::VerifyError;

/// Errors of the cache engine. Worker errors stick to their entry and are
/// surfaced through [`crate::ProviderCache::wait_for_ready`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CacheError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("the cache is shutting down")]
    Cancelled,

    #[error("provider {0} carries no download URL")]
    MissingDownloadUrl(String),

    #[error("failed to create directory '{}'", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to link '{}' to the user plug-in cache", path.display())]
    Symlink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to fetch '{url}'")]
    Fetch {
        url: String,
        #[source]
        source: reqwest_middleware::Error,
    },

    #[error("'{url}' answered HTTP {status}")]
    FetchStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("failed to write '{}'", path.display())]
    WriteArchive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to unpack '{}'", path.display())]
    Unpack {
        path: PathBuf,
        #[source]
        source: UnpackError,
    },

    #[error("failed to open the cache lock '{}'", path.display())]
    LockOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "could not acquire the cache lock '{}' after {attempts} attempts; \
         if no other process is caching providers, remove the file manually",
        path.display()
    )]
    LockExhausted { path: PathBuf, attempts: u32 },

    #[error("failed to remove '{}'", path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error(transparent)]
    Lockfile(#[from] LockfileError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

impl From<simple_spawn_blocking::Cancelled> for CacheError {
    fn from(_: simple_spawn_blocking::Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Several sticky entry errors rolled into one, one line per failure.
#[derive(Debug)]
pub struct AggregateError(pub Vec<Arc<CacheError>>);

impl Display for AggregateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} provider(s) failed to cache:", self.0.len())?;
        for error in &self.0 {
            writeln!(f, "  {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

/// Errors produced while extracting a provider archive.
#[derive(Debug, thiserror::Error)]
pub enum UnpackError {
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error("archive entry '{0}' escapes the destination directory")]
    UnsafePath(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
