//! The per-provider cache entry.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
};

use parking_lot::Mutex;
use terrapin_registry::{Provider, ProviderPackage};
use tokio::sync::watch;

use crate::{CacheError, CacheLayout};

/// The state of one `(provider, version, platform)` in the cache.
///
/// An entry is created by the first caching request for its identity; later
/// requests only attach their correlation ID. The owning worker materializes
/// it at most once and records the sticky outcome.
pub struct CacheEntry {
    pub provider: Provider,
    /// Registry metadata captured when the entry was requested.
    pub package: ProviderPackage,

    /// Final unpacked location.
    pub package_dir: PathBuf,
    /// Scratch location of the downloaded archive.
    pub archive_path: PathBuf,
    /// Advisory inter-process lock file.
    pub lock_path: PathBuf,
    /// The engine's per-user plug-in cache location, when configured.
    pub user_dir: Option<PathBuf>,

    request_ids: Mutex<Vec<String>>,
    started: watch::Sender<bool>,
    outcome: OnceLock<Result<(), Arc<CacheError>>>,
    archive_cached: AtomicBool,
    sums_document: OnceLock<Vec<u8>>,
}

impl CacheEntry {
    pub(crate) fn new(
        provider: Provider,
        package: ProviderPackage,
        layout: &CacheLayout,
        request_id: &str,
    ) -> Arc<Self> {
        let (started, _) = watch::channel(false);
        Arc::new(Self {
            package_dir: layout.package_dir(&provider),
            archive_path: layout.archive_path(&provider, package.archive_extension()),
            lock_path: layout.lock_path(&provider),
            user_dir: layout.user_package_dir(&provider),
            provider,
            package,
            request_ids: Mutex::new(vec![request_id.to_owned()]),
            started,
            outcome: OnceLock::new(),
            archive_cached: AtomicBool::new(false),
            sums_document: OnceLock::new(),
        })
    }

    /// Attaches another correlation ID to this entry.
    pub fn subscribe(&self, request_id: &str) {
        let mut ids = self.request_ids.lock();
        if !ids.iter().any(|id| id == request_id) {
            ids.push(request_id.to_owned());
        }
    }

    pub fn has_request_id(&self, request_id: &str) -> bool {
        self.request_ids.lock().iter().any(|id| id == request_id)
    }

    /// Signals every publisher that the worker owns this entry now.
    pub(crate) fn mark_started(&self) {
        self.started.send_replace(true);
    }

    /// Blocks until the worker has taken over this entry (it holds the
    /// engine's ready guard from that point on).
    pub(crate) async fn wait_started(&self) {
        let mut started = self.started.subscribe();
        // The sender lives inside this entry, so the receiver cannot fail.
        let _ = started.wait_for(|started| *started).await;
    }

    /// Records the worker's terminal outcome. The first call wins.
    pub(crate) fn set_outcome(&self, outcome: Result<(), Arc<CacheError>>) {
        let _ = self.outcome.set(outcome);
    }

    /// Whether the package has been materialized successfully.
    pub fn is_ready(&self) -> bool {
        matches!(self.outcome.get(), Some(Ok(())))
    }

    /// The sticky error of this entry, if the worker failed.
    pub fn error(&self) -> Option<Arc<CacheError>> {
        match self.outcome.get() {
            Some(Err(error)) => Some(error.clone()),
            _ => None,
        }
    }

    pub(crate) fn set_archive_cached(&self) {
        self.archive_cached.store(true, Ordering::Release);
    }

    /// Whether the archive at [`CacheEntry::archive_path`] was fetched by
    /// this server (and is therefore ours to delete at shutdown).
    pub fn archive_cached(&self) -> bool {
        self.archive_cached.load(Ordering::Acquire)
    }

    pub(crate) fn set_sums_document(&self, document: Vec<u8>) {
        let _ = self.sums_document.set(document);
    }

    /// The SHA-256 sums document fetched during authentication, when the
    /// registry published one.
    pub fn sums_document(&self) -> Option<&[u8]> {
        self.sums_document.get().map(Vec::as_slice)
    }

    /// The hashes a lock-file update may record for this entry: the `h1:`
    /// hash of the unpacked directory plus the `zh:` checksums.
    pub fn lock_hashes(&self) -> Result<Vec<String>, CacheError> {
        Ok(terrapin_verify::acceptable_hashes(
            &self.package_dir,
            self.sums_document(),
        )?)
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("provider", &self.provider.to_string())
            .field("package_dir", &self.package_dir)
            .field("ready", &self.is_ready())
            .finish()
    }
}
