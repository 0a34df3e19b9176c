//! The provider cache service: index, dispatcher and per-entry workers.
//!
//! Concurrency contract:
//!
//! * `cache_mu` (the index mutex) is held across both the index lookup and
//!   the publication of a new entry, so two racing requests for one identity
//!   either attach to the existing entry or one of them owns the new one.
//! * Each worker takes `ready_mu.read()` *before* signalling `started`, and
//!   the publisher does not return before `started` fires. A
//!   `wait_for_ready` issued afterwards therefore blocks on
//!   `ready_mu.write()` until every in-flight worker of the batch has
//!   finished and released its read guard.
//! * Entry outcomes are sticky; `wait_for_ready` aggregates them per
//!   correlation ID.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use reqwest_middleware::ClientWithMiddleware;
use simple_spawn_blocking::tokio::run_blocking_task;
use terrapin_lockfile::ProviderLock;
use terrapin_networking::retry_policies::download_retry_policy;
use terrapin_registry::{Provider, ProviderPackage};
use terrapin_verify::PackageAuthenticator;
use tokio::{
    sync::{mpsc, Mutex, RwLock},
    task::{JoinHandle, JoinSet},
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    entry::CacheEntry, entry_lock::EntryLock, error::AggregateError, fetch, unpack, CacheError,
    CacheLayout,
};

/// The cache engine. Cloning shares the engine; one instance runs per server
/// process.
#[derive(Clone)]
pub struct ProviderCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    layout: CacheLayout,
    client: ClientWithMiddleware,
    authenticator: Arc<PackageAuthenticator>,
    /// `cache_mu`: guards every read and write of the entry index.
    index: Mutex<Vec<Arc<CacheEntry>>>,
    /// `ready_mu`: read-held by workers, write-taken by `wait_for_ready`.
    ready_mu: Arc<RwLock<()>>,
    intents: mpsc::Sender<Arc<CacheEntry>>,
    dispatcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl ProviderCache {
    /// Creates the engine and spawns its dispatcher task. Must be called
    /// from within a tokio runtime.
    pub fn new(
        layout: CacheLayout,
        client: ClientWithMiddleware,
        authenticator: PackageAuthenticator,
    ) -> Self {
        // Capacity one is the closest tokio gets to a rendezvous channel;
        // the `started` handshake supplies the actual hand-off guarantee.
        let (intents_tx, intents_rx) = mpsc::channel(1);
        let inner = Arc::new(CacheInner {
            layout,
            client,
            authenticator: Arc::new(authenticator),
            index: Mutex::new(Vec::new()),
            ready_mu: Arc::new(RwLock::new(())),
            intents: intents_tx,
            dispatcher: parking_lot::Mutex::new(None),
            cancel: CancellationToken::new(),
        });
        let handle = tokio::spawn(dispatch(inner.clone(), intents_rx));
        *inner.dispatcher.lock() = Some(handle);
        Self { inner }
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.inner.layout
    }

    /// Registers a caching intent for `provider` on behalf of `request_id`.
    /// A second request for the same identity only attaches its correlation
    /// ID to the existing entry.
    ///
    /// Returns once the entry's worker has taken over (and with it the ready
    /// guard), which is what makes a subsequent
    /// [`ProviderCache::wait_for_ready`] observe this intent. The actual
    /// materialization runs in the background.
    pub async fn cache_provider(
        &self,
        request_id: &str,
        provider: Provider,
        package: ProviderPackage,
    ) -> Result<(), CacheError> {
        let mut index = self.inner.index.lock().await;
        let entry = match index.iter().find(|entry| entry.provider == provider) {
            Some(existing) => {
                existing.subscribe(request_id);
                existing.clone()
            }
            None => {
                let entry = CacheEntry::new(provider, package, &self.inner.layout, request_id);
                index.push(entry.clone());
                // Publish while still holding `cache_mu` so no concurrent
                // request can observe the index without this entry.
                self.inner
                    .intents
                    .send(entry.clone())
                    .await
                    .map_err(|_| CacheError::Cancelled)?;
                entry
            }
        };
        drop(index);

        tokio::select! {
            _ = self.inner.cancel.cancelled() => Err(CacheError::Cancelled),
            () = entry.wait_started() => Ok(()),
        }
    }

    /// Waits until every entry subscribed by `request_id` has a terminal
    /// outcome and returns the ready entries. Errors of individual entries
    /// are aggregated.
    pub async fn wait_for_ready(
        &self,
        request_id: &str,
    ) -> Result<Vec<Arc<CacheEntry>>, CacheError> {
        let _sweep = self.inner.ready_mu.write().await;
        let entries = self.find_by_request_id(request_id).await;

        let mut errors = Vec::new();
        let mut ready = Vec::new();
        for entry in entries {
            if let Some(error) = entry.error() {
                errors.push(error);
            } else if entry.is_ready() {
                ready.push(entry);
            } else {
                // No outcome means the intent never reached a worker; that
                // only happens when the engine is shutting down.
                errors.push(Arc::new(CacheError::Cancelled));
            }
        }
        if errors.is_empty() {
            Ok(ready)
        } else {
            Err(AggregateError(errors).into())
        }
    }

    /// The entry for `provider`, if one exists.
    pub async fn get(&self, provider: &Provider) -> Option<Arc<CacheEntry>> {
        let index = self.inner.index.lock().await;
        index.iter().find(|entry| &entry.provider == provider).cloned()
    }

    /// Every entry whose identity matches `pattern`.
    pub async fn find_by_pattern(
        &self,
        pattern: &terrapin_registry::ProviderPattern,
    ) -> Vec<Arc<CacheEntry>> {
        let index = self.inner.index.lock().await;
        index
            .iter()
            .filter(|entry| pattern.matches(&entry.provider))
            .cloned()
            .collect()
    }

    /// Every entry carrying `request_id` as a subscriber.
    pub async fn find_by_request_id(&self, request_id: &str) -> Vec<Arc<CacheEntry>> {
        let index = self.inner.index.lock().await;
        index
            .iter()
            .filter(|entry| entry.has_request_id(request_id))
            .cloned()
            .collect()
    }

    /// The entry whose registry metadata points at `download_url`, if any.
    /// The downloads endpoint uses this to serve archives from disk instead
    /// of proxying the remote host.
    pub async fn entry_by_download_url(&self, download_url: &str) -> Option<Arc<CacheEntry>> {
        let index = self.inner.index.lock().await;
        index
            .iter()
            .find(|entry| entry.package.download_url == download_url)
            .cloned()
    }

    /// Merges the hashes of every ready entry of `request_id` into the lock
    /// document of `work_dir`.
    pub async fn update_lock_file(
        &self,
        work_dir: &Path,
        request_id: &str,
    ) -> Result<PathBuf, CacheError> {
        let entries = self.find_by_request_id(request_id).await;
        let mut updates = Vec::new();
        for entry in entries.into_iter().filter(|entry| entry.is_ready()) {
            let hashes = {
                let entry = entry.clone();
                run_blocking_task(move || entry.lock_hashes()).await?
            };
            updates.push(ProviderLock::new(
                entry.provider.address.to_string(),
                entry.provider.version.clone(),
                hashes,
            ));
        }

        let work_dir = work_dir.to_owned();
        run_blocking_task(move || {
            terrapin_lockfile::update_lock_file(&work_dir, updates).map_err(CacheError::from)
        })
        .await
    }

    /// Terminates the engine: cancels the dispatcher, waits for in-flight
    /// workers, deletes every archive this server fetched and aggregates
    /// worker and cleanup errors.
    pub async fn shutdown(&self) -> Result<(), CacheError> {
        self.inner.cancel.cancel();
        let dispatcher = self.inner.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            let _ = dispatcher.await;
        }

        let index = self.inner.index.lock().await;
        let mut errors: Vec<Arc<CacheError>> =
            index.iter().filter_map(|entry| entry.error()).collect();
        for entry in index.iter().filter(|entry| entry.archive_cached()) {
            match tokio::fs::remove_file(&entry.archive_path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => errors.push(Arc::new(CacheError::Cleanup {
                    path: entry.archive_path.clone(),
                    source,
                })),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AggregateError(errors).into())
        }
    }
}

/// The dispatcher: consumes intents one at a time, takes the ready guard,
/// signals the publisher and runs one worker per entry.
async fn dispatch(inner: Arc<CacheInner>, mut intents: mpsc::Receiver<Arc<CacheEntry>>) {
    let mut workers = JoinSet::new();
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            intent = intents.recv() => {
                let Some(entry) = intent else { break };
                let inner = inner.clone();
                // The dispatcher itself must never block on `ready_mu`:
                // the read guard is taken inside the worker, before the
                // publisher is released via `started`.
                workers.spawn(async move {
                    let guard = inner.ready_mu.clone().read_owned().await;
                    entry.mark_started();
                    let cancel = inner.cancel.clone();
                    let result = tokio::select! {
                        _ = cancel.cancelled() => Err(Arc::new(CacheError::Cancelled)),
                        result = warm_up(&inner, &entry) => result.map_err(Arc::new),
                    };
                    match &result {
                        Ok(()) => {
                            tracing::debug!(provider = %entry.provider, "provider is ready")
                        }
                        Err(error) => tracing::error!(
                            provider = %entry.provider,
                            error = %error,
                            "failed to cache provider"
                        ),
                    }
                    entry.set_outcome(result);
                    drop(guard);
                });
            }
        }
    }
    while workers.join_next().await.is_some() {}
}

/// Materializes one entry. Runs under the entry's inter-process file lock.
#[tracing::instrument(skip_all, fields(provider = %entry.provider))]
async fn warm_up(inner: &Arc<CacheInner>, entry: &Arc<CacheEntry>) -> Result<(), CacheError> {
    let _file_lock = EntryLock::acquire(&entry.lock_path).await?;

    // Another run (or another process) may have finished this entry already.
    if tokio::fs::metadata(&entry.package_dir).await.is_ok() {
        tracing::debug!("package directory already exists");
        return Ok(());
    }

    if let Some(parent) = entry.package_dir.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| CacheError::CreateDir {
                path: parent.to_owned(),
                source,
            })?;
    }

    // The engine's own per-user plug-in cache takes precedence over any
    // download.
    if let Some(user_dir) = &entry.user_dir {
        if tokio::fs::metadata(user_dir).await.is_ok() {
            symlink_dir(user_dir, &entry.package_dir).await?;
            tracing::info!(
                user_dir = %user_dir.display(),
                "linked package to the user plug-in cache"
            );
            return Ok(());
        }
    }

    if entry.package.download_url.is_empty() {
        return Err(CacheError::MissingDownloadUrl(entry.provider.to_string()));
    }

    let archive_path = match local_archive(&entry.package.download_url) {
        Some(local) => local,
        None => {
            fetch::download_archive(
                &inner.client,
                &entry.package.download_url,
                &entry.archive_path,
                &download_retry_policy(),
            )
            .await?;
            entry.set_archive_cached();
            entry.archive_path.clone()
        }
    };

    unpack::extract_zip(&archive_path, &entry.package_dir).await?;

    if let Err(error) = authenticate(inner, entry, &archive_path).await {
        // A package that fails authentication must not survive on disk.
        let _ = tokio::fs::remove_dir_all(&entry.package_dir).await;
        if entry.archive_cached() {
            let _ = tokio::fs::remove_file(&entry.archive_path).await;
        }
        return Err(error);
    }
    Ok(())
}

/// Runs the authentication chain for a freshly unpacked entry. Entries from
/// mirrors carry no checksum metadata and are exempt.
async fn authenticate(
    inner: &Arc<CacheInner>,
    entry: &Arc<CacheEntry>,
    archive_path: &Path,
) -> Result<(), CacheError> {
    let package = &entry.package;
    if package.shasum.is_empty() || package.shasums_url.is_empty() {
        tracing::debug!("no checksum metadata published, skipping authentication");
        return Ok(());
    }

    let retry_policy = download_retry_policy();
    let sums = fetch::fetch_bytes(&inner.client, &package.shasums_url, &retry_policy).await?;
    let signature = if package.shasums_signature_url.is_empty() {
        None
    } else {
        Some(
            fetch::fetch_bytes(&inner.client, &package.shasums_signature_url, &retry_policy)
                .await?,
        )
    };

    let verification = {
        let authenticator = inner.authenticator.clone();
        let package = package.clone();
        let archive_path = archive_path.to_owned();
        let sums = sums.clone();
        run_blocking_task(move || {
            authenticator
                .authenticate(&package, &archive_path, &sums, signature.as_deref())
                .map_err(CacheError::from)
        })
        .await?
    };
    tracing::info!(?verification, "package authenticated");
    entry.set_sums_document(sums);
    Ok(())
}

fn local_archive(download_url: &str) -> Option<PathBuf> {
    let path = match Url::parse(download_url) {
        Ok(url) if url.scheme() == "file" => url.to_file_path().ok()?,
        Ok(url) if url.has_host() => return None,
        _ => PathBuf::from(download_url),
    };
    path.is_file().then_some(path)
}

async fn symlink_dir(original: &Path, link: &Path) -> Result<(), CacheError> {
    let symlink_err = |source| CacheError::Symlink {
        path: link.to_owned(),
        source,
    };
    #[cfg(unix)]
    return tokio::fs::symlink(original, link).await.map_err(symlink_err);
    #[cfg(windows)]
    return tokio::fs::symlink_dir(original, link)
        .await
        .map_err(symlink_err);
}
