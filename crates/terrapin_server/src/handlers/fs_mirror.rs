//! The filesystem-mirror source: a pre-staged mirror layout on local disk.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use terrapin_cache::ProviderCache;
use terrapin_registry::{
    MirrorIndex, MirrorVersion, Provider, ProviderPackage, RouteMatches, ServiceDiscovery,
};
use url::Url;

use super::{archive_filename, synthesized_version_list, RequestContext, SourceHandler};
use crate::error::ServerError;

pub struct FsMirrorHandler {
    root: PathBuf,
    cache: ProviderCache,
    matches: RouteMatches,
}

impl FsMirrorHandler {
    pub fn new(root: impl Into<PathBuf>, cache: ProviderCache, matches: RouteMatches) -> Self {
        Self {
            root: root.into(),
            cache,
            matches,
        }
    }

    fn provider_dir(&self, provider: &Provider) -> PathBuf {
        self.root
            .join(&provider.address.registry)
            .join(&provider.address.namespace)
            .join(&provider.address.name)
    }

    async fn read_document<T: DeserializeOwned>(&self, path: &Path) -> Result<T, ServerError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ServerError::NotFound)
            }
            Err(err) => return Err(ServerError::Io(err)),
        };
        serde_json::from_slice(&bytes).map_err(|err| {
            ServerError::Protocol(format!("mirror document '{}': {err}", path.display()))
        })
    }

    /// Archive locations in mirror metadata may be absolute URLs, absolute
    /// paths, or paths relative to the mirror root.
    fn resolve_archive_url(&self, url: &str) -> String {
        if let Ok(parsed) = Url::parse(url) {
            if parsed.has_host() {
                return url.to_owned();
            }
        }
        let path = Path::new(url);
        if path.is_absolute() {
            url.to_owned()
        } else {
            self.root.join(path).to_string_lossy().into_owned()
        }
    }
}

#[async_trait]
impl SourceHandler for FsMirrorHandler {
    fn kind(&self) -> &'static str {
        "filesystem_mirror"
    }

    fn route_matches(&self) -> &RouteMatches {
        &self.matches
    }

    async fn get_versions(&self, provider: &Provider) -> Result<Response, ServerError> {
        let index: MirrorIndex = self
            .read_document(&self.provider_dir(provider).join("index.json"))
            .await?;
        Ok(Json(synthesized_version_list(&index)).into_response())
    }

    async fn get_platform(
        &self,
        _ctx: &RequestContext,
        provider: &Provider,
        correlation_id: Option<&str>,
    ) -> Result<Response, ServerError> {
        // Mirror metadata cannot populate a full platform document, so a
        // pass-through request has nothing to answer.
        let Some(request_id) = correlation_id else {
            return Err(ServerError::NotFound);
        };

        let version: MirrorVersion = self
            .read_document(
                &self
                    .provider_dir(provider)
                    .join(format!("{}.json", provider.version)),
            )
            .await?;
        let platform = provider.platform.to_string();
        let archive = version.archives.get(&platform).ok_or_else(|| {
            ServerError::Protocol(format!(
                "mirror lists no archive for platform '{platform}'"
            ))
        })?;

        let download_url = self.resolve_archive_url(&archive.url);
        let package = ProviderPackage {
            filename: archive_filename(&download_url),
            download_url,
            ..ProviderPackage::default()
        };
        self.cache
            .cache_provider(request_id, provider.clone(), package)
            .await?;
        Ok(StatusCode::LOCKED.into_response())
    }

    async fn download(&self, _host: &str, _path_and_query: &str) -> Result<Response, ServerError> {
        // Mirrored archives reach the engine through the cache, never
        // through this endpoint.
        Err(ServerError::NotImplemented)
    }

    async fn discovery_url(&self, _registry: &str) -> Result<Arc<ServiceDiscovery>, ServerError> {
        Ok(Arc::new(ServiceDiscovery::default_endpoints()))
    }
}
