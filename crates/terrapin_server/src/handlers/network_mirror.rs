//! The network-mirror source: the mirror layout served over HTTP(S).

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use reqwest_middleware::ClientWithMiddleware;
use serde::de::DeserializeOwned;
use terrapin_cache::ProviderCache;
use terrapin_registry::{
    MirrorIndex, MirrorVersion, Provider, ProviderPackage, RouteMatches, ServiceDiscovery,
};
use url::Url;

use super::{archive_filename, join_segments, synthesized_version_list, RequestContext, SourceHandler};
use crate::error::ServerError;

pub struct NetworkMirrorHandler {
    client: ClientWithMiddleware,
    base_url: Url,
    cache: ProviderCache,
    matches: RouteMatches,
}

impl NetworkMirrorHandler {
    pub fn new(
        client: ClientWithMiddleware,
        base_url: Url,
        cache: ProviderCache,
        matches: RouteMatches,
    ) -> Self {
        Self {
            client,
            base_url,
            cache,
            matches,
        }
    }

    fn document_url(&self, provider: &Provider, document: &str) -> Result<Url, ServerError> {
        join_segments(
            &self.base_url,
            &[
                &provider.address.registry,
                &provider.address.namespace,
                &provider.address.name,
                document,
            ],
        )
    }

    async fn fetch_document<T: DeserializeOwned>(&self, url: Url) -> Result<T, ServerError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(ServerError::Upstream)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ServerError::NotFound);
        }
        if !response.status().is_success() {
            return Err(ServerError::UpstreamStatus(response.status()));
        }
        response
            .json()
            .await
            .map_err(|err| ServerError::Protocol(format!("mirror document '{url}': {err}")))
    }
}

#[async_trait]
impl SourceHandler for NetworkMirrorHandler {
    fn kind(&self) -> &'static str {
        "network_mirror"
    }

    fn route_matches(&self) -> &RouteMatches {
        &self.matches
    }

    async fn get_versions(&self, provider: &Provider) -> Result<Response, ServerError> {
        let url = self.document_url(provider, "index.json")?;
        let index: MirrorIndex = self.fetch_document(url).await?;
        Ok(Json(synthesized_version_list(&index)).into_response())
    }

    async fn get_platform(
        &self,
        _ctx: &RequestContext,
        provider: &Provider,
        correlation_id: Option<&str>,
    ) -> Result<Response, ServerError> {
        let Some(request_id) = correlation_id else {
            return Err(ServerError::NotFound);
        };

        let url = self.document_url(provider, &format!("{}.json", provider.version))?;
        let version: MirrorVersion = self.fetch_document(url.clone()).await?;
        let platform = provider.platform.to_string();
        let archive = version.archives.get(&platform).ok_or_else(|| {
            ServerError::Protocol(format!(
                "mirror lists no archive for platform '{platform}'"
            ))
        })?;

        // Relative archive locations resolve against the document that
        // named them, exactly like a browser would.
        let download_url = url
            .join(&archive.url)
            .map_err(|err| ServerError::Url(err.to_string()))?
            .to_string();
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
        Err(ServerError::NotImplemented)
    }

    async fn discovery_url(&self, _registry: &str) -> Result<Arc<ServiceDiscovery>, ServerError> {
        Ok(Arc::new(ServiceDiscovery::default_endpoints()))
    }
}
