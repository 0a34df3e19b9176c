//! The direct source: proxies the provider's own registry.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use terrapin_cache::ProviderCache;
use terrapin_registry::{Provider, ProviderPackage, RouteMatches, ServiceDiscovery};
use url::Url;

use super::{join_segments, RequestContext, SourceHandler};
use crate::{discovery::DiscoveryCache, error::ServerError, proxy::ReverseProxy};

/// URL fields of the platform document that must be resolved and, on the
/// pass-through path, rewritten back through this server.
const URL_FIELDS: [&str; 3] = ["download_url", "shasums_url", "shasums_signature_url"];

pub struct DirectHandler {
    proxy: ReverseProxy,
    discovery: Arc<DiscoveryCache>,
    cache: ProviderCache,
    matches: RouteMatches,
    download_scheme: String,
}

impl DirectHandler {
    pub fn new(
        proxy: ReverseProxy,
        discovery: Arc<DiscoveryCache>,
        cache: ProviderCache,
        matches: RouteMatches,
        download_scheme: impl Into<String>,
    ) -> Self {
        Self {
            proxy,
            discovery,
            cache,
            matches,
            download_scheme: download_scheme.into(),
        }
    }

    async fn platform_url(&self, provider: &Provider) -> Result<Url, ServerError> {
        let base = self
            .discovery
            .providers_url(&provider.address.registry)
            .await?;
        join_segments(
            &base,
            &[
                &provider.address.namespace,
                &provider.address.name,
                &provider.version,
                "download",
                &provider.platform.os,
                &provider.platform.arch,
            ],
        )
    }
}

#[async_trait]
impl SourceHandler for DirectHandler {
    fn kind(&self) -> &'static str {
        "direct"
    }

    fn route_matches(&self) -> &RouteMatches {
        &self.matches
    }

    async fn get_versions(&self, provider: &Provider) -> Result<Response, ServerError> {
        let base = self
            .discovery
            .providers_url(&provider.address.registry)
            .await?;
        let target = join_segments(
            &base,
            &[
                &provider.address.namespace,
                &provider.address.name,
                "versions",
            ],
        )?;
        self.proxy.forward(target).await
    }

    async fn get_platform(
        &self,
        ctx: &RequestContext,
        provider: &Provider,
        correlation_id: Option<&str>,
    ) -> Result<Response, ServerError> {
        let target = self.platform_url(provider).await?;

        match correlation_id {
            Some(request_id) => {
                let document = self.proxy.fetch_json(target.clone()).await?;
                let mut package: ProviderPackage =
                    serde_json::from_value(serde_json::Value::Object(document))
                        .map_err(|err| ServerError::Protocol(err.to_string()))?;

                // The registry may answer relative URLs; resolve them
                // against the endpoint that served the document.
                for field in [
                    &mut package.download_url,
                    &mut package.shasums_url,
                    &mut package.shasums_signature_url,
                ] {
                    if !field.is_empty() {
                        *field = target
                            .join(field)
                            .map_err(|err| ServerError::Url(err.to_string()))?
                            .to_string();
                    }
                }

                self.cache
                    .cache_provider(request_id, provider.clone(), package)
                    .await?;
                Ok(StatusCode::LOCKED.into_response())
            }
            None => {
                let ctx = ctx.clone();
                let resolve_base = target.clone();
                self.proxy
                    .forward_json(target, move |document| {
                        for key in URL_FIELDS {
                            if let Some(serde_json::Value::String(value)) = document.get_mut(key)
                            {
                                if value.is_empty() {
                                    continue;
                                }
                                if let Ok(absolute) = resolve_base.join(value) {
                                    *value = ctx.downloads_url(&absolute);
                                }
                            }
                        }
                    })
                    .await
            }
        }
    }

    async fn download(&self, host: &str, path_and_query: &str) -> Result<Response, ServerError> {
        let target = Url::parse(&format!(
            "{}://{host}/{path_and_query}",
            self.download_scheme
        ))
        .map_err(|err| ServerError::Url(err.to_string()))?;
        self.proxy.forward(target).await
    }

    async fn discovery_url(&self, registry: &str) -> Result<Arc<ServiceDiscovery>, ServerError> {
        self.discovery.discover(registry).await
    }
}
