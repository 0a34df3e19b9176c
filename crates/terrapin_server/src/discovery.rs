//! Per-registry service discovery with a process-wide cache.

use std::sync::Arc;

use dashmap::DashMap;
use reqwest_middleware::ClientWithMiddleware;
use terrapin_registry::ServiceDiscovery;
use url::Url;

use crate::error::{is_unreachable, ServerError};

/// Fetches and caches `/.well-known/terraform.json` per registry host.
///
/// Hosts that cannot be reached, or that do not serve a discovery document,
/// are assumed to use the conventional endpoints; that assumption is cached
/// like a real answer so an offline registry is probed only once.
pub struct DiscoveryCache {
    client: ClientWithMiddleware,
    scheme: String,
    discovered: DashMap<String, Arc<ServiceDiscovery>>,
}

impl DiscoveryCache {
    pub fn new(client: ClientWithMiddleware, scheme: impl Into<String>) -> Self {
        Self {
            client,
            scheme: scheme.into(),
            discovered: DashMap::new(),
        }
    }

    /// The base URL of a registry host.
    pub fn registry_base(&self, registry: &str) -> Result<Url, ServerError> {
        Url::parse(&format!("{}://{}/", self.scheme, registry))
            .map_err(|err| ServerError::Url(format!("registry '{registry}': {err}")))
    }

    /// The discovered services of `registry`.
    pub async fn discover(&self, registry: &str) -> Result<Arc<ServiceDiscovery>, ServerError> {
        if let Some(found) = self.discovered.get(registry) {
            return Ok(found.clone());
        }

        let url = self
            .registry_base(registry)?
            .join(".well-known/terraform.json")
            .map_err(|err| ServerError::Url(err.to_string()))?;
        let discovery = match self.client.get(url.clone()).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                tracing::debug!(registry, "no discovery document, assuming default endpoints");
                ServiceDiscovery::default_endpoints()
            }
            Ok(response) if !response.status().is_success() => {
                return Err(ServerError::UpstreamStatus(response.status()));
            }
            Ok(response) => response
                .json::<ServiceDiscovery>()
                .await
                .map_err(|err| ServerError::Protocol(err.to_string()))?,
            Err(error) if is_unreachable(&error) => {
                tracing::warn!(
                    registry,
                    error = %error,
                    "registry unreachable during discovery, assuming default endpoints"
                );
                ServiceDiscovery::default_endpoints()
            }
            Err(error) => return Err(ServerError::Upstream(error)),
        };

        let discovery = Arc::new(discovery);
        self.discovered
            .insert(registry.to_owned(), discovery.clone());
        Ok(discovery)
    }

    /// The absolute base URL of the provider service of `registry`, with a
    /// trailing slash so provider paths can be joined onto it.
    pub async fn providers_url(&self, registry: &str) -> Result<Url, ServerError> {
        let discovery = self.discover(registry).await?;
        let service = discovery
            .providers_v1
            .as_deref()
            .ok_or_else(|| ServerError::Protocol(format!("'{registry}' serves no providers")))?;
        let mut url = self
            .registry_base(registry)?
            .join(service)
            .map_err(|err| ServerError::Url(err.to_string()))?;
        if !url.path().ends_with('/') {
            url.set_path(&format!("{}/", url.path()));
        }
        Ok(url)
    }
}
