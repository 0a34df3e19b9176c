//! Source handlers: where provider metadata and archives come from.
//!
//! Handlers are consulted in configuration order; the first whose
//! include/exclude sets match a provider wins. Every handler speaks the same
//! capability set so the router does not care which kind it dispatches to.

mod direct;
mod fs_mirror;
mod network_mirror;

use std::sync::Arc;

use async_trait::async_trait;
use axum::response::Response;
pub use direct::DirectHandler;
pub use fs_mirror::FsMirrorHandler;
pub use network_mirror::NetworkMirrorHandler;
use terrapin_registry::{
    MirrorIndex, Platform, PlatformEntry, Provider, RouteMatches, ServiceDiscovery, VersionEntry,
    VersionList,
};
use url::Url;

use crate::error::ServerError;

/// What a handler needs to know about the incoming request: how the engine
/// addressed this server, so rewritten URLs point back at it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub scheme: String,
    pub authority: String,
}

impl RequestContext {
    /// Rewrites a remote download URL to this server's
    /// `/downloads/provider/<host>/<path>` endpoint.
    pub fn downloads_url(&self, remote: &Url) -> String {
        let host = match (remote.host_str(), remote.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_owned(),
            (None, _) => String::new(),
        };
        let mut path_and_query = remote.path().trim_start_matches('/').to_owned();
        if let Some(query) = remote.query() {
            path_and_query = format!("{path_and_query}?{query}");
        }
        format!(
            "{}://{}/downloads/provider/{}/{}",
            self.scheme, self.authority, host, path_and_query
        )
    }
}

/// The capability set of a provider source.
#[async_trait]
pub trait SourceHandler: Send + Sync {
    /// The engine's name for this source kind in `provider_installation`.
    fn kind(&self) -> &'static str;

    fn route_matches(&self) -> &RouteMatches;

    fn can_handle(&self, provider: &Provider) -> bool {
        self.route_matches().can_handle(provider)
    }

    /// Answers the Registry Protocol version listing.
    async fn get_versions(&self, provider: &Provider) -> Result<Response, ServerError>;

    /// Answers the platform metadata endpoint. With a correlation ID this
    /// enqueues a cache intent and answers `423 Locked`; without one it
    /// answers the metadata itself (or `404` for mirrors, which cannot).
    async fn get_platform(
        &self,
        ctx: &RequestContext,
        provider: &Provider,
        correlation_id: Option<&str>,
    ) -> Result<Response, ServerError>;

    /// Proxies archive bytes from the remote host. Mirror sources answer
    /// `501`: their archives are staged through the cache instead.
    async fn download(&self, host: &str, path_and_query: &str) -> Result<Response, ServerError>;

    /// The discovered service endpoints of `registry` as this source sees
    /// them.
    async fn discovery_url(&self, registry: &str) -> Result<Arc<ServiceDiscovery>, ServerError>;
}

/// Appends path segments to a base URL.
pub(crate) fn join_segments(base: &Url, segments: &[&str]) -> Result<Url, ServerError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| ServerError::Url(format!("'{base}' cannot carry a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Builds a version listing from a mirror index: the mirror records only
/// version numbers, so platforms are filled in from the fixed matrix.
pub(crate) fn synthesized_version_list(index: &MirrorIndex) -> VersionList {
    VersionList {
        versions: index
            .versions
            .keys()
            .map(|version| VersionEntry {
                version: version.clone(),
                protocols: vec!["5.0".to_owned()],
                platforms: Platform::matrix().map(PlatformEntry::from).collect(),
            })
            .collect(),
    }
}

/// The file name component of an archive URL or path.
pub(crate) fn archive_filename(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .rsplit('/')
        .next()
        .unwrap_or(without_query)
        .to_owned()
}
