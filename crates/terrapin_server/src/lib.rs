//! The terrapin server: the Registry-Protocol HTTP surface in front of the
//! cache engine. It authenticates engine requests, routes each provider to
//! the first matching source, proxies what can be proxied and answers
//! `423 Locked` while the cache engine stages archives in the background.

pub mod cli_config;
mod config;
mod discovery;
mod error;
mod handlers;
mod proxy;
mod routes;

use std::{future::IntoFuture, sync::Arc};

pub use config::{ServerConfig, SourceConfig, DEFAULT_SHUTDOWN_GRACE};
pub use error::ServerError;
pub use handlers::{
    DirectHandler, FsMirrorHandler, NetworkMirrorHandler, RequestContext, SourceHandler,
};
pub use routes::ServerState;
use terrapin_cache::{CacheLayout, ProviderCache};
use terrapin_networking::CredentialStore;
use terrapin_verify::{PackageAuthenticator, TrustRoots};
use tokio_util::sync::CancellationToken;

use crate::{discovery::DiscoveryCache, proxy::ReverseProxy};

/// A configured server, ready to bind. Must be created inside a tokio
/// runtime (the cache engine spawns its dispatcher immediately).
pub struct Server {
    config: ServerConfig,
    state: ServerState,
}

impl Server {
    /// Builds a server with credentials collected from `TF_TOKEN_*`
    /// environment variables.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        Self::with_credentials(config, CredentialStore::from_env())
    }

    pub fn with_credentials(
        config: ServerConfig,
        credentials: CredentialStore,
    ) -> Result<Self, ServerError> {
        let client = terrapin_networking::default_client(credentials);

        let layout = CacheLayout::new(
            config.cache_dir.clone(),
            config.archive_dir.clone(),
            config.user_cache_dir.clone(),
        )?;
        let trust_roots = TrustRoots::from_armor(
            config.official_trust_root.as_deref(),
            config.partner_trust_root.as_deref(),
        )
        .map_err(|err| ServerError::Config(err.to_string()))?;
        let cache = ProviderCache::new(
            layout,
            client.clone(),
            PackageAuthenticator::new(trust_roots),
        );

        let discovery = Arc::new(DiscoveryCache::new(
            client.clone(),
            config.registry_scheme.clone(),
        ));
        let proxy = ReverseProxy::new(client.clone());

        let mut handlers: Vec<Box<dyn SourceHandler>> = Vec::new();
        for source in &config.sources {
            match source {
                SourceConfig::Direct { matches } => handlers.push(Box::new(DirectHandler::new(
                    proxy.clone(),
                    discovery.clone(),
                    cache.clone(),
                    matches.clone(),
                    config.registry_scheme.clone(),
                ))),
                SourceConfig::FilesystemMirror { root, matches } => handlers.push(Box::new(
                    FsMirrorHandler::new(root.clone(), cache.clone(), matches.clone()),
                )),
                SourceConfig::NetworkMirror { url, matches } => {
                    handlers.push(Box::new(NetworkMirrorHandler::new(
                        client.clone(),
                        url.clone(),
                        cache.clone(),
                        matches.clone(),
                    )))
                }
            }
        }

        let state = ServerState {
            token: config.token.clone(),
            cache,
            handlers: Arc::new(handlers),
            proxy,
            download_scheme: config.registry_scheme.clone(),
        };
        Ok(Self { config, state })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The cache engine, for callers that drive `wait_for_ready` and
    /// lock-file updates after an engine run.
    pub fn cache(&self) -> &ProviderCache {
        &self.state.cache
    }

    /// Binds the configured listen address and serves until `cancel` fires.
    pub async fn serve(self, cancel: CancellationToken) -> Result<(), ServerError> {
        let listener = tokio::net::TcpListener::bind(self.config.listen).await?;
        tracing::info!(addr = %listener.local_addr()?, "provider cache server listening");
        self.serve_on(listener, cancel).await
    }

    /// Serves on an existing listener until `cancel` fires, then shuts the
    /// HTTP side down gracefully (bounded by the configured grace period)
    /// and terminates the cache engine. Worker and archive-cleanup errors
    /// are aggregated into the returned error.
    pub async fn serve_on(
        self,
        listener: tokio::net::TcpListener,
        cancel: CancellationToken,
    ) -> Result<(), ServerError> {
        let router = routes::router(self.state.clone());
        let grace = self.config.shutdown_grace;

        let shutdown = {
            let cancel = cancel.clone();
            async move { cancel.cancelled().await }
        };
        let server = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .into_future();
        let deadline = async {
            cancel.cancelled().await;
            tokio::time::sleep(grace).await;
        };

        tokio::select! {
            result = server => result?,
            () = deadline => {
                tracing::warn!("shutdown grace period expired, dropping open connections");
            }
        }

        self.state.cache.shutdown().await?;
        Ok(())
    }
}
