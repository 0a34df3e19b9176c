//! Server configuration.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use terrapin_registry::RouteMatches;
use url::Url;

/// How long the HTTP listener may take to drain connections at shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Everything the server needs to run. Built by the CLI (or by tests).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    pub listen: SocketAddr,
    /// The bearer token the engine must present on provider endpoints.
    pub token: String,
    /// Root of the unpacked provider packages.
    pub cache_dir: PathBuf,
    /// Root for downloaded archives and entry lock files. Must differ from
    /// `cache_dir`.
    pub archive_dir: PathBuf,
    /// The engine's per-user plug-in cache, adopted via symlink when it
    /// already holds a requested package.
    pub user_cache_dir: Option<PathBuf>,
    /// Registries the generated engine configuration points at this server.
    pub registries: Vec<String>,
    /// Ordered source configuration; the first matching source handles a
    /// provider.
    pub sources: Vec<SourceConfig>,
    /// URL scheme used to reach registries that are spelled as bare
    /// hostnames. Plain-HTTP registries only occur in test setups.
    pub registry_scheme: String,
    pub shutdown_grace: Duration,
    /// Armored OpenPGP trust roots for classifying release signatures.
    pub official_trust_root: Option<String>,
    pub partner_trust_root: Option<String>,
}

impl ServerConfig {
    pub fn new(
        listen: SocketAddr,
        token: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
        archive_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            listen,
            token: token.into(),
            cache_dir: cache_dir.into(),
            archive_dir: archive_dir.into(),
            user_cache_dir: None,
            registries: vec!["registry.terraform.io".to_owned()],
            sources: vec![SourceConfig::Direct {
                matches: RouteMatches::any(),
            }],
            registry_scheme: "https".to_owned(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            official_trust_root: None,
            partner_trust_root: None,
        }
    }
}

/// One provider source, in engine `provider_installation` terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Proxy the provider's own registry.
    Direct {
        #[serde(default)]
        matches: RouteMatches,
    },
    /// A pre-staged mirror layout on local disk.
    FilesystemMirror {
        root: PathBuf,
        #[serde(default)]
        matches: RouteMatches,
    },
    /// The same mirror layout served over HTTP(S).
    NetworkMirror {
        url: Url,
        #[serde(default)]
        matches: RouteMatches,
    },
}

impl SourceConfig {
    pub fn matches(&self) -> &RouteMatches {
        match self {
            SourceConfig::Direct { matches }
            | SourceConfig::FilesystemMirror { matches, .. }
            | SourceConfig::NetworkMirror { matches, .. } => matches,
        }
    }
}
