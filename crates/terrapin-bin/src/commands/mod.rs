pub mod engine_config;
pub mod serve;

use std::path::PathBuf;

use clap::Parser;
use miette::{miette, IntoDiagnostic, Result};
use terrapin_registry::{ProviderPattern, RouteMatches};
use terrapin_server::{ServerConfig, SourceConfig};

/// Options shared by every command that needs the server configuration.
#[derive(Debug, Parser)]
pub struct CommonOpt {
    /// Address to listen on
    #[clap(long, default_value = "127.0.0.1:35367")]
    listen: std::net::SocketAddr,

    /// Bearer token the engine must present on provider endpoints
    #[clap(long, env = "TERRAPIN_TOKEN")]
    token: String,

    /// Root directory for unpacked provider packages
    #[clap(long)]
    cache_dir: Option<PathBuf>,

    /// Scratch directory for downloaded archives and lock files
    #[clap(long)]
    archive_dir: Option<PathBuf>,

    /// The engine's per-user plug-in cache; packages found there are adopted
    /// instead of downloaded
    #[clap(long)]
    user_cache_dir: Option<PathBuf>,

    /// Registry hosts the generated engine configuration intercepts
    #[clap(long = "registry", default_value = "registry.terraform.io")]
    registries: Vec<String>,

    /// Serve providers from a pre-staged mirror directory before consulting
    /// registries
    #[clap(long)]
    fs_mirror: Option<PathBuf>,

    /// Serve providers from a mirror over HTTP(S) before consulting
    /// registries
    #[clap(long)]
    network_mirror: Option<url::Url>,

    /// Source-address patterns the mirrors are responsible for (all
    /// providers when omitted)
    #[clap(long = "mirror-include")]
    mirror_includes: Vec<ProviderPattern>,

    /// Source-address patterns the direct source must not handle
    #[clap(long = "direct-exclude")]
    direct_excludes: Vec<ProviderPattern>,

    /// Seconds the HTTP listener may take to drain connections at shutdown
    #[clap(long, default_value_t = 30)]
    shutdown_grace: u64,

    /// Armored OpenPGP key file used to classify official releases
    #[clap(long)]
    official_trust_root: Option<PathBuf>,

    /// Armored OpenPGP key file used to classify partner releases
    #[clap(long)]
    partner_trust_root: Option<PathBuf>,
}

impl CommonOpt {
    pub fn into_config(self) -> Result<ServerConfig> {
        let cache_dir = match self.cache_dir {
            Some(dir) => dir,
            None => dirs::cache_dir()
                .ok_or_else(|| miette!("no cache directory on this platform; pass --cache-dir"))?
                .join("terrapin/providers"),
        };
        let archive_dir = self
            .archive_dir
            .unwrap_or_else(|| std::env::temp_dir().join("providers"));

        let mut config = ServerConfig::new(self.listen, self.token, cache_dir, archive_dir);
        config.user_cache_dir = self.user_cache_dir;
        config.registries = self.registries;
        config.shutdown_grace = std::time::Duration::from_secs(self.shutdown_grace);

        let mirror_matches = RouteMatches::new(self.mirror_includes, Vec::new());
        let mut sources = Vec::new();
        if let Some(root) = self.fs_mirror {
            sources.push(SourceConfig::FilesystemMirror {
                root,
                matches: mirror_matches.clone(),
            });
        }
        if let Some(url) = self.network_mirror {
            sources.push(SourceConfig::NetworkMirror {
                url,
                matches: mirror_matches,
            });
        }
        sources.push(SourceConfig::Direct {
            matches: RouteMatches::new(Vec::new(), self.direct_excludes),
        });
        config.sources = sources;

        if let Some(path) = self.official_trust_root {
            config.official_trust_root = Some(fs_err::read_to_string(path).into_diagnostic()?);
        }
        if let Some(path) = self.partner_trust_root {
            config.partner_trust_root = Some(fs_err::read_to_string(path).into_diagnostic()?);
        }
        Ok(config)
    }
}
