//! The `terrapin engine-config` command: writes the CLI-configuration file
//! that makes the engine talk to a running cache server.

use std::path::PathBuf;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use terrapin_server::cli_config;

#[derive(Debug, Parser)]
pub struct Opt {
    #[clap(flatten)]
    common: super::CommonOpt,

    /// Where to write the configuration file
    #[clap(long)]
    output: PathBuf,

    /// The URL under which the engine reaches the cache server; derived from
    /// the listen address when omitted
    #[clap(long)]
    server_url: Option<String>,

    /// The correlation ID baked into provider-service URLs
    #[clap(long, default_value = "cache")]
    correlation_id: String,
}

pub fn engine_config(opt: Opt) -> Result<()> {
    let Opt {
        common,
        output,
        server_url,
        correlation_id,
    } = opt;
    let config = common.into_config()?;
    let server_url = server_url.unwrap_or_else(|| format!("http://{}", config.listen));

    cli_config::write_engine_config(&output, &config, &server_url, &correlation_id)
        .into_diagnostic()?;
    tracing::info!(path = %output.display(), "engine configuration written");
    Ok(())
}
