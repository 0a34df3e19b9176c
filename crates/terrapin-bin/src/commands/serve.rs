//! The `terrapin serve` command.

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use terrapin_server::Server;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
pub struct Opt {
    #[clap(flatten)]
    common: super::CommonOpt,
}

pub async fn serve(opt: Opt) -> Result<()> {
    let config = opt.common.into_config()?;
    let server = Server::new(config).into_diagnostic()?;

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            ctrl_c_cancel.cancel();
        }
    });

    server.serve(cancel).await.into_diagnostic()
}
