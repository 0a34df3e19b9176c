use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::{filter::LevelFilter, util::SubscriberInitExt, EnvFilter};

mod commands;

/// Command line options available through the `terrapin` cli.
#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Opt {
    /// The subcommand to execute
    #[clap(subcommand)]
    command: Command,

    /// Log verbose
    #[clap(short, long, global = true)]
    verbose: bool,
}

/// Different commands supported by `terrapin`.
#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Run the provider cache server
    Serve(commands::serve::Opt),
    /// Write the engine CLI configuration that points a working directory at
    /// a running cache server
    EngineConfig(commands::engine_config::Opt),
}

/// Entry point of the `terrapin` cli.
fn main() -> miette::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;
    runtime.block_on(async_main())
}

async fn async_main() -> miette::Result<()> {
    let opt = Opt::parse();

    // Determine the logging level based on the verbose flag and the RUST_LOG
    // environment variable.
    let default_filter = if opt.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_filter.into())
        .from_env()
        .into_diagnostic()?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .finish()
        .try_init()
        .into_diagnostic()?;

    match opt.command {
        Command::Serve(opts) => commands::serve::serve(opts).await,
        Command::EngineConfig(opts) => commands::engine_config::engine_config(opts),
    }
}
