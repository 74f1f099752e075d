//! Remote data source plugin process.
//!
//! Connects to a host listening on `<address>:<port>` and serves the
//! configured catalogs until the host closes the connection.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use strata::{PluginConfig, RemoteCommunicator};
use tracing_subscriber::EnvFilter;

/// strata-plugin: serve strata catalogs to a remote host.
#[derive(Parser)]
#[command(name = "strata-plugin", version, about)]
struct Cli {
    /// Host address to connect to.
    address: String,

    /// Host port to connect to.
    port: u16,

    /// Path to a JSON configuration file. Serves the built-in `/A/B/C`
    /// catalog when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker threads of the async runtime.
    #[arg(long, default_value = "2")]
    worker_threads: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        tracing::error!("plugin failed: {e}");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "hello from the strata remoting plugin");

    let config = match &cli.config {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading configuration");
            PluginConfig::load(path)?
        }
        None => PluginConfig::default(),
    };
    tracing::info!(
        catalogs = config.catalogs.len(),
        chunk_samples = config.read.chunk_samples,
        parallel = config.read.parallel,
        "configuration ready"
    );

    let data_source = Arc::new(config.build_data_source()?);
    let communicator = RemoteCommunicator::new(data_source, config.transport);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cli.worker_threads.max(1))
        .enable_all()
        .build()?;

    runtime.block_on(communicator.connect(&cli.address, cli.port))?;
    tracing::info!("host closed the connection");
    Ok(())
}
