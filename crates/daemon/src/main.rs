// nbstored: contents & checkpoint server entry point.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use nbstore_daemon::config::DaemonConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nbstored", about = "Notebook contents and checkpoint server")]
struct Args {
    /// Config file (defaults to ~/.nbstore/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory served as the contents root
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Listen address (host:port)
    #[arg(long, value_name = "ADDR")]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = DaemonConfig::load(args.config.as_deref()).context("failed to load config")?;
    config.apply_env().context("invalid NBSTORE_* environment override")?;
    if let Some(root) = args.root {
        config.store.root_dir = root;
    }
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    config.validate().context("invalid configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.server.log_filter))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("starting nbstore daemon");
    nbstore_daemon::runtime::run(config).await.context("daemon terminated unexpectedly")
}
