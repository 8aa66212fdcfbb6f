use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use header_proxy::config::{load_config, HeaderProxyConfig};
use header_proxy::observability::{init_logging, metrics};
use header_proxy::DirectiveServer;

#[derive(Parser)]
#[command(name = "directive-server")]
#[command(about = "Reference directive backend (geo lookup and A/B membership)", long_about = None)]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides `server.bind_address`
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => HeaderProxyConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }

    init_logging(&config.observability)?;
    metrics::install_exporter(&config.observability)?;

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    DirectiveServer::new(&config.server).run(listener).await?;
    Ok(())
}
