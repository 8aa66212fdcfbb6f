//! Header Proxy command line.
//!
//! ```text
//! header-proxy check  --config proxy.toml
//! header-proxy run    [--config proxy.toml] [--directives URL] [--url /path]
//!                     [-X METHOD] [-H 'Name: value']... [-O 'Name: value']...
//! header-proxy replay --config proxy.toml [--watch] < requests.txt
//! ```
//!
//! `run` and `replay` drive simulated transactions through
//! Receive → BackendFetch → BackendResponse → Deliver against a live
//! directive backend and print what each phase did.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use header_proxy::config::{apply_pending, load_config, ConfigWatcher, HeaderProxyConfig};
use header_proxy::observability::{init_logging, metrics};
use header_proxy::simulate::{run_transaction, run_transaction_with, ClientRequest, TransactionTrace};
use header_proxy::HeaderProxy;

#[derive(Parser)]
#[command(name = "header-proxy")]
#[command(about = "Directive-driven header proxy tooling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Simulate one transaction
    Run {
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directive URL, overriding `fetch.url`
        #[arg(short, long)]
        directives: Option<String>,

        /// Named backend from the configuration
        #[arg(short, long)]
        backend: Option<String>,

        /// Client request URL
        #[arg(short, long, default_value = "/")]
        url: String,

        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Client request header, repeatable
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Origin response header, repeatable
        #[arg(short = 'O', long = "origin-header")]
        origin: Vec<String>,
    },
    /// Simulate one transaction per stdin line of the form `METHOD URL`
    Replay {
        #[arg(short, long)]
        config: PathBuf,

        /// Reload the configuration when the file changes
        #[arg(short, long)]
        watch: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => {
            let config = load_config(&config)?;
            println!(
                "ok: {} backend(s), pool capacity {}, correlation header {}",
                config.backends.len(),
                config.pool.capacity,
                config.correlation.header
            );
        }
        Commands::Run {
            config,
            directives,
            backend,
            url,
            method,
            headers,
            origin,
        } => {
            let mut config = match config {
                Some(path) => load_config(&path)?,
                None => HeaderProxyConfig::default(),
            };
            if directives.is_some() {
                config.fetch.url = directives;
            }
            start_observability(&config)?;

            let proxy = HeaderProxy::new(&config)?;
            let request = ClientRequest {
                method,
                url,
                headers,
                ..ClientRequest::get("/")
            };
            let trace = match backend {
                Some(name) => run_transaction_with(&proxy, &request, &origin, |proxy, ctx| {
                    proxy.set_backend(ctx, &name)
                }),
                None => run_transaction(&proxy, &request, &origin),
            };
            print_trace(&request, &trace);
        }
        Commands::Replay { config: path, watch } => {
            let config = load_config(&path)?;
            start_observability(&config)?;
            replay(&path, &config, watch)?;
        }
    }

    Ok(())
}

fn start_observability(config: &HeaderProxyConfig) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(&config.observability)?;
    metrics::install_exporter(&config.observability)?;
    Ok(())
}

fn replay(path: &Path, config: &HeaderProxyConfig, watch: bool) -> Result<(), Box<dyn std::error::Error>> {
    let proxy = HeaderProxy::new(config)?;

    let (watcher, mut updates) = ConfigWatcher::new(path);
    let _watcher = if watch { Some(watcher.run()?) } else { None };

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        let (Some(method), Some(url)) = (parts.next(), parts.next()) else {
            continue;
        };

        apply_pending(&proxy, &mut updates);

        let request = ClientRequest {
            method: method.to_string(),
            ..ClientRequest::get(url)
        };
        let trace = run_transaction(&proxy, &request, &[]);
        print_trace(&request, &trace);
    }

    let stats = proxy.pool().stats();
    println!("pool: {} record(s), {} busy", stats.records, stats.busy);
    Ok(())
}

fn print_trace(request: &ClientRequest, trace: &TransactionTrace) {
    println!("{} {}", request.method, request.url);
    for phase in &trace.phases {
        println!("  [{}]", phase.phase);
        for line in phase.headers.iter() {
            println!("    {}", line);
        }
        if let Some(error) = &phase.error {
            println!("    ! {}", error);
        }
    }
}
