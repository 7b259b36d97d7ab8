// modelhost/src/main.rs

use clap::Parser;
use modelhost::config::{parse_worker_count, Config};
use modelhost::server::run_server;

/// OpenAI-compatible server for local model inference.
#[derive(Parser, Debug)]
#[command(name = "modelhost", version, about)]
struct Args {
    /// Host to run the server on
    #[arg(long)]
    host: Option<String>,

    /// Port to run the server on
    #[arg(long)]
    port: Option<u16>,

    /// Number of workers: an integer, or a float taken as a fraction of the
    /// CPU cores available (1.0 uses every core). Overrides
    /// MODELHOST_NUM_WORKERS.
    #[arg(long)]
    workers: Option<String>,

    /// Comma-separated list of allowed origins for CORS
    #[arg(long = "allowed-origins", value_delimiter = ',')]
    allowed_origins: Option<Vec<String>>,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let mut cfg = Config::from_env()?;
    if let Some(host) = args.host {
        cfg.host = host;
    }
    if let Some(port) = args.port {
        cfg.port = port;
    }
    if let Some(workers) = args.workers.as_deref() {
        cfg.workers = parse_worker_count(Some(workers))?;
    }
    if let Some(allowed_origins) = args.allowed_origins {
        cfg.allowed_origins = allowed_origins;
    }

    println!("🚀 Starting modelhost with {} worker threads", cfg.workers);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cfg.workers)
        .enable_all()
        .build()?;
    runtime.block_on(run_server(cfg))
}
