// modelhost/src/config.rs

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

const DEFAULT_WORKERS: usize = 2;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub models_dir: PathBuf,
    pub runtime_url: String,
    pub workers: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        let runtime_host = env::var("MODELHOST_RUNTIME_HOST").unwrap_or_else(|_| "127.0.0.1".into());
        let runtime_port: u16 = env::var("MODELHOST_RUNTIME_PORT")
            .unwrap_or_else(|_| "8081".into())
            .parse()
            .context("MODELHOST_RUNTIME_PORT is not a valid port")?;
        let runtime_url = format!("http://{}:{}", runtime_host, runtime_port);

        let allowed_origins = env::var("MODELHOST_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "*".into())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        let workers = parse_worker_count(env::var("MODELHOST_NUM_WORKERS").ok().as_deref())?;

        Ok(Self {
            host: env::var("MODELHOST_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("MODELHOST_PORT")
                .unwrap_or_else(|_| "8000".into())
                .parse()
                .context("MODELHOST_PORT is not a valid port")?,
            allowed_origins,
            models_dir: PathBuf::from(
                env::var("MODELHOST_MODELS_DIR").unwrap_or_else(|_| "models".into()),
            ),
            runtime_url,
            workers,
        })
    }

    pub fn print_config(&self) {
        info!(
            "Server configuration: {}:{} ({} workers), models dir: {}",
            self.host,
            self.port,
            self.workers,
            self.models_dir.display()
        );
        info!("Runtime backend: {}", self.runtime_url);
        info!("Allowed CORS origins: {:?}", self.allowed_origins);
    }
}

/// Worker count is either an integer, or a float taken as a fraction of the
/// CPU cores available (minimum 1). Unset falls back to the default.
pub fn parse_worker_count(raw: Option<&str>) -> Result<usize> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_WORKERS);
    };
    if let Ok(workers) = raw.parse::<usize>() {
        return Ok(workers.max(1));
    }
    let fraction: f64 = raw
        .parse()
        .with_context(|| format!("{} is not an int or float", raw))?;
    Ok(std::cmp::max(1, (num_cpus::get() as f64 * fraction) as usize))
}
