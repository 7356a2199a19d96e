//! CLI flags and config-file loading (section 10.2): defaults -> TOML ->
//! environment (via `dotenvy` + `clap`'s `env` feature) -> CLI flags.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pb_shared_types::BalancerConfig;

#[derive(Debug, Parser)]
#[command(name = "balancer-node", about = "Closed-loop miner power balancer")]
pub struct Cli {
    /// Path to a TOML config file layered under environment/CLI overrides.
    #[arg(long, env = "BALANCER_CONFIG", default_value = "./balancer.toml")]
    pub config: PathBuf,

    #[arg(long, env = "BALANCER_POLL_INTERVAL_SECS")]
    pub poll_interval_secs: Option<u64>,

    #[arg(long, env = "BALANCER_DISCOVERY_INTERVAL_SECS")]
    pub discovery_interval_secs: Option<u64>,

    #[arg(long, env = "BALANCER_CIDRS", value_delimiter = ',')]
    pub cidrs: Vec<String>,

    #[arg(long, env = "BALANCER_VNISH_PASSWORD")]
    pub vnish_password: Option<String>,

    #[arg(long, env = "BALANCER_STOCK_USERNAME")]
    pub stock_username: Option<String>,

    #[arg(long, env = "BALANCER_STOCK_PASSWORD")]
    pub stock_password: Option<String>,

    #[arg(long, env = "BALANCER_READING_SOURCE_URL")]
    pub reading_source_url: Option<String>,

    #[arg(long, env = "BALANCER_STORE_PATH")]
    pub store_path: Option<String>,

    /// Emit structured JSON logs instead of the human-readable formatter.
    #[arg(long, env = "BALANCER_JSON_LOGS", default_value_t = false)]
    pub json_logs: bool,
}

impl Cli {
    /// Layers a TOML file (if present) and this process's flags/env over
    /// `BalancerConfig::default()`, in the precedence order of section 10.2.
    pub fn load_config(&self) -> Result<BalancerConfig> {
        let mut config = if self.config.exists() {
            let raw = std::fs::read_to_string(&self.config)
                .with_context(|| format!("reading config file {}", self.config.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("parsing config file {}", self.config.display()))?
        } else {
            BalancerConfig::default()
        };

        if let Some(secs) = self.poll_interval_secs {
            config.poll_interval = std::time::Duration::from_secs(secs);
        }
        if let Some(secs) = self.discovery_interval_secs {
            config.discovery_interval = std::time::Duration::from_secs(secs);
        }
        if !self.cidrs.is_empty() {
            config.cidrs = self.cidrs.clone();
        }
        if let Some(p) = &self.vnish_password {
            config.vnish_password = p.clone();
        }
        if let Some(u) = &self.stock_username {
            config.stock_username = u.clone();
        }
        if let Some(p) = &self.stock_password {
            config.stock_password = p.clone();
        }
        if let Some(url) = &self.reading_source_url {
            config.reading_source_url = url.clone();
        }
        if let Some(path) = &self.store_path {
            config.store_path = path.clone();
        }

        Ok(config)
    }
}
