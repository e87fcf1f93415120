/// Configuration Module
///
/// Resolves the runtime configuration once, from CLI flags first and
/// environment variables second, and hands it to constructors explicitly.
use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::ValueEnum;

use crate::cli::Cli;
use crate::pipeline::{ChainHead, PipelineConfig};
use crate::retry::RetryPolicy;
use crate::rpc::Provider;

pub const DEFAULT_BATCH_SIZE: u64 = 100;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub rpc_url: String,
    pub provider: Provider,
    pub rpc_timeout: Duration,
    pub pipeline: PipelineConfig,
    /// Concurrent block fetches within one sub-batch
    pub max_concurrency: usize,
    pub max_connections: u32,
    pub continuous: bool,
    pub interval: Duration,
    pub run_migrations: bool,
    pub retry: RetryPolicy,
}

impl Config {
    /// Build the configuration from CLI flags and the process environment.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        Self::resolve(cli, |key| env::var(key).ok())
    }

    fn resolve(cli: &Cli, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = cli
            .database_url
            .clone()
            .or_else(|| lookup("DATABASE_URL"))
            .context("DATABASE_URL not found in environment. Please check your .env file")?;

        let rpc_url = cli
            .rpc_url
            .clone()
            .or_else(|| lookup("RPC_URL"))
            .context("RPC_URL not found in environment. Please check your .env file")?;

        let provider = match (cli.provider, lookup("RPC_PROVIDER")) {
            (Some(provider), _) => provider,
            (None, Some(value)) => Provider::from_str(value.trim(), true)
                .map_err(|_| anyhow::anyhow!("RPC_PROVIDER must be one of chainstack, quicknode (got {value:?})"))?,
            (None, None) => Provider::ChainStack,
        };

        let batch_size = match (cli.batch_size, lookup("BATCH_SIZE")) {
            (Some(size), _) => size,
            (None, Some(value)) => {
                value.trim().parse::<u64>().with_context(|| format!("BATCH_SIZE must be a number (got {value:?})"))?
            }
            (None, None) => DEFAULT_BATCH_SIZE,
        };
        if batch_size == 0 {
            bail!("Batch size must be greater than 0");
        }

        let max_concurrency = match cli.max_concurrency {
            Some(limit) => limit,
            None => usize::try_from(batch_size).context("Batch size does not fit in memory")?,
        };

        let chain_head = cli.horizon.map_or(ChainHead::Latest, ChainHead::Horizon);

        Ok(Self {
            database_url,
            rpc_url,
            provider,
            rpc_timeout: Duration::from_secs(cli.rpc_timeout),
            pipeline: PipelineConfig { batch_size, chain_head },
            max_concurrency,
            max_connections: cli.max_connections,
            continuous: cli.continuous,
            interval: Duration::from_secs(cli.interval),
            run_migrations: !cli.skip_migrations,
            retry: RetryPolicy::default(),
        })
    }
}
