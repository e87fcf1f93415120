/// CLI Module
///
/// Command-line interface configuration using clap. Flags left unset fall
/// back to environment variables when the [`Config`](crate::config::Config)
/// is built.
use clap::Parser;

use crate::rpc::Provider;

/// Ethereum Block ETL
///
/// Extract blocks from an Ethereum JSON-RPC provider, flatten them into rows,
/// and load them into PostgreSQL, resuming from the last committed checkpoint.
#[derive(Parser, Debug, Clone)]
#[command(name = "eth-block-etl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// RPC endpoint URL (overrides RPC_URL env var)
    #[arg(short = 'r', long, value_name = "URL")]
    pub rpc_url: Option<String>,

    /// Database connection URL (overrides DATABASE_URL env var)
    #[arg(short = 'd', long, value_name = "URL")]
    pub database_url: Option<String>,

    /// Upstream provider integration (overrides RPC_PROVIDER env var)
    #[arg(short = 'p', long, value_enum)]
    pub provider: Option<Provider>,

    /// Blocks per sub-batch (overrides BATCH_SIZE env var, defaults to 100)
    #[arg(short = 'b', long, value_name = "SIZE")]
    pub batch_size: Option<u64>,

    /// Maximum concurrent block fetches (defaults to the batch size)
    #[arg(long, value_name = "COUNT")]
    pub max_concurrency: Option<usize>,

    /// Ingest at most this many blocks past the checkpoint instead of
    /// following the chain head
    #[arg(short = 'n', long, value_name = "COUNT")]
    pub horizon: Option<u64>,

    /// Maximum PostgreSQL connections in the pool
    #[arg(long, value_name = "COUNT", default_value = "5")]
    pub max_connections: u32,

    /// Timeout for a single RPC request in seconds
    #[arg(long, value_name = "SECONDS", default_value = "30")]
    pub rpc_timeout: u64,

    /// Run the pipeline repeatedly until interrupted
    #[arg(short = 'c', long)]
    pub continuous: bool,

    /// Interval between continuous runs in seconds
    #[arg(long, value_name = "SECONDS", default_value = "10")]
    pub interval: u64,

    /// Do not apply database migrations on startup
    #[arg(long)]
    pub skip_migrations: bool,
}

impl Cli {
    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == Some(0) {
            anyhow::bail!("Batch size must be greater than 0");
        }

        if self.max_concurrency == Some(0) {
            anyhow::bail!("Max concurrency must be greater than 0");
        }

        if self.horizon == Some(0) {
            anyhow::bail!("Horizon must be greater than 0");
        }

        if self.max_connections == 0 {
            anyhow::bail!("Max connections must be greater than 0");
        }

        if self.rpc_timeout == 0 {
            anyhow::bail!("RPC timeout must be greater than 0");
        }

        if self.continuous && self.interval == 0 {
            anyhow::bail!("Interval must be greater than 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("eth-block-etl").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[]);

        assert_eq!(cli.batch_size, None);
        assert_eq!(cli.provider, None);
        assert_eq!(cli.max_connections, 5);
        assert_eq!(cli.rpc_timeout, 30);
        assert_eq!(cli.interval, 10);
        assert!(!cli.continuous);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_parse_flags() {
        let cli = parse(&["-p", "quicknode", "-b", "50", "-n", "1000", "--continuous", "--interval", "30"]);

        assert_eq!(cli.provider, Some(Provider::QuickNode));
        assert_eq!(cli.batch_size, Some(50));
        assert_eq!(cli.horizon, Some(1000));
        assert!(cli.continuous);
        assert_eq!(cli.interval, 30);
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        assert!(Cli::try_parse_from(["eth-block-etl", "--provider", "infura"]).is_err());
    }

    #[test]
    fn test_validation() {
        assert!(parse(&["-b", "0"]).validate().is_err());
        assert!(parse(&["--max-concurrency", "0"]).validate().is_err());
        assert!(parse(&["-n", "0"]).validate().is_err());
        assert!(parse(&["--max-connections", "0"]).validate().is_err());
        assert!(parse(&["-c", "--interval", "0"]).validate().is_err());
        // The interval only matters in continuous mode.
        assert!(parse(&["--interval", "0"]).validate().is_ok());
    }
}
