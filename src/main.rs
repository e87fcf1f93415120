/// Ethereum Block ETL
///
/// Runs the block ingestion pipeline once, or repeatedly in continuous mode.
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time::MissedTickBehavior;

use eth_block_etl::cli::Cli;
use eth_block_etl::config::Config;
use eth_block_etl::db::Database;
use eth_block_etl::etl::{extract::BatchExtractor, load::Loader};
use eth_block_etl::pipeline::{ChainHead, Pipeline};
use eth_block_etl::rpc::BlockRpcClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    cli.validate()?;
    let config = Config::from_cli(&cli)?;

    println!("🚀 Starting Ethereum Block ETL...");

    // Initialize RPC client
    let rpc_client = BlockRpcClient::new(&config.rpc_url, config.provider, config.rpc_timeout, config.retry)
        .context("Failed to create RPC client")?;

    let head = rpc_client.get_latest_block_number().await.context("Failed to connect to the upstream RPC provider")?;

    println!("✅ Connected to: {} ({})", rpc_client.endpoint(), rpc_client.provider());
    println!("🎯 Chain head: {}", format_number(head));

    println!("\n💾 Connecting to PostgreSQL database...");
    let database = Database::new(&config.database_url, config.max_connections)
        .await
        .context("Failed to connect to PostgreSQL database")?;

    database.test_connection().await.context("Database connection test failed")?;

    println!("✅ Database connected successfully!");

    if config.run_migrations {
        println!("📋 Running database migrations...");
        database.migrate().await.context("Failed to run database migrations")?;
        println!("✅ Database schema is up to date!");
    }

    match config.pipeline.chain_head {
        ChainHead::Latest => println!("📍 Following the chain head"),
        ChainHead::Horizon(blocks) => println!("📍 Ingesting at most {} blocks per run", format_number(blocks)),
    }

    let extractor = BatchExtractor::new(rpc_client, config.max_concurrency);
    let loader = Loader::new(database, config.retry);
    let mut pipeline = Pipeline::new(extractor, loader, config.pipeline.clone());

    tracing::info!("Ethereum Block ETL initialized successfully");

    if config.continuous {
        run_continuously(&mut pipeline, config.interval).await;
        return Ok(());
    }

    pipeline.run().await.context("Pipeline execution failed")?;

    println!("\n✨ Pipeline execution complete!");

    Ok(())
}

/// Trigger a run every `interval` until Ctrl-C. A failed run is logged and
/// the next one resumes from the last committed checkpoint.
async fn run_continuously(pipeline: &mut Pipeline, interval: Duration) {
    println!("\n🔁 Continuous mode: running every {}s (Ctrl-C to stop)", interval.as_secs());

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = pipeline.run().await {
                    tracing::error!("Pipeline run failed, retrying on the next tick: {:#}", anyhow::Error::from(err));
                }
            }
            _ = &mut shutdown => {
                println!("\n🛑 Shutting down");
                break;
            }
        }
    }
}

/// Format a number with thousand separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();

    for (count, c) in s.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }

    result.chars().rev().collect()
}
