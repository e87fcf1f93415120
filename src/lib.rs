/// Ethereum Block ETL
///
/// An ETL pipeline for extracting Ethereum blocks from a JSON-RPC provider,
/// flattening them into relational rows, and loading them into PostgreSQL
/// behind an atomically advanced import checkpoint.
pub mod cli;
pub mod config;
pub mod db;
pub mod etl;
pub mod models;
pub mod pipeline;
pub mod retry;
pub mod rpc;

#[cfg(test)]
mod fixtures;
