/// RPC Client Module
///
/// This module handles all interactions with the upstream Ethereum JSON-RPC
/// provider. Every call is a single HTTP POST; any non-200 status, transport
/// failure or malformed body is an [`RpcError`] and is retried with the
/// configured [`RetryPolicy`] before it reaches the caller.
pub mod models;

use std::time::Duration;

use backon::Retryable;
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;

use crate::retry::{RetryPolicy, Transient};
use models::{ChainStackBlock, JsonRpcResponse, ProviderBlock, QuickNodeBlock, RawBlock};

const LATEST_BLOCK_METHOD: &str = "eth_blockNumber";
const GET_BLOCK_METHOD: &str = "eth_getBlockByNumber";

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Received non-200 status code: {0}")]
    Status(reqwest::StatusCode),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed JSON-RPC payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("JSON-RPC response to {method} has no result")]
    MissingResult { method: &'static str },

    #[error("Invalid hex quantity: {0:?}")]
    InvalidQuantity(String),
}

impl Transient for RpcError {
    /// Every upstream failure is retried; the provider is the unreliable part.
    fn is_transient(&self) -> bool {
        true
    }
}

/// Upstream integrations with slightly different block payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Provider {
    #[value(name = "chainstack")]
    ChainStack,
    #[value(name = "quicknode")]
    QuickNode,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::ChainStack => write!(f, "chainstack"),
            Provider::QuickNode => write!(f, "quicknode"),
        }
    }
}

/// Format a block number as a `0x`-prefixed JSON-RPC quantity.
pub fn to_quantity(number: u64) -> String {
    format!("{number:#x}")
}

/// Parse a `0x`-prefixed JSON-RPC quantity.
pub fn parse_quantity(quantity: &str) -> Result<u64, RpcError> {
    let digits = quantity.strip_prefix("0x").ok_or_else(|| RpcError::InvalidQuantity(quantity.to_string()))?;
    u64::from_str_radix(digits, 16).map_err(|_| RpcError::InvalidQuantity(quantity.to_string()))
}

#[derive(Debug, Clone)]
pub struct BlockRpcClient {
    http: reqwest::Client,
    endpoint: String,
    provider: Provider,
    retry: RetryPolicy,
}

impl BlockRpcClient {
    /// Create a new RPC client for the specified endpoint
    pub fn new(
        endpoint: impl Into<String>,
        provider: Provider,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { http, endpoint: endpoint.into(), provider, retry })
    }

    /// Get the endpoint URL this client talks to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Get the current chain head
    pub async fn get_latest_block_number(&self) -> Result<u64, RpcError> {
        (|| self.latest_block_number_once())
            .retry(self.retry)
            .when(|err: &RpcError| err.is_transient())
            .notify(|err: &RpcError, dur: Duration| {
                tracing::warn!(
                    method = LATEST_BLOCK_METHOD,
                    error = %err,
                    "Upstream call failed. Retrying in {:.3}s",
                    dur.as_secs_f32()
                );
            })
            .await
    }

    /// Fetch a single block, with full transaction objects
    pub async fn fetch_block(&self, number: u64) -> Result<RawBlock, RpcError> {
        tracing::debug!("Fetching block {}", number);

        let block = (|| self.fetch_block_once(number))
            .retry(self.retry)
            .when(|err: &RpcError| err.is_transient())
            .notify(|err: &RpcError, dur: Duration| {
                tracing::warn!(
                    method = GET_BLOCK_METHOD,
                    block_number = number,
                    error = %err,
                    "Upstream call failed. Retrying in {:.3}s",
                    dur.as_secs_f32()
                );
            })
            .await?;

        tracing::debug!("Fetched block {} with {} transactions", number, block.transactions.len());
        Ok(block)
    }

    async fn latest_block_number_once(&self) -> Result<u64, RpcError> {
        let (_, _, quantity) = self.call::<String>(LATEST_BLOCK_METHOD, json!([]), 1).await?;
        parse_quantity(&quantity)
    }

    async fn fetch_block_once(&self, number: u64) -> Result<RawBlock, RpcError> {
        let params = json!([to_quantity(number), true]);
        // Request id doubles as the provider-assigned block id.
        let request_id = i64::try_from(number).unwrap_or(i64::MAX);

        let block = match self.provider {
            Provider::ChainStack => {
                let (id, jsonrpc, block) = self.call::<ChainStackBlock>(GET_BLOCK_METHOD, params, request_id).await?;
                ProviderBlock::ChainStack(block).into_raw(number, id, jsonrpc)
            }
            Provider::QuickNode => {
                let (id, jsonrpc, block) = self.call::<QuickNodeBlock>(GET_BLOCK_METHOD, params, request_id).await?;
                ProviderBlock::QuickNode(block).into_raw(number, id, jsonrpc)
            }
        };

        Ok(block)
    }

    /// One JSON-RPC round trip. Returns the response id, the `jsonrpc`
    /// version and the decoded `result`.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: serde_json::Value,
        id: i64,
    ) -> Result<(i64, String, T), RpcError> {
        let payload = json!({ "method": method, "params": params, "id": id, "jsonrpc": "2.0" });

        let response = self.http.post(&self.endpoint).json(&payload).send().await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(RpcError::Status(status));
        }

        let body = response.bytes().await?;
        let envelope: JsonRpcResponse<T> = serde_json::from_slice(&body)?;

        if let Some(error) = envelope.error {
            return Err(RpcError::Rpc { code: error.code, message: error.message });
        }
        let result = envelope.result.ok_or(RpcError::MissingResult { method })?;

        Ok((envelope.id.unwrap_or(id), envelope.jsonrpc, result))
    }
}
