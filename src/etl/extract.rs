/// Extract Module
///
/// Fetches a contiguous range of blocks from the upstream provider with one
/// concurrent request per block number. The range is all-or-nothing: the
/// first block that still fails after its retries fails the whole range.
use std::time::Instant;

use futures::{stream, StreamExt, TryStreamExt};
use thiserror::Error;

use crate::rpc::{models::RawBlock, BlockRpcClient, RpcError};

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Start block {start} is greater than end block {end}")]
    InvalidRange { start: u64, end: u64 },

    #[error("Failed to fetch block {number}: {source}")]
    Fetch {
        number: u64,
        #[source]
        source: RpcError,
    },
}

#[derive(Debug, Clone)]
pub struct BatchExtractor {
    client: BlockRpcClient,
    max_concurrency: usize,
}

impl BatchExtractor {
    pub fn new(client: BlockRpcClient, max_concurrency: usize) -> Self {
        Self { client, max_concurrency: max_concurrency.max(1) }
    }

    pub fn client(&self) -> &BlockRpcClient {
        &self.client
    }

    /// Extract every block in `start..=end`, sorted by block number.
    pub async fn extract(&self, start: u64, end: u64) -> Result<Vec<RawBlock>, ExtractError> {
        if start > end {
            return Err(ExtractError::InvalidRange { start, end });
        }

        let started = Instant::now();
        let mut blocks: Vec<RawBlock> = stream::iter(start..=end)
            .map(|number| async move {
                self.client.fetch_block(number).await.map_err(|source| ExtractError::Fetch { number, source })
            })
            .buffer_unordered(self.max_concurrency)
            .try_collect()
            .await?;

        // Completion order is arbitrary.
        blocks.sort_by_key(|block| block.number);

        let transactions: usize = blocks.iter().map(|block| block.transactions.len()).sum();
        tracing::info!(
            "Extracted blocks {}..={} ({} blocks, {} transactions) in {:.2}s",
            start,
            end,
            blocks.len(),
            transactions,
            started.elapsed().as_secs_f64()
        );

        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, spawn_rpc_mock};
    use crate::retry::RetryPolicy;
    use crate::rpc::Provider;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn extractor(url: &str, max_concurrency: usize) -> BatchExtractor {
        let client = BlockRpcClient::new(url, Provider::ChainStack, Duration::from_secs(5), RetryPolicy::default())
            .unwrap();
        BatchExtractor::new(client, max_concurrency)
    }

    #[tokio::test]
    async fn test_extract_returns_every_block_in_range() {
        let mock = spawn_rpc_mock(fixtures::respond_with_chain(100, &[])).await;

        let blocks = extractor(&mock.url, 100).extract(5, 9).await.unwrap();

        let numbers: Vec<u64> = blocks.iter().map(|block| block.number).collect();
        assert_eq!(numbers, vec![5, 6, 7, 8, 9]);
        assert!(blocks.iter().all(|block| block.block_number == crate::rpc::to_quantity(block.number)));
        assert_eq!(mock.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_extract_single_block_range() {
        let mock = spawn_rpc_mock(fixtures::respond_with_chain(100, &[])).await;

        let blocks = extractor(&mock.url, 1).extract(3, 3).await.unwrap();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].header.number, "0x3");
    }

    #[tokio::test]
    async fn test_extract_with_bounded_concurrency() {
        let mock = spawn_rpc_mock(fixtures::respond_with_chain(100, &[])).await;

        let blocks = extractor(&mock.url, 2).extract(1, 10).await.unwrap();

        assert_eq!(blocks.len(), 10);
        assert!(blocks.windows(2).all(|pair| pair[0].number + 1 == pair[1].number));
    }

    #[tokio::test]
    async fn test_one_failing_block_fails_the_range() {
        let mock = spawn_rpc_mock(fixtures::respond_with_chain(100, &[7])).await;

        let result = extractor(&mock.url, 100).extract(5, 9).await;

        match result {
            Err(ExtractError::Fetch { number, source: RpcError::Status(status) }) => {
                assert_eq!(number, 7);
                assert_eq!(status, reqwest::StatusCode::INTERNAL_SERVER_ERROR);
            }
            other => panic!("expected fetch failure for block 7, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_inverted_range_is_rejected() {
        let mock = spawn_rpc_mock(fixtures::respond_with_chain(100, &[])).await;

        let result = extractor(&mock.url, 100).extract(9, 5).await;

        assert!(matches!(result, Err(ExtractError::InvalidRange { start: 9, end: 5 })));
        assert_eq!(mock.calls.load(Ordering::SeqCst), 0);
    }
}
