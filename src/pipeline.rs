/// Pipeline Module
///
/// Orchestrates one run of the ETL pipeline: determine the range of blocks
/// newer than the last checkpoint, then Extract → Transform → Load it one
/// sub-batch at a time. A sub-batch either commits together with its
/// checkpoint or aborts the whole run; nothing is skipped.
use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::db::StoreError;
use crate::etl::extract::{BatchExtractor, ExtractError};
use crate::etl::load::{LoadSummary, Loader};
use crate::etl::transform::{transform, TransformError};
use crate::models::ImportStatus;
use crate::rpc::RpcError;

/// Where the orchestrator is within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    DeterminingRange,
    Extracting,
    Transforming,
    Loading,
    CheckpointAdvanced,
    Aborted,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "Idle"),
            PipelineState::DeterminingRange => write!(f, "DeterminingRange"),
            PipelineState::Extracting => write!(f, "Extracting"),
            PipelineState::Transforming => write!(f, "Transforming"),
            PipelineState::Loading => write!(f, "Loading"),
            PipelineState::CheckpointAdvanced => write!(f, "CheckpointAdvanced"),
            PipelineState::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Inclusive range of block numbers, never empty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub start: u64,
    pub end: u64,
}

impl BlockRange {
    pub fn new(start: u64, end: u64) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn block_count(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Consecutive slices of at most `size` blocks covering the range exactly once.
    pub fn sub_batches(&self, size: u64) -> impl Iterator<Item = BlockRange> {
        let size = size.max(1);
        let end = self.end;
        let mut next = Some(self.start);

        std::iter::from_fn(move || {
            let start = next?;
            let batch_end = start.saturating_add(size - 1).min(end);
            next = (batch_end < end).then(|| batch_end + 1);
            Some(BlockRange { start, end: batch_end })
        })
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// First block of the next run: one past the watermark, or 1 when nothing
/// has been committed yet.
pub fn next_start(latest: Option<&ImportStatus>) -> u64 {
    latest.map_or(1, |status| status.block_number.max(0).unsigned_abs() + 1)
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to read the import checkpoint: {0}")]
    Checkpoint(#[source] StoreError),

    #[error("Failed to determine the chain head: {0}")]
    ChainHead(#[source] RpcError),

    #[error("Extract failed for blocks {range}: {source}")]
    Extract {
        range: BlockRange,
        #[source]
        source: ExtractError,
    },

    #[error("Transform failed for blocks {range}: {source}")]
    Transform {
        range: BlockRange,
        #[source]
        source: TransformError,
    },

    #[error("Load failed for blocks {range}: {source}")]
    Load {
        range: BlockRange,
        #[source]
        source: StoreError,
    },
}

impl PipelineError {
    /// The state the run was in when it failed
    pub fn stage(&self) -> PipelineState {
        match self {
            PipelineError::Checkpoint(_) | PipelineError::ChainHead(_) => PipelineState::DeterminingRange,
            PipelineError::Extract { .. } => PipelineState::Extracting,
            PipelineError::Transform { .. } => PipelineState::Transforming,
            PipelineError::Load { .. } => PipelineState::Loading,
        }
    }

    /// The sub-batch that was rolled back, if the failure happened inside one
    pub fn range(&self) -> Option<BlockRange> {
        match self {
            PipelineError::Checkpoint(_) | PipelineError::ChainHead(_) => None,
            PipelineError::Extract { range, .. }
            | PipelineError::Transform { range, .. }
            | PipelineError::Load { range, .. } => Some(*range),
        }
    }
}

/// How the end of the range is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainHead {
    /// Ask the upstream provider for its latest block number
    Latest,
    /// Ingest at most this many blocks past the checkpoint
    Horizon(u64),
}

/// Configuration for pipeline execution
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_size: u64,
    pub chain_head: ChainHead,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { batch_size: 100, chain_head: ChainHead::Latest }
    }
}

/// Pipeline execution statistics
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub range: Option<BlockRange>,
    pub sub_batches_committed: usize,
    pub blocks_extracted: usize,
    pub blocks_inserted: u64,
    pub transactions_inserted: u64,
    pub withdrawals_inserted: u64,
    pub access_list_items_inserted: u64,
    pub checkpoint: Option<i64>,
    pub elapsed_time: Duration,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, summary: &LoadSummary) {
        self.sub_batches_committed += 1;
        self.blocks_inserted += summary.blocks;
        self.transactions_inserted += summary.transactions;
        self.withdrawals_inserted += summary.withdrawals;
        self.access_list_items_inserted += summary.access_list_items;
        self.checkpoint = Some(summary.checkpoint.block_number);
    }

    pub fn blocks_per_second(&self) -> f64 {
        let secs = self.elapsed_time.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.blocks_extracted as f64 / secs
        }
    }

    pub fn transactions_per_second(&self) -> f64 {
        let secs = self.elapsed_time.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.transactions_inserted as f64 / secs
        }
    }
}

/// Main ETL Pipeline
pub struct Pipeline {
    extractor: BatchExtractor,
    loader: Loader,
    config: PipelineConfig,
    state: PipelineState,
}

impl Pipeline {
    /// Create a new pipeline instance
    pub fn new(extractor: BatchExtractor, loader: Loader, config: PipelineConfig) -> Self {
        Self { extractor, loader, config, state: PipelineState::Idle }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Run the pipeline once over everything newer than the last checkpoint.
    ///
    /// Sub-batches run strictly in order. The first failure rolls back the
    /// current sub-batch and ends the run; the checkpoint stays at the last
    /// committed sub-batch.
    pub async fn run(&mut self) -> Result<PipelineStats, PipelineError> {
        let start_time = Instant::now();
        let mut stats = PipelineStats::new();

        let result = self.run_inner(&mut stats).await;
        stats.elapsed_time = start_time.elapsed();

        match result {
            Ok(()) => {
                if stats.range.is_some() {
                    println!("\n✅ Pipeline complete!");
                    self.print_final_stats(&stats);
                }
                Ok(stats)
            }
            Err(err) => {
                self.transition(PipelineState::Aborted);
                tracing::error!(stage = %err.stage(), "Pipeline run aborted: {}", err);
                self.print_final_stats(&stats);
                Err(err)
            }
        }
    }

    async fn run_inner(&mut self, stats: &mut PipelineStats) -> Result<(), PipelineError> {
        self.transition(PipelineState::DeterminingRange);
        let Some(range) = self.determine_range().await? else {
            tracing::info!("No new blocks to ingest");
            self.transition(PipelineState::Idle);
            return Ok(());
        };
        stats.range = Some(range);

        tracing::info!("Starting pipeline for blocks {}", range);
        println!("\n🚀 Starting ETL Pipeline...");
        println!("   📍 Block range: {} to {}", range.start, range.end);
        println!("   📦 Batch size: {}", self.config.batch_size);

        for sub_batch in range.sub_batches(self.config.batch_size) {
            self.process_sub_batch(sub_batch, stats).await?;

            let progress = (stats.blocks_extracted as f64 / range.block_count() as f64) * 100.0;
            println!(
                "   📊 Progress: {}/{} blocks ({:.0}%) | 🏁 checkpoint {}",
                stats.blocks_extracted,
                range.block_count(),
                progress,
                sub_batch.end
            );
        }

        Ok(())
    }

    async fn determine_range(&self) -> Result<Option<BlockRange>, PipelineError> {
        let latest = self.loader.import_status().read_latest().await.map_err(PipelineError::Checkpoint)?;
        let start = next_start(latest.as_ref());

        let end = match self.config.chain_head {
            ChainHead::Latest => {
                self.extractor.client().get_latest_block_number().await.map_err(PipelineError::ChainHead)?
            }
            ChainHead::Horizon(blocks) => start.saturating_add(blocks.saturating_sub(1)),
        };

        tracing::debug!("Checkpoint {:?}, next start {}, end {}", latest.map(|s| s.block_number), start, end);
        Ok(BlockRange::new(start, end))
    }

    async fn process_sub_batch(&mut self, range: BlockRange, stats: &mut PipelineStats) -> Result<(), PipelineError> {
        self.transition(PipelineState::Extracting);
        let raw_blocks =
            self.extractor.extract(range.start, range.end).await.map_err(|source| PipelineError::Extract { range, source })?;
        stats.blocks_extracted += raw_blocks.len();

        self.transition(PipelineState::Transforming);
        let batch = transform(&raw_blocks).map_err(|source| PipelineError::Transform { range, source })?;

        self.transition(PipelineState::Loading);
        let summary = self.loader.load(&batch, range.end).await.map_err(|source| PipelineError::Load { range, source })?;

        stats.record(&summary);
        self.transition(PipelineState::CheckpointAdvanced);
        tracing::info!(
            "Committed blocks {} ({} transactions, {} withdrawals)",
            range,
            batch.transactions.len(),
            batch.withdrawals.len()
        );
        Ok(())
    }

    fn transition(&mut self, next: PipelineState) {
        tracing::debug!("Pipeline state {} -> {}", self.state, next);
        self.state = next;
    }

    /// Print final statistics
    fn print_final_stats(&self, stats: &PipelineStats) {
        println!("\n📊 Pipeline Statistics:");
        println!("   ⏱️  Total time: {:.2}s", stats.elapsed_time.as_secs_f64());
        println!("   🧩 Sub-batches committed: {}", stats.sub_batches_committed);
        println!("   📦 Blocks: {} extracted, {} inserted", stats.blocks_extracted, stats.blocks_inserted);
        println!("   💾 Transactions inserted: {}", stats.transactions_inserted);
        println!("   🏦 Withdrawals inserted: {}", stats.withdrawals_inserted);
        println!("   🔑 Access list items inserted: {}", stats.access_list_items_inserted);
        if let Some(checkpoint) = stats.checkpoint {
            println!("   🏁 Checkpoint: {}", checkpoint);
        }
        println!("   ⚡ Speed: {:.2} blocks/sec", stats.blocks_per_second());
        println!("   ⚡ Throughput: {:.0} txs/sec", stats.transactions_per_second());
    }
}
