/// Load Module
///
/// Handles storing one transformed sub-batch into PostgreSQL. Everything
/// from a sub-batch, including its checkpoint, commits in a single database
/// transaction, so a failure leaves no trace of the sub-batch behind.
///
/// Write order inside the transaction follows the foreign keys:
/// 1. blocks
/// 2. transactions and withdrawals, concurrently
/// 3. access-list items
/// 4. the import checkpoint
use std::time::Instant;

use backon::Retryable;
use sqlx::{PgConnection, Postgres, Transaction};
use tokio::sync::Mutex;

use crate::db::{
    log_retry, AccessListRepository, BlockRepository, Database, ImportStatusRepository, StoreError,
    TransactionRepository, WithdrawalRepository,
};
use crate::models::{ImportStatus, TransformedBatch};
use crate::retry::{RetryPolicy, Transient};

/// Rows written by one committed sub-batch
#[derive(Debug, Clone, PartialEq)]
pub struct LoadSummary {
    pub blocks: u64,
    pub transactions: u64,
    pub withdrawals: u64,
    pub access_list_items: u64,
    pub checkpoint: ImportStatus,
}

#[derive(Debug, Clone)]
pub struct Loader {
    database: Database,
    retry: RetryPolicy,
    blocks: BlockRepository,
    transactions: TransactionRepository,
    access_list: AccessListRepository,
    withdrawals: WithdrawalRepository,
    import_status: ImportStatusRepository,
}

impl Loader {
    pub fn new(database: Database, retry: RetryPolicy) -> Self {
        Self {
            blocks: BlockRepository::new(&database, retry),
            transactions: TransactionRepository::new(&database, retry),
            access_list: AccessListRepository::new(&database, retry),
            withdrawals: WithdrawalRepository::new(&database, retry),
            import_status: ImportStatusRepository::new(&database, retry),
            database,
            retry,
        }
    }

    pub fn import_status(&self) -> &ImportStatusRepository {
        &self.import_status
    }

    /// Store `batch` and advance the checkpoint to `end_block_number`,
    /// atomically.
    pub async fn load(&self, batch: &TransformedBatch, end_block_number: u64) -> Result<LoadSummary, StoreError> {
        let checkpoint_block =
            i64::try_from(end_block_number).map_err(|_| StoreError::BlockNumberOutOfRange(end_block_number))?;
        let started = Instant::now();

        let mut tx = self.begin().await?;

        let blocks = self.blocks.bulk_insert(&mut tx, &batch.blocks).await?;

        // Both tables depend only on blocks. Statements still run one at a
        // time on the transaction's connection.
        let (transactions, withdrawals) = {
            let conn: Mutex<&mut PgConnection> = Mutex::new(&mut *tx);
            tokio::try_join!(
                async {
                    let mut conn = conn.lock().await;
                    self.transactions.bulk_insert(&mut **conn, &batch.transactions).await
                },
                async {
                    let mut conn = conn.lock().await;
                    self.withdrawals.bulk_insert(&mut **conn, &batch.withdrawals).await
                },
            )?
        };

        let access_list_items = self.access_list.bulk_insert(&mut tx, &batch.access_list_items).await?;

        let checkpoint = self.import_status.insert(&mut tx, &ImportStatus::new(checkpoint_block)).await?;

        tx.commit().await?;

        tracing::info!(
            "Loaded {} blocks, {} transactions, {} withdrawals and {} access list items; checkpoint at {} ({:.2}s)",
            blocks,
            transactions,
            withdrawals,
            access_list_items,
            checkpoint.block_number,
            started.elapsed().as_secs_f64()
        );

        Ok(LoadSummary { blocks, transactions, withdrawals, access_list_items, checkpoint })
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        (|| self.begin_once())
            .retry(self.retry)
            .when(|err: &StoreError| err.is_transient())
            .notify(log_retry("begin transaction"))
            .await
    }

    async fn begin_once(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        Ok(self.database.pool().begin().await?)
    }
}
