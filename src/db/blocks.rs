/// Block Repository
///
/// Reads and bulk writes for the `blocks` table, plus a CSV bulk-load path
/// for backfilling from flat files.
use backon::Retryable;
use sqlx::{Connection, PgConnection, PgPool, Postgres, QueryBuilder};

use super::{log_retry, rows_per_statement, Database, StoreError};
use crate::models::BlockRow;
use crate::retry::{RetryPolicy, Transient};

const COLUMN_COUNT: usize = 27;

const INSERT_BLOCKS: &str = "INSERT INTO blocks (block_number, id, jsonrpc, base_fee_per_gas, blob_gas_used, \
     difficulty, excess_blob_gas, extra_data, gas_limit, gas_used, hash, logs_bloom, miner, mix_hash, nonce, number, \
     parent_beacon_block_root, parent_hash, receipts_root, sha3_uncles, size, state_root, timestamp, \
     total_difficulty, transactions_root, withdrawals_root, created_at) ";

const SELECT_BLOCK: &str = "SELECT block_number, id, jsonrpc, base_fee_per_gas, blob_gas_used, difficulty, \
     excess_blob_gas, extra_data, gas_limit, gas_used, hash, logs_bloom, miner, mix_hash, nonce, number, \
     parent_beacon_block_root, parent_hash, receipts_root, sha3_uncles, size, state_root, timestamp, \
     total_difficulty, transactions_root, withdrawals_root, created_at \
     FROM blocks WHERE block_number = $1";

/// CSV files carry every column except `created_at`, which defaults to the load time.
const CSV_COLUMNS: &str = "block_number, id, jsonrpc, base_fee_per_gas, blob_gas_used, difficulty, \
     excess_blob_gas, extra_data, gas_limit, gas_used, hash, logs_bloom, miner, mix_hash, nonce, number, \
     parent_beacon_block_root, parent_hash, receipts_root, sha3_uncles, size, state_root, timestamp, \
     total_difficulty, transactions_root, withdrawals_root";

#[derive(Debug, Clone)]
pub struct BlockRepository {
    pool: PgPool,
    retry: RetryPolicy,
}

impl BlockRepository {
    pub fn new(database: &Database, retry: RetryPolicy) -> Self {
        Self { pool: database.pool().clone(), retry }
    }

    /// Look up a block by its `0x` block number
    pub async fn read_by_key(&self, block_number: &str) -> Result<Option<BlockRow>, StoreError> {
        (|| self.read_once(block_number))
            .retry(self.retry)
            .when(|err: &StoreError| err.is_transient())
            .notify(log_retry("read block"))
            .await
    }

    /// Insert blocks inside the caller's transaction. Rows whose key already
    /// exists are left untouched. Returns the number of rows written.
    pub async fn bulk_insert(&self, conn: &mut PgConnection, rows: &[BlockRow]) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut attempts = self.retry.attempts("insert blocks");
        loop {
            let result = insert_chunks(&mut *conn, rows).await;
            if let Some(outcome) = attempts.settle(result).await {
                return outcome;
            }
        }
    }

    /// Bulk-load blocks from CSV (with a header row) through a staging table.
    /// Existing block numbers are skipped. Returns the number of rows written.
    pub async fn bulk_load_csv(&self, conn: &mut PgConnection, csv: &[u8]) -> Result<u64, StoreError> {
        let mut tx = conn.begin().await?;

        sqlx::query("CREATE TEMPORARY TABLE IF NOT EXISTS blocks_staging (LIKE blocks INCLUDING DEFAULTS) ON COMMIT DROP")
            .execute(&mut *tx)
            .await?;
        sqlx::query("TRUNCATE blocks_staging").execute(&mut *tx).await?;

        let mut copy =
            tx.copy_in_raw(&format!("COPY blocks_staging ({CSV_COLUMNS}) FROM STDIN WITH (FORMAT csv, HEADER true)")).await?;
        let sent = copy.send(csv).await.map(|_| ());
        if let Err(err) = sent {
            if let Err(abort_err) = copy.abort(err.to_string()).await {
                tracing::debug!("Aborting block CSV copy failed: {}", abort_err);
            }
            return Err(err.into());
        }
        let staged = copy.finish().await?;

        let merged = sqlx::query(&format!(
            "INSERT INTO blocks ({CSV_COLUMNS}, created_at) SELECT {CSV_COLUMNS}, created_at FROM blocks_staging \
             ON CONFLICT DO NOTHING"
        ))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        tracing::info!("Loaded {} of {} staged blocks from CSV", merged, staged);
        Ok(merged)
    }

    async fn read_once(&self, block_number: &str) -> Result<Option<BlockRow>, StoreError> {
        let row = sqlx::query_as::<_, BlockRow>(SELECT_BLOCK).bind(block_number).fetch_optional(&self.pool).await?;
        Ok(row)
    }
}

/// One attempt: every chunk inside a savepoint, so a failed attempt leaves
/// the surrounding transaction usable.
async fn insert_chunks(conn: &mut PgConnection, rows: &[BlockRow]) -> Result<u64, StoreError> {
    let mut savepoint = conn.begin().await?;
    let mut inserted = 0;

    for chunk in rows.chunks(rows_per_statement(COLUMN_COUNT)) {
        let mut builder = QueryBuilder::<Postgres>::new(INSERT_BLOCKS);
        builder.push_values(chunk, |mut b, row| {
            b.push_bind(&row.block_number)
                .push_bind(row.id)
                .push_bind(&row.jsonrpc)
                .push_bind(&row.base_fee_per_gas)
                .push_bind(&row.blob_gas_used)
                .push_bind(&row.difficulty)
                .push_bind(&row.excess_blob_gas)
                .push_bind(&row.extra_data)
                .push_bind(&row.gas_limit)
                .push_bind(&row.gas_used)
                .push_bind(&row.hash)
                .push_bind(&row.logs_bloom)
                .push_bind(&row.miner)
                .push_bind(&row.mix_hash)
                .push_bind(&row.nonce)
                .push_bind(&row.number)
                .push_bind(&row.parent_beacon_block_root)
                .push_bind(&row.parent_hash)
                .push_bind(&row.receipts_root)
                .push_bind(&row.sha3_uncles)
                .push_bind(&row.size)
                .push_bind(&row.state_root)
                .push_bind(&row.timestamp)
                .push_bind(&row.total_difficulty)
                .push_bind(&row.transactions_root)
                .push_bind(&row.withdrawals_root)
                .push_bind(row.created_at);
        });
        builder.push(" ON CONFLICT DO NOTHING");

        inserted += builder.build().execute(&mut *savepoint).await?.rows_affected();
    }

    savepoint.commit().await?;
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::transform::transform;
    use crate::fixtures;

    fn repository(pool: &PgPool) -> BlockRepository {
        BlockRepository::new(&Database::from_pool(pool.clone()), RetryPolicy::default())
    }

    fn csv_line(row: &BlockRow) -> String {
        let opt = |value: &Option<String>| value.clone().unwrap_or_default();
        [
            row.block_number.clone(),
            row.id.to_string(),
            row.jsonrpc.clone(),
            opt(&row.base_fee_per_gas),
            opt(&row.blob_gas_used),
            row.difficulty.clone(),
            opt(&row.excess_blob_gas),
            row.extra_data.clone(),
            row.gas_limit.clone(),
            row.gas_used.clone(),
            opt(&row.hash),
            row.logs_bloom.clone(),
            row.miner.clone(),
            row.mix_hash.clone(),
            row.nonce.clone(),
            row.number.clone(),
            opt(&row.parent_beacon_block_root),
            row.parent_hash.clone(),
            row.receipts_root.clone(),
            row.sha3_uncles.clone(),
            row.size.clone(),
            row.state_root.clone(),
            row.timestamp.clone(),
            opt(&row.total_difficulty),
            row.transactions_root.clone(),
            opt(&row.withdrawals_root),
        ]
        .join(",")
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL pointing at a PostgreSQL server"]
    async fn test_bulk_insert_then_read_by_key(pool: PgPool) {
        let repo = repository(&pool);
        let batch = transform(&[fixtures::raw_block(1, 0, 0), fixtures::raw_block(2, 0, 0)]).unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let inserted = repo.bulk_insert(&mut conn, &batch.blocks).await.unwrap();
        assert_eq!(inserted, 2);

        let stored = repo.read_by_key("0x2").await.unwrap().expect("block 0x2 stored");
        assert_eq!(stored.hash, batch.blocks[1].hash);
        assert_eq!(stored.total_difficulty.as_deref(), Some("0xc70d815d562d3cfa955"));
        assert!(repo.read_by_key("0x3").await.unwrap().is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL pointing at a PostgreSQL server"]
    async fn test_bulk_insert_ignores_existing_keys(pool: PgPool) {
        let repo = repository(&pool);
        let batch = transform(&[fixtures::raw_block(1, 0, 0)]).unwrap();
        let mut conn = pool.acquire().await.unwrap();

        assert_eq!(repo.bulk_insert(&mut conn, &batch.blocks).await.unwrap(), 1);
        assert_eq!(repo.bulk_insert(&mut conn, &batch.blocks).await.unwrap(), 0);
        assert_eq!(repo.bulk_insert(&mut conn, &[]).await.unwrap(), 0);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL pointing at a PostgreSQL server"]
    async fn test_bulk_load_csv_skips_existing_blocks(pool: PgPool) {
        let repo = repository(&pool);
        let batch = transform(&[fixtures::raw_block(1, 0, 0), fixtures::raw_block(2, 0, 0)]).unwrap();
        let mut conn = pool.acquire().await.unwrap();
        repo.bulk_insert(&mut conn, &batch.blocks[..1]).await.unwrap();

        let mut csv = format!("{}\n", CSV_COLUMNS.split(", ").collect::<Vec<_>>().join(","));
        for row in &batch.blocks {
            csv.push_str(&csv_line(row));
            csv.push('\n');
        }

        let loaded = repo.bulk_load_csv(&mut conn, csv.as_bytes()).await.unwrap();
        assert_eq!(loaded, 1);

        let stored = repo.read_by_key("0x2").await.unwrap().expect("block 0x2 loaded");
        assert_eq!(stored.miner, batch.blocks[1].miner);
        assert_eq!(stored.withdrawals_root, batch.blocks[1].withdrawals_root);
    }
}
