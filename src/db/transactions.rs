/// Transaction Repository
use backon::Retryable;
use sqlx::{Connection, PgConnection, PgPool, Postgres, QueryBuilder};

use super::{log_retry, rows_per_statement, Database, StoreError};
use crate::models::TransactionRow;
use crate::retry::{RetryPolicy, Transient};

const COLUMN_COUNT: usize = 21;

const INSERT_TRANSACTIONS: &str = "INSERT INTO transactions (hash, block_number, block_id, block_hash, chain_id, \
     from_address, gas, gas_price, input, max_fee_per_gas, max_priority_fee_per_gas, nonce, r, s, to_address, \
     transaction_index, transaction_type, v, value, y_parity, created_at) ";

const SELECT_TRANSACTION: &str = "SELECT hash, block_number, block_id, block_hash, chain_id, from_address, gas, \
     gas_price, input, max_fee_per_gas, max_priority_fee_per_gas, nonce, r, s, to_address, transaction_index, \
     transaction_type, v, value, y_parity, created_at FROM transactions WHERE hash = $1";

#[derive(Debug, Clone)]
pub struct TransactionRepository {
    pool: PgPool,
    retry: RetryPolicy,
}

impl TransactionRepository {
    pub fn new(database: &Database, retry: RetryPolicy) -> Self {
        Self { pool: database.pool().clone(), retry }
    }

    /// Look up a transaction by hash
    pub async fn read_by_key(&self, hash: &str) -> Result<Option<TransactionRow>, StoreError> {
        (|| self.read_once(hash))
            .retry(self.retry)
            .when(|err: &StoreError| err.is_transient())
            .notify(log_retry("read transaction"))
            .await
    }

    /// Insert transactions inside the caller's transaction, skipping hashes
    /// that are already stored. Every row must reference a stored block.
    pub async fn bulk_insert(&self, conn: &mut PgConnection, rows: &[TransactionRow]) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut attempts = self.retry.attempts("insert transactions");
        loop {
            let result = insert_chunks(&mut *conn, rows).await;
            if let Some(outcome) = attempts.settle(result).await {
                return outcome;
            }
        }
    }

    async fn read_once(&self, hash: &str) -> Result<Option<TransactionRow>, StoreError> {
        let row = sqlx::query_as::<_, TransactionRow>(SELECT_TRANSACTION).bind(hash).fetch_optional(&self.pool).await?;
        Ok(row)
    }
}

async fn insert_chunks(conn: &mut PgConnection, rows: &[TransactionRow]) -> Result<u64, StoreError> {
    let mut savepoint = conn.begin().await?;
    let mut inserted = 0;

    for chunk in rows.chunks(rows_per_statement(COLUMN_COUNT)) {
        let mut builder = QueryBuilder::<Postgres>::new(INSERT_TRANSACTIONS);
        builder.push_values(chunk, |mut b, row| {
            b.push_bind(&row.hash)
                .push_bind(&row.block_number)
                .push_bind(row.block_id)
                .push_bind(&row.block_hash)
                .push_bind(&row.chain_id)
                .push_bind(&row.from_address)
                .push_bind(&row.gas)
                .push_bind(&row.gas_price)
                .push_bind(&row.input)
                .push_bind(&row.max_fee_per_gas)
                .push_bind(&row.max_priority_fee_per_gas)
                .push_bind(&row.nonce)
                .push_bind(&row.r)
                .push_bind(&row.s)
                .push_bind(&row.to_address)
                .push_bind(&row.transaction_index)
                .push_bind(&row.transaction_type)
                .push_bind(&row.v)
                .push_bind(&row.value)
                .push_bind(&row.y_parity)
                .push_bind(row.created_at);
        });
        builder.push(" ON CONFLICT DO NOTHING");

        inserted += builder.build().execute(&mut *savepoint).await?.rows_affected();
    }

    savepoint.commit().await?;
    Ok(inserted)
}
