/// Withdrawal Repository
use backon::Retryable;
use sqlx::{Connection, PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{log_retry, rows_per_statement, Database, StoreError};
use crate::models::WithdrawalRow;
use crate::retry::{RetryPolicy, Transient};

const COLUMN_COUNT: usize = 7;

const INSERT_WITHDRAWALS: &str = "INSERT INTO withdrawals (id, block_number, address, amount, withdrawal_index, \
     validator_index, created_at) ";

const SELECT_WITHDRAWAL: &str = "SELECT id, block_number, address, amount, withdrawal_index, validator_index, \
     created_at FROM withdrawals WHERE id = $1";

#[derive(Debug, Clone)]
pub struct WithdrawalRepository {
    pool: PgPool,
    retry: RetryPolicy,
}

impl WithdrawalRepository {
    pub fn new(database: &Database, retry: RetryPolicy) -> Self {
        Self { pool: database.pool().clone(), retry }
    }

    pub async fn read_by_key(&self, id: Uuid) -> Result<Option<WithdrawalRow>, StoreError> {
        (|| self.read_once(id))
            .retry(self.retry)
            .when(|err: &StoreError| err.is_transient())
            .notify(log_retry("read withdrawal"))
            .await
    }

    /// Insert withdrawals. A `(block_number, withdrawal_index)` pair that is
    /// already stored is skipped.
    pub async fn bulk_insert(&self, conn: &mut PgConnection, rows: &[WithdrawalRow]) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut attempts = self.retry.attempts("insert withdrawals");
        loop {
            let result = insert_chunks(&mut *conn, rows).await;
            if let Some(outcome) = attempts.settle(result).await {
                return outcome;
            }
        }
    }

    async fn read_once(&self, id: Uuid) -> Result<Option<WithdrawalRow>, StoreError> {
        let row = sqlx::query_as::<_, WithdrawalRow>(SELECT_WITHDRAWAL).bind(id).fetch_optional(&self.pool).await?;
        Ok(row)
    }
}

async fn insert_chunks(conn: &mut PgConnection, rows: &[WithdrawalRow]) -> Result<u64, StoreError> {
    let mut savepoint = conn.begin().await?;
    let mut inserted = 0;

    for chunk in rows.chunks(rows_per_statement(COLUMN_COUNT)) {
        let mut builder = QueryBuilder::<Postgres>::new(INSERT_WITHDRAWALS);
        builder.push_values(chunk, |mut b, row| {
            b.push_bind(row.id)
                .push_bind(&row.block_number)
                .push_bind(&row.address)
                .push_bind(&row.amount)
                .push_bind(&row.withdrawal_index)
                .push_bind(&row.validator_index)
                .push_bind(row.created_at);
        });
        builder.push(" ON CONFLICT DO NOTHING");

        inserted += builder.build().execute(&mut *savepoint).await?.rows_affected();
    }

    savepoint.commit().await?;
    Ok(inserted)
}
