/// Access List Repository
use backon::Retryable;
use sqlx::{Connection, PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{log_retry, rows_per_statement, Database, StoreError};
use crate::models::AccessListItemRow;
use crate::retry::{RetryPolicy, Transient};

const COLUMN_COUNT: usize = 6;

const INSERT_ITEMS: &str =
    "INSERT INTO transaction_access_list (id, transaction_hash, item_index, address, storage_keys, created_at) ";

const SELECT_ITEM: &str = "SELECT id, transaction_hash, item_index, address, storage_keys, created_at \
     FROM transaction_access_list WHERE id = $1";

#[derive(Debug, Clone)]
pub struct AccessListRepository {
    pool: PgPool,
    retry: RetryPolicy,
}

impl AccessListRepository {
    pub fn new(database: &Database, retry: RetryPolicy) -> Self {
        Self { pool: database.pool().clone(), retry }
    }

    pub async fn read_by_key(&self, id: Uuid) -> Result<Option<AccessListItemRow>, StoreError> {
        (|| self.read_once(id))
            .retry(self.retry)
            .when(|err: &StoreError| err.is_transient())
            .notify(log_retry("read access list item"))
            .await
    }

    /// Insert access-list items; their transactions must already be stored.
    /// An item whose `(transaction_hash, item_index)` is already stored is skipped.
    pub async fn bulk_insert(&self, conn: &mut PgConnection, rows: &[AccessListItemRow]) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut attempts = self.retry.attempts("insert access list items");
        loop {
            let result = insert_chunks(&mut *conn, rows).await;
            if let Some(outcome) = attempts.settle(result).await {
                return outcome;
            }
        }
    }

    async fn read_once(&self, id: Uuid) -> Result<Option<AccessListItemRow>, StoreError> {
        let row = sqlx::query_as::<_, AccessListItemRow>(SELECT_ITEM).bind(id).fetch_optional(&self.pool).await?;
        Ok(row)
    }
}

async fn insert_chunks(conn: &mut PgConnection, rows: &[AccessListItemRow]) -> Result<u64, StoreError> {
    let mut savepoint = conn.begin().await?;
    let mut inserted = 0;

    for chunk in rows.chunks(rows_per_statement(COLUMN_COUNT)) {
        let mut builder = QueryBuilder::<Postgres>::new(INSERT_ITEMS);
        builder.push_values(chunk, |mut b, row| {
            b.push_bind(row.id)
                .push_bind(&row.transaction_hash)
                .push_bind(row.item_index)
                .push_bind(&row.address)
                .push_bind(&row.storage_keys)
                .push_bind(row.created_at);
        });
        builder.push(" ON CONFLICT DO NOTHING");

        inserted += builder.build().execute(&mut *savepoint).await?.rows_affected();
    }

    savepoint.commit().await?;
    Ok(inserted)
}
