/// Import Status Repository
///
/// Append-only checkpoint log. The row with the highest block number is
/// the watermark the next run resumes from.
use backon::Retryable;
use sqlx::{Connection, PgConnection, PgPool};

use super::{log_retry, Database, StoreError};
use crate::models::ImportStatus;
use crate::retry::{RetryPolicy, Transient};

const TABLE: &str = "block_import_status";

#[derive(Debug, Clone)]
pub struct ImportStatusRepository {
    pool: PgPool,
    retry: RetryPolicy,
}

impl ImportStatusRepository {
    pub fn new(database: &Database, retry: RetryPolicy) -> Self {
        Self { pool: database.pool().clone(), retry }
    }

    /// The checkpoint with the highest block number, if any was ever written
    pub async fn read_latest(&self) -> Result<Option<ImportStatus>, StoreError> {
        (|| self.read_latest_once())
            .retry(self.retry)
            .when(|err: &StoreError| err.is_transient())
            .notify(log_retry("read latest import status"))
            .await
    }

    /// Append a checkpoint inside the caller's transaction and return the
    /// stored row. An insert that reports no row is retried.
    pub async fn insert(&self, conn: &mut PgConnection, status: &ImportStatus) -> Result<ImportStatus, StoreError> {
        let mut attempts = self.retry.attempts("insert import status");
        loop {
            let result = insert_once(&mut *conn, status).await;
            if let Some(outcome) = attempts.settle(result).await {
                return outcome;
            }
        }
    }

    async fn read_latest_once(&self) -> Result<Option<ImportStatus>, StoreError> {
        let latest = sqlx::query_as::<_, ImportStatus>(
            "SELECT id, block_number, created_at FROM block_import_status ORDER BY block_number DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(latest)
    }
}

async fn insert_once(conn: &mut PgConnection, status: &ImportStatus) -> Result<ImportStatus, StoreError> {
    let mut savepoint = conn.begin().await?;

    let stored = sqlx::query_as::<_, ImportStatus>(
        "INSERT INTO block_import_status (id, block_number, created_at) VALUES ($1, $2, $3) \
         RETURNING id, block_number, created_at",
    )
    .bind(status.id)
    .bind(status.block_number)
    .bind(status.created_at)
    .fetch_optional(&mut *savepoint)
    .await?
    .ok_or(StoreError::NotApplied { table: TABLE })?;

    savepoint.commit().await?;
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repository(pool: &PgPool) -> ImportStatusRepository {
        ImportStatusRepository::new(&Database::from_pool(pool.clone()), RetryPolicy::default())
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL pointing at a PostgreSQL server"]
    async fn test_read_latest_on_empty_log(pool: PgPool) {
        assert!(repository(&pool).read_latest().await.unwrap().is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL pointing at a PostgreSQL server"]
    async fn test_read_latest_returns_highest_block_number(pool: PgPool) {
        let repo = repository(&pool);
        let mut conn = pool.acquire().await.unwrap();

        // Insertion order differs from block order.
        for block_number in [200, 1_000, 500] {
            let stored = repo.insert(&mut conn, &ImportStatus::new(block_number)).await.unwrap();
            assert_eq!(stored.block_number, block_number);
        }

        let latest = repo.read_latest().await.unwrap().expect("checkpoint written");
        assert_eq!(latest.block_number, 1_000);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL pointing at a PostgreSQL server"]
    async fn test_uncommitted_checkpoint_is_invisible(pool: PgPool) {
        let repo = repository(&pool);

        let mut tx = pool.begin().await.unwrap();
        repo.insert(&mut tx, &ImportStatus::new(42)).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(repo.read_latest().await.unwrap().is_none());
    }
}
