/// Database Module
///
/// This module handles all PostgreSQL database operations including:
/// - Connection pool management
/// - Schema migrations
/// - Per-table repositories for blocks, transactions, access lists,
///   withdrawals and the import checkpoint log
pub mod access_list;
pub mod blocks;
pub mod import_status;
pub mod transactions;
pub mod withdrawals;

use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};
use thiserror::Error;

use crate::retry::Transient;

pub use access_list::AccessListRepository;
pub use blocks::BlockRepository;
pub use import_status::ImportStatusRepository;
pub use transactions::TransactionRepository;
pub use withdrawals::WithdrawalRepository;

/// PostgreSQL accepts at most this many bind parameters per statement.
const MAX_BIND_PARAMS: usize = 65_535;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Failed to run database migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Insert into {table} returned no row")]
    NotApplied { table: &'static str },

    #[error("Block number {0} does not fit a BIGINT column")]
    BlockNumberOutOfRange(u64),
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        match self {
            StoreError::Sqlx(err) => is_transient_sqlx(err),
            StoreError::NotApplied { .. } => true,
            StoreError::Migrate(_) | StoreError::BlockNumberOutOfRange(_) => false,
        }
    }
}

/// Connection loss, pool exhaustion, serialization failures and deadlocks
/// are worth another attempt. Constraint violations and bad SQL are not.
fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| is_transient_sqlstate(&code)),
        _ => false,
    }
}

fn is_transient_sqlstate(code: &str) -> bool {
    // 08: connection exception, 40001: serialization failure,
    // 40P01: deadlock detected, 57P01: admin shutdown
    code.starts_with("08") || matches!(code, "40001" | "40P01" | "57P01")
}

/// Rows per multi-row INSERT so a statement stays under the bind limit.
pub(crate) fn rows_per_statement(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns).max(1)
}

/// `notify` hook for pool-level reads retried through `backon`.
pub(crate) fn log_retry(operation: &'static str) -> impl Fn(&StoreError, Duration) {
    move |err: &StoreError, dur: Duration| {
        tracing::warn!(operation, error = %err, "Storage call failed. Retrying in {:.3}s", dur.as_secs_f32());
    }
}

#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(database_url).await?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;

        tracing::info!("Database migrations completed successfully");
        Ok(())
    }

    /// Test the database connection
    pub async fn test_connection(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;

        Ok(())
    }
}
