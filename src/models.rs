/// Data Models Module
///
/// This module defines the flat rows loaded into PostgreSQL. Every chain
/// value (gas, wei amounts, hex numbers, hashes) is kept as the exact text
/// the provider returned; only synthetic ids and creation timestamps are
/// generated locally.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Table: blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BlockRow {
    /// Requested `0x` quantity; primary key and target of every foreign key
    pub block_number: String,
    /// JSON-RPC response id assigned by the provider
    pub id: i64,
    pub jsonrpc: String,
    pub base_fee_per_gas: Option<String>,
    pub blob_gas_used: Option<String>,
    pub difficulty: String,
    pub excess_blob_gas: Option<String>,
    pub extra_data: String,
    pub gas_limit: String,
    pub gas_used: String,
    pub hash: Option<String>,
    pub logs_bloom: String,
    pub miner: String,
    pub mix_hash: String,
    pub nonce: String,
    pub number: String,
    pub parent_beacon_block_root: Option<String>,
    pub parent_hash: String,
    pub receipts_root: String,
    pub sha3_uncles: String,
    pub size: String,
    pub state_root: String,
    pub timestamp: String,
    pub total_difficulty: Option<String>,
    pub transactions_root: String,
    pub withdrawals_root: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Table: transactions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TransactionRow {
    pub hash: String,
    pub block_number: String,
    pub block_id: i64,
    pub block_hash: Option<String>,
    pub chain_id: Option<String>,
    pub from_address: String,
    pub gas: String,
    pub gas_price: String,
    pub input: String,
    pub max_fee_per_gas: Option<String>,
    pub max_priority_fee_per_gas: Option<String>,
    pub nonce: String,
    pub r: String,
    pub s: String,
    pub to_address: Option<String>,
    pub transaction_index: String,
    pub transaction_type: String,
    pub v: String,
    pub value: String,
    pub y_parity: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Table: transaction_access_list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccessListItemRow {
    pub id: Uuid,
    pub transaction_hash: String,
    /// Position within the transaction's access list
    pub item_index: i32,
    pub address: String,
    pub storage_keys: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Table: withdrawals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WithdrawalRow {
    pub id: Uuid,
    pub block_number: String,
    pub address: String,
    pub amount: String,
    pub withdrawal_index: String,
    pub validator_index: String,
    pub created_at: DateTime<Utc>,
}

/// Table: block_import_status
///
/// Append-only log of checkpoints; the row with the highest `block_number`
/// is the watermark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ImportStatus {
    pub id: Uuid,
    pub block_number: i64,
    pub created_at: DateTime<Utc>,
}

impl ImportStatus {
    /// A fresh checkpoint row for `block_number`
    pub fn new(block_number: i64) -> Self {
        Self { id: Uuid::new_v4(), block_number, created_at: Utc::now() }
    }
}

/// Rows produced from one sub-batch of raw blocks, in extraction order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformedBatch {
    pub blocks: Vec<BlockRow>,
    pub transactions: Vec<TransactionRow>,
    pub withdrawals: Vec<WithdrawalRow>,
    pub access_list_items: Vec<AccessListItemRow>,
}
