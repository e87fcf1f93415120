/// Transform Module
///
/// Flattens nested raw blocks into relational rows: one block row per block,
/// one transaction row per transaction, one access-list row per access-list
/// entry and one withdrawal row per withdrawal. No I/O happens here; apart
/// from generated ids and `created_at`, the output is a pure function of the
/// input.
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{AccessListItemRow, BlockRow, TransactionRow, TransformedBatch, WithdrawalRow};
use crate::rpc::{
    models::{RawBlock, RpcAccessListItem, RpcTransaction, RpcWithdrawal},
    parse_quantity,
};

/// Data integrity problems. These are never retried.
#[derive(Error, Debug, PartialEq)]
pub enum TransformError {
    #[error("Transaction at position {position} in block {block_number} has no hash")]
    MissingTransactionHash { block_number: String, position: usize },

    #[error("Transaction {hash} claims block {claimed} but was returned in block {block_number}")]
    BlockNumberMismatch { hash: String, claimed: String, block_number: String },

    #[error("Requested block {requested} but the provider returned block {returned}")]
    HeaderNumberMismatch { requested: String, returned: String },
}

/// Flatten a batch of raw blocks, preserving input order within each row set.
pub fn transform(raw_blocks: &[RawBlock]) -> Result<TransformedBatch, TransformError> {
    let created_at = Utc::now();
    let mut batch = TransformedBatch::default();

    for raw in raw_blocks {
        // Every row is keyed by the requested number; the header must agree.
        if parse_quantity(&raw.header.number).ok() != Some(raw.number) {
            return Err(TransformError::HeaderNumberMismatch {
                requested: raw.block_number.clone(),
                returned: raw.header.number.clone(),
            });
        }
        batch.blocks.push(block_row(raw, created_at));

        for (position, tx) in raw.transactions.iter().enumerate() {
            let row = transaction_row(raw, position, tx, created_at)?;

            if let Some(access_list) = &tx.access_list {
                batch.access_list_items.extend(
                    access_list
                        .iter()
                        .enumerate()
                        .map(|(item_index, item)| access_list_item_row(&row.hash, item_index, item, created_at)),
                );
            }
            batch.transactions.push(row);
        }

        batch.withdrawals.extend(raw.withdrawals.iter().map(|w| withdrawal_row(&raw.block_number, w, created_at)));
    }

    tracing::debug!(
        "Transformed {} blocks into {} transactions, {} withdrawals, {} access list items",
        batch.blocks.len(),
        batch.transactions.len(),
        batch.withdrawals.len(),
        batch.access_list_items.len()
    );

    Ok(batch)
}

fn block_row(raw: &RawBlock, created_at: DateTime<Utc>) -> BlockRow {
    let header = &raw.header;
    BlockRow {
        block_number: raw.block_number.clone(),
        id: raw.id,
        jsonrpc: raw.jsonrpc.clone(),
        base_fee_per_gas: header.base_fee_per_gas.clone(),
        blob_gas_used: header.blob_gas_used.clone(),
        difficulty: header.difficulty.clone(),
        excess_blob_gas: header.excess_blob_gas.clone(),
        extra_data: header.extra_data.clone(),
        gas_limit: header.gas_limit.clone(),
        gas_used: header.gas_used.clone(),
        hash: header.hash.clone(),
        logs_bloom: header.logs_bloom.clone(),
        miner: header.miner.clone(),
        mix_hash: header.mix_hash.clone(),
        nonce: header.nonce.clone(),
        number: header.number.clone(),
        parent_beacon_block_root: header.parent_beacon_block_root.clone(),
        parent_hash: header.parent_hash.clone(),
        receipts_root: header.receipts_root.clone(),
        sha3_uncles: header.sha3_uncles.clone(),
        size: header.size.clone(),
        state_root: header.state_root.clone(),
        timestamp: header.timestamp.clone(),
        total_difficulty: header.total_difficulty.clone(),
        transactions_root: header.transactions_root.clone(),
        withdrawals_root: header.withdrawals_root.clone(),
        created_at,
    }
}

fn transaction_row(
    raw: &RawBlock,
    position: usize,
    tx: &RpcTransaction,
    created_at: DateTime<Utc>,
) -> Result<TransactionRow, TransformError> {
    let hash = match tx.hash.as_deref().map(str::trim) {
        Some(hash) if !hash.is_empty() => hash.to_string(),
        _ => return Err(TransformError::MissingTransactionHash { block_number: raw.block_number.clone(), position }),
    };

    // The row is keyed to the block it was returned in; a transaction that
    // names a different block is corrupt upstream data.
    if let Some(claimed) = &tx.block_number {
        if let Ok(claimed_number) = parse_quantity(claimed) {
            if claimed_number != raw.number {
                return Err(TransformError::BlockNumberMismatch {
                    hash,
                    claimed: claimed.clone(),
                    block_number: raw.block_number.clone(),
                });
            }
        }
    }

    Ok(TransactionRow {
        hash,
        block_number: raw.block_number.clone(),
        block_id: raw.id,
        block_hash: tx.block_hash.clone(),
        chain_id: tx.chain_id.clone(),
        from_address: tx.from.clone(),
        gas: tx.gas.clone(),
        gas_price: tx.gas_price.clone(),
        input: tx.input.clone(),
        max_fee_per_gas: tx.max_fee_per_gas.clone(),
        max_priority_fee_per_gas: tx.max_priority_fee_per_gas.clone(),
        nonce: tx.nonce.clone(),
        r: tx.r.clone(),
        s: tx.s.clone(),
        to_address: tx.to.clone(),
        transaction_index: tx.transaction_index.clone(),
        transaction_type: tx.tx_type.clone(),
        v: tx.v.clone(),
        value: tx.value.clone(),
        y_parity: tx.y_parity.clone(),
        created_at,
    })
}

fn access_list_item_row(
    transaction_hash: &str,
    item_index: usize,
    item: &RpcAccessListItem,
    created_at: DateTime<Utc>,
) -> AccessListItemRow {
    AccessListItemRow {
        id: Uuid::new_v4(),
        transaction_hash: transaction_hash.to_string(),
        item_index: i32::try_from(item_index).unwrap_or(i32::MAX),
        address: item.address.clone(),
        storage_keys: item.storage_keys.clone(),
        created_at,
    }
}

fn withdrawal_row(block_number: &str, withdrawal: &RpcWithdrawal, created_at: DateTime<Utc>) -> WithdrawalRow {
    WithdrawalRow {
        id: Uuid::new_v4(),
        block_number: block_number.to_string(),
        address: withdrawal.address.clone(),
        amount: withdrawal.amount.clone(),
        withdrawal_index: withdrawal.index.clone(),
        validator_index: withdrawal.validator_index.clone(),
        created_at,
    }
}
