/// RPC Models
///
/// JSON-RPC envelope and the block payloads returned by
/// `eth_getBlockByNumber(number, true)`. Both supported providers return
/// the same nested layout but disagree on which header fields are optional,
/// so each gets its own strict shape and is normalized into [`RawBlock`]
/// before anything downstream sees it.
use serde::{Deserialize, Serialize};

/// JSON-RPC 2.0 response envelope
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse<T> {
    #[serde(default)]
    pub id: Option<i64>,
    pub jsonrpc: String,
    pub result: Option<T>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcAccessListItem {
    pub address: String,
    pub storage_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcWithdrawal {
    pub address: String,
    pub amount: String,
    pub index: String,
    pub validator_index: String,
}

/// Full transaction object as embedded in a block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    #[serde(default)]
    pub access_list: Option<Vec<RpcAccessListItem>>,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub chain_id: Option<String>,
    pub from: String,
    pub gas: String,
    pub gas_price: String,
    /// Required downstream; a missing hash is reported as an integrity error, not a decode error.
    #[serde(default)]
    pub hash: Option<String>,
    pub input: String,
    #[serde(default)]
    pub max_fee_per_gas: Option<String>,
    #[serde(default)]
    pub max_priority_fee_per_gas: Option<String>,
    pub nonce: String,
    pub r: String,
    pub s: String,
    /// `null` for contract creation
    #[serde(default)]
    pub to: Option<String>,
    pub transaction_index: String,
    #[serde(rename = "type")]
    pub tx_type: String,
    pub v: String,
    pub value: String,
    #[serde(default)]
    pub y_parity: Option<String>,
}

/// Canonical block header. Every scalar is kept as the exact text the
/// provider sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    #[serde(default)]
    pub base_fee_per_gas: Option<String>,
    #[serde(default)]
    pub blob_gas_used: Option<String>,
    pub difficulty: String,
    #[serde(default)]
    pub excess_blob_gas: Option<String>,
    pub extra_data: String,
    pub gas_limit: String,
    pub gas_used: String,
    /// `null` for an unsealed block
    #[serde(default)]
    pub hash: Option<String>,
    pub logs_bloom: String,
    pub miner: String,
    pub mix_hash: String,
    pub nonce: String,
    pub number: String,
    #[serde(default)]
    pub parent_beacon_block_root: Option<String>,
    pub parent_hash: String,
    pub receipts_root: String,
    pub sha3_uncles: String,
    pub size: String,
    pub state_root: String,
    pub timestamp: String,
    #[serde(default)]
    pub total_difficulty: Option<String>,
    pub transactions_root: String,
    #[serde(default)]
    pub withdrawals_root: Option<String>,
}

/// ChainStack block result: post-merge header fields may be absent and
/// pre-Shanghai blocks carry no `withdrawals` key.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainStackBlock {
    #[serde(flatten)]
    pub header: BlockHeader,
    pub transactions: Vec<RpcTransaction>,
    #[serde(default)]
    pub withdrawals: Vec<RpcWithdrawal>,
}

/// QuickNode block result: every post-Dencun header field is required.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickNodeBlock {
    pub base_fee_per_gas: String,
    pub blob_gas_used: String,
    pub difficulty: String,
    pub excess_blob_gas: String,
    pub extra_data: String,
    pub gas_limit: String,
    pub gas_used: String,
    pub hash: Option<String>,
    pub logs_bloom: String,
    pub miner: String,
    pub mix_hash: String,
    pub nonce: String,
    pub number: String,
    pub parent_beacon_block_root: String,
    pub parent_hash: String,
    pub receipts_root: String,
    pub sha3_uncles: String,
    pub size: String,
    pub state_root: String,
    pub timestamp: String,
    pub total_difficulty: String,
    pub transactions: Vec<RpcTransaction>,
    pub transactions_root: String,
    pub withdrawals: Vec<RpcWithdrawal>,
    pub withdrawals_root: String,
}

/// A block as decoded from one of the supported providers
#[derive(Debug, Clone)]
pub enum ProviderBlock {
    ChainStack(ChainStackBlock),
    QuickNode(QuickNodeBlock),
}

impl ProviderBlock {
    /// Normalize into the single shape consumed by the transformer.
    pub fn into_raw(self, number: u64, id: i64, jsonrpc: String) -> RawBlock {
        let (header, transactions, withdrawals) = match self {
            ProviderBlock::ChainStack(block) => (block.header, block.transactions, block.withdrawals),
            ProviderBlock::QuickNode(block) => (
                BlockHeader {
                    base_fee_per_gas: Some(block.base_fee_per_gas),
                    blob_gas_used: Some(block.blob_gas_used),
                    difficulty: block.difficulty,
                    excess_blob_gas: Some(block.excess_blob_gas),
                    extra_data: block.extra_data,
                    gas_limit: block.gas_limit,
                    gas_used: block.gas_used,
                    hash: block.hash,
                    logs_bloom: block.logs_bloom,
                    miner: block.miner,
                    mix_hash: block.mix_hash,
                    nonce: block.nonce,
                    number: block.number,
                    parent_beacon_block_root: Some(block.parent_beacon_block_root),
                    parent_hash: block.parent_hash,
                    receipts_root: block.receipts_root,
                    sha3_uncles: block.sha3_uncles,
                    size: block.size,
                    state_root: block.state_root,
                    timestamp: block.timestamp,
                    total_difficulty: Some(block.total_difficulty),
                    transactions_root: block.transactions_root,
                    withdrawals_root: Some(block.withdrawals_root),
                },
                block.transactions,
                block.withdrawals,
            ),
        };

        RawBlock { number, block_number: super::to_quantity(number), id, jsonrpc, header, transactions, withdrawals }
    }
}

/// Provider-independent extracted block. `block_number` is the `0x` quantity
/// that was requested and is the key every child row points at.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBlock {
    pub number: u64,
    pub block_number: String,
    pub id: i64,
    pub jsonrpc: String,
    pub header: BlockHeader,
    pub transactions: Vec<RpcTransaction>,
    pub withdrawals: Vec<RpcWithdrawal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use serde_json::json;

    #[test]
    fn test_chainstack_block_tolerates_missing_optional_fields() {
        let mut result = fixtures::block_result(3, 1, 0);
        let object = result.as_object_mut().unwrap();
        object.remove("withdrawals");
        object.remove("baseFeePerGas");
        object.remove("totalDifficulty");

        let block: ChainStackBlock = serde_json::from_value(result).unwrap();

        assert_eq!(block.header.number, "0x3");
        assert_eq!(block.header.base_fee_per_gas, None);
        assert!(block.withdrawals.is_empty());
        assert_eq!(block.transactions.len(), 1);
    }

    #[test]
    fn test_quicknode_block_requires_post_merge_fields() {
        let mut result = fixtures::block_result(3, 0, 0);
        result.as_object_mut().unwrap().remove("parentBeaconBlockRoot");

        assert!(serde_json::from_value::<QuickNodeBlock>(result).is_err());
    }

    #[test]
    fn test_both_providers_normalize_to_same_raw_block() {
        let result = fixtures::block_result(9, 2, 1);
        let chainstack: ChainStackBlock = serde_json::from_value(result.clone()).unwrap();
        let quicknode: QuickNodeBlock = serde_json::from_value(result).unwrap();

        let a = ProviderBlock::ChainStack(chainstack).into_raw(9, 9, "2.0".to_string());
        let b = ProviderBlock::QuickNode(quicknode).into_raw(9, 9, "2.0".to_string());

        assert_eq!(a, b);
        assert_eq!(a.block_number, "0x9");
        assert_eq!(a.transactions.len(), 2);
        assert_eq!(a.withdrawals.len(), 1);
    }

    #[test]
    fn test_transaction_decodes_wire_names() {
        let tx: RpcTransaction = serde_json::from_value(fixtures::transaction_json(4, 0, true)).unwrap();

        assert_eq!(tx.tx_type, "0x2");
        assert_eq!(tx.from, fixtures::FROM_ADDRESS);
        assert_eq!(tx.y_parity.as_deref(), Some("0x1"));
        assert_eq!(tx.access_list.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_envelope_with_null_result() {
        let envelope: JsonRpcResponse<ChainStackBlock> =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": null})).unwrap();

        assert!(envelope.result.is_none());
        assert!(envelope.error.is_none());
    }

    #[test]
    fn test_error_envelope_without_result_field() {
        let envelope: JsonRpcResponse<QuickNodeBlock> = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 9,
            "error": {"code": -32000, "message": "header not found"}
        }))
        .unwrap();

        assert!(envelope.result.is_none());
        assert_eq!(envelope.id, Some(9));
        assert_eq!(envelope.error.map(|e| e.code), Some(-32000));
    }
}
