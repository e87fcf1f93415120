//! JSON payloads shaped like `eth_getBlockByNumber(n, true)` results, used by
//! unit tests across the crate.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};

use crate::rpc::models::{ChainStackBlock, ProviderBlock, RawBlock};
use crate::rpc::{parse_quantity, to_quantity};

/// Shape of every block served by [`respond_with_chain`]
pub const TRANSACTIONS_PER_BLOCK: usize = 2;
pub const WITHDRAWALS_PER_BLOCK: usize = 1;

pub const FROM_ADDRESS: &str = "0x00000000000000000000000000000000000000f0";
pub const TO_ADDRESS: &str = "0x00000000000000000000000000000000000000f1";

pub fn transaction_hash(block: u64, index: u64) -> String {
    format!("0x{:064x}", block * 1_000 + index)
}

/// A type-2 transaction; `with_access_list` attaches a single-entry access list.
pub fn transaction_json(block: u64, index: u64, with_access_list: bool) -> Value {
    let mut tx = json!({
        "blockHash": format!("0x{:064x}", block),
        "blockNumber": to_quantity(block),
        "chainId": "0x1",
        "from": FROM_ADDRESS,
        "gas": "0x5208",
        "gasPrice": "0x3b9aca00",
        "hash": transaction_hash(block, index),
        "input": "0x",
        "maxFeePerGas": "0x77359400",
        "maxPriorityFeePerGas": "0x3b9aca00",
        "nonce": to_quantity(index),
        "r": "0x1b5e176d927f8e9ab405058b2d2457392da3e20f328b16ddabcebc33eaac5fea",
        "s": "0x4ba69724e8f69de52f0125ad8b3c5c2cef33019bac3249e2c0a2192766d1721c",
        "to": TO_ADDRESS,
        "transactionIndex": to_quantity(index),
        "type": "0x2",
        "v": "0x1",
        "value": "0xde0b6b3a7640000",
        "yParity": "0x1"
    });
    if with_access_list {
        tx["accessList"] = json!([{
            "address": "0x00000000000000000000000000000000000000aa",
            "storageKeys": [
                "0x0000000000000000000000000000000000000000000000000000000000000003",
                "0x0000000000000000000000000000000000000000000000000000000000000007"
            ]
        }]);
    }
    tx
}

pub fn withdrawal_json(block: u64, index: u64) -> Value {
    json!({
        "address": "0x00000000000000000000000000000000000000bb",
        "amount": "0x10e7f4b",
        "index": to_quantity(block * 16 + index),
        "validatorIndex": to_quantity(500_000 + index)
    })
}

/// Block `result` object. The first transaction carries an access list, the others do not.
pub fn block_result(number: u64, transactions: usize, withdrawals: usize) -> Value {
    let transactions: Vec<Value> =
        (0..transactions as u64).map(|index| transaction_json(number, index, index == 0)).collect();
    let withdrawals: Vec<Value> = (0..withdrawals as u64).map(|index| withdrawal_json(number, index)).collect();

    json!({
        "baseFeePerGas": "0x7",
        "blobGasUsed": "0x0",
        "difficulty": "0x0",
        "excessBlobGas": "0x0",
        "extraData": "0x",
        "gasLimit": "0x1c9c380",
        "gasUsed": "0xa410",
        "hash": format!("0x{:064x}", number),
        "logsBloom": "0x00",
        "miner": "0x95222290dd7278aa3ddd389cc1e1d165cc4bafe5",
        "mixHash": format!("0x{:064x}", number + 1),
        "nonce": "0x0000000000000000",
        "number": to_quantity(number),
        "parentBeaconBlockRoot": format!("0x{:064x}", number + 2),
        "parentHash": format!("0x{:064x}", number.saturating_sub(1)),
        "receiptsRoot": format!("0x{:064x}", number + 3),
        "sha3Uncles": "0x1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347",
        "size": "0x2a3",
        "stateRoot": format!("0x{:064x}", number + 4),
        "timestamp": "0x65f1b6c7",
        "totalDifficulty": "0xc70d815d562d3cfa955",
        "transactions": transactions,
        "transactionsRoot": format!("0x{:064x}", number + 5),
        "uncles": [],
        "withdrawals": withdrawals,
        "withdrawalsRoot": format!("0x{:064x}", number + 6)
    })
}

pub fn rpc_response(id: i64, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

pub fn raw_block(number: u64, transactions: usize, withdrawals: usize) -> RawBlock {
    let block: ChainStackBlock =
        serde_json::from_value(block_result(number, transactions, withdrawals)).expect("fixture block decodes");
    ProviderBlock::ChainStack(block).into_raw(number, number as i64, "2.0".to_string())
}

/// In-process JSON-RPC endpoint that counts requests.
pub struct RpcMock {
    pub url: String,
    pub calls: Arc<AtomicUsize>,
}

/// Serve `respond(call_index, request_body)` on an ephemeral local port.
pub async fn spawn_rpc_mock<F>(respond: F) -> RpcMock
where
    F: Fn(usize, &Value) -> (StatusCode, Value) + Send + Sync + 'static,
{
    let calls = Arc::new(AtomicUsize::new(0));
    let respond = Arc::new(respond);
    let counter = calls.clone();

    let app = Router::new().route(
        "/",
        post(move |Json(request): Json<Value>| {
            let respond = respond.clone();
            let counter = counter.clone();
            async move {
                let call = counter.fetch_add(1, Ordering::SeqCst);
                let (status, body) = respond(call, &request);
                (status, Json(body))
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind mock listener");
    let addr = listener.local_addr().expect("mock listener address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock server");
    });

    RpcMock { url: format!("http://{addr}/"), calls }
}

/// A healthy chain whose head is `head`. Every block has
/// [`TRANSACTIONS_PER_BLOCK`] transactions and [`WITHDRAWALS_PER_BLOCK`]
/// withdrawals; blocks listed in `failing` always answer HTTP 500.
pub fn respond_with_chain(
    head: u64,
    failing: &[u64],
) -> impl Fn(usize, &Value) -> (StatusCode, Value) + Send + Sync + 'static {
    let failing = failing.to_vec();
    move |_, request| {
        let id = request["id"].as_i64().unwrap_or(1);
        match request["method"].as_str() {
            Some("eth_blockNumber") => (StatusCode::OK, rpc_response(id, json!(to_quantity(head)))),
            Some("eth_getBlockByNumber") => {
                let number = request["params"][0].as_str().and_then(|q| parse_quantity(q).ok());
                match number {
                    Some(number) if failing.contains(&number) => (StatusCode::INTERNAL_SERVER_ERROR, json!({})),
                    Some(number) if number <= head => (
                        StatusCode::OK,
                        rpc_response(id, block_result(number, TRANSACTIONS_PER_BLOCK, WITHDRAWALS_PER_BLOCK)),
                    ),
                    Some(_) => (StatusCode::OK, rpc_response(id, Value::Null)),
                    None => (StatusCode::BAD_REQUEST, json!({})),
                }
            }
            _ => (StatusCode::BAD_REQUEST, json!({})),
        }
    }
}
