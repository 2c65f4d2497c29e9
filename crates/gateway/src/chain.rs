//! Chain boundary: signing, broadcast and read-only token queries.

use crate::builder::ContractCall;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokengate_common::types::{Address, TxHash};
use tokengate_crypto::abi::{self, Token};
use tokengate_crypto::{KeyPair, LegacyTransaction, SignedTransaction};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

/// Whether a failed call may have reached the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastState {
    /// The chain never saw the transaction; safe to retry
    NotBroadcast,
    /// The transaction may have been broadcast
    Ambiguous,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("network error: {detail}")]
    Network { detail: String, broadcast: BroadcastState },

    #[error("{0}")]
    Rejected(String),

    #[error("malformed chain response: {0}")]
    InvalidResponse(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

impl ChainError {
    pub fn network(detail: impl Into<String>, broadcast: BroadcastState) -> Self {
        ChainError::Network {
            detail: detail.into(),
            broadcast,
        }
    }

    /// Only failures known to precede broadcast are safe to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChainError::Network {
                broadcast: BroadcastState::NotBroadcast,
                ..
            }
        )
    }

    /// Reclassifies a network failure as pre-broadcast.
    pub fn before_broadcast(self) -> Self {
        match self {
            ChainError::Network { detail, .. } => ChainError::Network {
                detail,
                broadcast: BroadcastState::NotBroadcast,
            },
            other => other,
        }
    }
}

pub type ChainResult<T> = Result<T, ChainError>;

/// The chain accepted the transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: TxHash,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Account whose key signs every transaction.
    fn signer_address(&self) -> Address;

    async fn sign(&self, call: &ContractCall) -> ChainResult<SignedTransaction>;

    async fn submit(&self, tx: &SignedTransaction) -> ChainResult<Receipt>;

    async fn balance_of(&self, owner: &Address) -> ChainResult<u128>;

    async fn allowance(&self, owner: &Address, spender: &Address) -> ChainResult<u128>;
}

/// Transaction parameters the JSON-RPC client needs beyond the call itself.
#[derive(Debug, Clone)]
pub struct JsonRpcOptions {
    pub gas_limit: u64,
    /// Fixed gas price; queried with `eth_gasPrice` when absent
    pub gas_price: Option<u128>,
    /// Fixed chain id; queried with `eth_chainId` when absent
    pub chain_id: Option<u64>,
    pub request_timeout: Duration,
}

/// Ethereum JSON-RPC client for a single token contract.
pub struct JsonRpcChainClient {
    rpc_url: String,
    client: reqwest::Client,
    key: KeyPair,
    contract: Address,
    options: JsonRpcOptions,
    chain_id: OnceCell<u64>,
    /// Next nonce to use; `None` forces a resync from the node
    next_nonce: Mutex<Option<u64>>,
    /// Set when a reserved nonce may not have reached the node
    nonce_stale: AtomicBool,
}

/// Marks the cached nonce stale unless disarmed. Dropping it on an error
/// path or on cancellation makes the next reservation ask the node again.
struct NonceGuard<'a> {
    stale: &'a AtomicBool,
    armed: bool,
}

impl<'a> NonceGuard<'a> {
    fn arm(stale: &'a AtomicBool) -> Self {
        Self { stale, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for NonceGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.stale.store(true, Ordering::SeqCst);
        }
    }
}

impl JsonRpcChainClient {
    pub fn new(rpc_url: String, key: KeyPair, contract: Address, options: JsonRpcOptions) -> ChainResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| ChainError::network(format!("HTTP client build failed: {}", e), BroadcastState::NotBroadcast))?;

        info!("Chain client for contract {} signing as {}", contract, key.address());

        let chain_id = OnceCell::new_with(options.chain_id);

        Ok(Self {
            rpc_url,
            client,
            key,
            contract,
            options,
            chain_id,
            next_nonce: Mutex::new(None),
            nonce_stale: AtomicBool::new(false),
        })
    }

    async fn call(&self, method: &str, params: Value) -> ChainResult<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                // A refused connection never carried the request body
                let broadcast = if e.is_connect() {
                    BroadcastState::NotBroadcast
                } else {
                    BroadcastState::Ambiguous
                };
                ChainError::network(format!("{} request failed: {}", method, e), broadcast)
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::network(
                format!("{} returned HTTP {}", method, status),
                BroadcastState::Ambiguous,
            ));
        }

        let body: Value = response.json().await.map_err(|e| {
            ChainError::network(format!("{} response unreadable: {}", method, e), BroadcastState::Ambiguous)
        })?;

        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(ChainError::Rejected(message));
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| ChainError::InvalidResponse(format!("{} response has no result", method)))
    }

    async fn chain_id(&self) -> ChainResult<u64> {
        self.chain_id
            .get_or_try_init(|| async {
                let result = self.call("eth_chainId", json!([])).await?;
                let id = parse_quantity(&result)?;
                u64::try_from(id).map_err(|_| ChainError::InvalidResponse(format!("chain id {} out of range", id)))
            })
            .await
            .copied()
    }

    async fn gas_price(&self) -> ChainResult<u128> {
        match self.options.gas_price {
            Some(price) => Ok(price),
            None => parse_quantity(&self.call("eth_gasPrice", json!([])).await?),
        }
    }

    async fn reserve_nonce(&self) -> ChainResult<u64> {
        let mut next = self.next_nonce.lock().await;
        if self.nonce_stale.swap(false, Ordering::SeqCst) {
            debug!("Resyncing nonce from node");
            *next = None;
        }
        let nonce = match *next {
            Some(nonce) => nonce,
            None => {
                let result = self
                    .call("eth_getTransactionCount", json!([self.key.address().to_string(), "pending"]))
                    .await?;
                let count = parse_quantity(&result)?;
                u64::try_from(count).map_err(|_| ChainError::InvalidResponse(format!("nonce {} out of range", count)))?
            }
        };
        *next = Some(nonce + 1);
        Ok(nonce)
    }

    async fn eth_call(&self, data: Vec<u8>) -> ChainResult<u128> {
        let result = self
            .call(
                "eth_call",
                json!([{ "to": self.contract.to_string(), "data": format!("0x{}", hex::encode(data)) }, "latest"]),
            )
            .await?;
        let bytes = parse_data(&result)?;
        abi::decode_uint(&bytes).map_err(|e| ChainError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    fn signer_address(&self) -> Address {
        self.key.address()
    }

    async fn sign(&self, call: &ContractCall) -> ChainResult<SignedTransaction> {
        if call.from != self.key.address() {
            return Err(ChainError::Signing(format!(
                "call sender {} is not the signing account {}",
                call.from,
                self.key.address()
            )));
        }

        // Nothing here broadcasts, so every network failure is retryable
        let chain_id = self.chain_id().await.map_err(ChainError::before_broadcast)?;
        let gas_price = self.gas_price().await.map_err(ChainError::before_broadcast)?;
        let nonce = self.reserve_nonce().await.map_err(ChainError::before_broadcast)?;
        let guard = NonceGuard::arm(&self.nonce_stale);

        let tx = LegacyTransaction {
            nonce,
            gas_price,
            gas_limit: self.options.gas_limit,
            to: call.contract,
            value: 0,
            data: call.data.clone(),
            chain_id,
        };

        match tx.sign(&self.key) {
            Ok(signed) => {
                debug!(nonce, tx_hash = %signed.hash, kind = %call.kind, "Signed transaction");
                guard.disarm();
                Ok(signed)
            }
            Err(e) => Err(ChainError::Signing(e.to_string())),
        }
    }

    async fn submit(&self, tx: &SignedTransaction) -> ChainResult<Receipt> {
        // Any failure, ambiguous ones included, resyncs: the node's pending
        // count is the only reliable source once a send went wrong
        let guard = NonceGuard::arm(&self.nonce_stale);
        let value = self.call("eth_sendRawTransaction", json!([tx.raw_hex()])).await?;
        guard.disarm();

        let transaction_hash = match value.as_str().map(str::parse::<TxHash>) {
            Some(Ok(hash)) => {
                if hash != tx.hash {
                    warn!("Node reported hash {} for locally computed {}", hash, tx.hash);
                }
                hash
            }
            _ => tx.hash,
        };

        info!("Transaction sent: {}", transaction_hash);
        Ok(Receipt { transaction_hash })
    }

    async fn balance_of(&self, owner: &Address) -> ChainResult<u128> {
        self.eth_call(abi::encode_call("balanceOf(address)", &[Token::Address(*owner)]))
            .await
    }

    async fn allowance(&self, owner: &Address, spender: &Address) -> ChainResult<u128> {
        self.eth_call(abi::encode_call(
            "allowance(address,address)",
            &[Token::Address(*owner), Token::Address(*spender)],
        ))
        .await
    }
}

/// Parses a hex `QUANTITY` such as `"0x1a"`.
fn parse_quantity(value: &Value) -> ChainResult<u128> {
    let text = value
        .as_str()
        .ok_or_else(|| ChainError::InvalidResponse(format!("expected hex quantity, got {}", value)))?;
    let digits = text.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16).map_err(|e| ChainError::InvalidResponse(format!("bad quantity {}: {}", text, e)))
}

/// Parses hex `DATA` such as `"0x0000..."`.
fn parse_data(value: &Value) -> ChainResult<Vec<u8>> {
    let text = value
        .as_str()
        .ok_or_else(|| ChainError::InvalidResponse(format!("expected hex data, got {}", value)))?;
    hex::decode(text.trim_start_matches("0x")).map_err(|e| ChainError::InvalidResponse(format!("bad data {}: {}", text, e)))
}
