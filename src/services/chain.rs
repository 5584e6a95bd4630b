//! Chain recorder
//!
//! Submits `recordDayComplete(address,uint256)` to the challenge contract via
//! Ethereum JSON-RPC and waits for the receipt. Signing is left to the RPC
//! endpoint: the node (or a signing proxy in front of it) manages the operator
//! account named in `from`.

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ChainArgs;

/// Transaction hash as returned by the node (`0x`-prefixed hex)
pub type TxHash = String;

/// First four bytes of keccak256("recordDayComplete(address,uint256)")
pub const RECORD_DAY_COMPLETE_SELECTOR: [u8; 4] = [0x4a, 0x63, 0x70, 0xdf];

/// Why a recording did not land
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("chain recording is disabled")]
    Disabled,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: TxHash },

    #[error("transaction {tx_hash} not confirmed in time")]
    Unconfirmed { tx_hash: TxHash },

    #[error("recording timed out")]
    Timeout,
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Records a completed day for a wallet on a challenge
#[async_trait::async_trait]
pub trait ChainRecorder: Send + Sync {
    async fn record_completion(
        &self,
        wallet_address: &str,
        challenge_id: i64,
    ) -> Result<TxHash, ChainError>;
}

/// Parse a `0x`-prefixed 20-byte address
pub fn parse_address(value: &str) -> Result<[u8; 20], ChainError> {
    let hex_part = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| ChainError::InvalidInput(format!("address must start with 0x: {}", value)))?;

    let mut address = [0u8; 20];
    hex::decode_to_slice(hex_part, &mut address)
        .map_err(|e| ChainError::InvalidInput(format!("bad address {}: {}", value, e)))?;
    Ok(address)
}

/// ABI-encode the call data for `recordDayComplete(wallet, challengeId)`
pub fn encode_record_day_complete(wallet_address: &str, challenge_id: i64) -> Result<String, ChainError> {
    let address = parse_address(wallet_address)?;
    let challenge = u64::try_from(challenge_id)
        .map_err(|_| ChainError::InvalidInput(format!("negative challenge id {}", challenge_id)))?;

    let mut data = Vec::with_capacity(4 + 64);
    data.extend_from_slice(&RECORD_DAY_COMPLETE_SELECTOR);

    // Each argument occupies one left-padded 32-byte word
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(&address);
    data.extend_from_slice(&[0u8; 24]);
    data.extend_from_slice(&challenge.to_be_bytes());

    Ok(format!("0x{}", hex::encode(data)))
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

impl RpcResponse {
    fn into_result(self) -> Result<Value, ChainError> {
        match self.error {
            Some(err) => Err(ChainError::Rpc {
                code: err.code,
                message: err.message,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Receipt {
    transaction_hash: String,
    #[serde(default)]
    status: Option<String>,
}

impl Receipt {
    /// Pre-Byzantium receipts carry no status; treat those as success
    fn succeeded(&self) -> bool {
        !matches!(self.status.as_deref(), Some("0x0") | Some("0x00"))
    }
}

/// Recorder that talks to an Ethereum JSON-RPC endpoint
pub struct JsonRpcChainRecorder {
    rpc_url: String,
    contract_address: String,
    from_address: String,
    timeout: Duration,
    poll_interval: Duration,
    max_polls: u32,
    next_id: AtomicU64,
    http_client: reqwest::Client,
}

impl JsonRpcChainRecorder {
    /// Build from config; `None` when the chain section is incomplete
    pub fn from_args(args: &ChainArgs, request_timeout: Duration) -> Option<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("checkin-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Some(Self {
            rpc_url: args.chain_rpc_url.clone()?,
            contract_address: args.chain_contract_address.clone()?,
            from_address: args.chain_from_address.clone()?,
            timeout: Duration::from_millis(args.chain_timeout_ms),
            poll_interval: Duration::from_millis(args.chain_receipt_poll_ms),
            max_polls: args.chain_receipt_max_polls,
            next_id: AtomicU64::new(1),
            http_client,
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self.http_client.post(&self.rpc_url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::Network(format!("{} returned {}", method, status)));
        }

        let parsed: RpcResponse = response
            .json()
            .await
            .map_err(|e| ChainError::Network(format!("malformed {} response: {}", method, e)))?;
        parsed.into_result()
    }

    async fn send_transaction(&self, data: String) -> Result<TxHash, ChainError> {
        let result = self
            .call(
                "eth_sendTransaction",
                json!([{
                    "from": self.from_address,
                    "to": self.contract_address,
                    "data": data,
                }]),
            )
            .await?;

        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ChainError::Network("eth_sendTransaction returned no hash".to_string()))
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<(), ChainError> {
        for attempt in 1..=self.max_polls {
            let result = self
                .call("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;

            if !result.is_null() {
                let receipt: Receipt = serde_json::from_value(result)
                    .map_err(|e| ChainError::Network(format!("malformed receipt: {}", e)))?;
                if !receipt.succeeded() {
                    return Err(ChainError::Reverted {
                        tx_hash: receipt.transaction_hash,
                    });
                }
                debug!(tx_hash = %tx_hash, attempt, "Transaction confirmed");
                return Ok(());
            }

            tokio::time::sleep(self.poll_interval).await;
        }

        Err(ChainError::Unconfirmed {
            tx_hash: tx_hash.to_string(),
        })
    }

    async fn submit(&self, wallet_address: &str, challenge_id: i64) -> Result<TxHash, ChainError> {
        let data = encode_record_day_complete(wallet_address, challenge_id)?;
        let tx_hash = self.send_transaction(data).await?;
        info!(tx_hash = %tx_hash, wallet = %wallet_address, challenge_id, "Submitted day completion");

        self.wait_for_receipt(&tx_hash).await?;
        Ok(tx_hash)
    }
}

#[async_trait::async_trait]
impl ChainRecorder for JsonRpcChainRecorder {
    async fn record_completion(
        &self,
        wallet_address: &str,
        challenge_id: i64,
    ) -> Result<TxHash, ChainError> {
        let result = tokio::time::timeout(self.timeout, self.submit(wallet_address, challenge_id))
            .await
            .unwrap_or(Err(ChainError::Timeout));

        if let Err(e) = &result {
            warn!(wallet = %wallet_address, challenge_id, error = %e, "Day completion not recorded");
        }
        result
    }
}

/// Recorder used when no RPC endpoint is configured
#[derive(Debug, Default)]
pub struct DisabledChainRecorder;

#[async_trait::async_trait]
impl ChainRecorder for DisabledChainRecorder {
    async fn record_completion(
        &self,
        _wallet_address: &str,
        _challenge_id: i64,
    ) -> Result<TxHash, ChainError> {
        Err(ChainError::Disabled)
    }
}
