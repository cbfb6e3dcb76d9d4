//! JSON-RPC transport used by the deployment orchestrator.
//!
//! The orchestrator only needs a handful of calls, so this is deliberately
//! not a general client: [`Transport`] names exactly those calls and
//! [`HttpTransport`] speaks them over JSON-RPC 2.0.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use alloy::primitives::{Address, B256, Bytes, U64, U128, U256};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::ConfigError;
use crate::network::NetworkProfile;

/// Low-level transport failure, before network context is attached.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection refused, DNS failure, timeout, or non-2xx HTTP status.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The node answered with a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The node answered with something we could not decode.
    #[error("malformed response: {0}")]
    Decode(String),
}

/// The subset of a transaction receipt the orchestrator looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    pub block_number: Option<u64>,
    pub contract_address: Option<Address>,
    pub gas_used: u64,
    /// `false` when the constructor reverted.
    pub success: bool,
}

/// Calls the orchestrator makes against a node.
///
/// `chain_id`, `balance`, `send_raw_transaction` and `transaction_receipt`
/// are the core operations. `transaction_count`, `gas_price` and
/// `estimate_gas` exist to build a signable transaction; `gas_price` is only
/// consulted under [`GasPricePolicy::NetworkDefault`](crate::GasPricePolicy)
/// and `estimate_gas` only when no gas limit is configured.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Endpoint for error context.
    fn endpoint(&self) -> &str;

    async fn chain_id(&self) -> Result<u64, TransportError>;

    async fn balance(&self, address: Address) -> Result<U256, TransportError>;

    async fn transaction_count(&self, address: Address) -> Result<u64, TransportError>;

    async fn gas_price(&self) -> Result<u128, TransportError>;

    async fn estimate_gas(&self, from: Address, input: &Bytes) -> Result<u64, TransportError>;

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, TransportError>;

    async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, TransportError>;
}

/// Opens a [`Transport`] for a network profile.
pub trait TransportFactory: Send + Sync {
    fn connect(&self, profile: &NetworkProfile) -> Result<Arc<dyn Transport>, ConfigError>;
}

/// Factory producing [`HttpTransport`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpTransportFactory;

impl TransportFactory for HttpTransportFactory {
    fn connect(&self, profile: &NetworkProfile) -> Result<Arc<dyn Transport>, ConfigError> {
        Ok(Arc::new(HttpTransport::new(profile)?))
    }
}

// ---------------------------------------------------------------------------
// HTTP JSON-RPC
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: B256,
    #[serde(default)]
    block_number: Option<U64>,
    #[serde(default)]
    contract_address: Option<Address>,
    gas_used: U64,
    /// Pre-Byzantium receipts have no status; treat those as success.
    #[serde(default)]
    status: Option<U64>,
}

impl From<RawReceipt> for TransactionReceipt {
    fn from(raw: RawReceipt) -> Self {
        Self {
            transaction_hash: raw.transaction_hash,
            block_number: raw.block_number.map(|n| n.to::<u64>()),
            contract_address: raw.contract_address,
            gas_used: raw.gas_used.to::<u64>(),
            success: raw.status.is_none_or(|s| !s.is_zero()),
        }
    }
}

/// JSON-RPC 2.0 over HTTP(S).
pub struct HttpTransport {
    endpoint: String,
    client: Client,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(profile: &NetworkProfile) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(profile.request_timeout())
            .build()
            .map_err(|e| ConfigError::InvalidEndpoint {
                name: profile.name.clone(),
                url: format!("{} ({e})", profile.rpc_endpoint),
            })?;
        Ok(Self {
            endpoint: profile.rpc_endpoint.clone(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        debug!(endpoint = %self.endpoint, method, id, "rpc call");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Unreachable(format!("HTTP {status}")));
        }

        let envelope: RpcEnvelope = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        if let Some(err) = envelope.error {
            return Err(TransportError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        serde_json::from_value(envelope.result.unwrap_or(Value::Null))
            .map_err(|e| TransportError::Decode(format!("{method}: {e}")))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn chain_id(&self) -> Result<u64, TransportError> {
        let id: U64 = self.call("eth_chainId", json!([])).await?;
        Ok(id.to())
    }

    async fn balance(&self, address: Address) -> Result<U256, TransportError> {
        self.call("eth_getBalance", json!([address, "latest"])).await
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, TransportError> {
        let count: U64 = self
            .call("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        Ok(count.to())
    }

    async fn gas_price(&self) -> Result<u128, TransportError> {
        let price: U128 = self.call("eth_gasPrice", json!([])).await?;
        Ok(price.to())
    }

    async fn estimate_gas(&self, from: Address, input: &Bytes) -> Result<u64, TransportError> {
        let gas: U64 = self
            .call("eth_estimateGas", json!([{ "from": from, "data": input }]))
            .await?;
        Ok(gas.to())
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, TransportError> {
        self.call("eth_sendRawTransaction", json!([raw])).await
    }

    async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, TransportError> {
        let receipt: Option<RawReceipt> = self
            .call("eth_getTransactionReceipt", json!([hash]))
            .await?;
        Ok(receipt.map(TransactionReceipt::from))
    }
}
