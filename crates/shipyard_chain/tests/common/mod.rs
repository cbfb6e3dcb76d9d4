#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use alloy::consensus::TxEnvelope;
use alloy::eips::eip2718::Decodable2718;
use alloy::json_abi::JsonAbi;
use alloy::primitives::{Address, B256, Bytes, U256, keccak256};
use async_trait::async_trait;

use shipyard_chain::{
    Artifact, BackendStatus, ConfigError, ExplorerClient, ExplorerConnector, ExplorerProfile,
    NetworkProfile, SourceMetadata, Submission, TransactionReceipt, Transport, TransportError,
    TransportFactory, VerificationError, VerificationRequest,
};

/// Hardhat's first dev account.
pub const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub const ONE_GWEI: u128 = 1_000_000_000;

pub fn alpine_artifact() -> Artifact {
    Artifact::new(
        "AlpineHealthcare",
        JsonAbi::new(),
        Bytes::from_static(&[0x60, 0x80, 0x60, 0x40, 0x52, 0x34, 0x80, 0x15]),
    )
}

pub fn alpine_source() -> SourceMetadata {
    SourceMetadata {
        contract_name: "contracts/AlpineHealthcare.sol:AlpineHealthcare".into(),
        compiler_version: "v0.8.24+commit.e11b9ed9".into(),
        standard_json_input: serde_json::json!({
            "language": "Solidity",
            "sources": { "contracts/AlpineHealthcare.sol": { "content": "contract AlpineHealthcare {}" } }
        }),
        metadata: None,
    }
}

// ---------------------------------------------------------------------------
// Fake node
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptMode {
    /// Receipt appears after this many empty polls.
    SuccessAfter(u32),
    /// Mined but reverted.
    Reverted,
    /// Never mined.
    Never,
    /// Success without `contractAddress`.
    SuccessWithoutAddress,
}

pub struct MockNode {
    pub endpoint: String,
    pub chain_id: u64,
    pub balance: U256,
    pub nonce: u64,
    pub gas_price: u128,
    pub estimate: Result<u64, TransportError>,
    pub unreachable: bool,
    pub broadcast_error: Option<TransportError>,
    pub receipt_mode: ReceiptMode,
    /// Errors returned by the next receipt polls, before `receipt_mode` applies.
    pub receipt_errors: Mutex<VecDeque<TransportError>>,
    calls: Mutex<Vec<&'static str>>,
    sent: Mutex<Vec<Bytes>>,
    empty_polls: Mutex<u32>,
}

impl MockNode {
    pub fn new(chain_id: u64) -> Self {
        Self {
            endpoint: "http://localhost:8545".into(),
            chain_id,
            balance: U256::from(10_000_000_000_000_000_000u128),
            nonce: 0,
            gas_price: 7 * ONE_GWEI,
            estimate: Ok(1_500_000),
            unreachable: false,
            broadcast_error: None,
            receipt_mode: ReceiptMode::SuccessAfter(2),
            receipt_errors: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            empty_polls: Mutex::new(0),
        }
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn with_receipt(mut self, mode: ReceiptMode) -> Self {
        self.receipt_mode = mode;
        self
    }

    pub fn called(&self, method: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|m| *m == method)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }

    /// Decode the single broadcast transaction.
    pub fn sent_legacy(&self) -> alloy::consensus::TxLegacy {
        let sent = self.sent();
        assert_eq!(sent.len(), 1, "expected exactly one broadcast");
        let envelope = TxEnvelope::decode_2718(&mut sent[0].as_ref()).unwrap();
        envelope.as_legacy().unwrap().tx().clone()
    }

    fn enter(&self, method: &'static str) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(method);
        if self.unreachable {
            return Err(TransportError::Unreachable("connection refused".into()));
        }
        Ok(())
    }

    fn sender(&self) -> Address {
        shipyard_chain::LocalKeySigner::from_hex(TEST_KEY)
            .map(|s| shipyard_chain::DeploymentSigner::address(&s))
            .unwrap()
    }
}

#[async_trait]
impl Transport for MockNode {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn chain_id(&self) -> Result<u64, TransportError> {
        self.enter("chain_id")?;
        Ok(self.chain_id)
    }

    async fn balance(&self, _address: Address) -> Result<U256, TransportError> {
        self.enter("balance")?;
        Ok(self.balance)
    }

    async fn transaction_count(&self, _address: Address) -> Result<u64, TransportError> {
        self.enter("transaction_count")?;
        Ok(self.nonce)
    }

    async fn gas_price(&self) -> Result<u128, TransportError> {
        self.enter("gas_price")?;
        Ok(self.gas_price)
    }

    async fn estimate_gas(&self, _from: Address, _input: &Bytes) -> Result<u64, TransportError> {
        self.enter("estimate_gas")?;
        self.estimate.clone()
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, TransportError> {
        self.enter("send_raw_transaction")?;
        if let Some(err) = &self.broadcast_error {
            return Err(err.clone());
        }
        self.sent.lock().unwrap().push(raw.clone());
        Ok(keccak256(raw))
    }

    async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, TransportError> {
        self.enter("transaction_receipt")?;
        if let Some(err) = self.receipt_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        let mined = |success: bool, contract_address: Option<Address>| TransactionReceipt {
            transaction_hash: hash,
            block_number: Some(42),
            contract_address,
            gas_used: 120_000,
            success,
        };
        let created = self.sender().create(self.nonce);
        Ok(match self.receipt_mode {
            ReceiptMode::Never => None,
            ReceiptMode::Reverted => Some(mined(false, None)),
            ReceiptMode::SuccessWithoutAddress => Some(mined(true, None)),
            ReceiptMode::SuccessAfter(n) => {
                let mut polls = self.empty_polls.lock().unwrap();
                if *polls < n {
                    *polls += 1;
                    None
                } else {
                    Some(mined(true, Some(created)))
                }
            }
        })
    }
}

/// Hands out the same node regardless of profile.
pub struct SingleNode(pub Arc<MockNode>);

impl TransportFactory for SingleNode {
    fn connect(&self, _profile: &NetworkProfile) -> Result<Arc<dyn Transport>, ConfigError> {
        Ok(self.0.clone())
    }
}

// ---------------------------------------------------------------------------
// Fake explorer
// ---------------------------------------------------------------------------

pub struct FakeExplorer {
    submits: Mutex<VecDeque<Result<Submission, VerificationError>>>,
    polls: Mutex<VecDeque<Result<BackendStatus, VerificationError>>>,
    /// Returned once the scripted submissions run out.
    pub default_submit: Result<Submission, VerificationError>,
    calls: Mutex<u32>,
    keys: Mutex<Vec<Option<String>>>,
}

impl FakeExplorer {
    pub fn new(
        submits: Vec<Result<Submission, VerificationError>>,
        polls: Vec<Result<BackendStatus, VerificationError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            submits: Mutex::new(submits.into()),
            polls: Mutex::new(polls.into()),
            default_submit: Err(VerificationError::RateLimited("Max rate limit reached".into())),
            calls: Mutex::new(0),
            keys: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }

    /// API keys the connector was handed, one per connection.
    pub fn keys(&self) -> Vec<Option<String>> {
        self.keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExplorerClient for FakeExplorer {
    async fn submit(&self, _request: &VerificationRequest) -> Result<Submission, VerificationError> {
        *self.calls.lock().unwrap() += 1;
        self.submits
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_submit.clone())
    }

    async fn check_status(&self, _submission_id: &str) -> Result<BackendStatus, VerificationError> {
        *self.calls.lock().unwrap() += 1;
        self.polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(BackendStatus::Pending))
    }
}

pub struct FakeConnector(pub Arc<FakeExplorer>);

impl ExplorerConnector for FakeConnector {
    fn connect(
        &self,
        _explorer: &ExplorerProfile,
        api_key: Option<String>,
    ) -> Result<Arc<dyn ExplorerClient>, ConfigError> {
        self.0.keys.lock().unwrap().push(api_key);
        Ok(self.0.clone())
    }
}
