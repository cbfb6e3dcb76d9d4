//! Deployment orchestrator: one artifact, one network, one broadcast.
//!
//! [`Deployer::submit`] signs and broadcasts the creation transaction and
//! returns as soon as a hash exists. [`Deployer::await_confirmation`] polls
//! for the receipt under a caller deadline. The creation transaction is never
//! resubmitted; ambiguous outcomes are surfaced with the hash so the caller
//! can re-query.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{Address, B256, Bytes, U256, keccak256};
use chrono::{DateTime, Utc};
use serde::Serialize;
use shipyard_core::DeploySection;
use tokio::time::{Instant, sleep_until, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::artifact::Artifact;
use crate::credentials::CreationTransaction;
use crate::error::{ConfigError, DeployError, NetworkError};
use crate::network::{GasPricePolicy, NetworkProfile, ResolvedNetwork};
use crate::transport::{TransactionReceipt, Transport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Confirmed,
    Failed,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        })
    }
}

/// Outcome of one deployment.
///
/// Created `pending` when the creation transaction is broadcast and moved
/// exactly once to `confirmed` or `failed`. Terminal records are immutable.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentRecord {
    /// Fully qualified contract name (`source:Name`, or just `Name`).
    pub contract: String,
    #[serde(skip)]
    pub constructor_args: Vec<DynSolValue>,
    pub constructor_args_encoded: Bytes,
    pub network_name: String,
    pub chain_id: u64,
    pub deployer: Address,
    pub nonce: u64,
    pub transaction_hash: B256,
    pub submitted_at: DateTime<Utc>,
    status: DeploymentStatus,
    deployed_address: Option<Address>,
    block_number: Option<u64>,
    gas_used: Option<u64>,
    failure_reason: Option<String>,
    finalized_at: Option<DateTime<Utc>>,
}

impl DeploymentRecord {
    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    /// Address of the deployed contract. Only set once confirmed.
    pub fn deployed_address(&self) -> Option<Address> {
        self.deployed_address
    }

    pub fn block_number(&self) -> Option<u64> {
        self.block_number
    }

    pub fn gas_used(&self) -> Option<u64> {
        self.gas_used
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn finalized_at(&self) -> Option<DateTime<Utc>> {
        self.finalized_at
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == DeploymentStatus::Confirmed
    }

    #[cfg(test)]
    pub(crate) fn fixture(network: &str, chain_id: u64) -> Self {
        Self {
            contract: "AlpineHealthcare".into(),
            constructor_args: Vec::new(),
            constructor_args_encoded: Bytes::new(),
            network_name: network.into(),
            chain_id,
            deployer: Address::repeat_byte(0x11),
            nonce: 0,
            transaction_hash: B256::repeat_byte(0x22),
            submitted_at: Utc::now(),
            status: DeploymentStatus::Pending,
            deployed_address: None,
            block_number: None,
            gas_used: None,
            failure_reason: None,
            finalized_at: None,
        }
    }

    /// Returns `false` and leaves the record untouched if it is already terminal.
    pub(crate) fn confirm(&mut self, receipt: &TransactionReceipt) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = DeploymentStatus::Confirmed;
        self.deployed_address = Some(
            receipt
                .contract_address
                .unwrap_or_else(|| self.deployer.create(self.nonce)),
        );
        self.block_number = receipt.block_number;
        self.gas_used = Some(receipt.gas_used);
        self.finalized_at = Some(Utc::now());
        true
    }

    /// Returns `false` and leaves the record untouched if it is already terminal.
    pub(crate) fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = DeploymentStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.finalized_at = Some(Utc::now());
        true
    }
}

/// A broadcast creation transaction whose receipt has not been seen yet.
#[derive(Debug, Clone)]
pub struct PendingDeployment {
    record: DeploymentRecord,
    endpoint: String,
}

impl PendingDeployment {
    pub fn record(&self) -> &DeploymentRecord {
        &self.record
    }

    pub fn transaction_hash(&self) -> B256 {
        self.record.transaction_hash
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployOptions {
    /// Upper bound on the receipt wait used by [`Deployer::deploy`].
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self::from(&DeploySection::default())
    }
}

impl From<&DeploySection> for DeployOptions {
    fn from(section: &DeploySection) -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(section.confirmation_timeout_secs),
            poll_interval: Duration::from_millis(section.receipt_poll_interval_ms.max(1)),
        }
    }
}

pub struct Deployer {
    transport: Arc<dyn Transport>,
    options: DeployOptions,
    cancel: CancellationToken,
}

impl Deployer {
    pub fn new(transport: Arc<dyn Transport>, options: DeployOptions) -> Self {
        Self {
            transport,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort before broadcast, or stop waiting for the receipt, when `token`
    /// is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Submit and wait up to the configured confirmation timeout.
    pub async fn deploy(
        &self,
        network: &ResolvedNetwork,
        artifact: &Artifact,
        args: &[DynSolValue],
    ) -> Result<DeploymentRecord, DeployError> {
        let pending = self.submit(network, artifact, args).await?;
        self.await_confirmation(pending, self.options.confirmation_timeout)
            .await
    }

    /// Build, sign and broadcast the creation transaction.
    ///
    /// Everything before the broadcast is side-effect free. A transport
    /// failure during the broadcast itself is reported as
    /// [`NetworkError::SubmissionUnknown`] with the locally computed hash.
    pub async fn submit(
        &self,
        network: &ResolvedNetwork,
        artifact: &Artifact,
        args: &[DynSolValue],
    ) -> Result<PendingDeployment, DeployError> {
        let profile = &network.profile;
        let input = artifact.creation_code(args)?;
        let constructor_args_encoded = artifact.encode_constructor_args(args)?;

        let chain_id = self.chain_id(profile).await?;

        let gas_price = match profile.gas_price {
            GasPricePolicy::Fixed(wei) => wei,
            GasPricePolicy::NetworkDefault => self
                .transport
                .gas_price()
                .await
                .map_err(|e| self.network_error(profile, e))?,
        };

        let from = network.signer.address();
        let nonce = self
            .transport
            .transaction_count(from)
            .await
            .map_err(|e| self.network_error(profile, e))?;

        let gas_limit = match profile.gas_limit {
            Some(limit) => limit,
            None => self.estimate_gas(profile, from, &input).await?,
        };

        self.check_balance(profile, from, gas_limit, gas_price).await?;

        let tx = CreationTransaction {
            chain_id,
            nonce,
            gas_price,
            gas_limit,
            input,
        };
        let raw = network
            .signer
            .sign_creation(&tx)
            .map_err(|reason| DeployError::Signing {
                network: profile.name.clone(),
                reason,
            })?;
        let local_hash = keccak256(&raw);
        if self.cancel.is_cancelled() {
            return Err(DeployError::Cancelled {
                network: profile.name.clone(),
            });
        }

        let mut record = DeploymentRecord {
            contract: artifact.fully_qualified_name(),
            constructor_args: args.to_vec(),
            constructor_args_encoded,
            network_name: profile.name.clone(),
            chain_id,
            deployer: from,
            nonce,
            transaction_hash: local_hash,
            submitted_at: Utc::now(),
            status: DeploymentStatus::Pending,
            deployed_address: None,
            block_number: None,
            gas_used: None,
            failure_reason: None,
            finalized_at: None,
        };

        let tx_hash = match self.transport.send_raw_transaction(&raw).await {
            Ok(hash) => hash,
            Err(TransportError::Rpc { code, message }) => {
                // The node refused the transaction; nothing is in flight.
                return Err(self.rejected(profile, code, message));
            }
            Err(TransportError::Unreachable(reason) | TransportError::Decode(reason)) => {
                record.fail(format!("broadcast outcome unknown: {reason}"));
                warn!(network = %profile.name, tx_hash = %local_hash, %reason, "broadcast failed after signing");
                return Err(DeployError::Network {
                    source: NetworkError::SubmissionUnknown {
                        network: profile.name.clone(),
                        endpoint: self.transport.endpoint().to_string(),
                        tx_hash: local_hash,
                        reason,
                    },
                    record: Some(Box::new(record)),
                });
            }
        };
        if tx_hash != local_hash {
            warn!(network = %profile.name, local = %local_hash, reported = %tx_hash, "node reported a different transaction hash");
        }
        record.transaction_hash = tx_hash;

        info!(
            network = %profile.name,
            chain_id,
            contract = %record.contract,
            deployer = %from,
            nonce,
            gas_price,
            gas_limit,
            tx_hash = %tx_hash,
            "creation transaction broadcast"
        );

        Ok(PendingDeployment {
            record,
            endpoint: self.transport.endpoint().to_string(),
        })
    }

    /// Poll for the receipt until it appears or `deadline` elapses.
    ///
    /// Once the transaction is in flight, transport and JSON-RPC errors while
    /// polling are logged and polling continues. The receipt is checked one
    /// last time at the deadline. Expiry yields
    /// [`NetworkError::ConfirmationTimeout`] and cancellation yields
    /// [`NetworkError::ConfirmationAbandoned`]; either way the transaction may
    /// still land later.
    pub async fn await_confirmation(
        &self,
        pending: PendingDeployment,
        deadline: Duration,
    ) -> Result<DeploymentRecord, DeployError> {
        let PendingDeployment { record, endpoint } = pending;
        let tx_hash = record.transaction_hash;
        let expires = Instant::now() + deadline;

        loop {
            let polled = tokio::select! {
                _ = self.cancel.cancelled() => return Err(abandoned(record, endpoint)),
                polled = timeout_at(expires, self.transport.transaction_receipt(tx_hash)) => polled,
            };
            match polled {
                Ok(Ok(Some(receipt))) => return settle(record, &receipt),
                Ok(Ok(None)) => debug!(tx_hash = %tx_hash, "receipt not available yet"),
                Ok(Err(err)) => {
                    warn!(network = %record.network_name, tx_hash = %tx_hash, error = %err, "receipt poll failed, retrying");
                }
                Err(_elapsed) => break,
            }

            let wake = (Instant::now() + self.options.poll_interval).min(expires);
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(abandoned(record, endpoint)),
                _ = sleep_until(wake) => {}
            }
            if wake >= expires {
                if let Ok(Some(receipt)) = self.transport.transaction_receipt(tx_hash).await {
                    return settle(record, &receipt);
                }
                break;
            }
        }

        let mut record = record;
        record.fail(format!("not confirmed within {deadline:?}"));
        warn!(network = %record.network_name, tx_hash = %tx_hash, waited = ?deadline, "confirmation timed out");
        Err(DeployError::Network {
            source: NetworkError::ConfirmationTimeout {
                network: record.network_name.clone(),
                endpoint,
                tx_hash,
                waited: deadline,
            },
            record: Some(Box::new(record)),
        })
    }

    async fn chain_id(&self, profile: &NetworkProfile) -> Result<u64, DeployError> {
        let reported = self
            .transport
            .chain_id()
            .await
            .map_err(|e| self.network_error(profile, e))?;
        match profile.chain_id {
            Some(configured) if configured != reported => Err(ConfigError::ChainIdMismatch {
                network: profile.name.clone(),
                configured,
                reported,
            }
            .into()),
            _ => Ok(reported),
        }
    }

    async fn estimate_gas(
        &self,
        profile: &NetworkProfile,
        from: Address,
        input: &Bytes,
    ) -> Result<u64, DeployError> {
        match self.transport.estimate_gas(from, input).await {
            Ok(gas) => Ok(gas),
            Err(TransportError::Rpc { code, message }) => Err(self.rejected(profile, code, message)),
            Err(err) => Err(self.network_error(profile, err).into()),
        }
    }

    async fn check_balance(
        &self,
        profile: &NetworkProfile,
        address: Address,
        gas_limit: u64,
        gas_price: u128,
    ) -> Result<(), DeployError> {
        let required = U256::from(gas_limit) * U256::from(gas_price);
        match self.transport.balance(address).await {
            Ok(balance) if balance < required => Err(DeployError::InsufficientFunds {
                network: profile.name.clone(),
                address,
                balance,
                required,
            }),
            Ok(_) => Ok(()),
            Err(TransportError::Rpc { code, message }) => {
                warn!(network = %profile.name, code, %message, "balance query failed, skipping funds check");
                Ok(())
            }
            Err(err) => Err(self.network_error(profile, err).into()),
        }
    }

    /// A JSON-RPC rejection before anything is in flight. Reverts keep the
    /// node's message verbatim.
    fn rejected(&self, profile: &NetworkProfile, code: i64, message: String) -> DeployError {
        if is_revert(code, &message) {
            warn!(network = %profile.name, %message, "constructor reverts");
            DeployError::TransactionReverted {
                network: profile.name.clone(),
                tx_hash: None,
                reason: message,
                record: None,
            }
        } else {
            NetworkError::Rpc {
                network: profile.name.clone(),
                endpoint: self.transport.endpoint().to_string(),
                code,
                message,
            }
            .into()
        }
    }

    fn network_error(&self, profile: &NetworkProfile, err: TransportError) -> NetworkError {
        let endpoint = self.transport.endpoint().to_string();
        match err {
            TransportError::Unreachable(reason) => NetworkError::Unreachable {
                network: profile.name.clone(),
                endpoint,
                reason,
            },
            TransportError::Decode(reason) => NetworkError::Unreachable {
                network: profile.name.clone(),
                endpoint,
                reason: format!("malformed response: {reason}"),
            },
            TransportError::Rpc { code, message } => NetworkError::Rpc {
                network: profile.name.clone(),
                endpoint,
                code,
                message,
            },
        }
    }
}

/// Finish the record from a mined receipt.
fn settle(
    mut record: DeploymentRecord,
    receipt: &TransactionReceipt,
) -> Result<DeploymentRecord, DeployError> {
    let tx_hash = record.transaction_hash;
    if receipt.success {
        record.confirm(receipt);
        info!(
            network = %record.network_name,
            tx_hash = %tx_hash,
            address = ?record.deployed_address,
            block = ?record.block_number,
            gas_used = receipt.gas_used,
            "deployment confirmed"
        );
        return Ok(record);
    }
    let reason = format!(
        "execution reverted (status 0, gas used {})",
        receipt.gas_used
    );
    record.fail(reason.clone());
    warn!(network = %record.network_name, tx_hash = %tx_hash, "deployment reverted");
    Err(DeployError::TransactionReverted {
        network: record.network_name.clone(),
        tx_hash: Some(tx_hash),
        reason,
        record: Some(Box::new(record)),
    })
}

/// The record stays pending: nobody knows yet whether it will confirm.
fn abandoned(record: DeploymentRecord, endpoint: String) -> DeployError {
    warn!(network = %record.network_name, tx_hash = %record.transaction_hash, "stopped waiting for confirmation");
    DeployError::Network {
        source: NetworkError::ConfirmationAbandoned {
            network: record.network_name.clone(),
            endpoint,
            tx_hash: record.transaction_hash,
        },
        record: Some(Box::new(record)),
    }
}

/// Code 3 is the standard "execution reverted" error.
fn is_revert(code: i64, message: &str) -> bool {
    code == 3 || message.to_ascii_lowercase().contains("revert")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> DeploymentRecord {
        DeploymentRecord::fixture("base-local", 31337)
    }

    fn receipt(contract_address: Option<Address>) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: B256::repeat_byte(0x22),
            block_number: Some(5),
            contract_address,
            gas_used: 21_000,
            success: true,
        }
    }

    #[test]
    fn confirm_sets_address_and_block() {
        let mut record = record();
        let address = Address::repeat_byte(0x33);
        assert!(record.confirm(&receipt(Some(address))));
        assert_eq!(record.status(), DeploymentStatus::Confirmed);
        assert_eq!(record.deployed_address(), Some(address));
        assert_eq!(record.block_number(), Some(5));
        assert!(record.finalized_at().is_some());
    }

    #[test]
    fn confirm_derives_create_address_when_receipt_has_none() {
        let mut record = record();
        record.nonce = 3;
        record.confirm(&receipt(None));
        assert_eq!(record.deployed_address(), Some(record.deployer.create(3)));
    }

    #[test]
    fn terminal_records_reject_transitions() {
        let mut record = record();
        assert!(record.fail("reverted"));
        assert!(!record.confirm(&receipt(Some(Address::repeat_byte(0x33)))));
        assert!(!record.fail("again"));
        assert_eq!(record.status(), DeploymentStatus::Failed);
        assert_eq!(record.failure_reason(), Some("reverted"));
        assert!(record.deployed_address().is_none());
    }

    #[test]
    fn options_follow_config_section() {
        let options = DeployOptions::from(&DeploySection {
            confirmation_timeout_secs: 60,
            receipt_poll_interval_ms: 500,
        });
        assert_eq!(options.confirmation_timeout, Duration::from_secs(60));
        assert_eq!(options.poll_interval, Duration::from_millis(500));
        assert_eq!(DeployOptions::default().confirmation_timeout, Duration::from_secs(300));
    }

    #[test]
    fn revert_detection() {
        assert!(is_revert(3, "execution reverted: Ownable: caller is not the owner"));
        assert!(is_revert(-32000, "VM Exception while processing transaction: revert"));
        assert!(!is_revert(-32000, "nonce too low"));
    }

    #[test]
    fn record_serializes_status_lowercase() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["network_name"], "base-local");
        assert!(json.get("constructor_args").is_none());
    }
}
