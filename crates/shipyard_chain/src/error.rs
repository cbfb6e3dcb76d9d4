//! Error taxonomy for deployment and verification.
//!
//! Every variant carries the network name (and where relevant the chain id,
//! address, transaction hash or endpoint) so a failure is actionable from the
//! message alone.

use std::time::Duration;

use alloy::primitives::{Address, B256, U256};

use crate::deployer::DeploymentRecord;

/// Configuration problems. Always fatal for the operation, never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown network: {0}")]
    UnknownNetwork(String),

    #[error("network {network}: credential {reference} is not set")]
    MissingCredential { network: String, reference: String },

    #[error("network {network}: credential {reference} is not a usable private key: {reason}")]
    InvalidCredential {
        network: String,
        reference: String,
        reason: String,
    },

    #[error("explorer {api_endpoint} for {network} requires an API key, but {} is not set", .reference.as_deref().unwrap_or("no key reference"))]
    MissingApiKey {
        network: String,
        api_endpoint: String,
        reference: Option<String>,
    },

    #[error("{key} is registered by more than one custom chain: {}", .networks.join(", "))]
    AmbiguousChainRegistration { key: String, networks: Vec<String> },

    #[error("network {0} is registered more than once")]
    DuplicateNetwork(String),

    #[error("{name}: invalid endpoint {url}")]
    InvalidEndpoint { name: String, url: String },

    #[error("network {network}: configured chain id {configured} but the endpoint reports {reported}")]
    ChainIdMismatch {
        network: String,
        configured: u64,
        reported: u64,
    },

    #[error("unknown explorer kind {0} (expected etherscan, blockscout or sourcify)")]
    UnknownExplorerKind(String),

    #[error("artifact {contract}: {reason}")]
    Artifact { contract: String, reason: String },
}

/// Transport failures, tagged with the network and endpoint involved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error("network {network}: {endpoint} is unreachable: {reason}")]
    Unreachable {
        network: String,
        endpoint: String,
        reason: String,
    },

    /// Broadcast failed at the transport level after signing. The transaction
    /// may or may not have reached the mempool; query `tx_hash` before doing
    /// anything else.
    #[error("network {network}: broadcasting {tx_hash} to {endpoint} failed ({reason}); its fate is unknown")]
    SubmissionUnknown {
        network: String,
        endpoint: String,
        tx_hash: B256,
        reason: String,
    },

    #[error("network {network}: transaction {tx_hash} not confirmed within {waited:?}")]
    ConfirmationTimeout {
        network: String,
        endpoint: String,
        tx_hash: B256,
        waited: Duration,
    },

    /// The caller stopped the receipt wait. The transaction is still in flight.
    #[error("network {network}: stopped waiting for {tx_hash} on {endpoint}; it may still confirm")]
    ConfirmationAbandoned {
        network: String,
        endpoint: String,
        tx_hash: B256,
    },

    #[error("network {network}: {endpoint} returned rpc error {code}: {message}")]
    Rpc {
        network: String,
        endpoint: String,
        code: i64,
        message: String,
    },
}

impl NetworkError {
    /// Hash of a transaction that was (possibly) broadcast, if any.
    pub fn transaction_hash(&self) -> Option<B256> {
        match self {
            Self::SubmissionUnknown { tx_hash, .. }
            | Self::ConfirmationTimeout { tx_hash, .. }
            | Self::ConfirmationAbandoned { tx_hash, .. } => Some(*tx_hash),
            Self::Unreachable { .. } | Self::Rpc { .. } => None,
        }
    }
}

/// Errors produced by the deployment orchestrator.
///
/// Failures that happen after a transaction hash exists carry the
/// [`DeploymentRecord`]: failed, or still pending when the wait was abandoned.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{source}")]
    Network {
        #[source]
        source: NetworkError,
        record: Option<Box<DeploymentRecord>>,
    },

    #[error("network {network}: deployment reverted: {reason}")]
    TransactionReverted {
        network: String,
        tx_hash: Option<B256>,
        reason: String,
        record: Option<Box<DeploymentRecord>>,
    },

    #[error("network {network}: {address} holds {balance} wei but the deployment needs {required} wei")]
    InsufficientFunds {
        network: String,
        address: Address,
        balance: U256,
        required: U256,
    },

    #[error("network {network}: signing the creation transaction failed: {reason}")]
    Signing { network: String, reason: String },

    #[error("network {network}: cancelled before broadcast, nothing was sent")]
    Cancelled { network: String },
}

impl From<NetworkError> for DeployError {
    fn from(source: NetworkError) -> Self {
        Self::Network {
            source,
            record: None,
        }
    }
}

impl DeployError {
    /// The record, when the failure happened after broadcast.
    pub fn record(&self) -> Option<&DeploymentRecord> {
        match self {
            Self::Network { record, .. } | Self::TransactionReverted { record, .. } => {
                record.as_deref()
            }
            _ => None,
        }
    }

    /// Hash of the creation transaction, when one was produced.
    pub fn transaction_hash(&self) -> Option<B256> {
        match self {
            Self::Network { source, record } => source
                .transaction_hash()
                .or_else(|| record.as_ref().map(|r| r.transaction_hash)),
            Self::TransactionReverted { tx_hash, .. } => *tx_hash,
            _ => None,
        }
    }
}

/// Failures reported by a verification backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("rejected by backend: {0}")]
    BackendRejected(String),

    #[error("backend unreachable: {0}")]
    Transport(String),
}

/// Errors that stop a verification attempt from being created at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("network {network}: deployment is {status}, only confirmed deployments can be verified")]
    NotConfirmed { network: String, status: String },
}
