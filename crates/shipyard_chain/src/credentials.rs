//! Credential and secret resolution.
//!
//! Registries only store secret *names*. The lookup happens at call time
//! through a [`SecretStore`], so nothing secret lives in configuration and
//! tests can inject fake keys.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Address, Bytes, TxKind, U256};
use alloy::signers::SignerSync;
use alloy::signers::local::PrivateKeySigner;
use tracing::debug;

use crate::error::ConfigError;

/// Source of named secrets (private keys, API keys).
pub trait SecretStore: Send + Sync {
    /// Returns the secret for `reference`, or `None` when it is unset or empty.
    fn secret(&self, reference: &str) -> Option<String>;
}

/// Reads secrets from process environment variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecrets;

impl SecretStore for EnvSecrets {
    fn secret(&self, reference: &str) -> Option<String> {
        std::env::var(reference)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }
}

/// In-memory secrets, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reference: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(reference.into(), value.into());
        self
    }
}

impl SecretStore for StaticSecrets {
    fn secret(&self, reference: &str) -> Option<String> {
        self.values
            .get(reference)
            .filter(|value| !value.trim().is_empty())
            .cloned()
    }
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

/// Unsigned contract-creation transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationTransaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    /// Bytecode followed by the ABI-encoded constructor arguments.
    pub input: Bytes,
}

/// Signs creation transactions for one account.
pub trait DeploymentSigner: Send + Sync {
    fn address(&self) -> Address;

    /// Returns the EIP-2718 encoded signed transaction, ready to broadcast.
    fn sign_creation(&self, tx: &CreationTransaction) -> Result<Bytes, String>;
}

/// A signer backed by a raw secp256k1 private key.
#[derive(Debug, Clone)]
pub struct LocalKeySigner {
    inner: PrivateKeySigner,
}

impl LocalKeySigner {
    pub fn from_hex(key: &str) -> Result<Self, String> {
        let key = key.trim();
        let inner = key
            .strip_prefix("0x")
            .unwrap_or(key)
            .parse::<PrivateKeySigner>()
            .map_err(|e| e.to_string())?;
        Ok(Self { inner })
    }
}

impl DeploymentSigner for LocalKeySigner {
    fn address(&self) -> Address {
        self.inner.address()
    }

    fn sign_creation(&self, tx: &CreationTransaction) -> Result<Bytes, String> {
        // Legacy transactions carry a single gas price field, so a fixed
        // price is exactly what ends up on chain.
        let unsigned = TxLegacy {
            chain_id: Some(tx.chain_id),
            nonce: tx.nonce,
            gas_price: tx.gas_price,
            gas_limit: tx.gas_limit,
            to: TxKind::Create,
            value: U256::ZERO,
            input: tx.input.clone(),
        };
        let signature = self
            .inner
            .sign_hash_sync(&unsigned.signature_hash())
            .map_err(|e| e.to_string())?;
        let envelope = TxEnvelope::from(unsigned.into_signed(signature));
        debug!(nonce = tx.nonce, chain_id = tx.chain_id, "signed creation transaction");
        Ok(Bytes::from(envelope.encoded_2718()))
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Turns a network's credential reference into a signer.
pub trait CredentialResolver: Send + Sync {
    fn signer(
        &self,
        network: &str,
        reference: &str,
    ) -> Result<Arc<dyn DeploymentSigner>, ConfigError>;
}

impl<S: SecretStore + ?Sized> CredentialResolver for S {
    fn signer(
        &self,
        network: &str,
        reference: &str,
    ) -> Result<Arc<dyn DeploymentSigner>, ConfigError> {
        let key = self
            .secret(reference)
            .ok_or_else(|| ConfigError::MissingCredential {
                network: network.to_string(),
                reference: reference.to_string(),
            })?;
        let signer = LocalKeySigner::from_hex(&key).map_err(|reason| {
            ConfigError::InvalidCredential {
                network: network.to_string(),
                reference: reference.to_string(),
                reason,
            }
        })?;
        Ok(Arc::new(signer))
    }
}
