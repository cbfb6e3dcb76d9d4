use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shipyard_core::NetworkEntry;

use crate::credentials::{CredentialResolver, DeploymentSigner};
use crate::error::ConfigError;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// How the creation transaction's fee is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GasPricePolicy {
    /// Use exactly this price in wei; the transport's estimate is never asked.
    Fixed(u128),
    /// Ask the transport for its current gas price.
    NetworkDefault,
}

impl fmt::Display for GasPricePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(wei) => write!(f, "{wei} wei"),
            Self::NetworkDefault => f.write_str("network default"),
        }
    }
}

/// Connection and signing parameters for one deployable network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkProfile {
    pub name: String,
    pub rpc_endpoint: String,
    /// Discovered from the transport at connection time when `None`.
    pub chain_id: Option<u64>,
    /// Name of the secret holding the signing key. Never the key itself.
    pub credential: Option<String>,
    pub gas_price: GasPricePolicy,
    /// Fixed gas budget. Estimated through the transport when `None`.
    pub gas_limit: Option<u64>,
    pub timeout_secs: u64,
}

impl NetworkProfile {
    pub fn new(name: impl Into<String>, rpc_endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rpc_endpoint: rpc_endpoint.into(),
            chain_id: None,
            credential: None,
            gas_price: GasPricePolicy::NetworkDefault,
            gas_limit: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn with_credential(mut self, reference: impl Into<String>) -> Self {
        self.credential = Some(reference.into());
        self
    }

    pub fn with_gas_price(mut self, policy: GasPricePolicy) -> Self {
        self.gas_price = policy;
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl From<&NetworkEntry> for NetworkProfile {
    fn from(entry: &NetworkEntry) -> Self {
        Self {
            name: entry.name.clone(),
            rpc_endpoint: entry.url.clone(),
            chain_id: entry.chain_id,
            credential: entry.credential.clone(),
            gas_price: match entry.gas_price {
                Some(wei) => GasPricePolicy::Fixed(u128::from(wei)),
                None => GasPricePolicy::NetworkDefault,
            },
            gas_limit: entry.gas_limit,
            timeout_secs: entry.timeout_secs,
        }
    }
}

/// A profile together with the signer its credential resolved to.
#[derive(Clone)]
pub struct ResolvedNetwork {
    pub profile: NetworkProfile,
    pub signer: Arc<dyn DeploymentSigner>,
}

impl fmt::Debug for ResolvedNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedNetwork")
            .field("profile", &self.profile)
            .field("signer", &self.signer.address())
            .finish()
    }
}

/// Immutable mapping from network name to [`NetworkProfile`].
///
/// Built once at process start; lookups are exact and case-sensitive.
#[derive(Debug, Clone, Default)]
pub struct NetworkRegistry {
    networks: BTreeMap<String, NetworkProfile>,
}

impl NetworkRegistry {
    /// Build a registry, rejecting duplicate names and malformed endpoints.
    pub fn new(profiles: impl IntoIterator<Item = NetworkProfile>) -> Result<Self, ConfigError> {
        let mut networks = BTreeMap::new();
        for profile in profiles {
            if !validate_url(&profile.rpc_endpoint) {
                return Err(ConfigError::InvalidEndpoint {
                    name: profile.name,
                    url: profile.rpc_endpoint,
                });
            }
            if networks.contains_key(&profile.name) {
                return Err(ConfigError::DuplicateNetwork(profile.name));
            }
            networks.insert(profile.name.clone(), profile);
        }
        Ok(Self { networks })
    }

    /// Build a registry from the `networks` section of the config file.
    pub fn from_entries(entries: &[NetworkEntry]) -> Result<Self, ConfigError> {
        Self::new(entries.iter().map(NetworkProfile::from))
    }

    /// Exact-match lookup without touching the credential.
    pub fn get(&self, name: &str) -> Result<&NetworkProfile, ConfigError> {
        self.networks
            .get(name)
            .ok_or_else(|| ConfigError::UnknownNetwork(name.to_string()))
    }

    /// Look up `name` and resolve its credential to a signer.
    ///
    /// Fails before any network I/O when the network is unknown or its
    /// credential cannot be resolved right now.
    pub fn resolve(
        &self,
        name: &str,
        credentials: &dyn CredentialResolver,
    ) -> Result<ResolvedNetwork, ConfigError> {
        let profile = self.get(name)?;
        let reference =
            profile
                .credential
                .as_deref()
                .ok_or_else(|| ConfigError::MissingCredential {
                    network: profile.name.clone(),
                    reference: "<none configured>".into(),
                })?;
        let signer = credentials.signer(&profile.name, reference)?;
        Ok(ResolvedNetwork {
            profile: profile.clone(),
            signer,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetworkProfile> {
        self.networks.values()
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

/// Validate that a URL is well-formed and uses HTTP or HTTPS.
pub fn validate_url(url: &str) -> bool {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let scheme = parsed.scheme();
            (scheme == "http" || scheme == "https") && parsed.host().is_some()
        }
        Err(_) => false,
    }
}
