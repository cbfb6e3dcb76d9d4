use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use shipyard_core::{CustomChainEntry, EtherscanSection, SourcifySection};

use crate::error::ConfigError;

/// Chain ids of local development nodes (Hardhat/Anvil and geth `--dev`).
/// No public explorer indexes them.
pub const LOCAL_CHAIN_IDS: [u64; 2] = [31337, 1337];

/// Wire protocol spoken by a verification backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplorerKind {
    /// Etherscan and its family (Basescan, Arbiscan, ...). Requires an API key.
    Etherscan,
    /// Etherscan-compatible API served by Blockscout. Key optional.
    Blockscout,
    /// Sourcify server. Keyless.
    Sourcify,
}

impl ExplorerKind {
    pub fn requires_api_key(&self) -> bool {
        matches!(self, Self::Etherscan)
    }
}

impl fmt::Display for ExplorerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Etherscan => "etherscan",
            Self::Blockscout => "blockscout",
            Self::Sourcify => "sourcify",
        })
    }
}

impl FromStr for ExplorerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "etherscan" => Ok(Self::Etherscan),
            "blockscout" => Ok(Self::Blockscout),
            "sourcify" => Ok(Self::Sourcify),
            _ => Err(ConfigError::UnknownExplorerKind(s.to_string())),
        }
    }
}

/// One verification backend for one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorerProfile {
    pub network_name: String,
    pub chain_id: Option<u64>,
    pub kind: ExplorerKind,
    pub api_endpoint: String,
    pub browser_endpoint: String,
    /// Name of the secret holding the API key.
    pub api_key: Option<String>,
    /// Declared by the user rather than shipped with the toolkit.
    pub is_custom: bool,
}

impl ExplorerProfile {
    /// Link to the contract page on the explorer's web UI.
    pub fn address_url(&self, address: &str) -> String {
        match self.kind {
            ExplorerKind::Sourcify => format!(
                "{}/contracts/full_match/{}/{address}/",
                self.browser_endpoint.trim_end_matches('/'),
                self.chain_id.unwrap_or_default()
            ),
            _ => format!(
                "{}/address/{address}#code",
                self.browser_endpoint.trim_end_matches('/')
            ),
        }
    }

    fn try_from_custom(entry: &CustomChainEntry, default_key: Option<&str>) -> Result<Self, ConfigError> {
        let kind = match entry.kind.as_deref() {
            Some(kind) => kind.parse()?,
            None => ExplorerKind::Etherscan,
        };
        if !crate::network::validate_url(&entry.api_url) {
            return Err(ConfigError::InvalidEndpoint {
                name: entry.network.clone(),
                url: entry.api_url.clone(),
            });
        }
        Ok(Self {
            network_name: entry.network.clone(),
            chain_id: entry.chain_id,
            kind,
            api_endpoint: entry.api_url.clone(),
            browser_endpoint: entry.browser_url.clone(),
            api_key: entry
                .api_key
                .clone()
                .or_else(|| default_key.map(str::to_string)),
            is_custom: true,
        })
    }
}

/// Explorers the toolkit knows without configuration.
///
/// Etherscan-family chains share the unified multichain endpoint; the chain
/// is selected with the `chainid` query parameter.
pub fn builtin_explorers(api_key: Option<&str>) -> Vec<ExplorerProfile> {
    const ETHERSCAN_V2: &str = "https://api.etherscan.io/v2/api";
    let entry = |network: &str, chain_id: u64, browser: &str| ExplorerProfile {
        network_name: network.into(),
        chain_id: Some(chain_id),
        kind: ExplorerKind::Etherscan,
        api_endpoint: ETHERSCAN_V2.into(),
        browser_endpoint: browser.into(),
        api_key: api_key.map(str::to_string),
        is_custom: false,
    };

    vec![
        entry("mainnet", 1, "https://etherscan.io"),
        entry("sepolia", 11155111, "https://sepolia.etherscan.io"),
        entry("optimism", 10, "https://optimistic.etherscan.io"),
        entry("polygon", 137, "https://polygonscan.com"),
        entry("base", 8453, "https://basescan.org"),
        entry("base-sepolia", 84532, "https://sepolia.basescan.org"),
        entry("arbitrum", 42161, "https://arbiscan.io"),
    ]
}

/// Immutable lookup from chain id / network name to an [`ExplorerProfile`].
#[derive(Debug, Clone, Default)]
pub struct VerificationRegistry {
    custom_by_chain: HashMap<u64, ExplorerProfile>,
    custom_by_name: HashMap<String, ExplorerProfile>,
    builtin_by_chain: HashMap<u64, ExplorerProfile>,
    sourcify: Option<SourcifySection>,
}

impl VerificationRegistry {
    /// Build from built-in entries plus user-declared custom chains.
    ///
    /// Two custom chains claiming the same chain id (or, for entries without
    /// an id, the same network name) are rejected.
    pub fn new(
        builtins: impl IntoIterator<Item = ExplorerProfile>,
        custom: impl IntoIterator<Item = ExplorerProfile>,
    ) -> Result<Self, ConfigError> {
        let builtin_by_chain = builtins
            .into_iter()
            .filter_map(|p| p.chain_id.map(|id| (id, p)))
            .collect();

        let mut custom_by_chain: HashMap<u64, ExplorerProfile> = HashMap::new();
        let mut custom_by_name: HashMap<String, ExplorerProfile> = HashMap::new();
        for profile in custom {
            match profile.chain_id {
                Some(id) => {
                    if let Some(existing) = custom_by_chain.get(&id) {
                        return Err(ConfigError::AmbiguousChainRegistration {
                            key: format!("chain {id}"),
                            networks: vec![existing.network_name.clone(), profile.network_name],
                        });
                    }
                    custom_by_chain.insert(id, profile);
                }
                None => {
                    if custom_by_name.contains_key(&profile.network_name) {
                        return Err(ConfigError::AmbiguousChainRegistration {
                            key: format!("network {}", profile.network_name),
                            networks: vec![profile.network_name.clone(), profile.network_name],
                        });
                    }
                    custom_by_name.insert(profile.network_name.clone(), profile);
                }
            }
        }

        Ok(Self {
            custom_by_chain,
            custom_by_name,
            builtin_by_chain,
            sourcify: None,
        })
    }

    /// Registry with only the built-in table.
    pub fn with_builtins(api_key: Option<&str>) -> Self {
        Self {
            builtin_by_chain: builtin_explorers(api_key)
                .into_iter()
                .filter_map(|p| p.chain_id.map(|id| (id, p)))
                .collect(),
            ..Self::default()
        }
    }

    /// Build from the `etherscan` and `sourcify` sections of the config file.
    pub fn from_config(
        etherscan: &EtherscanSection,
        sourcify: &SourcifySection,
    ) -> Result<Self, ConfigError> {
        let default_key = etherscan.api_key.as_deref();
        let custom = etherscan
            .custom_chains
            .iter()
            .map(|entry| ExplorerProfile::try_from_custom(entry, default_key))
            .collect::<Result<Vec<_>, _>>()?;
        let registry = Self::new(builtin_explorers(default_key), custom)?;
        Ok(if sourcify.enabled {
            registry.with_sourcify(sourcify.clone())
        } else {
            registry
        })
    }

    /// Fall back to Sourcify for chains no other explorer covers.
    pub fn with_sourcify(mut self, settings: SourcifySection) -> Self {
        self.sourcify = Some(settings);
        self
    }

    /// Find the explorer for a deployment.
    ///
    /// Order: custom chain by id, built-in by id, then by network name as a
    /// last resort. Name matching only considers entries registered without
    /// a chain id, unless the caller has no chain id either. Returns `None`
    /// when nothing integrates with the chain; verification is then skipped.
    pub fn resolve_explorer(
        &self,
        chain_id: Option<u64>,
        network_name: &str,
    ) -> Option<ExplorerProfile> {
        if let Some(id) = chain_id {
            if let Some(profile) = self.custom_by_chain.get(&id) {
                return Some(profile.clone());
            }
            if let Some(profile) = self.builtin_by_chain.get(&id) {
                return Some(profile.clone());
            }
        }

        if let Some(profile) = self.custom_by_name.get(network_name) {
            return Some(profile.clone());
        }
        if chain_id.is_none() {
            let by_name = self
                .custom_by_chain
                .values()
                .chain(self.builtin_by_chain.values())
                .find(|p| p.network_name == network_name);
            if let Some(profile) = by_name {
                return Some(profile.clone());
            }
        }

        match (chain_id, &self.sourcify) {
            (Some(id), Some(settings)) if !LOCAL_CHAIN_IDS.contains(&id) => Some(ExplorerProfile {
                network_name: network_name.to_string(),
                chain_id: Some(id),
                kind: ExplorerKind::Sourcify,
                api_endpoint: settings.api_url.clone(),
                browser_endpoint: settings.browser_url.clone(),
                api_key: None,
                is_custom: false,
            }),
            _ => None,
        }
    }

    pub fn custom_chains(&self) -> impl Iterator<Item = &ExplorerProfile> {
        self.custom_by_chain.values().chain(self.custom_by_name.values())
    }

    pub fn builtins(&self) -> impl Iterator<Item = &ExplorerProfile> {
        self.builtin_by_chain.values()
    }
}
