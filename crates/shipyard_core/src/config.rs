use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable holding the deployer's private key in the stock config.
pub const DEFAULT_WALLET_KEY_REF: &str = "WALLET_KEY";

/// Environment variable holding the Etherscan-family API key in the stock config.
pub const DEFAULT_ETHERSCAN_KEY_REF: &str = "ETHERSCAN_API_KEY";

const ONE_GWEI: u64 = 1_000_000_000;

// ---------------------------------------------------------------------------
// Declarative registry entries
// ---------------------------------------------------------------------------

/// One deployable network as written in `config.json`.
///
/// `credential` and every other secret field hold the *name* of a secret
/// (an environment variable), never the secret itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEntry {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    /// Fixed gas price in wei. `None` defers to the network's own estimate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

/// An explorer for a chain the toolkit does not know by default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomChainEntry {
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    pub api_url: String,
    pub browser_url: String,
    /// Wire protocol of the explorer: `etherscan`, `blockscout` or `sourcify`.
    /// Defaults to `etherscan`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Secret name of a chain-specific API key. Falls back to
    /// [`EtherscanSection::api_key`] when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtherscanSection {
    pub api_key: Option<String>,
    pub custom_chains: Vec<CustomChainEntry>,
}

impl Default for EtherscanSection {
    fn default() -> Self {
        Self {
            api_key: Some(DEFAULT_ETHERSCAN_KEY_REF.into()),
            custom_chains: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcifySection {
    pub enabled: bool,
    pub api_url: String,
    pub browser_url: String,
}

impl Default for SourcifySection {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: "https://sourcify.dev/server".into(),
            browser_url: "https://repo.sourcify.dev".into(),
        }
    }
}

/// Tunables for the confirmation wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySection {
    pub confirmation_timeout_secs: u64,
    pub receipt_poll_interval_ms: u64,
}

impl Default for DeploySection {
    fn default() -> Self {
        Self {
            confirmation_timeout_secs: 300,
            receipt_poll_interval_ms: 2_000,
        }
    }
}

/// Tunables for verification polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifySection {
    pub max_retries: u32,
    /// `fixed` or `exponential`.
    pub backoff: String,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Per-request timeout for explorer API calls.
    pub request_timeout_secs: u64,
}

impl Default for VerifySection {
    fn default() -> Self {
        Self {
            max_retries: 10,
            backoff: "exponential".into(),
            initial_delay_ms: 3_000,
            max_delay_ms: 30_000,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// ShipyardConfig
// ---------------------------------------------------------------------------

/// Application configuration stored at `~/.shipyard/config.json`.
///
/// Loaded once at process start. It is plain declarative data; the registries
/// in `shipyard_chain` are built from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShipyardConfig {
    pub networks: Vec<NetworkEntry>,
    pub etherscan: EtherscanSection,
    pub sourcify: SourcifySection,
    pub deploy: DeploySection,
    pub verify: VerifySection,
    pub log_level: String,
}

impl Default for ShipyardConfig {
    fn default() -> Self {
        let alpine_rpc =
            "https://rpc-alpine-health-rswk3oj77b.t.conduit.xyz/KtrLRd57AguVNvD77Yq8R7a5quCQRWcWb";
        let network = |name: &str, url: &str| NetworkEntry {
            name: name.into(),
            url: url.into(),
            chain_id: None,
            credential: Some(DEFAULT_WALLET_KEY_REF.into()),
            gas_price: Some(ONE_GWEI),
            gas_limit: None,
            timeout_secs: default_request_timeout_secs(),
        };

        Self {
            networks: vec![
                network("alpine-marigold", alpine_rpc),
                network("base-mainnet", "https://mainnet.base.org"),
                network("base-sepolia", "https://sepolia.base.org"),
                network("base-local", "http://localhost:8545"),
            ],
            etherscan: EtherscanSection {
                api_key: Some(DEFAULT_ETHERSCAN_KEY_REF.into()),
                custom_chains: vec![
                    CustomChainEntry {
                        network: "alpine-marigold".into(),
                        chain_id: Some(98212),
                        api_url: "https://explorer-alpine-health-rswk3oj77b.t.conduit.xyz/api"
                            .into(),
                        browser_url: "https://explorer-alpine-health-rswk3oj77b.t.conduit.xyz/"
                            .into(),
                        kind: Some("blockscout".into()),
                        api_key: None,
                    },
                    CustomChainEntry {
                        network: "base-sepolia".into(),
                        chain_id: Some(84532),
                        api_url: "https://api-sepolia.basescan.org/api".into(),
                        browser_url: "https://sepolia.basescan.org".into(),
                        kind: None,
                        api_key: None,
                    },
                ],
            },
            sourcify: SourcifySection::default(),
            deploy: DeploySection::default(),
            verify: VerifySection::default(),
            log_level: "info".into(),
        }
    }
}

impl ShipyardConfig {
    /// Returns the base config directory: `~/.shipyard/`
    pub fn base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".shipyard"))
    }

    /// Returns the config file path: `~/.shipyard/config.json`
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.json"))
    }

    /// Returns the logs directory: `~/.shipyard/logs/`
    pub fn logs_dir() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("logs"))
    }

    /// Loads config from the default location, creating it if missing.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from_path(&path)
    }

    /// Load config from a specific file path. A missing file is created with
    /// the stock networks so the first run has something to edit.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let config: Self = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            info!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to_path(path)?;
            info!("Created default config at {}", path.display());
            Ok(config)
        }
    }

    /// Save config to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Look up a network entry by exact name.
    pub fn network(&self, name: &str) -> Option<&NetworkEntry> {
        self.networks.iter().find(|n| n.name == name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_reference_networks() {
        let config = ShipyardConfig::default();
        let names: Vec<_> = config.networks.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(
            names,
            ["alpine-marigold", "base-mainnet", "base-sepolia", "base-local"]
        );
        for entry in &config.networks {
            assert_eq!(entry.gas_price, Some(ONE_GWEI));
            assert_eq!(entry.credential.as_deref(), Some(DEFAULT_WALLET_KEY_REF));
        }
    }

    #[test]
    fn default_config_declares_custom_chains() {
        let config = ShipyardConfig::default();
        let ids: Vec<_> = config
            .etherscan
            .custom_chains
            .iter()
            .map(|c| c.chain_id)
            .collect();
        assert_eq!(ids, [Some(98212), Some(84532)]);
        assert!(config.sourcify.enabled);
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = ShipyardConfig::load_from_path(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config, ShipyardConfig::default());
    }

    #[test]
    fn partial_file_fills_remaining_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "networks": [{ "name": "dev", "url": "http://127.0.0.1:8545" }] }"#,
        )
        .unwrap();

        let config = ShipyardConfig::load_from_path(&path).unwrap();
        let dev = config.network("dev").unwrap();
        assert_eq!(dev.chain_id, None);
        assert_eq!(dev.credential, None);
        assert_eq!(dev.timeout_secs, 30);
        assert_eq!(config.deploy, DeploySection::default());
        assert_eq!(config.verify.max_retries, 10);
        assert_eq!(config.verify.request_timeout_secs, 30);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = ShipyardConfig::load_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn save_then_load_preserves_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = ShipyardConfig::default();
        config.deploy.confirmation_timeout_secs = 900;
        config.networks.retain(|n| n.name == "base-local");
        config.save_to_path(&path).unwrap();

        let loaded = ShipyardConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded.deploy.confirmation_timeout_secs, 900);
        assert_eq!(loaded.networks.len(), 1);
        assert!(loaded.network("base-mainnet").is_none());
    }
}
