//! Source verification against block explorers.
//!
//! [`VerificationSubmitter`] drives one verification: it submits the source
//! and constructor arguments, then polls the backend's status under a single
//! bounded retry budget. Backends are reached through [`ExplorerClient`]s
//! handed out by an [`ExplorerConnector`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shipyard_core::VerifySection;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::credentials::SecretStore;
use crate::deployer::DeploymentRecord;
use crate::error::{ConfigError, VerificationError, VerifyError};
use crate::explorer::{ExplorerKind, ExplorerProfile};

// ---------------------------------------------------------------------------
// Source metadata
// ---------------------------------------------------------------------------

/// What an explorer needs besides the bytecode to reproduce a build.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMetadata {
    /// Fully qualified name: `contracts/Token.sol:Token`.
    pub contract_name: String,
    /// `v0.8.24+commit.e11b9ed9` style.
    pub compiler_version: String,
    /// The solc standard-JSON input the contract was compiled from.
    pub standard_json_input: Value,
    /// The compiler's metadata JSON. Required by Sourcify.
    pub metadata: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildInfo {
    solc_long_version: String,
    input: Value,
    #[serde(default)]
    output: Value,
}

impl SourceMetadata {
    /// Read a Hardhat build-info file and pick out `fully_qualified_name`.
    pub fn from_build_info(path: &Path, fully_qualified_name: &str) -> Result<Self, ConfigError> {
        let error = |reason: String| ConfigError::Artifact {
            contract: fully_qualified_name.to_string(),
            reason,
        };
        let json = std::fs::read_to_string(path)
            .map_err(|e| error(format!("{}: {e}", path.display())))?;
        let info: BuildInfo = serde_json::from_str(&json)
            .map_err(|e| error(format!("{}: {e}", path.display())))?;

        let (source, name) = fully_qualified_name
            .rsplit_once(':')
            .ok_or_else(|| error("expected <source>:<Name>".into()))?;
        if info.input["sources"].get(source).is_none() {
            return Err(error(format!("{source} is not part of this build")));
        }
        let metadata = info.output["contracts"][source][name]["metadata"]
            .as_str()
            .map(str::to_string);

        Ok(Self {
            contract_name: fully_qualified_name.to_string(),
            compiler_version: format!("v{}", info.solc_long_version.trim_start_matches('v')),
            standard_json_input: info.input,
            metadata,
        })
    }
}

// ---------------------------------------------------------------------------
// Backend seam
// ---------------------------------------------------------------------------

/// Everything sent to a backend for one contract.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationRequest {
    pub address: Address,
    pub chain_id: u64,
    pub source: SourceMetadata,
    /// ABI-encoded constructor arguments, without the bytecode.
    pub constructor_args: Bytes,
}

/// Result of a successful submission call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Queued; poll with this id.
    Accepted(String),
    /// Verified synchronously.
    Verified,
    AlreadyVerified,
}

/// Backend verdict on a queued submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    Pending,
    Verified,
    AlreadyVerified,
    /// Definitive failure with the backend's reason.
    Failed(String),
}

#[async_trait]
pub trait ExplorerClient: Send + Sync {
    async fn submit(&self, request: &VerificationRequest) -> Result<Submission, VerificationError>;

    async fn check_status(&self, submission_id: &str) -> Result<BackendStatus, VerificationError>;
}

/// Creates a client for an explorer, given its already resolved API key.
pub trait ExplorerConnector: Send + Sync {
    fn connect(
        &self,
        explorer: &ExplorerProfile,
        api_key: Option<String>,
    ) -> Result<Arc<dyn ExplorerClient>, ConfigError>;
}

/// Connector speaking the real HTTP APIs.
#[derive(Debug, Clone)]
pub struct HttpExplorerConnector {
    http: reqwest::Client,
}

impl HttpExplorerConnector {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// One shared client whose requests give up after `request_timeout_secs`.
    pub fn from_config(section: &VerifySection) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(section.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| ConfigError::InvalidEndpoint {
                name: "explorer client".into(),
                url: e.to_string(),
            })?;
        Ok(Self::new(http))
    }
}

impl ExplorerConnector for HttpExplorerConnector {
    fn connect(
        &self,
        explorer: &ExplorerProfile,
        api_key: Option<String>,
    ) -> Result<Arc<dyn ExplorerClient>, ConfigError> {
        let client: Arc<dyn ExplorerClient> = match explorer.kind {
            ExplorerKind::Etherscan | ExplorerKind::Blockscout => Arc::new(
                crate::etherscan::EtherscanClient::new(self.http.clone(), explorer, api_key),
            ),
            ExplorerKind::Sourcify => {
                Arc::new(crate::sourcify::SourcifyClient::new(self.http.clone(), explorer))
            }
        };
        Ok(client)
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// Doubles after each retry, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total backend calls allowed across submission and polling.
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn exponential(max_retries: u32, initial: Duration, max: Duration) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Exponential { initial, max },
        }
    }

    /// Delay before the call following `retries` earlier retries.
    pub fn delay(&self, retries: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, max } => initial
                .checked_mul(2u32.saturating_pow(retries.min(16)))
                .map_or(max, |d| d.min(max)),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&VerifySection::default())
    }
}

impl From<&VerifySection> for RetryPolicy {
    fn from(section: &VerifySection) -> Self {
        let initial = Duration::from_millis(section.initial_delay_ms);
        match section.backoff.to_ascii_lowercase().as_str() {
            "fixed" => Self::fixed(section.max_retries, initial),
            other => {
                if other != "exponential" {
                    warn!(backoff = other, "unknown backoff strategy, using exponential");
                }
                Self::exponential(
                    section.max_retries,
                    initial,
                    Duration::from_millis(section.max_delay_ms.max(section.initial_delay_ms)),
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Attempt
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationStatus {
    Submitted,
    Pending,
    Verified,
    AlreadyVerified,
    Failed,
}

impl VerificationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Verified | Self::AlreadyVerified | Self::Failed)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Verified | Self::AlreadyVerified)
    }
}

/// State of one verification of one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationAttempt {
    pub status: VerificationStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub submission_id: Option<String>,
    /// Network name of the explorer profile used.
    pub explorer: String,
    pub address: Address,
    /// Contract page on the explorer UI.
    pub browser_url: String,
}

impl VerificationAttempt {
    fn record_retry(&mut self, error: String) {
        self.retry_count += 1;
        self.last_error = Some(error);
    }

    fn finish(mut self, status: VerificationStatus) -> Self {
        self.status = status;
        self
    }
}

// ---------------------------------------------------------------------------
// Submitter
// ---------------------------------------------------------------------------

pub struct VerificationSubmitter {
    secrets: Arc<dyn SecretStore>,
    connector: Arc<dyn ExplorerConnector>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl VerificationSubmitter {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        connector: Arc<dyn ExplorerConnector>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            secrets,
            connector,
            policy,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop polling when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Resolve the explorer's API key.
    ///
    /// `MissingApiKey` when the backend needs a key and none resolves. For
    /// keyless backends the key is passed along if it happens to be set.
    pub fn api_key(&self, explorer: &ExplorerProfile) -> Result<Option<String>, ConfigError> {
        let key = explorer
            .api_key
            .as_deref()
            .and_then(|reference| self.secrets.secret(reference));
        if key.is_none() && explorer.kind.requires_api_key() {
            return Err(ConfigError::MissingApiKey {
                network: explorer.network_name.clone(),
                api_endpoint: explorer.api_endpoint.clone(),
                reference: explorer.api_key.clone(),
            });
        }
        Ok(key)
    }

    /// Verify a confirmed deployment.
    ///
    /// Configuration problems fail before any request is sent. Backend
    /// failures never surface as `Err`; they end in a `failed` attempt that
    /// keeps the last reason. Cancellation returns the attempt as it stands.
    pub async fn verify(
        &self,
        record: &DeploymentRecord,
        explorer: &ExplorerProfile,
        source: &SourceMetadata,
    ) -> Result<VerificationAttempt, VerifyError> {
        let address = match record.deployed_address() {
            Some(address) if record.is_confirmed() => address,
            _ => {
                return Err(VerifyError::NotConfirmed {
                    network: record.network_name.clone(),
                    status: record.status().to_string(),
                });
            }
        };
        let api_key = self.api_key(explorer)?;
        if explorer.kind == ExplorerKind::Sourcify && source.metadata.is_none() {
            return Err(ConfigError::Artifact {
                contract: source.contract_name.clone(),
                reason: "sourcify needs the compiler metadata, which is missing from the build info"
                    .into(),
            }
            .into());
        }
        let client = self.connector.connect(explorer, api_key)?;

        let request = VerificationRequest {
            address,
            chain_id: record.chain_id,
            source: source.clone(),
            constructor_args: record.constructor_args_encoded.clone(),
        };
        let attempt = VerificationAttempt {
            status: VerificationStatus::Submitted,
            retry_count: 0,
            last_error: None,
            submission_id: None,
            explorer: explorer.network_name.clone(),
            address,
            browser_url: explorer.address_url(&address.to_string()),
        };

        info!(
            network = %record.network_name,
            explorer = %explorer.network_name,
            kind = %explorer.kind,
            address = %address,
            contract = %source.contract_name,
            "submitting verification"
        );
        let attempt = self.run(client.as_ref(), &request, attempt).await;
        match attempt.status {
            status if status.is_success() => {
                info!(address = %address, status = ?status, retries = attempt.retry_count, "verification succeeded")
            }
            VerificationStatus::Failed => {
                warn!(address = %address, retries = attempt.retry_count, error = ?attempt.last_error, "verification failed")
            }
            status => info!(address = %address, status = ?status, "verification stopped before completion"),
        }
        Ok(attempt)
    }

    async fn run(
        &self,
        client: &dyn ExplorerClient,
        request: &VerificationRequest,
        mut attempt: VerificationAttempt,
    ) -> VerificationAttempt {
        let mut calls = 0u32;

        let submission_id = loop {
            if self.cancel.is_cancelled() {
                return cancelled(attempt);
            }
            if calls >= self.policy.max_retries {
                return exhausted(attempt, calls);
            }
            calls += 1;
            let Some(submitted) = self.interruptible(client.submit(request)).await else {
                return cancelled(attempt);
            };
            match submitted {
                Ok(Submission::Accepted(id)) => break id,
                Ok(Submission::Verified) => return attempt.finish(VerificationStatus::Verified),
                Ok(Submission::AlreadyVerified) => {
                    return attempt.finish(VerificationStatus::AlreadyVerified);
                }
                Err(err) => {
                    debug!(error = %err, call = calls, "submission not accepted");
                    attempt.record_retry(err.to_string());
                    if calls < self.policy.max_retries && !self.pause(attempt.retry_count).await {
                        return cancelled(attempt);
                    }
                }
            }
        };
        debug!(submission_id = %submission_id, "submission accepted");
        attempt.submission_id = Some(submission_id.clone());
        attempt.status = VerificationStatus::Pending;

        loop {
            if calls >= self.policy.max_retries {
                return exhausted(attempt, calls);
            }
            // Explorers need a moment before the first status is meaningful.
            if !self.pause(attempt.retry_count).await {
                return cancelled(attempt);
            }
            calls += 1;
            let Some(status) = self.interruptible(client.check_status(&submission_id)).await
            else {
                return cancelled(attempt);
            };
            match status {
                Ok(BackendStatus::Verified) => return attempt.finish(VerificationStatus::Verified),
                Ok(BackendStatus::AlreadyVerified) => {
                    return attempt.finish(VerificationStatus::AlreadyVerified);
                }
                Ok(BackendStatus::Failed(reason)) => {
                    attempt.last_error = Some(reason);
                    return attempt.finish(VerificationStatus::Failed);
                }
                Ok(BackendStatus::Pending) => {
                    debug!(submission_id = %submission_id, call = calls, "verification pending");
                    attempt.retry_count += 1;
                }
                Err(err) => {
                    debug!(error = %err, call = calls, "status check failed");
                    attempt.record_retry(err.to_string());
                }
            }
        }
    }

    /// Await one backend call. `None` when cancelled first.
    async fn interruptible<T>(&self, call: impl Future<Output = T>) -> Option<T> {
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            out = call => Some(out),
        }
    }

    /// Sleep for the backoff delay. `false` when cancelled first.
    async fn pause(&self, retries: u32) -> bool {
        let delay = self.policy.delay(retries.saturating_sub(1));
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

fn cancelled(mut attempt: VerificationAttempt) -> VerificationAttempt {
    attempt.last_error = Some("cancelled by caller".into());
    attempt
}

fn exhausted(mut attempt: VerificationAttempt, calls: u32) -> VerificationAttempt {
    if calls == 0 {
        attempt.last_error = Some("verify.max_retries is 0, no request was sent".into());
    } else if attempt.last_error.is_none() {
        attempt.last_error = Some("still pending when the retry budget ran out".into());
    }
    attempt.finish(VerificationStatus::Failed)
}
