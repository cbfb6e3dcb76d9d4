//! Deploy-then-verify sequence for one artifact on one network.

use std::sync::Arc;

use alloy::dyn_abi::DynSolValue;
use serde::Serialize;
use shipyard_core::ShipyardConfig;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::artifact::Artifact;
use crate::credentials::{CredentialResolver, SecretStore};
use crate::deployer::{DeployOptions, Deployer, DeploymentRecord};
use crate::error::{ConfigError, DeployError, VerifyError};
use crate::explorer::VerificationRegistry;
use crate::network::NetworkRegistry;
use crate::transport::{HttpTransportFactory, TransportFactory};
use crate::verifier::{
    HttpExplorerConnector, RetryPolicy, SourceMetadata, VerificationAttempt, VerificationSubmitter,
};

/// What happened on the verification side of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VerificationOutcome {
    /// No source metadata was supplied.
    NotRequested,
    /// No explorer integrates with the chain.
    Skipped { chain_id: u64 },
    Attempted(VerificationAttempt),
    /// The deployment succeeded but verification could not start.
    Error { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub record: DeploymentRecord,
    pub verification: VerificationOutcome,
}

pub struct Pipeline {
    networks: NetworkRegistry,
    explorers: VerificationRegistry,
    credentials: Arc<dyn CredentialResolver>,
    transports: Arc<dyn TransportFactory>,
    submitter: VerificationSubmitter,
    deploy_options: DeployOptions,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        networks: NetworkRegistry,
        explorers: VerificationRegistry,
        credentials: Arc<dyn CredentialResolver>,
        transports: Arc<dyn TransportFactory>,
        submitter: VerificationSubmitter,
        deploy_options: DeployOptions,
    ) -> Self {
        Self {
            networks,
            explorers,
            credentials,
            transports,
            submitter,
            deploy_options,
            cancel: CancellationToken::new(),
        }
    }

    /// One token stops both the deployment wait and verification polling.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.submitter = self.submitter.with_cancellation(token.clone());
        self.cancel = token;
        self
    }

    /// Build both registries from the config file and talk to real endpoints.
    pub fn from_config<S>(
        config: &ShipyardConfig,
        secrets: Arc<S>,
        cancel: CancellationToken,
    ) -> Result<Self, ConfigError>
    where
        S: SecretStore + 'static,
    {
        let networks = NetworkRegistry::from_entries(&config.networks)?;
        let explorers = VerificationRegistry::from_config(&config.etherscan, &config.sourcify)?;
        let credentials: Arc<dyn CredentialResolver> = secrets.clone();
        let submitter = VerificationSubmitter::new(
            secrets,
            Arc::new(HttpExplorerConnector::from_config(&config.verify)?),
            RetryPolicy::from(&config.verify),
        );
        Ok(Self::new(
            networks,
            explorers,
            credentials,
            Arc::new(HttpTransportFactory),
            submitter,
            DeployOptions::from(&config.deploy),
        )
        .with_cancellation(cancel))
    }

    pub fn networks(&self) -> &NetworkRegistry {
        &self.networks
    }

    pub fn explorers(&self) -> &VerificationRegistry {
        &self.explorers
    }

    /// Deploy `artifact` to `network` and verify it when `source` is given.
    ///
    /// Credentials, and the explorer key when the chain id is configured, are
    /// checked before anything is sent. A verification problem never turns a
    /// successful deployment into an error; it is reported in the outcome.
    pub async fn deploy_and_verify(
        &self,
        network: &str,
        artifact: &Artifact,
        args: &[DynSolValue],
        source: Option<&SourceMetadata>,
    ) -> Result<PipelineReport, DeployError> {
        let resolved = self.networks.resolve(network, self.credentials.as_ref())?;
        let profile = &resolved.profile;

        if let (Some(_), Some(chain_id)) = (source, profile.chain_id) {
            if let Some(explorer) = self.explorers.resolve_explorer(Some(chain_id), &profile.name) {
                self.submitter.api_key(&explorer)?;
            }
        }

        let transport = self.transports.connect(profile)?;
        let deployer =
            Deployer::new(transport, self.deploy_options).with_cancellation(self.cancel.clone());
        let record = deployer.deploy(&resolved, artifact, args).await?;

        let verification = match source {
            None => VerificationOutcome::NotRequested,
            Some(source) => self.verify(&record, source).await,
        };
        Ok(PipelineReport {
            record,
            verification,
        })
    }

    async fn verify(&self, record: &DeploymentRecord, source: &SourceMetadata) -> VerificationOutcome {
        let Some(explorer) = self
            .explorers
            .resolve_explorer(Some(record.chain_id), &record.network_name)
        else {
            info!(
                network = %record.network_name,
                chain_id = record.chain_id,
                "no explorer for this chain, skipping verification"
            );
            return VerificationOutcome::Skipped {
                chain_id: record.chain_id,
            };
        };

        match self.submitter.verify(record, &explorer, source).await {
            Ok(attempt) => VerificationOutcome::Attempted(attempt),
            Err(err) => {
                warn!(network = %record.network_name, error = %err, "verification not started");
                err.into()
            }
        }
    }
}

impl From<VerifyError> for VerificationOutcome {
    fn from(err: VerifyError) -> Self {
        Self::Error {
            message: err.to_string(),
        }
    }
}
