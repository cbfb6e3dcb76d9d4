// Multi-network contract deployment and source verification

pub mod artifact;
pub mod credentials;
pub mod deployer;
pub mod error;
pub mod etherscan;
pub mod explorer;
pub mod network;
pub mod pipeline;
pub mod sourcify;
pub mod transport;
pub mod verifier;

// Re-export primary types for convenient access.
pub use artifact::Artifact;
pub use credentials::{
    CreationTransaction, CredentialResolver, DeploymentSigner, EnvSecrets, LocalKeySigner,
    SecretStore, StaticSecrets,
};
pub use deployer::{DeployOptions, Deployer, DeploymentRecord, DeploymentStatus, PendingDeployment};
pub use error::{ConfigError, DeployError, NetworkError, VerificationError, VerifyError};
pub use explorer::{ExplorerKind, ExplorerProfile, VerificationRegistry, builtin_explorers};
pub use network::{GasPricePolicy, NetworkProfile, NetworkRegistry, ResolvedNetwork, validate_url};
pub use pipeline::{Pipeline, PipelineReport, VerificationOutcome};
pub use transport::{
    HttpTransport, HttpTransportFactory, TransactionReceipt, Transport, TransportError,
    TransportFactory,
};
pub use verifier::{
    Backoff, BackendStatus, ExplorerClient, ExplorerConnector, HttpExplorerConnector, RetryPolicy,
    SourceMetadata, Submission, VerificationAttempt, VerificationRequest, VerificationStatus,
    VerificationSubmitter,
};
