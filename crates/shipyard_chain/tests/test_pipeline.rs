mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use shipyard_chain::*;
use shipyard_core::ShipyardConfig;

fn networks() -> NetworkRegistry {
    let mut entries = ShipyardConfig::default().networks;
    for entry in &mut entries {
        if entry.name == "base-sepolia" {
            entry.chain_id = Some(84532);
        }
    }
    NetworkRegistry::from_entries(&entries).unwrap()
}

fn explorers() -> VerificationRegistry {
    let config = ShipyardConfig::default();
    VerificationRegistry::from_config(&config.etherscan, &config.sourcify).unwrap()
}

fn pipeline(
    node: &Arc<MockNode>,
    explorer: &Arc<FakeExplorer>,
    secrets: StaticSecrets,
    policy: RetryPolicy,
) -> Pipeline {
    let secrets = Arc::new(secrets);
    let credentials: Arc<dyn CredentialResolver> = secrets.clone();
    let submitter =
        VerificationSubmitter::new(secrets, Arc::new(FakeConnector(explorer.clone())), policy);
    Pipeline::new(
        networks(),
        explorers(),
        credentials,
        Arc::new(SingleNode(node.clone())),
        submitter,
        DeployOptions {
            confirmation_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
        },
    )
}

fn all_secrets() -> StaticSecrets {
    StaticSecrets::new()
        .with("WALLET_KEY", TEST_KEY)
        .with("ETHERSCAN_API_KEY", "TESTKEY123")
}

#[tokio::test(start_paused = true)]
async fn test_already_verified_is_success() {
    let node = Arc::new(MockNode::new(84532));
    let explorer = FakeExplorer::new(vec![Ok(Submission::AlreadyVerified)], vec![]);
    let pipeline = pipeline(&node, &explorer, all_secrets(), RetryPolicy::default());

    let report = pipeline
        .deploy_and_verify("base-sepolia", &alpine_artifact(), &[], Some(&alpine_source()))
        .await
        .unwrap();

    assert!(report.record.is_confirmed());
    let VerificationOutcome::Attempted(attempt) = &report.verification else {
        panic!("expected an attempt, got {:?}", report.verification);
    };
    assert_eq!(attempt.status, VerificationStatus::AlreadyVerified);
    assert!(attempt.status.is_success());
    assert_eq!(attempt.address, report.record.deployed_address().unwrap());
    // Custom basescan entry wins over the built-in for 84532.
    assert_eq!(explorer.keys(), vec![Some("TESTKEY123".to_string())]);
    assert!(attempt.browser_url.starts_with("https://sepolia.basescan.org/address/"));
}

#[tokio::test(start_paused = true)]
async fn test_submit_then_poll_until_verified() {
    let node = Arc::new(MockNode::new(84532));
    let explorer = FakeExplorer::new(
        vec![
            Err(VerificationError::BackendRejected(
                "Unable to locate ContractCode".into(),
            )),
            Ok(Submission::Accepted("guid-7".into())),
        ],
        vec![Ok(BackendStatus::Pending), Ok(BackendStatus::Verified)],
    );
    let pipeline = pipeline(
        &node,
        &explorer,
        all_secrets(),
        RetryPolicy::exponential(10, Duration::from_secs(1), Duration::from_secs(8)),
    );

    let report = pipeline
        .deploy_and_verify("base-sepolia", &alpine_artifact(), &[], Some(&alpine_source()))
        .await
        .unwrap();
    let VerificationOutcome::Attempted(attempt) = report.verification else {
        panic!("expected an attempt");
    };
    assert_eq!(attempt.status, VerificationStatus::Verified);
    assert_eq!(attempt.submission_id.as_deref(), Some("guid-7"));
    assert_eq!(attempt.retry_count, 2);
    assert_eq!(explorer.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_forever_exhausts_budget() {
    let node = Arc::new(MockNode::new(84532));
    let explorer = FakeExplorer::new(vec![], vec![]);
    let pipeline = pipeline(
        &node,
        &explorer,
        all_secrets(),
        RetryPolicy::fixed(5, Duration::from_secs(2)),
    );

    let report = pipeline
        .deploy_and_verify("base-sepolia", &alpine_artifact(), &[], Some(&alpine_source()))
        .await
        .unwrap();
    let VerificationOutcome::Attempted(attempt) = report.verification else {
        panic!("expected an attempt");
    };
    assert_eq!(attempt.status, VerificationStatus::Failed);
    assert_eq!(attempt.retry_count, 5);
    assert_eq!(explorer.calls(), 5);
    assert!(attempt.last_error.unwrap().contains("Max rate limit reached"));
    // Exhausting verification does not undo the deployment.
    assert!(report.record.is_confirmed());
}

#[tokio::test(start_paused = true)]
async fn test_local_chain_skips_verification() {
    let node = Arc::new(MockNode::new(31337));
    let explorer = FakeExplorer::new(vec![], vec![]);
    let pipeline = pipeline(&node, &explorer, all_secrets(), RetryPolicy::default());

    let report = pipeline
        .deploy_and_verify("base-local", &alpine_artifact(), &[], Some(&alpine_source()))
        .await
        .unwrap();
    assert!(report.record.is_confirmed());
    assert_eq!(
        report.verification,
        VerificationOutcome::Skipped { chain_id: 31337 }
    );
    assert_eq!(explorer.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_api_key_fails_before_deploying() {
    let node = Arc::new(MockNode::new(84532));
    let explorer = FakeExplorer::new(vec![], vec![]);
    let secrets = StaticSecrets::new().with("WALLET_KEY", TEST_KEY);
    let pipeline = pipeline(&node, &explorer, secrets, RetryPolicy::default());

    let err = pipeline
        .deploy_and_verify("base-sepolia", &alpine_artifact(), &[], Some(&alpine_source()))
        .await
        .unwrap_err();
    match err {
        DeployError::Config(ConfigError::MissingApiKey { network, reference, .. }) => {
            assert_eq!(network, "base-sepolia");
            assert_eq!(reference.as_deref(), Some("ETHERSCAN_API_KEY"));
        }
        other => panic!("expected MissingApiKey, got {other:?}"),
    }
    assert_eq!(node.call_count(), 0);
    assert_eq!(explorer.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_wallet_key_fails_before_any_io() {
    let node = Arc::new(MockNode::new(31337));
    let explorer = FakeExplorer::new(vec![], vec![]);
    let pipeline = pipeline(&node, &explorer, StaticSecrets::new(), RetryPolicy::default());

    let err = pipeline
        .deploy_and_verify("base-local", &alpine_artifact(), &[], None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DeployError::Config(ConfigError::MissingCredential { .. })
    ));
    assert_eq!(node.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_network_is_config_error() {
    let node = Arc::new(MockNode::new(31337));
    let explorer = FakeExplorer::new(vec![], vec![]);
    let pipeline = pipeline(&node, &explorer, all_secrets(), RetryPolicy::default());

    let err = pipeline
        .deploy_and_verify("Base-Local", &alpine_artifact(), &[], None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DeployError::Config(ConfigError::UnknownNetwork(name)) if name == "Base-Local"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_without_source_verification_not_requested() {
    let node = Arc::new(MockNode::new(84532));
    let explorer = FakeExplorer::new(vec![], vec![]);
    let pipeline = pipeline(&node, &explorer, all_secrets(), RetryPolicy::default());

    let report = pipeline
        .deploy_and_verify("base-sepolia", &alpine_artifact(), &[], None)
        .await
        .unwrap();
    assert_eq!(report.verification, VerificationOutcome::NotRequested);
    assert_eq!(explorer.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_report_serializes_for_output() {
    let node = Arc::new(MockNode::new(31337));
    let explorer = FakeExplorer::new(vec![], vec![]);
    let pipeline = pipeline(&node, &explorer, all_secrets(), RetryPolicy::default());

    let report = pipeline
        .deploy_and_verify("base-local", &alpine_artifact(), &[], Some(&alpine_source()))
        .await
        .unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["record"]["status"], "confirmed");
    assert_eq!(json["verification"]["outcome"], "skipped");
    assert_eq!(json["verification"]["chain_id"], 31337);
}
