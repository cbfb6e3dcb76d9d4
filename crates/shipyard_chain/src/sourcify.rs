//! Sourcify verification server. Keyless and synchronous.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::VerificationError;
use crate::explorer::ExplorerProfile;
use crate::verifier::{BackendStatus, ExplorerClient, Submission, VerificationRequest};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifiedContract {
    #[serde(default)]
    status: Option<String>,
    /// Present when the contract was already stored before this request.
    #[serde(default)]
    storage_timestamp: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    result: Vec<VerifiedContract>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckEntry {
    status: String,
}

pub struct SourcifyClient {
    http: Client,
    api_url: String,
    chain_id: Option<u64>,
}

impl SourcifyClient {
    pub fn new(http: Client, explorer: &ExplorerProfile) -> Self {
        Self {
            http,
            api_url: explorer.api_endpoint.trim_end_matches('/').to_string(),
            chain_id: explorer.chain_id,
        }
    }
}

/// `metadata.json` plus every source file of the build.
fn verification_files(request: &VerificationRequest) -> BTreeMap<String, String> {
    let mut files = BTreeMap::new();
    if let Some(metadata) = &request.source.metadata {
        files.insert("metadata.json".to_string(), metadata.clone());
    }
    if let Some(sources) = request.source.standard_json_input["sources"].as_object() {
        for (path, source) in sources {
            if let Some(content) = source["content"].as_str() {
                files.insert(path.clone(), content.to_string());
            }
        }
    }
    files
}

fn classify(status: StatusCode, body: VerifyResponse) -> Result<Submission, VerificationError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(VerificationError::RateLimited(format!("HTTP {status}")));
    }
    if let Some(error) = body.error {
        return if error.to_ascii_lowercase().contains("already") {
            Ok(Submission::AlreadyVerified)
        } else {
            Err(VerificationError::BackendRejected(error))
        };
    }
    let Some(contract) = body.result.into_iter().next() else {
        return Err(VerificationError::BackendRejected(format!(
            "HTTP {status} with an empty result"
        )));
    };
    match contract.status.as_deref() {
        Some("perfect" | "partial") if contract.storage_timestamp.is_some() => {
            Ok(Submission::AlreadyVerified)
        }
        Some("perfect" | "partial") => Ok(Submission::Verified),
        other => Err(VerificationError::BackendRejected(
            contract
                .message
                .unwrap_or_else(|| format!("unexpected status {other:?}")),
        )),
    }
}

#[async_trait]
impl ExplorerClient for SourcifyClient {
    async fn submit(&self, request: &VerificationRequest) -> Result<Submission, VerificationError> {
        let body = json!({
            "address": request.address.to_string(),
            "chain": request.chain_id.to_string(),
            "files": verification_files(request),
        });
        debug!(api = %self.api_url, address = %request.address, "sourcify verify");

        let response = self
            .http
            .post(format!("{}/verify", self.api_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| VerificationError::Transport(e.to_string()))?;
        let status = response.status();
        if status.is_server_error() {
            return Err(VerificationError::Transport(format!("HTTP {status}")));
        }
        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| VerificationError::Transport(format!("malformed response: {e}")))?;
        classify(status, body)
    }

    /// Sourcify never queues, so the submission id is the contract address.
    async fn check_status(&self, submission_id: &str) -> Result<BackendStatus, VerificationError> {
        let chain_id = self.chain_id.unwrap_or_default().to_string();
        let response = self
            .http
            .get(format!("{}/check-by-addresses", self.api_url))
            .query(&[("addresses", submission_id), ("chainIds", chain_id.as_str())])
            .send()
            .await
            .map_err(|e| VerificationError::Transport(e.to_string()))?;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(VerificationError::RateLimited(format!("HTTP {}", response.status())));
        }
        let entries: Vec<CheckEntry> = response
            .json()
            .await
            .map_err(|e| VerificationError::Transport(format!("malformed response: {e}")))?;
        Ok(match entries.first().map(|e| e.status.as_str()) {
            Some("perfect" | "partial") => BackendStatus::Verified,
            _ => BackendStatus::Pending,
        })
    }
}
