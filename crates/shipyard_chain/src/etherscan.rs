//! Etherscan-compatible verification API (Etherscan family and Blockscout).

use alloy::primitives::hex;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::VerificationError;
use crate::explorer::{ExplorerKind, ExplorerProfile};
use crate::verifier::{BackendStatus, ExplorerClient, Submission, VerificationRequest};

const CODE_FORMAT: &str = "solidity-standard-json-input";

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: Value,
}

impl ApiResponse {
    fn result_text(&self) -> String {
        match &self.result {
            Value::String(s) => s.clone(),
            Value::Null => self.message.clone(),
            other => other.to_string(),
        }
    }
}

pub struct EtherscanClient {
    http: Client,
    api_url: String,
    /// Sent as `chainid` to the unified multichain endpoint.
    chain_id: Option<u64>,
    api_key: Option<String>,
}

impl EtherscanClient {
    pub fn new(http: Client, explorer: &ExplorerProfile, api_key: Option<String>) -> Self {
        Self {
            http,
            api_url: explorer.api_endpoint.clone(),
            chain_id: match explorer.kind {
                ExplorerKind::Etherscan => explorer.chain_id,
                _ => None,
            },
            api_key,
        }
    }

    fn base_query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(chain_id) = self.chain_id {
            query.push(("chainid", chain_id.to_string()));
        }
        if let Some(key) = &self.api_key {
            query.push(("apikey", key.clone()));
        }
        query
    }

    async fn read(response: reqwest::Response) -> Result<ApiResponse, VerificationError> {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(VerificationError::RateLimited(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(VerificationError::Transport(format!("HTTP {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| VerificationError::Transport(format!("malformed response: {e}")))
    }
}

#[async_trait]
impl ExplorerClient for EtherscanClient {
    async fn submit(&self, request: &VerificationRequest) -> Result<Submission, VerificationError> {
        let source_code = request.source.standard_json_input.to_string();
        let address = request.address.to_string();
        let constructor_args = hex::encode(&request.constructor_args);
        let form = [
            ("module", "contract"),
            ("action", "verifysourcecode"),
            ("contractaddress", address.as_str()),
            ("sourceCode", source_code.as_str()),
            ("codeformat", CODE_FORMAT),
            ("contractname", request.source.contract_name.as_str()),
            ("compilerversion", request.source.compiler_version.as_str()),
            // Misspelling is part of the API.
            ("constructorArguements", constructor_args.as_str()),
        ];

        debug!(api = %self.api_url, address = %address, "verifysourcecode");
        let response = self
            .http
            .post(&self.api_url)
            .query(&self.base_query())
            .form(&form)
            .send()
            .await
            .map_err(|e| VerificationError::Transport(e.to_string()))?;
        classify_submission(&Self::read(response).await?)
    }

    async fn check_status(&self, submission_id: &str) -> Result<BackendStatus, VerificationError> {
        let mut query = self.base_query();
        query.extend([
            ("module", "contract".to_string()),
            ("action", "checkverifystatus".to_string()),
            ("guid", submission_id.to_string()),
        ]);

        let response = self
            .http
            .get(&self.api_url)
            .query(&query)
            .send()
            .await
            .map_err(|e| VerificationError::Transport(e.to_string()))?;
        classify_status(&Self::read(response).await?)
    }
}

fn is_already_verified(text: &str) -> bool {
    text.contains("already verified")
}

fn is_rate_limited(text: &str) -> bool {
    text.contains("rate limit")
}

fn classify_submission(response: &ApiResponse) -> Result<Submission, VerificationError> {
    let text = response.result_text();
    let lower = text.to_ascii_lowercase();
    if is_already_verified(&lower) {
        Ok(Submission::AlreadyVerified)
    } else if is_rate_limited(&lower) {
        Err(VerificationError::RateLimited(text))
    } else if response.status == "1" && !text.is_empty() {
        Ok(Submission::Accepted(text))
    } else {
        Err(VerificationError::BackendRejected(text))
    }
}

fn classify_status(response: &ApiResponse) -> Result<BackendStatus, VerificationError> {
    let text = response.result_text();
    let lower = text.to_ascii_lowercase();
    if is_already_verified(&lower) {
        Ok(BackendStatus::AlreadyVerified)
    } else if lower.starts_with("pass") {
        Ok(BackendStatus::Verified)
    } else if lower.contains("pending") || lower.contains("in queue") {
        Ok(BackendStatus::Pending)
    } else if lower.starts_with("fail") {
        Ok(BackendStatus::Failed(text))
    } else if is_rate_limited(&lower) {
        Err(VerificationError::RateLimited(text))
    } else if response.status == "1" {
        Ok(BackendStatus::Verified)
    } else {
        Err(VerificationError::BackendRejected(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(value: Value) -> ApiResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn accepted_submission_returns_guid() {
        let r = response(json!({
            "status": "1",
            "message": "OK",
            "result": "ezq878u486pzijkvvmerl6a9mzwhv6sefgvqi5tkwceejc7tvn"
        }));
        assert_eq!(
            classify_submission(&r).unwrap(),
            Submission::Accepted("ezq878u486pzijkvvmerl6a9mzwhv6sefgvqi5tkwceejc7tvn".into())
        );
    }

    #[test]
    fn already_verified_submission_is_success() {
        let r = response(json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Contract source code already verified"
        }));
        assert_eq!(classify_submission(&r).unwrap(), Submission::AlreadyVerified);
    }

    #[test]
    fn rate_limit_is_retryable() {
        let r = response(json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Max rate limit reached, please use API Key for higher rate limit"
        }));
        assert!(matches!(
            classify_submission(&r),
            Err(VerificationError::RateLimited(_))
        ));
        assert!(matches!(classify_status(&r), Err(VerificationError::RateLimited(_))));
    }

    #[test]
    fn unindexed_contract_is_rejection() {
        let r = response(json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Unable to locate ContractCode at 0x5fbdb2315678afecb367f032d93f642f64180aa3"
        }));
        assert!(matches!(
            classify_submission(&r),
            Err(VerificationError::BackendRejected(msg)) if msg.contains("Unable to locate")
        ));
    }

    #[test]
    fn status_strings_map_to_backend_status() {
        let cases = [
            ("0", "Pending in queue", BackendStatus::Pending),
            ("1", "Pass - Verified", BackendStatus::Verified),
            ("1", "Already Verified", BackendStatus::AlreadyVerified),
            (
                "0",
                "Fail - Unable to verify",
                BackendStatus::Failed("Fail - Unable to verify".into()),
            ),
        ];
        for (status, result, expected) in cases {
            let r = response(json!({ "status": status, "message": "", "result": result }));
            assert_eq!(classify_status(&r).unwrap(), expected, "{result}");
        }
    }

    #[test]
    fn chain_id_only_sent_to_etherscan() {
        let mut explorer = ExplorerProfile {
            network_name: "base".into(),
            chain_id: Some(8453),
            kind: ExplorerKind::Etherscan,
            api_endpoint: "https://api.etherscan.io/v2/api".into(),
            browser_endpoint: "https://basescan.org".into(),
            api_key: None,
            is_custom: false,
        };
        let client = EtherscanClient::new(Client::new(), &explorer, Some("KEY".into()));
        assert_eq!(
            client.base_query(),
            vec![("chainid", "8453".to_string()), ("apikey", "KEY".to_string())]
        );

        explorer.kind = ExplorerKind::Blockscout;
        let client = EtherscanClient::new(Client::new(), &explorer, None);
        assert!(client.base_query().is_empty());
    }
}
