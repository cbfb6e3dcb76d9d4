use std::path::Path;

use alloy::dyn_abi::{DynSolType, DynSolValue, JsonAbiExt, Specifier};
use alloy::json_abi::JsonAbi;
use alloy::primitives::Bytes;
use serde::Deserialize;

use crate::error::ConfigError;

/// A compiled contract: creation bytecode plus its ABI.
///
/// Deserializes directly from a Hardhat artifact file
/// (`artifacts/contracts/<Source>.sol/<Name>.json`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub contract_name: String,
    #[serde(default)]
    pub source_name: Option<String>,
    pub abi: JsonAbi,
    pub bytecode: Bytes,
}

impl Artifact {
    pub fn new(contract_name: impl Into<String>, abi: JsonAbi, bytecode: Bytes) -> Self {
        Self {
            contract_name: contract_name.into(),
            source_name: None,
            abi,
            bytecode,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Artifact {
            contract: "<unparsed>".into(),
            reason: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Artifact {
            contract: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&json)
    }

    /// `source:Name` when the source path is known, otherwise the bare name.
    pub fn fully_qualified_name(&self) -> String {
        match &self.source_name {
            Some(source) => format!("{source}:{}", self.contract_name),
            None => self.contract_name.clone(),
        }
    }

    /// ABI-encode `args` against the constructor signature.
    pub fn encode_constructor_args(&self, args: &[DynSolValue]) -> Result<Bytes, ConfigError> {
        match self.abi.constructor() {
            Some(constructor) => constructor
                .abi_encode_input(args)
                .map(Bytes::from)
                .map_err(|e| self.error(format!("constructor arguments do not match: {e}"))),
            None if args.is_empty() => Ok(Bytes::new()),
            None => Err(self.error(format!(
                "no constructor in ABI but {} argument(s) were given",
                args.len()
            ))),
        }
    }

    /// Creation bytecode followed by the encoded constructor arguments.
    pub fn creation_code(&self, args: &[DynSolValue]) -> Result<Bytes, ConfigError> {
        if self.bytecode.is_empty() {
            return Err(self.error("artifact has no bytecode (abstract contract or interface?)"));
        }
        let encoded = self.encode_constructor_args(args)?;
        let mut code = Vec::with_capacity(self.bytecode.len() + encoded.len());
        code.extend_from_slice(&self.bytecode);
        code.extend_from_slice(&encoded);
        Ok(code.into())
    }

    /// Parse textual arguments by coercing each against the matching
    /// constructor input type.
    pub fn parse_constructor_args(&self, raw: &[String]) -> Result<Vec<DynSolValue>, ConfigError> {
        let inputs = self
            .abi
            .constructor()
            .map(|c| c.inputs.as_slice())
            .unwrap_or_default();
        if inputs.len() != raw.len() {
            return Err(self.error(format!(
                "constructor takes {} argument(s), {} given",
                inputs.len(),
                raw.len()
            )));
        }

        inputs
            .iter()
            .zip(raw)
            .map(|(input, arg)| {
                let ty: DynSolType = input
                    .resolve()
                    .map_err(|e| self.error(format!("cannot resolve input {}: {e}", input.name)))?;
                ty.coerce_str(arg)
                    .map_err(|e| self.error(format!("argument {} ({ty}): {e}", input.name)))
            })
            .collect()
    }

    fn error(&self, reason: impl Into<String>) -> ConfigError {
        ConfigError::Artifact {
            contract: self.contract_name.clone(),
            reason: reason.into(),
        }
    }
}
