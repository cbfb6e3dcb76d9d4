use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use shipyard_chain::{
    Artifact, EnvSecrets, Pipeline, SourceMetadata, VerificationOutcome, VerificationStatus,
};
use shipyard_core::ShipyardConfig;
use shipyard_core::logging;

#[derive(Parser, Debug)]
#[command(name = "shipyard", version, about = "Deploy contracts and verify them on block explorers")]
struct Cli {
    /// Config file. Defaults to ~/.shipyard/config.json
    #[arg(long, global = true, env = "SHIPYARD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy a Hardhat artifact, then verify its source when build info is given
    Deploy {
        /// Network name as registered in the config
        #[arg(short, long)]
        network: String,

        /// Path to the artifact JSON (artifacts/contracts/<Source>.sol/<Name>.json)
        artifact: PathBuf,

        /// Constructor argument, in order. Repeat for each argument.
        #[arg(long = "arg", value_name = "VALUE")]
        args: Vec<String>,

        /// Hardhat build-info file holding the compiler input for verification
        #[arg(long)]
        build_info: Option<PathBuf>,
    },

    /// List the configured networks
    Networks,

    /// List the known explorers, or show which one a network would verify on
    Explorers {
        #[arg(short, long)]
        network: Option<String>,

        #[arg(long, requires = "network")]
        chain_id: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ShipyardConfig::load_from_path(path)?,
        None => ShipyardConfig::load()?,
    };
    let _log_guard = logging::init_logging(&config.log_level)?;
    info!(version = env!("CARGO_PKG_VERSION"), "shipyard starting");

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("interrupted, stopping; press Ctrl-C again to exit immediately");
        on_interrupt.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    let pipeline = Pipeline::from_config(&config, Arc::new(EnvSecrets), cancel)?;

    match cli.command {
        Command::Deploy {
            network,
            artifact,
            args,
            build_info,
        } => deploy(&pipeline, &network, artifact, &args, build_info).await,
        Command::Networks => {
            for profile in pipeline.networks().iter() {
                println!(
                    "{:<18} {:<48} chain {:<10} gas {}",
                    profile.name,
                    profile.rpc_endpoint,
                    profile
                        .chain_id
                        .map_or_else(|| "auto".to_string(), |id| id.to_string()),
                    profile.gas_price,
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Explorers {
            network: Some(network),
            chain_id,
        } => {
            match pipeline.explorers().resolve_explorer(chain_id, &network) {
                Some(explorer) => println!("{}", serde_json::to_string_pretty(&explorer)?),
                None => println!("no explorer for {network}; verification would be skipped"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Explorers { network: None, .. } => {
            let explorers = pipeline.explorers();
            for explorer in explorers.custom_chains().chain(explorers.builtins()) {
                println!(
                    "{:<18} {:<10} {:<10} {:<7} {}",
                    explorer.network_name,
                    explorer
                        .chain_id
                        .map_or_else(|| "-".to_string(), |id| id.to_string()),
                    explorer.kind.to_string(),
                    if explorer.is_custom { "custom" } else { "builtin" },
                    explorer.api_endpoint,
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn deploy(
    pipeline: &Pipeline,
    network: &str,
    artifact_path: PathBuf,
    raw_args: &[String],
    build_info: Option<PathBuf>,
) -> Result<ExitCode> {
    let artifact = Artifact::load(&artifact_path)?;
    let args = artifact.parse_constructor_args(raw_args)?;
    let source = build_info
        .map(|path| SourceMetadata::from_build_info(&path, &artifact.fully_qualified_name()))
        .transpose()?;

    let report = match pipeline
        .deploy_and_verify(network, &artifact, &args, source.as_ref())
        .await
    {
        Ok(report) => report,
        Err(err) => {
            if let Some(hash) = err.transaction_hash() {
                error!(tx_hash = %hash, "deployment did not complete; query this hash before retrying");
            }
            return Err(err).context(format!("deploying {} to {network}", artifact.contract_name));
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(match &report.verification {
        VerificationOutcome::Attempted(attempt) if attempt.status == VerificationStatus::Failed => {
            ExitCode::from(2)
        }
        VerificationOutcome::Error { .. } => ExitCode::from(2),
        _ => ExitCode::SUCCESS,
    })
}
