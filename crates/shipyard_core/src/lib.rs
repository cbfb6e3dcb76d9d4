pub mod config;
pub mod logging;

pub use config::{
    CustomChainEntry, DeploySection, EtherscanSection, NetworkEntry, ShipyardConfig,
    SourcifySection, VerifySection,
};
