//! Configuration surface for the relay gateway: startup flags, the live
//! settings record, and the config store mutated by the admin plane.

pub mod cli_args;
pub mod config_store;
pub mod settings;

pub use cli_args::GatewayCli;
pub use config_store::{ConfigStore, CONFIG_OVERLAY_FILE};
pub use settings::{
    is_truthy, is_truthy_str, parse_list_literal, split_comma_list, ConfigUpdate, ConfigValue,
    GatewaySettings,
};

/// Errors raised while parsing or persisting configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("retry_times must be a non-negative integer, got '{0}'")]
    InvalidRetryTimes(String),
    #[error("invalid list literal '{raw}': {reason}")]
    InvalidListLiteral { raw: String, reason: String },
    #[error("config storage failure: {0}")]
    Storage(String),
}

impl ConfigError {
    pub(crate) fn storage(error: anyhow::Error) -> Self {
        Self::Storage(format!("{error:#}"))
    }
}
