//! Configuration loading, validation and the runtime registry.

mod load;
mod registry;
mod schema;

use std::path::PathBuf;

use thiserror::Error;

use crate::core::error::InvalidId;
use crate::error::Transience;
use crate::merge::UnknownPolicy;

pub use load::{CONFIG_ENV, default_config_path, load, parse, resolve_config_path, write_config};
pub use registry::{EntityRuntime, Registry};
pub use schema::{
    Config, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_BACKOFF_MS, DEFAULT_SOURCE_TIMEOUT_MS,
    EntityConfig, LogLevel, RetryConfig, ServerConfig,
};

/// Malformed or missing configuration. Fatal at startup.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error("failed to render configuration: {reason}")]
    Render { reason: String },
    #[error("reference to undefined variable `$({var})`")]
    UnknownVariable { var: String },
    #[error(transparent)]
    UnknownPolicy(#[from] UnknownPolicy),
    #[error(transparent)]
    InvalidName(#[from] InvalidId),
    #[error("required configuration field `{field}` is missing")]
    Missing { field: &'static str },
    #[error("entity `{entity}` has no enabled sources")]
    NoSources { entity: String },
    #[error("entity `{entity}` enables source `{source_name}` but configures no commands for it")]
    MissingSource { entity: String, source_name: String },
    #[error("entity `{entity}` trusts source `{source_name}`, which is not enabled")]
    TrustedSourceNotEnabled { entity: String, source_name: String },
    #[error("unknown entity `{entity}`")]
    UnknownEntity { entity: String },
    #[error("entity `{entity}` has no source `{source_name}`")]
    UnknownSource { entity: String, source_name: String },
}

impl ConfigError {
    pub fn transience(&self) -> Transience {
        match self {
            ConfigError::Read { .. } => Transience::Unknown,
            _ => Transience::Permanent,
        }
    }
}
