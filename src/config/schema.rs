use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::source::CommandTemplates;

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 20;
pub const DEFAULT_SOURCE_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Interpolation root for `$(base)` inside string values.
    pub base: Option<String>,
    pub server: ServerConfig,
    pub retry: RetryConfig,
    pub entities: BTreeMap<String, EntityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServerConfig {
    pub listen: Option<String>,
    pub log_level: LogLevel,
    pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RetryConfig {
    /// Bound on whole-round retries after transient store errors.
    pub max_attempts: u32,
    /// First backoff; doubles per attempt.
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EntityConfig {
    pub merge_policy: String,
    /// Sources participating in reconciliation, each of which must have a
    /// command table under `sources`.
    pub enabled: Vec<String>,
    /// Per-source adaptor deadline.
    pub timeout_ms: u64,
    pub sources: BTreeMap<String, CommandTemplates>,
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            merge_policy: "reject-all".into(),
            enabled: Vec::new(),
            timeout_ms: DEFAULT_SOURCE_TIMEOUT_MS,
            sources: BTreeMap::new(),
        }
    }
}
