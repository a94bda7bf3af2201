use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level config (saga.toml + SAGA_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SagaConfig {
    #[serde(default)]
    pub memory: MemoryConfig,
}

/// Memory orchestrator settings. Every key has a default so an empty config
/// file (or none at all) yields a working setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Live session-cache TTL; expired entries are rebuilt lazily on access.
    #[serde(default = "default_session_ttl_seconds")]
    pub session_ttl_seconds: u64,
    /// How many recent messages to hydrate on a cold stream load.
    #[serde(default = "default_stream_load_limit")]
    pub stream_load_limit: usize,
    /// Active window budget in tokens.
    #[serde(default = "default_window_tokens")]
    pub window_tokens: usize,
    /// Insert-block budget in tokens.
    #[serde(default = "default_insert_budget_tokens")]
    pub insert_budget_tokens: usize,
    /// Retrieval cap: threads selected per request.
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
    /// Retrieval cap: raw archived messages gathered per request.
    #[serde(default = "default_max_raw_messages")]
    pub max_raw_messages: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            session_ttl_seconds: default_session_ttl_seconds(),
            stream_load_limit: default_stream_load_limit(),
            window_tokens: default_window_tokens(),
            insert_budget_tokens: default_insert_budget_tokens(),
            max_threads: default_max_threads(),
            max_raw_messages: default_max_raw_messages(),
        }
    }
}

fn default_session_ttl_seconds() -> u64 {
    600
}
fn default_stream_load_limit() -> usize {
    200
}
fn default_window_tokens() -> usize {
    32_000
}
fn default_insert_budget_tokens() -> usize {
    4_000
}
fn default_max_threads() -> usize {
    3
}
fn default_max_raw_messages() -> usize {
    20
}

impl SagaConfig {
    /// Load config from a TOML file with SAGA_* env var overrides.
    ///
    /// Env keys use `__` as the section separator so multi-word keys survive:
    /// `SAGA_MEMORY__WINDOW_TOKENS=16000` maps to `memory.window_tokens`.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let path = config_path.unwrap_or("saga.toml");

        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("SAGA_").split("__"))
            .extract()
            .map_err(|e| ConfigError(e.to_string()))
    }
}
