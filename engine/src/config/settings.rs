// Engine settings: defaults, then an optional JSON file, then environment overrides.
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::EngineError;

pub const CONFIG_FILE_ENV: &str = "HOLDINGS_CONFIG";
pub const DB_PATH_ENV: &str = "HOLDINGS_DB_PATH";
pub const POOL_SIZE_ENV: &str = "HOLDINGS_POOL_SIZE";
pub const QUERY_TIMEOUT_ENV: &str = "HOLDINGS_QUERY_TIMEOUT_MS";

/// Upper bound for report page sizes.
pub const MAX_PAGE_LIMIT: u32 = 1000;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    pub db_path: PathBuf,
    pub pool_size: u32,
    /// Per-aggregation deadline; the only guard against runaway queries.
    pub query_timeout_ms: u64,
    pub default_page_limit: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            db_path: PathBuf::from("holdings.db"),
            pool_size: 4,
            query_timeout_ms: 5_000,
            default_page_limit: 50,
        }
    }
}

impl EngineSettings {
    /// Resolve settings from `HOLDINGS_CONFIG` (if set) and the environment.
    pub fn load() -> Result<Self, EngineError> {
        let base = match env::var(CONFIG_FILE_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        base.with_overrides(|key| env::var(key).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path)?;
        let settings: EngineSettings = serde_json::from_str(&raw)
            .map_err(|e| EngineError::ConfigError(format!("{}: {}", path.display(), e)))?;
        settings.validate()
    }

    /// Apply overrides from a key lookup (the process environment in production).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(DB_PATH_ENV).filter(|v| !v.trim().is_empty()) {
            self.db_path = PathBuf::from(path.trim());
        }
        if let Some(raw) = lookup(POOL_SIZE_ENV) {
            self.pool_size = parse_number(POOL_SIZE_ENV, &raw)?;
        }
        if let Some(raw) = lookup(QUERY_TIMEOUT_ENV) {
            self.query_timeout_ms = parse_number(QUERY_TIMEOUT_ENV, &raw)?;
        }
        self.validate()
    }

    fn validate(self) -> Result<Self, EngineError> {
        if self.pool_size == 0 {
            return Err(EngineError::ConfigError("pool_size must be at least 1".to_string()));
        }
        if self.query_timeout_ms == 0 {
            return Err(EngineError::ConfigError("query_timeout_ms must be at least 1".to_string()));
        }
        if self.default_page_limit == 0 || self.default_page_limit > MAX_PAGE_LIMIT {
            return Err(EngineError::ConfigError(format!(
                "default_page_limit must be within 1..={}",
                MAX_PAGE_LIMIT
            )));
        }
        Ok(self)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, EngineError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| EngineError::ConfigError(format!("{}='{}': {}", key, raw, e)))
}
