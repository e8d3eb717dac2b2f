use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::matching::DEFAULT_MATCH_WINDOW_DAYS;

pub const DEFAULT_BATCH_SIZE: usize = 50;

const API_URL_ENV: &str = "KEEPSAKE_API_URL";
const API_TOKEN_ENV: &str = "KEEPSAKE_API_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Items uploaded between pauses.
    pub batch_size: usize,
    pub pause_between_batches: bool,
    /// Largest gap, in days, accepted when matching annotations by time.
    pub match_window_days: i64,
    /// Where the diagnostics log goes. Nothing is written when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            pause_between_batches: true,
            match_window_days: DEFAULT_MATCH_WINDOW_DAYS,
            log_dir: None,
        }
    }
}

impl ImportConfig {
    pub fn match_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.match_window_days.max(0))
    }

    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        let config: ImportConfig =
            serde_json::from_str(raw).map_err(|e| CoreError::Config(e.to_string()))?;
        if config.batch_size == 0 {
            return Err(CoreError::Config("batch_size must be at least 1".to_string()));
        }
        Ok(config)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub token: String,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("token", &"[redacted]")
            .finish()
    }
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Reads KEEPSAKE_API_URL and KEEPSAKE_API_TOKEN.
    pub fn from_env() -> Result<Self, CoreError> {
        let base_url = std::env::var(API_URL_ENV)
            .map_err(|_| CoreError::Config(format!("missing {}", API_URL_ENV)))?;
        let token = std::env::var(API_TOKEN_ENV)
            .map_err(|_| CoreError::Config(format!("missing {}", API_TOKEN_ENV)))?;
        if token.trim().is_empty() {
            return Err(CoreError::Config(format!("{} is empty", API_TOKEN_ENV)));
        }
        Ok(Self::new(base_url, token))
    }
}
