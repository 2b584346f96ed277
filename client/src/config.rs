//! Configuration management for the sync client.

use std::env;
use std::path::PathBuf;

use crate::engine::RemapPolicy;

const DEFAULT_DATA_DIR: &str = "./stockpile-data";

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the REST API
    pub api_url: String,
    /// URL of the live channel
    pub ws_url: String,
    /// Directory for the local store
    pub data_dir: PathBuf,
    /// Ordering of identity remap
    pub remap_policy: RemapPolicy,
    /// Bearer token, if one is supplied up front
    pub token: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = lookup("STOCKPILE_API_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::MissingApiUrl)?;
        let api_url = api_url.trim_end_matches('/').to_string();

        let ws_url = match lookup("STOCKPILE_WS_URL") {
            Some(url) => url,
            None => ws_url_for(&api_url)?,
        };

        let data_dir = lookup("STOCKPILE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let remap_policy = match lookup("STOCKPILE_REMAP_POLICY") {
            Some(value) => parse_remap_policy(&value)?,
            None => RemapPolicy::default(),
        };

        let token = lookup("STOCKPILE_TOKEN").filter(|token| !token.trim().is_empty());

        Ok(Self {
            api_url,
            ws_url,
            data_dir,
            remap_policy,
            token,
        })
    }
}

/// Derive the live channel URL from the API URL.
fn ws_url_for(api_url: &str) -> Result<String, ConfigError> {
    if let Some(rest) = api_url.strip_prefix("https://") {
        Ok(format!("wss://{}", rest))
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        Ok(format!("ws://{}", rest))
    } else {
        Err(ConfigError::InvalidApiUrl(api_url.to_string()))
    }
}

fn parse_remap_policy(value: &str) -> Result<RemapPolicy, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "defer" | "defer-removal" => Ok(RemapPolicy::DeferRemoval),
        "remove-first" => Ok(RemapPolicy::RemoveFirst),
        _ => Err(ConfigError::InvalidRemapPolicy(value.to_string())),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("STOCKPILE_API_URL environment variable is required")]
    MissingApiUrl,

    #[error("STOCKPILE_API_URL must start with http:// or https:// (got {0})")]
    InvalidApiUrl(String),

    #[error("Invalid STOCKPILE_REMAP_POLICY value: {0} (expected defer or remove-first)")]
    InvalidRemapPolicy(String),
}
