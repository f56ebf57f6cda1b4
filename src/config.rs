//! Configuration management for coachboard.
//!
//! Configuration can be set via environment variables:
//! - `COACH_API_KEY` - Required. Backend API key (falls back to `OPENROUTER_API_KEY`).
//! - `COACH_API_URL` - Optional. OpenAI-compatible base URL. Defaults to `https://openrouter.ai/api/v1`.
//! - `COACH_MODEL` - Optional. Model id. Defaults to `anthropic/claude-sonnet-4.5`.
//! - `COACH_STREAMING` - Optional. Use incremental replies. Defaults to `true`.
//! - `COACH_HISTORY_TURNS` - Optional. Prior turns sent to the backend. Defaults to `20`.
//! - `COACH_TEMPERATURE` - Optional. Sampling temperature, `0.0..=2.0`.
//! - `TASK_STORE` - Optional. `memory`, `file` or `sqlite`. Defaults to `sqlite`.
//! - `DATA_DIR` - Optional. Where file and sqlite stores live. Defaults to `./.coachboard`.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::llm::DEFAULT_API_URL;
use crate::relay::DEFAULT_HISTORY_TURNS;
use crate::task::TaskStoreType;

pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4.5";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend API key
    pub api_key: String,

    /// Base URL of the OpenAI-compatible backend
    pub api_url: String,

    pub model: String,

    /// Whether replies are streamed from the backend
    pub streaming: bool,

    /// Most recent prior turns included in each prompt
    pub history_turns: usize,

    pub temperature: Option<f64>,

    pub task_store: TaskStoreType,

    /// Directory for persistent task stores
    pub data_dir: PathBuf,

    pub host: String,

    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    /// Returns `ConfigError::MissingEnvVar` if no API key is set, or
    /// `ConfigError::InvalidValue` for unparsable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = var("COACH_API_KEY")
            .or_else(|| var("OPENROUTER_API_KEY"))
            .ok_or_else(|| ConfigError::MissingEnvVar("COACH_API_KEY".to_string()))?;

        let api_url = var("COACH_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        url::Url::parse(&api_url)
            .map_err(|e| ConfigError::InvalidValue("COACH_API_URL".to_string(), e.to_string()))?;

        let model = var("COACH_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let streaming = match var("COACH_STREAMING") {
            Some(v) => parse_bool(&v).ok_or_else(|| {
                ConfigError::InvalidValue("COACH_STREAMING".to_string(), v.clone())
            })?,
            None => true,
        };

        let history_turns = parse_or(
            "COACH_HISTORY_TURNS",
            var("COACH_HISTORY_TURNS"),
            DEFAULT_HISTORY_TURNS,
        )?;

        let temperature = match var("COACH_TEMPERATURE") {
            Some(v) => {
                let t: f64 = parse_or("COACH_TEMPERATURE", Some(v.clone()), 0.0)?;
                if !(0.0..=2.0).contains(&t) {
                    return Err(ConfigError::InvalidValue(
                        "COACH_TEMPERATURE".to_string(),
                        format!("{} is outside 0.0..=2.0", v),
                    ));
                }
                Some(t)
            }
            None => None,
        };

        let task_store = var("TASK_STORE")
            .map(|v| TaskStoreType::from_str(&v))
            .unwrap_or_default();

        let data_dir = var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./.coachboard"));

        let host = var("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse_or("PORT", var("PORT"), 3000u16)?;

        Ok(Self {
            api_key,
            api_url,
            model,
            streaming,
            history_turns,
            temperature,
            task_store,
            data_dir,
            host,
            port,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            api_url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            streaming: true,
            history_turns: DEFAULT_HISTORY_TURNS,
            temperature: None,
            task_store: TaskStoreType::Memory,
            data_dir: PathBuf::from("./.coachboard"),
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

fn parse_or<T>(key: &str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
