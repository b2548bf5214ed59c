//! Process configuration, read once from the environment at startup

use crate::conversation::DEFAULT_MAX_TURNS;
use crate::llm::GeminiConfig;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// How to launch the plant tool process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolProcessConfig {
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub gemini: GeminiConfig,
    /// `None` leaves the tool gateway permanently disconnected
    pub tool: Option<ToolProcessConfig>,
    pub tool_reconnect: bool,
    pub search_tool: String,
    pub identify_tool: String,
    pub image_upload_url: Option<String>,
    pub history_max_turns: usize,
    pub conversation_ttl: Duration,
    pub eviction_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_key = get("GEMINI_API_KEY").ok_or(ConfigError::Missing("GEMINI_API_KEY"))?;
        let mut gemini = GeminiConfig::new(api_key);
        if let Some(model) = get("GEMINI_MODEL") {
            gemini.model = model;
        }
        if let Some(base_url) = get("GEMINI_BASE_URL") {
            gemini.base_url = base_url;
        }
        gemini.timeout = Duration::from_secs(parse_or(&get, "GEMINI_TIMEOUT_SECS", 60)?);

        let tool = get("EVA_TOOL_COMMAND").map(|command| ToolProcessConfig {
            command,
            args: get("EVA_TOOL_ARGS")
                .map(|args| args.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        });

        Ok(Self {
            port: parse_or(&get, "EVA_PORT", 9002)?,
            gemini,
            tool,
            tool_reconnect: parse_or(&get, "EVA_TOOL_RECONNECT", true)?,
            search_tool: get("EVA_TOOL_SEARCH_NAME").unwrap_or_else(|| "search_plants".to_string()),
            identify_tool: get("EVA_TOOL_IDENTIFY_NAME")
                .unwrap_or_else(|| "identify_plant".to_string()),
            image_upload_url: get("EVA_IMAGE_UPLOAD_URL"),
            history_max_turns: parse_or(&get, "EVA_HISTORY_MAX_TURNS", DEFAULT_MAX_TURNS)?,
            conversation_ttl: Duration::from_secs(parse_or(
                &get,
                "EVA_CONVERSATION_TTL_SECS",
                86_400,
            )?),
            eviction_interval: Duration::from_secs(parse_or(
                &get,
                "EVA_EVICTION_INTERVAL_SECS",
                300,
            )?),
        })
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
