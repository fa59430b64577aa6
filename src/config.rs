//! Gateway configuration read from the environment

use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use tracing::warn;
use url::Url;

use crate::web::openai::REQUEST_TIMEOUT_SECS;
use crate::web::responses::constants::DEFAULT_MAX_TOOL_CALLS;
use crate::web::responses::state::CodecMode;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
    #[error("invalid backend URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Backend base URL including the API version, e.g. `https://host/v1`
    pub backend_url: String,
    pub backend_api_key: Option<String>,
    pub host: String,
    pub port: u16,
    pub max_tool_calls: u32,
    pub backend_timeout_secs: u64,
    pub state_codec: CodecMode,
    /// MCP server label -> endpoint URL
    pub mcp_connectors: HashMap<String, String>,
    pub vector_search_endpoint: Option<String>,
    pub vector_search_api_key: Option<String>,
    pub brave_api_key: Option<String>,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; unset and empty values are the same
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let backend_url = var("OPENAI_API_ENDPOINT").ok_or(ConfigError::Missing("OPENAI_API_ENDPOINT"))?;
        Url::parse(&backend_url)?;

        let mcp_connectors = var("MCP_CONNECTORS")
            .map(|raw| parse_connectors(&raw))
            .unwrap_or_default();

        Ok(Self {
            backend_url,
            backend_api_key: var("OPENAI_API_KEY"),
            host: var("GATEWAY_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_or("GATEWAY_PORT", var("GATEWAY_PORT"), DEFAULT_PORT)?,
            max_tool_calls: parse_or("MAX_TOOL_CALLS", var("MAX_TOOL_CALLS"), DEFAULT_MAX_TOOL_CALLS)?,
            backend_timeout_secs: parse_or(
                "BACKEND_TIMEOUT_SECS",
                var("BACKEND_TIMEOUT_SECS"),
                REQUEST_TIMEOUT_SECS,
            )?,
            state_codec: parse_or("STATE_CODEC", var("STATE_CODEC"), CodecMode::Header)?,
            mcp_connectors,
            vector_search_endpoint: var("VECTOR_SEARCH_ENDPOINT"),
            vector_search_api_key: var("VECTOR_SEARCH_API_KEY"),
            brave_api_key: var("BRAVE_API_KEY"),
        })
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let value = format!("{}:{}", self.host, self.port);
        value.parse().map_err(|_| ConfigError::Invalid {
            name: "GATEWAY_HOST",
            value,
        })
    }
}

fn parse_or<T: FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

/// `label=url` pairs separated by commas; malformed entries are skipped
fn parse_connectors(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .filter_map(|entry| match entry.split_once('=') {
            Some((label, url)) if !label.trim().is_empty() && !url.trim().is_empty() => {
                Some((label.trim().to_string(), url.trim().to_string()))
            }
            _ => {
                warn!("Ignoring malformed MCP connector entry: {}", entry);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<GatewayConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GatewayConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[("OPENAI_API_ENDPOINT", "http://localhost:8000/v1")]).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.max_tool_calls, 10);
        assert_eq!(cfg.backend_timeout_secs, 120);
        assert_eq!(cfg.state_codec, CodecMode::Header);
        assert!(cfg.mcp_connectors.is_empty());
        assert!(cfg.brave_api_key.is_none());
        assert_eq!(cfg.listen_addr().unwrap().to_string(), "0.0.0.0:8080");
    }

    #[test]
    fn test_missing_backend_is_an_error() {
        assert!(matches!(config(&[]), Err(ConfigError::Missing("OPENAI_API_ENDPOINT"))));
    }

    #[test]
    fn test_invalid_number_is_an_error() {
        let result = config(&[
            ("OPENAI_API_ENDPOINT", "http://localhost:8000/v1"),
            ("MAX_TOOL_CALLS", "many"),
        ]);
        assert!(matches!(result, Err(ConfigError::Invalid { name: "MAX_TOOL_CALLS", .. })));
    }

    #[test]
    fn test_overrides_and_connectors() {
        let cfg = config(&[
            ("OPENAI_API_ENDPOINT", "https://api.example.com/v1"),
            ("STATE_CODEC", "body"),
            ("GATEWAY_PORT", "9090"),
            ("MCP_CONNECTORS", "docs=http://mcp.local/docs, broken ,wiki=http://mcp.local/wiki"),
        ])
        .unwrap();
        assert_eq!(cfg.state_codec, CodecMode::Body);
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.mcp_connectors.len(), 2);
        assert_eq!(cfg.mcp_connectors["wiki"], "http://mcp.local/wiki");
    }
}
