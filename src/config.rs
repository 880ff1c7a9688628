//! Configuration module for the ESI filter
//!
//! CRITICAL: Configuration is loaded from Envoy plugin configuration,
//! NOT from external files. This avoids file I/O in the Wasm sandbox.

use serde::Deserialize;

use crate::esi::VariableScope;

/// Filter configuration loaded from Envoy plugin configuration
#[derive(Clone, Debug, Deserialize)]
pub struct FilterConfig {
    /// Send every request to a fixed local test origin
    #[serde(default)]
    pub localtest: bool,

    /// Authority used when `localtest` is on
    #[serde(default = "default_localtest_authority")]
    pub localtest_authority: String,

    /// Verbose diagnostic logging
    #[serde(default)]
    pub debug: bool,

    /// Handle `esi:assign` and seed REQUEST_PATH / QUERY_STRING
    #[serde(default)]
    pub assign: bool,

    /// Resolve every include to this URL
    #[serde(default, rename = "fixedURL", alias = "fixed_url")]
    pub fixed_url: Option<String>,

    /// Envoy cluster sub-requests are dispatched to
    #[serde(default = "default_upstream_cluster")]
    pub upstream_cluster: String,

    /// `user-agent` sent on sub-requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Sub-request timeout (Envoy requires one)
    #[serde(default = "default_subrequest_timeout_ms")]
    pub subrequest_timeout_ms: u64,

    /// Redirects followed per include
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,

    /// Longest tag buffered before it is passed through literally
    /// (None = unbounded)
    #[serde(default = "default_max_tag_size")]
    pub max_tag_size: Option<usize>,

    /// Whether assigned variables are per request or per worker
    #[serde(default)]
    pub variable_scope: VariableScope,

    /// Drop `accept-encoding` from every request so origin bodies arrive
    /// unencoded. The response type is unknown at that point, so this
    /// also affects responses that are never translated.
    #[serde(default = "default_strip_accept_encoding")]
    pub strip_accept_encoding: bool,
}

fn default_localtest_authority() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_upstream_cluster() -> String {
    "esi_origin".to_string()
}

fn default_user_agent() -> String {
    "cloudflare".to_string()
}

fn default_subrequest_timeout_ms() -> u64 {
    30_000
}

fn default_max_redirects() -> u32 {
    5
}

fn default_max_tag_size() -> Option<usize> {
    Some(16 * 1024) // 16KB
}

fn default_strip_accept_encoding() -> bool {
    true
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            localtest: false,
            localtest_authority: default_localtest_authority(),
            debug: false,
            assign: false,
            fixed_url: None,
            upstream_cluster: default_upstream_cluster(),
            user_agent: default_user_agent(),
            subrequest_timeout_ms: default_subrequest_timeout_ms(),
            max_redirects: default_max_redirects(),
            max_tag_size: default_max_tag_size(),
            variable_scope: VariableScope::default(),
            strip_accept_encoding: default_strip_accept_encoding(),
        }
    }
}

impl FilterConfig {
    /// Parse configuration from JSON bytes (from Envoy plugin configuration)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config_str = std::str::from_utf8(bytes)
            .map_err(|e| ConfigError::InvalidUtf8(e.to_string()))?;

        let config: Self = serde_json::from_str(config_str)
            .map_err(|e| ConfigError::InvalidJson(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream_cluster.is_empty() {
            return Err(ConfigError::InvalidValue("upstream_cluster is empty"));
        }
        if self.max_tag_size == Some(0) {
            return Err(ConfigError::InvalidValue("max_tag_size must be positive"));
        }
        if self.fixed_url.as_deref() == Some("") {
            return Err(ConfigError::InvalidValue("fixedURL is empty"));
        }
        Ok(())
    }
}

/// Configuration parsing errors
#[derive(Debug)]
pub enum ConfigError {
    InvalidUtf8(String),
    InvalidJson(String),
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidUtf8(e) => write!(f, "Invalid UTF-8: {}", e),
            ConfigError::InvalidJson(e) => write!(f, "Invalid JSON: {}", e),
            ConfigError::InvalidValue(e) => write!(f, "Invalid value: {}", e),
        }
    }
}
