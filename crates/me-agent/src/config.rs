//! SDK configuration, resolved from the static table and environment variables.

use std::env;
use std::time::Duration;

use alloy::primitives::Address;
use url::Url;

use crate::constants::{self, ChainConfig, Environment, Network, DEFAULT_AGENT_APP};

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid URL in {var}: {value}")]
    InvalidUrl { var: &'static str, value: String },

    #[error("invalid address in {var}: {value}")]
    InvalidAddress { var: &'static str, value: String },

    #[error("invalid value for {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },
}

#[derive(Clone)]
pub struct AgentConfig {
    pub environment: Environment,
    /// ME public API key, sent as `x-public-key`.
    pub public_key: String,
    /// Identity used for wallet login when none is set explicitly.
    pub user_email: Option<String>,
    pub api_url: String,
    pub api_v1_url: String,
    pub agent_url: String,
    pub runtime_url: String,
    pub agent_app: String,
    pub chain: ChainConfig,
    /// Gelato sponsor key for cross-brand relays.
    pub gelato_api_key: Option<String>,
    pub http_timeout: Duration,
}

impl std::fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConfig")
            .field("environment", &self.environment)
            .field("public_key", &"[REDACTED]")
            .field("user_email", &self.user_email)
            .field("api_url", &self.api_url)
            .field("api_v1_url", &self.api_v1_url)
            .field("agent_url", &self.agent_url)
            .field("runtime_url", &self.runtime_url)
            .field("agent_app", &self.agent_app)
            .field("chain", &self.chain)
            .field(
                "gelato_api_key",
                &self.gelato_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

impl AgentConfig {
    /// Build a config from the static table for `environment` × `network`.
    pub fn new(environment: Environment, network: Network, public_key: impl Into<String>) -> Self {
        let endpoints = constants::endpoints(environment);
        Self {
            environment,
            public_key: public_key.into(),
            user_email: None,
            api_url: endpoints.api_url,
            api_v1_url: endpoints.api_v1_url,
            agent_url: endpoints.agent_url,
            runtime_url: endpoints.runtime_url,
            agent_app: DEFAULT_AGENT_APP.to_string(),
            chain: constants::chain(environment, network),
            gelato_api_key: None,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }

    pub fn with_user_email(mut self, email: impl Into<String>) -> Self {
        self.user_email = Some(email.into());
        self
    }

    pub fn with_diamond_address(mut self, diamond: Address) -> Self {
        self.chain.diamond_address = Some(diamond);
        self
    }

    pub fn with_gelato_api_key(mut self, key: impl Into<String>) -> Self {
        self.gelato_api_key = Some(key.into());
        self
    }

    /// Point every backend endpoint at `base` (useful for local stacks and tests).
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = with_trailing_slash(base);
        self.api_url = base.clone();
        self.api_v1_url = format!("{base}v1/");
        self.agent_url = base.clone();
        self.runtime_url = format!("{base}runtime/");
        self
    }

    /// Load configuration from `ME_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = match non_empty("ME_ENVIRONMENT") {
            Some(v) => v.parse().map_err(|reason| ConfigError::InvalidValue {
                var: "ME_ENVIRONMENT",
                reason,
            })?,
            None => Environment::default(),
        };
        let network = match non_empty("ME_NETWORK") {
            Some(v) => v.parse().map_err(|reason| ConfigError::InvalidValue {
                var: "ME_NETWORK",
                reason,
            })?,
            None => Network::default(),
        };

        let public_key =
            non_empty("ME_PUBLIC_KEY").ok_or(ConfigError::MissingRequired("ME_PUBLIC_KEY"))?;

        let mut config = Self::new(environment, network, public_key);
        config.user_email = non_empty("ME_USER_EMAIL");

        if let Some(v) = url_var("ME_API_URL")? {
            config.api_url = v;
        }
        if let Some(v) = url_var("ME_API_V1_URL")? {
            config.api_v1_url = v;
        }
        if let Some(v) = url_var("ME_AGENT_URL")? {
            config.agent_url = v;
        }
        if let Some(v) = url_var("ME_RUNTIME_URL")? {
            config.runtime_url = v;
        }
        if let Some(v) = url_var("ME_RPC_URL")? {
            config.chain.rpc_url = v;
        }
        if let Some(v) = url_var("ME_RELAY_URL")? {
            config.chain.relay_url = v.trim_end_matches('/').to_string();
        }

        if let Some(v) = non_empty("ME_DIAMOND_ADDRESS") {
            let diamond: Address = v.parse().map_err(|_| ConfigError::InvalidAddress {
                var: "ME_DIAMOND_ADDRESS",
                value: v.clone(),
            })?;
            config.chain.diamond_address = Some(diamond);
        }

        config.gelato_api_key = non_empty("GELATO_API_KEY");

        if let Some(app) = non_empty("ME_AGENT_APP") {
            config.agent_app = app;
        }

        if let Some(v) = non_empty("ME_HTTP_TIMEOUT_SECS") {
            let secs: u64 = v.parse().map_err(|e| ConfigError::InvalidValue {
                var: "ME_HTTP_TIMEOUT_SECS",
                reason: format!("{e}"),
            })?;
            config.http_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn non_empty(var: &str) -> Option<String> {
    env::var(var).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn url_var(var: &'static str) -> Result<Option<String>, ConfigError> {
    match non_empty(var) {
        Some(value) => {
            Url::parse(&value).map_err(|_| ConfigError::InvalidUrl {
                var,
                value: value.clone(),
            })?;
            Ok(Some(with_trailing_slash(&value)))
        }
        None => Ok(None),
    }
}

fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_resolves_table() {
        let config = AgentConfig::new(Environment::Staging, Network::Polygon, "pk");
        assert_eq!(config.chain.chain_id, 80_002);
        assert!(config.api_url.contains("staging"));
        assert_eq!(config.agent_app, DEFAULT_AGENT_APP);
        assert!(config.chain.diamond_address.is_none());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = AgentConfig::new(Environment::Dev, Network::Sepolia, "super-secret")
            .with_gelato_api_key("gelato-secret");
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("super-secret"));
        assert!(!dbg.contains("gelato-secret"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn test_with_base_url_rewrites_endpoints() {
        let config =
            AgentConfig::new(Environment::Dev, Network::Sepolia, "pk").with_base_url("http://127.0.0.1:9000");
        assert_eq!(config.api_url, "http://127.0.0.1:9000/");
        assert_eq!(config.api_v1_url, "http://127.0.0.1:9000/v1/");
    }

    #[test]
    fn test_trailing_slash() {
        assert_eq!(with_trailing_slash("http://a"), "http://a/");
        assert_eq!(with_trailing_slash("http://a/"), "http://a/");
    }
}
