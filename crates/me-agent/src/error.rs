use thiserror::Error;

/// Errors returned by ME Agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Auth(String),

    #[error("wallet error: {0}")]
    Wallet(String),

    #[error("failed to fetch wallet address after {attempts} attempts: {last}")]
    WalletAddress { attempts: u32, last: String },

    #[error("chain error: {0}")]
    Chain(String),

    #[error("relay error: {0}")]
    Relay(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("api error: {0}")]
    Api(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    InvalidConfig(#[from] crate::config::ConfigError),
}

impl AgentError {
    pub(crate) fn magic_not_configured() -> Self {
        AgentError::Config("Magic is not configured".to_string())
    }

    pub(crate) fn token_missing() -> Self {
        AgentError::Config("ME protocol token missing. Please login first.".to_string())
    }

    pub(crate) fn no_order() -> Self {
        AgentError::Config("No order available.".to_string())
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        AgentError::Http(e.to_string())
    }
}
