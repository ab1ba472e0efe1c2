//! Static environment × network table.
//!
//! Backend endpoints depend on the deployment [`Environment`]; chain
//! parameters depend on the [`Network`] and on whether the environment
//! targets testnets (dev, staging) or mainnets (prod).

use std::fmt;
use std::str::FromStr;

use alloy::primitives::Address;

/// Number of decimals used by every ME reward token.
pub const REWARD_DECIMALS: u8 = 18;

/// Default agent app name on the chat backend.
pub const DEFAULT_AGENT_APP: &str = "me_agent";

/// Gelato relay API base.
pub const GELATO_RELAY_URL: &str = "https://api.gelato.digital";

/// Deployment environment of the ME backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Staging => "staging",
            Environment::Prod => "prod",
        }
    }

    fn is_mainnet(&self) -> bool {
        matches!(self, Environment::Prod)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Prod),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// Chain the reward contracts live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    #[default]
    Sepolia,
    Hedera,
    Base,
    Polygon,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Sepolia => "sepolia",
            Network::Hedera => "hedera",
            Network::Base => "base",
            Network::Polygon => "polygon",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sepolia" => Ok(Network::Sepolia),
            "hedera" => Ok(Network::Hedera),
            "base" => Ok(Network::Base),
            "polygon" => Ok(Network::Polygon),
            other => Err(format!("unknown network: {other}")),
        }
    }
}

/// Backend endpoints for one environment. URLs end with `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub api_url: String,
    pub api_v1_url: String,
    pub agent_url: String,
    pub runtime_url: String,
}

/// Chain parameters for one (environment, network) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub network: Network,
    pub chain_id: u64,
    pub rpc_url: String,
    pub relay_url: String,
    /// Diamond contract used for cross-brand spends. Not part of the
    /// published table; supplied through configuration.
    pub diamond_address: Option<Address>,
}

/// Resolve the backend endpoints for an environment.
pub fn endpoints(environment: Environment) -> Endpoints {
    let host = match environment {
        Environment::Dev => "https://dev.api.meprotocol.io",
        Environment::Staging => "https://staging.api.meprotocol.io",
        Environment::Prod => "https://api.meprotocol.io",
    };
    let agent = match environment {
        Environment::Dev => "https://dev.agent.meprotocol.io",
        Environment::Staging => "https://staging.agent.meprotocol.io",
        Environment::Prod => "https://agent.meprotocol.io",
    };
    Endpoints {
        api_url: format!("{host}/api/"),
        api_v1_url: format!("{host}/api/v1/"),
        agent_url: format!("{agent}/"),
        runtime_url: format!("{host}/runtime/"),
    }
}

/// Resolve chain parameters for an (environment, network) pair.
pub fn chain(environment: Environment, network: Network) -> ChainConfig {
    let mainnet = environment.is_mainnet();
    let (chain_id, rpc_url) = match (network, mainnet) {
        // Sepolia is a testnet in every environment.
        (Network::Sepolia, _) => (11_155_111, "https://ethereum-sepolia-rpc.publicnode.com"),
        (Network::Hedera, false) => (296, "https://testnet.hashio.io/api"),
        (Network::Hedera, true) => (295, "https://mainnet.hashio.io/api"),
        (Network::Base, false) => (84_532, "https://sepolia.base.org"),
        (Network::Base, true) => (8_453, "https://mainnet.base.org"),
        (Network::Polygon, false) => (80_002, "https://rpc-amoy.polygon.technology"),
        (Network::Polygon, true) => (137, "https://polygon-rpc.com"),
    };
    ChainConfig {
        network,
        chain_id,
        rpc_url: rpc_url.to_string(),
        relay_url: GELATO_RELAY_URL.to_string(),
        diamond_address: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_dev_sepolia() {
        assert_eq!(Environment::default(), Environment::Dev);
        assert_eq!(Network::default(), Network::Sepolia);
        let c = chain(Environment::default(), Network::default());
        assert_eq!(c.chain_id, 11_155_111);
    }

    #[test]
    fn test_prod_uses_mainnets() {
        assert_eq!(chain(Environment::Prod, Network::Base).chain_id, 8_453);
        assert_eq!(chain(Environment::Staging, Network::Base).chain_id, 84_532);
        assert_eq!(chain(Environment::Prod, Network::Polygon).chain_id, 137);
        assert_eq!(chain(Environment::Prod, Network::Sepolia).chain_id, 11_155_111);
    }

    #[test]
    fn test_parse_environment_and_network() {
        assert_eq!("Production".parse::<Environment>().unwrap(), Environment::Prod);
        assert_eq!(" hedera ".parse::<Network>().unwrap(), Network::Hedera);
        assert!("mainnet".parse::<Network>().is_err());
    }

    #[test]
    fn test_endpoints_end_with_slash() {
        for env in [Environment::Dev, Environment::Staging, Environment::Prod] {
            let e = endpoints(env);
            assert!(e.api_url.ends_with('/'));
            assert!(e.api_v1_url.ends_with('/'));
            assert!(e.agent_url.ends_with('/'));
        }
    }
}
