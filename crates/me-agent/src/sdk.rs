//! The SDK handle.

use std::sync::Arc;

use crate::api::{http_client, MeApiClient};
use crate::catalog::CatalogClient;
use crate::chat::ChatClient;
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::flow::RedemptionFlow;
use crate::protocol::{DiamondProtocol, GelatoRelay};
use crate::redemption::{Collaborators, RedemptionService};
use crate::runtime::Eip712Runtime;
use crate::wallet::WalletAdapter;

/// An initialised ME Agent: redemption core, catalog and chat clients
/// sharing one HTTP client.
///
/// ```no_run
/// # async fn run() -> Result<(), me_agent::AgentError> {
/// let config = me_agent::AgentConfig::from_env()?;
/// let agent = me_agent::MeAgent::init(config, None).await?;
/// let brands = agent.catalog().brands().await?;
/// println!("{} brands", brands.len());
/// agent.destroy().await;
/// # Ok(())
/// # }
/// ```
pub struct MeAgent {
    config: AgentConfig,
    redemption: Arc<RedemptionService>,
    catalog: Arc<CatalogClient>,
    chat: ChatClient,
}

impl MeAgent {
    /// Initialise the wallet adapter (if any) and build every client.
    pub async fn init(
        config: AgentConfig,
        wallet: Option<Arc<dyn WalletAdapter>>,
    ) -> Result<Self, AgentError> {
        let http = http_client(&config)?;

        if let Some(wallet) = &wallet {
            wallet.init().await?;
        } else {
            tracing::info!("no wallet adapter configured, redemption is disabled");
        }

        let deps = Collaborators {
            wallet,
            api: Arc::new(MeApiClient::new(http.clone(), &config)),
            runtime: Arc::new(Eip712Runtime::new()),
            protocol: Arc::new(DiamondProtocol::new()),
            relayer: Arc::new(GelatoRelay::new(http.clone(), config.chain.relay_url.clone())),
        };

        tracing::info!(
            environment = %config.environment,
            network = %config.chain.network,
            chain_id = config.chain.chain_id,
            "ME agent initialised"
        );
        Ok(Self::from_parts(config, http, deps))
    }

    /// Assemble a handle around caller-supplied collaborators.
    pub fn from_parts(config: AgentConfig, http: reqwest::Client, deps: Collaborators) -> Self {
        Self {
            redemption: Arc::new(RedemptionService::new(config.clone(), deps)),
            catalog: Arc::new(CatalogClient::new(http.clone(), &config)),
            chat: ChatClient::new(http, &config),
            config,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn redemption(&self) -> &Arc<RedemptionService> {
        &self.redemption
    }

    pub fn catalog(&self) -> &Arc<CatalogClient> {
        &self.catalog
    }

    pub fn chat(&self) -> &ChatClient {
        &self.chat
    }

    /// A fresh redemption flow bound to this agent.
    pub fn flow(&self) -> RedemptionFlow {
        RedemptionFlow::new(self.redemption.clone(), self.catalog.clone())
    }

    /// Clear all session state and drop the clients.
    pub async fn destroy(self) {
        self.redemption.reset().await;
        self.catalog.clear_cache().await;
        tracing::info!("ME agent destroyed");
    }
}
