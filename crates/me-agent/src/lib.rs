//! ME Agent: redeem loyalty rewards for discount coupons.
//!
//! The SDK logs a visitor into a custodial wallet by email, reads their
//! reward balances from the ME backend, prices an offer in the reward they
//! choose, and redeems it either directly (same brand) or through a relayed
//! cross-brand swap. A failure after the spend reaches the backend triggers
//! a refund before the error is returned.
//!
//! # Modules
//!
//! - [`redemption`]: the orchestration core ([`RedemptionService`])
//! - [`flow`]: headless offer-detail flow on top of the core
//! - [`api`]: ME backend client behind the [`ProtocolApi`] trait
//! - [`catalog`]: offers and brands
//! - [`chat`]: shopping-agent chat over SSE
//! - [`runtime`] / [`protocol`]: signing, vault permits and relay
//! - [`wallet`]: custodial wallet seam
//! - [`config`] / [`constants`]: environment × network resolution
//! - [`retry`]: bounded retry

pub mod api;
pub mod catalog;
pub mod chat;
pub mod config;
pub mod constants;
pub mod error;
pub mod flow;
pub mod protocol;
pub mod redemption;
pub mod retry;
pub mod runtime;
pub mod sdk;
pub mod types;
pub mod wallet;

pub use api::{MeApiClient, ProtocolApi};
pub use catalog::CatalogClient;
pub use chat::{AgentEvent, ChatClient, ChatSession, SseDecoder};
pub use config::{AgentConfig, ConfigError};
pub use constants::{Environment, Network};
pub use error::AgentError;
pub use flow::{RedemptionFlow, RedemptionView, ReviewState, SwapStatus};
pub use redemption::{
    Collaborators, CrossBrandRedemption, ProcessOrder, RedemptionService, RedemptionStage,
    SameBrandRedemption,
};
pub use sdk::MeAgent;
pub use wallet::{DynSigner, UserMetadata, WalletAdapter};
