//! Reward-for-coupon redemption orchestration.
//!
//! Two topologies:
//!
//! - **Same brand**: the spent reward belongs to the offer's brand. The
//!   runtime signs a redeem call, the backend submits it, and the order is
//!   verified by the runtime (`RUNTIME`).
//! - **Cross brand**: the spent reward is swapped through the diamond
//!   contract. The runtime signs a spend, the backend returns a vault permit,
//!   the permit spend is relayed through Gelato, and the order is verified
//!   against the relay task (`GELATO`).
//!
//! Once a spend has been pushed to the backend, any later failure triggers a
//! best-effort `refund-task` before the original error is returned.
//!
//! Pipeline stages:
//!
//! ```text
//! Idle → LoggingInWallet → LoggingInProtocol → FetchingBalances → CalculatingSwap
//!      → SigningTx → PushingTx → [BuildingPermit → Relaying] → ProcessingOrder → Complete
//!                             └─ any failure after PushingTx → Refunding → Failed
//! ```

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::utils::{parse_units, ParseUnits};
use alloy::primitives::{Address, U256};
use tokio::sync::Mutex;

use crate::api::ProtocolApi;
use crate::config::AgentConfig;
use crate::constants::REWARD_DECIMALS;
use crate::error::AgentError;
use crate::protocol::{ProtocolCore, RelayCall, RelayContext, Relayer, SpendInfo, VaultParams};
use crate::retry::{retry, RetryPolicy};
use crate::runtime::ChainRuntime;
use crate::types::{
    CheckoutUrlRequest, OfferDetail, Order, ProcessOrderRequest, RewardBalance, SpendData,
    SwapAmount, SwapAmountRequest, Verifier,
};
use crate::wallet::{emails_match, WalletAdapter};

/// Wallet address lookups: 3 attempts, 1 second apart.
pub const WALLET_ADDRESS_RETRY: RetryPolicy = RetryPolicy::fixed(3, Duration::from_secs(1));

/// Where the current redemption is in its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedemptionStage {
    #[default]
    Idle,
    LoggingInWallet,
    LoggingInProtocol,
    FetchingBalances,
    CalculatingSwap,
    SigningTx,
    PushingTx,
    BuildingPermit,
    Relaying,
    ProcessingOrder,
    Complete,
    Refunding,
    Failed,
}

/// Mutable per-visitor state, guarded by the service's session lock.
#[derive(Clone, Default)]
pub struct RedemptionSession {
    magic_logged_in: bool,
    wallet_address: Option<Address>,
    balances: Vec<RewardBalance>,
    protocol_logged_in: bool,
    token: Option<String>,
    email: Option<String>,
    current_order: Option<Order>,
    stage: RedemptionStage,
}

impl std::fmt::Debug for RedemptionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedemptionSession")
            .field("magic_logged_in", &self.magic_logged_in)
            .field("wallet_address", &self.wallet_address)
            .field("balances", &self.balances.len())
            .field("protocol_logged_in", &self.protocol_logged_in)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("email", &self.email)
            .field("current_order", &self.current_order)
            .field("stage", &self.stage)
            .finish()
    }
}

/// External services the redemption pipeline drives.
#[derive(Clone)]
pub struct Collaborators {
    /// `None` when no wallet SDK was configured.
    pub wallet: Option<Arc<dyn WalletAdapter>>,
    pub api: Arc<dyn ProtocolApi>,
    pub runtime: Arc<dyn ChainRuntime>,
    pub protocol: Arc<dyn ProtocolCore>,
    pub relayer: Arc<dyn Relayer>,
}

/// Inputs for [`RedemptionService::execute_same_brand_redemption`].
#[derive(Debug, Clone, PartialEq)]
pub struct SameBrandRedemption {
    pub reward_address: String,
    pub reward_id: String,
    /// Decimal amount of the reward to spend.
    pub amount: String,
    pub offer_id: String,
    pub redemption_method_id: String,
    pub variant_id: Option<String>,
}

/// Inputs for [`RedemptionService::execute_cross_brand_redemption`].
#[derive(Debug, Clone, PartialEq)]
pub struct CrossBrandRedemption {
    /// Reward the visitor spends.
    pub reward_address: String,
    pub reward_id: String,
    /// Decimal amount of the spent reward.
    pub amount: String,
    /// Decimal amount of the offer brand's reward expected in exchange.
    pub needed_amount: String,
    /// The offer brand's reward.
    pub brand_reward_address: String,
    pub brand_id: String,
    pub offer_id: String,
    pub redemption_method_id: String,
    pub variant_id: Option<String>,
}

/// Inputs for [`RedemptionService::process_order`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOrder {
    pub spend_data: SpendData,
    pub task_id: String,
    pub reward_id: String,
    pub amount: String,
    pub offer_id: String,
    pub redemption_method_id: String,
    pub verifier: Verifier,
    pub variant_id: Option<String>,
}

/// Orchestrates wallet login, balance lookup, swap pricing and redemption.
pub struct RedemptionService {
    config: AgentConfig,
    deps: Collaborators,
    address_retry: RetryPolicy,
    session: Mutex<RedemptionSession>,
    /// Held for the whole of an `execute_*` call so redemptions never interleave.
    redeem_lock: Mutex<()>,
}

impl RedemptionService {
    pub fn new(config: AgentConfig, deps: Collaborators) -> Self {
        Self {
            config,
            deps,
            address_retry: WALLET_ADDRESS_RETRY,
            session: Mutex::new(RedemptionSession::default()),
            redeem_lock: Mutex::new(()),
        }
    }

    /// Override the wallet-address retry policy.
    pub fn with_address_retry(mut self, policy: RetryPolicy) -> Self {
        self.address_retry = policy;
        self
    }

    fn wallet(&self) -> Result<&Arc<dyn WalletAdapter>, AgentError> {
        self.deps
            .wallet
            .as_ref()
            .ok_or_else(AgentError::magic_not_configured)
    }

    async fn set_stage(&self, stage: RedemptionStage) {
        tracing::debug!(?stage, "redemption stage");
        self.session.lock().await.stage = stage;
    }

    async fn token(&self) -> Result<String, AgentError> {
        self.session
            .lock()
            .await
            .token
            .clone()
            .ok_or_else(AgentError::token_missing)
    }

    pub async fn stage(&self) -> RedemptionStage {
        self.session.lock().await.stage
    }

    // ── Identity ────────────────────────────────────────────────────────

    /// Explicitly set email, else the one from static configuration.
    pub async fn email(&self) -> Option<String> {
        self.session
            .lock()
            .await
            .email
            .clone()
            .or_else(|| self.config.user_email.clone())
    }

    pub async fn set_email(&self, email: &str) {
        self.session.lock().await.email = Some(email.trim().to_string());
    }

    /// Whether the wallet SDK reports a live session. Adapter errors read as `false`.
    pub async fn is_authenticated(&self) -> bool {
        let Ok(wallet) = self.wallet() else {
            return false;
        };
        match wallet.is_logged_in().await {
            Ok(logged_in) => logged_in,
            Err(e) => {
                tracing::warn!(error = %e, "wallet session check failed");
                false
            }
        }
    }

    /// Make sure the wallet session belongs to `email`, logging in again if not.
    ///
    /// A fresh login drops the ME protocol token, cached balances and the
    /// current order, so [`login_to_me_protocol`](Self::login_to_me_protocol)
    /// must run again afterwards.
    pub async fn ensure_magic_login(&self, email: &str) -> Result<(), AgentError> {
        let wallet = self.wallet()?.clone();
        self.set_stage(RedemptionStage::LoggingInWallet).await;

        let logged_in = match wallet.is_logged_in().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "wallet session check failed, treating as logged out");
                false
            }
        };

        if logged_in {
            match wallet.user_metadata().await {
                Ok(meta)
                    if meta
                        .email
                        .as_deref()
                        .is_some_and(|current| emails_match(current, email)) =>
                {
                    self.session.lock().await.magic_logged_in = true;
                    return Ok(());
                }
                Ok(_) => {
                    tracing::info!("wallet session belongs to another email, logging in again");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "could not verify wallet session, logging in again");
                }
            }
            if let Err(e) = wallet.logout().await {
                tracing::warn!(error = %e, "wallet logout failed");
            }
        }

        // A new wallet identity invalidates everything obtained under the old one.
        self.forget_identity().await;
        wallet.login_with_email_otp(email.trim()).await.map_err(|e| {
            tracing::error!(error = %e, "wallet login failed");
            AgentError::Auth(format!("Failed to login with Magic Link: {e}"))
        })?;

        self.session.lock().await.magic_logged_in = true;
        Ok(())
    }

    async fn forget_identity(&self) {
        let mut session = self.session.lock().await;
        if session.token.is_some() {
            tracing::info!("dropping ME protocol session of previous wallet identity");
        }
        session.magic_logged_in = false;
        session.wallet_address = None;
        session.protocol_logged_in = false;
        session.token = None;
        session.balances.clear();
        session.current_order = None;
    }

    /// Wallet address of the logged-in user, cached after the first lookup.
    pub async fn wallet_address(&self, force_refresh: bool) -> Result<Address, AgentError> {
        if !force_refresh {
            if let Some(address) = self.session.lock().await.wallet_address {
                return Ok(address);
            }
        }

        let wallet = self.wallet()?.clone();
        if !self.is_authenticated().await {
            return Err(AgentError::Wallet("user is not logged in".to_string()));
        }

        let address = retry(self.address_retry, "wallet address", |_| {
            let wallet = wallet.clone();
            async move {
                wallet
                    .user_metadata()
                    .await?
                    .public_address
                    .ok_or_else(|| AgentError::Wallet("wallet has no public address yet".to_string()))
            }
        })
        .await
        .map_err(|e| AgentError::WalletAddress {
            attempts: e.attempts,
            last: e.last.to_string(),
        })?;

        self.session.lock().await.wallet_address = Some(address);
        Ok(address)
    }

    /// Exchange (email, wallet address) for a ME protocol bearer token.
    pub async fn login_to_me_protocol(&self) -> Result<(), AgentError> {
        let email = self.email().await.ok_or_else(|| {
            AgentError::Config("An email is required to login to ME protocol".to_string())
        })?;
        self.set_stage(RedemptionStage::LoggingInProtocol).await;

        let address = self.wallet_address(true).await?;
        let data = self.deps.api.login(&email, &format!("{address:#x}")).await?;

        match (data.user, data.token) {
            (Some(_), Some(token)) if !token.is_empty() => {
                let mut session = self.session.lock().await;
                session.protocol_logged_in = true;
                session.token = Some(token);
                tracing::info!(wallet = %address, "logged in to ME protocol");
                Ok(())
            }
            _ => Err(AgentError::Auth("Login failed.".to_string())),
        }
    }

    pub async fn is_logged_in_to_protocol(&self) -> bool {
        self.session.lock().await.protocol_logged_in
    }

    // ── Balances & pricing ──────────────────────────────────────────────

    /// Fetch and cache the user's reward balances.
    pub async fn fetch_balances(&self) -> Result<Vec<RewardBalance>, AgentError> {
        let token = self.token().await?;
        self.set_stage(RedemptionStage::FetchingBalances).await;
        let address = self.wallet_address(false).await?;

        let balances = self
            .deps
            .api
            .balances(&token, &format!("{address:#x}"))
            .await?;
        tracing::info!(count = balances.len(), "fetched reward balances");
        self.session.lock().await.balances = balances.clone();
        Ok(balances)
    }

    /// Balances from the last [`fetch_balances`](Self::fetch_balances).
    pub async fn balances(&self) -> Vec<RewardBalance> {
        self.session.lock().await.balances.clone()
    }

    /// Price `offer` in units of the selected reward.
    pub async fn calculate_swap_amount(
        &self,
        selected_reward_address: &str,
        offer: &OfferDetail,
        selected_variant_id: Option<&str>,
    ) -> Result<SwapAmount, AgentError> {
        let token = self.token().await?;
        self.set_stage(RedemptionStage::CalculatingSwap).await;
        let address = self.wallet_address(false).await?;

        let request = SwapAmountRequest {
            wallet_address: format!("{address:#x}"),
            input_reward_address: selected_reward_address.to_string(),
            output_reward_address: offer.reward.contract_address.clone(),
            redemption_method_id: offer.redemption_method.id.clone(),
            offer_id: offer.id.clone(),
            variant_id: offer.resolve_variant_id(selected_variant_id),
            brand_id: offer.brand.id.clone(),
        };
        self.deps.api.swap_amount(&token, &request).await
    }

    pub fn can_afford_offer(reward: &RewardBalance, amount_needed: f64) -> bool {
        reward.balance >= amount_needed
    }

    // ── Redemption ──────────────────────────────────────────────────────

    /// Spend a reward on an offer of the same brand.
    pub async fn execute_same_brand_redemption(
        &self,
        request: SameBrandRedemption,
    ) -> Result<Order, AgentError> {
        let _guard = self.redeem_lock.lock().await;
        let result = self.same_brand(&request).await;
        self.finish(&result).await;
        result
    }

    async fn same_brand(&self, request: &SameBrandRedemption) -> Result<Order, AgentError> {
        validate_amount("amount", &request.amount)?;
        let reward = parse_address("reward address", &request.reward_address)?;
        let token = self.token().await?;

        self.set_stage(RedemptionStage::SigningTx).await;
        let signer = self.wallet()?.signer()?;
        let amount = to_wei("amount", &request.amount)?;

        let signed = self
            .deps
            .runtime
            .same_brand_reward_redemption(
                reward,
                amount,
                self.config.chain.chain_id,
                &signer,
                &self.config.runtime_url,
            )
            .await?;

        self.set_stage(RedemptionStage::PushingTx).await;
        let pushed = self.deps.api.push_transaction(&token, &signed).await?;
        tracing::info!(tx = %signed.hash, offer = %request.offer_id, "same-brand spend pushed");

        let task_id = pushed
            .result
            .hash
            .clone()
            .unwrap_or_else(|| signed.hash.clone());
        let result = self
            .process_order(ProcessOrder {
                spend_data: pushed.result.clone(),
                task_id,
                reward_id: request.reward_id.clone(),
                amount: request.amount.clone(),
                offer_id: request.offer_id.clone(),
                redemption_method_id: request.redemption_method_id.clone(),
                verifier: Verifier::Runtime,
                variant_id: request.variant_id.clone(),
            })
            .await;

        self.refund_on_failure(&token, &pushed.result, result).await
    }

    /// Swap a reward of another brand into the offer brand's reward and redeem it.
    ///
    /// The wallet address must already be cached (see
    /// [`wallet_address`](Self::wallet_address)); this call does not look it up.
    pub async fn execute_cross_brand_redemption(
        &self,
        request: CrossBrandRedemption,
    ) -> Result<Order, AgentError> {
        let _guard = self.redeem_lock.lock().await;
        let result = self.cross_brand(&request).await;
        self.finish(&result).await;
        result
    }

    async fn cross_brand(&self, request: &CrossBrandRedemption) -> Result<Order, AgentError> {
        validate_amount("amount", &request.amount)?;
        validate_amount("needed amount", &request.needed_amount)?;
        let wallet_address = self.session.lock().await.wallet_address.ok_or_else(|| {
            AgentError::Config("Wallet address not available. Please login first.".to_string())
        })?;
        let reward = parse_address("reward address", &request.reward_address)?;
        let brand_reward = parse_address("brand reward address", &request.brand_reward_address)?;
        let diamond = self.config.chain.diamond_address.ok_or_else(|| {
            AgentError::Config("Diamond contract address is not configured".to_string())
        })?;
        let token = self.token().await?;

        self.set_stage(RedemptionStage::SigningTx).await;
        let signer = self.wallet()?.signer()?;
        let amount = to_wei("amount", &request.amount)?;
        let needed = to_wei("needed amount", &request.needed_amount)?;

        let spend_info = SpendInfo {
            rewardAtHand: reward,
            targetedReward: brand_reward,
            amountOfRewardAtHand: amount,
            expectedAmountOfTargetedReward: needed,
        };

        let signed = self
            .deps
            .runtime
            .spend_reward(
                reward,
                amount,
                diamond,
                self.config.chain.chain_id,
                &signer,
                &self.config.runtime_url,
            )
            .await?;

        self.set_stage(RedemptionStage::PushingTx).await;
        let pushed = self.deps.api.push_transaction(&token, &signed).await?;
        tracing::info!(tx = %signed.hash, offer = %request.offer_id, "cross-brand spend pushed");

        let settle = async {
            self.set_stage(RedemptionStage::BuildingPermit).await;
            let vault_params = VaultParams::from_spend_data(&pushed.result)?;
            let data = self
                .deps
                .protocol
                .spend_rewards_on_another_brand_with_vault_permit(
                    &spend_info,
                    &vault_params,
                    diamond,
                    &self.config.chain.rpc_url,
                )
                .await?
                .ok_or_else(|| {
                    AgentError::Chain("vault-permit spend returned no transaction data".to_string())
                })?;

            self.set_stage(RedemptionStage::Relaying).await;
            let ctx = RelayContext {
                api_key: self.config.public_key.clone(),
                api_v1_url: self.config.api_v1_url.clone(),
                relay_api_key: self.config.gelato_api_key.clone(),
                rpc_url: self.config.chain.rpc_url.clone(),
                chain_id: self.config.chain.chain_id,
                diamond,
                brand_id: request.brand_id.clone(),
            };
            let call = RelayCall {
                from: wallet_address,
                to: diamond,
                data,
            };
            let task = self.deps.relayer.relay(&call, &signer, &ctx).await?;

            self.process_order(ProcessOrder {
                spend_data: pushed.result.clone(),
                task_id: task.task_id,
                reward_id: request.reward_id.clone(),
                amount: request.amount.clone(),
                offer_id: request.offer_id.clone(),
                redemption_method_id: request.redemption_method_id.clone(),
                verifier: Verifier::Gelato,
                variant_id: request.variant_id.clone(),
            })
            .await
        };
        let result = settle.await;

        self.refund_on_failure(&token, &pushed.result, result).await
    }

    /// Refund a pushed spend if the rest of the pipeline failed.
    ///
    /// The original error is always returned; refund failures are only logged.
    async fn refund_on_failure(
        &self,
        token: &str,
        spend: &SpendData,
        result: Result<Order, AgentError>,
    ) -> Result<Order, AgentError> {
        let err = match result {
            Ok(order) => return Ok(order),
            Err(e) => e,
        };

        self.set_stage(RedemptionStage::Refunding).await;
        tracing::warn!(error = %err, "redemption failed after spend was pushed, refunding");
        match self.deps.api.refund_task(token, spend).await {
            Ok(()) => tracing::info!("pushed spend refunded"),
            Err(refund_err) => {
                tracing::error!(error = %refund_err, original = %err, "refund failed")
            }
        }
        Err(err)
    }

    async fn finish(&self, result: &Result<Order, AgentError>) {
        match result {
            Ok(order) => {
                tracing::info!(order = %order.id, "redemption complete");
                self.set_stage(RedemptionStage::Complete).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "redemption failed");
                self.set_stage(RedemptionStage::Failed).await;
            }
        }
    }

    /// Turn a pushed spend into an order and remember it as the current order.
    pub async fn process_order(&self, request: ProcessOrder) -> Result<Order, AgentError> {
        let token = self.token().await?;
        self.set_stage(RedemptionStage::ProcessingOrder).await;

        let body = ProcessOrderRequest {
            task_id: request.task_id,
            target_reward_id: request.reward_id.clone(),
            reward_id: request.reward_id,
            verifier: request.verifier,
            spend_data: request.spend_data,
            offer_id: request.offer_id,
            amount: request.amount,
            redemption_method_id: request.redemption_method_id,
            offer_variants: request.variant_id.into_iter().collect(),
        };

        let order = self.deps.api.process_order(&token, &body).await?;
        tracing::info!(order = %order.id, verifier = ?body.verifier, "order processed");
        self.session.lock().await.current_order = Some(order.clone());
        Ok(order)
    }

    /// Checkout URL applying the current order's coupon to a product variant.
    pub async fn checkout_url(
        &self,
        brand_id: &str,
        product_variant_id_on_brand_site: &str,
    ) -> Result<String, AgentError> {
        let order = self
            .session
            .lock()
            .await
            .current_order
            .clone()
            .ok_or_else(AgentError::no_order)?;
        let token = self.token().await?;

        let request = CheckoutUrlRequest {
            brand_id: brand_id.to_string(),
            discount_code: order.coupon.code,
            product_variant_id_on_brand_site: product_variant_id_on_brand_site.to_string(),
        };
        self.deps.api.checkout_url(&token, &request).await
    }

    // ── Accessors & resets ──────────────────────────────────────────────

    pub async fn current_order(&self) -> Option<Order> {
        self.session.lock().await.current_order.clone()
    }

    pub async fn clear_current_order(&self) {
        self.session.lock().await.current_order = None;
    }

    /// Drop cached balances and wallet address.
    pub async fn clear_cache(&self) {
        let mut session = self.session.lock().await;
        session.balances.clear();
        session.wallet_address = None;
    }

    pub async fn clear_wallet_address_cache(&self) {
        self.session.lock().await.wallet_address = None;
    }

    /// Reset everything, including the protocol token. Used when the SDK handle is destroyed.
    pub async fn reset(&self) {
        *self.session.lock().await = RedemptionSession::default();
    }

    /// Wallet sessions outlive SDK logout, so this does nothing.
    pub async fn logout(&self) {}
}

/// Reject anything that is not a finite decimal number.
fn validate_amount(field: &str, raw: &str) -> Result<(), AgentError> {
    let trimmed = raw.trim();
    match trimmed.parse::<f64>() {
        Ok(v) if !trimmed.is_empty() && v.is_finite() => Ok(()),
        _ => Err(AgentError::Validation(format!(
            "Invalid {field}: expected a numeric string, got {raw:?}"
        ))),
    }
}

/// Parse a decimal amount into 18-decimal base units.
fn to_wei(field: &str, raw: &str) -> Result<U256, AgentError> {
    match parse_units(raw.trim(), REWARD_DECIMALS) {
        Ok(ParseUnits::U256(value)) => Ok(value),
        Ok(ParseUnits::I256(_)) => Err(AgentError::Validation(format!(
            "Invalid {field}: must not be negative"
        ))),
        Err(e) => Err(AgentError::Validation(format!("Invalid {field}: {e}"))),
    }
}

fn parse_address(field: &str, raw: &str) -> Result<Address, AgentError> {
    Address::from_str(raw.trim())
        .map_err(|e| AgentError::Validation(format!("Invalid {field}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Reward;

    fn balance(amount: f64) -> RewardBalance {
        RewardBalance {
            reward: Reward {
                id: "r1".to_string(),
                contract_address: "0xabc".to_string(),
                symbol: "SYM".to_string(),
                name: "Sym".to_string(),
                image: None,
            },
            balance: amount,
        }
    }

    #[test]
    fn test_can_afford_offer() {
        assert!(RedemptionService::can_afford_offer(&balance(10.0), 10.0));
        assert!(!RedemptionService::can_afford_offer(&balance(9.99), 10.0));
    }

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount("amount", "20").is_ok());
        assert!(validate_amount("amount", " 0.5 ").is_ok());
        assert!(validate_amount("amount", "").is_err());
        assert!(validate_amount("amount", "abc").is_err());
        assert!(validate_amount("amount", "inf").is_err());
        assert!(validate_amount("amount", "NaN").is_err());
    }

    #[test]
    fn test_to_wei_uses_18_decimals() {
        let one = U256::from(10u64).pow(U256::from(18u64));
        assert_eq!(to_wei("amount", "1").unwrap(), one);
        assert_eq!(to_wei("amount", "2.5").unwrap(), one * U256::from(5u64) / U256::from(2u64));
        assert!(to_wei("amount", "-1").is_err());
    }

    #[test]
    fn test_session_debug_redacts_token() {
        let session = RedemptionSession {
            token: Some("bearer-secret".to_string()),
            ..Default::default()
        };
        assert!(!format!("{session:?}").contains("bearer-secret"));
    }
}
