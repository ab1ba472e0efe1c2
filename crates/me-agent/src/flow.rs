//! Headless redemption flow for a single offer.
//!
//! Drives [`RedemptionService`] the way an offer detail panel would: load the
//! offer and the visitor's balances, pick a reward, price the swap, redeem,
//! and finally turn the coupon into a checkout link. Rendering is left to the
//! caller, which observes [`RedemptionView`].

use std::sync::{Arc, Mutex};

use futures::future::{AbortHandle, Abortable};

use crate::catalog::CatalogClient;
use crate::error::AgentError;
use crate::redemption::{CrossBrandRedemption, RedemptionService, SameBrandRedemption};
use crate::types::{OfferDetail, Order, RewardBalance, SwapAmount};

const INSUFFICIENT_BALANCE: &str = "Insufficient balance";
const NO_REWARDS: &str = "No rewards available";

/// Pricing state of the current selection.
#[derive(Debug, Clone, PartialEq)]
pub enum SwapStatus {
    /// Not yet computed for the current selection.
    Pending,
    Ready(SwapAmount),
    Failed(String),
}

/// Reward and variant a swap amount was computed for.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SwapKey {
    reward_address: String,
    variant_id: Option<String>,
}

/// Review screen: the offer, the visitor's rewards and the priced swap.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewState {
    pub offer: OfferDetail,
    pub balances: Vec<RewardBalance>,
    pub selected_reward: RewardBalance,
    pub selected_variant: Option<String>,
    pub swap: SwapStatus,
    pub redeem_enabled: bool,
    /// Why redeem is disabled, if it is.
    pub message: Option<String>,
    swap_key: Option<SwapKey>,
}

impl ReviewState {
    fn current_key(&self) -> SwapKey {
        SwapKey {
            reward_address: self.selected_reward.reward.contract_address.clone(),
            variant_id: self.selected_variant.clone(),
        }
    }

    fn invalidate_swap(&mut self) {
        self.swap = SwapStatus::Pending;
        self.swap_key = None;
        self.redeem_enabled = false;
        self.message = None;
    }

    /// Whether redeeming spends the offer brand's own reward.
    pub fn is_same_brand(&self) -> bool {
        self.selected_reward
            .reward
            .contract_address
            .eq_ignore_ascii_case(&self.offer.reward.contract_address)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum RedemptionView {
    #[default]
    Idle,
    Loading,
    Review(ReviewState),
    Redeeming,
    Complete(Order),
    Error {
        message: String,
        retryable: bool,
    },
}

/// Cancels an in-flight [`RedemptionFlow::load_offer`] from another task.
#[derive(Debug, Clone, Default)]
pub struct LoadCanceller {
    current: Arc<Mutex<Option<AbortHandle>>>,
}

impl LoadCanceller {
    pub fn cancel(&self) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = current.take() {
            tracing::debug!("cancelling offer load");
            handle.abort();
        }
    }

    fn arm(&self, handle: AbortHandle) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    fn disarm(&self) {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

pub struct RedemptionFlow {
    service: Arc<RedemptionService>,
    catalog: Arc<CatalogClient>,
    view: RedemptionView,
    offer: Option<OfferDetail>,
    canceller: LoadCanceller,
}

impl RedemptionFlow {
    pub fn new(service: Arc<RedemptionService>, catalog: Arc<CatalogClient>) -> Self {
        Self {
            service,
            catalog,
            view: RedemptionView::Idle,
            offer: None,
            canceller: LoadCanceller::default(),
        }
    }

    pub fn view(&self) -> &RedemptionView {
        &self.view
    }

    pub fn review(&self) -> Option<&ReviewState> {
        match &self.view {
            RedemptionView::Review(review) => Some(review),
            _ => None,
        }
    }

    /// Handle that aborts the running `load_offer`, usable from other tasks.
    pub fn canceller(&self) -> LoadCanceller {
        self.canceller.clone()
    }

    pub fn cancel_loading(&self) {
        self.canceller.cancel();
    }

    /// Load an offer by code, log the visitor in and price the default reward.
    ///
    /// `email` overrides the service's current email when given.
    pub async fn load_offer(
        &mut self,
        code: &str,
        email: Option<&str>,
    ) -> Result<&ReviewState, AgentError> {
        self.view = RedemptionView::Loading;

        let (handle, registration) = AbortHandle::new_pair();
        self.canceller.arm(handle);
        let loading = Abortable::new(
            prepare_review(
                self.service.clone(),
                self.catalog.clone(),
                code.to_string(),
                email.map(str::to_string),
            ),
            registration,
        );
        let outcome = loading.await;
        self.canceller.disarm();

        match outcome {
            Err(_aborted) => {
                tracing::info!(code, "offer load cancelled");
                self.view = RedemptionView::Idle;
                Err(AgentError::Cancelled)
            }
            Ok(Err(e)) => {
                tracing::warn!(code, error = %e, "offer load failed");
                self.view = RedemptionView::Error {
                    message: e.to_string(),
                    retryable: true,
                };
                Err(e)
            }
            Ok(Ok(review)) => {
                self.offer = Some(review.offer.clone());
                self.view = RedemptionView::Review(review);
                self.refresh_swap().await?;
                self.review().ok_or_else(no_review)
            }
        }
    }

    /// Recompute the swap amount for the current selection.
    ///
    /// A failed calculation is recorded on the review (redeem disabled), not returned.
    pub async fn refresh_swap(&mut self) -> Result<(), AgentError> {
        let RedemptionView::Review(review) = &mut self.view else {
            return Err(no_review());
        };
        review.invalidate_swap();
        let key = review.current_key();

        let result = self
            .service
            .calculate_swap_amount(
                &key.reward_address,
                &review.offer,
                key.variant_id.as_deref(),
            )
            .await;

        match result {
            Ok(swap) => {
                let affordable = swap.check_affordability
                    && RedemptionService::can_afford_offer(&review.selected_reward, swap.amount);
                review.redeem_enabled = affordable;
                review.message = (!affordable).then(|| INSUFFICIENT_BALANCE.to_string());
                tracing::info!(
                    reward = %key.reward_address,
                    amount = swap.amount,
                    affordable,
                    "swap amount calculated"
                );
                review.swap = SwapStatus::Ready(swap);
            }
            Err(e) => {
                tracing::warn!(error = %e, "swap amount calculation failed");
                let message = e.to_string();
                review.redeem_enabled = false;
                review.message = Some(message.clone());
                review.swap = SwapStatus::Failed(message);
            }
        }
        review.swap_key = Some(key);
        Ok(())
    }

    /// Switch to another held reward. The swap must be refreshed before redeeming.
    pub fn select_reward(&mut self, contract_address: &str) -> Result<(), AgentError> {
        let RedemptionView::Review(review) = &mut self.view else {
            return Err(no_review());
        };
        let selected = review
            .balances
            .iter()
            .find(|b| b.reward.contract_address.eq_ignore_ascii_case(contract_address))
            .cloned()
            .ok_or_else(|| {
                AgentError::Validation(format!("No balance held for reward {contract_address}"))
            })?;
        review.selected_reward = selected;
        review.invalidate_swap();
        Ok(())
    }

    /// Switch the product variant. The swap must be refreshed before redeeming.
    pub fn select_variant(&mut self, variant_id: &str) -> Result<(), AgentError> {
        let RedemptionView::Review(review) = &mut self.view else {
            return Err(no_review());
        };
        let known = review
            .offer
            .offer_variants
            .iter()
            .any(|v| v.product_variant_id() == variant_id);
        if !known {
            return Err(AgentError::Validation(format!(
                "Offer {} has no variant {variant_id}",
                review.offer.id
            )));
        }
        review.selected_variant = Some(variant_id.to_string());
        review.invalidate_swap();
        Ok(())
    }

    /// Redeem the current selection at its priced swap amount.
    pub async fn handle_redemption(&mut self) -> Result<Order, AgentError> {
        let review = match std::mem::replace(&mut self.view, RedemptionView::Redeeming) {
            RedemptionView::Review(review) => review,
            other => {
                self.view = other;
                return Err(no_review());
            }
        };

        let fresh = match &review.swap {
            SwapStatus::Ready(swap) if review.swap_key.as_ref() == Some(&review.current_key()) => {
                Some(swap.clone())
            }
            _ => None,
        };
        let Some(swap) = fresh else {
            self.view = RedemptionView::Review(review);
            return Err(AgentError::Validation(
                "Swap amount is out of date, refresh it before redeeming".to_string(),
            ));
        };
        if !review.redeem_enabled {
            let message = review
                .message
                .clone()
                .unwrap_or_else(|| INSUFFICIENT_BALANCE.to_string());
            self.view = RedemptionView::Review(review);
            return Err(AgentError::Validation(message));
        }

        let offer = &review.offer;
        let reward = &review.selected_reward.reward;
        let result = if review.is_same_brand() {
            tracing::info!(offer = %offer.id, reward = %reward.contract_address, "redeeming same-brand offer");
            self.service
                .execute_same_brand_redemption(SameBrandRedemption {
                    reward_address: reward.contract_address.clone(),
                    reward_id: reward.id.clone(),
                    amount: swap.amount.to_string(),
                    offer_id: offer.id.clone(),
                    redemption_method_id: offer.redemption_method.id.clone(),
                    variant_id: review.selected_variant.clone(),
                })
                .await
        } else {
            tracing::info!(offer = %offer.id, reward = %reward.contract_address, "redeeming cross-brand offer");
            self.service
                .execute_cross_brand_redemption(CrossBrandRedemption {
                    reward_address: reward.contract_address.clone(),
                    reward_id: reward.id.clone(),
                    amount: swap.amount.to_string(),
                    needed_amount: swap.amount_needed.to_string(),
                    brand_reward_address: offer.reward.contract_address.clone(),
                    brand_id: offer.brand.id.clone(),
                    offer_id: offer.id.clone(),
                    redemption_method_id: offer.redemption_method.id.clone(),
                    variant_id: review.selected_variant.clone(),
                })
                .await
        };

        match result {
            Ok(order) => {
                self.view = RedemptionView::Complete(order.clone());
                Ok(order)
            }
            Err(e) => {
                self.view = RedemptionView::Error {
                    message: e.to_string(),
                    retryable: true,
                };
                Err(e)
            }
        }
    }

    /// Checkout link applying the redeemed coupon to a variant on the brand's store.
    pub async fn use_coupon(
        &self,
        product_variant_id_on_brand_site: &str,
    ) -> Result<String, AgentError> {
        let RedemptionView::Complete(_) = &self.view else {
            return Err(AgentError::no_order());
        };
        let brand_id = self
            .offer
            .as_ref()
            .map(|offer| offer.brand.id.as_str())
            .ok_or_else(no_review)?;
        self.service
            .checkout_url(brand_id, product_variant_id_on_brand_site)
            .await
    }
}

fn no_review() -> AgentError {
    AgentError::Validation("No offer is loaded for review".to_string())
}

async fn prepare_review(
    service: Arc<RedemptionService>,
    catalog: Arc<CatalogClient>,
    code: String,
    email: Option<String>,
) -> Result<ReviewState, AgentError> {
    let offer = catalog.offer_by_code(&code).await?;

    if let Some(email) = email.as_deref() {
        service.set_email(email).await;
    }
    let email = service
        .email()
        .await
        .ok_or_else(|| AgentError::Config("An email is required to redeem offers".to_string()))?;

    service.ensure_magic_login(&email).await?;
    service.login_to_me_protocol().await?;

    let balances = service.fetch_balances().await?;
    let selected_reward = balances
        .iter()
        .find(|b| {
            b.reward
                .contract_address
                .eq_ignore_ascii_case(&offer.reward.contract_address)
        })
        .or_else(|| balances.first())
        .cloned()
        .ok_or_else(|| AgentError::Validation(NO_REWARDS.to_string()))?;

    Ok(ReviewState {
        selected_variant: offer.resolve_variant_id(None),
        offer,
        balances,
        selected_reward,
        swap: SwapStatus::Pending,
        redeem_enabled: false,
        message: None,
        swap_key: None,
    })
}
