#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actix_web::{web, App, HttpResponse, HttpServer};
use alloy::primitives::{Address, Bytes, U256};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use serde_json::{json, Value};

use me_agent::protocol::{
    DiamondProtocol, ProtocolCore, RelayCall, RelayContext, RelayTask, Relayer, SpendInfo,
    VaultParams,
};
use me_agent::retry::RetryPolicy;
use me_agent::runtime::{ChainRuntime, Eip712Runtime};
use me_agent::types::{
    CheckoutUrlRequest, Coupon, LoginData, OfferDetail, Order, ProcessOrderRequest,
    PushTransactionResult, Reward, RewardBalance, SignedTransaction, SpendData, SwapAmount,
    SwapAmountRequest,
};
use me_agent::{
    AgentConfig, AgentError, Collaborators, DynSigner, Environment, Network, ProtocolApi,
    RedemptionService, UserMetadata, WalletAdapter,
};

pub const OFFER_REWARD: &str = "0x1111111111111111111111111111111111111111";
pub const OTHER_REWARD: &str = "0x4444444444444444444444444444444444444444";
pub const DIAMOND: &str = "0xdddddddddddddddddddddddddddddddddddddddd";
pub const EMAIL: &str = "alice@example.com";

/// Shared, ordered record of every collaborator call.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.starts_with(prefix))
    }
}

// ── Wallet ──────────────────────────────────────────────────────────────

pub struct MockWallet {
    log: CallLog,
    signer: PrivateKeySigner,
    session: Mutex<Option<String>>,
    pub metadata_calls: AtomicU32,
    pub address_available: AtomicBool,
    pub fail_login: AtomicBool,
}

impl MockWallet {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            signer: PrivateKeySigner::random(),
            session: Mutex::new(None),
            metadata_calls: AtomicU32::new(0),
            address_available: AtomicBool::new(true),
            fail_login: AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }
}

#[async_trait]
impl WalletAdapter for MockWallet {
    async fn init(&self) -> Result<(), AgentError> {
        self.log.push("wallet.init");
        Ok(())
    }

    async fn is_logged_in(&self) -> Result<bool, AgentError> {
        Ok(self.session.lock().unwrap().is_some())
    }

    async fn user_metadata(&self) -> Result<UserMetadata, AgentError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        let email = self.session.lock().unwrap().clone();
        let public_address = self
            .address_available
            .load(Ordering::SeqCst)
            .then(|| self.signer.address());
        Ok(UserMetadata {
            public_address,
            email,
        })
    }

    async fn login_with_email_otp(&self, email: &str) -> Result<String, AgentError> {
        self.log.push(format!("wallet.login:{email}"));
        if self.fail_login.load(Ordering::SeqCst) {
            return Err(AgentError::Wallet("otp expired".to_string()));
        }
        *self.session.lock().unwrap() = Some(email.to_string());
        Ok("did-token".to_string())
    }

    async fn logout(&self) -> Result<(), AgentError> {
        self.log.push("wallet.logout");
        *self.session.lock().unwrap() = None;
        Ok(())
    }

    fn signer(&self) -> Result<DynSigner, AgentError> {
        Ok(Arc::new(self.signer.clone()))
    }
}

// ── Backend ─────────────────────────────────────────────────────────────

pub struct MockApi {
    log: CallLog,
    pub token: Mutex<Option<String>>,
    pub balances: Mutex<Vec<RewardBalance>>,
    pub swap: Mutex<SwapAmount>,
    pub fail_process_order: AtomicBool,
    pub fail_refund: AtomicBool,
    pub swap_requests: Mutex<Vec<SwapAmountRequest>>,
    pub process_requests: Mutex<Vec<ProcessOrderRequest>>,
    pub checkout_requests: Mutex<Vec<CheckoutUrlRequest>>,
    pub refunds: Mutex<Vec<SpendData>>,
}

impl MockApi {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            token: Mutex::new(Some("jwt-token".to_string())),
            balances: Mutex::new(vec![balance(OFFER_REWARD, "r-offer", 50.0)]),
            swap: Mutex::new(SwapAmount {
                amount: 20.0,
                amount_needed: 20.0,
                check_affordability: true,
            }),
            fail_process_order: AtomicBool::new(false),
            fail_refund: AtomicBool::new(false),
            swap_requests: Mutex::new(Vec::new()),
            process_requests: Mutex::new(Vec::new()),
            checkout_requests: Mutex::new(Vec::new()),
            refunds: Mutex::new(Vec::new()),
        }
    }
}

/// Spend record as the push endpoint returns it.
pub fn pushed_spend() -> SpendData {
    serde_json::from_value(json!({
        "hash": "0xspendhash",
        "owner": "0x5555555555555555555555555555555555555555",
        "count": 1,
        "globalHash": format!("0x{}", "aa".repeat(32)),
        "prefixedHash": format!("0x{}", "bb".repeat(32)),
        "sig": format!("0x{}{}1b", "01".repeat(32), "02".repeat(32)),
        "reward": OFFER_REWARD,
        "spender": DIAMOND,
        "value": "20000000000000000000",
        "vaultId": "vault-7"
    }))
    .unwrap()
}

#[async_trait]
impl ProtocolApi for MockApi {
    async fn login(&self, email: &str, wallet_address: &str) -> Result<LoginData, AgentError> {
        self.log.push(format!("api.login:{email}:{wallet_address}"));
        let token = self.token.lock().unwrap().clone();
        Ok(LoginData {
            user: token.as_ref().map(|_| json!({ "id": "user-1" })),
            token,
        })
    }

    async fn balances(
        &self,
        _token: &str,
        wallet_address: &str,
    ) -> Result<Vec<RewardBalance>, AgentError> {
        self.log.push(format!("api.balances:{wallet_address}"));
        Ok(self.balances.lock().unwrap().clone())
    }

    async fn swap_amount(
        &self,
        _token: &str,
        request: &SwapAmountRequest,
    ) -> Result<SwapAmount, AgentError> {
        self.log.push("api.swap_amount");
        self.swap_requests.lock().unwrap().push(request.clone());
        Ok(self.swap.lock().unwrap().clone())
    }

    async fn push_transaction(
        &self,
        _token: &str,
        _tx: &SignedTransaction,
    ) -> Result<PushTransactionResult, AgentError> {
        self.log.push("api.push");
        Ok(PushTransactionResult {
            result: pushed_spend(),
        })
    }

    async fn refund_task(&self, _token: &str, spend: &SpendData) -> Result<(), AgentError> {
        self.log.push("api.refund");
        self.refunds.lock().unwrap().push(spend.clone());
        if self.fail_refund.load(Ordering::SeqCst) {
            return Err(AgentError::Api("refund service down".to_string()));
        }
        Ok(())
    }

    async fn process_order(
        &self,
        _token: &str,
        request: &ProcessOrderRequest,
    ) -> Result<Order, AgentError> {
        self.log.push("api.process_order");
        self.process_requests.lock().unwrap().push(request.clone());
        if self.fail_process_order.load(Ordering::SeqCst) {
            return Err(AgentError::Api("order rejected".to_string()));
        }
        Ok(Order {
            id: "order-1".to_string(),
            coupon: Coupon {
                code: "SAVE20".to_string(),
                discount_value: Some(20.0),
            },
        })
    }

    async fn checkout_url(
        &self,
        _token: &str,
        request: &CheckoutUrlRequest,
    ) -> Result<String, AgentError> {
        self.log.push("api.checkout_url");
        self.checkout_requests.lock().unwrap().push(request.clone());
        Ok(format!(
            "https://shop.example/cart/{}?discount={}",
            request.product_variant_id_on_brand_site, request.discount_code
        ))
    }
}

// ── Chain runtime & protocol core ───────────────────────────────────────

/// Records runtime calls and signs them with the real EIP-712 runtime.
pub struct MockRuntime {
    log: CallLog,
    inner: Eip712Runtime,
}

impl MockRuntime {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            inner: Eip712Runtime::new(),
        }
    }
}

#[async_trait]
impl ChainRuntime for MockRuntime {
    async fn same_brand_reward_redemption(
        &self,
        reward: Address,
        amount: U256,
        chain_id: u64,
        signer: &DynSigner,
        runtime_url: &str,
    ) -> Result<SignedTransaction, AgentError> {
        self.log.push(format!("runtime.same_brand:{amount}"));
        self.inner
            .same_brand_reward_redemption(reward, amount, chain_id, signer, runtime_url)
            .await
    }

    async fn spend_reward(
        &self,
        reward: Address,
        amount: U256,
        diamond: Address,
        chain_id: u64,
        signer: &DynSigner,
        runtime_url: &str,
    ) -> Result<SignedTransaction, AgentError> {
        self.log.push(format!("runtime.spend_reward:{amount}"));
        self.inner
            .spend_reward(reward, amount, diamond, chain_id, signer, runtime_url)
            .await
    }
}

/// Records permit builds; encodes with the real diamond encoder unless `no_data` is set.
pub struct MockProtocol {
    log: CallLog,
    inner: DiamondProtocol,
    pub no_data: AtomicBool,
    pub spends: Mutex<Vec<SpendInfo>>,
}

impl MockProtocol {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            inner: DiamondProtocol::new(),
            no_data: AtomicBool::new(false),
            spends: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ProtocolCore for MockProtocol {
    async fn spend_rewards_on_another_brand_with_vault_permit(
        &self,
        spend_info: &SpendInfo,
        vault_params: &VaultParams,
        diamond: Address,
        rpc_url: &str,
    ) -> Result<Option<Bytes>, AgentError> {
        self.log.push("protocol.permit");
        self.spends.lock().unwrap().push(spend_info.clone());
        if self.no_data.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner
            .spend_rewards_on_another_brand_with_vault_permit(
                spend_info,
                vault_params,
                diamond,
                rpc_url,
            )
            .await
    }
}

// ── Relay ───────────────────────────────────────────────────────────────

pub struct MockRelayer {
    log: CallLog,
    pub fail: AtomicBool,
    pub calls: Mutex<Vec<RelayCall>>,
}

impl MockRelayer {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            fail: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Relayer for MockRelayer {
    async fn relay(
        &self,
        call: &RelayCall,
        _signer: &DynSigner,
        ctx: &RelayContext,
    ) -> Result<RelayTask, AgentError> {
        self.log.push(format!("relay:{}", ctx.brand_id));
        self.calls.lock().unwrap().push(call.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(AgentError::Relay("sponsor balance too low".to_string()));
        }
        Ok(RelayTask {
            task_id: "gelato-task-1".to_string(),
        })
    }
}

// ── Fixtures ────────────────────────────────────────────────────────────

pub fn balance(address: &str, id: &str, amount: f64) -> RewardBalance {
    RewardBalance {
        reward: Reward {
            id: id.to_string(),
            contract_address: address.to_string(),
            symbol: "SYM".to_string(),
            name: "Symbol".to_string(),
            image: None,
        },
        balance: amount,
    }
}

pub fn offer_json() -> Value {
    json!({
        "id": "offer-1",
        "brand": { "id": "brand-1", "name": "Acme" },
        "reward": { "id": "r-offer", "contractAddress": OFFER_REWARD },
        "redemptionMethod": { "id": "method-1", "type": "FIXED_AMOUNT" },
        "offerVariants": [
            { "id": "ov-1", "variantId": "pv-1", "variant": { "id": "v-1", "price": "40.00", "name": "Default" } }
        ],
        "originalPrice": 40,
        "discountPercentage": "50"
    })
}

pub fn offer() -> OfferDetail {
    serde_json::from_value(offer_json()).unwrap()
}

pub fn config() -> AgentConfig {
    AgentConfig::new(Environment::Dev, Network::Sepolia, "pk_test")
        .with_user_email(EMAIL)
        .with_diamond_address(DIAMOND.parse().unwrap())
        .with_gelato_api_key("gelato-key")
}

pub struct Harness {
    pub log: CallLog,
    pub wallet: Arc<MockWallet>,
    pub api: Arc<MockApi>,
    pub runtime: Arc<MockRuntime>,
    pub protocol: Arc<MockProtocol>,
    pub relayer: Arc<MockRelayer>,
}

impl Harness {
    pub fn new() -> Self {
        let log = CallLog::default();
        Self {
            wallet: Arc::new(MockWallet::new(log.clone())),
            api: Arc::new(MockApi::new(log.clone())),
            runtime: Arc::new(MockRuntime::new(log.clone())),
            protocol: Arc::new(MockProtocol::new(log.clone())),
            relayer: Arc::new(MockRelayer::new(log.clone())),
            log,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            wallet: Some(self.wallet.clone()),
            api: self.api.clone(),
            runtime: self.runtime.clone(),
            protocol: self.protocol.clone(),
            relayer: self.relayer.clone(),
        }
    }

    pub fn service_with(&self, config: AgentConfig) -> RedemptionService {
        RedemptionService::new(config, self.collaborators())
            .with_address_retry(RetryPolicy::fixed(3, Duration::from_millis(1)))
    }

    pub fn service(&self) -> RedemptionService {
        self.service_with(config())
    }
}

/// Serve `offer` from `GET /offer/sdk/code/{code}` after `delay`; returns the base URL.
pub fn spawn_catalog(offer: Value, delay: Duration) -> String {
    let offer = web::Data::new(offer);
    let server = HttpServer::new(move || {
        App::new().app_data(offer.clone()).route(
            "/offer/sdk/code/{code}",
            web::get().to(move |offer: web::Data<Value>| async move {
                actix_rt::time::sleep(delay).await;
                HttpResponse::Ok().json(json!({ "data": offer.get_ref() }))
            }),
        )
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();
    let addr = server.addrs()[0];
    actix_rt::spawn(server.run());
    format!("http://{addr}/")
}
