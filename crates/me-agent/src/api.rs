//! ME backend REST client for authentication, rewards and redemption.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::types::{
    ApiEnvelope, CheckoutUrlRequest, LoginData, Order, ProcessOrderRequest,
    PushTransactionResult, RewardBalance, SignedTransaction, SpendData, SwapAmount,
    SwapAmountRequest,
};

/// Backend endpoints the redemption core talks to.
#[async_trait]
pub trait ProtocolApi: Send + Sync {
    /// `POST auth/sdk/login`
    async fn login(&self, email: &str, wallet_address: &str) -> Result<LoginData, AgentError>;

    /// `GET reward/sdk/balances`
    async fn balances(
        &self,
        token: &str,
        wallet_address: &str,
    ) -> Result<Vec<RewardBalance>, AgentError>;

    /// `POST reward/sdk/swap-amount`
    async fn swap_amount(
        &self,
        token: &str,
        request: &SwapAmountRequest,
    ) -> Result<SwapAmount, AgentError>;

    /// `POST runtime/push-transaction`
    async fn push_transaction(
        &self,
        token: &str,
        tx: &SignedTransaction,
    ) -> Result<PushTransactionResult, AgentError>;

    /// `POST runtime/refund-task`
    async fn refund_task(&self, token: &str, spend: &SpendData) -> Result<(), AgentError>;

    /// `POST orders/sdk/process-order`
    async fn process_order(
        &self,
        token: &str,
        request: &ProcessOrderRequest,
    ) -> Result<Order, AgentError>;

    /// `POST {v1}order/shopify/checkout-url`
    async fn checkout_url(
        &self,
        token: &str,
        request: &CheckoutUrlRequest,
    ) -> Result<String, AgentError>;
}

/// Build the shared HTTP client from configuration.
pub fn http_client(config: &AgentConfig) -> Result<reqwest::Client, AgentError> {
    reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .map_err(|e| AgentError::Http(format!("failed to build HTTP client: {e}")))
}

/// Send a request and unwrap the backend's `{ "data": ... }` envelope.
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    what: &str,
) -> Result<T, AgentError> {
    let resp = request
        .send()
        .await
        .map_err(|e| AgentError::Http(format!("{what} request failed: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), what, "backend returned error status");
        return Err(AgentError::HttpStatus {
            status: status.as_u16(),
            body: body.chars().take(200).collect(),
        });
    }

    let envelope: ApiEnvelope<T> = resp
        .json()
        .await
        .map_err(|e| AgentError::Api(format!("{what} response parse failed: {e}")))?;
    Ok(envelope.data)
}

#[derive(Deserialize)]
struct OrderData {
    order: Order,
}

#[derive(Deserialize)]
struct UrlData {
    url: String,
}

/// reqwest implementation of [`ProtocolApi`].
pub struct MeApiClient {
    http: reqwest::Client,
    api_url: String,
    api_v1_url: String,
    public_key: String,
}

impl MeApiClient {
    pub fn new(http: reqwest::Client, config: &AgentConfig) -> Self {
        Self {
            http,
            api_url: config.api_url.clone(),
            api_v1_url: config.api_v1_url.clone(),
            public_key: config.public_key.clone(),
        }
    }

    fn authed(&self, request: reqwest::RequestBuilder, token: &str) -> reqwest::RequestBuilder {
        request
            .header("x-access-token", token)
            .header("Authorization", format!("Bearer {token}"))
            .header("x-public-key", &self.public_key)
    }

    fn post(&self, path: &str, token: &str) -> reqwest::RequestBuilder {
        self.authed(self.http.post(format!("{}{path}", self.api_url)), token)
    }
}

#[async_trait]
impl ProtocolApi for MeApiClient {
    async fn login(&self, email: &str, wallet_address: &str) -> Result<LoginData, AgentError> {
        let request = self
            .http
            .post(format!("{}auth/sdk/login", self.api_url))
            .header("x-public-key", &self.public_key)
            .json(&serde_json::json!({
                "walletAddress": wallet_address,
                "email": email,
            }));
        send_json(request, "login").await
    }

    async fn balances(
        &self,
        token: &str,
        wallet_address: &str,
    ) -> Result<Vec<RewardBalance>, AgentError> {
        let request = self.authed(
            self.http
                .get(format!("{}reward/sdk/balances", self.api_url))
                .query(&[("walletAddress", wallet_address)]),
            token,
        );
        send_json(request, "balances").await
    }

    async fn swap_amount(
        &self,
        token: &str,
        request: &SwapAmountRequest,
    ) -> Result<SwapAmount, AgentError> {
        send_json(self.post("reward/sdk/swap-amount", token).json(request), "swap amount").await
    }

    async fn push_transaction(
        &self,
        token: &str,
        tx: &SignedTransaction,
    ) -> Result<PushTransactionResult, AgentError> {
        let request = self
            .post("runtime/push-transaction", token)
            .json(&serde_json::json!({ "params": tx }));
        send_json(request, "push transaction").await
    }

    async fn refund_task(&self, token: &str, spend: &SpendData) -> Result<(), AgentError> {
        let resp = self
            .post("runtime/refund-task", token)
            .json(&serde_json::json!({ "spend_data": spend }))
            .send()
            .await
            .map_err(|e| AgentError::Http(format!("refund request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::HttpStatus {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }
        Ok(())
    }

    async fn process_order(
        &self,
        token: &str,
        request: &ProcessOrderRequest,
    ) -> Result<Order, AgentError> {
        let data: OrderData =
            send_json(self.post("orders/sdk/process-order", token).json(request), "process order")
                .await?;
        Ok(data.order)
    }

    async fn checkout_url(
        &self,
        token: &str,
        request: &CheckoutUrlRequest,
    ) -> Result<String, AgentError> {
        let http_request = self.authed(
            self.http
                .post(format!("{}order/shopify/checkout-url", self.api_v1_url))
                .json(request),
            token,
        );
        let data: UrlData = send_json(http_request, "checkout url").await?;
        Ok(data.url)
    }
}
