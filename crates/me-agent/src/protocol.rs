//! Protocol core: cross-brand vault-permit spends and their relay.
//!
//! A cross-brand redemption spends the visitor's reward into the diamond
//! contract, which swaps it for the offer brand's reward under a vault
//! permit signed by the backend. The resulting call is submitted through a
//! sponsored meta-transaction relay (Gelato).

use std::str::FromStr;

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::types::SpendData;
use crate::wallet::DynSigner;

sol! {
    #[derive(Debug, PartialEq, Eq)]
    struct SpendInfo {
        address rewardAtHand;
        address targetedReward;
        uint256 amountOfRewardAtHand;
        uint256 expectedAmountOfTargetedReward;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct VaultParams {
        address owner;
        uint256 count;
        bytes32 globalHash;
        bytes32 prefixedHash;
        bytes32 r;
        bytes32 s;
        uint8 v;
        address reward;
        address spender;
        uint256 value;
    }

    interface IUsersServiceWithPermit {
        function spendRewardsOnAnotherBrandWithVaultPermit(
            SpendInfo spendInfo,
            VaultParams vaultParams
        ) external;
    }
}

impl VaultParams {
    /// Build vault-permit parameters from a pushed spend record.
    ///
    /// `r`/`s`/`v` come from the record's split signature when present,
    /// otherwise from its 65-byte `sig`.
    pub fn from_spend_data(spend: &SpendData) -> Result<Self, AgentError> {
        let (r, s, v) = match (&spend.r, &spend.s, &spend.v) {
            (Some(r), Some(s), Some(v)) => (
                parse_b256("r", Some(r))?,
                parse_b256("s", Some(s))?,
                parse_u8("v", Some(v))?,
            ),
            _ => split_signature(spend.sig.as_deref())?,
        };

        Ok(VaultParams {
            owner: parse_address("owner", spend.owner.as_deref())?,
            count: parse_u256("count", spend.count.as_ref())?,
            globalHash: parse_b256("globalHash", spend.global_hash.as_deref())?,
            prefixedHash: parse_b256("prefixedHash", spend.prefixed_hash.as_deref())?,
            r,
            s,
            v,
            reward: parse_address("reward", spend.reward.as_deref())?,
            spender: parse_address("spender", spend.spender.as_deref())?,
            value: parse_u256("value", spend.value.as_ref())?,
        })
    }
}

fn missing(field: &str) -> AgentError {
    AgentError::Validation(format!("push result is missing `{field}`"))
}

fn parse_address(field: &str, raw: Option<&str>) -> Result<Address, AgentError> {
    let raw = raw.ok_or_else(|| missing(field))?;
    Address::from_str(raw.trim())
        .map_err(|e| AgentError::Validation(format!("invalid `{field}` address: {e}")))
}

fn parse_b256(field: &str, raw: Option<&str>) -> Result<B256, AgentError> {
    let raw = raw.ok_or_else(|| missing(field))?;
    B256::from_str(raw.trim())
        .map_err(|e| AgentError::Validation(format!("invalid `{field}`: {e}")))
}

fn parse_u256(field: &str, raw: Option<&serde_json::Value>) -> Result<U256, AgentError> {
    let text = match raw.ok_or_else(|| missing(field))? {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        other => {
            return Err(AgentError::Validation(format!(
                "invalid `{field}`: expected number, got {other}"
            )))
        }
    };
    U256::from_str(&text).map_err(|e| AgentError::Validation(format!("invalid `{field}`: {e}")))
}

fn parse_u8(field: &str, raw: Option<&serde_json::Value>) -> Result<u8, AgentError> {
    let value = parse_u256(field, raw)?;
    if value > U256::from(u8::MAX) {
        return Err(AgentError::Validation(format!("`{field}` out of range")));
    }
    Ok(value.to::<u8>())
}

fn split_signature(sig: Option<&str>) -> Result<(B256, B256, u8), AgentError> {
    let raw = sig.ok_or_else(|| missing("sig"))?;
    let bytes = alloy::hex::decode(raw.trim())
        .map_err(|e| AgentError::Validation(format!("invalid `sig`: {e}")))?;
    if bytes.len() != 65 {
        return Err(AgentError::Validation(format!(
            "`sig` must be 65 bytes, got {}",
            bytes.len()
        )));
    }
    let r = B256::from_slice(&bytes[..32]);
    let s = B256::from_slice(&bytes[32..64]);
    let v = match bytes[64] {
        v @ (0 | 1) => v + 27,
        v => v,
    };
    Ok((r, s, v))
}

/// Builds protocol transactions against the diamond contract.
#[async_trait]
pub trait ProtocolCore: Send + Sync {
    /// Calldata for a vault-permit cross-brand spend, or `None` if the
    /// protocol produced no transaction.
    async fn spend_rewards_on_another_brand_with_vault_permit(
        &self,
        spend_info: &SpendInfo,
        vault_params: &VaultParams,
        diamond: Address,
        rpc_url: &str,
    ) -> Result<Option<Bytes>, AgentError>;
}

/// [`ProtocolCore`] that ABI-encodes diamond calls locally.
#[derive(Debug, Clone, Default)]
pub struct DiamondProtocol;

impl DiamondProtocol {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProtocolCore for DiamondProtocol {
    async fn spend_rewards_on_another_brand_with_vault_permit(
        &self,
        spend_info: &SpendInfo,
        vault_params: &VaultParams,
        diamond: Address,
        rpc_url: &str,
    ) -> Result<Option<Bytes>, AgentError> {
        tracing::debug!(diamond = %diamond, rpc = rpc_url, "encoding vault-permit spend");
        let call = IUsersServiceWithPermit::spendRewardsOnAnotherBrandWithVaultPermitCall {
            spendInfo: spend_info.clone(),
            vaultParams: vault_params.clone(),
        };
        Ok(Some(Bytes::from(call.abi_encode())))
    }
}

/// A call to submit through the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayCall {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
}

/// Keys, endpoints and chain parameters a relay submission needs.
#[derive(Clone)]
pub struct RelayContext {
    /// ME public API key.
    pub api_key: String,
    pub api_v1_url: String,
    /// Sponsor key for the relay network.
    pub relay_api_key: Option<String>,
    pub rpc_url: String,
    pub chain_id: u64,
    pub diamond: Address,
    pub brand_id: String,
}

impl std::fmt::Debug for RelayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayContext")
            .field("api_key", &"[REDACTED]")
            .field("api_v1_url", &self.api_v1_url)
            .field(
                "relay_api_key",
                &self.relay_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("rpc_url", &self.rpc_url)
            .field("chain_id", &self.chain_id)
            .field("diamond", &self.diamond)
            .field("brand_id", &self.brand_id)
            .finish()
    }
}

/// Handle to a submitted relay task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayTask {
    pub task_id: String,
}

/// Meta-transaction relay.
#[async_trait]
pub trait Relayer: Send + Sync {
    async fn relay(
        &self,
        call: &RelayCall,
        signer: &DynSigner,
        ctx: &RelayContext,
    ) -> Result<RelayTask, AgentError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SponsoredCallRequest<'a> {
    chain_id: String,
    target: String,
    data: String,
    sponsor_api_key: &'a str,
}

/// [`Relayer`] backed by Gelato's sponsored-call API.
pub struct GelatoRelay {
    http: reqwest::Client,
    relay_url: String,
}

impl GelatoRelay {
    pub fn new(http: reqwest::Client, relay_url: impl Into<String>) -> Self {
        Self {
            http,
            relay_url: relay_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Relayer for GelatoRelay {
    async fn relay(
        &self,
        call: &RelayCall,
        signer: &DynSigner,
        ctx: &RelayContext,
    ) -> Result<RelayTask, AgentError> {
        if call.from != signer.address() {
            return Err(AgentError::Relay(format!(
                "relay sender {:#x} does not match the session wallet",
                call.from
            )));
        }
        let sponsor_key = ctx
            .relay_api_key
            .as_deref()
            .ok_or_else(|| AgentError::Config("Gelato API key is not configured".to_string()))?;

        let url = format!("{}/relays/v2/sponsored-call", self.relay_url);
        let body = SponsoredCallRequest {
            chain_id: ctx.chain_id.to_string(),
            target: format!("{:#x}", call.to),
            data: alloy::hex::encode_prefixed(&call.data),
            sponsor_api_key: sponsor_key,
        };

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Relay(format!("relay request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::HttpStatus {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let task: RelayTask = resp
            .json()
            .await
            .map_err(|e| AgentError::Relay(format!("relay response parse failed: {e}")))?;

        tracing::info!(
            task_id = %task.task_id,
            chain_id = ctx.chain_id,
            brand = %ctx.brand_id,
            "relay task submitted"
        );
        Ok(task)
    }
}
