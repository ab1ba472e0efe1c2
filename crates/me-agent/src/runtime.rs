//! Chain runtime: turns a reward spend into a signed meta-transaction.
//!
//! The signed tuple `{hash, from, data, nonce, r, s, v}` is not broadcast by
//! the SDK. It is pushed to the ME backend, which submits it on chain.

use std::borrow::Cow;

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol;
use alloy::sol_types::{Eip712Domain, SolCall, SolStruct};
use async_trait::async_trait;

use crate::error::AgentError;
use crate::types::SignedTransaction;
use crate::wallet::DynSigner;

const DOMAIN_NAME: &str = "me-runtime";
const DOMAIN_VERSION: &str = "1";

sol! {
    /// EIP-712 envelope signed by the reward holder.
    #[derive(Debug)]
    struct RuntimeCall {
        address from;
        address to;
        bytes data;
        uint256 nonce;
    }
}

sol! {
    interface IRewardRuntime {
        function redeemReward(address reward, uint256 amount) external;
        function spendReward(address reward, uint256 amount, address diamond) external;
    }
}

/// Produces signed spend transactions for the backend relay endpoint.
#[async_trait]
pub trait ChainRuntime: Send + Sync {
    /// Spend `amount` of a reward against an offer of the same brand.
    async fn same_brand_reward_redemption(
        &self,
        reward: Address,
        amount: U256,
        chain_id: u64,
        signer: &DynSigner,
        runtime_url: &str,
    ) -> Result<SignedTransaction, AgentError>;

    /// Spend `amount` of a reward into the diamond for a cross-brand swap.
    async fn spend_reward(
        &self,
        reward: Address,
        amount: U256,
        diamond: Address,
        chain_id: u64,
        signer: &DynSigner,
        runtime_url: &str,
    ) -> Result<SignedTransaction, AgentError>;
}

/// [`ChainRuntime`] that signs an EIP-712 [`RuntimeCall`] locally.
#[derive(Debug, Clone, Default)]
pub struct Eip712Runtime;

impl Eip712Runtime {
    pub fn new() -> Self {
        Self
    }

    async fn sign_call(
        &self,
        to: Address,
        data: Vec<u8>,
        chain_id: u64,
        signer: &DynSigner,
    ) -> Result<SignedTransaction, AgentError> {
        let from = signer.address();
        let nonce = random_nonce();
        let call = RuntimeCall {
            from,
            to,
            data: Bytes::from(data),
            nonce,
        };

        let domain = runtime_domain(chain_id, to);
        let hash = call.eip712_signing_hash(&domain);
        let sig = signer
            .sign_hash(&hash)
            .await
            .map_err(|e| AgentError::Chain(format!("signing failed: {e}")))?;

        Ok(SignedTransaction {
            hash: format!("{hash}"),
            from: format!("{from:#x}"),
            data: alloy::hex::encode_prefixed(&call.data),
            nonce: nonce.to_string(),
            r: format!("{}", B256::from(sig.r())),
            s: format!("{}", B256::from(sig.s())),
            v: 27 + u8::from(sig.v()),
        })
    }
}

#[async_trait]
impl ChainRuntime for Eip712Runtime {
    async fn same_brand_reward_redemption(
        &self,
        reward: Address,
        amount: U256,
        chain_id: u64,
        signer: &DynSigner,
        runtime_url: &str,
    ) -> Result<SignedTransaction, AgentError> {
        tracing::debug!(reward = %reward, chain_id, runtime = runtime_url, "signing same-brand redemption");
        let data = IRewardRuntime::redeemRewardCall { reward, amount }.abi_encode();
        self.sign_call(reward, data, chain_id, signer).await
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
        tracing::debug!(reward = %reward, diamond = %diamond, chain_id, runtime = runtime_url, "signing reward spend");
        let data = IRewardRuntime::spendRewardCall {
            reward,
            amount,
            diamond,
        }
        .abi_encode();
        self.sign_call(diamond, data, chain_id, signer).await
    }
}

/// EIP-712 domain for runtime calls on `chain_id` against `verifying_contract`.
pub fn runtime_domain(chain_id: u64, verifying_contract: Address) -> Eip712Domain {
    Eip712Domain {
        name: Some(Cow::Borrowed(DOMAIN_NAME)),
        version: Some(Cow::Borrowed(DOMAIN_VERSION)),
        chain_id: Some(U256::from(chain_id)),
        verifying_contract: Some(verifying_contract),
        salt: None,
    }
}

/// Random 256-bit nonce (keccak256 of 32 CSPRNG bytes).
fn random_nonce() -> U256 {
    let mut bytes = [0u8; 32];
    rand::fill(&mut bytes);
    U256::from_be_bytes(keccak256(bytes).0)
}
