//! Custodial-wallet adapter seam.
//!
//! The SDK never holds keys itself: a [`WalletAdapter`] logs the visitor in
//! by email OTP and hands out an EVM signer for the active session.

use std::sync::Arc;

use alloy::primitives::Address;
use alloy::signers::Signer;
use async_trait::async_trait;

use crate::error::AgentError;

/// Signer handed out by a wallet session.
pub type DynSigner = Arc<dyn Signer + Send + Sync>;

/// Metadata of the logged-in wallet user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserMetadata {
    pub public_address: Option<Address>,
    pub email: Option<String>,
}

/// Email-OTP custodial wallet.
#[async_trait]
pub trait WalletAdapter: Send + Sync {
    /// Prepare the underlying wallet SDK.
    async fn init(&self) -> Result<(), AgentError>;

    async fn is_logged_in(&self) -> Result<bool, AgentError>;

    async fn user_metadata(&self) -> Result<UserMetadata, AgentError>;

    /// Log in with an email one-time password; returns the session token.
    async fn login_with_email_otp(&self, email: &str) -> Result<String, AgentError>;

    async fn logout(&self) -> Result<(), AgentError>;

    /// EVM signer for the current session.
    fn signer(&self) -> Result<DynSigner, AgentError>;
}

/// Compare two emails ignoring case and surrounding whitespace.
pub fn emails_match(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
