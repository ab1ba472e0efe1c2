//! Local-key wallet for ME Agent.
//!
//! Stands in for a hosted email-OTP wallet in CLIs, scripts and tests: the
//! "OTP login" simply opens a session for the given email, and the session's
//! signer is an in-process [`PrivateKeySigner`].

use std::sync::{Arc, Mutex, MutexGuard};

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use me_agent::{AgentError, DynSigner, UserMetadata, WalletAdapter};

/// Environment variable holding the hex private key.
pub const PRIVATE_KEY_ENV: &str = "ME_WALLET_PRIVATE_KEY";

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("ME_WALLET_PRIVATE_KEY is not set")]
    MissingKey,

    #[error("invalid email address: {0:?}")]
    InvalidEmail(String),
}

impl From<WalletError> for AgentError {
    fn from(e: WalletError) -> Self {
        AgentError::Wallet(e.to_string())
    }
}

/// [`WalletAdapter`] over a local private key.
pub struct LocalKeyWallet {
    inner: PrivateKeySigner,
    /// Email of the open session.
    session: Mutex<Option<String>>,
}

impl LocalKeyWallet {
    /// Create a wallet from a hex-encoded private key (with or without 0x prefix).
    pub fn new(private_key: &str) -> Result<Self, WalletError> {
        let key = private_key.trim();
        let key = key.strip_prefix("0x").unwrap_or(key);
        let signer: PrivateKeySigner = key
            .parse()
            .map_err(|e| WalletError::InvalidKey(format!("{e}")))?;
        Ok(Self::from_signer(signer))
    }

    /// Generate a new random keypair.
    pub fn random() -> Self {
        Self::from_signer(PrivateKeySigner::random())
    }

    pub fn from_signer(signer: PrivateKeySigner) -> Self {
        Self {
            inner: signer,
            session: Mutex::new(None),
        }
    }

    /// Load the key from `ME_WALLET_PRIVATE_KEY`.
    pub fn from_env() -> Result<Self, WalletError> {
        let key = std::env::var(PRIVATE_KEY_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(WalletError::MissingKey)?;
        Self::new(&key)
    }

    pub fn address(&self) -> Address {
        self.inner.address()
    }

    /// Email of the open session, if any.
    pub fn session_email(&self) -> Option<String> {
        self.session().clone()
    }

    fn session(&self) -> MutexGuard<'_, Option<String>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for LocalKeyWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeyWallet")
            .field("address", &self.inner.address())
            .field("session_email", &self.session_email())
            .finish()
    }
}

fn session_token() -> String {
    let mut bytes = [0u8; 16];
    rand::fill(&mut bytes);
    alloy::hex::encode(bytes)
}

#[async_trait]
impl WalletAdapter for LocalKeyWallet {
    async fn init(&self) -> Result<(), AgentError> {
        tracing::debug!(address = %self.inner.address(), "local wallet ready");
        Ok(())
    }

    async fn is_logged_in(&self) -> Result<bool, AgentError> {
        Ok(self.session().is_some())
    }

    async fn user_metadata(&self) -> Result<UserMetadata, AgentError> {
        let session = self.session();
        Ok(UserMetadata {
            public_address: session.as_ref().map(|_| self.inner.address()),
            email: session.clone(),
        })
    }

    async fn login_with_email_otp(&self, email: &str) -> Result<String, AgentError> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(WalletError::InvalidEmail(email.to_string()).into());
        }

        *self.session() = Some(email.to_string());
        tracing::info!(address = %self.inner.address(), "local wallet session opened");
        Ok(session_token())
    }

    async fn logout(&self) -> Result<(), AgentError> {
        if self.session().take().is_some() {
            tracing::info!(address = %self.inner.address(), "local wallet session closed");
        }
        Ok(())
    }

    fn signer(&self) -> Result<DynSigner, AgentError> {
        if self.session().is_none() {
            return Err(AgentError::Wallet("no active wallet session".to_string()));
        }
        Ok(Arc::new(self.inner.clone()))
    }
}
