//! Flow Configuration

use std::time::Duration;

use url::Url;

use crate::error::{FlowError, Result};

const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SESSION_TTL_SECS: u64 = 15 * 60;

/// Parties, callback and limits for the checkout flows
#[derive(Clone, Debug)]
pub struct FlowConfig {
    /// Wallet address that pays
    pub sender_wallet: String,

    /// Wallet address that is paid
    pub receiver_wallet: String,

    /// Base of the interaction finish URI; the flow token is appended
    pub callback_url: Url,

    /// Upper bound on every remote call
    pub call_timeout: Duration,

    /// Consent window; `None` keeps sessions until resumed
    pub session_ttl: Option<Duration>,
}

impl FlowConfig {
    pub fn new(
        sender_wallet: impl Into<String>,
        receiver_wallet: impl Into<String>,
        callback_url: &str,
    ) -> Result<Self> {
        let callback_url = Url::parse(callback_url)
            .map_err(|e| FlowError::Config(format!("CALLBACK_URL '{callback_url}': {e}")))?;

        Ok(Self {
            sender_wallet: sender_wallet.into(),
            receiver_wallet: receiver_wallet.into(),
            callback_url,
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
            session_ttl: Some(Duration::from_secs(DEFAULT_SESSION_TTL_SECS)),
        })
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary variable lookup
    ///
    /// `SENDER_WALLET_ADDRESS`, `RECEIVER_WALLET_ADDRESS` and `CALLBACK_URL`
    /// are required. `OP_CALL_TIMEOUT_SECS` defaults to 30 and
    /// `SESSION_TTL_SECS` to 900, where 0 disables expiry.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| FlowError::Config(format!("{key} not set")))
        };
        let seconds = |key: &str, default: u64| -> Result<u64> {
            lookup(key).map_or(Ok(default), |value| {
                value
                    .trim()
                    .parse()
                    .map_err(|_| FlowError::Config(format!("{key} must be a number of seconds")))
            })
        };

        let mut config = Self::new(
            required("SENDER_WALLET_ADDRESS")?,
            required("RECEIVER_WALLET_ADDRESS")?,
            &required("CALLBACK_URL")?,
        )?;

        let timeout = seconds("OP_CALL_TIMEOUT_SECS", DEFAULT_CALL_TIMEOUT_SECS)?;
        if timeout == 0 {
            return Err(FlowError::Config("OP_CALL_TIMEOUT_SECS must be positive".into()));
        }
        config.call_timeout = Duration::from_secs(timeout);

        let ttl = seconds("SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?;
        config.session_ttl = (ttl > 0).then(|| Duration::from_secs(ttl));

        Ok(config)
    }

    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub const fn with_session_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.session_ttl = ttl;
        self
    }
}
