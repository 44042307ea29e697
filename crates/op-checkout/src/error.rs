//! Checkout Error Types

use op_protocol::ProtocolError;
use thiserror::Error;

/// Result type alias for checkout operations
pub type Result<T> = std::result::Result<T, FlowError>;

/// Remote step of a checkout flow, named in upstream failures
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowStep {
    ResolveSenderWallet,
    ResolveReceiverWallet,
    RequestIncomingPaymentGrant,
    CreateIncomingPayment,
    RequestQuoteGrant,
    CreateQuote,
    RequestOutgoingPaymentGrant,
    ContinueOutgoingPaymentGrant,
    CreateOutgoingPayment,
}

impl FlowStep {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ResolveSenderWallet => "resolve sender wallet",
            Self::ResolveReceiverWallet => "resolve receiver wallet",
            Self::RequestIncomingPaymentGrant => "request incoming payment grant",
            Self::CreateIncomingPayment => "create incoming payment",
            Self::RequestQuoteGrant => "request quote grant",
            Self::CreateQuote => "create quote",
            Self::RequestOutgoingPaymentGrant => "request outgoing payment grant",
            Self::ContinueOutgoingPaymentGrant => "continue outgoing payment grant",
            Self::CreateOutgoingPayment => "create outgoing payment",
        }
    }
}

impl std::fmt::Display for FlowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checkout flow errors
#[derive(Error, Debug)]
pub enum FlowError {
    /// Amount is not a finite, strictly positive decimal
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// A remote step failed; never retried
    #[error("{step} failed: {source}")]
    Upstream {
        step: FlowStep,
        #[source]
        source: ProtocolError,
    },

    /// Unknown, expired or already consumed flow token
    #[error("Session not found")]
    SessionNotFound,

    /// The user has not (yet) completed consent; the session is kept
    #[error("Consent incomplete: grant is not finalized")]
    ConsentIncomplete,

    /// Execute called for an incoming payment with nothing pending
    #[error("No pending grant for incoming payment {0}")]
    NoPendingGrant(String),

    /// Callback hash does not prove the redirect round trip
    #[error("Interaction hash mismatch")]
    InteractionHashMismatch,

    /// Protocol returned something the flow cannot use
    #[error("Unexpected {step} response: {reason}")]
    UnexpectedResponse { step: FlowStep, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FlowError {
    pub const fn upstream(step: FlowStep, source: ProtocolError) -> Self {
        Self::Upstream { step, source }
    }

    /// Failing step, for upstream errors
    pub const fn step(&self) -> Option<FlowStep> {
        match self {
            Self::Upstream { step, .. } | Self::UnexpectedResponse { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Stable machine-readable code
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidAmount(_) => "INVALID_AMOUNT",
            Self::Upstream { .. } | Self::UnexpectedResponse { .. } => "UPSTREAM_PROTOCOL_ERROR",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::ConsentIncomplete => "CONSENT_INCOMPLETE",
            Self::NoPendingGrant(_) => "NO_PENDING_GRANT",
            Self::InteractionHashMismatch => "INTERACTION_HASH_MISMATCH",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidAmount(msg) => format!("Invalid amount: {msg}"),
            Self::Upstream { step, .. } | Self::UnexpectedResponse { step, .. } => {
                format!("Payment failed while trying to {step}.")
            }
            Self::SessionNotFound => "This payment session was not found or has expired.".into(),
            Self::ConsentIncomplete => {
                "The payment has not been approved yet. Please complete the authorization.".into()
            }
            Self::NoPendingGrant(_) => "There is no pending payment for this quote.".into(),
            Self::InteractionHashMismatch => "The authorization response could not be verified.".into(),
            Self::Storage(_) | Self::Config(_) => "Service error. Please try again later.".into(),
        }
    }
}
