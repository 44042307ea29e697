//! # op-protocol
//!
//! Open Payments data model and the client contract the checkout core runs on.
//!
//! ## Lifecycle
//!
//! ```text
//! ┌──────────┐   grant    ┌──────────┐   grant    ┌──────────┐  grant (+consent)  ┌──────────┐
//! │  Wallet  │──────────▶│ Incoming │──────────▶│  Quote   │──────────────────▶│ Outgoing │
//! │ Address  │ receiver  │ Payment  │  sender   │          │      sender       │ Payment  │
//! └──────────┘           └──────────┘           └──────────┘                   └──────────┘
//! ```
//!
//! Every remote call goes through [`OpenPaymentsClient`]. Two implementations
//! ship here:
//!
//! - [`HttpOpenPaymentsClient`] - reqwest over the protocol's JSON API
//! - [`MockOpenPaymentsClient`] - in-memory network for tests and demos

pub mod client;
pub mod error;
pub mod model;

pub use client::{
    ConsentCallback, HttpClientConfig, HttpOpenPaymentsClient, MockOpenPaymentsClient,
    OpenPaymentsClient, Operation, RequestSigner, UnsignedRequests, interaction_hash,
};
pub use error::{ProtocolError, Result};
pub use model::{
    AccessItem, AccessToken, AccessType, Action, Amount, Continuation, Grant, GrantRequest,
    IncomingPayment, IncomingPaymentRequest, InteractRequest, Interaction, OutgoingPayment,
    OutgoingPaymentRequest, Quote, QuoteRequest, WalletAddress,
};

/// Demo wallets registered on a fresh [`MockOpenPaymentsClient`]
pub mod demo {
    pub use crate::client::mock::{DEMO_RECEIVER, DEMO_SENDER};
}
