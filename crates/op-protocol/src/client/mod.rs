//! Open Payments Clients
//!
//! The client trait consumed by the checkout core, plus an HTTP
//! implementation and an in-memory mock.

mod http;
pub(crate) mod mock;

pub use http::{HttpClientConfig, HttpOpenPaymentsClient, RequestSigner, UnsignedRequests};
pub use mock::{ConsentCallback, MockOpenPaymentsClient, Operation};

use async_trait::async_trait;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::model::{
    Continuation, Grant, GrantRequest, IncomingPayment, IncomingPaymentRequest, OutgoingPayment,
    OutgoingPaymentRequest, Quote, QuoteRequest, WalletAddress,
};

/// Open Payments client trait (Strategy pattern)
///
/// One instance acts on behalf of one party. Implementations own transport,
/// signing and wire encoding; callers see only the protocol model.
#[async_trait]
pub trait OpenPaymentsClient: Send + Sync {
    /// Fetch the public metadata of a wallet address
    async fn resolve_wallet(&self, url: &str) -> Result<WalletAddress>;

    /// Request a grant from an authorization server
    async fn request_grant(&self, auth_server: &str, request: &GrantRequest) -> Result<Grant>;

    /// Continue a pending grant, optionally proving a finished interaction
    async fn continue_grant(
        &self,
        continuation: &Continuation,
        interact_ref: Option<&str>,
    ) -> Result<Grant>;

    async fn create_incoming_payment(
        &self,
        resource_server: &str,
        access_token: &str,
        request: &IncomingPaymentRequest,
    ) -> Result<IncomingPayment>;

    async fn create_quote(
        &self,
        resource_server: &str,
        access_token: &str,
        request: &QuoteRequest,
    ) -> Result<Quote>;

    async fn create_outgoing_payment(
        &self,
        resource_server: &str,
        access_token: &str,
        request: &OutgoingPaymentRequest,
    ) -> Result<OutgoingPayment>;

    /// Client name for logs
    fn name(&self) -> &str;
}

/// Hash an authorization server attaches to the interaction callback
///
/// Base64 of SHA-256 over the client nonce, server nonce, interaction
/// reference and grant endpoint, joined by newlines.
pub fn interaction_hash(
    client_nonce: &str,
    server_nonce: &str,
    interact_ref: &str,
    grant_endpoint: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{client_nonce}\n{server_nonce}\n{interact_ref}\n{grant_endpoint}"));
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}
