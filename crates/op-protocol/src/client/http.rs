//! HTTP Open Payments Client
//!
//! Speaks the protocol's JSON over reqwest. Request signing is delegated to a
//! [`RequestSigner`] so key management stays outside this crate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use super::OpenPaymentsClient;
use crate::error::{ProtocolError, Result};
use crate::model::{
    AccessItem, AccessToken, Continuation, Grant, GrantRequest, IncomingPayment,
    IncomingPaymentRequest, InteractRequest, Interaction, OutgoingPayment, OutgoingPaymentRequest,
    Quote, QuoteRequest, WalletAddress,
};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// HTTP client configuration for one party
#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    /// Wallet address this client identifies as
    pub wallet_address: String,

    /// Key id registered on that wallet address
    pub key_id: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl HttpClientConfig {
    pub fn new(wallet_address: impl Into<String>, key_id: impl Into<String>) -> Self {
        Self {
            wallet_address: wallet_address.into(),
            key_id: key_id.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Read `{prefix}_CLIENT_WALLET`, `{prefix}_KEY_ID` and `{prefix}_TIMEOUT_SECS`
    ///
    /// Returns `None` when no client wallet is configured.
    pub fn from_env(prefix: &str) -> Option<Self> {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    /// Same as `from_env`, through an arbitrary variable lookup
    ///
    /// A missing, unparsable or zero timeout falls back to 30 seconds.
    pub fn from_lookup(prefix: &str, lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let wallet_address = lookup(&format!("{prefix}_CLIENT_WALLET"))?;
        let key_id = lookup(&format!("{prefix}_KEY_ID")).unwrap_or_default();
        let timeout_secs = lookup(&format!("{prefix}_TIMEOUT_SECS"))
            .and_then(|s| s.trim().parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Some(Self {
            wallet_address,
            key_id,
            timeout_secs,
        })
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Signs outgoing requests on behalf of a client key
pub trait RequestSigner: Send + Sync {
    fn sign(&self, key_id: &str, request: &mut reqwest::Request) -> Result<()>;
}

/// Leaves requests unsigned, for test networks that skip signature checks
#[derive(Clone, Copy, Debug, Default)]
pub struct UnsignedRequests;

impl RequestSigner for UnsignedRequests {
    fn sign(&self, _key_id: &str, _request: &mut reqwest::Request) -> Result<()> {
        Ok(())
    }
}

/// reqwest-backed Open Payments client
pub struct HttpOpenPaymentsClient {
    http: reqwest::Client,
    config: HttpClientConfig,
    signer: Arc<dyn RequestSigner>,
}

impl HttpOpenPaymentsClient {
    pub fn new(config: HttpClientConfig, signer: Arc<dyn RequestSigner>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            http,
            config,
            signer,
        })
    }

    /// Build the client and confirm its own wallet address resolves
    pub async fn connect(config: HttpClientConfig, signer: Arc<dyn RequestSigner>) -> Result<Self> {
        let client = Self::new(config, signer)?;
        let wallet = client.resolve_wallet(&client.config.wallet_address).await?;
        tracing::info!(
            wallet = %wallet.id,
            auth_server = %wallet.auth_server,
            "Open Payments client ready"
        );
        Ok(client)
    }

    pub const fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let url = Url::parse(url)?;
        let mut builder = self
            .http
            .request(method.clone(), url.clone())
            .header(ACCEPT, "application/json");
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("GNAP {token}"));
        }
        if let Some(body) = &body {
            builder = builder.json(body);
        }

        let mut request = builder.build()?;
        self.signer.sign(&self.config.key_id, &mut request)?;

        tracing::debug!(%method, %url, "Open Payments request");
        let response = self.http.execute(request).await.map_err(|e| {
            if e.is_timeout() {
                ProtocolError::Timeout(self.config.timeout())
            } else {
                ProtocolError::Network(e)
            }
        })?;

        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(upstream_error(status, &bytes));
        }

        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl OpenPaymentsClient for HttpOpenPaymentsClient {
    async fn resolve_wallet(&self, url: &str) -> Result<WalletAddress> {
        self.send(Method::GET, url, None, None).await
    }

    async fn request_grant(&self, auth_server: &str, request: &GrantRequest) -> Result<Grant> {
        let body = WireGrantRequest {
            access_token: WireAccessRequest {
                access: &request.access,
            },
            client: &self.config.wallet_address,
            interact: request.interact.as_ref(),
        };
        let grant: WireGrant = self
            .send(Method::POST, auth_server, None, Some(serde_json::to_value(body)?))
            .await?;
        Ok(grant.into())
    }

    async fn continue_grant(
        &self,
        continuation: &Continuation,
        interact_ref: Option<&str>,
    ) -> Result<Grant> {
        let body = interact_ref.map_or_else(
            || serde_json::json!({}),
            |reference| serde_json::json!({ "interact_ref": reference }),
        );
        let grant: WireGrant = self
            .send(
                Method::POST,
                &continuation.uri,
                Some(&continuation.access_token),
                Some(body),
            )
            .await?;
        Ok(grant.into())
    }

    async fn create_incoming_payment(
        &self,
        resource_server: &str,
        access_token: &str,
        request: &IncomingPaymentRequest,
    ) -> Result<IncomingPayment> {
        self.send(
            Method::POST,
            &endpoint(resource_server, "incoming-payments"),
            Some(access_token),
            Some(serde_json::to_value(request)?),
        )
        .await
    }

    async fn create_quote(
        &self,
        resource_server: &str,
        access_token: &str,
        request: &QuoteRequest,
    ) -> Result<Quote> {
        self.send(
            Method::POST,
            &endpoint(resource_server, "quotes"),
            Some(access_token),
            Some(serde_json::to_value(request)?),
        )
        .await
    }

    async fn create_outgoing_payment(
        &self,
        resource_server: &str,
        access_token: &str,
        request: &OutgoingPaymentRequest,
    ) -> Result<OutgoingPayment> {
        self.send(
            Method::POST,
            &endpoint(resource_server, "outgoing-payments"),
            Some(access_token),
            Some(serde_json::to_value(request)?),
        )
        .await
    }

    fn name(&self) -> &str {
        &self.config.wallet_address
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Serialize)]
struct WireGrantRequest<'a> {
    access_token: WireAccessRequest<'a>,
    client: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    interact: Option<&'a InteractRequest>,
}

#[derive(Serialize)]
struct WireAccessRequest<'a> {
    access: &'a [AccessItem],
}

#[derive(Debug, Deserialize)]
struct WireGrant {
    access_token: Option<WireToken>,
    #[serde(rename = "continue")]
    continuation: Option<WireContinue>,
    interact: Option<WireInteract>,
}

#[derive(Debug, Deserialize)]
struct WireToken {
    value: String,
    manage: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireContinue {
    access_token: WireContinueToken,
    uri: String,
    wait: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireContinueToken {
    value: String,
}

#[derive(Debug, Deserialize)]
struct WireInteract {
    redirect: String,
    finish: Option<String>,
}

impl From<WireGrant> for Grant {
    fn from(wire: WireGrant) -> Self {
        Self {
            access_token: wire.access_token.map(|token| AccessToken {
                value: token.value,
                manage_url: token.manage,
            }),
            continuation: wire.continuation.map(|cont| Continuation {
                uri: cont.uri,
                access_token: cont.access_token.value,
                wait_seconds: cont.wait,
            }),
            interaction: wire.interact.map(|interact| Interaction {
                redirect_url: interact.redirect,
                finish_nonce: interact.finish,
            }),
        }
    }
}

/// Map a non-success response to an upstream error
///
/// Authorization servers answer `{"error": {"code", "description"}}`;
/// resource servers answer `{"message": ...}`.
fn upstream_error(status: StatusCode, body: &[u8]) -> ProtocolError {
    let json: serde_json::Value = serde_json::from_slice(body).unwrap_or_default();
    let error = &json["error"];

    let code = error["code"]
        .as_str()
        .or_else(|| error.as_str())
        .map(ToString::to_string);
    let description = error["description"]
        .as_str()
        .or_else(|| json["message"].as_str())
        .map(ToString::to_string);

    ProtocolError::Upstream {
        status: status.as_u16(),
        code,
        description,
    }
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{path}", base.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Amount;

    #[test]
    fn test_pending_grant_from_wire() {
        let wire: WireGrant = serde_json::from_str(
            r#"{
                "interact": {
                    "redirect": "https://auth.example/interact/1",
                    "finish": "server-nonce"
                },
                "continue": {
                    "access_token": { "value": "cont-token" },
                    "uri": "https://auth.example/continue/1",
                    "wait": 5
                }
            }"#,
        )
        .unwrap();

        let grant = Grant::from(wire);
        assert!(!grant.is_finalized());
        let continuation = grant.continuation.unwrap();
        assert_eq!(continuation.access_token, "cont-token");
        assert_eq!(continuation.wait_seconds, Some(5));
        let interaction = grant.interaction.unwrap();
        assert_eq!(interaction.finish_nonce.as_deref(), Some("server-nonce"));
    }

    #[test]
    fn test_finalized_grant_from_wire() {
        let wire: WireGrant = serde_json::from_str(
            r#"{
                "access_token": {
                    "value": "tok",
                    "manage": "https://auth.example/token/1",
                    "access": []
                }
            }"#,
        )
        .unwrap();

        let grant = Grant::from(wire);
        assert!(grant.is_finalized());
        assert_eq!(grant.access_token.unwrap().value, "tok");
    }

    #[test]
    fn test_grant_request_body() {
        let request = GrantRequest::new(AccessItem::outgoing_payment(
            "https://wallet.example/alice",
            Amount::new("500", "USD", 2),
        ));
        let body = WireGrantRequest {
            access_token: WireAccessRequest {
                access: &request.access,
            },
            client: "https://wallet.example/shop",
            interact: request.interact.as_ref(),
        };

        let json = serde_json::to_value(body).unwrap();
        assert_eq!(json["client"], "https://wallet.example/shop");
        assert_eq!(json["access_token"]["access"][0]["identifier"], "https://wallet.example/alice");
        assert!(json.get("interact").is_none());
    }

    #[test]
    fn test_upstream_error_bodies() {
        let err = upstream_error(
            StatusCode::UNAUTHORIZED,
            br#"{"error": {"code": "invalid_client", "description": "unknown key"}}"#,
        );
        assert_eq!(err.to_string(), "Upstream responded 401: invalid_client (unknown key)");

        let err = upstream_error(StatusCode::BAD_REQUEST, br#"{"message": "invalid amount"}"#);
        assert_eq!(err.to_string(), "Upstream responded 400: invalid amount");

        let err = upstream_error(StatusCode::BAD_GATEWAY, b"<html>");
        assert_eq!(err.status(), Some(502));
    }

    #[test]
    fn test_config_from_lookup() {
        let vars = |timeout: &'static str| {
            move |key: &str| match key {
                "SENDER_CLIENT_WALLET" => Some("https://wallet.example/shop".to_string()),
                "SENDER_KEY_ID" => Some("key-1".to_string()),
                "SENDER_TIMEOUT_SECS" => Some(timeout.to_string()),
                _ => None,
            }
        };

        let config = HttpClientConfig::from_lookup("SENDER", vars("5")).unwrap();
        assert_eq!(config.key_id, "key-1");
        assert_eq!(config.timeout(), Duration::from_secs(5));

        let config = HttpClientConfig::from_lookup("SENDER", vars("0")).unwrap();
        assert_eq!(config.timeout_secs, 30);

        let config = HttpClientConfig::from_lookup("SENDER", vars("soon")).unwrap();
        assert_eq!(config.timeout_secs, 30);

        assert!(HttpClientConfig::from_lookup("RECEIVER", vars("5")).is_none());
    }

    #[test]
    fn test_endpoint_join() {
        assert_eq!(endpoint("https://rs.example/", "quotes"), "https://rs.example/quotes");
        assert_eq!(endpoint("https://rs.example", "quotes"), "https://rs.example/quotes");
    }
}
