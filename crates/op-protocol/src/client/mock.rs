//! Mock Open Payments Client
//!
//! Simulates authorization and resource servers in memory. A single instance
//! stands in for the whole network, so hand the same `Arc` to both parties.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;
use uuid::Uuid;

use super::{OpenPaymentsClient, interaction_hash};
use crate::error::{ProtocolError, Result};
use crate::model::{
    AccessToken, AccessType, Amount, Continuation, Grant, GrantRequest, IncomingPayment,
    IncomingPaymentRequest, Interaction, OutgoingPayment, OutgoingPaymentRequest, Quote,
    QuoteRequest, WalletAddress,
};

/// Demo sender wallet registered by default
pub const DEMO_SENDER: &str = "https://ilp.mock/alice";

/// Demo receiver wallet registered by default
pub const DEMO_RECEIVER: &str = "https://ilp.mock/bob";

const AUTH_SERVER: &str = "https://auth.ilp.mock/";
const RESOURCE_SERVER: &str = "https://ilp.mock";

/// Client operations, for call logs and fault injection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    ResolveWallet,
    RequestGrant,
    ContinueGrant,
    CreateIncomingPayment,
    CreateQuote,
    CreateOutgoingPayment,
}

/// Where the authorization server would send the user after consent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsentCallback {
    /// Finish URI from the grant request, if one was given
    pub finish_uri: Option<String>,
    pub interact_ref: String,
    /// Present only when the grant request carried a finish nonce
    pub hash: Option<String>,
}

impl ConsentCallback {
    /// Finish URI with `interact_ref` and `hash` appended
    pub fn callback_url(&self) -> Result<Option<String>> {
        let Some(finish_uri) = &self.finish_uri else {
            return Ok(None);
        };
        let mut url = Url::parse(finish_uri)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("interact_ref", &self.interact_ref);
            if let Some(hash) = &self.hash {
                query.append_pair("hash", hash);
            }
        }
        Ok(Some(url.into()))
    }
}

#[derive(Clone, Debug)]
struct PendingGrant {
    access_type: AccessType,
    debit_limit: Option<Amount>,
    grant_endpoint: String,
    continue_token: String,
    redirect_url: String,
    interact_ref: String,
    client_nonce: Option<String>,
    server_nonce: String,
    finish_uri: Option<String>,
    approved: bool,
}

#[derive(Clone, Debug)]
struct IssuedToken {
    access_type: AccessType,
    debit_limit: Option<Amount>,
}

#[derive(Default)]
struct MockState {
    wallets: HashMap<String, WalletAddress>,
    /// Keyed by continuation URI
    pending: HashMap<String, PendingGrant>,
    tokens: HashMap<String, IssuedToken>,
    incoming: HashMap<String, IncomingPayment>,
    quotes: HashMap<String, Quote>,
    outgoing: Vec<OutgoingPayment>,
    calls: Vec<Operation>,
    failures: HashMap<Operation, ProtocolError>,
    spent_tokens: HashSet<String>,
}

/// In-memory Open Payments network
pub struct MockOpenPaymentsClient {
    state: Mutex<MockState>,
    /// Whether outgoing-payment grants need the user's consent
    require_consent: bool,
    /// Added to every quote's debit amount, in the sender's minor units
    quote_fee: u128,
    latency: Option<Duration>,
}

impl Default for MockOpenPaymentsClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOpenPaymentsClient {
    /// Network with the two demo wallets, consent required for spending
    pub fn new() -> Self {
        let client = Self {
            state: Mutex::new(MockState::default()),
            require_consent: true,
            quote_fee: 0,
            latency: None,
        };
        client
            .with_wallet(demo_wallet(DEMO_SENDER, "USD", 2))
            .with_wallet(demo_wallet(DEMO_RECEIVER, "USD", 2))
    }

    /// Network whose outgoing-payment grants are issued without interaction
    pub fn pre_authorized() -> Self {
        Self {
            require_consent: false,
            ..Self::new()
        }
    }

    /// Register (or replace) a wallet address
    pub fn with_wallet(mut self, wallet: WalletAddress) -> Self {
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .wallets
            .insert(wallet.id.clone(), wallet);
        self
    }

    pub const fn with_quote_fee(mut self, fee: u128) -> Self {
        self.quote_fee = fee;
        self
    }

    /// Delay every call, e.g. to exercise caller timeouts
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every subsequent call of `operation` fail with `status`
    pub fn fail_on(&self, operation: Operation, status: u16, code: &str) {
        self.lock().failures.insert(
            operation,
            ProtocolError::upstream(status, Some(code), Some("injected failure")),
        );
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<Operation> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, operation: Operation) -> usize {
        self.lock().calls.iter().filter(|op| **op == operation).count()
    }

    /// Outgoing payments created so far
    pub fn outgoing_payments(&self) -> Vec<OutgoingPayment> {
        self.lock().outgoing.clone()
    }

    /// Simulate the user approving the grant behind `redirect_url`
    ///
    /// Returns the callback the authorization server would redirect to, or
    /// `None` when no pending grant matches.
    pub fn approve(&self, redirect_url: &str) -> Option<ConsentCallback> {
        let mut state = self.lock();
        let grant = state
            .pending
            .values_mut()
            .find(|grant| grant.redirect_url == redirect_url)?;
        grant.approved = true;

        let hash = grant.client_nonce.as_deref().map(|client_nonce| {
            interaction_hash(
                client_nonce,
                &grant.server_nonce,
                &grant.interact_ref,
                &grant.grant_endpoint,
            )
        });

        Some(ConsentCallback {
            finish_uri: grant.finish_uri.clone(),
            interact_ref: grant.interact_ref.clone(),
            hash,
        })
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the call, apply injected failures and latency
    async fn enter(&self, operation: Operation) -> Result<()> {
        let failure = {
            let mut state = self.lock();
            state.calls.push(operation);
            state.failures.get(&operation).map(clone_failure)
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        failure.map_or(Ok(()), Err)
    }

    fn issue_token(state: &mut MockState, access_type: AccessType, debit_limit: Option<Amount>) -> AccessToken {
        let value = Uuid::new_v4().simple().to_string();
        state.tokens.insert(
            value.clone(),
            IssuedToken {
                access_type,
                debit_limit,
            },
        );
        AccessToken {
            manage_url: Some(format!("{AUTH_SERVER}token/{value}")),
            value,
        }
    }

    fn check_token(state: &MockState, token: &str, expected: AccessType) -> Result<IssuedToken> {
        match state.tokens.get(token) {
            Some(issued) if issued.access_type == expected => Ok(issued.clone()),
            Some(_) => Err(ProtocolError::upstream(
                403,
                Some("insufficient_scope"),
                Some(format!("token does not grant {}", expected.as_str())),
            )),
            None => Err(ProtocolError::upstream(
                401,
                Some("invalid_token"),
                None::<String>,
            )),
        }
    }
}

#[async_trait]
impl OpenPaymentsClient for MockOpenPaymentsClient {
    async fn resolve_wallet(&self, url: &str) -> Result<WalletAddress> {
        self.enter(Operation::ResolveWallet).await?;

        self.lock().wallets.get(url).cloned().ok_or_else(|| {
            ProtocolError::upstream(404, Some("not_found"), Some(format!("no wallet at {url}")))
        })
    }

    async fn request_grant(&self, auth_server: &str, request: &GrantRequest) -> Result<Grant> {
        self.enter(Operation::RequestGrant).await?;

        let access_type = request.access_type().ok_or_else(|| {
            ProtocolError::upstream(400, Some("invalid_request"), Some("empty access"))
        })?;
        let debit_limit = request
            .access
            .first()
            .and_then(|item| item.limits.as_ref())
            .and_then(|limits| limits.debit_amount.clone());

        let mut state = self.lock();
        let continue_token = Uuid::new_v4().simple().to_string();
        let continue_uri = endpoint(auth_server, &format!("continue/{}", Uuid::new_v4().simple()));
        let continuation = Continuation {
            uri: continue_uri.clone(),
            access_token: continue_token.clone(),
            wait_seconds: None,
        };

        if access_type != AccessType::OutgoingPayment || !self.require_consent {
            let token = Self::issue_token(&mut state, access_type, debit_limit);
            return Ok(Grant {
                access_token: Some(token),
                continuation: Some(continuation),
                interaction: None,
            });
        }

        let Some(interact) = &request.interact else {
            return Err(ProtocolError::upstream(
                400,
                Some("invalid_request"),
                Some("outgoing-payment grants require interaction"),
            ));
        };

        let server_nonce = Uuid::new_v4().simple().to_string();
        let redirect_url = endpoint(auth_server, &format!("interact/{}", Uuid::new_v4().simple()));
        let finish = interact.finish.as_ref();
        state.pending.insert(
            continue_uri,
            PendingGrant {
                access_type,
                debit_limit,
                grant_endpoint: auth_server.to_string(),
                continue_token,
                redirect_url: redirect_url.clone(),
                interact_ref: Uuid::new_v4().simple().to_string(),
                client_nonce: finish.map(|f| f.nonce.clone()),
                server_nonce: server_nonce.clone(),
                finish_uri: finish.map(|f| f.uri.clone()),
                approved: false,
            },
        );

        Ok(Grant {
            access_token: None,
            continuation: Some(continuation),
            interaction: Some(Interaction {
                redirect_url,
                finish_nonce: finish.map(|_| server_nonce),
            }),
        })
    }

    async fn continue_grant(
        &self,
        continuation: &Continuation,
        interact_ref: Option<&str>,
    ) -> Result<Grant> {
        self.enter(Operation::ContinueGrant).await?;

        let mut state = self.lock();
        let grant = match state.pending.get(&continuation.uri) {
            Some(grant) if grant.continue_token == continuation.access_token => grant.clone(),
            _ => {
                return Err(ProtocolError::upstream(
                    401,
                    Some("invalid_continuation"),
                    None::<String>,
                ));
            }
        };

        if !grant.approved {
            return Ok(Grant {
                access_token: None,
                continuation: Some(continuation.clone()),
                interaction: None,
            });
        }

        match (interact_ref, grant.finish_uri.is_some()) {
            (Some(reference), _) if reference != grant.interact_ref => {
                return Err(ProtocolError::upstream(
                    401,
                    Some("invalid_interaction"),
                    Some("interaction reference does not match"),
                ));
            }
            (None, true) => {
                return Err(ProtocolError::upstream(
                    400,
                    Some("invalid_request"),
                    Some("interact_ref required"),
                ));
            }
            _ => {}
        }

        state.pending.remove(&continuation.uri);
        let token = Self::issue_token(&mut state, grant.access_type, grant.debit_limit);
        Ok(Grant {
            access_token: Some(token),
            continuation: None,
            interaction: None,
        })
    }

    async fn create_incoming_payment(
        &self,
        resource_server: &str,
        access_token: &str,
        request: &IncomingPaymentRequest,
    ) -> Result<IncomingPayment> {
        self.enter(Operation::CreateIncomingPayment).await?;

        let mut state = self.lock();
        Self::check_token(&state, access_token, AccessType::IncomingPayment)?;

        let payment = IncomingPayment {
            id: endpoint(resource_server, &format!("incoming-payments/{}", Uuid::new_v4())),
            wallet_address: request.wallet_address.clone(),
            incoming_amount: Some(request.incoming_amount.clone()),
            completed: false,
        };
        state.incoming.insert(payment.id.clone(), payment.clone());
        Ok(payment)
    }

    async fn create_quote(
        &self,
        resource_server: &str,
        access_token: &str,
        request: &QuoteRequest,
    ) -> Result<Quote> {
        self.enter(Operation::CreateQuote).await?;

        let mut state = self.lock();
        Self::check_token(&state, access_token, AccessType::Quote)?;

        let receive_amount = state
            .incoming
            .get(&request.receiver)
            .and_then(|payment| payment.incoming_amount.clone())
            .ok_or_else(|| {
                ProtocolError::upstream(404, Some("unknown_receiver"), Some(request.receiver.clone()))
            })?;
        let sender = state.wallets.get(&request.wallet_address).ok_or_else(|| {
            ProtocolError::upstream(404, Some("not_found"), Some(request.wallet_address.clone()))
        })?;

        let debit_value = rescale(&receive_amount, sender.asset_scale)
            .and_then(|value| value.checked_add(self.quote_fee))
            .ok_or_else(|| {
                ProtocolError::upstream(400, Some("invalid_amount"), Some(receive_amount.value.clone()))
            })?;

        let quote = Quote {
            id: endpoint(resource_server, &format!("quotes/{}", Uuid::new_v4())),
            wallet_address: request.wallet_address.clone(),
            receiver: request.receiver.clone(),
            debit_amount: Amount::new(
                debit_value.to_string(),
                sender.asset_code.clone(),
                sender.asset_scale,
            ),
            receive_amount,
        };
        state.quotes.insert(quote.id.clone(), quote.clone());
        Ok(quote)
    }

    async fn create_outgoing_payment(
        &self,
        resource_server: &str,
        access_token: &str,
        request: &OutgoingPaymentRequest,
    ) -> Result<OutgoingPayment> {
        self.enter(Operation::CreateOutgoingPayment).await?;

        let mut state = self.lock();
        let issued = Self::check_token(&state, access_token, AccessType::OutgoingPayment)?;
        if state.spent_tokens.contains(access_token) {
            return Err(ProtocolError::upstream(
                403,
                Some("insufficient_grant"),
                Some("grant limit already spent"),
            ));
        }

        let quote = state.quotes.get(&request.quote_id).cloned().ok_or_else(|| {
            ProtocolError::upstream(404, Some("unknown_quote"), Some(request.quote_id.clone()))
        })?;

        if let Some(limit) = &issued.debit_limit {
            let within = match (limit.value.parse::<u128>(), quote.debit_amount.value.parse::<u128>()) {
                (Ok(limit), Ok(debit)) => debit <= limit,
                _ => false,
            };
            if !within {
                return Err(ProtocolError::upstream(
                    403,
                    Some("insufficient_grant"),
                    Some(format!("debit {} exceeds limit {}", quote.debit_amount, limit)),
                ));
            }
        }

        if let Some(incoming) = state.incoming.get_mut(&quote.receiver) {
            incoming.completed = true;
        }
        state.spent_tokens.insert(access_token.to_string());

        let payment = OutgoingPayment {
            id: endpoint(resource_server, &format!("outgoing-payments/{}", Uuid::new_v4())),
            wallet_address: request.wallet_address.clone(),
            quote_id: Some(quote.id.clone()),
            debit_amount: Some(quote.debit_amount),
        };
        state.outgoing.push(payment.clone());
        Ok(payment)
    }

    fn name(&self) -> &str {
        "MockOpenPayments"
    }
}

fn demo_wallet(id: &str, asset_code: &str, asset_scale: u8) -> WalletAddress {
    WalletAddress {
        id: id.into(),
        public_name: None,
        asset_code: asset_code.into(),
        asset_scale,
        auth_server: AUTH_SERVER.into(),
        resource_server: RESOURCE_SERVER.into(),
    }
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{path}", base.trim_end_matches('/'))
}

/// Move an amount's integer value to another scale, truncating
fn rescale(amount: &Amount, scale: u8) -> Option<u128> {
    let value: u128 = amount.value.parse().ok()?;
    if scale >= amount.asset_scale {
        10u128
            .checked_pow(u32::from(scale - amount.asset_scale))
            .and_then(|factor| value.checked_mul(factor))
    } else {
        10u128
            .checked_pow(u32::from(amount.asset_scale - scale))
            .map(|factor| value / factor)
    }
}

fn clone_failure(error: &ProtocolError) -> ProtocolError {
    match error {
        ProtocolError::Upstream {
            status,
            code,
            description,
        } => ProtocolError::Upstream {
            status: *status,
            code: code.clone(),
            description: description.clone(),
        },
        other => ProtocolError::InvalidResponse(other.to_string()),
    }
}
