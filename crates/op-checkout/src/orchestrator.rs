//! Payment Orchestrator
//!
//! Drives the grant → incoming payment → grant → quote → grant → payment
//! sequence against the sender's and receiver's servers.
//!
//! ```text
//!  resolve wallets ──▶ incoming payment ──▶ quote ──▶ spend grant ─┬─▶ finalize ──▶ payment
//!   (concurrent)         (receiver)        (sender)    (sender)    │      ▲
//!                                                                  │      │ resume / execute
//!                                                                  └─▶ suspend (session)
//! ```
//!
//! Steps run strictly in order; only the two wallet lookups overlap. A flow
//! that needs the user's consent is parked in a session store and picked up
//! by a later, unrelated request.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use op_protocol::{
    AccessItem, AccessToken, Amount, Grant, GrantRequest, IncomingPaymentRequest,
    InteractRequest, OpenPaymentsClient, OutgoingPaymentRequest, ProtocolError, QuoteRequest,
    WalletAddress,
};
use serde::Serialize;
use uuid::Uuid;

use crate::amount::MajorAmount;
use crate::config::FlowConfig;
use crate::error::{FlowError, FlowStep, Result};
use crate::session::{
    FlowSession, FlowToken, InteractionProof, MemorySessionStore, SessionStore, SpendAuthorization,
};

/// How the spend grant obtains the user's consent
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsentMode {
    /// Redirect the user; the callback carries a flow token to resume with
    Redirect,

    /// Redirect the user without a callback; `execute` polls the grant
    Polling,

    /// Request no interaction and pay straight away
    PreAuthorized,
}

/// Outcome of starting a payment
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentStart {
    /// Send the user to `redirect_url`; the callback resumes the flow
    AwaitingConsent {
        redirect_url: String,
        flow_token: FlowToken,
    },

    /// No consent was needed and the payment exists
    Completed(PaymentReceipt),

    /// The grant is still pending; finish with `execute` on the incoming payment
    AwaitingExecution(QuoteStart),
}

/// Outcome of the first call of the quote-then-pay variant
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QuoteStart {
    pub incoming_payment_id: String,
    pub debit_amount: Amount,

    /// Where the user approves the spend, if approval is still needed
    pub redirect_url: Option<String>,
}

/// A created outgoing payment
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PaymentReceipt {
    pub payment_id: String,
    pub incoming_payment_id: String,
    pub quote_id: String,
    pub debit_amount: Amount,
}

/// Steps 1-5 done, spend grant requested
struct PreparedFlow {
    session: FlowSession,
    redirect_url: Option<String>,
    flow_token: Option<FlowToken>,
}

/// Orchestrates checkout flows between one sender and one receiver
pub struct PaymentOrchestrator {
    sender: Arc<dyn OpenPaymentsClient>,
    receiver: Arc<dyn OpenPaymentsClient>,
    flows: Arc<dyn SessionStore<FlowToken>>,
    pending: Arc<dyn SessionStore<String>>,
    config: FlowConfig,
}

impl PaymentOrchestrator {
    /// Orchestrator with in-memory stores honouring the configured TTL
    pub fn new(
        config: FlowConfig,
        sender: Arc<dyn OpenPaymentsClient>,
        receiver: Arc<dyn OpenPaymentsClient>,
    ) -> Self {
        Self {
            sender,
            receiver,
            flows: Arc::new(MemorySessionStore::<FlowToken>::for_ttl(config.session_ttl)),
            pending: Arc::new(MemorySessionStore::<String>::for_ttl(config.session_ttl)),
            config,
        }
    }

    /// Replace the flow-token store and the pending-grant registry
    pub fn with_stores(
        mut self,
        flows: Arc<dyn SessionStore<FlowToken>>,
        pending: Arc<dyn SessionStore<String>>,
    ) -> Self {
        self.flows = flows;
        self.pending = pending;
        self
    }

    pub const fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Sessions parked for redirect callbacks
    pub fn flows(&self) -> &Arc<dyn SessionStore<FlowToken>> {
        &self.flows
    }

    /// Grants parked for `execute`, keyed by incoming payment id
    pub fn pending(&self) -> &Arc<dyn SessionStore<String>> {
        &self.pending
    }

    /// Start a pay-by-link flow
    ///
    /// With `interactive` the flow suspends and returns the consent redirect.
    /// Without it no interaction is requested and the payment is created
    /// before returning, unless the authorization server still withholds the
    /// token. Then the grant stays parked under the incoming payment and the
    /// caller gets `AwaitingExecution` to finish it with `execute`.
    pub async fn start_payment(&self, amount: MajorAmount, interactive: bool) -> Result<PaymentStart> {
        let mode = if interactive {
            ConsentMode::Redirect
        } else {
            ConsentMode::PreAuthorized
        };
        let PreparedFlow {
            session,
            redirect_url,
            flow_token,
        } = self.prepare(amount, mode).await?;

        if let (Some(redirect_url), Some(flow_token)) = (&redirect_url, flow_token) {
            let incoming_payment = session.incoming_payment_id.clone();
            self.flows.put(flow_token.clone(), session)?;
            tracing::info!(
                incoming_payment = %incoming_payment,
                "Flow suspended awaiting consent"
            );
            return Ok(PaymentStart::AwaitingConsent {
                redirect_url: redirect_url.clone(),
                flow_token,
            });
        }

        if mode == ConsentMode::Redirect && !session.is_authorized() {
            return Err(FlowError::UnexpectedResponse {
                step: FlowStep::RequestOutgoingPaymentGrant,
                reason: "pending grant without an interaction redirect".into(),
            });
        }

        let awaiting = QuoteStart {
            incoming_payment_id: session.incoming_payment_id.clone(),
            debit_amount: session.debit_amount.clone(),
            redirect_url,
        };
        let key = awaiting.incoming_payment_id.clone();
        self.pending.put(key.clone(), session)?;

        // Interaction demanded anyway: the user must visit the redirect first
        if awaiting.redirect_url.is_some() {
            tracing::info!(
                incoming_payment = %key,
                "Spend grant requires interaction, awaiting execute"
            );
            return Ok(PaymentStart::AwaitingExecution(awaiting));
        }

        match self.settle(self.pending.as_ref(), &key, None).await {
            Ok(receipt) => Ok(PaymentStart::Completed(receipt)),
            Err(FlowError::ConsentIncomplete) => Ok(PaymentStart::AwaitingExecution(awaiting)),
            Err(err) => {
                self.pending.delete(&key)?;
                Err(err)
            }
        }
    }

    /// First call of the quote-then-pay variant
    pub async fn start_quote(&self, amount: MajorAmount) -> Result<QuoteStart> {
        let prepared = self.prepare(amount, ConsentMode::Polling).await?;
        let session = prepared.session;

        let start = QuoteStart {
            incoming_payment_id: session.incoming_payment_id.clone(),
            debit_amount: session.debit_amount.clone(),
            redirect_url: prepared.redirect_url,
        };
        self.pending.put(session.incoming_payment_id.clone(), session)?;

        tracing::info!(
            incoming_payment = %start.incoming_payment_id,
            debit = %start.debit_amount,
            needs_consent = start.redirect_url.is_some(),
            "Quote ready"
        );
        Ok(start)
    }

    /// Second call of the quote-then-pay variant
    ///
    /// The grant is continued without an interaction reference, which the
    /// protocol allows because no finish method was requested.
    pub async fn execute(&self, incoming_payment_id: &str) -> Result<PaymentReceipt> {
        let key = incoming_payment_id.to_string();
        if self.pending.get(&key)?.is_none() {
            return Err(FlowError::NoPendingGrant(key));
        }

        match self.settle(self.pending.as_ref(), &key, None).await {
            Err(FlowError::SessionNotFound) => Err(FlowError::NoPendingGrant(key)),
            other => other,
        }
    }

    /// Drop a pending quote; returns whether one existed
    pub fn abandon_quote(&self, incoming_payment_id: &str) -> Result<bool> {
        let removed = self.pending.delete(&incoming_payment_id.to_string())?;
        if removed.is_some() {
            tracing::info!(incoming_payment = %incoming_payment_id, "Pending quote abandoned");
        }
        Ok(removed.is_some())
    }

    /// Claim the session under `key`, finalize its grant and create the payment
    ///
    /// The session is removed before the grant is continued, so of two
    /// concurrent callers only one gets past this point; the other sees
    /// `SessionNotFound`. If the grant is not finalized, or continuing it
    /// fails, the session is put back for a later retry.
    pub(crate) async fn settle<K>(
        &self,
        store: &dyn SessionStore<K>,
        key: &K,
        interact_ref: Option<&str>,
    ) -> Result<PaymentReceipt>
    where
        K: Clone + Send + Sync,
    {
        let session = store.delete(key)?.ok_or(FlowError::SessionNotFound)?;

        let token = match self.finalize(&session.authorization, interact_ref).await {
            Ok(token) => token,
            Err(err) => {
                store.put(key.clone(), session)?;
                if matches!(err, FlowError::ConsentIncomplete) {
                    tracing::info!("Grant not finalized yet, session kept");
                }
                return Err(err);
            }
        };

        self.create_payment(&session, &token).await
    }

    /// Turn a spend authorization into a usable access token
    pub async fn finalize(
        &self,
        authorization: &SpendAuthorization,
        interact_ref: Option<&str>,
    ) -> Result<AccessToken> {
        match authorization {
            SpendAuthorization::Issued(token) => Ok(token.clone()),
            SpendAuthorization::Pending(continuation) => {
                let grant = self
                    .call(
                        FlowStep::ContinueOutgoingPaymentGrant,
                        self.sender.continue_grant(continuation, interact_ref),
                    )
                    .await?;
                grant.access_token.ok_or(FlowError::ConsentIncomplete)
            }
        }
    }

    async fn create_payment(&self, session: &FlowSession, token: &AccessToken) -> Result<PaymentReceipt> {
        let payment = self
            .call(
                FlowStep::CreateOutgoingPayment,
                self.sender.create_outgoing_payment(
                    &session.sender.resource_server,
                    &token.value,
                    &OutgoingPaymentRequest {
                        wallet_address: session.sender.id.clone(),
                        quote_id: session.quote_id.clone(),
                    },
                ),
            )
            .await?;

        tracing::info!(
            payment_id = %payment.id,
            incoming_payment = %session.incoming_payment_id,
            debit = %session.debit_amount,
            "Outgoing payment created"
        );

        Ok(PaymentReceipt {
            payment_id: payment.id,
            incoming_payment_id: session.incoming_payment_id.clone(),
            quote_id: session.quote_id.clone(),
            debit_amount: session.debit_amount.clone(),
        })
    }

    /// Steps 1-5, shared by every variant
    async fn prepare(&self, amount: MajorAmount, mode: ConsentMode) -> Result<PreparedFlow> {
        tracing::info!(%amount, ?mode, "Starting checkout flow");

        let (sender, receiver) = tokio::try_join!(
            self.call(
                FlowStep::ResolveSenderWallet,
                self.sender.resolve_wallet(&self.config.sender_wallet),
            ),
            self.call(
                FlowStep::ResolveReceiverWallet,
                self.receiver.resolve_wallet(&self.config.receiver_wallet),
            ),
        )?;

        let incoming_amount = Amount::new(
            amount.to_minor_units(receiver.asset_scale)?,
            receiver.asset_code.clone(),
            receiver.asset_scale,
        );

        let grant = self
            .call(
                FlowStep::RequestIncomingPaymentGrant,
                self.receiver
                    .request_grant(&receiver.auth_server, &GrantRequest::new(AccessItem::incoming_payment())),
            )
            .await?;
        let token = issued_token(FlowStep::RequestIncomingPaymentGrant, grant)?;
        let incoming_payment = self
            .call(
                FlowStep::CreateIncomingPayment,
                self.receiver.create_incoming_payment(
                    &receiver.resource_server,
                    &token.value,
                    &IncomingPaymentRequest {
                        wallet_address: receiver.id.clone(),
                        incoming_amount,
                        expires_at: None,
                    },
                ),
            )
            .await?;
        tracing::debug!(incoming_payment = %incoming_payment.id, "Incoming payment created");

        let grant = self
            .call(
                FlowStep::RequestQuoteGrant,
                self.sender
                    .request_grant(&sender.auth_server, &GrantRequest::new(AccessItem::quote())),
            )
            .await?;
        let token = issued_token(FlowStep::RequestQuoteGrant, grant)?;
        let quote = self
            .call(
                FlowStep::CreateQuote,
                self.sender.create_quote(
                    &sender.resource_server,
                    &token.value,
                    &QuoteRequest::ilp(sender.id.clone(), incoming_payment.id.clone()),
                ),
            )
            .await?;
        tracing::debug!(quote_id = %quote.id, debit = %quote.debit_amount, "Quote created");

        let mut request = GrantRequest::new(AccessItem::outgoing_payment(
            sender.id.clone(),
            quote.debit_amount.clone(),
        ));
        let mut flow_token = None;
        let mut client_nonce = None;
        match mode {
            ConsentMode::Redirect => {
                let token = FlowToken::generate();
                let nonce = Uuid::new_v4().simple().to_string();
                request = request.with_interaction(InteractRequest::redirect(
                    self.finish_uri(&token),
                    nonce.clone(),
                ));
                flow_token = Some(token);
                client_nonce = Some(nonce);
            }
            ConsentMode::Polling => {
                request = request.with_interaction(InteractRequest::redirect_without_finish());
            }
            ConsentMode::PreAuthorized => {}
        }

        let grant = self
            .call(
                FlowStep::RequestOutgoingPaymentGrant,
                self.sender.request_grant(&sender.auth_server, &request),
            )
            .await?;

        let (authorization, redirect_url, proof) = spend_authorization(grant, client_nonce, &sender)?;

        Ok(PreparedFlow {
            session: FlowSession {
                authorization,
                quote_id: quote.id,
                incoming_payment_id: incoming_payment.id,
                debit_amount: quote.debit_amount,
                sender,
                proof,
                created_at: Utc::now(),
            },
            flow_token: redirect_url.as_ref().and(flow_token),
            redirect_url,
        })
    }

    /// Callback URL with the flow token appended
    fn finish_uri(&self, token: &FlowToken) -> String {
        let mut url = self.config.callback_url.clone();
        url.query_pairs_mut().append_pair("flow", token.as_str());
        url.into()
    }

    /// Run one remote step under the call timeout, tagging failures with the step
    async fn call<T>(
        &self,
        step: FlowStep,
        fut: impl Future<Output = op_protocol::Result<T>>,
    ) -> Result<T> {
        let source = match tokio::time::timeout(self.config.call_timeout, fut).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(source)) => source,
            Err(_) => ProtocolError::Timeout(self.config.call_timeout),
        };

        tracing::error!(step = %step, error = %source, "Remote step failed");
        Err(FlowError::upstream(step, source))
    }
}

/// Access token of a grant that must be finalized on issue
fn issued_token(step: FlowStep, grant: Grant) -> Result<AccessToken> {
    grant.access_token.ok_or_else(|| FlowError::UnexpectedResponse {
        step,
        reason: "grant requires interaction".into(),
    })
}

/// Split the spend grant into what the session keeps and what the caller sees
fn spend_authorization(
    grant: Grant,
    client_nonce: Option<String>,
    sender: &WalletAddress,
) -> Result<(SpendAuthorization, Option<String>, Option<InteractionProof>)> {
    let step = FlowStep::RequestOutgoingPaymentGrant;

    if let Some(token) = grant.access_token {
        return Ok((SpendAuthorization::Issued(token), None, None));
    }

    let continuation = grant.continuation.ok_or_else(|| FlowError::UnexpectedResponse {
        step,
        reason: "pending grant without continuation".into(),
    })?;

    let Some(interaction) = grant.interaction else {
        return Ok((SpendAuthorization::Pending(continuation), None, None));
    };

    let proof = match client_nonce {
        Some(client_nonce) => {
            let server_nonce = interaction.finish_nonce.ok_or_else(|| FlowError::UnexpectedResponse {
                step,
                reason: "interaction without finish nonce".into(),
            })?;
            Some(InteractionProof {
                client_nonce,
                server_nonce,
                grant_endpoint: sender.auth_server.clone(),
            })
        }
        None => None,
    };

    Ok((
        SpendAuthorization::Pending(continuation),
        Some(interaction.redirect_url),
        proof,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use op_protocol::demo::{DEMO_RECEIVER, DEMO_SENDER};
    use op_protocol::{
        AccessType, Continuation, IncomingPayment, MockOpenPaymentsClient, Operation,
        OutgoingPayment, Quote,
    };

    fn orchestrator(client: &Arc<MockOpenPaymentsClient>) -> PaymentOrchestrator {
        let config =
            FlowConfig::new(DEMO_SENDER, DEMO_RECEIVER, "http://localhost:3000/callback").unwrap();
        PaymentOrchestrator::new(config, client.clone(), client.clone())
    }

    fn amount(value: &str) -> MajorAmount {
        MajorAmount::parse(value).unwrap()
    }

    #[tokio::test]
    async fn test_interactive_start_suspends() {
        let client = Arc::new(MockOpenPaymentsClient::new());
        let orchestrator = orchestrator(&client);

        let start = orchestrator.start_payment(amount("100.00"), true).await.unwrap();
        let PaymentStart::AwaitingConsent { redirect_url, flow_token } = start else {
            panic!("expected a consent redirect");
        };
        assert!(redirect_url.contains("/interact/"));

        let session = orchestrator.flows().get(&flow_token).unwrap().unwrap();
        assert_eq!(session.debit_amount.value, "10000");
        assert!(!session.is_authorized());
        assert!(session.proof.is_some());

        assert_eq!(
            client.calls(),
            vec![
                Operation::ResolveWallet,
                Operation::ResolveWallet,
                Operation::RequestGrant,
                Operation::CreateIncomingPayment,
                Operation::RequestGrant,
                Operation::CreateQuote,
                Operation::RequestGrant,
            ]
        );
        assert!(client.outgoing_payments().is_empty());
    }

    #[tokio::test]
    async fn test_pre_authorized_pays_synchronously() {
        let client = Arc::new(MockOpenPaymentsClient::pre_authorized());
        let orchestrator = orchestrator(&client);

        let start = orchestrator.start_payment(amount("12.5"), false).await.unwrap();
        let PaymentStart::Completed(receipt) = start else {
            panic!("expected a completed payment");
        };
        assert_eq!(receipt.debit_amount.value, "1250");
        assert_eq!(client.outgoing_payments().len(), 1);
        assert_eq!(client.call_count(Operation::ContinueGrant), 0);

        // Registry entry consumed
        assert!(orchestrator.pending().get(&receipt.incoming_payment_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_interactive_request_on_pre_authorized_network_completes() {
        let client = Arc::new(MockOpenPaymentsClient::pre_authorized());
        let orchestrator = orchestrator(&client);

        let start = orchestrator.start_payment(amount("1"), true).await.unwrap();
        assert!(matches!(start, PaymentStart::Completed(_)));
    }

    /// Authorization server that keeps spend grants pending even when no
    /// interaction was requested
    struct WithheldSpendGrants {
        inner: Arc<MockOpenPaymentsClient>,
        /// Answer with a redirect the user must visit, instead of a bare continuation
        demand_interaction: bool,
    }

    #[async_trait]
    impl OpenPaymentsClient for WithheldSpendGrants {
        async fn resolve_wallet(&self, url: &str) -> op_protocol::Result<WalletAddress> {
            self.inner.resolve_wallet(url).await
        }

        async fn request_grant(
            &self,
            auth_server: &str,
            request: &GrantRequest,
        ) -> op_protocol::Result<Grant> {
            if request.access_type() != Some(AccessType::OutgoingPayment) {
                return self.inner.request_grant(auth_server, request).await;
            }
            if self.demand_interaction {
                let request = request
                    .clone()
                    .with_interaction(InteractRequest::redirect_without_finish());
                return self.inner.request_grant(auth_server, &request).await;
            }
            Ok(Grant {
                access_token: None,
                continuation: Some(Continuation {
                    uri: format!("{auth_server}continue/withheld"),
                    access_token: "withheld".into(),
                    wait_seconds: None,
                }),
                interaction: None,
            })
        }

        async fn continue_grant(
            &self,
            continuation: &Continuation,
            interact_ref: Option<&str>,
        ) -> op_protocol::Result<Grant> {
            if self.demand_interaction {
                return self.inner.continue_grant(continuation, interact_ref).await;
            }
            Ok(Grant::default())
        }

        async fn create_incoming_payment(
            &self,
            resource_server: &str,
            access_token: &str,
            request: &IncomingPaymentRequest,
        ) -> op_protocol::Result<IncomingPayment> {
            self.inner
                .create_incoming_payment(resource_server, access_token, request)
                .await
        }

        async fn create_quote(
            &self,
            resource_server: &str,
            access_token: &str,
            request: &QuoteRequest,
        ) -> op_protocol::Result<Quote> {
            self.inner.create_quote(resource_server, access_token, request).await
        }

        async fn create_outgoing_payment(
            &self,
            resource_server: &str,
            access_token: &str,
            request: &OutgoingPaymentRequest,
        ) -> op_protocol::Result<OutgoingPayment> {
            self.inner
                .create_outgoing_payment(resource_server, access_token, request)
                .await
        }

        fn name(&self) -> &str {
            "WithheldSpendGrants"
        }
    }

    fn withholding(
        client: &Arc<MockOpenPaymentsClient>,
        demand_interaction: bool,
    ) -> PaymentOrchestrator {
        let server: Arc<dyn OpenPaymentsClient> = Arc::new(WithheldSpendGrants {
            inner: client.clone(),
            demand_interaction,
        });
        let config =
            FlowConfig::new(DEMO_SENDER, DEMO_RECEIVER, "http://localhost:3000/callback").unwrap();
        PaymentOrchestrator::new(config, server.clone(), server)
    }

    #[tokio::test]
    async fn test_withheld_grant_hands_back_incoming_payment() {
        let client = Arc::new(MockOpenPaymentsClient::new());
        let orchestrator = withholding(&client, false);

        let start = orchestrator.start_payment(amount("1"), false).await.unwrap();
        let PaymentStart::AwaitingExecution(awaiting) = start else {
            panic!("expected the flow to await execute");
        };
        assert!(awaiting.redirect_url.is_none());
        assert_eq!(awaiting.debit_amount.value, "100");
        assert!(client.outgoing_payments().is_empty());

        // The parked grant is reachable through the returned id
        let err = orchestrator.execute(&awaiting.incoming_payment_id).await.unwrap_err();
        assert!(matches!(err, FlowError::ConsentIncomplete));
        assert!(orchestrator.abandon_quote(&awaiting.incoming_payment_id).unwrap());
    }

    #[tokio::test]
    async fn test_interaction_on_non_interactive_start_keeps_redirect() {
        let client = Arc::new(MockOpenPaymentsClient::new());
        let orchestrator = withholding(&client, true);

        let start = orchestrator.start_payment(amount("2"), false).await.unwrap();
        let PaymentStart::AwaitingExecution(awaiting) = start else {
            panic!("expected the flow to await execute");
        };
        let redirect_url = awaiting.redirect_url.clone().unwrap();
        assert_eq!(client.call_count(Operation::ContinueGrant), 0);

        client.approve(&redirect_url).unwrap();
        let receipt = orchestrator.execute(&awaiting.incoming_payment_id).await.unwrap();
        assert_eq!(receipt.incoming_payment_id, awaiting.incoming_payment_id);
        assert_eq!(client.outgoing_payments().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_synchronous_payment_clears_registry() {
        let client = Arc::new(MockOpenPaymentsClient::pre_authorized());
        client.fail_on(Operation::CreateOutgoingPayment, 500, "internal_error");
        let pending = Arc::new(MemorySessionStore::<String>::new());
        let orchestrator = orchestrator(&client)
            .with_stores(Arc::new(MemorySessionStore::<FlowToken>::new()), pending.clone());

        let err = orchestrator.start_payment(amount("4"), false).await.unwrap_err();
        assert_eq!(err.step(), Some(FlowStep::CreateOutgoingPayment));
        assert!(pending.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_invalid_amount_makes_no_calls() {
        let client = Arc::new(MockOpenPaymentsClient::new());
        let err = MajorAmount::parse("-5").unwrap_err();
        assert!(matches!(err, FlowError::InvalidAmount(_)));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_upstream_failure_names_step() {
        let client = Arc::new(MockOpenPaymentsClient::new());
        client.fail_on(Operation::CreateQuote, 500, "internal_error");
        let orchestrator = orchestrator(&client);

        let err = orchestrator.start_payment(amount("5"), true).await.unwrap_err();
        assert_eq!(err.step(), Some(FlowStep::CreateQuote));
        assert!(matches!(
            err,
            FlowError::Upstream {
                source: ProtocolError::Upstream { status: 500, .. },
                ..
            }
        ));
        // Nothing after the failing step ran
        assert_eq!(client.call_count(Operation::RequestGrant), 2);
    }

    #[tokio::test]
    async fn test_unknown_wallet_fails_resolution() {
        let client = Arc::new(MockOpenPaymentsClient::new());
        let config = FlowConfig::new(
            DEMO_SENDER,
            "https://ilp.mock/nobody",
            "http://localhost:3000/callback",
        )
        .unwrap();
        let orchestrator = PaymentOrchestrator::new(config, client.clone(), client.clone());

        let err = orchestrator.start_payment(amount("5"), true).await.unwrap_err();
        assert_eq!(err.step(), Some(FlowStep::ResolveReceiverWallet));
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out() {
        let client = Arc::new(MockOpenPaymentsClient::new().with_latency(Duration::from_millis(200)));
        let config = FlowConfig::new(DEMO_SENDER, DEMO_RECEIVER, "http://localhost:3000/callback")
            .unwrap()
            .with_call_timeout(Duration::from_millis(20));
        let orchestrator = PaymentOrchestrator::new(config, client.clone(), client.clone());

        let err = orchestrator.start_quote(amount("5")).await.unwrap_err();
        assert!(matches!(
            err,
            FlowError::Upstream {
                step: FlowStep::ResolveSenderWallet | FlowStep::ResolveReceiverWallet,
                source: ProtocolError::Timeout(_),
            }
        ));
    }

    #[tokio::test]
    async fn test_quote_then_pay() {
        let client = Arc::new(MockOpenPaymentsClient::new().with_quote_fee(15));
        let orchestrator = orchestrator(&client);

        let quote = orchestrator.start_quote(amount("20")).await.unwrap();
        assert_eq!(quote.debit_amount.value, "2015");
        let redirect_url = quote.redirect_url.clone().unwrap();

        // Before consent the grant stays pending and the entry survives
        let err = orchestrator.execute(&quote.incoming_payment_id).await.unwrap_err();
        assert!(matches!(err, FlowError::ConsentIncomplete));
        assert!(orchestrator.pending().get(&quote.incoming_payment_id).unwrap().is_some());

        let callback = client.approve(&redirect_url).unwrap();
        assert!(callback.finish_uri.is_none());

        let receipt = orchestrator.execute(&quote.incoming_payment_id).await.unwrap();
        assert_eq!(receipt.incoming_payment_id, quote.incoming_payment_id);
        assert_eq!(client.outgoing_payments().len(), 1);

        let err = orchestrator.execute(&quote.incoming_payment_id).await.unwrap_err();
        assert!(matches!(err, FlowError::NoPendingGrant(_)));
    }

    #[tokio::test]
    async fn test_pre_authorized_quote_has_no_redirect() {
        let client = Arc::new(MockOpenPaymentsClient::pre_authorized());
        let orchestrator = orchestrator(&client);

        let quote = orchestrator.start_quote(amount("3.33")).await.unwrap();
        assert!(quote.redirect_url.is_none());

        orchestrator.execute(&quote.incoming_payment_id).await.unwrap();
        assert_eq!(client.outgoing_payments().len(), 1);
    }

    #[tokio::test]
    async fn test_execute_unknown_receivable() {
        let client = Arc::new(MockOpenPaymentsClient::new());
        let orchestrator = orchestrator(&client);

        let err = orchestrator
            .execute("https://ilp.mock/incoming-payments/missing")
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::NoPendingGrant(_)));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_abandon_quote() {
        let client = Arc::new(MockOpenPaymentsClient::new());
        let orchestrator = orchestrator(&client);

        let quote = orchestrator.start_quote(amount("1")).await.unwrap();
        assert!(orchestrator.abandon_quote(&quote.incoming_payment_id).unwrap());
        assert!(!orchestrator.abandon_quote(&quote.incoming_payment_id).unwrap());

        let err = orchestrator.execute(&quote.incoming_payment_id).await.unwrap_err();
        assert!(matches!(err, FlowError::NoPendingGrant(_)));
    }

    #[tokio::test]
    async fn test_failed_continuation_keeps_session() {
        let client = Arc::new(MockOpenPaymentsClient::new());
        let orchestrator = orchestrator(&client);

        let quote = orchestrator.start_quote(amount("1")).await.unwrap();
        client.fail_on(Operation::ContinueGrant, 503, "unavailable");

        let err = orchestrator.execute(&quote.incoming_payment_id).await.unwrap_err();
        assert_eq!(err.step(), Some(FlowStep::ContinueOutgoingPaymentGrant));
        assert!(orchestrator.pending().get(&quote.incoming_payment_id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_finish_uri_carries_flow_token() {
        let client = Arc::new(MockOpenPaymentsClient::new());
        let orchestrator = orchestrator(&client);
        let token = FlowToken::from_string("abc123");

        assert_eq!(
            orchestrator.finish_uri(&token),
            "http://localhost:3000/callback?flow=abc123"
        );
    }
}
