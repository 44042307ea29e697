//! End-to-end checkout scenarios against the in-memory network

use std::sync::Arc;

use op_checkout::{
    FlowConfig, FlowError, FlowToken, MajorAmount, PaymentOrchestrator, PaymentStart,
    RedirectResumeHandler,
};
use op_protocol::demo::{DEMO_RECEIVER, DEMO_SENDER};
use op_protocol::{ConsentCallback, MockOpenPaymentsClient, Operation, interaction_hash};

struct Checkout {
    client: Arc<MockOpenPaymentsClient>,
    orchestrator: Arc<PaymentOrchestrator>,
    handler: Arc<RedirectResumeHandler>,
}

impl Checkout {
    fn new() -> Self {
        let client = Arc::new(MockOpenPaymentsClient::new());
        let config =
            FlowConfig::new(DEMO_SENDER, DEMO_RECEIVER, "https://shop.example/callback").unwrap();
        let orchestrator = Arc::new(PaymentOrchestrator::new(config, client.clone(), client.clone()));
        Self {
            handler: Arc::new(RedirectResumeHandler::new(orchestrator.clone())),
            orchestrator,
            client,
        }
    }

    /// Scenario A, returning what the user's browser would carry back
    async fn start_and_approve(&self, amount: &str) -> (FlowToken, ConsentCallback) {
        let start = self
            .orchestrator
            .start_payment(MajorAmount::parse(amount).unwrap(), true)
            .await
            .unwrap();
        let PaymentStart::AwaitingConsent {
            redirect_url,
            flow_token,
        } = start
        else {
            panic!("expected a consent redirect");
        };
        let callback = self.client.approve(&redirect_url).unwrap();
        (flow_token, callback)
    }
}

#[tokio::test]
async fn scenario_a_interactive_start_suspends() {
    let checkout = Checkout::new();

    let start = checkout
        .orchestrator
        .start_payment(MajorAmount::parse("100.00").unwrap(), true)
        .await
        .unwrap();

    let PaymentStart::AwaitingConsent {
        redirect_url,
        flow_token,
    } = start
    else {
        panic!("expected a consent redirect");
    };
    assert!(redirect_url.starts_with("https://auth.ilp.mock/interact/"));

    let session = checkout.orchestrator.flows().get(&flow_token).unwrap().unwrap();
    assert_eq!(session.debit_amount.value, "10000");
    assert_eq!(checkout.client.call_count(Operation::CreateOutgoingPayment), 0);

    // The finish URI handed to the auth server carries the token
    let callback = checkout.client.approve(&redirect_url).unwrap();
    let callback_url = callback.callback_url().unwrap().unwrap();
    assert!(callback_url.starts_with(&format!(
        "https://shop.example/callback?flow={flow_token}&interact_ref="
    )));
}

#[tokio::test]
async fn scenario_b_resume_pays_once_and_removes_session() {
    let checkout = Checkout::new();
    let (token, callback) = checkout.start_and_approve("100.00").await;

    let receipt = checkout
        .handler
        .resume(Some(token.as_str()), &callback.interact_ref, callback.hash.as_deref())
        .await
        .unwrap();

    let payments = checkout.client.outgoing_payments();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].id, receipt.payment_id);
    assert!(checkout.orchestrator.flows().get(&token).unwrap().is_none());
}

#[tokio::test]
async fn scenario_c_replay_is_session_not_found() {
    let checkout = Checkout::new();
    let (token, callback) = checkout.start_and_approve("100.00").await;

    checkout
        .handler
        .resume(Some(token.as_str()), &callback.interact_ref, callback.hash.as_deref())
        .await
        .unwrap();

    let replay = checkout
        .handler
        .resume(Some(token.as_str()), &callback.interact_ref, callback.hash.as_deref())
        .await;
    assert!(matches!(replay, Err(FlowError::SessionNotFound)));
    assert_eq!(checkout.client.outgoing_payments().len(), 1);
}

#[tokio::test]
async fn scenario_d_negative_amount_is_rejected_locally() {
    let checkout = Checkout::new();

    let result = MajorAmount::parse("-5");
    assert!(matches!(result, Err(FlowError::InvalidAmount(_))));
    assert!(MajorAmount::try_from(-5.0_f64).is_err());
    assert!(checkout.client.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_resumes_of_one_token_pay_once() {
    let checkout = Checkout::new();
    let (token, callback) = checkout.start_and_approve("42").await;

    let resume = |handler: Arc<RedirectResumeHandler>| {
        let token = token.clone();
        let callback = callback.clone();
        tokio::spawn(async move {
            handler
                .resume(Some(token.as_str()), &callback.interact_ref, callback.hash.as_deref())
                .await
        })
    };

    let (first, second) = tokio::join!(
        resume(checkout.handler.clone()),
        resume(checkout.handler.clone())
    );
    let outcomes = [first.unwrap(), second.unwrap()];

    let successes = outcomes.iter().filter(|r| r.is_ok()).count();
    let not_found = outcomes
        .iter()
        .filter(|r| matches!(r, Err(FlowError::SessionNotFound)))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(not_found, 1);
    assert_eq!(checkout.client.outgoing_payments().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn independent_flows_do_not_interfere() {
    let checkout = Arc::new(Checkout::new());

    let mut handles = Vec::new();
    for i in 1..=16 {
        let checkout = checkout.clone();
        handles.push(tokio::spawn(async move {
            let (token, callback) = checkout.start_and_approve(&format!("{i}.25")).await;
            checkout
                .handler
                .resume(Some(token.as_str()), &callback.interact_ref, callback.hash.as_deref())
                .await
                .map(|receipt| (token, receipt))
        }));
    }

    let mut tokens = std::collections::HashSet::new();
    for handle in handles {
        let (token, receipt) = handle.await.unwrap().unwrap();
        assert!(tokens.insert(token));
        assert!(receipt.debit_amount.value.ends_with("25"));
    }
    assert_eq!(checkout.client.outgoing_payments().len(), 16);
}

#[tokio::test]
async fn resume_before_consent_then_after() {
    let checkout = Checkout::new();
    let start = checkout
        .orchestrator
        .start_payment(MajorAmount::parse("9.99").unwrap(), true)
        .await
        .unwrap();
    let PaymentStart::AwaitingConsent {
        redirect_url,
        flow_token,
    } = start
    else {
        panic!("expected a consent redirect");
    };

    let proof = checkout
        .orchestrator
        .flows()
        .get(&flow_token)
        .unwrap()
        .unwrap()
        .proof
        .unwrap();
    let hash = interaction_hash(
        &proof.client_nonce,
        &proof.server_nonce,
        "premature",
        &proof.grant_endpoint,
    );
    let early = checkout
        .handler
        .resume(Some(flow_token.as_str()), "premature", Some(&hash))
        .await;
    assert!(matches!(early, Err(FlowError::ConsentIncomplete)));
    assert!(checkout.orchestrator.flows().get(&flow_token).unwrap().is_some());

    let callback = checkout.client.approve(&redirect_url).unwrap();
    let receipt = checkout
        .handler
        .resume(Some(flow_token.as_str()), &callback.interact_ref, callback.hash.as_deref())
        .await
        .unwrap();
    assert_eq!(receipt.debit_amount.value, "999");
}

#[tokio::test]
async fn failed_payment_creation_reports_step_and_consumes_session() {
    let checkout = Checkout::new();
    let (token, callback) = checkout.start_and_approve("5").await;
    checkout
        .client
        .fail_on(Operation::CreateOutgoingPayment, 500, "internal_error");

    let err = checkout
        .handler
        .resume(Some(token.as_str()), &callback.interact_ref, callback.hash.as_deref())
        .await
        .unwrap_err();
    assert_eq!(err.step(), Some(op_checkout::FlowStep::CreateOutgoingPayment));

    // The grant was finalized, so the session cannot be replayed
    let replay = checkout
        .handler
        .resume(Some(token.as_str()), &callback.interact_ref, callback.hash.as_deref())
        .await;
    assert!(matches!(replay, Err(FlowError::SessionNotFound)));
}

#[tokio::test]
async fn start_outcome_serializes_for_callers() {
    let checkout = Checkout::new();
    let start = checkout
        .orchestrator
        .start_payment(MajorAmount::parse("1").unwrap(), true)
        .await
        .unwrap();

    let json = serde_json::to_value(&start).unwrap();
    assert_eq!(json["status"], "awaiting_consent");
    assert!(json["redirect_url"].is_string());
    assert!(json["flow_token"].is_string());
}
