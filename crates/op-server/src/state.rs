//! Application State

use std::sync::Arc;

use op_checkout::{PaymentOrchestrator, RedirectResumeHandler};
use op_protocol::MockOpenPaymentsClient;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Starts flows and executes quotes
    pub orchestrator: Arc<PaymentOrchestrator>,

    /// Completes redirect flows on the consent callback
    pub resume: Arc<RedirectResumeHandler>,

    /// In-memory network (None when talking to real servers)
    pub demo: Option<Arc<MockOpenPaymentsClient>>,
}

impl AppState {
    pub fn new(orchestrator: Arc<PaymentOrchestrator>, demo: Option<Arc<MockOpenPaymentsClient>>) -> Self {
        Self {
            resume: Arc::new(RedirectResumeHandler::new(orchestrator.clone())),
            orchestrator,
            demo,
        }
    }
}
