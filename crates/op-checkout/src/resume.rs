//! Redirect Resume Handler
//!
//! Completes a suspended flow when the authorization server sends the user
//! back to the callback URI.

use std::sync::Arc;

use op_protocol::interaction_hash;

use crate::error::{FlowError, Result};
use crate::orchestrator::{PaymentOrchestrator, PaymentReceipt};
use crate::session::{FlowSession, FlowToken};

/// Handles consent callbacks for redirect flows
pub struct RedirectResumeHandler {
    orchestrator: Arc<PaymentOrchestrator>,
}

impl RedirectResumeHandler {
    pub const fn new(orchestrator: Arc<PaymentOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Finalize the grant parked under `flow_token` and create the payment
    ///
    /// Missing, unknown, expired and already used tokens all yield
    /// `SessionNotFound`. A session holding an interaction proof requires a
    /// matching `hash`; a missing or wrong one leaves the session in place.
    pub async fn resume(
        &self,
        flow_token: Option<&str>,
        interact_ref: &str,
        hash: Option<&str>,
    ) -> Result<PaymentReceipt> {
        let Some(token) = flow_token.filter(|t| !t.is_empty()).map(FlowToken::from_string) else {
            tracing::warn!("Resume without flow token");
            return Err(FlowError::SessionNotFound);
        };

        let flows = self.orchestrator.flows();
        let Some(session) = flows.get(&token)? else {
            tracing::warn!("Resume for unknown or consumed flow");
            return Err(FlowError::SessionNotFound);
        };

        verify_hash(&session, interact_ref, hash)?;

        self.orchestrator
            .settle(flows.as_ref(), &token, Some(interact_ref))
            .await
    }

    /// Drop the session under `flow_token`, e.g. after the user declined
    pub fn abandon(&self, flow_token: &str) -> Result<bool> {
        let removed = self
            .orchestrator
            .flows()
            .delete(&FlowToken::from_string(flow_token))?;
        if let Some(session) = &removed {
            tracing::info!(
                incoming_payment = %session.incoming_payment_id,
                "Flow abandoned"
            );
        }
        Ok(removed.is_some())
    }
}

fn verify_hash(session: &FlowSession, interact_ref: &str, hash: Option<&str>) -> Result<()> {
    let (proof, hash) = match (&session.proof, hash) {
        (Some(proof), Some(hash)) => (proof, hash),
        (None, None) => return Ok(()),
        (Some(_), None) => {
            tracing::warn!(
                incoming_payment = %session.incoming_payment_id,
                "Callback without interaction hash"
            );
            return Err(FlowError::InteractionHashMismatch);
        }
        (None, Some(_)) => return Err(FlowError::InteractionHashMismatch),
    };

    let expected = interaction_hash(
        &proof.client_nonce,
        &proof.server_nonce,
        interact_ref,
        &proof.grant_endpoint,
    );
    if expected != hash {
        tracing::warn!(
            incoming_payment = %session.incoming_payment_id,
            "Interaction hash mismatch"
        );
        return Err(FlowError::InteractionHashMismatch);
    }
    Ok(())
}
