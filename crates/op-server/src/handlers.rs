//! HTTP Handlers

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};

use op_checkout::{FlowError, MajorAmount, PaymentReceipt, PaymentStart, QuoteStart};
use op_protocol::ProtocolError;

use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub demo_network: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct StartPaymentRequest {
    /// Decimal amount in the receiver's major unit, e.g. "100.00"
    pub amount: String,
    #[serde(default = "default_interactive")]
    pub interactive: bool,
}

const fn default_interactive() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub flow: Option<String>,
    pub interact_ref: Option<String>,
    pub hash: Option<String>,
    /// Set by the authorization server when the user declined
    pub result: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallbackResponse {
    Completed(PaymentReceipt),
    Cancelled,
}

#[derive(Debug, Deserialize)]
pub struct QuoteRequest {
    pub amount: String,
}

#[derive(Debug, Deserialize)]
pub struct IncomingPaymentRef {
    pub incoming_payment_id: String,
}

#[derive(Debug, Serialize)]
pub struct AbandonResponse {
    pub abandoned: bool,
}

#[derive(Debug, Deserialize)]
pub struct DemoConsentQuery {
    pub redirect: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map a flow failure to a status and error body
pub fn flow_error(err: &FlowError) -> ApiError {
    let status = match err {
        FlowError::InvalidAmount(_) | FlowError::InteractionHashMismatch => StatusCode::BAD_REQUEST,
        FlowError::SessionNotFound | FlowError::NoPendingGrant(_) => StatusCode::NOT_FOUND,
        FlowError::ConsentIncomplete => StatusCode::CONFLICT,
        FlowError::Upstream {
            source: ProtocolError::Timeout(_),
            ..
        } => StatusCode::GATEWAY_TIMEOUT,
        FlowError::Upstream { .. } | FlowError::UnexpectedResponse { .. } => StatusCode::BAD_GATEWAY,
        FlowError::Storage(_) | FlowError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!(code = err.code(), "Flow error: {}", err);
    } else {
        tracing::warn!(code = err.code(), "Flow rejected: {}", err);
    }

    (
        status,
        Json(ErrorResponse {
            error: err.user_message(),
            code: err.code().into(),
        }),
    )
}

fn parse_amount(input: &str) -> Result<MajorAmount, ApiError> {
    MajorAmount::parse(input).map_err(|e| flow_error(&e))
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        demo_network: state.demo.is_some(),
    })
}

/// Start a pay-by-link flow
pub async fn start_payment(
    State(state): State<AppState>,
    Json(payload): Json<StartPaymentRequest>,
) -> Result<Json<PaymentStart>, ApiError> {
    let amount = parse_amount(&payload.amount)?;

    let start = state
        .orchestrator
        .start_payment(amount, payload.interactive)
        .await
        .map_err(|e| flow_error(&e))?;

    Ok(Json(start))
}

/// Consent callback from the authorization server
pub async fn consent_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<CallbackResponse>, ApiError> {
    if query.result.as_deref() == Some("grant_rejected") {
        if let Some(flow) = &query.flow {
            state.resume.abandon(flow).map_err(|e| flow_error(&e))?;
        }
        tracing::info!("User declined the payment");
        return Ok(Json(CallbackResponse::Cancelled));
    }

    let Some(interact_ref) = query.interact_ref.as_deref().filter(|r| !r.is_empty()) else {
        tracing::warn!("Callback without interaction reference");
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "The callback is missing its interaction reference".into(),
                code: "MISSING_INTERACT_REF".into(),
            }),
        ));
    };

    let receipt = state
        .resume
        .resume(query.flow.as_deref(), interact_ref, query.hash.as_deref())
        .await
        .map_err(|e| flow_error(&e))?;

    Ok(Json(CallbackResponse::Completed(receipt)))
}

/// First call of quote-then-pay
pub async fn create_quote(
    State(state): State<AppState>,
    Json(payload): Json<QuoteRequest>,
) -> Result<Json<QuoteStart>, ApiError> {
    let amount = parse_amount(&payload.amount)?;

    let quote = state
        .orchestrator
        .start_quote(amount)
        .await
        .map_err(|e| flow_error(&e))?;

    Ok(Json(quote))
}

/// Second call of quote-then-pay
pub async fn execute_quote(
    State(state): State<AppState>,
    Json(payload): Json<IncomingPaymentRef>,
) -> Result<Json<PaymentReceipt>, ApiError> {
    let receipt = state
        .orchestrator
        .execute(&payload.incoming_payment_id)
        .await
        .map_err(|e| flow_error(&e))?;

    Ok(Json(receipt))
}

/// Drop a pending quote
pub async fn abandon_quote(
    State(state): State<AppState>,
    Json(payload): Json<IncomingPaymentRef>,
) -> Result<Json<AbandonResponse>, ApiError> {
    let abandoned = state
        .orchestrator
        .abandon_quote(&payload.incoming_payment_id)
        .map_err(|e| flow_error(&e))?;

    Ok(Json(AbandonResponse { abandoned }))
}

/// Stand-in consent screen for the in-memory network
///
/// Approves the grant behind `redirect` and forwards the browser to the
/// callback, as a real authorization server would.
pub async fn demo_consent(
    State(state): State<AppState>,
    Query(query): Query<DemoConsentQuery>,
) -> Result<Response, ApiError> {
    let not_found = || {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "No pending grant for this redirect".into(),
                code: "UNKNOWN_INTERACTION".into(),
            }),
        )
    };

    let demo = state.demo.as_ref().ok_or_else(not_found)?;
    let callback = demo.approve(&query.redirect).ok_or_else(not_found)?;

    match callback.callback_url() {
        Ok(Some(url)) => Ok(Redirect::to(&url).into_response()),
        Ok(None) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(e) => {
            tracing::error!("Demo callback error: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Could not build callback".into(),
                    code: "DEMO_ERROR".into(),
                }),
            ))
        }
    }
}
