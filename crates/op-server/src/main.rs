//! op-server
//!
//! Axum server exposing Open Payments checkout flows over HTTP.
//!
//! Runs against an in-memory payment network by default. Set `OP_CLIENT=http`
//! with `SENDER_CLIENT_WALLET` / `RECEIVER_CLIENT_WALLET` to talk to real
//! Open Payments servers.

mod handlers;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use op_checkout::{FlowConfig, FlowToken, MemorySessionStore, PaymentOrchestrator};
use op_protocol::demo::{DEMO_RECEIVER, DEMO_SENDER};
use op_protocol::{
    HttpClientConfig, HttpOpenPaymentsClient, MockOpenPaymentsClient, OpenPaymentsClient,
    RequestSigner, UnsignedRequests,
};

use crate::handlers::{
    abandon_quote, consent_callback, create_quote, demo_consent, execute_quote, health_check,
    start_payment,
};
use crate::state::AppState;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Initialize clients
    let client_kind = std::env::var("OP_CLIENT").unwrap_or_else(|_| "mock".into());
    let (config, sender, receiver, demo) = match client_kind.as_str() {
        "http" => {
            let config = FlowConfig::from_env().context("Loading flow configuration")?;
            let (sender, receiver) = connect_http().await?;
            tracing::warn!("⚠ Requests are sent unsigned - configure a RequestSigner for production");
            (config, sender, receiver, None)
        }
        "mock" => {
            let config = FlowConfig::from_lookup(|key| {
                std::env::var(key).ok().or_else(|| match key {
                    "SENDER_WALLET_ADDRESS" => Some(DEMO_SENDER.into()),
                    "RECEIVER_WALLET_ADDRESS" => Some(DEMO_RECEIVER.into()),
                    "CALLBACK_URL" => Some("http://localhost:3000/callback".into()),
                    _ => None,
                })
            })
            .context("Loading flow configuration")?;

            let mock = Arc::new(MockOpenPaymentsClient::new());
            tracing::info!("✓ Using in-memory payment network");
            tracing::info!("  Approve consent via GET /demo/consent?redirect=<redirect_url>");
            let client: Arc<dyn OpenPaymentsClient> = mock.clone();
            (config, client.clone(), client, Some(mock))
        }
        other => anyhow::bail!("Unknown OP_CLIENT '{other}' (expected 'mock' or 'http')"),
    };

    tracing::info!(
        sender = %config.sender_wallet,
        receiver = %config.receiver_wallet,
        callback = %config.callback_url,
        "Flow configuration loaded"
    );

    // Session stores
    let flows = Arc::new(MemorySessionStore::<FlowToken>::for_ttl(config.session_ttl));
    let pending = Arc::new(MemorySessionStore::<String>::for_ttl(config.session_ttl));
    if config.session_ttl.is_some() {
        spawn_sweeper(flows.clone(), pending.clone());
    }

    let orchestrator =
        Arc::new(PaymentOrchestrator::new(config, sender, receiver).with_stores(flows, pending));

    // Build application state
    let state = AppState::new(orchestrator, demo);
    let app = build_router(state);

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 op-server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health               - Health check");
    tracing::info!("  POST /api/payments         - Start pay-by-link");
    tracing::info!("  GET  /callback             - Consent callback");
    tracing::info!("  POST /api/quotes           - Quote (step one)");
    tracing::info!("  POST /api/quotes/execute   - Pay a quote (step two)");
    tracing::info!("  POST /api/quotes/abandon   - Drop a pending quote");
    tracing::info!("");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Routes, CORS and request tracing
pub fn build_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new()
        // Health
        .route("/health", get(health_check))
        // Pay by link
        .route("/api/payments", post(start_payment))
        .route("/callback", get(consent_callback))
        // Quote then pay
        .route("/api/quotes", post(create_quote))
        .route("/api/quotes/execute", post(execute_quote))
        .route("/api/quotes/abandon", post(abandon_quote));

    if state.demo.is_some() {
        router = router.route("/demo/consent", get(demo_consent));
    }

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build both HTTP clients, resolving their wallets concurrently
async fn connect_http() -> anyhow::Result<(Arc<dyn OpenPaymentsClient>, Arc<dyn OpenPaymentsClient>)> {
    let sender_config =
        HttpClientConfig::from_env("SENDER").context("SENDER_CLIENT_WALLET not set")?;
    let receiver_config =
        HttpClientConfig::from_env("RECEIVER").context("RECEIVER_CLIENT_WALLET not set")?;

    let signer: Arc<dyn RequestSigner> = Arc::new(UnsignedRequests);
    let (sender, receiver) = tokio::join!(
        HttpOpenPaymentsClient::connect(sender_config, signer.clone()),
        HttpOpenPaymentsClient::connect(receiver_config, signer),
    );

    let sender = sender.context("Connecting sender client")?;
    let receiver = receiver.context("Connecting receiver client")?;
    tracing::info!("✓ Connected to Open Payments servers");

    Ok((Arc::new(sender), Arc::new(receiver)))
}

/// Periodically drop sessions whose consent window has passed
fn spawn_sweeper(flows: Arc<MemorySessionStore<FlowToken>>, pending: Arc<MemorySessionStore<String>>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            match (flows.purge_expired(), pending.purge_expired()) {
                (Ok(a), Ok(b)) if a + b > 0 => {
                    tracing::info!(flows = a, pending = b, "Expired sessions purged");
                }
                (Ok(_), Ok(_)) => {}
                (Err(e), _) | (_, Err(e)) => tracing::error!("Session sweep failed: {}", e),
            }
        }
    });
}
