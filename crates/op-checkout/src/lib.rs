//! # op-checkout
//!
//! Orchestration of Open Payments checkouts: one payment request becomes a
//! chain of grants and resources across a sending and a receiving wallet,
//! with user consent woven in through a redirect.
//!
//! ## Flow Variants
//!
//! ### 1. Pay by link (redirect)
//!
//! ```text
//! ┌─────────────┐  start_payment  ┌──────────────┐  consent  ┌─────────────┐  resume  ┌─────────┐
//! │  Your Site  │────────────────▶│ Auth Server  │──────────▶│  /callback  │─────────▶│ Payment │
//! └─────────────┘  redirect_url   └──────────────┘           └─────────────┘          └─────────┘
//! ```
//!
//! The flow suspends after the spend grant is requested. Nothing waits for the
//! user: the session is parked under a flow token carried in the callback URI
//! and the callback request picks it up.
//!
//! ### 2. Quote then pay (two calls)
//!
//! `start_quote` returns the incoming payment, debit amount and (if needed) a
//! consent redirect; `execute` later finalizes the grant and pays.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use op_checkout::{FlowConfig, MajorAmount, PaymentOrchestrator, PaymentStart};
//!
//! let orchestrator = PaymentOrchestrator::new(FlowConfig::from_env()?, sender, receiver);
//!
//! match orchestrator.start_payment(MajorAmount::parse("100.00")?, true).await? {
//!     PaymentStart::AwaitingConsent { redirect_url, .. } => { /* send user there */ }
//!     PaymentStart::Completed(receipt) => { /* done */ }
//!     PaymentStart::AwaitingExecution(quote) => { /* execute later */ }
//! }
//! ```

pub mod amount;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod resume;
pub mod session;

pub use amount::{MajorAmount, from_minor_units, to_minor_units};
pub use config::FlowConfig;
pub use error::{FlowError, FlowStep, Result};
pub use orchestrator::{ConsentMode, PaymentOrchestrator, PaymentReceipt, PaymentStart, QuoteStart};
pub use resume::RedirectResumeHandler;
pub use session::{
    FlowSession, FlowToken, InteractionProof, MemorySessionStore, SessionStore, SpendAuthorization,
};
