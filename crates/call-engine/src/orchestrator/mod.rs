//! # Call Engine Orchestration
//!
//! Coordinates the stateless components behind the HTTP surface. Every
//! inbound event from the telephony provider or the AI platform lands here
//! and is turned into keyed, idempotent writes against the call store.
//!
//! ```text
//!                ┌───────────────────────────────────────────┐
//!  provider ───► │ WebhookIngestor    status / recording /    │
//!  webhooks      │                    transcription / SMS     │──┐
//!                ├───────────────────────────────────────────┤  │
//!  AI platform ► │ AiPostCallHandler  verify ► match ► attach │  │
//!                ├───────────────────────────────────────────┤  ▼
//!  operator  ──► │ OutboundBridger    ring operator ► bridge  │ CorrelationEngine
//!  API           │ SmsSender                                  │  (grace delay,
//!                └───────────────────────────────────────────┘   sweep, summaries)
//! ```
//!
//! ## Modules
//!
//! - [`core`]: [`CallEngine`], wiring plus audio token issue/relay
//! - [`webhooks`]: provider webhook ingestion
//! - [`ai_webhook`]: signed AI post-call webhooks
//! - [`outbound`]: two-leg outbound calls
//! - [`sms`]: outbound SMS
//!
//! ## Delivery guarantees
//!
//! The provider may redeliver and reorder webhooks. Handlers never assume an
//! order: they insert-or-ignore the record, re-read it and apply conditional
//! updates (terminal-sticky status, write-once transcript). A duplicate
//! delivery leaves the stored record unchanged.

pub mod ai_webhook;
pub mod core;
pub mod outbound;
pub mod sms;
pub mod webhooks;

pub use self::ai_webhook::{sign_post_call, AiPostCallHandler, PostCallOutcome, SIGNATURE_HEADER};
pub use self::core::CallEngine;
pub use self::outbound::{OutboundBridger, OutboundRequest, OutboundStarted};
pub use self::sms::{SendSmsRequest, SmsSender};
pub use self::webhooks::{
    InboundSms, RecordingCallback, SmsStatusCallback, StatusCallback, TranscriptionCallback, WebhookIngestor,
};
