//! # Careline Call Engine
//!
//! Inbound hunt-group routing and post-call record keeping for a small
//! voice operation fronted by a cloud telephony provider.
//!
//! This crate provides:
//! - Hunt-group routing of inbound calls across agent devices, driven step by
//!   step from provider callbacks
//! - An availability oracle combining explicit agent status with busy
//!   detection from in-flight calls
//! - Idempotent ingestion of call status, recording, transcription and SMS
//!   webhooks
//! - Outbound calls bridged through an agent's own phone
//! - Correlation of AI voice-agent conversations with provider call records,
//!   with background summarization
//! - Short-lived signed tokens for playing back call recordings
//! - HTTP API for operators, guarded by bearer tokens
//!
//! ## Architecture
//!
//! ```text
//!   provider ──webhooks──▶ ┌──────────────┐ ◀──REST── operator UI
//!                          │  api (axum)  │
//!                          └──────┬───────┘
//!                                 ▼
//!                          ┌──────────────┐
//!                          │  CallEngine  │──▶ NotificationSink
//!                          └──────┬───────┘
//!          ┌──────────────┬───────┴──────┬───────────────┐
//!          ▼              ▼              ▼               ▼
//!    HuntGroupRouter  WebhookIngestor  CorrelationEngine  AudioTokenIssuer
//!          │              │              │
//!          └──────────────┴──────┬───────┘
//!                                ▼
//!                      DatabaseManager (sqlx)
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use careline_call_engine::prelude::*;
//!
//! # async fn example() -> careline_call_engine::Result<()> {
//! let config = CallEngineConfig::load(None)?;
//! let server = CallEngineServerBuilder::new()
//!     .with_config(config)
//!     .build()
//!     .await?;
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod api;
pub mod audio;
pub mod config;
pub mod correlation;
pub mod database;
pub mod error;
pub mod integration;
pub mod logging;
pub mod notify;
pub mod orchestrator;
pub mod phone;
pub mod routing;
pub mod server;

pub use config::CallEngineConfig;
pub use error::{CallEngineError, Result};
pub use orchestrator::CallEngine;
pub use server::{CallEngineServer, CallEngineServerBuilder};

/// Commonly used types
pub mod prelude {
    pub use crate::agent::{
        AgentDirectory, AvailabilityOracle, HeuristicAvailabilityOracle, SqliteAgentDirectory, StaticAgentDirectory,
    };
    pub use crate::audio::{AudioToken, AudioTokenIssuer};
    pub use crate::config::CallEngineConfig;
    pub use crate::correlation::{CorrelationEngine, ExternalCandidate, SweepReport, SyncOutcome};
    pub use crate::database::{
        AvailabilityStatus, CallDirection, CallRecord, CallStatus, DatabaseManager, HuntGroup, HuntGroupInput,
        HuntGroupMember, HuntStrategy, SmsRecord,
    };
    pub use crate::error::{CallEngineError, Result};
    pub use crate::integration::{ConversationSource, Integrations, Summarizer, TelephonyClient};
    pub use crate::notify::{BroadcastNotifier, EngineEvent, MemoryNotifier, NotificationSink};
    pub use crate::orchestrator::{CallEngine, OutboundRequest, PostCallOutcome, SendSmsRequest};
    pub use crate::routing::{CallControlDocument, HuntGroupRouter};
    pub use crate::server::{CallEngineServer, CallEngineServerBuilder};
}
