//! # Inbound Call Routing Module
//!
//! Inbound calls are distributed through the single active hunt group: its
//! members are rung one at a time, each for their ring timeout, until someone
//! answers or the list runs out. The telephony provider drives the loop with
//! one webhook per ring attempt; the engine answers each webhook with a
//! call-control document describing the next action.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Provider webhook (inbound / hunt-step)         │
//! │       (CallSid, caller number, step, dial outcome)          │
//! └─────────────────────────┬───────────────────────────────────┘
//!                           │
//! ┌─────────────────────────▼───────────────────────────────────┐
//! │                    HuntGroupRouter                          │
//! │  - Routing session lookup / creation                        │
//! │  - Availability oracle (manual status + live-call scan)     │
//! │  - Step advance, endpoint skip                              │
//! └─────────────────────────┬───────────────────────────────────┘
//!                           │
//!           ┌───────────────┼───────────────┐
//!           │               │               │
//! ┌─────────▼─────────┐ ┌───▼───────┐ ┌─────▼──────┐
//! │   Ring member i   │ │ AI agent  │ │ Voicemail  │
//! │                   │ │           │ │            │
//! │ • Browser or PSTN │ │ • Toggle  │ │ • Prompt   │
//! │ • Ring timeout    │ │ • Caller  │ │ • Bounded  │
//! │ • Action callback │ │   hint    │ │   record   │
//! └───────────────────┘ └───────────┘ └────────────┘
//! ```
//!
//! ## Routing Session
//!
//! Traversal state is persisted per call (see
//! [`crate::database::RoutingSession`]). The callback URL only carries hints
//! (`callSid`, `step`, `from`); the persisted session is authoritative, so a
//! redelivered or forged callback can never move a call backwards or skip a
//! member.
//!
//! ## Failure Semantics
//!
//! - a transport-level dial failure is treated as no answer
//! - a member without a routable endpoint is skipped without a ring attempt
//! - any internal fault returns the voicemail document; callers never hear
//!   dead air
//!
//! ## Modules
//!
//! - [`hunt`]: the hunt-group state machine
//! - [`document`]: call-control document builder

pub mod document;
pub mod hunt;

pub use document::{CallControlDocument, Dial, DialTarget, Verb};
pub use hunt::{DialOutcome, HuntGroupRouter, HuntStep, InboundCall};
