//! # Post-Call Correlation
//!
//! Calls handled by a human or by voicemail have no transcript from the
//! telephony provider unless its transcription webhook arrives. Calls that
//! went through the AI voice agent have one, but on the AI platform, keyed by
//! the platform's conversation id. This module joins the two:
//!
//! - [`candidate`]: defensive parsing of platform conversations
//! - [`scoring`]: phone + time scoring and exclusive assignment
//! - [`engine`]: triggers, the concurrent fetch barrier and the writes
//!
//! Everything here is strictly post-call and best-effort. When nothing
//! matches, the call gets a placeholder note so no completed record is left
//! blank.

pub mod candidate;
pub mod engine;
pub mod scoring;

pub use candidate::{ExternalCandidate, TranscriptTurn};
pub use engine::{placeholder_note, CorrelationEngine, SummaryWriter, SweepReport, SyncOutcome};
pub use scoring::{assign, best_candidate, Assignment, MatchScore};
