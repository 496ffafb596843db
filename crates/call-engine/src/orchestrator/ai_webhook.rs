//! AI voice-agent post-call webhook
//!
//! The payload is only trusted after its signature verifies:
//!
//! ```text
//! ElevenLabs-Signature: t=<unix secs>,v0=<hex HMAC-SHA256(secret, t + "." + raw body)>
//! ```
//!
//! Verification happens on the raw bytes before any parsing; a failed check
//! has no side effects. A verified conversation is then attached to a call:
//!
//! 1. the call whose provider sid the platform reported
//! 2. the most recent transcript-less inbound call in the window from the
//!    same phone number
//! 3. the most recent transcript-less inbound call in the window
//! 4. a new record keyed by the conversation id
//!
//! so a conversation is never dropped.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::CallEngineConfig;
use crate::correlation::{ExternalCandidate, SummaryWriter};
use crate::database::{CallDirection, CallRecord, CallStatus, DatabaseManager, NewCallRecord, StatusUpdate};
use crate::error::{CallEngineError, Result};
use crate::notify::{EngineEvent, NotificationSink, TranscriptSource};
use crate::phone;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "elevenlabs-signature";

/// Event type carrying a finished conversation
const POST_CALL_TRANSCRIPTION: &str = "post_call_transcription";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PostCallOutcome {
    Attached {
        session_id: String,
        conversation_id: String,
        created: bool,
    },
    /// Conversation already recorded, or the matched call already had a transcript
    Duplicate { session_id: String },
    Ignored { reason: String },
}

/// How a conversation was tied to a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchedBy {
    ProviderSid,
    Phone,
    MostRecent,
    Created,
}

pub struct AiPostCallHandler {
    db: DatabaseManager,
    summaries: SummaryWriter,
    notifier: Arc<dyn NotificationSink>,
    secret: Option<String>,
    tolerance_secs: i64,
    window_secs: i64,
}

impl AiPostCallHandler {
    pub fn new(
        db: DatabaseManager,
        summaries: SummaryWriter,
        notifier: Arc<dyn NotificationSink>,
        config: &CallEngineConfig,
    ) -> Self {
        Self {
            db,
            summaries,
            notifier,
            secret: config.ai_agent.webhook_secret.clone().filter(|s| !s.trim().is_empty()),
            tolerance_secs: config.ai_agent.signature_tolerance_secs,
            window_secs: config.correlation.webhook_match_window_secs,
        }
    }

    /// Verify, then attach the conversation
    pub async fn handle(&self, signature: Option<&str>, body: &[u8]) -> Result<PostCallOutcome> {
        self.verify_signature(signature, body, Utc::now().timestamp())?;

        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| CallEngineError::invalid_input(format!("post-call payload is not JSON: {}", e)))?;
        let event_type = payload.get("type").and_then(Value::as_str).unwrap_or(POST_CALL_TRANSCRIPTION);
        if event_type != POST_CALL_TRANSCRIPTION {
            debug!("Ignoring AI webhook event {}", event_type);
            return Ok(PostCallOutcome::Ignored {
                reason: format!("event type {}", event_type),
            });
        }

        let data = payload.get("data").unwrap_or(&payload);
        let conversation_id = data
            .get("conversation_id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| CallEngineError::invalid_input("conversation_id is required"))?;
        let candidate = ExternalCandidate::from_detail(conversation_id, data, None);

        self.attach(&candidate, data).await
    }

    /// Check `t=<ts>,v0=<hex>` against the raw body
    pub fn verify_signature(&self, header: Option<&str>, body: &[u8], now: i64) -> Result<()> {
        let secret = self
            .secret
            .as_deref()
            .ok_or_else(|| CallEngineError::not_configured("ai_agent.webhook_secret"))?;
        let header = header
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| CallEngineError::signature_mismatch("missing signature header"))?;

        let mut timestamp = None;
        let mut signature = None;
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value.trim()),
                Some(("v0", value)) => signature = Some(value.trim()),
                _ => {}
            }
        }
        let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
            return Err(CallEngineError::signature_mismatch("malformed signature header"));
        };

        let issued: i64 = timestamp
            .parse()
            .map_err(|_| CallEngineError::signature_mismatch("malformed signature timestamp"))?;
        if (now - issued).abs() > self.tolerance_secs {
            return Err(CallEngineError::signature_mismatch("signature timestamp outside tolerance"));
        }

        let expected = hex::decode(signature).map_err(|_| CallEngineError::signature_mismatch("malformed signature"))?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| CallEngineError::internal(format!("HMAC key rejected: {}", e)))?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| CallEngineError::signature_mismatch("signature does not match"))
    }

    async fn attach(&self, candidate: &ExternalCandidate, data: &Value) -> Result<PostCallOutcome> {
        if let Some(existing) = self.db.find_call_by_conversation(&candidate.conversation_id).await? {
            debug!("Conversation {} already recorded on {}", candidate.conversation_id, existing.session_id);
            return Ok(PostCallOutcome::Duplicate {
                session_id: existing.session_id,
            });
        }

        let started = candidate.start_time.unwrap_or_else(Utc::now);
        let (call, matched_by) = self.find_call(candidate, started).await?;
        let created = matched_by == MatchedBy::Created;
        info!(
            "🤖 AI conversation {} matched to {} ({:?})",
            candidate.conversation_id, call.session_id, matched_by
        );

        let Some(transcript) = candidate.transcript_text() else {
            warn!("⚠️ AI conversation {} carried no transcript", candidate.conversation_id);
            return Ok(PostCallOutcome::Attached {
                session_id: call.session_id,
                conversation_id: candidate.conversation_id.clone(),
                created,
            });
        };

        if !self
            .db
            .assign_conversation(&call.session_id, &candidate.conversation_id, &transcript)
            .await?
        {
            return Ok(PostCallOutcome::Duplicate {
                session_id: call.session_id,
            });
        }
        self.notifier.publish(EngineEvent::TranscriptAttached {
            session_id: call.session_id.clone(),
            source: TranscriptSource::AiWebhook,
        });

        match &candidate.platform_summary {
            Some(summary) => {
                self.summaries.store(&call.session_id, summary).await?;
            }
            None => {
                self.summaries.spawn(call.session_id.clone(), transcript, None);
            }
        }

        if created {
            if let Some(duration) = data.pointer("/metadata/call_duration_secs").and_then(Value::as_i64) {
                self.db
                    .apply_status_update(
                        &call.session_id,
                        &StatusUpdate {
                            duration_seconds: Some(duration),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
        }

        Ok(PostCallOutcome::Attached {
            session_id: call.session_id,
            conversation_id: candidate.conversation_id.clone(),
            created,
        })
    }

    async fn find_call(&self, candidate: &ExternalCandidate, started: DateTime<Utc>) -> Result<(CallRecord, MatchedBy)> {
        if let Some(sid) = &candidate.provider_call_sid {
            if let Some(call) = self.db.get_call(sid).await? {
                return Ok((call, MatchedBy::ProviderSid));
            }
        }

        let since = started - Duration::seconds(self.window_secs);
        let recent = self.db.list_transcriptless_inbound_since(since).await?;

        if let Some(call) = recent.iter().find(|call| {
            !call.counterparty_number.is_empty()
                && candidate
                    .phone_numbers
                    .iter()
                    .any(|number| phone::phones_match(number, &call.counterparty_number))
        }) {
            return Ok((call.clone(), MatchedBy::Phone));
        }
        if let Some(call) = recent.into_iter().next() {
            return Ok((call, MatchedBy::MostRecent));
        }

        let counterparty = candidate.phone_numbers.first().cloned().unwrap_or_default();
        let record = NewCallRecord::new(&candidate.conversation_id, CallDirection::Inbound, CallStatus::Completed)
            .with_numbers(counterparty, "")
            .created_at(started);
        self.db.insert_call_if_absent(&record).await?;
        let call = self
            .db
            .get_call(&candidate.conversation_id)
            .await?
            .ok_or_else(|| CallEngineError::internal("created call record vanished"))?;
        Ok((call, MatchedBy::Created))
    }
}

/// Signature header value for `body` at `timestamp`
pub fn sign_post_call(secret: &str, timestamp: i64, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| CallEngineError::internal(format!("HMAC key rejected: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(format!("t={},v0={}", timestamp, hex::encode(mac.finalize().into_bytes())))
}
