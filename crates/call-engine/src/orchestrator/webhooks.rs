//! Telephony provider webhooks
//!
//! Every handler is idempotent by provider sid: the record is created with
//! insert-or-ignore, then updated through a conditional write. Redelivered or
//! reordered webhooks converge on the same stored state.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::correlation::CorrelationEngine;
use crate::database::{
    CallDirection, CallRecord, CallStatus, DatabaseManager, NewCallRecord, NewSmsRecord, SmsDirection, StatusUpdate,
};
use crate::error::{CallEngineError, Result};
use crate::integration::telephony::{is_provider_url, is_recording_sid};
use crate::notify::{EngineEvent, NotificationSink, TranscriptSource};

/// Upper bound on `MediaUrlN` fields read from an inbound SMS
const MAX_SMS_MEDIA: usize = 10;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusCallback {
    pub call_sid: String,
    #[serde(default)]
    pub call_status: Option<String>,
    #[serde(default)]
    pub call_duration: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecordingCallback {
    pub call_sid: String,
    #[serde(default)]
    pub recording_url: Option<String>,
    #[serde(default)]
    pub recording_sid: Option<String>,
    #[serde(default)]
    pub recording_status: Option<String>,
    #[serde(default)]
    pub recording_duration: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TranscriptionCallback {
    pub call_sid: String,
    #[serde(default)]
    pub transcription_text: Option<String>,
    #[serde(default)]
    pub transcription_status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SmsStatusCallback {
    pub message_sid: String,
    #[serde(default)]
    pub message_status: Option<String>,
    #[serde(default)]
    pub sms_status: Option<String>,
}

/// An inbound SMS. Media arrive as numbered `MediaUrl0..N` fields, so this
/// is read from the raw form.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundSms {
    pub message_sid: String,
    pub from: String,
    pub to: String,
    pub body: String,
    pub media_urls: Vec<String>,
}

impl InboundSms {
    pub fn from_form(form: &HashMap<String, String>) -> Result<Self> {
        let field = |name: &str| form.get(name).map(|v| v.trim().to_string()).unwrap_or_default();

        let message_sid = [field("MessageSid"), field("SmsSid")]
            .into_iter()
            .find(|sid| !sid.is_empty())
            .ok_or_else(|| CallEngineError::invalid_input("MessageSid is required"))?;

        let declared = field("NumMedia").parse::<usize>().unwrap_or(0).min(MAX_SMS_MEDIA);
        let media_urls = (0..declared)
            .map(|i| field(&format!("MediaUrl{}", i)))
            .filter(|url| !url.is_empty())
            .collect();

        Ok(Self {
            message_sid,
            from: field("From"),
            to: field("To"),
            body: form.get("Body").cloned().unwrap_or_default(),
            media_urls,
        })
    }
}

pub struct WebhookIngestor {
    db: DatabaseManager,
    correlation: Arc<CorrelationEngine>,
    notifier: Arc<dyn NotificationSink>,
    telephony_api_base: String,
}

impl WebhookIngestor {
    pub fn new(
        db: DatabaseManager,
        correlation: Arc<CorrelationEngine>,
        notifier: Arc<dyn NotificationSink>,
        telephony_api_base: impl Into<String>,
    ) -> Self {
        Self {
            db,
            correlation,
            notifier,
            telephony_api_base: telephony_api_base.into(),
        }
    }

    /// Status callback: upsert, terminal-sticky, correlation once completed
    pub async fn handle_status(&self, callback: &StatusCallback) -> Result<CallRecord> {
        let sid = required_sid(&callback.call_sid)?;
        let direction = callback
            .direction
            .as_deref()
            .and_then(CallDirection::parse)
            .unwrap_or(CallDirection::Inbound);
        let from = callback.from.clone().unwrap_or_default();
        let to = callback.to.clone().unwrap_or_default();
        let (counterparty, internal) = match direction {
            CallDirection::Inbound => (from, to),
            CallDirection::Outbound => (to, from),
        };

        // status is left to the update so a first-seen `completed` still
        // counts as a transition
        self.db
            .insert_call_if_absent(
                &NewCallRecord::new(sid, direction, CallStatus::Initiated).with_numbers(&counterparty, &internal),
            )
            .await?;

        let update = StatusUpdate {
            status: callback.call_status.as_deref().and_then(CallStatus::parse),
            duration_seconds: callback.call_duration.as_deref().and_then(|d| d.trim().parse().ok()),
            direction: callback.direction.as_deref().and_then(CallDirection::parse),
            counterparty_number: Some(counterparty),
            internal_number: Some(internal),
        };
        let applied = self.db.apply_status_update(sid, &update).await?;

        if applied.record.status.is_terminal() && self.db.end_routing_session(sid).await? {
            debug!("Routing session for {} ended", sid);
        }
        if applied.changed {
            self.notifier.publish(EngineEvent::CallUpdated {
                session_id: sid.to_string(),
                status: applied.record.status,
            });
        }
        if applied.just_completed() {
            info!(
                "✅ Call {} completed after {}s",
                sid, applied.record.duration_seconds
            );
            if applied.record.duration_seconds > 0 && applied.record.transcript.is_none() {
                self.correlation.schedule_after_completion(sid);
            }
        }
        Ok(applied.record)
    }

    /// Recording callback: store the reference and schedule transcript
    /// acquisition. Returns whether anything was stored.
    ///
    /// The reference kept is the recording sid; audio is later fetched from
    /// the configured provider API by sid. A `RecordingUrl` naming any other
    /// host is rejected.
    pub async fn handle_recording(&self, callback: &RecordingCallback) -> Result<bool> {
        let sid = required_sid(&callback.call_sid)?;
        let Some(recording_sid) = callback.recording_sid.as_deref().map(str::trim).filter(|r| !r.is_empty()) else {
            debug!("Recording callback for {} without RecordingSid ignored", sid);
            return Ok(false);
        };
        if !is_recording_sid(recording_sid) {
            return Err(CallEngineError::invalid_input(format!("invalid RecordingSid '{}'", recording_sid)));
        }
        let url = callback.recording_url.as_deref().map(str::trim).filter(|u| !u.is_empty());
        if let Some(url) = url {
            if !is_provider_url(url, &self.telephony_api_base) {
                warn!("⚠️ Recording callback for {} names a foreign host, rejected", sid);
                return Err(CallEngineError::invalid_input("RecordingUrl is not on the provider API host"));
            }
        }

        let completed = callback
            .recording_status
            .as_deref()
            .map(|s| s.trim().eq_ignore_ascii_case("completed"))
            .unwrap_or(true);
        if !completed {
            debug!("Recording for {} not completed yet", sid);
            return Ok(false);
        }

        self.db
            .insert_call_if_absent(&NewCallRecord::new(sid, CallDirection::Inbound, CallStatus::Initiated))
            .await?;
        let stored = self.db.set_recording(sid, recording_sid, url).await?;
        if stored {
            info!("🎙️ Recording {} attached to {}", recording_sid, sid);
            self.notifier.publish(EngineEvent::RecordingAttached {
                session_id: sid.to_string(),
            });
            self.correlation.schedule_after_completion(sid);
        }
        Ok(stored)
    }

    /// Native transcription: write-once, then summarize
    pub async fn handle_transcription(&self, callback: &TranscriptionCallback) -> Result<bool> {
        let sid = required_sid(&callback.call_sid)?;
        let completed = callback
            .transcription_status
            .as_deref()
            .map(|s| s.trim().eq_ignore_ascii_case("completed"))
            .unwrap_or(false);
        let text = callback.transcription_text.as_deref().map(str::trim).unwrap_or("");
        if !completed || text.is_empty() {
            debug!("Transcription callback for {} carries nothing to store", sid);
            return Ok(false);
        }

        self.db
            .insert_call_if_absent(&NewCallRecord::new(sid, CallDirection::Inbound, CallStatus::Initiated))
            .await?;
        if !self.db.set_transcript_if_absent(sid, text).await? {
            debug!("Call {} already has a transcript", sid);
            return Ok(false);
        }

        info!("📝 Provider transcript stored for {}", sid);
        self.notifier.publish(EngineEvent::TranscriptAttached {
            session_id: sid.to_string(),
            source: TranscriptSource::Provider,
        });
        self.correlation
            .summaries()
            .spawn(sid.to_string(), text.to_string(), None);
        Ok(true)
    }

    pub async fn handle_inbound_sms(&self, sms: &InboundSms) -> Result<bool> {
        let inserted = self
            .db
            .insert_sms_if_absent(&NewSmsRecord {
                message_sid: sms.message_sid.clone(),
                direction: SmsDirection::Inbound,
                from_number: sms.from.clone(),
                to_number: sms.to.clone(),
                body: sms.body.clone(),
                media_urls: sms.media_urls.clone(),
                status: "received".to_string(),
            })
            .await?;
        if inserted {
            info!("💬 SMS {} received from {}", sms.message_sid, sms.from);
            self.notifier.publish(EngineEvent::SmsUpdated {
                message_sid: sms.message_sid.clone(),
                status: "received".to_string(),
            });
        }
        Ok(inserted)
    }

    pub async fn handle_sms_status(&self, callback: &SmsStatusCallback) -> Result<bool> {
        let sid = required_sid(&callback.message_sid)?;
        let Some(status) = callback
            .message_status
            .as_deref()
            .or(callback.sms_status.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            return Ok(false);
        };

        let updated = self.db.update_sms_status(sid, status).await?;
        if updated {
            self.notifier.publish(EngineEvent::SmsUpdated {
                message_sid: sid.to_string(),
                status: status.to_ascii_lowercase(),
            });
        }
        Ok(updated)
    }
}

fn required_sid(sid: &str) -> Result<&str> {
    let sid = sid.trim();
    if sid.is_empty() {
        return Err(CallEngineError::invalid_input("sid is required"));
    }
    Ok(sid)
}
