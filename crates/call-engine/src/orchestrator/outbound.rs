//! Two-leg outbound calls
//!
//! The operator's own phone is rung first. When that leg answers, the
//! provider fetches the bridge document, which dials the destination with
//! recording from answer. One recorded session per destination contact.

use std::sync::Arc;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::CallEngineConfig;
use crate::database::{CallDirection, CallStatus, DatabaseManager, NewCallRecord};
use crate::error::{CallEngineError, Result};
use crate::integration::{OutboundCallRequest, TelephonyClient};
use crate::notify::{EngineEvent, NotificationSink};
use crate::routing::hunt::RECORDING_CALLBACK_PATH;
use crate::routing::{CallControlDocument, Dial, DialTarget};

pub const OUTBOUND_BRIDGE_PATH: &str = "/webhooks/voice/outbound-bridge";
pub const STATUS_CALLBACK_PATH: &str = "/webhooks/voice/status";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundRequest {
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub callback_number: Option<String>,
    /// Free-form label for who the operator is calling
    #[serde(default)]
    pub participant: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundStarted {
    pub call_sid: String,
    pub status: CallStatus,
    pub to: String,
    pub callback_number: String,
    pub participant: Option<String>,
}

pub struct OutboundBridger {
    db: DatabaseManager,
    telephony: Arc<dyn TelephonyClient>,
    notifier: Arc<dyn NotificationSink>,
    config: Arc<CallEngineConfig>,
}

impl OutboundBridger {
    pub fn new(
        db: DatabaseManager,
        telephony: Arc<dyn TelephonyClient>,
        notifier: Arc<dyn NotificationSink>,
        config: Arc<CallEngineConfig>,
    ) -> Self {
        Self {
            db,
            telephony,
            notifier,
            config,
        }
    }

    /// Ring the operator's callback number; the destination is carried in
    /// the answer URL
    pub async fn initiate(&self, request: &OutboundRequest) -> Result<OutboundStarted> {
        let to = required(request.to.as_deref(), "to")?;
        let callback_number = required(request.callback_number.as_deref(), "callbackNumber")?;
        let from = self
            .config
            .telephony
            .from_number
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| CallEngineError::not_configured("telephony.from_number"))?;

        let answer_url = Url::parse_with_params(
            &self.config.general.callback_url(OUTBOUND_BRIDGE_PATH),
            &[("to", to)],
        )
        .map_err(|e| CallEngineError::configuration(format!("Invalid public base URL: {}", e)))?;

        let created = self
            .telephony
            .create_call(&OutboundCallRequest {
                to: callback_number.to_string(),
                from: from.to_string(),
                answer_url: answer_url.to_string(),
                status_callback: Some(self.config.general.callback_url(STATUS_CALLBACK_PATH)),
            })
            .await?;

        let record = NewCallRecord::new(&created.sid, CallDirection::Outbound, CallStatus::Initiated)
            .with_numbers(to, callback_number);
        self.db.insert_call_if_absent(&record).await?;
        self.notifier.publish(EngineEvent::CallUpdated {
            session_id: created.sid.clone(),
            status: CallStatus::Initiated,
        });

        info!(
            "📞 Outbound call {} started: ringing {} to bridge to {}",
            created.sid, callback_number, to
        );
        Ok(OutboundStarted {
            call_sid: created.sid,
            status: CallStatus::Initiated,
            to: to.to_string(),
            callback_number: callback_number.to_string(),
            participant: request.participant.clone().filter(|p| !p.trim().is_empty()),
        })
    }

    /// Document served once the operator answers
    pub fn bridge_document(&self, to: Option<&str>) -> CallControlDocument {
        let Some(to) = to.map(str::trim).filter(|t| !t.is_empty()) else {
            return CallControlDocument::new()
                .say("No destination number was provided for this call.")
                .hangup();
        };

        let mut dial = Dial::new(DialTarget::Number(to.to_string()))
            .record(self.config.general.callback_url(RECORDING_CALLBACK_PATH));
        if let Some(from) = self.config.telephony.from_number.as_deref().filter(|n| !n.trim().is_empty()) {
            dial = dial.caller_id(from);
        }
        CallControlDocument::new().dial(dial)
    }
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CallEngineError::invalid_input(format!("{} is required", field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::{ProviderResource, RecordingAudio, SmsRequest};
    use crate::notify::MemoryNotifier;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingTelephony {
        calls: Mutex<Vec<OutboundCallRequest>>,
    }

    #[async_trait]
    impl TelephonyClient for RecordingTelephony {
        async fn create_call(&self, request: &OutboundCallRequest) -> Result<ProviderResource> {
            self.calls.lock().push(request.clone());
            Ok(ProviderResource {
                sid: "CAOUT1".to_string(),
                status: Some("queued".to_string()),
            })
        }

        async fn send_sms(&self, _request: &SmsRequest) -> Result<ProviderResource> {
            Err(CallEngineError::not_configured("sms"))
        }

        async fn fetch_recording(&self, _recording_sid: &str) -> Result<RecordingAudio> {
            Err(CallEngineError::not_configured("recordings"))
        }
    }

    fn config() -> CallEngineConfig {
        let mut config = CallEngineConfig::default();
        config.general.public_base_url = "https://calls.example.org".to_string();
        config.telephony.from_number = Some("+61290000000".to_string());
        config
    }

    async fn bridger() -> (DatabaseManager, Arc<RecordingTelephony>, OutboundBridger) {
        let db = DatabaseManager::new_in_memory().await.unwrap();
        let telephony = Arc::new(RecordingTelephony::default());
        let bridger = OutboundBridger::new(
            db.clone(),
            telephony.clone(),
            Arc::new(MemoryNotifier::new()),
            Arc::new(config()),
        );
        (db, telephony, bridger)
    }

    #[tokio::test]
    async fn test_initiate_rings_operator_first() {
        let (db, telephony, bridger) = bridger().await;
        let started = bridger
            .initiate(&OutboundRequest {
                to: Some("0412 345 678".to_string()),
                callback_number: Some("+61400000001".to_string()),
                participant: Some("Jo (client)".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(started.call_sid, "CAOUT1");

        let placed = telephony.calls.lock()[0].clone();
        assert_eq!(placed.to, "+61400000001");
        assert_eq!(placed.from, "+61290000000");
        assert!(placed
            .answer_url
            .starts_with("https://calls.example.org/webhooks/voice/outbound-bridge?to="));
        assert_eq!(
            placed.status_callback.as_deref(),
            Some("https://calls.example.org/webhooks/voice/status")
        );

        let record = db.get_call("CAOUT1").await.unwrap().unwrap();
        assert_eq!(record.direction, CallDirection::Outbound);
        assert_eq!(record.status, CallStatus::Initiated);
        assert_eq!(record.counterparty_number, "0412 345 678");
        assert_eq!(record.internal_number, "+61400000001");
    }

    #[tokio::test]
    async fn test_missing_fields_are_input_errors() {
        let (_db, telephony, bridger) = bridger().await;
        let missing_to = bridger
            .initiate(&OutboundRequest {
                callback_number: Some("+61400000001".to_string()),
                ..Default::default()
            })
            .await;
        assert!(matches!(missing_to, Err(CallEngineError::InvalidInput(_))));

        let blank_callback = bridger
            .initiate(&OutboundRequest {
                to: Some("+61412345678".to_string()),
                callback_number: Some("  ".to_string()),
                ..Default::default()
            })
            .await;
        assert!(matches!(blank_callback, Err(CallEngineError::InvalidInput(_))));
        assert!(telephony.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_bridge_document_dials_destination_with_recording() {
        let (_db, _telephony, bridger) = bridger().await;
        let doc = bridger.bridge_document(Some("+61412345678"));
        let dial = doc.dial_verb().unwrap();
        assert_eq!(dial.target, DialTarget::Number("+61412345678".to_string()));
        assert_eq!(dial.caller_id.as_deref(), Some("+61290000000"));
        assert_eq!(
            dial.recording_status_callback.as_deref(),
            Some("https://calls.example.org/webhooks/voice/recording")
        );

        assert!(bridger.bridge_document(None).dial_verb().is_none());
    }
}
