//! Outbound SMS

use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::config::CallEngineConfig;
use crate::database::{DatabaseManager, NewSmsRecord, SmsDirection, SmsRecord};
use crate::error::{CallEngineError, Result};
use crate::integration::{SmsRequest, TelephonyClient};
use crate::notify::{EngineEvent, NotificationSink};

pub const SMS_STATUS_CALLBACK_PATH: &str = "/webhooks/sms/status";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendSmsRequest {
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub media_urls: Vec<String>,
}

pub struct SmsSender {
    db: DatabaseManager,
    telephony: Arc<dyn TelephonyClient>,
    notifier: Arc<dyn NotificationSink>,
    config: Arc<CallEngineConfig>,
}

impl SmsSender {
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

    pub async fn send(&self, request: &SendSmsRequest) -> Result<SmsRecord> {
        let to = request
            .to
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CallEngineError::invalid_input("to is required"))?;
        let body = request.body.clone().unwrap_or_default();
        let media_urls: Vec<String> = request
            .media_urls
            .iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        if body.trim().is_empty() && media_urls.is_empty() {
            return Err(CallEngineError::invalid_input("body or mediaUrls is required"));
        }
        let from = self
            .config
            .telephony
            .from_number
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| CallEngineError::not_configured("telephony.from_number"))?;

        let sent = self
            .telephony
            .send_sms(&SmsRequest {
                to: to.to_string(),
                from: from.to_string(),
                body: body.clone(),
                media_urls: media_urls.clone(),
                status_callback: Some(self.config.general.callback_url(SMS_STATUS_CALLBACK_PATH)),
            })
            .await?;

        let status = sent.status.clone().unwrap_or_else(|| "queued".to_string());
        self.db
            .insert_sms_if_absent(&NewSmsRecord {
                message_sid: sent.sid.clone(),
                direction: SmsDirection::Outbound,
                from_number: from.to_string(),
                to_number: to.to_string(),
                body,
                media_urls,
                status: status.clone(),
            })
            .await?;
        info!("💬 SMS {} sent to {}", sent.sid, to);
        self.notifier.publish(EngineEvent::SmsUpdated {
            message_sid: sent.sid.clone(),
            status,
        });

        self.db
            .get_sms(&sent.sid)
            .await?
            .ok_or_else(|| CallEngineError::internal("stored SMS record vanished"))
    }
}
