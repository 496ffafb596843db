//! Telephony provider REST client (Twilio-compatible)

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client, Response, Url};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::TelephonyConfig;
use crate::error::{CallEngineError, Result};

/// Parameters for placing a call whose answer webhook is `answer_url`
#[derive(Debug, Clone)]
pub struct OutboundCallRequest {
    pub to: String,
    pub from: String,
    pub answer_url: String,
    pub status_callback: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SmsRequest {
    pub to: String,
    pub from: String,
    pub body: String,
    pub media_urls: Vec<String>,
    pub status_callback: Option<String>,
}

/// The part of a created call or message the engine keeps
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderResource {
    pub sid: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RecordingAudio {
    pub content_type: String,
    pub bytes: Bytes,
}

#[async_trait]
pub trait TelephonyClient: Send + Sync {
    async fn create_call(&self, request: &OutboundCallRequest) -> Result<ProviderResource>;

    async fn send_sms(&self, request: &SmsRequest) -> Result<ProviderResource>;

    /// Download a recording of the configured account by its sid
    async fn fetch_recording(&self, recording_sid: &str) -> Result<RecordingAudio>;
}

pub struct TwilioClient {
    http: Client,
    config: TelephonyConfig,
}

impl TwilioClient {
    pub fn new(config: TelephonyConfig, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, config })
    }

    fn credentials(&self) -> Result<(&str, &str)> {
        match (self.config.account_sid.as_deref(), self.config.auth_token.as_deref()) {
            (Some(sid), Some(token)) if !sid.trim().is_empty() && !token.trim().is_empty() => Ok((sid, token)),
            _ => Err(CallEngineError::not_configured("telephony provider credentials")),
        }
    }

    fn account_url(&self, sid: &str, resource: &str) -> String {
        format!(
            "{}/Accounts/{}/{}.json",
            self.config.api_base_url.trim_end_matches('/'),
            sid,
            resource
        )
    }

    /// Media URL of a recording, always under the configured API host
    fn recording_media_url(&self, account_sid: &str, recording_sid: &str) -> Result<String> {
        if !is_recording_sid(recording_sid) {
            return Err(CallEngineError::invalid_input(format!(
                "'{}' is not a recording sid",
                recording_sid
            )));
        }
        Ok(format!(
            "{}/Accounts/{}/Recordings/{}.mp3",
            self.config.api_base_url.trim_end_matches('/'),
            account_sid,
            recording_sid
        ))
    }
}

/// `RE` followed by alphanumerics
pub fn is_recording_sid(sid: &str) -> bool {
    sid.len() > 2 && sid.starts_with("RE") && sid.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Whether `url` points at the same scheme, host and port as `api_base_url`
pub fn is_provider_url(url: &str, api_base_url: &str) -> bool {
    match (Url::parse(url.trim()), Url::parse(api_base_url)) {
        (Ok(url), Ok(base)) => {
            url.scheme() == base.scheme()
                && url.host_str().is_some()
                && url.host_str() == base.host_str()
                && url.port_or_known_default() == base.port_or_known_default()
        }
        _ => false,
    }
}

async fn check(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CallEngineError::integration(format!("{} failed with {}: {}", what, status, body)))
}

#[async_trait]
impl TelephonyClient for TwilioClient {
    async fn create_call(&self, request: &OutboundCallRequest) -> Result<ProviderResource> {
        let (sid, token) = self.credentials()?;

        let mut params: Vec<(&str, &str)> = vec![
            ("To", request.to.as_str()),
            ("From", request.from.as_str()),
            ("Url", request.answer_url.as_str()),
        ];
        if let Some(cb) = &request.status_callback {
            params.push(("StatusCallback", cb.as_str()));
            for event in ["initiated", "ringing", "answered", "completed"] {
                params.push(("StatusCallbackEvent", event));
            }
        }

        let response = self
            .http
            .post(self.account_url(sid, "Calls"))
            .basic_auth(sid, Some(token))
            .form(&params)
            .send()
            .await?;
        let created: ProviderResource = check(response, "create call").await?.json().await?;
        info!("📤 Provider accepted outbound call {} to {}", created.sid, request.to);
        Ok(created)
    }

    async fn send_sms(&self, request: &SmsRequest) -> Result<ProviderResource> {
        let (sid, token) = self.credentials()?;

        let mut params: Vec<(&str, &str)> = vec![
            ("To", request.to.as_str()),
            ("From", request.from.as_str()),
            ("Body", request.body.as_str()),
        ];
        for media in &request.media_urls {
            params.push(("MediaUrl", media.as_str()));
        }
        if let Some(cb) = &request.status_callback {
            params.push(("StatusCallback", cb.as_str()));
        }

        let response = self
            .http
            .post(self.account_url(sid, "Messages"))
            .basic_auth(sid, Some(token))
            .form(&params)
            .send()
            .await?;
        let sent: ProviderResource = check(response, "send SMS").await?.json().await?;
        info!("📤 Provider accepted SMS {} to {}", sent.sid, request.to);
        Ok(sent)
    }

    async fn fetch_recording(&self, recording_sid: &str) -> Result<RecordingAudio> {
        let (sid, token) = self.credentials()?;
        let url = self.recording_media_url(sid, recording_sid)?;
        debug!("Fetching recording {}", url);

        let response = self.http.get(&url).basic_auth(sid, Some(token)).send().await?;
        let response = check(response, "fetch recording").await?;
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("audio/mpeg")
            .to_string();
        let bytes = response.bytes().await?;
        Ok(RecordingAudio { content_type, bytes })
    }
}
