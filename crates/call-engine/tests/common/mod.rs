//! Shared harness for the integration tests: in-process provider fakes and
//! an engine served from in-memory SQLite.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde_json::Value;
use tower::ServiceExt;

use careline_call_engine::integration::{
    ConversationRef, ConversationSource, Integrations, OutboundCallRequest, ProviderResource, RecordingAudio,
    SmsRequest, Summarizer, TelephonyClient,
};
use careline_call_engine::notify::MemoryNotifier;
use careline_call_engine::{CallEngine, CallEngineConfig, CallEngineError, CallEngineServerBuilder, Result};

pub const API_TOKEN: &str = "operator-token";
pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const OUR_NUMBER: &str = "+61290000000";

#[derive(Default)]
pub struct FakeTelephony {
    pub calls: Mutex<Vec<OutboundCallRequest>>,
    pub messages: Mutex<Vec<SmsRequest>>,
    pub fetched: Mutex<Vec<String>>,
}

#[async_trait]
impl TelephonyClient for FakeTelephony {
    async fn create_call(&self, request: &OutboundCallRequest) -> Result<ProviderResource> {
        let mut calls = self.calls.lock();
        calls.push(request.clone());
        Ok(ProviderResource {
            sid: format!("CAOUT{}", calls.len()),
            status: Some("queued".to_string()),
        })
    }

    async fn send_sms(&self, request: &SmsRequest) -> Result<ProviderResource> {
        let mut messages = self.messages.lock();
        messages.push(request.clone());
        Ok(ProviderResource {
            sid: format!("SM{}", messages.len()),
            status: Some("queued".to_string()),
        })
    }

    async fn fetch_recording(&self, recording_sid: &str) -> Result<RecordingAudio> {
        self.fetched.lock().push(recording_sid.to_string());
        Ok(RecordingAudio {
            content_type: "audio/mpeg".to_string(),
            bytes: Bytes::from_static(b"ID3-fake-audio"),
        })
    }
}

/// Conversation listing served from memory, in insertion order
#[derive(Default)]
pub struct FakeConversations {
    conversations: Mutex<Vec<(ConversationRef, Value)>>,
}

impl FakeConversations {
    pub fn add(&self, conversation_id: &str, start_time_unix: i64, detail: Value) {
        self.conversations.lock().push((
            ConversationRef {
                conversation_id: conversation_id.to_string(),
                start_time_unix: Some(start_time_unix),
            },
            detail,
        ));
    }
}

#[async_trait]
impl ConversationSource for FakeConversations {
    async fn list_conversations(&self, limit: usize) -> Result<Vec<ConversationRef>> {
        Ok(self
            .conversations
            .lock()
            .iter()
            .take(limit)
            .map(|(listed, _)| listed.clone())
            .collect())
    }

    async fn fetch_conversation(&self, conversation_id: &str) -> Result<Value> {
        self.conversations
            .lock()
            .iter()
            .find(|(listed, _)| listed.conversation_id == conversation_id)
            .map(|(_, detail)| detail.clone())
            .ok_or_else(|| CallEngineError::not_found(format!("conversation {}", conversation_id)))
    }
}

/// Echoes the first transcript line
pub struct FakeSummarizer;

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, transcript: &str) -> Result<String> {
        Ok(format!("Summary: {}", transcript.lines().next().unwrap_or_default()))
    }
}

pub fn test_config() -> CallEngineConfig {
    let mut config = CallEngineConfig::default();
    config.general.public_base_url = "https://calls.example.org".to_string();
    config.telephony.account_sid = Some("AC00000000".to_string());
    config.telephony.auth_token = Some("provider-secret".to_string());
    config.telephony.from_number = Some(OUR_NUMBER.to_string());
    config.ai_agent.webhook_secret = Some(WEBHOOK_SECRET.to_string());
    config.audio.token_secret = Some("audio-secret".to_string());
    config.api.bearer_tokens = vec![API_TOKEN.to_string()];
    config.correlation.grace_delay_secs = 0;
    config
}

pub struct TestHarness {
    pub engine: Arc<CallEngine>,
    pub app: Router,
    pub telephony: Arc<FakeTelephony>,
    pub conversations: Arc<FakeConversations>,
    pub notifier: Arc<MemoryNotifier>,
}

pub async fn harness() -> TestHarness {
    harness_with(test_config()).await
}

pub async fn harness_with(config: CallEngineConfig) -> TestHarness {
    let telephony = Arc::new(FakeTelephony::default());
    let conversations = Arc::new(FakeConversations::default());
    let notifier = Arc::new(MemoryNotifier::new());

    let server = CallEngineServerBuilder::new()
        .with_config(config)
        .with_in_memory_database()
        .with_integrations(Integrations {
            telephony: telephony.clone(),
            conversations: conversations.clone(),
            summarizer: Arc::new(FakeSummarizer),
        })
        .with_notifier(notifier.clone())
        .build()
        .await
        .expect("server builds");

    TestHarness {
        engine: server.engine().clone(),
        app: server.router(),
        telephony,
        conversations,
        notifier,
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("response body is JSON")
    }
}

impl TestHarness {
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.app.clone().oneshot(request).await.expect("router is infallible");
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.into_body().collect().await.expect("body collects").to_bytes();
        TestResponse {
            status,
            content_type,
            body,
        }
    }

    /// Form-encoded provider webhook
    pub async fn webhook(&self, path: &str, fields: &[(&str, &str)]) -> TestResponse {
        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form_encode(fields)))
            .expect("request builds");
        self.send(request).await
    }

    /// Bearer-authenticated JSON API call
    pub async fn api(&self, method: Method, path: &str, body: Option<Value>) -> TestResponse {
        let builder = Request::builder()
            .method(method)
            .uri(path)
            .header(header::AUTHORIZATION, format!("Bearer {}", API_TOKEN));
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request builds");
        self.send(request).await
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        let request = Request::builder().uri(path).body(Body::empty()).expect("request builds");
        self.send(request).await
    }

    /// Record a directory entry for each `(agent_id, phone)`
    pub async fn add_agents(&self, agents: &[(&str, &str)]) {
        for (agent_id, phone) in agents {
            let response = self
                .api(
                    Method::PUT,
                    &format!("/api/agents/{}", agent_id),
                    Some(serde_json::json!({"displayName": agent_id, "phoneNumber": phone})),
                )
                .await;
            assert_eq!(response.status, StatusCode::OK);
        }
    }

    pub async fn create_hunt_group(&self, members: &[&str]) -> Value {
        let members: Vec<Value> = members.iter().map(|id| serde_json::json!({"agentId": id})).collect();
        let response = self
            .api(
                Method::POST,
                "/api/hunt-groups",
                Some(serde_json::json!({
                    "name": "Front desk",
                    "ringSeconds": 15,
                    "members": members,
                    "active": true
                })),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED);
        response.json()
    }
}

pub fn form_encode(fields: &[(&str, &str)]) -> String {
    let url = reqwest::Url::parse_with_params("http://localhost/", fields).expect("static base URL");
    url.query().unwrap_or_default().to_string()
}

pub fn hunt_step_path(call_sid: &str, step: usize) -> String {
    format!("/webhooks/voice/hunt-step?callSid={}&step={}&from=0412345678", call_sid, step)
}

/// Poll `check` until it holds or about a second passes
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..50 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
