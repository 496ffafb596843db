//! Provider and AI platform webhook routes

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Form, Json, Router,
};
use serde::Deserialize;
use tracing::{debug, warn};

use super::ApiState;
use crate::database::CallStatus;
use crate::error::Result;
use crate::orchestrator::{
    InboundSms, PostCallOutcome, RecordingCallback, SmsStatusCallback, StatusCallback, TranscriptionCallback,
    SIGNATURE_HEADER,
};
use crate::routing::{CallControlDocument, DialOutcome, HuntStep, InboundCall};

pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/webhooks/voice/inbound", post(voice_inbound))
        .route("/webhooks/voice/hunt-step", post(hunt_step))
        .route("/webhooks/voice/outbound-bridge", post(outbound_bridge))
        .route("/webhooks/voice/status", post(voice_status))
        .route("/webhooks/voice/recording", post(voice_recording))
        .route("/webhooks/voice/transcription", post(voice_transcription))
        .route("/webhooks/sms/inbound", post(sms_inbound))
        .route("/webhooks/sms/status", post(sms_status))
        .route("/webhooks/ai/post-call", post(ai_post_call))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InboundForm {
    #[serde(default)]
    call_sid: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    call_status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HuntStepQuery {
    #[serde(default)]
    call_sid: Option<String>,
    #[serde(default)]
    step: Option<String>,
    #[serde(default)]
    from: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DialForm {
    #[serde(default)]
    call_sid: Option<String>,
    #[serde(default)]
    dial_call_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BridgeQuery {
    #[serde(default)]
    to: Option<String>,
}

async fn voice_inbound(State(state): State<ApiState>, Form(form): Form<InboundForm>) -> CallControlDocument {
    let router = state.engine.router();
    if form.call_sid.trim().is_empty() {
        warn!("⚠️ Inbound webhook without CallSid");
        return router.voicemail_document();
    }
    router
        .handle_inbound(&InboundCall {
            call_sid: form.call_sid.trim().to_string(),
            from: form.from,
            to: form.to,
            status: form.call_status.as_deref().and_then(CallStatus::parse),
        })
        .await
}

async fn hunt_step(
    State(state): State<ApiState>,
    Query(query): Query<HuntStepQuery>,
    Form(form): Form<DialForm>,
) -> CallControlDocument {
    let router = state.engine.router();
    let call_sid = query
        .call_sid
        .or(form.call_sid)
        .map(|sid| sid.trim().to_string())
        .filter(|sid| !sid.is_empty());
    let step = query.step.as_deref().and_then(|s| s.trim().parse::<usize>().ok());
    let (Some(call_sid), Some(step)) = (call_sid, step) else {
        warn!("⚠️ Hunt-step webhook without callSid or step");
        return router.voicemail_document();
    };

    router
        .handle_dial_outcome(&HuntStep {
            call_sid,
            step,
            from: query.from,
            outcome: DialOutcome::parse(form.dial_call_status.as_deref().unwrap_or("")),
        })
        .await
}

async fn outbound_bridge(State(state): State<ApiState>, Query(query): Query<BridgeQuery>) -> CallControlDocument {
    state.engine.bridger().bridge_document(query.to.as_deref())
}

async fn voice_status(State(state): State<ApiState>, Form(callback): Form<StatusCallback>) -> Result<StatusCode> {
    state.engine.webhooks().handle_status(&callback).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn voice_recording(
    State(state): State<ApiState>,
    Form(callback): Form<RecordingCallback>,
) -> Result<StatusCode> {
    state.engine.webhooks().handle_recording(&callback).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn voice_transcription(
    State(state): State<ApiState>,
    Form(callback): Form<TranscriptionCallback>,
) -> Result<StatusCode> {
    state.engine.webhooks().handle_transcription(&callback).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Answered with an empty document so the provider sends no auto-reply
async fn sms_inbound(
    State(state): State<ApiState>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<CallControlDocument> {
    let sms = InboundSms::from_form(&form)?;
    state.engine.webhooks().handle_inbound_sms(&sms).await?;
    Ok(CallControlDocument::new())
}

async fn sms_status(State(state): State<ApiState>, Form(callback): Form<SmsStatusCallback>) -> Result<StatusCode> {
    if !state.engine.webhooks().handle_sms_status(&callback).await? {
        debug!("SMS status for {} not applied", callback.message_sid);
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn ai_post_call(State(state): State<ApiState>, headers: HeaderMap, body: Bytes) -> Result<Json<PostCallOutcome>> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok());
    let outcome = state.engine.ai_webhook().handle(signature, &body).await?;
    Ok(Json(outcome))
}
