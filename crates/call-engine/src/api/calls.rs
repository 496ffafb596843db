//! Calls, SMS, audio and transcript routes

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::ApiState;
use crate::correlation::{SweepReport, SyncOutcome};
use crate::database::{CallRecord, SmsRecord};
use crate::error::{CallEngineError, Result};
use crate::orchestrator::{OutboundRequest, OutboundStarted, SendSmsRequest};

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 500;

pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/api/calls", get(list_calls))
        .route("/api/calls/outbound", post(start_outbound))
        .route("/api/calls/:sid", get(get_call))
        .route("/api/calls/:sid/audio-token", post(issue_audio_token))
        .route("/api/calls/:sid/transcript-sync", post(sync_transcript))
        .route("/api/transcripts/sync", post(sweep_transcripts))
        .route("/api/sms", get(list_sms).post(send_sms))
}

#[derive(Debug, Default, Deserialize)]
pub struct Page {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Page {
    fn bounds(&self) -> (i64, i64) {
        (
            self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            self.offset.unwrap_or(0).max(0),
        )
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTokenResponse {
    pub token: String,
    pub expires_at: i64,
    pub url: String,
}

async fn list_calls(State(state): State<ApiState>, Query(page): Query<Page>) -> Result<Json<Vec<CallRecord>>> {
    let (limit, offset) = page.bounds();
    Ok(Json(state.engine.database().list_calls(limit, offset).await?))
}

async fn get_call(State(state): State<ApiState>, Path(sid): Path<String>) -> Result<Json<CallRecord>> {
    state
        .engine
        .database()
        .get_call(&sid)
        .await?
        .map(Json)
        .ok_or_else(|| CallEngineError::not_found(format!("call {}", sid)))
}

async fn start_outbound(
    State(state): State<ApiState>,
    Json(request): Json<OutboundRequest>,
) -> Result<(StatusCode, Json<OutboundStarted>)> {
    let started = state.engine.bridger().initiate(&request).await?;
    Ok((StatusCode::CREATED, Json(started)))
}

async fn list_sms(State(state): State<ApiState>, Query(page): Query<Page>) -> Result<Json<Vec<SmsRecord>>> {
    let (limit, offset) = page.bounds();
    Ok(Json(state.engine.database().list_sms(limit, offset).await?))
}

async fn send_sms(
    State(state): State<ApiState>,
    Json(request): Json<SendSmsRequest>,
) -> Result<(StatusCode, Json<SmsRecord>)> {
    let sent = state.engine.sms().send(&request).await?;
    Ok((StatusCode::CREATED, Json(sent)))
}

async fn issue_audio_token(
    State(state): State<ApiState>,
    Path(sid): Path<String>,
) -> Result<Json<AudioTokenResponse>> {
    let issued = state.engine.issue_audio_token(&sid).await?;
    let url = state
        .engine
        .config()
        .general
        .callback_url(&format!("/api/audio/{}", issued.token));
    Ok(Json(AudioTokenResponse {
        token: issued.token,
        expires_at: issued.expires_at,
        url,
    }))
}

/// Token-scoped; sits outside the bearer layer
pub async fn fetch_audio(State(state): State<ApiState>, Path(token): Path<String>) -> Result<Response> {
    let audio = state.engine.fetch_audio(&token).await?;
    Ok((
        [
            (header::CONTENT_TYPE, audio.content_type),
            (header::CACHE_CONTROL, "private, max-age=300".to_string()),
        ],
        audio.bytes,
    )
        .into_response())
}

async fn sync_transcript(State(state): State<ApiState>, Path(sid): Path<String>) -> Result<Json<SyncOutcome>> {
    info!("🔄 Transcript sync requested for {}", sid);
    Ok(Json(state.engine.correlation().sync_call(&sid).await?))
}

async fn sweep_transcripts(State(state): State<ApiState>) -> Result<Json<SweepReport>> {
    Ok(Json(state.engine.correlation().sweep().await?))
}
