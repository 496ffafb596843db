//! Administrative routes: hunt groups, agents and feature settings

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::ApiState;
use crate::database::{
    AvailabilityRecord, AvailabilityStatus, DirectoryEntry, FeatureSettings, FeatureSettingsUpdate, HuntGroup,
    HuntGroupInput,
};
use crate::error::{CallEngineError, Result};

const DEFAULT_HISTORY_LIMIT: i64 = 50;

pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/api/hunt-groups", get(list_hunt_groups).post(create_hunt_group))
        .route(
            "/api/hunt-groups/:id",
            get(get_hunt_group).put(update_hunt_group).delete(delete_hunt_group),
        )
        .route("/api/agents/:id", get(get_agent).put(put_agent))
        .route(
            "/api/agents/:id/availability",
            get(get_availability).put(set_availability),
        )
        .route("/api/agents/:id/availability/history", get(availability_history))
        .route("/api/settings", get(get_settings).put(update_settings))
}

async fn list_hunt_groups(State(state): State<ApiState>) -> Result<Json<Vec<HuntGroup>>> {
    Ok(Json(state.engine.database().list_hunt_groups().await?))
}

async fn create_hunt_group(
    State(state): State<ApiState>,
    Json(input): Json<HuntGroupInput>,
) -> Result<(StatusCode, Json<HuntGroup>)> {
    let group = state.engine.database().create_hunt_group(input).await?;
    info!("🎯 Hunt group {} created ({} members)", group.name, group.members.len());
    Ok((StatusCode::CREATED, Json(group)))
}

async fn get_hunt_group(State(state): State<ApiState>, Path(id): Path<String>) -> Result<Json<HuntGroup>> {
    state
        .engine
        .database()
        .get_hunt_group(&id)
        .await?
        .map(Json)
        .ok_or_else(|| CallEngineError::not_found(format!("hunt group {}", id)))
}

async fn update_hunt_group(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(input): Json<HuntGroupInput>,
) -> Result<Json<HuntGroup>> {
    Ok(Json(state.engine.database().update_hunt_group(&id, input).await?))
}

async fn delete_hunt_group(State(state): State<ApiState>, Path(id): Path<String>) -> Result<StatusCode> {
    if state.engine.database().delete_hunt_group(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(CallEngineError::not_found(format!("hunt group {}", id)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentInput {
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    phone_number: Option<String>,
    #[serde(default)]
    browser_identity: Option<String>,
}

async fn get_agent(State(state): State<ApiState>, Path(id): Path<String>) -> Result<Json<DirectoryEntry>> {
    state
        .engine
        .database()
        .get_directory_entry(&id)
        .await?
        .map(Json)
        .ok_or_else(|| CallEngineError::not_found(format!("agent {}", id)))
}

async fn put_agent(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(input): Json<AgentInput>,
) -> Result<Json<DirectoryEntry>> {
    let entry = DirectoryEntry {
        agent_id: id,
        display_name: input.display_name,
        phone_number: input.phone_number.filter(|p| !p.trim().is_empty()),
        browser_identity: input.browser_identity.filter(|b| !b.trim().is_empty()),
    };
    state.engine.database().upsert_directory_entry(&entry).await?;
    Ok(Json(entry))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AvailabilityView {
    agent_id: String,
    status: AvailabilityStatus,
    /// False when the agent never set a status and is online by default
    explicit: bool,
}

#[derive(Debug, Deserialize)]
struct AvailabilityInput {
    status: String,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
}

async fn get_availability(State(state): State<ApiState>, Path(id): Path<String>) -> Result<Json<AvailabilityView>> {
    let current = state.engine.database().current_availability(&id).await?;
    Ok(Json(AvailabilityView {
        agent_id: id,
        status: current.unwrap_or(AvailabilityStatus::Online),
        explicit: current.is_some(),
    }))
}

async fn set_availability(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(input): Json<AvailabilityInput>,
) -> Result<Json<AvailabilityRecord>> {
    let status = AvailabilityStatus::parse(&input.status).ok_or_else(|| {
        CallEngineError::invalid_input(format!("unknown availability status '{}'", input.status))
    })?;
    let record = state.engine.database().record_availability(&id, status).await?;
    info!("👤 Agent {} is now {}", id, status.as_str());
    Ok(Json(record))
}

async fn availability_history(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<AvailabilityRecord>>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, 500);
    Ok(Json(state.engine.database().availability_history(&id, limit).await?))
}

async fn get_settings(State(state): State<ApiState>) -> Result<Json<FeatureSettings>> {
    Ok(Json(state.engine.database().feature_settings().await?))
}

async fn update_settings(
    State(state): State<ApiState>,
    Json(update): Json<FeatureSettingsUpdate>,
) -> Result<Json<FeatureSettings>> {
    Ok(Json(state.engine.database().update_feature_settings(update).await?))
}
