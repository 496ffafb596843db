//! # HTTP Surface
//!
//! Three groups of routes share one [`ApiState`]:
//!
//! - `/webhooks/*`: telephony provider and AI platform callbacks. Form or raw
//!   JSON bodies, no bearer token; the AI webhook carries its own signature.
//! - `/api/*`: operator API behind a bearer token (see [`auth`]).
//! - `/api/audio/:token` and `/health`: unauthenticated; the audio route is
//!   scoped by its token.
//!
//! Handlers that answer the telephony provider with a call-control document
//! never fail: internal faults become the voicemail document.

pub mod admin;
pub mod auth;
pub mod calls;
pub mod webhooks;

use std::sync::Arc;

use axum::{
    middleware,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::orchestrator::CallEngine;

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<CallEngine>,
}

impl ApiState {
    pub fn new(engine: Arc<CallEngine>) -> Self {
        Self { engine }
    }
}

/// Build the complete router
pub fn create_router(engine: Arc<CallEngine>) -> Router {
    let state = ApiState::new(engine);

    let protected = Router::new()
        .merge(calls::routes())
        .merge(admin::routes())
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_bearer));

    Router::new()
        .merge(webhooks::routes())
        .merge(protected)
        .route("/api/audio/:token", get(calls::fetch_audio))
        .route("/health", get(health_check))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "call-engine",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
