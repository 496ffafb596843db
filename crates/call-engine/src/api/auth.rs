//! Bearer token middleware for the operator API

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use super::ApiState;
use crate::error::CallEngineError;

/// Reject requests whose `Authorization: Bearer` token is not configured.
/// An empty token list rejects everything.
pub async fn require_bearer(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Result<Response, CallEngineError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| CallEngineError::authentication("missing bearer token"))?;

    let accepted = state
        .engine
        .config()
        .api
        .bearer_tokens
        .iter()
        .any(|known| constant_time_eq(known.as_bytes(), token.as_bytes()));
    if !accepted {
        return Err(CallEngineError::authentication("bearer token not accepted"));
    }

    Ok(next.run(request).await)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
