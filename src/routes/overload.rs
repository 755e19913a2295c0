//! Suggestion route — admission check, aggregation, policy, audit.
//!
//! SYSTEM CONTEXT
//! ==============
//! This is the engine's hot path: throttle first, aggregate second, run
//! the pure policy, and hand the (request, aggregate, suggestion) tuple
//! to the audit sink on a detached task so the response never waits on
//! audit I/O.
//!
//! ERROR HANDLING
//! ==============
//! Validation, throttling, and store failures are distinct outcomes;
//! nothing partially succeeds. Unparsable window values are not errors —
//! they fall back to the default window downstream.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequestParts, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Deserializer};
use tracing::error;

use crate::rate_limit::RETRY_AFTER_SECS;
use crate::routes::error_json;
use crate::services::audit::AuditEntry;
use crate::services::policy::Suggestion;
use crate::services::{history, policy};
use crate::state::AppState;

/// Shared bucket for callers with no identity and no resolvable address.
const ANONYMOUS_IDENTITY: &str = "anonymous";

const IDENTITY_HEADER: &str = "x-user-id";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

// =============================================================================
// INPUT
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct SuggestParams {
    #[serde(default, deserialize_with = "lenient_int")]
    pub exercise_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub window: Option<i32>,
}

/// Accept integers or numeric strings; anything else becomes `None`.
/// Query params always arrive as strings, JSON bodies as numbers.
fn lenient_int<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: std::str::FromStr + TryFrom<i64>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Str(String),
        Other(serde::de::IgnoredAny),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Int(v)) => T::try_from(v).ok(),
        Some(Raw::Str(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

// =============================================================================
// CALLER METADATA
// =============================================================================

/// Caller metadata used for admission control and the audit trail.
#[derive(Debug, Clone)]
pub struct Caller {
    pub identity: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl Caller {
    /// Bucket key: explicit identity, else client address, else the
    /// shared anonymous bucket.
    #[must_use]
    pub fn bucket_key(&self) -> &str {
        self.identity
            .as_deref()
            .or(self.client_ip.as_deref())
            .unwrap_or(ANONYMOUS_IDENTITY)
    }

    fn from_headers(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let identity = header_str(headers, IDENTITY_HEADER);
        let client_ip =
            forwarded_client_ip(headers).or_else(|| peer.map(|addr| addr.ip().to_string()));
        let user_agent = header_str(headers, header::USER_AGENT.as_str());
        Self { identity, client_ip, user_agent }
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self::from_headers(&parts.headers, peer))
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// First hop of `X-Forwarded-For`, if present.
fn forwarded_client_ip(headers: &HeaderMap) -> Option<String> {
    header_str(headers, FORWARDED_FOR_HEADER)
        .and_then(|raw| raw.split(',').next().map(|hop| hop.trim().to_owned()))
        .filter(|hop| !hop.is_empty())
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SuggestError {
    #[error("missing or invalid exercise_id")]
    InvalidExerciseId,
    #[error("rate limit exceeded")]
    Throttled,
    #[error("history query failed: {0}")]
    Store(#[from] sqlx::Error),
}

impl IntoResponse for SuggestError {
    fn into_response(self) -> Response {
        match self {
            Self::InvalidExerciseId => {
                error_json(StatusCode::BAD_REQUEST, "missing or invalid exercise_id")
            }
            Self::Throttled => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(serde_json::json!({
                        "error": "rate limit exceeded",
                        "retry_after_secs": RETRY_AFTER_SECS,
                    })),
                )
                    .into_response();
                if let Ok(value) = header::HeaderValue::from_str(&RETRY_AFTER_SECS.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                response
            }
            Self::Store(e) => {
                error!(error = %e, "history store query failed");
                error_json(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

/// `GET /api/overload/suggest?exercise_id=10&window=5`
pub async fn suggest_get(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<SuggestParams>,
) -> Result<Json<Suggestion>, SuggestError> {
    suggest(&state, &caller, params).await.map(Json)
}

/// `POST /api/overload/suggest` with the same parameters as a JSON body.
pub async fn suggest_post(
    State(state): State<AppState>,
    caller: Caller,
    Json(params): Json<SuggestParams>,
) -> Result<Json<Suggestion>, SuggestError> {
    suggest(&state, &caller, params).await.map(Json)
}

async fn suggest(
    state: &AppState,
    caller: &Caller,
    params: SuggestParams,
) -> Result<Suggestion, SuggestError> {
    let exercise_id = match params.exercise_id {
        Some(id) if id > 0 => id,
        _ => return Err(SuggestError::InvalidExerciseId),
    };

    // Admission control before any store work.
    if !state.rate_limiter.allow(caller.bucket_key()) {
        return Err(SuggestError::Throttled);
    }

    let window = history::clamp_window(params.window, &state.history);
    let aggregate = history::aggregate(&state.pool, exercise_id, window, &state.history).await?;
    let suggestion = policy::suggest(&aggregate, &state.policy);

    // Detached audit write; the response never waits on it.
    let sink = Arc::clone(&state.audit);
    let entry = audit_entry(caller, exercise_id, window, &suggestion);
    tokio::spawn(async move { sink.record(entry).await });

    Ok(suggestion)
}

fn audit_entry(caller: &Caller, exercise_id: i64, window: i32, suggestion: &Suggestion) -> AuditEntry {
    AuditEntry {
        identity: caller.identity.clone(),
        client_ip: caller.client_ip.clone(),
        user_agent: caller.user_agent.clone(),
        exercise_id,
        window,
        avg_load_kg: suggestion.avg_load_kg,
        avg_rir: suggestion.avg_rir,
        sample_count: suggestion.sample_count,
        suggested_load_kg: suggestion.suggested_load_kg,
        suggested_reps: suggestion.suggested_reps,
        rationale: suggestion.rationale.as_str(),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "overload_test.rs"]
mod tests;
