//! Admin routes — rollup refresh and audit-log stats.
//!
//! DESIGN
//! ======
//! Both operations are for operators and schedulers, never the request
//! hot path. When `ADMIN_TOKEN` is set, requests must present it in
//! `X-Admin-Token`; with no token configured the routes are open
//! (development mode).

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::error;

use crate::routes::error_json;
use crate::services::rollup;
use crate::state::AppState;

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

const STATS_DEFAULT_LIMIT: i64 = 30;
const STATS_MAX_LIMIT: i64 = 1000;

// =============================================================================
// AUTH
// =============================================================================

fn admin_authorized(headers: &HeaderMap) -> bool {
    match std::env::var("ADMIN_TOKEN") {
        Ok(want) if !want.is_empty() => {
            headers.get(ADMIN_TOKEN_HEADER).and_then(|v| v.to_str().ok()) == Some(want.as_str())
        }
        _ => true,
    }
}

// =============================================================================
// REFRESH
// =============================================================================

/// `POST /api/admin/overload/refresh` — rebuild the precomputed rollup.
pub async fn refresh(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !admin_authorized(&headers) {
        return error_json(StatusCode::UNAUTHORIZED, "unauthorized");
    }

    match rollup::refresh(&state.pool).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => {
            error!(error = %e, stage = e.stage.as_str(), "rollup refresh failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "stage": e.stage,
                    "message": e.source.to_string(),
                })),
            )
                .into_response()
        }
    }
}

// =============================================================================
// STATS
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct StatsParams {
    pub group: Option<String>,
    pub exercise_id: Option<i64>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatsGroup {
    Exercise,
    Day,
    Hour,
}

impl StatsGroup {
    fn parse(raw: Option<&str>) -> Option<Self> {
        match raw.unwrap_or("exercise") {
            "exercise" => Some(Self::Exercise),
            "day" => Some(Self::Day),
            "hour" => Some(Self::Hour),
            _ => None,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Exercise => "exercise",
            Self::Day => "day",
            Self::Hour => "hour",
        }
    }
}

fn parse_rfc3339(raw: Option<&str>) -> Result<Option<OffsetDateTime>, String> {
    match raw {
        None => Ok(None),
        Some(s) => OffsetDateTime::parse(s, &Rfc3339)
            .map(Some)
            .map_err(|_| format!("invalid timestamp (RFC3339): {s}")),
    }
}

#[derive(Debug, Serialize)]
struct ExerciseStatsRow {
    exercise_id: i64,
    requests: i64,
    avg_suggested_load_kg: f64,
    avg_of_avg_load_kg: f64,
    avg_rir: f64,
    total_samples: i64,
    last_requested_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct BucketStatsRow {
    bucket: Option<String>,
    requests: i64,
    avg_suggested_load_kg: f64,
    avg_rir: f64,
}

/// `GET /api/admin/overload/stats` — aggregates over the audit log,
/// grouped by exercise, day, or hour.
pub async fn stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<StatsParams>,
) -> Response {
    if !admin_authorized(&headers) {
        return error_json(StatusCode::UNAUTHORIZED, "unauthorized");
    }

    let Some(group) = StatsGroup::parse(params.group.as_deref()) else {
        return error_json(StatusCode::BAD_REQUEST, "invalid group (use exercise|day|hour)");
    };
    if let Some(id) = params.exercise_id {
        if id <= 0 {
            return error_json(StatusCode::BAD_REQUEST, "invalid exercise_id");
        }
    }
    let from = match parse_rfc3339(params.from.as_deref()) {
        Ok(v) => v,
        Err(message) => return error_json(StatusCode::BAD_REQUEST, &message),
    };
    let to = match parse_rfc3339(params.to.as_deref()) {
        Ok(v) => v,
        Err(message) => return error_json(StatusCode::BAD_REQUEST, &message),
    };
    let limit = params.limit.unwrap_or(STATS_DEFAULT_LIMIT).clamp(1, STATS_MAX_LIMIT);

    let filter = StatsFilter { exercise_id: params.exercise_id, from, to, limit };
    let result = match group {
        StatsGroup::Exercise => exercise_stats(&state.pool, &filter).await,
        StatsGroup::Day | StatsGroup::Hour => bucket_stats(&state.pool, group, &filter).await,
    };

    match result {
        Ok(items) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "group": group.as_str(),
                "items": items,
                "limit": limit,
            })),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, group = group.as_str(), "audit stats query failed");
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

struct StatsFilter {
    exercise_id: Option<i64>,
    from: Option<OffsetDateTime>,
    to: Option<OffsetDateTime>,
    limit: i64,
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &StatsFilter) {
    if let Some(id) = filter.exercise_id {
        builder.push(" AND exercise_id = ").push_bind(id);
    }
    if let Some(from) = filter.from {
        builder.push(" AND requested_at >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        builder.push(" AND requested_at <= ").push_bind(to);
    }
}

async fn exercise_stats(
    pool: &PgPool,
    filter: &StatsFilter,
) -> Result<serde_json::Value, sqlx::Error> {
    let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
        r#"SELECT exercise_id,
                  COUNT(*)                                        AS requests,
                  COALESCE(AVG(suggested_load_kg::float8), 0)     AS avg_suggested_load_kg,
                  COALESCE(AVG(avg_load_kg::float8), 0)           AS avg_of_avg_load_kg,
                  COALESCE(AVG(avg_rir::float8), 0)               AS avg_rir,
                  COALESCE(SUM(sample_count), 0)::bigint          AS total_samples,
                  to_char(MAX(requested_at) AT TIME ZONE 'UTC',
                          'YYYY-MM-DD"T"HH24:MI:SS"Z"')           AS last_requested_at
           FROM overload_audit_log
           WHERE 1=1"#,
    );
    push_filters(&mut builder, filter);
    builder
        .push(" GROUP BY exercise_id ORDER BY requests DESC LIMIT ")
        .push_bind(filter.limit);

    let rows = builder.build().fetch_all(pool).await?;
    let items: Vec<ExerciseStatsRow> = rows
        .iter()
        .map(|row| ExerciseStatsRow {
            exercise_id: row.get("exercise_id"),
            requests: row.get("requests"),
            avg_suggested_load_kg: row.get("avg_suggested_load_kg"),
            avg_of_avg_load_kg: row.get("avg_of_avg_load_kg"),
            avg_rir: row.get("avg_rir"),
            total_samples: row.get("total_samples"),
            last_requested_at: row.get("last_requested_at"),
        })
        .collect();

    Ok(serde_json::to_value(items).unwrap_or_default())
}

async fn bucket_stats(
    pool: &PgPool,
    group: StatsGroup,
    filter: &StatsFilter,
) -> Result<serde_json::Value, sqlx::Error> {
    // `group` is a closed enum, so interpolating its literal is safe.
    let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
        r#"SELECT to_char(date_trunc('{}', requested_at) AT TIME ZONE 'UTC',
                          'YYYY-MM-DD"T"HH24:MI:SS"Z"')       AS bucket,
                  COUNT(*)                                    AS requests,
                  COALESCE(AVG(suggested_load_kg::float8), 0) AS avg_suggested_load_kg,
                  COALESCE(AVG(avg_rir::float8), 0)           AS avg_rir
           FROM overload_audit_log
           WHERE 1=1"#,
        group.as_str()
    ));
    push_filters(&mut builder, filter);
    builder.push(" GROUP BY bucket ORDER BY bucket DESC LIMIT ").push_bind(filter.limit);

    let rows = builder.build().fetch_all(pool).await?;
    let items: Vec<BucketStatsRow> = rows
        .iter()
        .map(|row| BucketStatsRow {
            bucket: row.get("bucket"),
            requests: row.get("requests"),
            avg_suggested_load_kg: row.get("avg_suggested_load_kg"),
            avg_rir: row.get("avg_rir"),
        })
        .collect();

    Ok(serde_json::to_value(items).unwrap_or_default())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "admin_test.rs"]
mod tests;
