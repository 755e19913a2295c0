//! Rollup refresher — maintains the precomputed 12-set aggregate.
//!
//! DESIGN
//! ======
//! Refresh is a three-step sequence: ensure the materialized view and
//! its unique index exist, try a concurrent refresh so readers keep the
//! stale rollup, and fall back to an exclusive refresh when the
//! concurrent path is unavailable (a freshly created view has no
//! baseline population yet). Postgres owns all exclusivity: creation
//! uses `IF NOT EXISTS`, so concurrent refreshers racing on first use
//! stay benign without any application-level lock.

use serde::Serialize;
use sqlx::PgPool;
use tracing::warn;

/// The rollup's source: newest 12 completed sets per exercise.
const CREATE_ROLLUP_SQL: &str = r"
CREATE MATERIALIZED VIEW IF NOT EXISTS workout_overload_stats12 AS
SELECT exercise_id,
       AVG(load_kg)::numeric(10,2) AS avg_load_kg,
       AVG(rir)::numeric(10,2)     AS avg_rir,
       COUNT(*)                    AS sample_count
FROM (
    SELECT exercise_id, load_kg, rir,
           ROW_NUMBER() OVER (
               PARTITION BY exercise_id
               ORDER BY performed_at DESC, id DESC
           ) AS recency
    FROM workout_sets
    WHERE completed = TRUE
) recent
WHERE recency <= 12
GROUP BY exercise_id
WITH NO DATA";

const CREATE_ROLLUP_INDEX_SQL: &str = r"
CREATE UNIQUE INDEX IF NOT EXISTS workout_overload_stats12_exercise_id_key
ON workout_overload_stats12 (exercise_id)";

// =============================================================================
// TYPES
// =============================================================================

/// Which refresh path completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    Concurrent,
    Full,
}

/// Result of a successful refresh.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RefreshOutcome {
    pub mode: RefreshMode,
    /// True when this call created the rollup object itself.
    pub created: bool,
}

/// Step that failed, reported to the admin caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStage {
    Ensure,
    Refresh,
}

impl RefreshStage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ensure => "ensure",
            Self::Refresh => "refresh",
        }
    }
}

impl std::fmt::Display for RefreshStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("rollup {stage} failed: {source}")]
pub struct RefreshError {
    pub stage: RefreshStage,
    #[source]
    pub source: sqlx::Error,
}

// =============================================================================
// REFRESH
// =============================================================================

/// Create the rollup view and its unique index if missing. Idempotent.
/// Returns true when the view was created by this call.
///
/// # Errors
///
/// Returns the underlying store error if creation fails.
pub async fn ensure_rollup(pool: &PgPool) -> Result<bool, sqlx::Error> {
    let existed: bool = sqlx::query_scalar(
        "SELECT EXISTS (
             SELECT 1 FROM pg_matviews
             WHERE schemaname = 'public' AND matviewname = 'workout_overload_stats12'
         )",
    )
    .fetch_one(pool)
    .await?;

    if !existed {
        sqlx::query(CREATE_ROLLUP_SQL).execute(pool).await?;
    }
    sqlx::query(CREATE_ROLLUP_INDEX_SQL).execute(pool).await?;

    Ok(!existed)
}

/// Run the ensure-then-refresh sequence.
///
/// # Errors
///
/// Returns a stage-tagged error when ensure or the exclusive refresh
/// fails; a failed concurrent refresh alone only triggers the fallback.
pub async fn refresh(pool: &PgPool) -> Result<RefreshOutcome, RefreshError> {
    let created = ensure_rollup(pool)
        .await
        .map_err(|source| RefreshError { stage: RefreshStage::Ensure, source })?;

    // Concurrent refresh needs one prior full population; a view created
    // WITH NO DATA always falls through to the exclusive path.
    match sqlx::query("REFRESH MATERIALIZED VIEW CONCURRENTLY workout_overload_stats12")
        .execute(pool)
        .await
    {
        Ok(_) => return Ok(RefreshOutcome { mode: RefreshMode::Concurrent, created }),
        Err(e) => {
            warn!(error = %e, "concurrent rollup refresh unavailable; falling back to exclusive");
        }
    }

    sqlx::query("REFRESH MATERIALIZED VIEW workout_overload_stats12")
        .execute(pool)
        .await
        .map_err(|source| RefreshError { stage: RefreshStage::Refresh, source })?;

    Ok(RefreshOutcome { mode: RefreshMode::Full, created })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "rollup_test.rs"]
mod tests;
