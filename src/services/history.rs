//! History aggregation — rolling averages over recent completed sets.
//!
//! DESIGN
//! ======
//! Two strategies behind one explicit branch: the fixed 12-set window is
//! served from the precomputed rollup (possibly stale, never refreshed
//! inline), every other window runs a bounded live scan over the newest
//! completed sets. Both produce the same aggregate shape, so the policy
//! layer never knows which path ran.
//!
//! Given an identical store snapshot, the same `(exercise_id, window)`
//! always yields the same aggregate: reads only, no hidden state.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::db::is_undefined_table;
use crate::rate_limit::env_parse;

pub const WINDOW_MIN: i32 = 3;
pub const WINDOW_MAX: i32 = 12;
/// Fixed window served by the precomputed rollup.
pub const ROLLUP_WINDOW: i32 = 12;

const DEFAULT_WINDOW: i32 = 5;
const DEFAULT_NEUTRAL_RIR: f64 = 1.5;

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Clone, Copy)]
pub struct HistoryConfig {
    /// Window used when the caller omits one or sends garbage.
    pub default_window: i32,
    /// Stand-in average RIR for windows with no reported RIR at all.
    pub neutral_rir: f64,
}

impl HistoryConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let default_window: i32 = env_parse("SUGGEST_DEFAULT_WINDOW", DEFAULT_WINDOW);
        Self {
            default_window: if (WINDOW_MIN..=WINDOW_MAX).contains(&default_window) {
                default_window
            } else {
                DEFAULT_WINDOW
            },
            neutral_rir: env_parse("SUGGEST_NEUTRAL_RIR", DEFAULT_NEUTRAL_RIR),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { default_window: DEFAULT_WINDOW, neutral_rir: DEFAULT_NEUTRAL_RIR }
    }
}

// =============================================================================
// TYPES
// =============================================================================

/// Averages over the chosen window. `sample_count == 0` means no
/// completed history; `avg_rir` then carries the neutral prior rather
/// than a true average.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregateResult {
    pub avg_load_kg: f64,
    pub avg_rir: f64,
    pub sample_count: i64,
}

impl AggregateResult {
    #[must_use]
    pub fn empty(neutral_rir: f64) -> Self {
        Self { avg_load_kg: 0.0, avg_rir: neutral_rir, sample_count: 0 }
    }
}

/// One completed set row, as returned by the history store.
#[derive(Debug, Clone, Copy)]
pub struct SetSample {
    pub load_kg: f64,
    pub rir: Option<f64>,
}

/// Map the requested window into [`WINDOW_MIN`, `WINDOW_MAX`]. Missing or
/// out-of-range input falls back to the configured default; the endpoint
/// stays permissive rather than rejecting.
#[must_use]
pub fn clamp_window(requested: Option<i32>, config: &HistoryConfig) -> i32 {
    match requested {
        Some(w) if (WINDOW_MIN..=WINDOW_MAX).contains(&w) => w,
        _ => config.default_window,
    }
}

// =============================================================================
// STRATEGIES
// =============================================================================

#[async_trait]
trait AggregateStrategy {
    async fn aggregate(&self, pool: &PgPool, exercise_id: i64) -> Result<AggregateResult, sqlx::Error>;
}

/// Reads the precomputed 12-set rollup.
struct FastPath {
    neutral_rir: f64,
}

#[async_trait]
impl AggregateStrategy for FastPath {
    async fn aggregate(&self, pool: &PgPool, exercise_id: i64) -> Result<AggregateResult, sqlx::Error> {
        let result = sqlx::query(
            r"SELECT COALESCE(avg_load_kg::float8, 0) AS avg_load_kg,
                     COALESCE(avg_rir::float8, $2)    AS avg_rir,
                     COALESCE(sample_count, 0)        AS sample_count
              FROM workout_overload_stats12
              WHERE exercise_id = $1",
        )
        .bind(exercise_id)
        .bind(self.neutral_rir)
        .fetch_optional(pool)
        .await;

        match result {
            Ok(Some(row)) => Ok(AggregateResult {
                avg_load_kg: row.get("avg_load_kg"),
                avg_rir: row.get("avg_rir"),
                sample_count: row.get("sample_count"),
            }),
            // No rollup entry for this exercise: zero samples, never an
            // inline refresh from the read path.
            Ok(None) => Ok(AggregateResult::empty(self.neutral_rir)),
            // Rollup object not created or not yet populated; same degradation.
            Err(e) if is_undefined_table(&e) || is_unpopulated(&e) => {
                Ok(AggregateResult::empty(self.neutral_rir))
            }
            Err(e) => Err(e),
        }
    }
}

/// Bounded scan over the newest completed sets.
struct LiveScan {
    window: i32,
    neutral_rir: f64,
}

#[async_trait]
impl AggregateStrategy for LiveScan {
    async fn aggregate(&self, pool: &PgPool, exercise_id: i64) -> Result<AggregateResult, sqlx::Error> {
        let rows = sqlx::query(
            r"SELECT load_kg::float8 AS load_kg, rir::float8 AS rir
              FROM workout_sets
              WHERE exercise_id = $1 AND completed = TRUE
              ORDER BY performed_at DESC, id DESC
              LIMIT $2",
        )
        .bind(exercise_id)
        .bind(i64::from(self.window))
        .fetch_all(pool)
        .await?;

        let samples: Vec<SetSample> = rows
            .iter()
            .map(|row| SetSample { load_kg: row.get("load_kg"), rir: row.get("rir") })
            .collect();

        Ok(aggregate_samples(&samples, self.neutral_rir))
    }
}

/// A view created `WITH NO DATA` raises 55000 until its first refresh.
fn is_unpopulated(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("55000"),
        _ => false,
    }
}

/// Aggregate the most recent completed sets for one exercise.
///
/// # Errors
///
/// Returns the underlying store error if a query fails.
pub async fn aggregate(
    pool: &PgPool,
    exercise_id: i64,
    window: i32,
    config: &HistoryConfig,
) -> Result<AggregateResult, sqlx::Error> {
    if window == ROLLUP_WINDOW {
        FastPath { neutral_rir: config.neutral_rir }.aggregate(pool, exercise_id).await
    } else {
        LiveScan { window, neutral_rir: config.neutral_rir }.aggregate(pool, exercise_id).await
    }
}

/// Arithmetic means over fetched rows. Sets without a reported RIR are
/// excluded from the RIR mean only; an all-missing window falls back to
/// the neutral prior.
#[must_use]
pub fn aggregate_samples(samples: &[SetSample], neutral_rir: f64) -> AggregateResult {
    if samples.is_empty() {
        return AggregateResult::empty(neutral_rir);
    }

    let avg_load_kg = samples.iter().map(|s| s.load_kg).sum::<f64>() / samples.len() as f64;

    let rirs: Vec<f64> = samples.iter().filter_map(|s| s.rir).collect();
    let avg_rir = if rirs.is_empty() {
        neutral_rir
    } else {
        rirs.iter().sum::<f64>() / rirs.len() as f64
    };

    AggregateResult { avg_load_kg, avg_rir, sample_count: samples.len() as i64 }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "history_test.rs"]
mod tests;
