//! Suggestion audit trail — best-effort, append-only.
//!
//! ERROR HANDLING
//! ==============
//! Audit writes must never change a caller-visible outcome. Every
//! failure here is logged for operators and swallowed; the suggestion
//! response has already been produced by the time a record lands.
//! Schema bootstrap runs at startup, but an insert hitting a missing
//! table re-ensures and retries once so the very first call ever still
//! lands exactly one row.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::warn;

use crate::db::is_undefined_table;

// =============================================================================
// TYPES
// =============================================================================

/// One suggestion call, as recorded for operators. `requested_at` and
/// the row id are assigned by the store.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub identity: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub exercise_id: i64,
    pub window: i32,
    pub avg_load_kg: f64,
    pub avg_rir: f64,
    pub sample_count: i64,
    pub suggested_load_kg: f64,
    pub suggested_reps: i32,
    pub rationale: &'static str,
}

/// Destination for audit records. Swappable so suggestion-path tests
/// never depend on audit-store availability.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record one entry. Must not fail or block the caller's response.
    async fn record(&self, entry: AuditEntry);
}

// =============================================================================
// POSTGRES SINK
// =============================================================================

/// Writes audit rows to the engine-owned `overload_audit_log` table.
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, entry: AuditEntry) {
        match insert_entry(&self.pool, &entry).await {
            Ok(()) => {}
            Err(e) if is_undefined_table(&e) => {
                // Startup bootstrap was skipped or raced; heal and retry once.
                if let Err(e) = ensure_audit_schema(&self.pool).await {
                    warn!(error = %e, "audit schema bootstrap failed; dropping record");
                    return;
                }
                if let Err(e) = insert_entry(&self.pool, &entry).await {
                    warn!(error = %e, exercise_id = entry.exercise_id, "audit insert failed after bootstrap; dropping record");
                }
            }
            Err(e) => {
                warn!(error = %e, exercise_id = entry.exercise_id, "audit insert failed; dropping record");
            }
        }
    }
}

async fn insert_entry(pool: &PgPool, entry: &AuditEntry) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"INSERT INTO overload_audit_log
            (requested_at, identity, client_ip, user_agent, exercise_id, window_size,
             avg_load_kg, avg_rir, sample_count, suggested_load_kg, suggested_reps, rationale)
          VALUES (NOW(), $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(&entry.identity)
    .bind(&entry.client_ip)
    .bind(&entry.user_agent)
    .bind(entry.exercise_id)
    .bind(entry.window)
    .bind(entry.avg_load_kg)
    .bind(entry.avg_rir)
    .bind(entry.sample_count)
    .bind(entry.suggested_load_kg)
    .bind(entry.suggested_reps)
    .bind(entry.rationale)
    .execute(pool)
    .await?;
    Ok(())
}

/// Create the audit table and its two query indexes if missing. Runs at
/// startup; safe to call again from tests or a healing insert path.
///
/// # Errors
///
/// Returns the underlying store error if creation fails.
pub async fn ensure_audit_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"CREATE TABLE IF NOT EXISTS overload_audit_log (
            id                BIGSERIAL PRIMARY KEY,
            requested_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            identity          TEXT,
            client_ip         TEXT,
            user_agent        TEXT,
            exercise_id       BIGINT NOT NULL,
            window_size       INT NOT NULL,
            avg_load_kg       NUMERIC(10,2),
            avg_rir           NUMERIC(10,2),
            sample_count      INT,
            suggested_load_kg NUMERIC(10,2),
            suggested_reps    INT,
            rationale         TEXT
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS overload_audit_log_exercise_at_idx
         ON overload_audit_log (exercise_id, requested_at DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS overload_audit_log_identity_at_idx
         ON overload_audit_log (identity, requested_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

// =============================================================================
// TEST DOUBLES
// =============================================================================


// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "audit_test.rs"]
mod tests;
