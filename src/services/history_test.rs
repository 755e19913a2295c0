use super::*;

fn sample(load_kg: f64, rir: Option<f64>) -> SetSample {
    SetSample { load_kg, rir }
}

// =============================================================================
// clamp_window
// =============================================================================

#[test]
fn in_range_windows_pass_through() {
    let config = HistoryConfig::default();
    for w in 3..=12 {
        assert_eq!(clamp_window(Some(w), &config), w);
    }
}

#[test]
fn out_of_range_windows_fall_back_to_default() {
    let config = HistoryConfig::default();
    for w in [i32::MIN, -1, 0, 1, 2, 13, 100, i32::MAX] {
        assert_eq!(clamp_window(Some(w), &config), 5, "window {w} should fall back");
    }
}

#[test]
fn missing_window_falls_back_to_default() {
    let config = HistoryConfig::default();
    assert_eq!(clamp_window(None, &config), 5);
}

#[test]
fn fallback_honors_configured_default() {
    let config = HistoryConfig { default_window: 8, neutral_rir: 1.5 };
    assert_eq!(clamp_window(Some(0), &config), 8);
    assert_eq!(clamp_window(None, &config), 8);
}

// =============================================================================
// aggregate_samples
// =============================================================================

#[test]
fn empty_window_yields_zero_sample_invariant() {
    let agg = aggregate_samples(&[], 1.5);
    assert_eq!(agg.sample_count, 0);
    assert!((agg.avg_load_kg).abs() < f64::EPSILON);
    assert!((agg.avg_rir - 1.5).abs() < f64::EPSILON);
}

#[test]
fn means_are_unweighted_over_all_rows() {
    let samples = [
        sample(100.0, Some(2.0)),
        sample(102.5, Some(1.0)),
        sample(97.5, Some(3.0)),
    ];
    let agg = aggregate_samples(&samples, 1.5);
    assert_eq!(agg.sample_count, 3);
    assert!((agg.avg_load_kg - 100.0).abs() < 1e-9);
    assert!((agg.avg_rir - 2.0).abs() < 1e-9);
}

#[test]
fn missing_rir_rows_are_excluded_from_rir_mean_only() {
    let samples = [
        sample(50.0, Some(2.0)),
        sample(60.0, None),
        sample(70.0, Some(4.0)),
    ];
    let agg = aggregate_samples(&samples, 1.5);
    assert_eq!(agg.sample_count, 3);
    assert!((agg.avg_load_kg - 60.0).abs() < 1e-9);
    assert!((agg.avg_rir - 3.0).abs() < 1e-9);
}

#[test]
fn all_missing_rir_uses_neutral_prior() {
    let samples = [sample(50.0, None), sample(60.0, None)];
    let agg = aggregate_samples(&samples, 1.5);
    assert_eq!(agg.sample_count, 2);
    assert!((agg.avg_rir - 1.5).abs() < f64::EPSILON);
}

#[test]
fn aggregation_is_deterministic() {
    let samples = [sample(80.0, Some(1.2)), sample(82.5, Some(1.8))];
    assert_eq!(aggregate_samples(&samples, 1.5), aggregate_samples(&samples, 1.5));
}

// =============================================================================
// config
// =============================================================================

#[test]
fn config_defaults_match_constants() {
    unsafe {
        std::env::remove_var("SUGGEST_DEFAULT_WINDOW");
        std::env::remove_var("SUGGEST_NEUTRAL_RIR");
    }
    let config = HistoryConfig::from_env();
    assert_eq!(config.default_window, DEFAULT_WINDOW);
    assert!((config.neutral_rir - DEFAULT_NEUTRAL_RIR).abs() < f64::EPSILON);
}

#[test]
fn out_of_range_default_window_env_is_rejected() {
    unsafe { std::env::set_var("SUGGEST_DEFAULT_WINDOW", "50") };
    let config = HistoryConfig::from_env();
    assert_eq!(config.default_window, DEFAULT_WINDOW);
    unsafe { std::env::remove_var("SUGGEST_DEFAULT_WINDOW") };
}

// =============================================================================
// live database
// =============================================================================

#[cfg(feature = "live-db-tests")]
mod live {
    use super::*;
    use crate::db::test_support::integration_pool;

    async fn seed_set(pool: &sqlx::PgPool, exercise_id: i64, load_kg: f64, rir: Option<f64>, completed: bool) {
        sqlx::query(
            "INSERT INTO workout_sets (exercise_id, load_kg, reps, rir, completed, performed_at)
             VALUES ($1, $2, 10, $3, $4, NOW())",
        )
        .bind(exercise_id)
        .bind(load_kg)
        .bind(rir)
        .bind(completed)
        .execute(pool)
        .await
        .expect("seed insert should succeed");
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn live_scan_honors_completed_flag_and_window() {
        let pool = integration_pool().await;
        let config = HistoryConfig::default();
        let exercise_id = 9001;

        seed_set(&pool, exercise_id, 100.0, Some(2.0), true).await;
        seed_set(&pool, exercise_id, 999.0, Some(0.0), false).await;
        seed_set(&pool, exercise_id, 110.0, Some(1.0), true).await;

        let agg = aggregate(&pool, exercise_id, 5, &config)
            .await
            .expect("live scan should succeed");
        assert_eq!(agg.sample_count, 2);
        assert!((agg.avg_load_kg - 105.0).abs() < 1e-9);
        assert!((agg.avg_rir - 1.5).abs() < 1e-9);
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn live_scan_takes_newest_rows_first() {
        let pool = integration_pool().await;
        let config = HistoryConfig::default();
        let exercise_id = 9002;

        for load in [60.0, 70.0, 80.0, 90.0] {
            seed_set(&pool, exercise_id, load, Some(1.0), true).await;
        }

        let agg = aggregate(&pool, exercise_id, 3, &config)
            .await
            .expect("live scan should succeed");
        assert_eq!(agg.sample_count, 3);
        assert!((agg.avg_load_kg - 80.0).abs() < 1e-9);
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn fast_path_without_rollup_entry_reports_zero_samples() {
        let pool = integration_pool().await;
        let config = HistoryConfig::default();

        crate::services::rollup::refresh(&pool)
            .await
            .expect("refresh should succeed");

        let agg = aggregate(&pool, 424_242, ROLLUP_WINDOW, &config)
            .await
            .expect("fast path should succeed");
        assert_eq!(agg.sample_count, 0);
        assert!((agg.avg_rir - config.neutral_rir).abs() < f64::EPSILON);
    }
}
