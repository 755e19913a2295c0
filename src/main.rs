mod db;
mod rate_limit;
mod routes;
mod services;
mod state;

use std::net::SocketAddr;

#[tokio::main]
async fn main() {
    // .env for local development; deployments set the environment directly.
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()
        .expect("invalid PORT");

    let pool = db::init_pool(&database_url)
        .await
        .expect("database init failed");

    // Non-fatal: a failed bootstrap leaves the fast path reading empty
    // and the audit sink healing itself on first insert.
    if let Err(e) = db::ensure_engine_schema(&pool).await {
        tracing::warn!(error = %e, "engine schema bootstrap failed; running degraded");
    }

    let state = state::AppState::new(pool);

    // Periodic eviction of idle rate-limit buckets.
    let _sweep = rate_limit::spawn_sweep_task(state.rate_limiter.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "overload engine listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .expect("server failed");
}
