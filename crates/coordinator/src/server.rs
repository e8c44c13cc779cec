//! Axum router assembly: wires the API handlers behind the auth
//! middleware, starts the control loop, and serves HTTP.

use crate::auth::{require_admin, require_auth};
use crate::config::Config;
use crate::state::AppState;
use crate::{api, reactor::ControlLoop};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(api::health::healthz))
        .route("/users/signup", post(api::users::signup))
        .route("/auth/login", post(api::auth::login))
        .route("/auth/refresh", post(api::auth::refresh))
}

fn worker_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/status", get(api::auth::status))
        .route("/channels/list", get(api::channels::list))
        .route("/jobs/request", get(api::jobs::request))
        .route("/jobs/ping", post(api::jobs::ping))
        .route("/jobs/status", get(api::jobs::status))
        .route("/jobs/pause", post(api::jobs::pause))
        .route("/jobs/resume", post(api::jobs::resume))
        .route("/jobs/cancel", post(api::jobs::cancel))
        .route("/jobs/complete", post(api::jobs::complete))
        .route("/jobs/update-iterations", post(api::jobs::update_iterations))
        .route("/jobs/update-entropy", post(api::jobs::update_entropy))
        .route("/files/request-upload", post(api::files::request_upload))
        .route("/files/upload/:token", post(api::files::upload_chunk))
        .route("/files/request-download", post(api::files::request_download))
        .route("/files/download/:token", get(api::files::download))
        .layer(middleware::from_fn(require_auth))
}

fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/channels/create", post(api::channels::create))
        .route(
            "/channels/update-minimization-attempts",
            post(api::channels::update_minimization_attempts),
        )
        .route("/jobs/create", post(api::jobs::create))
        .layer(middleware::from_fn(require_admin))
        .layer(middleware::from_fn(require_auth))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(public_routes())
        .merge(worker_routes())
        .merge(admin_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Initialize state, start the control loop, and serve HTTP until the
/// process receives a shutdown signal.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,coordinator=debug".into()),
        )
        .init();

    tracing::info!(db = %config.db_path, "starting entropy coordinator");

    let state = AppState::new(config.clone()).await?;
    let shutdown = tokio_util::sync::CancellationToken::new();

    let control_loop = ControlLoop::new(
        state.channels.clone(),
        state.jobs.clone(),
        state.wake.clone(),
        config.update_interval,
        shutdown.clone(),
    );
    let control_loop_handle = tokio::spawn(control_loop.run());

    let app = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let shutdown_for_server = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            shutdown_for_server.cancel();
        })
        .await?;

    let _ = control_loop_handle.await;
    Ok(())
}
