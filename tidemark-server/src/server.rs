use std::{
    net::SocketAddr,
    sync::{Arc, OnceLock},
    time::Duration,
};

use axum::{Extension, Router, response::IntoResponse, routing::get, serve};
use axum::http::{HeaderValue, StatusCode, header};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use shared::config::{Config, DatabaseConfig, LogFormat};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{EnvFilter, fmt};

use crate::{
    app_state::AppState,
    handlers,
    repo::postgres::PgChatRepository,
    routes,
    services::{detectors, hub::{SharedHub, StreamHub}},
};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

async fn metrics_endpoint(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        handle.render(),
    )
}

/// Initializes the tracing subscriber for logging using the provided configuration.
pub fn initialize_tracing(config: &Config) -> String {
    let env_filter = build_env_filter(config);

    let fmt_builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    if matches!(config.logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).init();
    } else {
        fmt_builder.with_ansi(true).init();
    }

    config.logging.level.clone()
}

fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

/// Creates a database connection pool from the given database settings.
///
/// # Errors
/// Returns an error if the database connection pool cannot be created.
pub async fn create_database_pool(db: &DatabaseConfig) -> Result<sqlx::PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .connect(&db.url)
        .await?;
    metrics::gauge!("db_pool_max_connections").set(f64::from(db.max_connections));
    Ok(pool)
}

/// Creates the CORS layer for the application.
pub fn create_cors_layer() -> CorsLayer {
    use http::Method;

    let methods = vec![Method::GET, Method::POST, Method::OPTIONS];

    CorsLayer::new()
        .allow_methods(AllowMethods::list(methods))
        .allow_headers(AllowHeaders::any())
        .allow_origin(AllowOrigin::any())
        .max_age(Duration::from_secs(3600))
}

/// Creates the API router with the streaming and control endpoints.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stream", get(handlers::streaming::stream_handler))
        .route("/stream/chats", get(handlers::streaming::chat_list_handler))
        .route(
            "/chats/{chat_id}/messages/older",
            axum::routing::post(handlers::chat::older_messages),
        )
        .route(
            "/chats/{chat_id}/views",
            axum::routing::post(handlers::chat::mark_viewed),
        )
        .route(
            "/chats/{chat_id}/views/all",
            axum::routing::post(handlers::chat::mark_all_viewed),
        )
        .route(
            "/chats/{chat_id}/leave",
            axum::routing::post(handlers::chat::leave_chat),
        )
        .route(
            "/messages/{message_id}/reactions",
            get(handlers::chat::message_reactions),
        )
}

/// Creates the main application router with all middleware and routes.
pub fn create_app_router(
    state: Arc<AppState>,
    config: Arc<Config>,
    hub: SharedHub,
    metrics_handle: PrometheusHandle,
) -> Router {
    let api_router = create_api_router().layer(Extension(hub));

    Router::new()
        .nest("/api", api_router)
        .merge(routes::health::create_health_router())
        .route("/metrics", get(metrics_endpoint))
        .layer(Extension(config))
        .layer(Extension(metrics_handle))
        .layer(create_cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Resolves when a shutdown signal is received and cancels every periodic
/// task through the hub.
pub async fn create_shutdown_signal(hub: SharedHub) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install CTRL+C signal handler");
    }
    info!("Shutting down...");
    hub.shutdown();
}

/// Starts the server and binds it to the configured port.
///
/// # Errors
/// Returns an error if the database is unreachable or the listener cannot
/// bind.
pub async fn run(config: Config) -> anyhow::Result<()> {
    initialize_tracing(&config);
    info!("Starting server...");

    let metrics_handle = metrics_handle();

    let pool = create_database_pool(&config.database).await?;
    sqlx::query("SELECT 1").execute(&pool).await?;

    let repo = Arc::new(PgChatRepository::new(pool.clone()));
    let hub: SharedHub = Arc::new(StreamHub::new(repo, config.clone()));

    let detector_handles = detectors::spawn_all(&hub);
    info!(tasks = detector_handles.len(), "detectors started");

    let port = config.server.port;
    let config = Arc::new(config);
    let state = Arc::new(AppState { pool: Some(pool) });
    let app = create_app_router(state, config, hub.clone(), metrics_handle);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    serve(listener, app)
        .with_graceful_shutdown(create_shutdown_signal(hub.clone()))
        .await?;

    for handle in detector_handles {
        handle.abort();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, to_bytes},
        http::Request,
    };
    use serial_test::serial;
    use tower::ServiceExt;

    use crate::repo::MockChatRepository;

    fn test_app() -> Router {
        let config = Arc::new(Config::default());
        let repo = MockChatRepository::new();
        let hub: SharedHub = Arc::new(StreamHub::new(Arc::new(repo), Config::default()));
        create_app_router(
            Arc::new(AppState::default()),
            config,
            hub,
            metrics_handle(),
        )
    }

    #[tokio::test]
    #[serial]
    async fn metrics_endpoint_returns_prometheus_payload() {
        let app = test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .expect("content type");
        assert_eq!(content_type, "text/plain; version=0.0.4");
    }

    #[tokio::test]
    #[serial]
    async fn unknown_route_is_not_found() {
        let app = test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/nope")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let _ = to_bytes(response.into_body(), usize::MAX).await;
    }

    #[test]
    fn initialize_env_filter_falls_back_to_info() {
        let mut config = Config::default();
        config.logging.level = "not-a-level".to_string();
        // Must not panic on an unparsable directive.
        let _ = build_env_filter(&config);
    }
}
