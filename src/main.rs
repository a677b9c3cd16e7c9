mod app_state;
mod config;
mod db;
mod models;
mod routes;
mod services;

use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use db::queries::PgJobStore;
use services::orchestrator::Orchestrator;
use services::scanner::HttpScannerClient;
use services::sink::ObjectResultSink;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing watchdog-scan server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!(
        "scan_jobs_submitted_total",
        "Total scan jobs accepted for processing"
    );
    metrics::describe_counter!(
        "scan_jobs_deduplicated_total",
        "Submissions that matched an already-active job"
    );
    metrics::describe_counter!(
        "scan_jobs_completed_total",
        "Total scan jobs that completed with a stored report"
    );
    metrics::describe_counter!(
        "scan_jobs_failed_total",
        "Total scan jobs that reached the failed state"
    );
    metrics::describe_gauge!(
        "scan_monitors_active",
        "Monitor tasks currently supervising a job"
    );
    metrics::describe_histogram!(
        "scan_duration_seconds",
        "Wall-clock time from monitor start to terminal state"
    );

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize result sink
    tracing::info!("Initializing result storage client");
    let sink = ObjectResultSink::new(
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize result storage client");

    // Initialize external scanner client
    tracing::info!("Initializing scanner client");
    let scanner = HttpScannerClient::new(
        &config.scanner_url,
        &config.scanner_api_key,
        config.scanner_timeout(),
    )
    .expect("Failed to initialize scanner client");

    let store = Arc::new(PgJobStore::new(db_pool.clone()));
    let scanner = Arc::new(scanner);
    let sink = Arc::new(sink);

    let orchestrator = Orchestrator::new(
        store.clone(),
        scanner.clone(),
        sink.clone(),
        config.orchestrator_settings(),
    );

    // Resume running jobs and fail orphaned pending ones before accepting
    // new submissions.
    tracing::info!("Recovering outstanding jobs");
    orchestrator
        .recover()
        .await
        .expect("Failed to recover outstanding jobs");

    // Create shared application state
    let state = AppState::new(db_pool, store, scanner, sink, orchestrator);

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route(
            "/api/v1/scans",
            post(routes::scans::submit_scan).get(routes::scans::list_scans),
        )
        .route("/api/v1/scans/{id}", get(routes::scans::get_scan_status))
        .route("/api/v1/scans/{id}/cancel", post(routes::scans::cancel_scan))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(64 * 1024)); // submissions are small JSON bodies

    tracing::info!("Starting watchdog-scan on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
