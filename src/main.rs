use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use virtual_fitting::app_state::AppState;
use virtual_fitting::config::AppConfig;
use virtual_fitting::db::{self, catalog::PgCatalog, queries::PgJobStore, store::JobStore};
use virtual_fitting::routes;
use virtual_fitting::services::{
    captions::CaptionBatcher,
    fitting::FittingService,
    generation::GeminiClient,
    images::ImageFetcher,
    pipeline::Pipeline,
    runner::{JobRunner, Reconciler},
    storage::{ObjectStore, R2Client},
};

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
    let limits = config.fitting_limits();

    tracing::info!("Initializing virtual-fitting server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("fitting_jobs_total", "Total fitting jobs accepted");
    metrics::describe_counter!("fitting_jobs_completed", "Fitting jobs that produced an image");
    metrics::describe_counter!("fitting_jobs_failed", "Fitting jobs that failed a step");
    metrics::describe_counter!("fitting_jobs_timeout", "Fitting jobs that exceeded the deadline");
    metrics::describe_counter!(
        "fitting_caption_failures",
        "Caption calls that failed or timed out"
    );
    metrics::describe_histogram!(
        "fitting_step_seconds",
        "Time spent in one compositing step"
    );
    metrics::describe_histogram!(
        "fitting_processing_seconds",
        "Time from job creation to completion"
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

    // Initialize R2 storage client
    tracing::info!("Initializing R2 storage client");
    let objects: Arc<dyn ObjectStore> = Arc::new(
        R2Client::new(
            &config.r2_bucket,
            &config.r2_endpoint,
            &config.r2_access_key,
            &config.r2_secret_key,
        )
        .expect("Failed to initialize R2 client"),
    );

    let images = Arc::new(
        ImageFetcher::new(Arc::clone(&objects), config.download_timeout())
            .expect("Failed to initialize image fetcher"),
    );

    tracing::info!(model = %config.gemini_model, "Initializing Gemini client");
    if config.gemini_api_key.is_empty() {
        tracing::warn!("GEMINI_API_KEY is empty, every fitting job will fail");
    }
    let gemini = Arc::new(
        GeminiClient::new(
            config.gemini_api_key.clone(),
            config.gemini_model.clone(),
            config.caption_model.clone(),
            limits.deadline,
        )
        .expect("Failed to initialize Gemini client"),
    );

    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(db_pool.clone()));

    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&store),
        images.clone(),
        gemini.clone(),
        gemini.clone(),
        Arc::clone(&objects),
        limits,
    ));
    let runner = Arc::new(JobRunner::new(pipeline));

    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&store),
        limits,
        config.stale_grace(),
    ))
    .spawn(config.reconcile_interval());

    let fittings = FittingService::new(
        store,
        Arc::new(PgCatalog::new(db_pool.clone())),
        objects,
        Arc::clone(&runner),
        limits,
        config.result_base_url.clone(),
    );
    let captions = CaptionBatcher::new(images, gemini, config.caption_concurrency);

    // Create shared application state
    let state = AppState::new(db_pool, fittings, captions, &config.jwt_secret);
    let app = routes::router(state, prometheus_handle);

    tracing::info!("Starting virtual-fitting on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    reconciler.abort();
    runner.shutdown(config.shutdown_grace()).await;
    tracing::info!("Shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
