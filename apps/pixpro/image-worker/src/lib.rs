//! Image Worker Service
//!
//! A background worker that consumes image transformation jobs from
//! partitioned RabbitMQ queues, runs them through the fetch → transform →
//! store pipeline, and publishes outcome events.
//!
//! ## Architecture
//!
//! ```text
//! pixpro.processing (topic exchange)
//!   ↓ (image.uploaded.partition.<p>)
//! image.processing.partition.<p>  (one consumer per partition, prefetch Q)
//!   ↓
//! BusWorker<ImageJob, ImagePipeline, ImageOutcomePublisher>
//!   ↓ (fetch → Gemini transform → Cloudinary store, under a deadline)
//! image.results (fanout exchange)
//! ```
//!
//! ## Features
//!
//! - Per-partition consumers with broker-side prefetch back-pressure
//! - Delay-scheduled retries that preserve partition affinity
//! - Dead letter routing for permanently failed jobs
//! - Graceful shutdown with a drain grace period
//! - Health check endpoint for Kubernetes probes
//! - Prometheus metrics

use bus_worker::{
    connect_with_retry, declare_topology, health_router, metrics, BusWorker, HealthState,
    ResultsPublisher, WorkerConfig,
};
use core_config::amqp::AmqpConfig;
use core_config::{app_info, env_or, Environment};
use domain_images::{
    CloudinaryUploader, GeminiTransformer, HttpFetcher, ImageJob, ImageOutcomePublisher,
    ImagePipeline, ImageProcessingQueue,
};
use eyre::{Result, WrapErr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Start the health HTTP server
///
/// Provides endpoints for:
/// - Liveness probes: `/health`, `/healthz`
/// - Prometheus metrics: `/metrics`
async fn start_health_server(health_state: HealthState, port: u16) -> Result<()> {
    let app = health_router(health_state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(port = %port, "Health server listening");

    axum::serve(listener, app)
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

/// Run the image worker
///
/// This is the main entry point for the worker. It:
/// 1. Sets up structured logging (env-aware: JSON for prod, pretty for dev)
/// 2. Connects to RabbitMQ with bounded retries and declares the topology
/// 3. Builds the pipeline backends (HTTP fetch, Gemini, Cloudinary)
/// 4. Starts the partitioned worker with graceful shutdown handling
///
/// # Errors
///
/// Returns an error if:
/// - Worker or backend configuration is invalid
/// - RabbitMQ connection fails after the bounded retries
/// - The worker encounters a fatal error
pub async fn run() -> Result<()> {
    // Initialize tracing (env-aware: JSON for prod, pretty for dev)
    let environment = Environment::detect();
    core_config::tracing::init_tracing(environment);

    // Initialize Prometheus metrics
    metrics::init_metrics();

    // App info for health endpoint
    let app_info = app_info!();

    info!(name = %app_info.name, version = %app_info.version, "Starting image worker service");
    info!("Environment: {:?}", environment);

    // Health server port (default 9090)
    let health_port: u16 =
        env_or("HEALTH_PORT", 9090).wrap_err("Failed to load health server port")?;

    // Load configuration from the environment
    let amqp_config = AmqpConfig::from_env().wrap_err("Failed to load RabbitMQ configuration")?;
    let worker_config = WorkerConfig::from_queue_def::<ImageProcessingQueue>()
        .with_env_overrides()
        .wrap_err("Failed to load worker configuration")?;

    info!(
        worker_id = %worker_config.worker_id,
        partitions = %worker_config.partition_count,
        prefetch = %worker_config.prefetch_count,
        max_retries = %worker_config.max_retries,
        deadline_ms = %worker_config.processing_deadline_ms,
        "Worker configuration loaded"
    );

    // Connect to RabbitMQ with bounded retries
    info!("Connecting to RabbitMQ...");
    let connection = Arc::new(
        connect_with_retry(&amqp_config)
            .await
            .wrap_err("Failed to connect to RabbitMQ")?,
    );

    declare_topology(&connection, &worker_config, &amqp_config)
        .await
        .wrap_err("Failed to declare queue topology")?;

    // Build the pipeline backends
    let transformer =
        GeminiTransformer::from_env().wrap_err("Failed to load Gemini configuration")?;
    let uploader =
        CloudinaryUploader::from_env().wrap_err("Failed to load Cloudinary configuration")?;
    let upload_folder = uploader.upload_folder().to_string();

    let pipeline = ImagePipeline::new(HttpFetcher::new(), transformer, uploader)
        .with_upload_folder(upload_folder);
    info!("Image pipeline initialized");

    // Outcome publisher with its own channel
    let results_channel = connection
        .create_channel()
        .await
        .wrap_err("Failed to open results channel")?;
    let outcomes = ImageOutcomePublisher::new(ResultsPublisher::new(
        results_channel,
        worker_config.results_exchange.clone(),
    ));

    let worker = BusWorker::<ImageJob, _, _>::new(
        Arc::clone(&connection),
        worker_config.clone(),
        pipeline,
        outcomes,
    )
    .await
    .wrap_err("Failed to initialize worker")?;

    // Set up a shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error waiting for shutdown signal: {}", e);
        }
        let _ = shutdown_tx.send(true);
    });

    // Start health server in background
    let health_state = HealthState::new(
        app_info.name,
        app_info.version,
        worker_config.worker_id.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, health_port).await {
            error!(error = %e, "Health server failed");
        }
    });

    // Run the worker
    info!("Starting image job processor...");
    worker
        .run(shutdown_rx)
        .await
        .map_err(|e| eyre::eyre!("{}", e))?;

    if let Err(e) = connection.close(200, "worker shutdown").await {
        warn!(error = %e, "Error closing RabbitMQ connection");
    }

    info!("Image worker service stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
