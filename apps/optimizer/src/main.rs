use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use resume_optimizer::config::Config;
use resume_optimizer::jobs::Worker;
use resume_optimizer::state::Services;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "resume_optimizer={level},optimizer={level}",
                level = config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting resume optimizer v{}", env!("CARGO_PKG_VERSION"));

    let services = Services::build(&config).await?;

    // Provision (or migrate) the reference template collection
    services
        .vectors
        .ensure_collection(config.embedding_dimension)
        .await
        .context("Failed to provision vector collection")?;

    // BLPOP blocks its connection, so the queue gets one of its own
    let queue_conn = services
        .redis
        .get_multiplexed_async_connection()
        .await
        .context("Failed to open Redis queue connection")?;

    let worker = Worker::new(
        services.retrieval.clone(),
        services.scopes.clone(),
        services.optimizer.clone(),
    );

    tokio::select! {
        result = worker.run(queue_conn, &config.job_queue) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
    }

    info!("Worker stopped");
    Ok(())
}
