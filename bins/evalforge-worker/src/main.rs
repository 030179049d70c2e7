mod bounded;
mod builder;
mod engine;
mod error;
mod executor;
mod fetch;
mod logs;
mod sandbox;
mod store;
mod worker;
mod workspace;

use anyhow::Context;
use evalforge_common::config::LogFormat;
use evalforge_common::Config;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

use crate::builder::ContainerBuildEngine;
use crate::engine::DockerEngine;
use crate::executor::EvaluationOrchestrator;
use crate::fetch::{GitFetcher, HttpPackFetcher};
use crate::sandbox::{SandboxLimits, SandboxedTestRunner};
use crate::store::{RedisProgressReporter, RedisSubmissionStore};
use crate::worker::QueueSettings;

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();
    init_tracing(config.log_format);

    info!("EvalForge worker booting...");

    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("Failed to create work dir {}", config.work_dir.display()))?;

    let docker = Arc::new(DockerEngine::connect().context("Failed to connect to Docker")?);
    docker.ping().await.context("Docker daemon is not reachable")?;
    info!("Connected to Docker");

    let client = redis::Client::open(config.redis_url.as_str())?;
    let conn = ConnectionManager::new(client.clone()).await?;
    info!(redis_url = %config.redis_url, "Connected to Redis");

    let limits = SandboxLimits {
        memory_bytes: config.sandbox_memory_bytes(),
        nano_cpus: config.sandbox_nano_cpus(),
        kill_grace: config.kill_grace(),
    };

    let orchestrator = Arc::new(EvaluationOrchestrator::new(
        Arc::new(GitFetcher::new(config.clone_timeout(), config.kill_grace())),
        Arc::new(HttpPackFetcher::new(config.clone_timeout(), config.kill_grace())),
        ContainerBuildEngine::new(docker.clone(), config.work_dir.clone(), config.build_timeout()),
        SandboxedTestRunner::new(docker, config.work_dir.clone(), limits),
        Arc::new(RedisSubmissionStore::new(conn.clone())),
        Arc::new(RedisProgressReporter::new(conn, config.status_ttl_secs)),
        config.work_dir.clone(),
        config.test_timeout(),
    ));

    info!(
        concurrency = config.worker_concurrency,
        work_dir = %config.work_dir.display(),
        max_attempts = config.max_attempts,
        "Listening for jobs on evalforge:queue:*"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Received shutdown signal, finishing jobs in flight...");
        let _ = shutdown_tx.send(true);
    });

    worker::run_pool(
        client,
        orchestrator,
        QueueSettings::from(&config),
        config.worker_concurrency,
        shutdown_rx,
    )
    .await?;

    info!("Worker shutdown complete");
    Ok(())
}
