mod handlers;
mod metrics;
mod routes;

use axum::Router;
use evalforge_common::types::CompletionEvent;
use evalforge_common::Config;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub redis: ConnectionManager,
    pub start_time: Arc<std::time::Instant>,
    pub max_attempts: u8,
    pub status_ttl_secs: u64,
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("EvalForge API booting...");

    // Initialize metrics
    metrics::init_metrics();
    info!("Metrics registry initialized");

    // Connect to Redis
    let client = redis::Client::open(config.redis_url.as_str())
        .expect("Failed to create Redis client");

    let redis_conn = ConnectionManager::new(client.clone())
        .await
        .expect("Failed to connect to Redis");

    info!("Connected to Redis: {}", config.redis_url);

    let state = Arc::new(AppState {
        redis: redis_conn,
        start_time: Arc::new(std::time::Instant::now()),
        max_attempts: config.max_attempts,
        status_ttl_secs: config.status_ttl_secs,
    });

    // Start background metrics subscriber
    tokio::spawn(metrics_subscriber(client));

    // Build router
    let app = Router::new().merge(routes::routes()).with_state(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    info!("HTTP server listening on {}", addr);
    info!("Ready to accept evaluations");

    axum::serve(listener, app).await.expect("Server error");
}

/// Background task to subscribe to completion events and update metrics
async fn metrics_subscriber(client: redis::Client) {
    let mut pubsub = match client.get_async_connection().await {
        Ok(conn) => conn.into_pubsub(),
        Err(e) => {
            tracing::error!("Failed to create pubsub connection: {}", e);
            return;
        }
    };

    if let Err(e) = pubsub
        .subscribe(evalforge_common::redis::COMPLETIONS_CHANNEL)
        .await
    {
        tracing::error!("Failed to subscribe to metrics channel: {}", e);
        return;
    }

    info!("Metrics subscriber started - listening for evaluation completions");

    let mut messages = pubsub.on_message();
    while let Some(msg) = messages.next().await {
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(_) => continue,
        };

        match serde_json::from_str::<CompletionEvent>(&payload) {
            Ok(event) => {
                let status = event.status.to_string();
                metrics::record_evaluation_completed(&status, event.duration_ms);
                tracing::debug!(
                    submission_id = %event.submission_id,
                    status = %status,
                    score = event.score,
                    "Recorded evaluation completion"
                );
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring malformed completion event"),
        }
    }
}
