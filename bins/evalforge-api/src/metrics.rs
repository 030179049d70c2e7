// Prometheus metrics for the EvalForge API

use evalforge_common::types::{Priority, QueueHealth};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    // Global registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Evaluations enqueued (counter with priority label)
    pub static ref EVALUATIONS_ENQUEUED: CounterVec = CounterVec::new(
        Opts::new("evalforge_evaluations_enqueued_total", "Total number of evaluations enqueued"),
        &["priority"]
    )
    .expect("metric can be created");

    // Evaluations finished (counter with terminal status label)
    pub static ref EVALUATIONS_COMPLETED: CounterVec = CounterVec::new(
        Opts::new("evalforge_evaluations_completed_total", "Total number of evaluation attempts finished"),
        &["status"]
    )
    .expect("metric can be created");

    // Evaluation duration histogram (in seconds)
    pub static ref EVALUATION_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "evalforge_evaluation_duration_seconds",
            "Wall time of one evaluation attempt in seconds"
        )
        .buckets(vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0, 3600.0]),
        &["status"]
    )
    .expect("metric can be created");

    // Waiting jobs per priority list
    pub static ref QUEUE_DEPTH: IntGaugeVec = IntGaugeVec::new(
        Opts::new("evalforge_queue_depth", "Current queue depth per priority"),
        &["priority"]
    )
    .expect("metric can be created");

    pub static ref ACTIVE_JOBS: IntGauge = IntGauge::new(
        "evalforge_active_jobs",
        "Jobs currently held by a worker"
    )
    .expect("metric can be created");

    // Requests refused before enqueue
    pub static ref REQUESTS_REJECTED: CounterVec = CounterVec::new(
        Opts::new("evalforge_requests_rejected_total", "Total evaluation requests rejected by validation"),
        &["reason"]
    )
    .expect("metric can be created");
}

/// Initialize metrics registry
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(EVALUATIONS_ENQUEUED.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(EVALUATIONS_COMPLETED.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(EVALUATION_DURATION.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(QUEUE_DEPTH.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(ACTIVE_JOBS.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(REQUESTS_REJECTED.clone()))
        .expect("collector can be registered");
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

pub fn record_evaluation_enqueued(priority: &Priority) {
    EVALUATIONS_ENQUEUED
        .with_label_values(&[&priority.to_string()])
        .inc();
}

pub fn record_request_rejected(reason: &str) {
    REQUESTS_REJECTED.with_label_values(&[reason]).inc();
}

/// Record a finished attempt as announced on the completion channel
pub fn record_evaluation_completed(status: &str, duration_ms: u64) {
    EVALUATIONS_COMPLETED.with_label_values(&[status]).inc();
    EVALUATION_DURATION
        .with_label_values(&[status])
        .observe(duration_ms as f64 / 1000.0);
}

/// Update the queue gauges from a fresh Redis read
pub async fn update_queue_depths(redis_conn: &mut redis::aio::ConnectionManager) {
    use redis::AsyncCommands;

    for priority in Priority::all_variants() {
        let queue_name = evalforge_common::redis::queue_name(priority);
        if let Ok(depth) = redis_conn.llen::<_, i64>(&queue_name).await {
            QUEUE_DEPTH
                .with_label_values(&[&priority.to_string()])
                .set(depth);
        }
    }
}

pub fn record_queue_health(health: &QueueHealth) {
    ACTIVE_JOBS.set(health.active as i64);
}
