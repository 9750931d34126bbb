//! Prometheus metrics registration and export.
//!
//! Metrics are process-wide counters and gauges written via atomic
//! primitives; nothing in the pipeline reads them for control flow. The
//! exporter produces the text exposition format for operators to scrape or
//! dump; serving it over HTTP is out of scope for the core.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

use crate::error::ErrorKind;

/// Global Prometheus registry for all corpus-forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Jobs processed, labeled by queue and outcome
/// (completed / requeued / dead-lettered / rejected / duplicate).
pub static JOBS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Failures by error kind.
pub static ERRORS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Pending jobs per queue, sampled by the pipeline runner.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Corpus entries published.
pub static FILES_PUBLISHED: OnceLock<Counter> = OnceLock::new();

/// Distribution of file quality scores.
pub static QUALITY_SCORE: OnceLock<Histogram> = OnceLock::new();

/// Clone duration in seconds, labeled by strategy.
pub static CLONE_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Number of workers currently processing a job.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Idempotent: calling it twice leaves the first registration in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric construction fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let jobs_total = CounterVec::new(
        Opts::new("corpus_forge_jobs_total", "Jobs processed"),
        &["queue", "outcome"],
    )?;

    let errors_total = CounterVec::new(
        Opts::new("corpus_forge_errors_total", "Failures by error kind"),
        &["kind"],
    )?;

    let queue_depth = GaugeVec::new(
        Opts::new("corpus_forge_queue_depth", "Pending jobs per queue"),
        &["queue"],
    )?;

    let files_published = Counter::new(
        "corpus_forge_files_published_total",
        "Corpus entries published",
    )?;

    let quality_score = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "corpus_forge_quality_score",
            "Distribution of file quality scores",
        )
        .buckets(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]),
    )?;

    let clone_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "corpus_forge_clone_duration_seconds",
            "Clone duration in seconds",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
        &["strategy"],
    )?;

    let active_workers = Gauge::new(
        "corpus_forge_active_workers",
        "Workers currently processing a job",
    )?;

    registry.register(Box::new(jobs_total.clone()))?;
    registry.register(Box::new(errors_total.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(files_published.clone()))?;
    registry.register(Box::new(quality_score.clone()))?;
    registry.register(Box::new(clone_duration.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;

    // set() fails only if already initialized; that's fine.
    let _ = REGISTRY.set(registry);
    let _ = JOBS_TOTAL.set(jobs_total);
    let _ = ERRORS_TOTAL.set(errors_total);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = FILES_PUBLISHED.set(files_published);
    let _ = QUALITY_SCORE.set(quality_score);
    let _ = CLONE_DURATION.set(clone_duration);
    let _ = ACTIVE_WORKERS.set(active_workers);

    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

/// Records a failure under its error kind.
pub fn record_error(kind: ErrorKind) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[kind.as_str()]).inc();
    }
}

/// Records a job outcome for a queue.
pub fn record_job(queue: &str, outcome: &str) {
    if let Some(counter) = JOBS_TOTAL.get() {
        counter.with_label_values(&[queue, outcome]).inc();
    }
}

/// Observes a quality score.
pub fn observe_quality(score: f64) {
    if let Some(histogram) = QUALITY_SCORE.get() {
        histogram.observe(score);
    }
}

/// Export all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
