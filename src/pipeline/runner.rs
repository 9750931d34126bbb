//! Long-running pipeline process.
//!
//! Connects the shared infrastructure (Redis queues, processed sets, the
//! corpus index, the credential pool, the rate limiter), recovers jobs left
//! in processing lists by a previous crash, then runs the acquirer and
//! analyzer pools until a shutdown signal arrives. Startup failures are
//! fatal; after startup, no error escapes a worker loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use regex::RegexSet;
use tokio::sync::{broadcast, Semaphore};
use tracing::{info, warn};

use crate::acquire::{AcquirerContext, AcquirerPool, Cloner, WalkConfig};
use crate::analyze::{AnalyzerContext, AnalyzerPool};
use crate::config::PipelineConfig;
use crate::forge::{CredentialPool, RateLimiter};
use crate::index::{CorpusIndex, ObservationClock};
use crate::metrics;
use crate::queue::redis_queue::{connect, dead_letter_sink};
use crate::queue::{DeadLetterSink, FileQueue, RepoQueue};
use crate::state::ProcessedStore;

/// How long in-flight jobs get to finish after the shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// How often queue depths are sampled into gauges.
const SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

/// Owns the pipeline's lifecycle from startup validation to shutdown.
pub struct PipelineRunner {
    config: PipelineConfig,
}

impl PipelineRunner {
    /// Creates a runner over a validated configuration.
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Runs the pipeline until interrupted.
    pub async fn run(self) -> anyhow::Result<()> {
        let config = self.config;
        metrics::init_metrics().context("initializing metrics")?;

        // --- Shared infrastructure; every failure here is fatal. ---
        let redis = connect(&config.queues.redis_url)
            .await
            .context("connecting to Redis")?;
        let dead_letter = dead_letter_sink(redis.clone(), &config.queues);
        let repo_queue = Arc::new(RepoQueue::new(
            redis.clone(),
            &config.queues,
            dead_letter.clone(),
        ));
        let file_queue = Arc::new(FileQueue::new(
            redis.clone(),
            &config.queues,
            dead_letter.clone(),
        ));
        let processed = ProcessedStore::new(redis);

        let index = CorpusIndex::connect(&config.index)
            .await
            .context("connecting to corpus index")?;
        let last_observation = index
            .max_observation_id()
            .await
            .context("reading observation high-water mark")?;
        let clock = Arc::new(ObservationClock::seeded(last_observation));

        let credentials = Arc::new(
            CredentialPool::new(
                config.forge.tokens.clone(),
                config.forge.credential_safety_threshold,
                config.forge.credential_ceiling,
            )
            .context("building credential pool")?,
        );
        let limiter = Arc::new(RateLimiter::new(config.forge.max_requests_per_second));

        // --- Crash recovery before any worker starts. ---
        let recovered_repos = repo_queue.recover().await.context("recovering repo queue")?;
        let recovered_files = file_queue.recover().await.context("recovering file queue")?;
        if recovered_repos > 0 || recovered_files > 0 {
            info!(
                repo_jobs = recovered_repos,
                file_jobs = recovered_files,
                "Recovered jobs from processing lists"
            );
        }

        std::fs::create_dir_all(&config.storage.clone_root)
            .context("creating clone root")?;

        let (shutdown_tx, _) = broadcast::channel(1);

        let acquirer_ctx = Arc::new(AcquirerContext {
            repo_queue: Arc::clone(&repo_queue),
            file_queue: Arc::clone(&file_queue),
            processed: processed.clone(),
            credentials,
            limiter,
            cloner: Arc::new(Cloner::with_defaults(config.forge.request_timeout)),
            clone_permits: Arc::new(Semaphore::new(config.workers.max_concurrent_clones)),
            clone_root: config.storage.clone_root.clone(),
            scratch_root: config.storage.clone_root.join(".scratch"),
            walk: WalkConfig::from_config(&config.repo_filter, &config.file_filter),
            job_timeout: config.workers.job_timeout,
            // Three strategies may run back to back within one job.
            clone_deadline: config.workers.job_timeout / 3,
        });

        let analyzer_ctx = Arc::new(AnalyzerContext {
            file_queue: Arc::clone(&file_queue),
            processed,
            index,
            clock,
            exclusions: RegexSet::new(&config.file_filter.exclude_content_patterns)
                .context("compiling exclusion patterns")?,
            filter: config.file_filter.clone(),
            batch_size: config.batching.batch_size,
            flush_interval: config.batching.flush_interval,
        });

        let acquirers = AcquirerPool::spawn(config.workers.repo_workers, acquirer_ctx, &shutdown_tx);
        let analyzers = AnalyzerPool::spawn(config.workers.file_workers, analyzer_ctx, &shutdown_tx);

        let sampler = tokio::spawn(sample_depths(
            Arc::clone(&repo_queue),
            Arc::clone(&file_queue),
            dead_letter,
            shutdown_tx.subscribe(),
        ));

        info!(
            repo_workers = config.workers.repo_workers,
            file_workers = config.workers.file_workers,
            "Pipeline running; press Ctrl-C to stop"
        );

        tokio::signal::ctrl_c()
            .await
            .context("waiting for shutdown signal")?;
        info!("Shutdown signal received; draining workers");
        let _ = shutdown_tx.send(());

        let drain = async {
            acquirers.join().await;
            analyzers.join().await;
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!(
                grace_secs = SHUTDOWN_GRACE.as_secs(),
                "Grace window expired; unacked jobs will redeliver on next start"
            );
        }
        sampler.abort();

        info!("Pipeline stopped");
        Ok(())
    }
}

/// Periodically samples queue depths into gauges until shutdown.
async fn sample_depths(
    repo_queue: Arc<RepoQueue>,
    file_queue: Arc<FileQueue>,
    dead_letter: DeadLetterSink,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = tokio::time::sleep(SAMPLE_INTERVAL) => {}
        }

        let Some(gauge) = metrics::QUEUE_DEPTH.get() else {
            continue;
        };

        if let Ok(depths) = repo_queue.depths().await {
            gauge
                .with_label_values(&["repo_queue:high"])
                .set(depths[0] as f64);
            gauge
                .with_label_values(&["repo_queue:normal"])
                .set(depths[1] as f64);
            gauge
                .with_label_values(&["repo_queue:low"])
                .set(depths[2] as f64);
        }
        if let Ok(len) = file_queue.len().await {
            gauge.with_label_values(&["file_queue"]).set(len as f64);
        }
        if let Ok(len) = dead_letter.len().await {
            gauge.with_label_values(&["dead_letter"]).set(len as f64);
        }
    }
}
