//! Acquirer worker pool.
//!
//! Each worker dequeues repo jobs and runs the acquisition sequence: skip
//! check, credential + pacing, clone, validation, enumeration, credential
//! report, ack. Failures are classified at the job boundary; no error
//! crosses the top of the worker loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ErrorClass, ErrorKind, PipelineError};
use crate::forge::{CredentialPool, RateLimiter};
use crate::metrics;
use crate::queue::{FileQueue, RepoJob, RepoQueue};
use crate::state::ProcessedStore;

use super::clone::Cloner;
use super::walker::{enumerate_source_files, is_valid_clone, WalkConfig};

/// How long a dequeue waits before re-checking for shutdown.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Everything an acquirer worker needs, shared across the pool.
pub struct AcquirerContext {
    pub repo_queue: Arc<RepoQueue>,
    pub file_queue: Arc<FileQueue>,
    pub processed: ProcessedStore,
    pub credentials: Arc<CredentialPool>,
    pub limiter: Arc<RateLimiter>,
    pub cloner: Arc<Cloner>,
    /// Caps clones in flight across the whole pool.
    pub clone_permits: Arc<Semaphore>,
    pub clone_root: PathBuf,
    /// Per-worker scratch staging lives under here.
    pub scratch_root: PathBuf,
    pub walk: WalkConfig,
    /// Overall deadline for one job.
    pub job_timeout: Duration,
    /// Deadline for a single clone attempt.
    pub clone_deadline: Duration,
}

/// Pool of acquirer workers.
pub struct AcquirerPool {
    handles: Vec<JoinHandle<()>>,
}

impl AcquirerPool {
    /// Spawns `count` workers subscribed to the shutdown channel.
    pub fn spawn(
        count: usize,
        context: Arc<AcquirerContext>,
        shutdown: &broadcast::Sender<()>,
    ) -> Self {
        let handles = (0..count)
            .map(|i| {
                let worker = AcquirerWorker {
                    id: format!("acquirer-{i}"),
                    ctx: Arc::clone(&context),
                    shutdown_rx: shutdown.subscribe(),
                };
                tokio::spawn(async move { worker.run().await })
            })
            .collect();

        info!(workers = count, "Acquirer pool started");
        Self { handles }
    }

    /// Waits for every worker to stop.
    pub async fn join(self) {
        for result in futures::future::join_all(self.handles).await {
            if let Err(e) = result {
                error!(error = %e, "Acquirer worker panicked");
            }
        }
    }
}

struct AcquirerWorker {
    id: String,
    ctx: Arc<AcquirerContext>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl AcquirerWorker {
    async fn run(mut self) {
        info!(worker_id = %self.id, "Acquirer worker started");

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => break,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.ctx.repo_queue.dequeue(POLL_INTERVAL).await {
                Ok(Some(job)) => self.process_job(job).await,
                Ok(None) => {}
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Repo dequeue failed");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }

        info!(worker_id = %self.id, "Acquirer worker stopped");
    }

    async fn process_job(&self, job: RepoJob) {
        let repo = job.identity.clone();
        debug!(
            worker_id = %self.id,
            repo = %repo,
            retry_count = job.retry_count,
            "Acquiring repository"
        );

        if let Some(g) = metrics::ACTIVE_WORKERS.get() {
            g.inc();
        }

        let result = tokio::time::timeout(self.ctx.job_timeout, self.acquire(&job)).await;

        if let Some(g) = metrics::ACTIVE_WORKERS.get() {
            g.dec();
        }

        match result {
            Ok(Ok(file_count)) => {
                if let Err(e) = self.ctx.processed.mark_repo(&repo).await {
                    // The ack still goes through; a redelivered job hits the
                    // valid-clone skip check and is idempotent.
                    warn!(repo = %repo, error = %e, "Failed to mark repo processed");
                }
                if let Err(e) = self.ctx.repo_queue.ack(&job).await {
                    error!(repo = %repo, error = %e, "Failed to ack repo job");
                }
                metrics::record_job("repo_queue", "completed");
                info!(
                    worker_id = %self.id,
                    repo = %repo,
                    file_jobs = file_count,
                    "Repository acquired"
                );
            }
            Ok(Err(e)) => self.handle_failure(job, e).await,
            Err(_) => {
                let e = PipelineError::new(
                    ErrorKind::CloneTimeout,
                    format!("job exceeded {}s deadline", self.ctx.job_timeout.as_secs()),
                );
                self.handle_failure(job, e).await;
            }
        }
    }

    async fn handle_failure(&self, job: RepoJob, e: PipelineError) {
        let repo = job.identity.clone();
        metrics::record_error(e.kind);

        match e.class() {
            ErrorClass::Transient => {
                warn!(
                    worker_id = %self.id,
                    repo = %repo,
                    retry_count = job.retry_count,
                    error = %e,
                    "Transient acquisition failure; nacking"
                );
                match self.ctx.repo_queue.nack(job, &e.to_string()).await {
                    Ok(outcome) => {
                        let label = match outcome {
                            crate::queue::NackOutcome::Requeued { .. } => "requeued",
                            crate::queue::NackOutcome::DeadLettered => "dead-lettered",
                        };
                        metrics::record_job("repo_queue", label);
                    }
                    Err(nack_err) => {
                        error!(repo = %repo, error = %nack_err, "Failed to nack repo job");
                    }
                }
            }
            ErrorClass::Permanent => {
                error!(
                    worker_id = %self.id,
                    repo = %repo,
                    error = %e,
                    "Permanent acquisition failure; dead-lettering"
                );
                if let Err(dlq_err) = self.ctx.repo_queue.dead_letter(&job, &e.to_string()).await {
                    error!(repo = %repo, error = %dlq_err, "Failed to dead-letter repo job");
                }
                metrics::record_job("repo_queue", "dead-lettered");
            }
            ErrorClass::Duplicate => {
                if let Err(ack_err) = self.ctx.repo_queue.ack(&job).await {
                    error!(repo = %repo, error = %ack_err, "Failed to ack duplicate repo job");
                }
                metrics::record_job("repo_queue", "duplicate");
            }
        }
    }

    /// The acquisition sequence. Returns the number of file jobs emitted.
    async fn acquire(&self, job: &RepoJob) -> Result<usize, PipelineError> {
        let id = &job.identity;
        let dest = self.ctx.clone_root.join(id.owner()).join(id.name());

        if !is_valid_clone(&dest) {
            let _permit = self
                .ctx
                .clone_permits
                .acquire()
                .await
                .map_err(|_| PipelineError::network("clone permit pool closed"))?;

            let lease = self.ctx.credentials.acquire();
            self.ctx.limiter.acquire().await;

            let scratch = self
                .ctx
                .scratch_root
                .join(&self.id)
                .join(format!("{}__{}", id.owner(), id.name()));
            if scratch.exists() {
                std::fs::remove_dir_all(&scratch)?;
            }
            if let Some(parent) = scratch.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let outcome = self
                .ctx
                .cloner
                .clone_repo(id, &lease.token, &scratch, self.ctx.clone_deadline)
                .await;

            // Credential reporting happens regardless of clone success; a
            // 403 carries quota headers worth feeding back.
            if let Ok(o) = &outcome {
                if let Some(rate) = o.rate {
                    self.ctx
                        .credentials
                        .report(lease.id, rate.remaining, rate.reset_at);
                }
            }
            let outcome = outcome?;

            if !is_valid_clone(&scratch) {
                std::fs::remove_dir_all(&scratch).ok();
                return Err(PipelineError::network(format!(
                    "{} clone reported success but produced an invalid tree",
                    outcome.strategy.as_str()
                )));
            }

            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if let Err(rename_err) = std::fs::rename(&scratch, &dest) {
                // A concurrent retry may have installed the clone first.
                if is_valid_clone(&dest) {
                    std::fs::remove_dir_all(&scratch).ok();
                } else {
                    return Err(PipelineError::io(rename_err));
                }
            }
        } else {
            debug!(repo = %id, "Valid clone already present; skipping fetch");
        }

        let jobs = enumerate_source_files(id, &dest, &self.ctx.walk)?;
        self.ctx
            .file_queue
            .enqueue_batch(&jobs)
            .await
            .map_err(|e| PipelineError::network(format!("file enqueue: {e}")))?;

        Ok(jobs.len())
    }
}
