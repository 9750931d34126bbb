//! Redis-backed reliable queues.
//!
//! Each logical queue is a pair of Redis lists: the main list and a
//! processing list. Dequeue atomically moves a job from main to processing
//! (`RPOPLPUSH`/`BRPOPLPUSH`); ack removes it from processing; a worker
//! crash leaves the job in processing, where startup recovery finds it and
//! re-enqueues it with its retry count bumped.
//!
//! # Key layout
//!
//! - `corpus:repo_queue:{high,normal,low}` + `:processing` each
//! - `corpus:file_queue` + `:processing`
//! - `corpus:dead_letter` (append-only, trimmed to a retention cap)

use std::time::Duration;

use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;

use crate::config::QueueConfig;

use super::job::{retry_backoff, DeadLetterEntry, Priority, QueueJob, RepoJob};
use super::FileJob;

/// How often the banded dequeue re-polls while waiting for work.
const BAND_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to Redis.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// Failed to (de)serialize a job payload.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of a nack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// The job will reappear on its queue after the given delay.
    Requeued { delay: Duration },
    /// The retry budget is spent; the job moved to the dead-letter sink.
    DeadLettered,
}

/// Append-only sink of terminally failed jobs, kept for inspection.
#[derive(Clone)]
pub struct DeadLetterSink {
    redis: ConnectionManager,
    key: String,
    retention: usize,
}

impl DeadLetterSink {
    fn new(redis: ConnectionManager, retention: usize) -> Self {
        Self {
            redis,
            key: "corpus:dead_letter".to_string(),
            retention,
        }
    }

    /// Appends an entry, trimming the sink to its retention cap.
    pub async fn push<J: QueueJob>(
        &self,
        queue: &str,
        job: &J,
        terminal_error: &str,
    ) -> Result<(), QueueError> {
        let entry = DeadLetterEntry {
            original_job: serde_json::to_value(job)?,
            queue: queue.to_string(),
            terminal_error: terminal_error.to_string(),
            dead_lettered_at: Utc::now(),
        };
        let serialized = serde_json::to_string(&entry)?;

        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.lpush(&self.key, serialized)
            .ltrim(&self.key, 0, self.retention as isize - 1);
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    /// Returns up to `limit` entries, newest first, without removing them.
    pub async fn peek(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, QueueError> {
        let mut conn = self.redis.clone();
        let raw: Vec<String> = conn.lrange(&self.key, 0, limit as isize - 1).await?;

        let mut entries = Vec::with_capacity(raw.len());
        for item in raw {
            entries.push(serde_json::from_str(&item)?);
        }
        Ok(entries)
    }

    /// Number of retained entries.
    pub async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        Ok(conn.llen(&self.key).await?)
    }

    /// Deletes all entries, returning how many were removed.
    pub async fn clear(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.key).await?;
        conn.del::<_, ()>(&self.key).await?;
        Ok(len)
    }
}

/// One reliable list-pair queue for a single job type.
struct ReliableQueue<J: QueueJob> {
    redis: ConnectionManager,
    main_key: String,
    processing_key: String,
    label: String,
    retry_budget: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
    dead_letter: DeadLetterSink,
    _marker: std::marker::PhantomData<J>,
}

impl<J: QueueJob> ReliableQueue<J> {
    fn new(
        redis: ConnectionManager,
        key: &str,
        config: &QueueConfig,
        dead_letter: DeadLetterSink,
    ) -> Self {
        Self {
            redis,
            main_key: key.to_string(),
            processing_key: format!("{key}:processing"),
            label: key.trim_start_matches("corpus:").to_string(),
            retry_budget: config.retry_budget,
            backoff_base: config.backoff_base,
            backoff_cap: config.backoff_cap,
            dead_letter,
            _marker: std::marker::PhantomData,
        }
    }

    async fn enqueue(&self, job: &J) -> Result<(), QueueError> {
        let serialized = serde_json::to_string(job)?;
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(&self.main_key, serialized).await?;
        Ok(())
    }

    async fn enqueue_batch(&self, jobs: &[J]) -> Result<(), QueueError> {
        if jobs.is_empty() {
            return Ok(());
        }

        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        for job in jobs {
            pipe.lpush(&self.main_key, serde_json::to_string(job)?);
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    /// Non-blocking reliable dequeue.
    async fn try_dequeue(&self) -> Result<Option<J>, QueueError> {
        let mut conn = self.redis.clone();
        let moved: Option<String> = redis::cmd("RPOPLPUSH")
            .arg(&self.main_key)
            .arg(&self.processing_key)
            .query_async(&mut conn)
            .await?;

        match moved {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    /// Blocking reliable dequeue, waiting up to `timeout`.
    async fn dequeue_blocking(&self, timeout: Duration) -> Result<Option<J>, QueueError> {
        let mut conn = self.redis.clone();
        let timeout_secs = timeout.as_secs().max(1) as usize;

        let moved: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&self.main_key)
            .arg(&self.processing_key)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        match moved {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    /// Acknowledges successful processing, dropping the job.
    async fn ack(&self, job: &J) -> Result<(), QueueError> {
        self.remove_from_processing(&job.key()).await
    }

    /// Records a failed attempt.
    ///
    /// Within budget, the job stays in the processing list while its backoff
    /// elapses and is then moved back to the main queue in one atomic
    /// pipeline; a crash mid-backoff leaves it recoverable. Past budget it
    /// moves to the dead-letter sink with its error history.
    async fn nack(&self, mut job: J, error: &str) -> Result<NackOutcome, QueueError> {
        job.bump_retry(error);

        if job.retry_count() > self.retry_budget {
            self.remove_from_processing(&job.key()).await?;
            self.dead_letter.push(&self.label, &job, error).await?;
            return Ok(NackOutcome::DeadLettered);
        }

        let delay = retry_backoff(job.retry_count(), self.backoff_base, self.backoff_cap);
        let redis = self.redis.clone();
        let main_key = self.main_key.clone();
        let processing_key = self.processing_key.clone();
        let key = job.key();
        let serialized = serde_json::to_string(&job)?;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) =
                requeue_processing_entry(redis, &processing_key, &main_key, &key, &serialized).await
            {
                tracing::error!(job = %key, error = %e, "Delayed requeue failed");
            }
        });

        Ok(NackOutcome::Requeued { delay })
    }

    /// Moves dead jobs stuck in the processing list back onto the queue.
    ///
    /// Called on startup; a populated processing list means the previous
    /// process died mid-job. Each recovery counts as a retry.
    async fn recover(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let stuck: Vec<String> = conn.lrange(&self.processing_key, 0, -1).await?;
        let mut recovered = 0;

        for raw in stuck {
            let Ok(mut job) = serde_json::from_str::<J>(&raw) else {
                // Unreadable payloads cannot be retried; drop them.
                conn.lrem::<_, _, ()>(&self.processing_key, 1, &raw).await?;
                tracing::warn!(queue = %self.label, "Dropped unreadable processing entry");
                continue;
            };

            job.bump_retry("recovered from processing queue after restart");

            if job.retry_count() > self.retry_budget {
                conn.lrem::<_, _, ()>(&self.processing_key, 1, &raw).await?;
                self.dead_letter
                    .push(&self.label, &job, "retry budget exhausted during recovery")
                    .await?;
                continue;
            }

            let serialized = serde_json::to_string(&job)?;
            let mut pipe = redis::pipe();
            pipe.atomic()
                .lrem(&self.processing_key, 1, &raw)
                .rpush(&self.main_key, &serialized);
            pipe.query_async::<_, ()>(&mut conn).await?;
            recovered += 1;
        }

        Ok(recovered)
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        Ok(conn.llen(&self.main_key).await?)
    }

    async fn remove_from_processing(&self, key: &str) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let entries: Vec<String> = conn.lrange(&self.processing_key, 0, -1).await?;

        for raw in entries {
            if let Ok(job) = serde_json::from_str::<J>(&raw) {
                if job.key() == key {
                    conn.lrem::<_, _, ()>(&self.processing_key, 1, &raw).await?;
                    return Ok(());
                }
            }
        }

        // Already removed (e.g. by recovery); not an error.
        Ok(())
    }
}

/// Atomically moves one processing entry (matched by job key) back to main.
async fn requeue_processing_entry(
    redis: ConnectionManager,
    processing_key: &str,
    main_key: &str,
    job_key: &str,
    serialized_job: &str,
) -> Result<(), QueueError> {
    let mut conn = redis;
    let entries: Vec<String> = conn.lrange(processing_key, 0, -1).await?;

    for raw in entries {
        let matches = serde_json::from_str::<serde_json::Value>(&raw)
            .ok()
            .map(|v| {
                v.get("identity")
                    .or_else(|| v.get("abs_path"))
                    .and_then(|k| k.as_str())
                    .map(|k| k == job_key)
                    .unwrap_or(false)
            })
            .unwrap_or(false);

        if matches {
            let mut pipe = redis::pipe();
            pipe.atomic()
                .lrem(processing_key, 1, &raw)
                .rpush(main_key, serialized_job);
            pipe.query_async::<_, ()>(&mut conn).await?;
            return Ok(());
        }
    }

    // Entry gone from processing (recovery beat us to it); the recovered copy
    // already carries the bumped retry count, so nothing to do.
    Ok(())
}

/// Priority-banded queue of repo jobs.
///
/// Dequeue drains bands high -> normal -> low.
pub struct RepoQueue {
    bands: [ReliableQueue<RepoJob>; 3],
}

impl RepoQueue {
    /// Builds the banded queue over an existing Redis connection.
    pub fn new(redis: ConnectionManager, config: &QueueConfig, dead_letter: DeadLetterSink) -> Self {
        let band = |p: Priority| {
            ReliableQueue::new(
                redis.clone(),
                &format!("corpus:repo_queue:{}", p.as_str()),
                config,
                dead_letter.clone(),
            )
        };
        Self {
            bands: [
                band(Priority::High),
                band(Priority::Normal),
                band(Priority::Low),
            ],
        }
    }

    /// Enqueues a job onto its priority band.
    pub async fn enqueue(&self, job: &RepoJob) -> Result<(), QueueError> {
        self.bands[job.priority.band_index()].enqueue(job).await
    }

    /// Dequeues the next job, draining bands in priority order.
    ///
    /// Polls the bands until a job appears or `timeout` elapses. The poll
    /// cadence is coarse; repo jobs take seconds to minutes to process, so
    /// dequeue latency is irrelevant next to clone time.
    pub async fn dequeue(&self, timeout: Duration) -> Result<Option<RepoJob>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            for band in &self.bands {
                if let Some(job) = band.try_dequeue().await? {
                    return Ok(Some(job));
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(BAND_POLL_INTERVAL).await;
        }
    }

    /// Acknowledges successful processing.
    pub async fn ack(&self, job: &RepoJob) -> Result<(), QueueError> {
        self.bands[job.priority.band_index()].ack(job).await
    }

    /// Records a failure; requeues with backoff or dead-letters.
    pub async fn nack(&self, job: RepoJob, error: &str) -> Result<NackOutcome, QueueError> {
        let band = job.priority.band_index();
        self.bands[band].nack(job, error).await
    }

    /// Dead-letters a job immediately, bypassing retries.
    pub async fn dead_letter(&self, job: &RepoJob, error: &str) -> Result<(), QueueError> {
        let band = &self.bands[job.priority.band_index()];
        band.remove_from_processing(&job.key()).await?;
        band.dead_letter.push(&band.label, job, error).await
    }

    /// Recovers jobs stuck in processing lists after a crash.
    pub async fn recover(&self) -> Result<usize, QueueError> {
        let mut total = 0;
        for band in &self.bands {
            total += band.recover().await?;
        }
        Ok(total)
    }

    /// Pending jobs per band, in drain order.
    pub async fn depths(&self) -> Result<[usize; 3], QueueError> {
        Ok([
            self.bands[0].len().await?,
            self.bands[1].len().await?,
            self.bands[2].len().await?,
        ])
    }
}

/// FIFO queue of file jobs.
pub struct FileQueue {
    inner: ReliableQueue<FileJob>,
}

impl FileQueue {
    /// Builds the file queue over an existing Redis connection.
    pub fn new(redis: ConnectionManager, config: &QueueConfig, dead_letter: DeadLetterSink) -> Self {
        Self {
            inner: ReliableQueue::new(redis, "corpus:file_queue", config, dead_letter),
        }
    }

    /// Enqueues one job.
    pub async fn enqueue(&self, job: &FileJob) -> Result<(), QueueError> {
        self.inner.enqueue(job).await
    }

    /// Enqueues a batch of jobs in one pipeline.
    pub async fn enqueue_batch(&self, jobs: &[FileJob]) -> Result<(), QueueError> {
        self.inner.enqueue_batch(jobs).await
    }

    /// Blocking dequeue, waiting up to `timeout`.
    pub async fn dequeue(&self, timeout: Duration) -> Result<Option<FileJob>, QueueError> {
        self.inner.dequeue_blocking(timeout).await
    }

    /// Acknowledges successful processing.
    pub async fn ack(&self, job: &FileJob) -> Result<(), QueueError> {
        self.inner.ack(job).await
    }

    /// Records a failure; requeues with backoff or dead-letters.
    pub async fn nack(&self, job: FileJob, error: &str) -> Result<NackOutcome, QueueError> {
        self.inner.nack(job, error).await
    }

    /// Dead-letters a job immediately, bypassing retries.
    pub async fn dead_letter(&self, job: &FileJob, error: &str) -> Result<(), QueueError> {
        self.inner.remove_from_processing(&job.key()).await?;
        self.inner
            .dead_letter
            .push(&self.inner.label, job, error)
            .await
    }

    /// Recovers jobs stuck in processing after a crash.
    pub async fn recover(&self) -> Result<usize, QueueError> {
        self.inner.recover().await
    }

    /// Pending jobs.
    pub async fn len(&self) -> Result<usize, QueueError> {
        self.inner.len().await
    }
}

/// Connects to Redis for the queue subsystem.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager, QueueError> {
    let client = redis::Client::open(redis_url)
        .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;
    ConnectionManager::new(client)
        .await
        .map_err(|e| QueueError::ConnectionFailed(e.to_string()))
}

/// Builds the dead-letter sink over an existing Redis connection.
pub fn dead_letter_sink(redis: ConnectionManager, config: &QueueConfig) -> DeadLetterSink {
    DeadLetterSink::new(redis, config.dead_letter_retention)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::RepoId;

    #[test]
    fn nack_outcome_equality() {
        assert_eq!(
            NackOutcome::Requeued {
                delay: Duration::from_secs(2)
            },
            NackOutcome::Requeued {
                delay: Duration::from_secs(2)
            }
        );
        assert_ne!(
            NackOutcome::Requeued {
                delay: Duration::from_secs(2)
            },
            NackOutcome::DeadLettered
        );
    }

    #[test]
    fn queue_labels_drop_namespace_prefix() {
        // The label is what operators see in dead-letter entries.
        let key = "corpus:repo_queue:high";
        assert_eq!(key.trim_start_matches("corpus:"), "repo_queue:high");
    }

    #[test]
    fn processing_entry_key_match() {
        let repo = RepoJob::new(RepoId::parse("alice/good-lib").expect("valid"), Priority::High);
        let raw = serde_json::to_string(&repo).expect("serialize");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("parse");

        // The requeue matcher looks jobs up by identity / abs_path.
        assert_eq!(
            value.get("identity").and_then(|v| v.as_str()),
            Some("alice/good-lib")
        );

        let file = FileJob::new(
            RepoId::parse("alice/good-lib").expect("valid"),
            "/tmp/x.go".into(),
            "x.go".into(),
        );
        let value = serde_json::to_value(&file).expect("serialize");
        assert_eq!(
            value.get("abs_path").and_then(|v| v.as_str()),
            Some("/tmp/x.go")
        );
    }
}
