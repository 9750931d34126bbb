//! Analyzer worker pool.
//!
//! Each worker dequeues file jobs and runs the analysis sequence: read,
//! detect language, digest, dedup, score, filter, publish. Publication is
//! batched: entries accumulate in a per-worker buffer until a size or age
//! bound is hit, then flush to the index in one atomic write. Digests enter
//! the processed set and jobs are acked only after a successful flush, so a
//! crash mid-batch redelivers cleanly.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use regex::RegexSet;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::FileFilterConfig;
use crate::error::{ErrorClass, ErrorKind, PipelineError};
use crate::index::{CorpusEntry, CorpusIndex, ObservationClock};
use crate::metrics;
use crate::queue::{FileJob, FileQueue};
use crate::state::ProcessedStore;

use super::language::detect_language;
use super::scorer::{score_file, ScoreBreakdown};

/// How long a dequeue waits before re-checking shutdown and flush age.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Attempts before a failed flush gives up and nacks its jobs.
const FLUSH_ATTEMPTS: u32 = 3;

/// Everything an analyzer worker needs, shared across the pool.
pub struct AnalyzerContext {
    pub file_queue: Arc<FileQueue>,
    pub processed: ProcessedStore,
    pub index: CorpusIndex,
    pub clock: Arc<ObservationClock>,
    pub filter: FileFilterConfig,
    /// Compiled exclusion patterns (validated at startup).
    pub exclusions: RegexSet,
    pub batch_size: usize,
    pub flush_interval: Duration,
}

/// Pool of analyzer workers.
pub struct AnalyzerPool {
    handles: Vec<JoinHandle<()>>,
}

impl AnalyzerPool {
    /// Spawns `count` workers subscribed to the shutdown channel.
    pub fn spawn(
        count: usize,
        context: Arc<AnalyzerContext>,
        shutdown: &broadcast::Sender<()>,
    ) -> Self {
        let handles = (0..count)
            .map(|i| {
                let worker = FileAnalyzer::new(
                    format!("analyzer-{i}"),
                    Arc::clone(&context),
                    shutdown.subscribe(),
                );
                tokio::spawn(async move { worker.run().await })
            })
            .collect();

        info!(workers = count, "Analyzer pool started");
        Self { handles }
    }

    /// Waits for every worker to stop.
    pub async fn join(self) {
        for result in futures::future::join_all(self.handles).await {
            if let Err(e) = result {
                error!(error = %e, "Analyzer worker panicked");
            }
        }
    }
}

struct PendingEntry {
    job: FileJob,
    entry: DraftEntry,
}

/// A corpus entry awaiting its observation id, assigned at flush time.
struct DraftEntry {
    digest: String,
    job_repo: crate::discovery::RepoId,
    rel_path: String,
    language: String,
    size: u64,
    breakdown: ScoreBreakdown,
}

/// Verdict on a file's content, before dedup and publication.
pub(crate) enum ContentVerdict {
    Publish(ScoreBreakdown),
    Reject(&'static str),
}

/// Applies line bounds, quality threshold, and exclusion patterns.
///
/// Pure given its inputs; the threshold comparison is `>=`, so a file
/// scoring exactly the publication threshold is accepted.
pub(crate) fn evaluate_content(
    content: &str,
    language: &str,
    filter: &FileFilterConfig,
    exclusions: &RegexSet,
) -> ContentVerdict {
    let breakdown = score_file(content, language);

    if breakdown.lines < filter.min_lines || breakdown.lines > filter.max_lines {
        return ContentVerdict::Reject("rejected-lines");
    }
    if breakdown.total < filter.quality_threshold {
        return ContentVerdict::Reject("rejected-score");
    }
    if exclusions.is_match(content) {
        return ContentVerdict::Reject("rejected-pattern");
    }

    ContentVerdict::Publish(breakdown)
}

/// Content digest: first 128 bits of SHA-256, hex-encoded.
pub(crate) fn content_digest(content: &[u8]) -> String {
    let hash = Sha256::digest(content);
    hex::encode(&hash[..16])
}

enum Analysis {
    Publish(DraftEntry),
    Reject(&'static str),
    Duplicate,
}

/// One analyzer worker with its private batch buffer.
pub struct FileAnalyzer {
    id: String,
    ctx: Arc<AnalyzerContext>,
    shutdown_rx: broadcast::Receiver<()>,
    pending: Vec<PendingEntry>,
    pending_digests: HashSet<String>,
    oldest_pending: Option<Instant>,
}

impl FileAnalyzer {
    fn new(id: String, ctx: Arc<AnalyzerContext>, shutdown_rx: broadcast::Receiver<()>) -> Self {
        Self {
            id,
            ctx,
            shutdown_rx,
            pending: Vec::new(),
            pending_digests: HashSet::new(),
            oldest_pending: None,
        }
    }

    async fn run(mut self) {
        info!(worker_id = %self.id, "Analyzer worker started");

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    // Best-effort final flush; anything unflushed stays
                    // unacked and redelivers on restart.
                    self.flush().await;
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.ctx.file_queue.dequeue(POLL_INTERVAL).await {
                Ok(Some(job)) => self.handle_job(job).await,
                Ok(None) => {}
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "File dequeue failed");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }

            let size_due = self.pending.len() >= self.ctx.batch_size;
            let age_due = self
                .oldest_pending
                .map(|t| t.elapsed() >= self.ctx.flush_interval)
                .unwrap_or(false);
            if size_due || age_due {
                self.flush().await;
            }
        }

        info!(worker_id = %self.id, "Analyzer worker stopped");
    }

    async fn handle_job(&mut self, job: FileJob) {
        match self.analyze(&job).await {
            Ok(Analysis::Publish(entry)) => {
                metrics::observe_quality(entry.breakdown.total);
                self.pending_digests.insert(entry.digest.clone());
                self.pending.push(PendingEntry { job, entry });
                if self.oldest_pending.is_none() {
                    self.oldest_pending = Some(Instant::now());
                }
            }
            Ok(Analysis::Reject(reason)) => {
                debug!(worker_id = %self.id, path = %job.abs_path.display(), reason, "File rejected");
                if let Err(e) = self.ctx.file_queue.ack(&job).await {
                    error!(error = %e, "Failed to ack rejected file job");
                }
                metrics::record_job("file_queue", reason);
            }
            Ok(Analysis::Duplicate) => {
                if let Err(e) = self.ctx.file_queue.ack(&job).await {
                    error!(error = %e, "Failed to ack duplicate file job");
                }
                metrics::record_job("file_queue", "rejected-duplicate");
            }
            Err(e) => {
                metrics::record_error(e.kind);
                match e.class() {
                    ErrorClass::Transient => {
                        warn!(
                            worker_id = %self.id,
                            path = %job.abs_path.display(),
                            retry_count = job.retry_count,
                            error = %e,
                            "Transient analysis failure; nacking"
                        );
                        if let Err(nack_err) = self.ctx.file_queue.nack(job, &e.to_string()).await {
                            error!(error = %nack_err, "Failed to nack file job");
                        }
                    }
                    ErrorClass::Permanent => {
                        error!(
                            worker_id = %self.id,
                            path = %job.abs_path.display(),
                            error = %e,
                            "Permanent analysis failure; dead-lettering"
                        );
                        if let Err(dlq_err) =
                            self.ctx.file_queue.dead_letter(&job, &e.to_string()).await
                        {
                            error!(error = %dlq_err, "Failed to dead-letter file job");
                        }
                        metrics::record_job("file_queue", "dead-lettered");
                    }
                    ErrorClass::Duplicate => {
                        let _ = self.ctx.file_queue.ack(&job).await;
                    }
                }
            }
        }
    }

    async fn analyze(&self, job: &FileJob) -> Result<Analysis, PipelineError> {
        let bytes = match tokio::fs::read(&job.abs_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // The clone was evicted between walk and analysis; retrying
                // cannot bring the file back.
                return Ok(Analysis::Reject("rejected-unreadable"));
            }
            Err(e) => return Err(PipelineError::io(e)),
        };

        let Ok(content) = String::from_utf8(bytes) else {
            return Ok(Analysis::Reject("rejected-encoding"));
        };

        let Some(language) = detect_language(&job.rel_path) else {
            return Ok(Analysis::Reject("rejected-language"));
        };

        let digest = content_digest(content.as_bytes());
        if self.pending_digests.contains(&digest) {
            return Ok(Analysis::Duplicate);
        }
        if self
            .ctx
            .processed
            .contains_digest(&digest)
            .await
            .map_err(|e| PipelineError::network(format!("processed-set check: {e}")))?
        {
            return Ok(Analysis::Duplicate);
        }

        match evaluate_content(&content, language, &self.ctx.filter, &self.ctx.exclusions) {
            ContentVerdict::Reject(reason) => Ok(Analysis::Reject(reason)),
            ContentVerdict::Publish(breakdown) => Ok(Analysis::Publish(DraftEntry {
                digest,
                job_repo: job.repo_identity.clone(),
                rel_path: job.rel_path.to_string_lossy().into_owned(),
                language: language.to_string(),
                size: content.len() as u64,
                breakdown,
            })),
        }
    }

    /// Flushes the pending batch to the index.
    ///
    /// Observation ids are assigned here, at publication time; a failed
    /// attempt abandons its ids (gaps are allowed, reordering is not) and
    /// the retry takes fresh ones. After the final failed attempt the
    /// buffered jobs are nacked for redelivery.
    async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        for attempt in 1..=FLUSH_ATTEMPTS {
            let published_at = Utc::now();
            let entries: Vec<CorpusEntry> = self
                .pending
                .iter()
                .map(|p| CorpusEntry {
                    digest: p.entry.digest.clone(),
                    repo: p.entry.job_repo.clone(),
                    path: p.entry.rel_path.clone(),
                    language: p.entry.language.clone(),
                    lines: p.entry.breakdown.lines as u32,
                    size: p.entry.size,
                    quality: p.entry.breakdown.total,
                    has_doc: p.entry.breakdown.has_doc,
                    has_tests: p.entry.breakdown.has_tests,
                    observation_id: self.ctx.clock.next(),
                    published_at,
                })
                .collect();

            match self.ctx.index.insert_batch(&entries).await {
                Ok(inserted) => {
                    let digests: Vec<String> =
                        entries.iter().map(|e| e.digest.clone()).collect();
                    if let Err(e) = self.ctx.processed.mark_digests(&digests).await {
                        warn!(error = %e, "Failed to mark digests processed");
                    }

                    for p in &self.pending {
                        if let Err(e) = self.ctx.file_queue.ack(&p.job).await {
                            error!(error = %e, "Failed to ack published file job");
                        }
                        metrics::record_job("file_queue", "published");
                    }
                    if let Some(c) = metrics::FILES_PUBLISHED.get() {
                        c.inc_by(inserted as f64);
                    }

                    info!(
                        worker_id = %self.id,
                        batch = self.pending.len(),
                        inserted = inserted,
                        "Batch flushed to corpus index"
                    );

                    self.pending.clear();
                    self.pending_digests.clear();
                    self.oldest_pending = None;
                    return;
                }
                Err(e) => {
                    warn!(
                        worker_id = %self.id,
                        attempt = attempt,
                        batch = self.pending.len(),
                        error = %e,
                        "Index flush failed"
                    );
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        error!(
            worker_id = %self.id,
            batch = self.pending.len(),
            "Flush attempts exhausted; nacking batch for redelivery"
        );
        metrics::record_error(ErrorKind::NetworkTransient);

        for p in self.pending.drain(..) {
            if let Err(e) = self
                .ctx
                .file_queue
                .nack(p.job, "corpus index flush failed")
                .await
            {
                error!(error = %e, "Failed to nack buffered file job");
            }
        }
        self.pending_digests.clear();
        self.oldest_pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    fn filter() -> FileFilterConfig {
        let mut f = PipelineConfig::default().file_filter;
        f.min_lines = 5;
        f.max_lines = 2000;
        f
    }

    fn exclusions(filter: &FileFilterConfig) -> RegexSet {
        RegexSet::new(&filter.exclude_content_patterns).expect("valid patterns")
    }

    fn healthy_python_file() -> String {
        let mut out = String::new();
        for i in 0..15 {
            out.push_str(&format!("def handler_{i}(request):\n"));
            out.push_str("    \"\"\"Route one request.\"\"\"\n");
            out.push_str("    # validate before dispatch\n");
            out.push_str("    if request is None:\n");
            out.push_str("        return None\n");
            out.push_str("    return dispatch(request)\n");
        }
        out
    }

    #[test]
    fn digest_is_stable_and_128_bit() {
        let a = content_digest(b"def f():\n    pass\n");
        let b = content_digest(b"def f():\n    pass\n");
        let c = content_digest(b"def g():\n    pass\n");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32, "16 bytes hex-encoded");
    }

    #[test]
    fn healthy_file_publishes() {
        let f = filter();
        let verdict = evaluate_content(&healthy_python_file(), "python", &f, &exclusions(&f));
        assert!(matches!(verdict, ContentVerdict::Publish(_)));
    }

    #[test]
    fn low_score_rejects() {
        let f = filter();
        let content = "x = 1\ny = 2\nz = 3\na = 4\nb = 5\nc = 6\n";
        let verdict = evaluate_content(content, "python", &f, &exclusions(&f));
        assert!(matches!(verdict, ContentVerdict::Reject("rejected-score")));
    }

    #[test]
    fn generated_marker_rejects_regardless_of_score() {
        let f = filter();
        let mut content = healthy_python_file();
        content.insert_str(0, "# Code generated by protoc. DO NOT EDIT.\n");

        let verdict = evaluate_content(&content, "python", &f, &exclusions(&f));
        assert!(matches!(verdict, ContentVerdict::Reject("rejected-pattern")));
    }

    #[test]
    fn line_bounds_reject() {
        let f = filter();
        let verdict = evaluate_content("x = 1\n", "python", &f, &exclusions(&f));
        assert!(matches!(verdict, ContentVerdict::Reject("rejected-lines")));
    }

    #[test]
    fn score_exactly_at_threshold_is_published() {
        let content = healthy_python_file();
        let breakdown = score_file(&content, "python");

        let mut f = filter();
        f.quality_threshold = breakdown.total;

        let verdict = evaluate_content(&content, "python", &f, &exclusions(&f));
        assert!(
            matches!(verdict, ContentVerdict::Publish(_)),
            "threshold comparison must be inclusive"
        );
    }

    #[test]
    fn verdict_is_deterministic() {
        let f = filter();
        let content = healthy_python_file();
        let ex = exclusions(&f);

        for _ in 0..3 {
            match evaluate_content(&content, "python", &f, &ex) {
                ContentVerdict::Publish(b) => {
                    let again = score_file(&content, "python");
                    assert_eq!(b.total.to_bits(), again.total.to_bits());
                }
                ContentVerdict::Reject(r) => panic!("unexpected rejection: {r}"),
            }
        }
    }
}
