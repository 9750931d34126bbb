//! Job payloads and retry arithmetic.
//!
//! Wire forms are stable: repo jobs, file jobs, and dead-letter entries are
//! serialized as JSON and must stay readable across deployments, so fields
//! are added conservatively and never renamed.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::discovery::RepoId;

/// Priority band of a repo job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    /// Bands in drain order.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    /// Stable name, used in queue keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }

    /// Index of this band in drain order.
    pub fn band_index(&self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common surface every queued payload implements.
pub trait QueueJob: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Unique key identifying the job within its queue, used to locate it
    /// in the processing list.
    fn key(&self) -> String;

    /// Current retry count.
    fn retry_count(&self) -> u32;

    /// Records a failed attempt.
    fn bump_retry(&mut self, error: &str);
}

/// A repository acquisition job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoJob {
    /// `owner/name` identity of the repository.
    pub identity: RepoId,
    /// Priority band; retries stay in the same band.
    pub priority: Priority,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Error history, newest last.
    pub errors: Vec<String>,
}

impl RepoJob {
    /// Creates a fresh job for the given repository.
    pub fn new(identity: RepoId, priority: Priority) -> Self {
        Self {
            identity,
            priority,
            retry_count: 0,
            errors: Vec::new(),
        }
    }
}

impl QueueJob for RepoJob {
    fn key(&self) -> String {
        self.identity.to_string()
    }

    fn retry_count(&self) -> u32 {
        self.retry_count
    }

    fn bump_retry(&mut self, error: &str) {
        self.retry_count += 1;
        self.errors.push(error.to_string());
    }
}

/// A single-file analysis job, emitted by the acquirer after a clone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileJob {
    /// Repository the file came from.
    pub repo_identity: RepoId,
    /// Absolute path on the local store.
    pub abs_path: PathBuf,
    /// Path relative to the repository root.
    pub rel_path: PathBuf,
    /// Failed attempts so far.
    pub retry_count: u32,
}

impl FileJob {
    /// Creates a fresh file job.
    pub fn new(repo_identity: RepoId, abs_path: PathBuf, rel_path: PathBuf) -> Self {
        Self {
            repo_identity,
            abs_path,
            rel_path,
            retry_count: 0,
        }
    }
}

impl QueueJob for FileJob {
    fn key(&self) -> String {
        self.abs_path.to_string_lossy().into_owned()
    }

    fn retry_count(&self) -> u32 {
        self.retry_count
    }

    fn bump_retry(&mut self, _error: &str) {
        self.retry_count += 1;
    }
}

/// Terminal record of a job that exhausted its retries or failed permanently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// The job as it was when it died.
    pub original_job: serde_json::Value,
    /// Which queue it came from.
    pub queue: String,
    /// The error that killed it.
    pub terminal_error: String,
    /// When it was dead-lettered.
    pub dead_lettered_at: DateTime<Utc>,
}

/// Exponential backoff for the given retry count.
///
/// `base * 2^(retry - 1)`, capped. The first retry waits `base`.
pub fn retry_backoff(retry_count: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = retry_count.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo_id(s: &str) -> RepoId {
        RepoId::parse(s).expect("valid identity")
    }

    #[test]
    fn repo_job_wire_form() {
        let job = RepoJob::new(repo_id("alice/good-lib"), Priority::High);
        let json = serde_json::to_value(&job).expect("serialize");

        assert_eq!(json["identity"], "alice/good-lib");
        assert_eq!(json["priority"], "high");
        assert_eq!(json["retry_count"], 0);
        assert!(json["errors"].as_array().expect("errors array").is_empty());
    }

    #[test]
    fn repo_job_roundtrip_keeps_errors() {
        let mut job = RepoJob::new(repo_id("alice/good-lib"), Priority::Normal);
        job.bump_retry("network-transient: connection reset");
        job.bump_retry("clone-timeout: 300s deadline");

        let json = serde_json::to_string(&job).expect("serialize");
        let back: RepoJob = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(back.retry_count, 2);
        assert_eq!(back.errors.len(), 2);
        assert_eq!(back.priority, Priority::Normal);
        assert_eq!(back.key(), "alice/good-lib");
    }

    #[test]
    fn file_job_wire_form() {
        let job = FileJob::new(
            repo_id("alice/good-lib"),
            PathBuf::from("/data/clones/alice/good-lib/pkg/conn.go"),
            PathBuf::from("pkg/conn.go"),
        );
        let json = serde_json::to_value(&job).expect("serialize");

        assert_eq!(json["repo_identity"], "alice/good-lib");
        assert_eq!(json["abs_path"], "/data/clones/alice/good-lib/pkg/conn.go");
        assert_eq!(json["rel_path"], "pkg/conn.go");
        assert_eq!(json["retry_count"], 0);
    }

    #[test]
    fn priority_drain_order() {
        assert_eq!(Priority::High.band_index(), 0);
        assert_eq!(Priority::Normal.band_index(), 1);
        assert_eq!(Priority::Low.band_index(), 2);
        assert_eq!(
            Priority::ALL.map(|p| p.band_index()),
            [0, 1, 2],
            "ALL lists bands in drain order"
        );
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(2);
        let cap = Duration::from_secs(120);

        assert_eq!(retry_backoff(1, base, cap), Duration::from_secs(2));
        assert_eq!(retry_backoff(2, base, cap), Duration::from_secs(4));
        assert_eq!(retry_backoff(3, base, cap), Duration::from_secs(8));
        assert_eq!(retry_backoff(7, base, cap), Duration::from_secs(120));
        assert_eq!(retry_backoff(30, base, cap), Duration::from_secs(120));
    }

    #[test]
    fn backoff_zero_retries_waits_base() {
        let base = Duration::from_secs(2);
        assert_eq!(retry_backoff(0, base, Duration::from_secs(60)), base);
    }

    #[test]
    fn dead_letter_entry_shape() {
        let job = RepoJob::new(repo_id("gone/deleted"), Priority::Normal);
        let entry = DeadLetterEntry {
            original_job: serde_json::to_value(&job).expect("serialize"),
            queue: "repo_queue:normal".to_string(),
            terminal_error: "remote-not-found: HTTP 404".to_string(),
            dead_lettered_at: Utc::now(),
        };

        let json = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(json["original_job"]["identity"], "gone/deleted");
        assert_eq!(json["queue"], "repo_queue:normal");
        assert!(json["terminal_error"]
            .as_str()
            .expect("string")
            .contains("remote-not-found"));
        assert!(json.get("dead_lettered_at").is_some());
    }
}
