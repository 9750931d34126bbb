//! Clone strategies.
//!
//! Three ways to materialize a repository locally, tried sequentially in
//! configured order under a per-attempt deadline:
//!
//! 1. `Library`: in-process shallow clone (depth 1, single branch)
//! 2. `Cli`: `git clone --depth 1` subprocess, often faster on large histories
//! 3. `Archive`: tarball download, fastest for small repositories
//!
//! Racing the strategies in parallel would burn one credential per strategy
//! per repository; sequential fallback pays for failures only. Permanent
//! failures (repository gone, credential revoked) abort the fallback chain
//! immediately.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use tar::Archive;

use crate::discovery::RepoId;
use crate::error::{ErrorClass, ErrorKind, PipelineError};

/// One of the three ways to materialize a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneStrategy {
    /// In-process shallow clone via libgit2.
    Library,
    /// `git` subprocess shallow clone.
    Cli,
    /// Tarball download and unpack.
    Archive,
}

impl CloneStrategy {
    /// Stable label for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CloneStrategy::Library => "library",
            CloneStrategy::Cli => "cli",
            CloneStrategy::Archive => "archive",
        }
    }
}

/// Rate-limit state observed in a forge response.
#[derive(Debug, Clone, Copy)]
pub struct RateObservation {
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// A successful clone.
#[derive(Debug, Clone)]
pub struct CloneOutcome {
    /// Which strategy produced the clone.
    pub strategy: CloneStrategy,
    /// Quota headers, when the strategy saw any (archive downloads only;
    /// git transports do not return them).
    pub rate: Option<RateObservation>,
}

/// Sequential-fallback cloner.
pub struct Cloner {
    http: reqwest::Client,
    strategies: Vec<CloneStrategy>,
}

impl Cloner {
    /// Creates a cloner trying strategies in the given order.
    pub fn new(strategies: Vec<CloneStrategy>, request_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent("corpus-forge/0.1")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http, strategies }
    }

    /// The default strategy order: library, then CLI, then archive.
    pub fn with_defaults(request_timeout: Duration) -> Self {
        Self::new(
            vec![
                CloneStrategy::Library,
                CloneStrategy::Cli,
                CloneStrategy::Archive,
            ],
            request_timeout,
        )
    }

    /// Clones `id` into `dest`, which must not exist yet.
    ///
    /// Each strategy runs under `deadline`. Transient failures fall through
    /// to the next strategy; permanent ones abort. Partial state under
    /// `dest` is removed before every attempt and after every failure.
    pub async fn clone_repo(
        &self,
        id: &RepoId,
        token: &str,
        dest: &Path,
        deadline: Duration,
    ) -> Result<CloneOutcome, PipelineError> {
        let mut last_error = PipelineError::network("no clone strategy configured");

        for strategy in &self.strategies {
            remove_dir_if_present(dest)?;
            let started = std::time::Instant::now();

            let attempt = match strategy {
                CloneStrategy::Library => clone_library(id, token, dest, deadline).await,
                CloneStrategy::Cli => clone_cli(id, token, dest, deadline).await,
                CloneStrategy::Archive => {
                    clone_archive(&self.http, id, token, dest, deadline).await
                }
            };

            match attempt {
                Ok(rate) => {
                    if let Some(h) = crate::metrics::CLONE_DURATION.get() {
                        h.with_label_values(&[strategy.as_str()])
                            .observe(started.elapsed().as_secs_f64());
                    }
                    tracing::debug!(
                        repo = %id,
                        strategy = strategy.as_str(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Clone succeeded"
                    );
                    return Ok(CloneOutcome {
                        strategy: *strategy,
                        rate,
                    });
                }
                Err(e) => {
                    tracing::debug!(
                        repo = %id,
                        strategy = strategy.as_str(),
                        error = %e,
                        "Clone strategy failed"
                    );
                    remove_dir_if_present(dest)?;
                    if e.class() == ErrorClass::Permanent {
                        return Err(e);
                    }
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

fn remove_dir_if_present(path: &Path) -> Result<(), PipelineError> {
    if path.exists() {
        std::fs::remove_dir_all(path)?;
    }
    Ok(())
}

// =============================================================================
// Library strategy (libgit2)
// =============================================================================

async fn clone_library(
    id: &RepoId,
    token: &str,
    dest: &Path,
    deadline: Duration,
) -> Result<Option<RateObservation>, PipelineError> {
    let url = id.authenticated_clone_url(token);
    let dest = dest.to_path_buf();
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_inner = Arc::clone(&cancel);

    let mut handle =
        tokio::task::spawn_blocking(move || git2_shallow_clone(&url, &dest, cancel_inner));

    match tokio::time::timeout(deadline, &mut handle).await {
        Ok(joined) => {
            let result = joined
                .map_err(|e| PipelineError::network(format!("clone task panicked: {e}")))?;
            result.map_err(classify_git2_error)?;
            Ok(None)
        }
        Err(_) => {
            // Ask the fetch callback to abort, then wait for the blocking
            // task to actually release the destination directory.
            cancel.store(true, Ordering::Relaxed);
            let _ = handle.await;
            Err(PipelineError::new(
                ErrorKind::CloneTimeout,
                format!("library clone exceeded {}s", deadline.as_secs()),
            ))
        }
    }
}

fn git2_shallow_clone(url: &str, dest: &Path, cancel: Arc<AtomicBool>) -> Result<(), git2::Error> {
    let mut callbacks = git2::RemoteCallbacks::new();
    // Returning false from the progress callback aborts the transfer at the
    // next tick; this is how the deadline reaches into libgit2.
    callbacks.transfer_progress(move |_| !cancel.load(Ordering::Relaxed));

    let mut fetch = git2::FetchOptions::new();
    fetch.remote_callbacks(callbacks);
    fetch.depth(1);

    git2::build::RepoBuilder::new()
        .fetch_options(fetch)
        .clone(url, dest)?;
    Ok(())
}

fn classify_git2_error(err: git2::Error) -> PipelineError {
    let message = err.message().to_string();
    let kind = match err.code() {
        git2::ErrorCode::Auth => ErrorKind::RemoteAuth,
        git2::ErrorCode::NotFound => ErrorKind::RemoteNotFound,
        _ if message.contains("404") || message.to_lowercase().contains("not found") => {
            ErrorKind::RemoteNotFound
        }
        _ if message.contains("401") || message.contains("403") => ErrorKind::RemoteAuth,
        _ => ErrorKind::NetworkTransient,
    };
    PipelineError::new(kind, format!("library clone: {message}"))
}

// =============================================================================
// CLI strategy (git subprocess)
// =============================================================================

async fn clone_cli(
    id: &RepoId,
    token: &str,
    dest: &Path,
    deadline: Duration,
) -> Result<Option<RateObservation>, PipelineError> {
    let url = id.authenticated_clone_url(token);

    let child = tokio::process::Command::new("git")
        .arg("clone")
        .arg("--depth")
        .arg("1")
        .arg("--single-branch")
        .arg("--quiet")
        .arg(&url)
        .arg(dest)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PipelineError::new(ErrorKind::LocalIo, format!("spawning git: {e}")))?;

    let output = match tokio::time::timeout(deadline, child.wait_with_output()).await {
        Ok(result) => {
            result.map_err(|e| PipelineError::new(ErrorKind::LocalIo, format!("git wait: {e}")))?
        }
        Err(_) => {
            // kill_on_drop reaps the subprocess.
            return Err(PipelineError::new(
                ErrorKind::CloneTimeout,
                format!("cli clone exceeded {}s", deadline.as_secs()),
            ));
        }
    };

    if output.status.success() {
        return Ok(None);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(classify_git_stderr(&stderr))
}

fn classify_git_stderr(stderr: &str) -> PipelineError {
    let lowered = stderr.to_lowercase();
    let kind = if lowered.contains("not found") || lowered.contains("404") {
        ErrorKind::RemoteNotFound
    } else if lowered.contains("authentication failed")
        || lowered.contains("could not read username")
        || lowered.contains("403")
        || lowered.contains("401")
    {
        ErrorKind::RemoteAuth
    } else {
        ErrorKind::NetworkTransient
    };

    let first_line = stderr.lines().next().unwrap_or("git clone failed");
    PipelineError::new(kind, format!("cli clone: {first_line}"))
}

// =============================================================================
// Archive strategy (tarball download)
// =============================================================================

async fn clone_archive(
    http: &reqwest::Client,
    id: &RepoId,
    token: &str,
    dest: &Path,
    deadline: Duration,
) -> Result<Option<RateObservation>, PipelineError> {
    let fetch = async {
        let response = http
            .get(id.tarball_url())
            .header("Authorization", format!("Bearer {token}"))
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| PipelineError::network(format!("tarball request: {e}")))?;

        let rate = rate_from_headers(response.headers());
        let status = response.status();

        if !status.is_success() {
            let kind = match status.as_u16() {
                404 => ErrorKind::RemoteNotFound,
                401 => ErrorKind::RemoteAuth,
                403 | 429 => {
                    if rate.map(|r| r.remaining == 0).unwrap_or(false) {
                        ErrorKind::RateLimited
                    } else {
                        ErrorKind::RemoteAuth
                    }
                }
                _ => ErrorKind::NetworkTransient,
            };
            return Err(PipelineError::new(
                kind,
                format!("tarball download: HTTP {status}"),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PipelineError::network(format!("tarball body: {e}")))?;
        Ok((bytes, rate))
    };

    let (bytes, rate) = match tokio::time::timeout(deadline, fetch).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(PipelineError::new(
                ErrorKind::CloneTimeout,
                format!("archive download exceeded {}s", deadline.as_secs()),
            ))
        }
    };

    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || unpack_tarball(&bytes, &dest))
        .await
        .map_err(|e| PipelineError::network(format!("unpack task panicked: {e}")))??;

    Ok(rate)
}

/// Unpacks a forge tarball into `dest`.
///
/// The tarball wraps everything in a single `{name}-{sha}/` directory; its
/// contents move to `dest` directly, and a `.git` marker directory is
/// created so the skip-check and clone validation treat the result like any
/// other clone.
fn unpack_tarball(bytes: &[u8], dest: &Path) -> Result<(), PipelineError> {
    let staging = dest.with_extension("unpack");
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    std::fs::create_dir_all(&staging)?;

    let mut archive = Archive::new(GzDecoder::new(bytes));
    archive
        .unpack(&staging)
        .map_err(|e| PipelineError::new(ErrorKind::NetworkTransient, format!("tar unpack: {e}")))?;

    let root = single_subdirectory(&staging)?;
    std::fs::rename(&root, dest)?;
    std::fs::remove_dir_all(&staging)?;
    std::fs::create_dir_all(dest.join(".git"))?;
    Ok(())
}

fn single_subdirectory(dir: &Path) -> Result<PathBuf, PipelineError> {
    let mut subdirs = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.path())
        .collect::<Vec<_>>();

    match subdirs.len() {
        1 => Ok(subdirs.remove(0)),
        n => Err(PipelineError::new(
            ErrorKind::NetworkTransient,
            format!("tarball had {n} top-level directories, expected 1"),
        )),
    }
}

fn rate_from_headers(headers: &reqwest::header::HeaderMap) -> Option<RateObservation> {
    let remaining = headers
        .get("x-ratelimit-remaining")?
        .to_str()
        .ok()?
        .parse()
        .ok()?;
    let reset_at = headers
        .get("x-ratelimit-reset")?
        .to_str()
        .ok()?
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))?;
    Some(RateObservation {
        remaining,
        reset_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    #[test]
    fn git_stderr_classification() {
        assert_eq!(
            classify_git_stderr("fatal: repository 'https://x/y.git' not found\n").kind,
            ErrorKind::RemoteNotFound
        );
        assert_eq!(
            classify_git_stderr("fatal: Authentication failed for 'https://x/y.git'\n").kind,
            ErrorKind::RemoteAuth
        );
        assert_eq!(
            classify_git_stderr("fatal: unable to access: Could not resolve host\n").kind,
            ErrorKind::NetworkTransient
        );
    }

    #[test]
    fn stderr_message_keeps_first_line_only() {
        let err = classify_git_stderr("fatal: early EOF\nfatal: index-pack failed\n");
        assert!(err.message.contains("early EOF"));
        assert!(!err.message.contains("index-pack"));
    }

    fn sample_tarball() -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let content = b"package main\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "good-lib-abc123/main.go", &content[..])
            .expect("append");

        builder
            .into_inner()
            .expect("finish tar")
            .finish()
            .expect("finish gz")
    }

    #[test]
    fn tarball_unpacks_to_dest_with_git_marker() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dest = tmp.path().join("good-lib");

        unpack_tarball(&sample_tarball(), &dest).expect("unpack");

        assert!(dest.join("main.go").is_file());
        assert!(dest.join(".git").is_dir(), "marker for skip-check");
        assert!(!dest.with_extension("unpack").exists(), "staging cleaned");
    }

    #[test]
    fn truncated_tarball_is_transient() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dest = tmp.path().join("broken");

        let err = unpack_tarball(&[0x1f, 0x8b, 0x00], &dest).expect_err("must fail");
        assert_eq!(err.kind.class(), ErrorClass::Transient);
    }

    #[test]
    fn strategy_labels() {
        assert_eq!(CloneStrategy::Library.as_str(), "library");
        assert_eq!(CloneStrategy::Cli.as_str(), "cli");
        assert_eq!(CloneStrategy::Archive.as_str(), "archive");
    }
}
