//! Error taxonomy shared across the ingest pipeline.
//!
//! Every worker classifies failures at the job boundary into one of three
//! classes:
//!
//! - `Transient`: the job is nacked and retried with backoff
//! - `Permanent`: the job moves straight to the dead-letter sink
//! - `Duplicate`: not an error; the job is acked silently
//!
//! The finer-grained [`ErrorKind`] drives metrics labels and log fields so
//! operators can see *why* jobs fail, not just that they did.

use thiserror::Error;

/// How a failure is handled at the worker's job boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry with backoff via nack.
    Transient,
    /// Dead-letter immediately, no retries.
    Permanent,
    /// Silently ack; the work was already done elsewhere.
    Duplicate,
}

/// Fine-grained failure kinds, used as metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration. Fatal at startup, never seen by workers.
    ConfigInvalid,
    /// Every credential is below the safety threshold.
    CredentialExhausted,
    /// The forge returned a rate-limit response.
    RateLimited,
    /// Connection reset, DNS failure, truncated response.
    NetworkTransient,
    /// Repository (or resource) no longer exists on the forge.
    RemoteNotFound,
    /// The forge rejected the presented credential.
    RemoteAuth,
    /// Local filesystem failure (disk full, permission, rename).
    LocalIo,
    /// A clone attempt exceeded its deadline.
    CloneTimeout,
    /// The job payload itself is malformed (bad identity, bad path).
    ValidationFailed,
    /// Content already processed; not an error.
    Duplicate,
}

impl ErrorKind {
    /// Stable label for metrics and structured logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConfigInvalid => "config-invalid",
            ErrorKind::CredentialExhausted => "credential-exhausted",
            ErrorKind::RateLimited => "rate-limited",
            ErrorKind::NetworkTransient => "network-transient",
            ErrorKind::RemoteNotFound => "remote-not-found",
            ErrorKind::RemoteAuth => "remote-auth",
            ErrorKind::LocalIo => "local-io",
            ErrorKind::CloneTimeout => "clone-timeout",
            ErrorKind::ValidationFailed => "validation-failed",
            ErrorKind::Duplicate => "duplicate",
        }
    }

    /// Maps the kind onto its job-boundary handling class.
    ///
    /// Authentication failures are transient for the *job* (the pool rotates
    /// to another credential on the next attempt) even though they are
    /// terminal for the credential that produced them.
    pub fn class(&self) -> ErrorClass {
        match self {
            ErrorKind::CredentialExhausted
            | ErrorKind::RateLimited
            | ErrorKind::NetworkTransient
            | ErrorKind::RemoteAuth
            | ErrorKind::LocalIo
            | ErrorKind::CloneTimeout => ErrorClass::Transient,
            ErrorKind::ConfigInvalid
            | ErrorKind::RemoteNotFound
            | ErrorKind::ValidationFailed => ErrorClass::Permanent,
            ErrorKind::Duplicate => ErrorClass::Duplicate,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified pipeline failure carried across the worker boundary.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct PipelineError {
    /// Classified failure kind.
    pub kind: ErrorKind,
    /// Human-readable context, logged and recorded in job error history.
    pub message: String,
}

impl PipelineError {
    /// Creates a classified error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a transient network failure.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkTransient, message)
    }

    /// Shorthand for a local I/O failure.
    pub fn io(err: std::io::Error) -> Self {
        Self::new(ErrorKind::LocalIo, err.to_string())
    }

    /// Returns the job-boundary handling class.
    pub fn class(&self) -> ErrorClass {
        self.kind.class()
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::io(err)
    }
}
