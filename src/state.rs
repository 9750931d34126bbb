//! Durable processed sets.
//!
//! Two Redis sets record what the pipeline has already handled: repository
//! identities and file content digests. Producers consult the set before
//! enqueuing; consumers add to it only after the work is durably published,
//! so a crash in between re-delivers rather than loses.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::discovery::RepoId;
use crate::queue::QueueError;

const REPOS_KEY: &str = "corpus:processed:repos";
const FILES_KEY: &str = "corpus:processed:files";

/// Durable sets of processed repository identities and file digests.
#[derive(Clone)]
pub struct ProcessedStore {
    redis: ConnectionManager,
}

impl ProcessedStore {
    /// Wraps an existing Redis connection.
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Whether a repository has already been acquired.
    pub async fn contains_repo(&self, id: &RepoId) -> Result<bool, QueueError> {
        let mut conn = self.redis.clone();
        Ok(conn.sismember(REPOS_KEY, id.to_string()).await?)
    }

    /// Marks a repository as acquired.
    pub async fn mark_repo(&self, id: &RepoId) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        conn.sadd::<_, _, ()>(REPOS_KEY, id.to_string()).await?;
        Ok(())
    }

    /// Whether a content digest has already been published.
    pub async fn contains_digest(&self, digest: &str) -> Result<bool, QueueError> {
        let mut conn = self.redis.clone();
        Ok(conn.sismember(FILES_KEY, digest).await?)
    }

    /// Marks a batch of digests as published. Called after a successful
    /// index flush, never before.
    pub async fn mark_digests(&self, digests: &[String]) -> Result<(), QueueError> {
        if digests.is_empty() {
            return Ok(());
        }
        let mut conn = self.redis.clone();
        conn.sadd::<_, _, ()>(FILES_KEY, digests).await?;
        Ok(())
    }

    /// Count of processed repositories.
    pub async fn repo_count(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        Ok(conn.scard(REPOS_KEY).await?)
    }

    /// Count of published digests.
    pub async fn digest_count(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        Ok(conn.scard(FILES_KEY).await?)
    }
}
