//! Postgres-backed corpus index.
//!
//! A document table keyed by content digest, with secondary indices on
//! language, quality, observation id, and repository. Writes are idempotent
//! under the digest primary key: a re-published digest is silently dropped,
//! which makes batch retries and redelivered jobs safe.
//!
//! The same database also holds the recorded-candidates table the seed
//! discovery provider replays.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;

use crate::config::IndexConfig;
use crate::discovery::{RepoCandidate, RepoId};

/// Errors that can occur during index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Connection to the database failed.
    #[error("Index connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Index query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// A stored value could not be decoded.
    #[error("Index decode failed: {0}")]
    Decode(String),
}

/// A published file record; the unit the trainer consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusEntry {
    /// Content digest; primary key across the entire corpus.
    pub digest: String,
    /// Source repository identity.
    pub repo: RepoId,
    /// Path relative to the repository root.
    pub path: String,
    /// Detected language.
    pub language: String,
    /// Line count.
    pub lines: u32,
    /// Byte size.
    pub size: u64,
    /// Quality score in [0, 1].
    pub quality: f64,
    /// Whether doc markers were found.
    pub has_doc: bool,
    /// Whether test markers were found.
    pub has_tests: bool,
    /// Strictly monotonic publication order.
    pub observation_id: u64,
    /// When the entry was published.
    pub published_at: DateTime<Utc>,
}

/// Durable, searchable store of accepted files.
#[derive(Clone)]
pub struct CorpusIndex {
    pool: PgPool,
    table: String,
}

impl CorpusIndex {
    /// Connects to the index database and bootstraps the schema.
    ///
    /// Schema creation is idempotent; concurrent processes may race it
    /// safely. The table name comes from configuration and is validated to
    /// be a plain identifier before it reaches any SQL here.
    pub async fn connect(config: &IndexConfig) -> Result<Self, IndexError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(&config.connection_url)
            .await
            .map_err(|e| IndexError::ConnectionFailed(e.to_string()))?;

        let index = Self {
            pool,
            table: config.table.clone(),
        };
        index.ensure_schema().await?;
        Ok(index)
    }

    /// Creates a client over an existing pool, without schema bootstrap.
    pub fn from_pool(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    async fn ensure_schema(&self) -> Result<(), IndexError> {
        let t = &self.table;
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS {t} (
                    digest          TEXT PRIMARY KEY,
                    repo            TEXT NOT NULL,
                    path            TEXT NOT NULL,
                    language        TEXT NOT NULL,
                    lines           BIGINT NOT NULL,
                    size            BIGINT NOT NULL,
                    quality         DOUBLE PRECISION NOT NULL,
                    has_doc         BOOLEAN NOT NULL,
                    has_tests       BOOLEAN NOT NULL,
                    observation_id  BIGINT NOT NULL UNIQUE,
                    published_at    TIMESTAMPTZ NOT NULL
                )"
            ),
            format!("CREATE INDEX IF NOT EXISTS idx_{t}_language ON {t}(language)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{t}_quality ON {t}(quality)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{t}_repo ON {t}(repo)"),
            "CREATE TABLE IF NOT EXISTS repo_candidates (
                identity      TEXT PRIMARY KEY,
                language      TEXT,
                stars         BIGINT NOT NULL,
                forks         BIGINT NOT NULL,
                description   TEXT,
                topics        TEXT NOT NULL DEFAULT '[]',
                pushed_at     TIMESTAMPTZ,
                size_kb       BIGINT NOT NULL,
                first_seen_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at    TIMESTAMPTZ NOT NULL DEFAULT now()
            )"
            .to_string(),
        ];

        for statement in &statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    // =========================================================================
    // Corpus entries
    // =========================================================================

    /// Writes a batch of entries in one transaction.
    ///
    /// Atomic from the consumer's perspective: either every entry of the
    /// batch becomes visible or none does. Digest conflicts are silently
    /// dropped. Returns the number of rows actually inserted.
    pub async fn insert_batch(&self, entries: &[CorpusEntry]) -> Result<u64, IndexError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let statement = format!(
            "INSERT INTO {t} (
                digest, repo, path, language, lines, size, quality,
                has_doc, has_tests, observation_id, published_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (digest) DO NOTHING",
            t = self.table
        );

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for entry in entries {
            let result = sqlx::query(&statement)
                .bind(&entry.digest)
                .bind(entry.repo.to_string())
                .bind(&entry.path)
                .bind(&entry.language)
                .bind(entry.lines as i64)
                .bind(entry.size as i64)
                .bind(entry.quality)
                .bind(entry.has_doc)
                .bind(entry.has_tests)
                .bind(entry.observation_id as i64)
                .bind(entry.published_at)
                .execute(&mut *tx)
                .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Streams entries published after `since_observation_id`, in
    /// publication order, optionally restricted to a language set.
    ///
    /// `since_observation_id` is exclusive: pass the last id you saw and you
    /// get everything newer. This is the trainer's resume cursor.
    pub async fn scroll(
        &self,
        since_observation_id: u64,
        min_quality: f64,
        languages: Option<&[String]>,
        limit: i64,
    ) -> Result<Vec<CorpusEntry>, IndexError> {
        let base = format!(
            "SELECT digest, repo, path, language, lines, size, quality,
                    has_doc, has_tests, observation_id, published_at
             FROM {t}
             WHERE observation_id > $1 AND quality >= $2",
            t = self.table
        );

        let rows = match languages {
            Some(langs) if !langs.is_empty() => {
                let statement =
                    format!("{base} AND language = ANY($3) ORDER BY observation_id LIMIT $4");
                sqlx::query(&statement)
                    .bind(since_observation_id as i64)
                    .bind(min_quality)
                    .bind(langs)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            _ => {
                let statement = format!("{base} ORDER BY observation_id LIMIT $3");
                sqlx::query(&statement)
                    .bind(since_observation_id as i64)
                    .bind(min_quality)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(row_to_entry).collect()
    }

    /// Counts entries published after `since_observation_id` with at least
    /// the given quality.
    pub async fn count(
        &self,
        since_observation_id: u64,
        min_quality: f64,
    ) -> Result<u64, IndexError> {
        let statement = format!(
            "SELECT COUNT(*) AS n FROM {t} WHERE observation_id > $1 AND quality >= $2",
            t = self.table
        );
        let row = sqlx::query(&statement)
            .bind(since_observation_id as i64)
            .bind(min_quality)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }

    /// The highest observation id ever persisted, or 0 for an empty corpus.
    /// Seeds the observation clock on startup.
    pub async fn max_observation_id(&self) -> Result<u64, IndexError> {
        let statement = format!(
            "SELECT COALESCE(MAX(observation_id), 0) AS high FROM {t}",
            t = self.table
        );
        let row = sqlx::query(&statement).fetch_one(&self.pool).await?;
        let high: i64 = row.get("high");
        Ok(high as u64)
    }

    // =========================================================================
    // Recorded candidates (seed replay)
    // =========================================================================

    /// Upserts an observed candidate. Identity never changes; re-observation
    /// replaces the reported attributes.
    pub async fn record_candidate(&self, candidate: &RepoCandidate) -> Result<(), IndexError> {
        let topics = serde_json::to_string(&candidate.topics)
            .map_err(|e| IndexError::Decode(e.to_string()))?;

        sqlx::query(
            "INSERT INTO repo_candidates (
                identity, language, stars, forks, description, topics, pushed_at, size_kb
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (identity) DO UPDATE SET
                language = EXCLUDED.language,
                stars = EXCLUDED.stars,
                forks = EXCLUDED.forks,
                description = EXCLUDED.description,
                topics = EXCLUDED.topics,
                pushed_at = EXCLUDED.pushed_at,
                size_kb = EXCLUDED.size_kb,
                updated_at = now()",
        )
        .bind(candidate.id.to_string())
        .bind(&candidate.language)
        .bind(candidate.stars as i64)
        .bind(candidate.forks as i64)
        .bind(&candidate.description)
        .bind(topics)
        .bind(candidate.pushed_at)
        .bind(candidate.size_kb as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Pages recorded candidates in first-seen order.
    pub async fn candidates_page(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<RepoCandidate>, IndexError> {
        let rows = sqlx::query(
            "SELECT identity, language, stars, forks, description, topics, pushed_at, size_kb
             FROM repo_candidates
             ORDER BY first_seen_at, identity
             OFFSET $1 LIMIT $2",
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let identity: String = row.get("identity");
            let id = RepoId::parse(&identity)
                .map_err(|e| IndexError::Decode(format!("stored identity: {e}")))?;
            let topics_raw: String = row.get("topics");
            let topics = serde_json::from_str(&topics_raw)
                .map_err(|e| IndexError::Decode(format!("stored topics: {e}")))?;

            candidates.push(RepoCandidate {
                id,
                language: row.get("language"),
                stars: row.get::<i64, _>("stars") as u32,
                forks: row.get::<i64, _>("forks") as u32,
                description: row.get("description"),
                topics,
                pushed_at: row.get("pushed_at"),
                size_kb: row.get::<i64, _>("size_kb") as u64,
            });
        }
        Ok(candidates)
    }
}

fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<CorpusEntry, IndexError> {
    let repo_raw: String = row.get("repo");
    let repo =
        RepoId::parse(&repo_raw).map_err(|e| IndexError::Decode(format!("stored repo: {e}")))?;

    Ok(CorpusEntry {
        digest: row.get("digest"),
        repo,
        path: row.get("path"),
        language: row.get("language"),
        lines: row.get::<i64, _>("lines") as u32,
        size: row.get::<i64, _>("size") as u64,
        quality: row.get("quality"),
        has_doc: row.get("has_doc"),
        has_tests: row.get("has_tests"),
        observation_id: row.get::<i64, _>("observation_id") as u64,
        published_at: row.get("published_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corpus_entry_wire_form() {
        let entry = CorpusEntry {
            digest: "0f1e2d3c4b5a69788796a5b4c3d2e1f0".to_string(),
            repo: RepoId::parse("alice/good-lib").expect("valid"),
            path: "pkg/conn.go".to_string(),
            language: "go".to_string(),
            lines: 120,
            size: 3400,
            quality: 0.82,
            has_doc: true,
            has_tests: false,
            observation_id: 17,
            published_at: Utc::now(),
        };

        let json = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(json["digest"], "0f1e2d3c4b5a69788796a5b4c3d2e1f0");
        assert_eq!(json["repo"], "alice/good-lib");
        assert_eq!(json["path"], "pkg/conn.go");
        assert_eq!(json["language"], "go");
        assert_eq!(json["lines"], 120);
        assert_eq!(json["size"], 3400);
        assert_eq!(json["observation_id"], 17);
        assert_eq!(json["has_doc"], true);
        assert_eq!(json["has_tests"], false);
        assert!(json.get("published_at").is_some());
    }

    #[test]
    fn corpus_entry_roundtrip() {
        let entry = CorpusEntry {
            digest: "aa".repeat(16),
            repo: RepoId::parse("bob/parser").expect("valid"),
            path: "src/lex.rs".to_string(),
            language: "rust".to_string(),
            lines: 300,
            size: 9000,
            quality: 0.7,
            has_doc: false,
            has_tests: true,
            observation_id: 1,
            published_at: Utc::now(),
        };

        let json = serde_json::to_string(&entry).expect("serialize");
        let back: CorpusEntry = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.digest, entry.digest);
        assert_eq!(back.repo, entry.repo);
        assert_eq!(back.observation_id, 1);
    }
}
