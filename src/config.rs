//! Pipeline configuration.
//!
//! All recognized options are grouped by concern (forge, storage, workers,
//! repo filter, file filter, queues, batching, index). Every option has a
//! default; environment variables with the `CORPUS_` prefix override
//! defaults; invalid configurations are rejected at startup before any
//! worker is spawned.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an unparseable value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Forge (GitHub) access settings.
#[derive(Debug, Clone)]
pub struct ForgeConfig {
    /// API credentials, in rotation order. Opaque tokens.
    pub tokens: Vec<String>,
    /// Global ceiling on outbound forge requests per second.
    pub max_requests_per_second: f64,
    /// Per-request timeout for forge API calls.
    pub request_timeout: Duration,
    /// Remaining-quota floor below which a credential is parked.
    pub credential_safety_threshold: u32,
    /// Quota a credential returns to when its reset window passes.
    pub credential_ceiling: u32,
}

/// Local storage settings.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for shallow clones (`<clone_root>/<owner>/<name>`).
    pub clone_root: PathBuf,
    /// Advisory size cap on the clone root in gigabytes. Monitored by
    /// operators, not enforced by the pipeline.
    pub clone_root_max_gb: u64,
}

/// Worker pool sizing and per-job limits.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of repo acquirer workers.
    pub repo_workers: usize,
    /// Number of file analyzer workers.
    pub file_workers: usize,
    /// Deadline for processing a single job, clone attempts included.
    pub job_timeout: Duration,
    /// Maximum clones in flight across all acquirer workers.
    pub max_concurrent_clones: usize,
}

/// Repository-level quality filter settings.
#[derive(Debug, Clone)]
pub struct RepoFilterConfig {
    /// Minimum star count.
    pub min_stars: u32,
    /// Minimum fork count.
    pub min_forks: u32,
    /// Languages worth ingesting (lowercase).
    pub target_languages: Vec<String>,
    /// Tokens that reject a candidate outright when found in its
    /// name, description, or topics.
    pub exclude_tokens: Vec<String>,
    /// Tokens that add score when found in name, description, or topics.
    pub include_tokens: Vec<String>,
}

/// File-level filter settings applied by the analyzer.
#[derive(Debug, Clone)]
pub struct FileFilterConfig {
    /// Smallest file worth analyzing, in bytes.
    pub min_size_bytes: u64,
    /// Largest file worth analyzing, in bytes.
    pub max_size_bytes: u64,
    /// Reject files with fewer lines than this.
    pub min_lines: usize,
    /// Reject files with more lines than this.
    pub max_lines: usize,
    /// Minimum quality score for publication, in [0, 1]. A file scoring
    /// exactly the threshold is published.
    pub quality_threshold: f64,
    /// Content patterns (regex) that reject a file regardless of score,
    /// e.g. generated-file markers.
    pub exclude_content_patterns: Vec<String>,
}

/// Queue behavior settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis connection URL backing the queues and processed sets.
    pub redis_url: String,
    /// Retries before a job is dead-lettered.
    pub retry_budget: u32,
    /// First backoff delay; doubles on each retry.
    pub backoff_base: Duration,
    /// Backoff ceiling.
    pub backoff_cap: Duration,
    /// Maximum dead-letter entries retained for inspection.
    pub dead_letter_retention: usize,
}

/// Index write batching settings.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Entries accumulated before a flush.
    pub batch_size: usize,
    /// Maximum age of a non-empty batch before a flush.
    pub flush_interval: Duration,
}

/// Corpus index settings.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Postgres connection URI.
    pub connection_url: String,
    /// Target table holding corpus entries.
    pub table: String,
}

/// Complete pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub forge: ForgeConfig,
    pub storage: StorageConfig,
    pub workers: WorkerConfig,
    pub repo_filter: RepoFilterConfig,
    pub file_filter: FileFilterConfig,
    pub queues: QueueConfig,
    pub batching: BatchConfig,
    pub index: IndexConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            forge: ForgeConfig {
                tokens: Vec::new(),
                max_requests_per_second: 5.0,
                request_timeout: Duration::from_secs(30),
                credential_safety_threshold: 10,
                credential_ceiling: 5000,
            },
            storage: StorageConfig {
                clone_root: PathBuf::from("./clones"),
                clone_root_max_gb: 100,
            },
            workers: WorkerConfig {
                repo_workers: cores,
                file_workers: cores * 2,
                job_timeout: Duration::from_secs(300),
                max_concurrent_clones: cores,
            },
            repo_filter: RepoFilterConfig {
                min_stars: 10,
                min_forks: 2,
                target_languages: vec![
                    "python".to_string(),
                    "javascript".to_string(),
                    "typescript".to_string(),
                    "go".to_string(),
                    "rust".to_string(),
                    "java".to_string(),
                ],
                exclude_tokens: default_exclude_tokens(),
                include_tokens: default_include_tokens(),
            },
            file_filter: FileFilterConfig {
                min_size_bytes: 128,
                max_size_bytes: 1_048_576,
                min_lines: 10,
                max_lines: 5000,
                quality_threshold: 0.7,
                exclude_content_patterns: vec![
                    "@generated".to_string(),
                    "DO NOT EDIT".to_string(),
                    "Code generated by".to_string(),
                ],
            },
            queues: QueueConfig {
                redis_url: "redis://localhost:6379".to_string(),
                retry_budget: 3,
                backoff_base: Duration::from_secs(2),
                backoff_cap: Duration::from_secs(120),
                dead_letter_retention: 10_000,
            },
            batching: BatchConfig {
                batch_size: 500,
                flush_interval: Duration::from_secs(5),
            },
            index: IndexConfig {
                connection_url: "postgres://localhost/corpus_forge".to_string(),
                table: "corpus_entries".to_string(),
            },
        }
    }
}

/// Tokens that mark throwaway or derivative repositories.
fn default_exclude_tokens() -> Vec<String> {
    [
        "tutorial",
        "example",
        "examples",
        "homework",
        "boilerplate",
        "hello-world",
        "helloworld",
        "clone",
        "mirror",
        "copy",
        "starter",
        "template",
        "playground",
        "course",
        "exercise",
        "practice",
        "sample",
        "demo",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Tokens that mark substantial engineering projects.
fn default_include_tokens() -> Vec<String> {
    [
        "framework",
        "library",
        "compiler",
        "database",
        "kernel",
        "sdk",
        "protocol",
        "engine",
        "runtime",
        "parser",
        "toolkit",
        "server",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl PipelineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from the environment over defaults.
    ///
    /// # Environment Variables
    ///
    /// - `CORPUS_FORGE_TOKENS`: comma-separated API tokens
    /// - `CORPUS_MAX_RPS`: forge requests per second (default: 5.0)
    /// - `CORPUS_REQUEST_TIMEOUT_SECS`: forge request timeout (default: 30)
    /// - `CORPUS_CREDENTIAL_THRESHOLD`: quota safety floor (default: 10)
    /// - `CORPUS_CREDENTIAL_CEILING`: nominal quota ceiling (default: 5000)
    /// - `CORPUS_CLONE_ROOT`: clone root directory (default: ./clones)
    /// - `CORPUS_CLONE_ROOT_MAX_GB`: advisory size cap (default: 100)
    /// - `CORPUS_REPO_WORKERS`: acquirer workers (default: cores)
    /// - `CORPUS_FILE_WORKERS`: analyzer workers (default: 2x cores)
    /// - `CORPUS_JOB_TIMEOUT_SECS`: per-job deadline (default: 300)
    /// - `CORPUS_MAX_CONCURRENT_CLONES`: clone parallelism cap
    /// - `CORPUS_MIN_STARS`, `CORPUS_MIN_FORKS`: repo filter minimums
    /// - `CORPUS_TARGET_LANGUAGES`: comma-separated language names
    /// - `CORPUS_EXCLUDE_TOKENS`, `CORPUS_INCLUDE_TOKENS`: comma-separated
    /// - `CORPUS_FILE_MIN_BYTES`, `CORPUS_FILE_MAX_BYTES`: file size gate
    /// - `CORPUS_FILE_MIN_LINES`, `CORPUS_FILE_MAX_LINES`: file line gate
    /// - `CORPUS_QUALITY_THRESHOLD`: publication threshold (default: 0.7)
    /// - `CORPUS_REDIS_URL`: queue backend (default: redis://localhost:6379)
    /// - `CORPUS_RETRY_BUDGET`: retries before dead-letter (default: 3)
    /// - `CORPUS_BACKOFF_BASE_MS`, `CORPUS_BACKOFF_CAP_MS`: retry backoff
    /// - `CORPUS_DEAD_LETTER_RETENTION`: dead-letter cap (default: 10000)
    /// - `CORPUS_BATCH_SIZE`: index batch size (default: 500)
    /// - `CORPUS_FLUSH_INTERVAL_SECS`: index flush interval (default: 5)
    /// - `CORPUS_INDEX_URL`: Postgres URI for the corpus index
    /// - `CORPUS_INDEX_TABLE`: corpus table name (default: corpus_entries)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a value cannot be parsed or validation fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("CORPUS_FORGE_TOKENS") {
            config.forge.tokens = parse_list(&val);
        }
        if let Ok(val) = std::env::var("CORPUS_MAX_RPS") {
            config.forge.max_requests_per_second = parse_env_value(&val, "CORPUS_MAX_RPS")?;
        }
        if let Ok(val) = std::env::var("CORPUS_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "CORPUS_REQUEST_TIMEOUT_SECS")?;
            config.forge.request_timeout = Duration::from_secs(secs);
        }
        if let Ok(val) = std::env::var("CORPUS_CREDENTIAL_THRESHOLD") {
            config.forge.credential_safety_threshold =
                parse_env_value(&val, "CORPUS_CREDENTIAL_THRESHOLD")?;
        }
        if let Ok(val) = std::env::var("CORPUS_CREDENTIAL_CEILING") {
            config.forge.credential_ceiling = parse_env_value(&val, "CORPUS_CREDENTIAL_CEILING")?;
        }

        if let Ok(val) = std::env::var("CORPUS_CLONE_ROOT") {
            config.storage.clone_root = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("CORPUS_CLONE_ROOT_MAX_GB") {
            config.storage.clone_root_max_gb = parse_env_value(&val, "CORPUS_CLONE_ROOT_MAX_GB")?;
        }

        if let Ok(val) = std::env::var("CORPUS_REPO_WORKERS") {
            config.workers.repo_workers = parse_env_value(&val, "CORPUS_REPO_WORKERS")?;
        }
        if let Ok(val) = std::env::var("CORPUS_FILE_WORKERS") {
            config.workers.file_workers = parse_env_value(&val, "CORPUS_FILE_WORKERS")?;
        }
        if let Ok(val) = std::env::var("CORPUS_JOB_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "CORPUS_JOB_TIMEOUT_SECS")?;
            config.workers.job_timeout = Duration::from_secs(secs);
        }
        if let Ok(val) = std::env::var("CORPUS_MAX_CONCURRENT_CLONES") {
            config.workers.max_concurrent_clones =
                parse_env_value(&val, "CORPUS_MAX_CONCURRENT_CLONES")?;
        }

        if let Ok(val) = std::env::var("CORPUS_MIN_STARS") {
            config.repo_filter.min_stars = parse_env_value(&val, "CORPUS_MIN_STARS")?;
        }
        if let Ok(val) = std::env::var("CORPUS_MIN_FORKS") {
            config.repo_filter.min_forks = parse_env_value(&val, "CORPUS_MIN_FORKS")?;
        }
        if let Ok(val) = std::env::var("CORPUS_TARGET_LANGUAGES") {
            config.repo_filter.target_languages =
                parse_list(&val).iter().map(|s| s.to_lowercase()).collect();
        }
        if let Ok(val) = std::env::var("CORPUS_EXCLUDE_TOKENS") {
            config.repo_filter.exclude_tokens = parse_list(&val);
        }
        if let Ok(val) = std::env::var("CORPUS_INCLUDE_TOKENS") {
            config.repo_filter.include_tokens = parse_list(&val);
        }

        if let Ok(val) = std::env::var("CORPUS_FILE_MIN_BYTES") {
            config.file_filter.min_size_bytes = parse_env_value(&val, "CORPUS_FILE_MIN_BYTES")?;
        }
        if let Ok(val) = std::env::var("CORPUS_FILE_MAX_BYTES") {
            config.file_filter.max_size_bytes = parse_env_value(&val, "CORPUS_FILE_MAX_BYTES")?;
        }
        if let Ok(val) = std::env::var("CORPUS_FILE_MIN_LINES") {
            config.file_filter.min_lines = parse_env_value(&val, "CORPUS_FILE_MIN_LINES")?;
        }
        if let Ok(val) = std::env::var("CORPUS_FILE_MAX_LINES") {
            config.file_filter.max_lines = parse_env_value(&val, "CORPUS_FILE_MAX_LINES")?;
        }
        if let Ok(val) = std::env::var("CORPUS_QUALITY_THRESHOLD") {
            config.file_filter.quality_threshold =
                parse_env_value(&val, "CORPUS_QUALITY_THRESHOLD")?;
        }

        if let Ok(val) = std::env::var("CORPUS_REDIS_URL") {
            config.queues.redis_url = val;
        }
        if let Ok(val) = std::env::var("CORPUS_RETRY_BUDGET") {
            config.queues.retry_budget = parse_env_value(&val, "CORPUS_RETRY_BUDGET")?;
        }
        if let Ok(val) = std::env::var("CORPUS_BACKOFF_BASE_MS") {
            let ms: u64 = parse_env_value(&val, "CORPUS_BACKOFF_BASE_MS")?;
            config.queues.backoff_base = Duration::from_millis(ms);
        }
        if let Ok(val) = std::env::var("CORPUS_BACKOFF_CAP_MS") {
            let ms: u64 = parse_env_value(&val, "CORPUS_BACKOFF_CAP_MS")?;
            config.queues.backoff_cap = Duration::from_millis(ms);
        }
        if let Ok(val) = std::env::var("CORPUS_DEAD_LETTER_RETENTION") {
            config.queues.dead_letter_retention =
                parse_env_value(&val, "CORPUS_DEAD_LETTER_RETENTION")?;
        }

        if let Ok(val) = std::env::var("CORPUS_BATCH_SIZE") {
            config.batching.batch_size = parse_env_value(&val, "CORPUS_BATCH_SIZE")?;
        }
        if let Ok(val) = std::env::var("CORPUS_FLUSH_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "CORPUS_FLUSH_INTERVAL_SECS")?;
            config.batching.flush_interval = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("CORPUS_INDEX_URL") {
            config.index.connection_url = val;
        }
        if let Ok(val) = std::env::var("CORPUS_INDEX_TABLE") {
            config.index.table = val;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` describing the first
    /// violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.forge.max_requests_per_second <= 0.0 {
            return Err(ConfigError::ValidationFailed(
                "max_requests_per_second must be greater than 0".to_string(),
            ));
        }
        if self.forge.request_timeout.as_secs() == 0 {
            return Err(ConfigError::ValidationFailed(
                "request_timeout must be greater than 0".to_string(),
            ));
        }
        if self.forge.credential_ceiling == 0 {
            return Err(ConfigError::ValidationFailed(
                "credential_ceiling must be greater than 0".to_string(),
            ));
        }
        if self.forge.credential_safety_threshold >= self.forge.credential_ceiling {
            return Err(ConfigError::ValidationFailed(
                "credential_safety_threshold must be below credential_ceiling".to_string(),
            ));
        }

        if self.workers.repo_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "repo_workers must be greater than 0".to_string(),
            ));
        }
        if self.workers.file_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "file_workers must be greater than 0".to_string(),
            ));
        }
        if self.workers.job_timeout.as_secs() == 0 {
            return Err(ConfigError::ValidationFailed(
                "job_timeout must be greater than 0".to_string(),
            ));
        }
        if self.workers.max_concurrent_clones == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrent_clones must be greater than 0".to_string(),
            ));
        }

        if self.repo_filter.target_languages.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "target_languages cannot be empty".to_string(),
            ));
        }

        if self.file_filter.min_size_bytes > self.file_filter.max_size_bytes {
            return Err(ConfigError::ValidationFailed(
                "file min_size_bytes cannot exceed max_size_bytes".to_string(),
            ));
        }
        if self.file_filter.min_lines > self.file_filter.max_lines {
            return Err(ConfigError::ValidationFailed(
                "file min_lines cannot exceed max_lines".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.file_filter.quality_threshold) {
            return Err(ConfigError::ValidationFailed(
                "quality_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }
        for pattern in &self.file_filter.exclude_content_patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                return Err(ConfigError::ValidationFailed(format!(
                    "invalid exclusion pattern '{pattern}': {e}"
                )));
            }
        }

        if self.queues.redis_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "redis_url cannot be empty".to_string(),
            ));
        }
        if self.queues.backoff_base.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "backoff_base must be greater than 0".to_string(),
            ));
        }
        if self.queues.backoff_base > self.queues.backoff_cap {
            return Err(ConfigError::ValidationFailed(
                "backoff_base cannot exceed backoff_cap".to_string(),
            ));
        }

        if self.batching.batch_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        if self.batching.flush_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "flush_interval must be greater than 0".to_string(),
            ));
        }

        if self.index.connection_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "index connection_url cannot be empty".to_string(),
            ));
        }
        if !is_valid_identifier(&self.index.table) {
            return Err(ConfigError::ValidationFailed(format!(
                "index table '{}' is not a valid identifier",
                self.index.table
            )));
        }

        Ok(())
    }

    /// Builder method to set the forge tokens.
    pub fn with_tokens(mut self, tokens: Vec<String>) -> Self {
        self.forge.tokens = tokens;
        self
    }

    /// Builder method to set the clone root.
    pub fn with_clone_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage.clone_root = root.into();
        self
    }

    /// Builder method to set worker counts.
    pub fn with_workers(mut self, repo: usize, file: usize) -> Self {
        self.workers.repo_workers = repo;
        self.workers.file_workers = file;
        self
    }

    /// Builder method to set the Redis URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.queues.redis_url = url.into();
        self
    }

    /// Builder method to set the index connection URL.
    pub fn with_index_url(mut self, url: impl Into<String>) -> Self {
        self.index.connection_url = url.into();
        self
    }

    /// Builder method to set the publication quality threshold.
    pub fn with_quality_threshold(mut self, threshold: f64) -> Self {
        self.file_filter.quality_threshold = threshold;
        self
    }
}

/// Parse a comma-separated environment value into trimmed, non-empty parts.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Table names are interpolated into SQL and must stay plain identifiers.
fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .next()
            .map(|c| c.is_ascii_lowercase() || c == '_')
            .unwrap_or(false)
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.file_filter.quality_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.queues.retry_budget, 3);
        assert_eq!(config.batching.batch_size, 500);
        assert_eq!(config.batching.flush_interval, Duration::from_secs(5));
        assert_eq!(config.index.table, "corpus_entries");
    }

    #[test]
    fn builder_methods() {
        let config = PipelineConfig::new()
            .with_tokens(vec!["ghp_a".to_string(), "ghp_b".to_string()])
            .with_clone_root("/data/clones")
            .with_workers(8, 16)
            .with_redis_url("redis://queue:6379")
            .with_index_url("postgres://index/corpus")
            .with_quality_threshold(0.5);

        assert_eq!(config.forge.tokens.len(), 2);
        assert_eq!(config.storage.clone_root, PathBuf::from("/data/clones"));
        assert_eq!(config.workers.repo_workers, 8);
        assert_eq!(config.workers.file_workers, 16);
        assert_eq!(config.queues.redis_url, "redis://queue:6379");
        assert_eq!(config.index.connection_url, "postgres://index/corpus");
        assert!((config.file_filter.quality_threshold - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn validation_rejects_zero_workers() {
        let config = PipelineConfig::default().with_workers(0, 4);
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("repo_workers"));
    }

    #[test]
    fn validation_rejects_threshold_out_of_range() {
        let config = PipelineConfig::default().with_quality_threshold(1.5);
        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("quality_threshold"));
    }

    #[test]
    fn validation_rejects_inverted_size_gate() {
        let mut config = PipelineConfig::default();
        config.file_filter.min_size_bytes = 100;
        config.file_filter.max_size_bytes = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_inverted_backoff() {
        let mut config = PipelineConfig::default();
        config.queues.backoff_base = Duration::from_secs(300);
        config.queues.backoff_cap = Duration::from_secs(10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_threshold_above_ceiling() {
        let mut config = PipelineConfig::default();
        config.forge.credential_safety_threshold = 5000;
        config.forge.credential_ceiling = 5000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_bad_table_name() {
        let mut config = PipelineConfig::default();
        config.index.table = "corpus; DROP TABLE".to_string();
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("identifier"));
    }

    #[test]
    fn validation_rejects_bad_exclusion_pattern() {
        let mut config = PipelineConfig::default();
        config.file_filter.exclude_content_patterns = vec!["[unclosed".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_empty_languages() {
        let mut config = PipelineConfig::default();
        config.repo_filter.target_languages.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_list_trims_and_drops_empties() {
        assert_eq!(
            parse_list("a, b ,,c"),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn identifier_check() {
        assert!(is_valid_identifier("corpus_entries"));
        assert!(is_valid_identifier("_staging2"));
        assert!(!is_valid_identifier("Corpus"));
        assert!(!is_valid_identifier("2corpus"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("corpus entries"));
    }
}
