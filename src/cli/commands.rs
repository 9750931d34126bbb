//! CLI command definitions and handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::discovery::{
    DiscoverySource, ForgeHttp, ListProvider, QueryProvider, SeedProvider,
};
use crate::filter::RepoFilter;
use crate::forge::{CredentialPool, RateLimiter};
use crate::index::CorpusIndex;
use crate::pipeline::PipelineRunner;
use crate::queue::redis_queue::{connect, dead_letter_sink};
use crate::queue::{FileQueue, Priority, RepoJob, RepoQueue};
use crate::state::ProcessedStore;

/// Mine GitHub repositories into a scored, deduplicated training corpus.
#[derive(Parser)]
#[command(name = "corpus-forge")]
#[command(about = "Mine GitHub repositories into a scored training corpus")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Discover candidate repositories, filter them, and enqueue repo jobs.
    ///
    /// Runs until the chosen source is exhausted (or --max-repos is hit) and
    /// records every observed candidate so a later run can replay the
    /// snapshot with `--source seed`.
    Discover(DiscoverArgs),

    /// Run the ingest pipeline (acquirers and analyzers) until interrupted.
    Run,

    /// Inspect, and optionally clear, the dead-letter sink.
    #[command(name = "drain-dead-letter")]
    DrainDeadLetter(DrainArgs),

    /// Print queue depths and corpus counts.
    Stats,
}

/// Which discovery provider to use.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// Replay previously recorded candidates from the index database.
    Seed,
    /// Read repository URLs from a file.
    List,
    /// Search the forge.
    Query,
}

/// Arguments for the discover command.
#[derive(Parser, Debug)]
pub struct DiscoverArgs {
    /// Candidate source.
    #[arg(short, long, value_enum)]
    pub source: SourceKind,

    /// File of repository URLs, one per line (requires --source list).
    #[arg(long, required_if_eq("source", "list"))]
    pub list_file: Option<PathBuf>,

    /// Forge search query, e.g. "language:go stars:>100" (requires --source query).
    #[arg(long, required_if_eq("source", "query"))]
    pub query: Option<String>,

    /// Stop after enqueuing this many accepted repositories.
    #[arg(long)]
    pub max_repos: Option<usize>,
}

/// Arguments for the drain-dead-letter command.
#[derive(Parser, Debug)]
pub struct DrainArgs {
    /// Maximum entries to print.
    #[arg(long, default_value = "50")]
    pub limit: usize,

    /// Delete all entries after printing.
    #[arg(long)]
    pub clear: bool,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Discover(args) => run_discover(args).await,
        Commands::Run => {
            let config = PipelineConfig::from_env().context("loading configuration")?;
            PipelineRunner::new(config).run().await
        }
        Commands::DrainDeadLetter(args) => run_drain(args).await,
        Commands::Stats => run_stats().await,
    }
}

/// Maps a filter score onto an enqueue priority band.
fn priority_for_score(score: u32) -> Priority {
    if score >= 80 {
        Priority::High
    } else if score >= 60 {
        Priority::Normal
    } else {
        Priority::Low
    }
}

async fn run_discover(args: DiscoverArgs) -> anyhow::Result<()> {
    let config = PipelineConfig::from_env().context("loading configuration")?;

    let redis = connect(&config.queues.redis_url)
        .await
        .context("connecting to Redis")?;
    let dead_letter = dead_letter_sink(redis.clone(), &config.queues);
    let repo_queue = RepoQueue::new(redis.clone(), &config.queues, dead_letter);
    let processed = ProcessedStore::new(redis);
    let index = CorpusIndex::connect(&config.index)
        .await
        .context("connecting to corpus index")?;

    let forge_http = || -> anyhow::Result<ForgeHttp> {
        let pool = Arc::new(CredentialPool::new(
            config.forge.tokens.clone(),
            config.forge.credential_safety_threshold,
            config.forge.credential_ceiling,
        )?);
        let limiter = Arc::new(RateLimiter::new(config.forge.max_requests_per_second));
        Ok(ForgeHttp::new(pool, limiter, config.forge.request_timeout))
    };

    let mut source = match args.source {
        SourceKind::Seed => DiscoverySource::Seed(SeedProvider::new(index.clone())),
        SourceKind::List => {
            let path = args.list_file.expect("clap enforces --list-file");
            // Enrichment is optional: without tokens the list is ingested bare.
            let http = if config.forge.tokens.is_empty() {
                None
            } else {
                Some(forge_http()?)
            };
            DiscoverySource::List(ListProvider::from_file(&path, http)?)
        }
        SourceKind::Query => {
            let query = args.query.expect("clap enforces --query");
            anyhow::ensure!(
                !config.forge.tokens.is_empty(),
                "forge search requires at least one token (CORPUS_FORGE_TOKENS)"
            );
            DiscoverySource::Query(QueryProvider::new(forge_http()?, query))
        }
    };

    let filter = RepoFilter::new(config.repo_filter.clone());
    let record_candidates = args.source != SourceKind::Seed;

    let mut observed = 0usize;
    let mut enqueued = 0usize;

    while let Some(candidate) = source.next().await? {
        observed += 1;

        if record_candidates {
            if let Err(e) = index.record_candidate(&candidate).await {
                debug!(repo = %candidate.id, error = %e, "Failed to record candidate");
            }
        }

        let decision = filter.evaluate(&candidate);
        if !decision.accepted {
            debug!(repo = %candidate.id, reason = %decision.reason, "Candidate rejected");
            continue;
        }

        if processed.contains_repo(&candidate.id).await? {
            debug!(repo = %candidate.id, "Already processed; skipping");
            continue;
        }

        let priority = priority_for_score(decision.score);
        let job = RepoJob::new(candidate.id.clone(), priority);
        repo_queue.enqueue(&job).await?;
        enqueued += 1;

        info!(
            repo = %candidate.id,
            score = decision.score,
            priority = %priority,
            "Repository enqueued"
        );

        if args.max_repos.map(|max| enqueued >= max).unwrap_or(false) {
            break;
        }
    }

    info!(observed, enqueued, "Discovery finished");
    Ok(())
}

async fn run_drain(args: DrainArgs) -> anyhow::Result<()> {
    let config = PipelineConfig::from_env().context("loading configuration")?;
    let redis = connect(&config.queues.redis_url)
        .await
        .context("connecting to Redis")?;
    let dead_letter = dead_letter_sink(redis, &config.queues);

    let entries = dead_letter.peek(args.limit).await?;
    let total = dead_letter.len().await?;

    println!("dead-letter entries: {total} (showing {})", entries.len());
    for entry in &entries {
        println!("{}", serde_json::to_string_pretty(entry)?);
    }

    if args.clear {
        let cleared = dead_letter.clear().await?;
        println!("cleared {cleared} entries");
    }

    Ok(())
}

async fn run_stats() -> anyhow::Result<()> {
    let config = PipelineConfig::from_env().context("loading configuration")?;
    let redis = connect(&config.queues.redis_url)
        .await
        .context("connecting to Redis")?;
    let dead_letter = dead_letter_sink(redis.clone(), &config.queues);
    let repo_queue = RepoQueue::new(redis.clone(), &config.queues, dead_letter.clone());
    let file_queue = FileQueue::new(redis.clone(), &config.queues, dead_letter.clone());
    let processed = ProcessedStore::new(redis);
    let index = CorpusIndex::connect(&config.index)
        .await
        .context("connecting to corpus index")?;

    let depths = repo_queue.depths().await?;
    println!("repo queue:   high={} normal={} low={}", depths[0], depths[1], depths[2]);
    println!("file queue:   {}", file_queue.len().await?);
    println!("dead letter:  {}", dead_letter.len().await?);
    println!("processed:    repos={} files={}", processed.repo_count().await?, processed.digest_count().await?);
    println!("corpus size:  {}", index.count(0, 0.0).await?);

    Ok(())
}
