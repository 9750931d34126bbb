//! Query provider: live forge search.
//!
//! Pages through `/search/repositories`, buffering one page of candidates at
//! a time. Rate-limit responses back off exponentially; the search API has a
//! much tighter budget than the REST API, so the provider is deliberately
//! patient.

use std::collections::VecDeque;
use std::time::Duration;

use serde_json::Value;

use super::{parse_repo_object, DiscoveryError, ForgeHttp, RepoCandidate};

/// Results per search page; the forge caps this at 100.
const PER_PAGE: usize = 100;

/// The forge search API never returns results past the first 1000.
const MAX_RESULTS: usize = 1000;

/// Backoff schedule for rate-limited search calls.
const BACKOFF_BASE: Duration = Duration::from_secs(2);
const BACKOFF_CAP: Duration = Duration::from_secs(120);
const MAX_ATTEMPTS: u32 = 5;

/// Discovery provider over the forge search API.
pub struct QueryProvider {
    forge: ForgeHttp,
    query: String,
    page: usize,
    emitted: usize,
    buffer: VecDeque<RepoCandidate>,
    exhausted: bool,
}

impl QueryProvider {
    /// Creates a provider for the given search query.
    ///
    /// The query is passed through to the forge verbatim (e.g.
    /// `language:go stars:>100 pushed:>2025-01-01`).
    pub fn new(forge: ForgeHttp, query: impl Into<String>) -> Self {
        Self {
            forge,
            query: query.into(),
            page: 1,
            emitted: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Emits the next search result.
    pub async fn next(&mut self) -> Result<Option<RepoCandidate>, DiscoveryError> {
        loop {
            if let Some(candidate) = self.buffer.pop_front() {
                self.emitted += 1;
                return Ok(Some(candidate));
            }
            if self.exhausted || self.emitted >= MAX_RESULTS {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    async fn fetch_page(&mut self) -> Result<(), DiscoveryError> {
        let url = format!(
            "https://api.github.com/search/repositories?q={}&sort=updated&order=desc&per_page={}&page={}",
            urlencoding::encode(&self.query),
            PER_PAGE,
            self.page
        );

        let mut backoff = BACKOFF_BASE;
        let mut last_err = None;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.forge.get_json(&url).await {
                Ok(body) => {
                    self.consume_page(&body);
                    self.page += 1;
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        page = self.page,
                        attempt = attempt,
                        backoff_secs = backoff.as_secs(),
                        error = %e,
                        "Search page failed; backing off"
                    );
                    last_err = Some(e);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| DiscoveryError::Forge("search retries exhausted".into())))
    }

    fn consume_page(&mut self, body: &Value) {
        let items = body
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        if items.len() < PER_PAGE {
            self.exhausted = true;
        }

        let mut parsed = 0usize;
        for item in &items {
            if let Some(candidate) = parse_repo_object(item) {
                self.buffer.push_back(candidate);
                parsed += 1;
            }
        }

        tracing::info!(
            page = self.page,
            items = items.len(),
            parsed = parsed,
            emitted = self.emitted,
            "Search page fetched"
        );

        if items.is_empty() {
            self.exhausted = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forge::{CredentialPool, RateLimiter};
    use std::sync::Arc;

    fn provider() -> QueryProvider {
        let pool = Arc::new(
            CredentialPool::new(vec!["t0".to_string()], 10, 5000).expect("pool"),
        );
        let limiter = Arc::new(RateLimiter::new(5.0));
        let forge = ForgeHttp::new(pool, limiter, Duration::from_secs(5));
        QueryProvider::new(forge, "language:go stars:>100")
    }

    #[test]
    fn short_page_marks_exhaustion() {
        let mut p = provider();
        let body = serde_json::json!({
            "total_count": 2,
            "items": [
                { "full_name": "alice/good-lib", "stargazers_count": 200, "forks_count": 30,
                  "language": "Go", "size": 10 },
                { "full_name": "bob/parser", "stargazers_count": 120, "forks_count": 12,
                  "language": "Go", "size": 20 }
            ]
        });

        p.consume_page(&body);
        assert!(p.exhausted);
        assert_eq!(p.buffer.len(), 2);
        assert_eq!(p.buffer[0].id.to_string(), "alice/good-lib");
    }

    #[test]
    fn unparseable_items_are_skipped() {
        let mut p = provider();
        let body = serde_json::json!({
            "items": [
                { "stargazers_count": 5 },
                { "full_name": "carol/engine", "stargazers_count": 80, "forks_count": 8 }
            ]
        });

        p.consume_page(&body);
        assert_eq!(p.buffer.len(), 1);
        assert_eq!(p.buffer[0].id.to_string(), "carol/engine");
    }

    #[test]
    fn empty_page_marks_exhaustion() {
        let mut p = provider();
        p.consume_page(&serde_json::json!({ "items": [] }));
        assert!(p.exhausted);
        assert!(p.buffer.is_empty());
    }
}
