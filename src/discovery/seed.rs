//! Seed provider: replays a snapshot of previously discovered repositories.
//!
//! The discover command records every candidate it sees into the index
//! database; this provider pages back through that table so a pipeline can
//! be re-run over a known snapshot without touching the forge.

use std::collections::VecDeque;

use crate::index::CorpusIndex;

use super::{DiscoveryError, RepoCandidate};

/// Rows fetched per page.
const PAGE_SIZE: i64 = 200;

/// Discovery provider over the recorded-candidates table.
pub struct SeedProvider {
    index: CorpusIndex,
    offset: i64,
    buffer: VecDeque<RepoCandidate>,
    exhausted: bool,
}

impl SeedProvider {
    /// Creates a provider that pages the snapshot from the beginning.
    pub fn new(index: CorpusIndex) -> Self {
        Self {
            index,
            offset: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Emits the next recorded candidate.
    pub async fn next(&mut self) -> Result<Option<RepoCandidate>, DiscoveryError> {
        loop {
            if let Some(candidate) = self.buffer.pop_front() {
                return Ok(Some(candidate));
            }
            if self.exhausted {
                return Ok(None);
            }

            let page = self.index.candidates_page(self.offset, PAGE_SIZE).await?;

            tracing::debug!(offset = self.offset, rows = page.len(), "Seed page loaded");

            if (page.len() as i64) < PAGE_SIZE {
                self.exhausted = true;
            }
            self.offset += page.len() as i64;
            self.buffer.extend(page);

            if self.buffer.is_empty() && self.exhausted {
                return Ok(None);
            }
        }
    }
}
