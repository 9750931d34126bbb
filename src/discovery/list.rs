//! List provider: one repository URL per line.
//!
//! Lines are parsed eagerly at construction so a malformed file fails before
//! the pipeline starts. Each candidate is enriched with live metadata from
//! the forge when a client is available; enrichment failures degrade to a
//! bare candidate rather than stopping the stream.

use std::collections::VecDeque;
use std::path::Path;

use super::{parse_repo_object, DiscoveryError, ForgeHttp, RepoCandidate, RepoId};

/// Discovery provider over an operator-supplied repository list.
pub struct ListProvider {
    pending: VecDeque<RepoId>,
    forge: Option<ForgeHttp>,
}

impl ListProvider {
    /// Reads and parses the list file.
    ///
    /// Blank lines and lines starting with `#` are skipped. Any other
    /// unparseable line is an error; a typo in a curated list should be
    /// fixed, not silently dropped.
    pub fn from_file(path: &Path, forge: Option<ForgeHttp>) -> Result<Self, DiscoveryError> {
        let content = std::fs::read_to_string(path)?;
        let mut pending = VecDeque::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            pending.push_back(RepoId::from_url(line)?);
        }

        tracing::info!(path = %path.display(), repos = pending.len(), "Repository list loaded");
        Ok(Self { pending, forge })
    }

    /// Emits the next candidate from the list.
    pub async fn next(&mut self) -> Result<Option<RepoCandidate>, DiscoveryError> {
        let Some(id) = self.pending.pop_front() else {
            return Ok(None);
        };

        if let Some(forge) = &self.forge {
            let url = format!("https://api.github.com/repos/{}", id);
            match forge.get_json(&url).await {
                Ok(body) => {
                    if let Some(candidate) = parse_repo_object(&body) {
                        return Ok(Some(candidate));
                    }
                    tracing::warn!(repo = %id, "Metadata response missing fields; emitting bare candidate");
                }
                Err(e) => {
                    tracing::warn!(repo = %id, error = %e, "Metadata enrichment failed; emitting bare candidate");
                }
            }
        }

        Ok(Some(RepoCandidate::bare(id)))
    }

    /// Remaining unemitted entries.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_list(lines: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(lines.as_bytes()).expect("write list");
        file
    }

    #[tokio::test]
    async fn reads_urls_comments_and_blanks() {
        let file = write_list(
            "# curated repos\n\
             https://github.com/alice/good-lib\n\
             \n\
             git@github.com:bob/parser.git\n\
             carol/engine\n",
        );

        let mut provider = ListProvider::from_file(file.path(), None).expect("parse list");
        assert_eq!(provider.remaining(), 3);

        let mut seen = Vec::new();
        while let Some(c) = provider.next().await.expect("next") {
            seen.push(c.id.to_string());
        }
        assert_eq!(seen, vec!["alice/good-lib", "bob/parser", "carol/engine"]);
    }

    #[tokio::test]
    async fn bare_candidates_without_forge_client() {
        let file = write_list("alice/good-lib\n");
        let mut provider = ListProvider::from_file(file.path(), None).expect("parse list");

        let candidate = provider.next().await.expect("next").expect("one entry");
        assert_eq!(candidate.stars, 0);
        assert!(candidate.language.is_none());

        assert!(provider.next().await.expect("next").is_none());
    }

    #[test]
    fn malformed_line_is_an_error() {
        let file = write_list("alice/good-lib\nnot a repo line at all\n");
        assert!(ListProvider::from_file(file.path(), None).is_err());
    }
}
