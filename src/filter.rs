//! Repository-level quality filter.
//!
//! A pure function of a candidate: hard rejection rules first (stars, forks,
//! language, exclude tokens), then an additive score. Evaluation
//! short-circuits on the first rejection, so a popular repository that
//! matches an exclude token never reaches scoring, and a zero-star
//! repository is rejected before its include tokens are even looked at.

use crate::config::RepoFilterConfig;
use crate::discovery::RepoCandidate;

/// Minimum score at which a candidate is accepted.
const ACCEPT_SCORE: u32 = 50;

/// Outcome of evaluating one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDecision {
    /// Whether the candidate should be ingested.
    pub accepted: bool,
    /// Accumulated score in [0, 100]; 0 for hard rejections.
    pub score: u32,
    /// Why the candidate was accepted or rejected.
    pub reason: String,
}

impl FilterDecision {
    fn reject(reason: String) -> Self {
        Self {
            accepted: false,
            score: 0,
            reason,
        }
    }
}

/// Pure candidate filter configured with minimums and token lists.
#[derive(Debug, Clone)]
pub struct RepoFilter {
    config: RepoFilterConfig,
}

impl RepoFilter {
    pub fn new(config: RepoFilterConfig) -> Self {
        Self { config }
    }

    /// Evaluates a candidate. Deterministic: the same candidate always
    /// yields the same decision.
    pub fn evaluate(&self, candidate: &RepoCandidate) -> FilterDecision {
        if candidate.stars < self.config.min_stars {
            return FilterDecision::reject(format!(
                "stars {} below minimum {}",
                candidate.stars, self.config.min_stars
            ));
        }

        if candidate.forks < self.config.min_forks {
            return FilterDecision::reject(format!(
                "forks {} below minimum {}",
                candidate.forks, self.config.min_forks
            ));
        }

        let language = candidate.language.as_deref().unwrap_or("");
        let language_match = self
            .config
            .target_languages
            .iter()
            .any(|l| l.eq_ignore_ascii_case(language));
        if !language_match {
            return FilterDecision::reject(format!(
                "language '{}' not in target set",
                if language.is_empty() { "unknown" } else { language }
            ));
        }

        let haystack = self.candidate_text(candidate);
        if let Some(token) = self.find_token(&haystack, &self.config.exclude_tokens) {
            return FilterDecision::reject(format!("matched exclude token '{token}'"));
        }

        let mut score = 10u32;
        score += 15; // language in the target set

        if candidate.stars > 100 {
            score += 20;
        } else if candidate.stars > 50 {
            score += 10;
        }

        if candidate.forks > 20 {
            score += 15;
        } else if candidate.forks > 10 {
            score += 8;
        }

        let include_hit = self.find_token(&haystack, &self.config.include_tokens);
        if include_hit.is_some() {
            score += 10;
        }

        let accepted = score >= ACCEPT_SCORE;
        let reason = if accepted {
            match include_hit {
                Some(token) => format!("score {score} (include token '{token}')"),
                None => format!("score {score}"),
            }
        } else {
            format!("score {score} below acceptance threshold {ACCEPT_SCORE}")
        };

        FilterDecision {
            accepted,
            score,
            reason,
        }
    }

    /// Lowercased searchable text: name, full identity, description, topics.
    fn candidate_text(&self, candidate: &RepoCandidate) -> String {
        let mut text = String::new();
        text.push_str(&candidate.id.to_string());
        text.push(' ');
        if let Some(desc) = &candidate.description {
            text.push_str(desc);
            text.push(' ');
        }
        for topic in &candidate.topics {
            text.push_str(topic);
            text.push(' ');
        }
        text.to_lowercase()
    }

    fn find_token<'a>(&self, haystack: &str, tokens: &'a [String]) -> Option<&'a str> {
        tokens
            .iter()
            .find(|t| haystack.contains(&t.to_lowercase()))
            .map(|t| t.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::discovery::RepoId;

    fn filter() -> RepoFilter {
        let mut config = PipelineConfig::default().repo_filter;
        config.min_stars = 10;
        config.min_forks = 2;
        RepoFilter::new(config)
    }

    fn candidate(
        identity: &str,
        stars: u32,
        forks: u32,
        language: &str,
        description: &str,
    ) -> RepoCandidate {
        RepoCandidate {
            id: RepoId::parse(identity).expect("valid identity"),
            language: Some(language.to_lowercase()),
            stars,
            forks,
            description: Some(description.to_string()),
            topics: Vec::new(),
            pushed_at: None,
            size_kb: 100,
        }
    }

    #[test]
    fn solid_library_is_accepted() {
        let c = candidate("alice/good-lib", 200, 30, "Go", "networking library");
        let decision = filter().evaluate(&c);

        // 10 base + 15 language + 20 stars + 15 forks + 10 include = 70
        assert!(decision.accepted);
        assert_eq!(decision.score, 70);
    }

    #[test]
    fn low_stars_reject_short_circuits() {
        // Include token present, but rule 1 fires first.
        let c = candidate("dave/tiny-lib", 0, 50, "Go", "useful library");
        let decision = filter().evaluate(&c);

        assert!(!decision.accepted);
        assert_eq!(decision.score, 0);
        assert!(decision.reason.contains("stars"));
    }

    #[test]
    fn low_forks_reject() {
        let c = candidate("dave/lonely", 500, 0, "Go", "library");
        let decision = filter().evaluate(&c);
        assert!(!decision.accepted);
        assert!(decision.reason.contains("forks"));
    }

    #[test]
    fn off_target_language_reject() {
        let c = candidate("erin/dots", 500, 50, "VimScript", "a framework");
        let decision = filter().evaluate(&c);
        assert!(!decision.accepted);
        assert!(decision.reason.contains("language"));
    }

    #[test]
    fn missing_language_reject() {
        let mut c = candidate("erin/mystery", 500, 50, "go", "framework");
        c.language = None;
        assert!(!filter().evaluate(&c).accepted);
    }

    #[test]
    fn exclude_token_beats_popularity() {
        // 5000 stars, but the name contains 'tutorial'.
        let c = candidate("bob/go-tutorial", 5000, 900, "Go", "learn go fast");
        let decision = filter().evaluate(&c);

        assert!(!decision.accepted);
        assert_eq!(decision.score, 0);
        assert!(decision.reason.contains("tutorial"));
    }

    #[test]
    fn exclude_token_in_topics() {
        let mut c = candidate("bob/netstack", 5000, 900, "Go", "tcp stack");
        c.topics = vec!["networking".to_string(), "homework".to_string()];
        let decision = filter().evaluate(&c);
        assert!(!decision.accepted);
        assert!(decision.reason.contains("homework"));
    }

    #[test]
    fn exclude_wins_over_include() {
        let c = candidate(
            "bob/example-framework",
            5000,
            900,
            "Go",
            "a framework of examples",
        );
        assert!(!filter().evaluate(&c).accepted);
    }

    #[test]
    fn language_match_is_case_insensitive() {
        let c = candidate("alice/good-lib", 200, 30, "GO", "networking library");
        assert!(filter().evaluate(&c).accepted);
    }

    #[test]
    fn middling_repo_without_include_token_is_rejected() {
        // 10 base + 15 language + 10 stars(>50) + 8 forks(>10) = 43 < 50
        let c = candidate("frank/sideproject", 60, 12, "Go", "weekend hacking");
        let decision = filter().evaluate(&c);

        assert!(!decision.accepted);
        assert_eq!(decision.score, 43);
        assert!(decision.reason.contains("below acceptance threshold"));
    }

    #[test]
    fn include_token_tips_a_borderline_repo() {
        // 10 + 15 + 10 + 8 + 10 = 53 >= 50
        let c = candidate("frank/quiet-parser", 60, 12, "Go", "streaming parser");
        let decision = filter().evaluate(&c);

        assert!(decision.accepted);
        assert_eq!(decision.score, 53);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let c = candidate("alice/good-lib", 200, 30, "Go", "networking library");
        let f = filter();
        let first = f.evaluate(&c);
        let second = f.evaluate(&c);
        assert_eq!(first, second);
    }
}
