//! Deterministic file quality scoring.
//!
//! The score is a weighted combination of four factors, normalized to
//! [0, 1]:
//!
//! - length band (0.30): full weight for 50-500 lines, half for 20-1000
//! - comment ratio (0.30): full weight for a ratio in [0.1, 0.3]
//! - doc indicators (0.20): language-appropriate doc markers present
//! - structural density (0.20): decision/definition keywords per line in a
//!   healthy band [0.1, 0.5]; trivial and minified files both penalized
//!
//! The scorer is a pure function of (content, language): scoring the same
//! bytes twice always yields the same result, which downstream dedup and
//! re-delivery handling rely on.

/// Factor weights. Must sum to 1.0.
const WEIGHT_LENGTH: f64 = 0.30;
const WEIGHT_COMMENT: f64 = 0.30;
const WEIGHT_DOC: f64 = 0.20;
const WEIGHT_STRUCTURE: f64 = 0.20;

/// Per-factor scores and derived file facts.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    /// Line count of the file.
    pub lines: usize,
    /// Length-band factor in [0, 1].
    pub length: f64,
    /// Comment-ratio factor in [0, 1].
    pub comment: f64,
    /// Doc-indicator factor (0 or 1).
    pub doc: f64,
    /// Structural-density factor in [0, 1].
    pub structure: f64,
    /// Weighted total in [0, 1].
    pub total: f64,
    /// Whether doc markers were found.
    pub has_doc: bool,
    /// Whether test markers were found.
    pub has_tests: bool,
}

/// Scores a file's content for suitability as training material.
pub fn score_file(content: &str, language: &str) -> ScoreBreakdown {
    let lines = content.lines().count();
    let length = length_factor(lines);

    let comment_lines = content
        .lines()
        .filter(|line| is_comment_line(line.trim_start(), language))
        .count();
    let comment_ratio = if lines > 0 {
        comment_lines as f64 / lines as f64
    } else {
        0.0
    };
    let comment = comment_factor(comment_ratio);

    let has_doc = has_doc_markers(content, language);
    let doc = if has_doc { 1.0 } else { 0.0 };

    let keyword_count: usize = decision_keywords(language)
        .iter()
        .map(|kw| content.matches(kw).count())
        .sum();
    let density = if lines > 0 {
        keyword_count as f64 / lines as f64
    } else {
        0.0
    };
    let structure = structure_factor(density);

    let total = (WEIGHT_LENGTH * length
        + WEIGHT_COMMENT * comment
        + WEIGHT_DOC * doc
        + WEIGHT_STRUCTURE * structure)
        .clamp(0.0, 1.0);

    ScoreBreakdown {
        lines,
        length,
        comment,
        doc,
        structure,
        total,
        has_doc,
        has_tests: has_test_markers(content, language),
    }
}

/// Full weight for 50-500 lines, half weight for 20-1000, zero outside.
fn length_factor(lines: usize) -> f64 {
    if (50..=500).contains(&lines) {
        1.0
    } else if (20..=1000).contains(&lines) {
        0.5
    } else {
        0.0
    }
}

/// Full weight for a ratio in [0.1, 0.3]; scaled down linearly outside.
fn comment_factor(ratio: f64) -> f64 {
    if ratio < 0.1 {
        ratio / 0.1
    } else if ratio <= 0.3 {
        1.0
    } else {
        ((1.0 - ratio) / 0.7).max(0.0)
    }
}

/// Full weight for density in [0.1, 0.5]; trivial files (below) and dense or
/// minified files (above) scale down linearly.
fn structure_factor(density: f64) -> f64 {
    if density < 0.1 {
        density / 0.1
    } else if density <= 0.5 {
        1.0
    } else {
        ((1.0 - density) / 0.5).clamp(0.0, 1.0)
    }
}

fn is_comment_line(trimmed: &str, language: &str) -> bool {
    match language {
        "python" | "ruby" => trimmed.starts_with('#'),
        "php" => {
            trimmed.starts_with("//") || trimmed.starts_with('#') || trimmed.starts_with('*')
        }
        _ => {
            trimmed.starts_with("//")
                || trimmed.starts_with("/*")
                || trimmed.starts_with('*')
        }
    }
}

/// Language-appropriate documentation markers.
fn has_doc_markers(content: &str, language: &str) -> bool {
    match language {
        "python" => content.contains("\"\"\"") || content.contains("'''"),
        "rust" => content.contains("///") || content.contains("//!"),
        "go" => go_has_doc_comment(content),
        "ruby" => content.lines().any(|l| l.trim_start().starts_with("# ")),
        _ => content.contains("/**"),
    }
}

/// Go doc comments are plain `//` lines directly above a declaration.
fn go_has_doc_comment(content: &str) -> bool {
    let mut previous_was_comment = false;
    for line in content.lines() {
        let trimmed = line.trim_start();
        if previous_was_comment
            && (trimmed.starts_with("func ")
                || trimmed.starts_with("type ")
                || trimmed.starts_with("package "))
        {
            return true;
        }
        previous_was_comment = trimmed.starts_with("// ");
    }
    false
}

/// Decision and definition keywords used for structural density.
fn decision_keywords(language: &str) -> &'static [&'static str] {
    match language {
        "python" => &[
            "def ", "class ", "if ", "elif ", "for ", "while ", "return", "with ", "try:",
        ],
        "go" => &[
            "func ", "type ", "if ", "for ", "switch ", "select ", "return",
        ],
        "rust" => &[
            "fn ", "struct ", "enum ", "impl ", "if ", "for ", "while ", "match ", "return",
        ],
        "javascript" | "typescript" => &[
            "function ", "class ", "if ", "for ", "while ", "switch ", "return", "=> ",
        ],
        _ => &[
            "if ", "for ", "while ", "switch ", "return", "class ", "def ", "function ", "void ",
        ],
    }
}

/// Markers indicating the file contains tests.
fn has_test_markers(content: &str, language: &str) -> bool {
    match language {
        "python" => content.contains("def test_") || content.contains("import pytest"),
        "go" => content.contains("func Test") || content.contains("func Benchmark"),
        "rust" => content.contains("#[test]") || content.contains("#[cfg(test)]"),
        "java" | "kotlin" | "scala" => content.contains("@Test"),
        "javascript" | "typescript" => {
            content.contains("describe(") || content.contains("it(") || content.contains("test(")
        }
        _ => content.contains("test"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A healthy Go file: ~60 lines, ~15% comments, doc comments, moderate
    /// branching.
    fn healthy_go_file() -> String {
        let mut out = String::new();
        out.push_str("package conn\n\n");
        for i in 0..12 {
            out.push_str("// Dial opens a connection with retry.\n");
            out.push_str(&format!("func Dial{i}(addr string) error {{\n"));
            out.push_str("\tif addr == \"\" {\n");
            out.push_str("\t\treturn errInvalid\n");
            out.push_str("\t}\n");
            out.push_str("\treturn nil\n");
            out.push_str("}\n");
        }
        out
    }

    #[test]
    fn scoring_is_deterministic() {
        let content = healthy_go_file();
        let first = score_file(&content, "go");
        let second = score_file(&content, "go");
        assert_eq!(first, second);
        assert_eq!(first.total.to_bits(), second.total.to_bits());
    }

    #[test]
    fn healthy_file_scores_high() {
        let breakdown = score_file(&healthy_go_file(), "go");

        assert!((breakdown.length - 1.0).abs() < f64::EPSILON, "50-500 lines");
        assert!(breakdown.comment > 0.9, "comment ratio in band");
        assert!(breakdown.has_doc, "doc comment above func");
        assert!(breakdown.total >= 0.7, "total {}", breakdown.total);
    }

    #[test]
    fn length_bands() {
        assert_eq!(length_factor(50), 1.0);
        assert_eq!(length_factor(500), 1.0);
        assert_eq!(length_factor(20), 0.5);
        assert_eq!(length_factor(49), 0.5);
        assert_eq!(length_factor(501), 0.5);
        assert_eq!(length_factor(1000), 0.5);
        assert_eq!(length_factor(19), 0.0);
        assert_eq!(length_factor(1001), 0.0);
        assert_eq!(length_factor(0), 0.0);
    }

    #[test]
    fn comment_bands() {
        assert!((comment_factor(0.1) - 1.0).abs() < f64::EPSILON);
        assert!((comment_factor(0.3) - 1.0).abs() < f64::EPSILON);
        assert!((comment_factor(0.05) - 0.5).abs() < 1e-9);
        assert!(comment_factor(0.0) == 0.0);
        assert!(comment_factor(0.65) < 0.51);
        assert!(comment_factor(1.0) == 0.0);
    }

    #[test]
    fn structure_bands() {
        assert!((structure_factor(0.1) - 1.0).abs() < f64::EPSILON);
        assert!((structure_factor(0.5) - 1.0).abs() < f64::EPSILON);
        assert!((structure_factor(0.05) - 0.5).abs() < 1e-9);
        assert_eq!(structure_factor(0.0), 0.0);
        assert!(structure_factor(0.75) < 0.51);
        assert_eq!(structure_factor(1.0), 0.0);
        assert_eq!(structure_factor(3.0), 0.0, "minified blobs clamp to zero");
    }

    #[test]
    fn trivial_file_scores_low() {
        let content = "x = 1\ny = 2\nz = 3\n";
        let breakdown = score_file(content, "python");
        assert!(breakdown.total < 0.3, "total {}", breakdown.total);
    }

    #[test]
    fn doc_markers_per_language() {
        assert!(score_file("def f():\n    \"\"\"Docstring.\"\"\"\n    pass\n", "python").has_doc);
        assert!(score_file("/// Parses input.\nfn parse() {}\n", "rust").has_doc);
        assert!(score_file("/** Parses input. */\nfunction parse() {}\n", "javascript").has_doc);
        assert!(score_file("// Dial opens a connection.\nfunc Dial() {}\n", "go").has_doc);

        assert!(!score_file("x = 1\n", "python").has_doc);
        assert!(!score_file("// stray comment\n\nfunc Dial() {}\n", "go").has_doc);
    }

    #[test]
    fn test_markers_per_language() {
        assert!(score_file("def test_parse():\n    pass\n", "python").has_tests);
        assert!(score_file("func TestDial(t *testing.T) {}\n", "go").has_tests);
        assert!(score_file("#[test]\nfn parses() {}\n", "rust").has_tests);
        assert!(score_file("describe('parser', () => {})\n", "typescript").has_tests);
        assert!(!score_file("func Dial() {}\n", "go").has_tests);
    }

    #[test]
    fn empty_content_scores_zero() {
        let breakdown = score_file("", "go");
        assert_eq!(breakdown.lines, 0);
        assert_eq!(breakdown.total, 0.0);
    }
}
