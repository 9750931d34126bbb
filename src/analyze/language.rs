//! Extension-based language detection.
//!
//! The map is intentionally small and exact: a file whose extension is not
//! listed here is rejected by the analyzer, and the acquirer's walker uses
//! the same table to decide which files become jobs at all.

use std::collections::HashSet;
use std::path::Path;

/// (extension, language) pairs. One language may own several extensions.
const EXTENSION_MAP: &[(&str, &str)] = &[
    ("py", "python"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("go", "go"),
    ("rs", "rust"),
    ("java", "java"),
    ("c", "c"),
    ("h", "c"),
    ("cc", "cpp"),
    ("cpp", "cpp"),
    ("hpp", "cpp"),
    ("rb", "ruby"),
    ("php", "php"),
    ("cs", "csharp"),
    ("kt", "kotlin"),
    ("swift", "swift"),
    ("scala", "scala"),
];

/// Detects the language of a file from its extension.
///
/// Returns `None` for unknown extensions; the analyzer rejects those files.
pub fn detect_language(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    EXTENSION_MAP
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, lang)| *lang)
}

/// Extensions belonging to the given target languages (lowercase names).
///
/// The walker gates file enumeration on this set so the file queue never
/// sees files the analyzer would reject on language alone.
pub fn extensions_for_languages(languages: &[String]) -> HashSet<&'static str> {
    EXTENSION_MAP
        .iter()
        .filter(|(_, lang)| languages.iter().any(|l| l == lang))
        .map(|(ext, _)| *ext)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn common_extensions_map() {
        assert_eq!(detect_language(&PathBuf::from("a/b/main.py")), Some("python"));
        assert_eq!(detect_language(&PathBuf::from("src/app.TS")), Some("typescript"));
        assert_eq!(detect_language(&PathBuf::from("pkg/conn.go")), Some("go"));
        assert_eq!(detect_language(&PathBuf::from("lib.rs")), Some("rust"));
        assert_eq!(detect_language(&PathBuf::from("Main.java")), Some("java"));
    }

    #[test]
    fn unknown_extensions_reject() {
        assert_eq!(detect_language(&PathBuf::from("README.md")), None);
        assert_eq!(detect_language(&PathBuf::from("Makefile")), None);
        assert_eq!(detect_language(&PathBuf::from("photo.png")), None);
        assert_eq!(detect_language(&PathBuf::from("noext")), None);
    }

    #[test]
    fn extensions_for_target_set() {
        let langs = vec!["go".to_string(), "typescript".to_string()];
        let exts = extensions_for_languages(&langs);

        assert!(exts.contains("go"));
        assert!(exts.contains("ts"));
        assert!(exts.contains("tsx"));
        assert!(!exts.contains("py"));
        assert!(!exts.contains("rs"));
    }

    #[test]
    fn empty_target_set_yields_no_extensions() {
        assert!(extensions_for_languages(&[]).is_empty());
    }
}
