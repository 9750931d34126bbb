//! File analysis: language detection, quality scoring, deduplication, and
//! batched publication to the corpus index.

pub mod language;
pub mod scorer;
pub mod worker;

pub use language::{detect_language, extensions_for_languages};
pub use scorer::{score_file, ScoreBreakdown};
pub use worker::{AnalyzerContext, AnalyzerPool, FileAnalyzer};
