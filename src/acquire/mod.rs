//! Repository acquisition: clone strategies, clone validation, source-file
//! enumeration, and the acquirer worker pool.

pub mod clone;
pub mod walker;
pub mod worker;

pub use clone::{CloneOutcome, CloneStrategy, Cloner, RateObservation};
pub use walker::{enumerate_source_files, is_valid_clone, WalkConfig};
pub use worker::{AcquirerContext, AcquirerPool};
