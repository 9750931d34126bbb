//! Corpus index: the durable, searchable store of published files.

pub mod corpus;
pub mod observation;

pub use corpus::{CorpusEntry, CorpusIndex, IndexError};
pub use observation::ObservationClock;
