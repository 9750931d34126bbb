//! Command-line interface for corpus-forge.
//!
//! One long-running process per role (discovery adapter, pipeline) plus
//! one-shot operator commands for the dead-letter sink and queue stats.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli};
