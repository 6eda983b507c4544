//! Command-line interface for qa-forge.
//!
//! Provides commands for QA-pair generation, checkpoint merging and
//! question import.

mod commands;

pub use commands::{parse_cli, run_with_cli};
