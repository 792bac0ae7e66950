//! Command-line interface for train-manager.
//!
//! Provides commands for running training tasks, building the image,
//! listing and cleaning up containers, and exporting usage reports.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
