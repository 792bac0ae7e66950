//! Training run orchestration.
//!
//! # Pipeline Flow
//!
//! 1. **Build**: the training image is built from the configured context
//! 2. **Create**: the task's container starts under resource limits
//! 3. **Follow**: container output is streamed line by line
//! 4. **Wait**: the container is polled until it stops running
//! 5. **Export**: usage over the run window is summarised to JSON
//! 6. **Cleanup**: training containers older than the threshold are removed
//!
//! # Example
//!
//! ```rust,ignore
//! use train_manager::pipeline::{RunOptions, TrainingRun};
//!
//! let run = TrainingRun::new(manager, exporter);
//! let outcome = run.execute(&RunOptions::new("task-123"), |line| println!("{line}")).await?;
//! ```

pub mod runner;

pub use runner::{RunOptions, RunOutcome, TrainingRun};
