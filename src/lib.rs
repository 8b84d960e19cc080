//! Monorail - monorepo workspace manager
//!
//! A library for working with JavaScript monorepos:
//! - Workspace discovery from `package.json` manifests
//! - Dependency graph with cycle-tolerant topological ordering
//! - Changed-package detection against git tags and refs
//! - Package filtering by scope, privacy, changes and dependencies
//! - Script execution across packages (batched, streaming or parallel)

pub mod config;
pub mod error;
pub mod execution;
pub mod filter;
pub mod git;
pub mod graph;
pub mod output;
pub mod package;
pub mod task;

pub use error::{Error, Result};
pub use filter::FilterSpec;
pub use graph::{ChangeDetector, ChangeOptions, ChangeSet, DependencyGraph, Workspace};
pub use output::OutputFormat;
pub use package::Package;
pub use task::{RunReport, TaskRun, TaskStatus};
