//! Graph module for package dependency resolution
//!
//! Provides:
//! - Workspace package discovery
//! - Dependency graph construction
//! - Cycle-tolerant topological sorting
//! - Changed package detection

pub mod affected;
pub mod toposort;
pub mod workspace;

pub use affected::{ChangeBaseline, ChangeDetector, ChangeOptions, ChangeSet};
pub use toposort::DependencyGraph;
pub use workspace::Workspace;
