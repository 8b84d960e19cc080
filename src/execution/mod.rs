//! Execution module
//!
//! Provides:
//! - Script clients (npm, yarn, pnpm)
//! - Topological, streaming and parallel scheduling with bail
//! - Run profiles

pub mod client;
pub mod profile;
pub mod runner;

pub use client::{NpmClient, ScriptClient};
pub use profile::write_profile;
pub use runner::{RunEvent, RunMode, RunOptions, Runner};
