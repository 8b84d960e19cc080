//! Git operations module
//!
//! The workspace core only reads git history, through the narrow
//! [`GitRepository`] capability. [`LocalRepository`] implements it on top of
//! libgit2.

pub mod commits;
pub mod diff;

use git2::Repository;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub use commits::{describe_tag, is_tag, merge_base, resolve_commit};
pub use diff::diff_paths;

/// Read-only view of a git repository
pub trait GitRepository {
    /// Root of the working tree, if the repository has one
    fn workdir(&self) -> Option<&Path>;

    /// Resolve any revision (tag, branch, commit) to a commit id
    fn resolve_ref(&self, name: &str) -> Result<String, git2::Error>;

    fn is_tag(&self, name: &str) -> bool;

    /// Paths (relative to the workdir) that differ between two revisions
    fn diff_paths(&self, from: &str, to: &str) -> Result<Vec<String>, git2::Error>;

    fn merge_base(&self, a: &str, b: &str) -> Result<String, git2::Error>;

    /// Most recent tag reachable from `reference`.
    ///
    /// With `include_merged == false` only first-parent history is searched,
    /// so tags created on branches merged with `--no-ff` are skipped.
    fn describe_tag(
        &self,
        reference: &str,
        include_merged: bool,
        pattern: Option<&str>,
    ) -> Result<Option<String>, git2::Error>;
}

/// Git repository on disk, discovered from a path inside it
pub struct LocalRepository {
    repo: Repository,
    workdir: Option<PathBuf>,
}

impl LocalRepository {
    pub fn discover(path: &Path) -> Result<Self> {
        let repo = Repository::discover(path).map_err(|e| Error::ChangeDetection {
            baseline: format!("repository at {}", path.display()),
            source: e,
        })?;

        // Canonical so package locations behind symlinks still match
        let workdir = repo
            .workdir()
            .map(|dir| dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf()));

        Ok(Self { repo, workdir })
    }
}

impl GitRepository for LocalRepository {
    fn workdir(&self) -> Option<&Path> {
        self.workdir.as_deref()
    }

    fn resolve_ref(&self, name: &str) -> Result<String, git2::Error> {
        resolve_commit(&self.repo, name)
    }

    fn is_tag(&self, name: &str) -> bool {
        is_tag(&self.repo, name)
    }

    fn diff_paths(&self, from: &str, to: &str) -> Result<Vec<String>, git2::Error> {
        diff_paths(&self.repo, from, to)
    }

    fn merge_base(&self, a: &str, b: &str) -> Result<String, git2::Error> {
        merge_base(&self.repo, a, b)
    }

    fn describe_tag(
        &self,
        reference: &str,
        include_merged: bool,
        pattern: Option<&str>,
    ) -> Result<Option<String>, git2::Error> {
        describe_tag(&self.repo, reference, include_merged, pattern)
    }
}
